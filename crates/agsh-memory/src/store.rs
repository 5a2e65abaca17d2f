use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agsh_types::{Megram, MegramLevel, Potentials, SopRecord};
use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::convolution::{convolve, ConvolutionInput};
use crate::db;
use crate::error::MemoryResult;

const WRITE_QUEUE_CAPACITY: usize = 256;

/// R5. Owns the SQLite connection, a fire-and-forget write queue, and the
/// periodic GC / trust-bankruptcy sweeps.
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
    write_tx: mpsc::Sender<Megram>,
}

impl MemoryStore {
    pub async fn open(db_path: &Path) -> MemoryResult<Arc<Self>> {
        let conn = Arc::new(Mutex::new(db::open(db_path)?));
        let (write_tx, mut write_rx) = mpsc::channel::<Megram>(WRITE_QUEUE_CAPACITY);

        let writer_conn = conn.clone();
        tokio::spawn(async move {
            while let Some(megram) = write_rx.recv().await {
                let guard = writer_conn.lock().await;
                if let Err(err) = db::insert(&guard, &megram) {
                    tracing::warn!(error = %err, "memory: failed to persist queued megram write");
                }
            }
        });

        Ok(Arc::new(Self { conn, write_tx }))
    }

    /// Fire-and-forget write (§4.6, §9). IDs and level default to UUID/`M`
    /// if the caller didn't already set them. Sender-side overflow drops
    /// with a warning, preserving publisher latency.
    pub fn write(&self, megram: Megram) {
        if let Err(err) = self.write_tx.try_send(megram) {
            tracing::warn!(reason = ?err, "memory: dropped queued write, queue full");
        }
    }

    /// Synchronous write used where the caller needs the write to be
    /// durable before proceeding (tests, and `RecordNegativeFeedback`).
    pub async fn write_sync(&self, megram: Megram) -> MemoryResult<()> {
        let guard = self.conn.lock().await;
        db::insert(&guard, &megram)
    }

    pub async fn get(&self, id: Uuid) -> MemoryResult<Option<Megram>> {
        let guard = self.conn.lock().await;
        db::get(&guard, id)
    }

    /// Scan the tag index, load matching M/K Megrams, and return the
    /// decayed convolution `Potentials`.
    pub async fn query_mk(&self, space: &str, entity: &str) -> MemoryResult<Potentials> {
        let guard = self.conn.lock().await;
        let megrams = db::by_tag_and_levels(&guard, space, entity, &[MegramLevel::M, MegramLevel::K])?;
        let mut inputs = Vec::with_capacity(megrams.len());
        for megram in &megrams {
            let last_recalled_at = db::last_recalled_at(&guard, megram.id)?;
            inputs.push(ConvolutionInput {
                megram,
                last_recalled_at,
            });
        }
        Ok(convolve(&inputs, Utc::now()))
    }

    /// C-level entries only; each returned entry resets its recall clock.
    pub async fn query_c(&self, space: &str, entity: &str) -> MemoryResult<Vec<SopRecord>> {
        let guard = self.conn.lock().await;
        let megrams = db::by_tag_and_levels(&guard, space, entity, &[MegramLevel::C])?;
        let now = Utc::now();
        for megram in &megrams {
            db::touch_recall(&guard, megram.id, now)?;
        }
        Ok(megrams.iter().map(db::sop_record_of).collect())
    }

    /// For every M/K Megram, delete it if `att < lambda_gc`. C-level never
    /// deleted. Returns the number of Megrams removed.
    pub async fn gc_pass(&self, lambda_gc: f64) -> MemoryResult<usize> {
        let guard = self.conn.lock().await;
        let megrams = db::all_by_levels(&guard, &[MegramLevel::M, MegramLevel::K])?;
        let now = Utc::now();
        let mut deleted = 0;
        for megram in &megrams {
            let last_recalled_at = db::last_recalled_at(&guard, megram.id)?;
            let dt = crate::convolution::delta_t_days(megram.created_at, last_recalled_at, now);
            let att = crate::convolution::decayed_weight(megram, dt);
            if att < lambda_gc {
                db::delete(&guard, megram.id)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// For every `(space, entity)` pair with a live C entry, compute the
    /// live `dec` over all co-tagged M/K/C entries; if negative, demote
    /// every C entry at that pair to K with `k = 0.05`.
    pub async fn trust_bankruptcy_pass(&self) -> MemoryResult<usize> {
        let guard = self.conn.lock().await;
        let pairs = db::distinct_tags_with_level(&guard, MegramLevel::C)?;
        let now = Utc::now();
        let mut demoted = 0;
        for (space, entity) in pairs {
            let co_tagged = db::by_tag_and_levels(
                &guard,
                &space,
                &entity,
                &[MegramLevel::M, MegramLevel::K, MegramLevel::C],
            )?;
            let mut inputs = Vec::with_capacity(co_tagged.len());
            for megram in &co_tagged {
                let last_recalled_at = db::last_recalled_at(&guard, megram.id)?;
                inputs.push(ConvolutionInput {
                    megram,
                    last_recalled_at,
                });
            }
            let potentials = convolve(&inputs, now);
            if potentials.decision < 0.0 {
                for megram in co_tagged.iter().filter(|m| m.level == MegramLevel::C) {
                    db::set_level_and_k(&guard, megram.id, MegramLevel::K, 0.05)?;
                    demoted += 1;
                }
            }
        }
        Ok(demoted)
    }

    /// Look up the Megram and append a new one at the same tags with
    /// flipped-sign sigma and equal magnitude, so the live convolution
    /// cancels. No-op when `megram_id` is unknown.
    pub async fn record_negative_feedback(&self, megram_id: Uuid, reason: &str) -> MemoryResult<()> {
        let original = match self.get(megram_id).await? {
            Some(m) => m,
            None => return Ok(()),
        };
        let cancelling = Megram {
            id: Uuid::new_v4(),
            level: original.level,
            created_at: Utc::now(),
            space: original.space.clone(),
            entity: original.entity.clone(),
            content: format!("negative feedback: {reason}"),
            state: original.state,
            f: original.f,
            sigma: -original.sigma,
            k: original.k,
        };
        self.write_sync(cancelling).await
    }

    /// Spawn the periodic GC + trust-bankruptcy sweep loop. Returns the
    /// task handle; drop `cancel` to stop it.
    pub fn spawn_background_sweeps(
        self: Arc<Self>,
        interval: Duration,
        lambda_gc: f64,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.gc_pass(lambda_gc).await {
                            Ok(n) if n > 0 => tracing::info!(deleted = n, "memory: gc pass reclaimed megrams"),
                            Ok(_) => {}
                            Err(err) => tracing::warn!(error = %err, "memory: gc pass failed"),
                        }
                        match self.trust_bankruptcy_pass().await {
                            Ok(n) if n > 0 => tracing::info!(demoted = n, "memory: trust bankruptcy demoted C-level megrams"),
                            Ok(_) => {}
                            Err(err) => tracing::warn!(error = %err, "memory: trust bankruptcy pass failed"),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsh_types::{Action, Directive};
    use chrono::Duration as ChronoDuration;

    fn megram(space: &str, entity: &str, level: MegramLevel, f: f64, sigma: f64, k: f64) -> Megram {
        Megram {
            id: Uuid::new_v4(),
            level,
            created_at: Utc::now(),
            space: space.into(),
            entity: entity.into(),
            content: "note".into(),
            state: Directive::Refine,
            f,
            sigma,
            k,
        }
    }

    #[tokio::test]
    async fn query_mk_matches_memory_decay_and_gc_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("megrams.sqlite")).await.unwrap();

        let mut stale = megram("tool:shell", "target:ls", MegramLevel::M, 0.1, 0.0, 0.5);
        stale.created_at = Utc::now() - ChronoDuration::days(30);
        store.write_sync(stale).await.unwrap();

        let fresh = megram("tool:shell", "target:ls", MegramLevel::M, 0.9, 1.0, 0.0);
        store.write_sync(fresh).await.unwrap();

        let deleted = store.gc_pass(0.1).await.unwrap();
        assert_eq!(deleted, 1);

        let potentials = store.query_mk("tool:shell", "target:ls").await.unwrap();
        assert_eq!(potentials.action(), Action::Exploit);
    }

    #[tokio::test]
    async fn trust_bankruptcy_demotes_c_entry_on_negative_live_decision() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("megrams.sqlite")).await.unwrap();

        let sop = megram("intent:deploy", "env:local", MegramLevel::C, 0.9, 1.0, 0.0);
        let sop_id = sop.id;
        store.write_sync(sop).await.unwrap();
        // overwhelming negative live evidence at the same tags
        store
            .write_sync(megram("intent:deploy", "env:local", MegramLevel::K, 0.95, -1.0, 0.0))
            .await
            .unwrap();

        let demoted = store.trust_bankruptcy_pass().await.unwrap();
        assert_eq!(demoted, 1);

        let back = store.get(sop_id).await.unwrap().unwrap();
        assert_eq!(back.level, MegramLevel::K);
        assert_eq!(back.k, 0.05);
    }

    #[tokio::test]
    async fn record_negative_feedback_cancels_live_decision() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("megrams.sqlite")).await.unwrap();
        let original = megram("tool:http", "target:example.com", MegramLevel::M, 0.8, 1.0, 0.0);
        let id = original.id;
        store.write_sync(original).await.unwrap();

        store.record_negative_feedback(id, "turned out wrong").await.unwrap();

        let potentials = store.query_mk("tool:http", "target:example.com").await.unwrap();
        assert!(potentials.decision.abs() < 1e-9);
    }

    #[tokio::test]
    async fn record_negative_feedback_is_noop_for_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("megrams.sqlite")).await.unwrap();
        store.record_negative_feedback(Uuid::new_v4(), "n/a").await.unwrap();
    }
}
