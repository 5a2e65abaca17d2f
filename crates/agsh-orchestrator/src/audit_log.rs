//! Append-only audit log (§6: `~/.cache/agsh/audit.jsonl`,
//! `{event_id, timestamp, from, to, type, anomaly, detail}`).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agsh_types::{MessageType, Role};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::OrchestratorResult;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub from: Role,
    pub to: Role,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub anomaly: Option<String>,
    pub detail: Value,
}

#[derive(Clone)]
pub struct AuditLog {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn append(&self, event: &AuditEvent) -> OrchestratorResult<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        append_line(&self.path, event)
    }
}

fn append_line(path: &Path, event: &AuditEvent) -> OrchestratorResult<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(event)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_writes_one_jsonl_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            from: Role::Perceiver,
            to: Role::Planner,
            message_type: MessageType::TaskSpec,
            anomaly: None,
            detail: serde_json::json!({}),
        };
        log.append(&event).await.unwrap();
        log.append(&event).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
