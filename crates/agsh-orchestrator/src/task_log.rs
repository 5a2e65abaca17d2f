//! Append-only per-task JSONL event log (§6 persisted state, §9 "one mutex
//! per task; writes are buffered append"). Mirrors the atomic-write /
//! sequenced-JSONL idiom in `src-tauri/src/orchestrator/store.rs`, scaled
//! down to the one-file-per-task layout this spec calls for.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::OrchestratorResult;

/// Event kinds named in §6: `task_begin, subtask_begin, llm_call, tool_call,
/// criterion_verdict, correction, replan, ggs_decision, plan_directive,
/// memory_query, memory_write, subtask_end, task_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLogEvent {
    TaskBegin,
    SubtaskBegin,
    LlmCall,
    ToolCall,
    CriterionVerdict,
    Correction,
    Replan,
    GgsDecision,
    PlanDirective,
    MemoryQuery,
    MemoryWrite,
    SubtaskEnd,
    TaskEnd,
}

#[derive(Debug, Serialize)]
struct TaskLogRecord {
    seq: u64,
    timestamp: DateTime<Utc>,
    event: TaskLogEvent,
    detail: Value,
}

struct TaskLogFile {
    path: PathBuf,
    next_seq: u64,
}

/// One append-only JSONL file per task, opened by the planner on the first
/// plan and closed by the meta-validator on acceptance (§3) — modelled here
/// as lazily-opened-on-first-write and reference-counted via the registry
/// rather than literal open/close calls, since every log method is
/// null-safe per §3 and a task may be written to from several role tasks
/// concurrently.
#[derive(Clone)]
pub struct TaskLogRegistry {
    tasks_dir: PathBuf,
    files: Arc<Mutex<HashMap<Uuid, TaskLogFile>>>,
}

impl TaskLogRegistry {
    pub fn new(tasks_dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
            files: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn path_for(&self, task_id: Uuid) -> PathBuf {
        self.tasks_dir.join(format!("{task_id}.jsonl"))
    }

    /// Null-safe: a write failure is logged via `tracing` and otherwise
    /// swallowed, since the task log is diagnostic, not load-bearing.
    pub async fn log(&self, task_id: Uuid, event: TaskLogEvent, detail: Value) {
        if let Err(err) = self.try_log(task_id, event, detail).await {
            tracing::warn!(%task_id, ?event, error = %err, "task log: write failed");
        }
    }

    async fn try_log(&self, task_id: Uuid, event: TaskLogEvent, detail: Value) -> OrchestratorResult<()> {
        std::fs::create_dir_all(&self.tasks_dir)?;
        let mut files = self.files.lock().await;
        let entry = files.entry(task_id).or_insert_with(|| TaskLogFile {
            path: self.path_for(task_id),
            next_seq: 0,
        });
        let record = TaskLogRecord {
            seq: entry.next_seq,
            timestamp: Utc::now(),
            event,
            detail,
        };
        append_line(&entry.path, &record)?;
        entry.next_seq += 1;
        Ok(())
    }
}

fn append_line(path: &Path, record: &TaskLogRecord) -> OrchestratorResult<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logged_events_are_sequenced_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskLogRegistry::new(dir.path());
        let task_id = Uuid::new_v4();
        registry.log(task_id, TaskLogEvent::TaskBegin, serde_json::json!({})).await;
        registry.log(task_id, TaskLogEvent::TaskEnd, serde_json::json!({"ok": true})).await;

        let content = std::fs::read_to_string(dir.path().join(format!("{task_id}.jsonl"))).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["seq"], 0);
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["seq"], 1);
    }
}
