use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Falsifiable assertion about output, never a restatement of intent.
pub type Criterion = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConstraints {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

/// Produced once by R1 from raw user text; consumed once by R2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: Uuid,
    pub intent: String,
    pub success_criteria: Vec<Criterion>,
    pub constraints: TaskConstraints,
    pub raw_input: String,
}

/// One decomposed step. Subtasks sharing a `sequence` are independent;
/// the dispatcher mutates `context` exactly once before execution to
/// inject prior-group outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub subtask_id: Uuid,
    pub parent_task_id: Uuid,
    pub intent: String,
    pub success_criteria: Vec<Criterion>,
    pub context: String,
    pub sequence: u32,
}

/// One per planning round. `subtask_ids.len()` is the count the dispatcher
/// and R4b must both observe before acting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchManifest {
    pub task_id: Uuid,
    pub subtask_ids: Vec<Uuid>,
    pub task_criteria: Vec<Criterion>,
    pub dispatched_at: DateTime<Utc>,
}

/// Marker line the dispatcher prepends to a later sequence group's
/// subtask context, per §4.2 step 4.
pub const PRIOR_OUTPUTS_MARKER: &str = "Outputs from prior steps — do not re-run discovery";
