use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Uncertain,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Logical,
    Environmental,
}

/// `"tool: input → output-snippet"`, concrete evidence R4a and R7 can
/// inspect without re-running anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: serde_json::Value,
    pub output_snippet: String,
}

impl ToolCallRecord {
    pub fn as_line(&self) -> String {
        format!(
            "{}: {} → {}",
            self.tool,
            self.input,
            truncate(&self.output_snippet, 400)
        )
    }
}

/// Byte-length truncation that never splits a multi-byte UTF-8 char,
/// since `s` is model-generated free text.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let cut = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max)
        .last()
        .unwrap_or(0);
    format!("{}…", &s[..cut])
}

/// Emitted by R3 per execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub subtask_id: Uuid,
    pub status: ExecutionStatus,
    pub output: String,
    pub uncertainty: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// R4a → R3. One per failed verdict while retries remain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionSignal {
    pub subtask_id: Uuid,
    pub attempt_number: u32,
    pub what_was_wrong: String,
    pub what_to_do: String,
    pub failure_class: FailureClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Matched,
    Retry,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionVerdict {
    pub criterion: String,
    pub passed: bool,
    pub failure_class: Option<FailureClass>,
    pub evidence: String,
}

/// One row per attempt: the score R4a assigned and which criteria were
/// still unmet. The full sequence is the "gap trajectory" R7 inspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapTrajectoryEntry {
    pub attempt: u32,
    pub score: f64,
    pub unmet_criteria: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Matched,
    Failed,
}

/// Terminal per subtask per round. R4a → R4b.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskOutcome {
    pub subtask_id: Uuid,
    pub parent_task_id: Uuid,
    pub status: SubTaskStatus,
    pub output: String,
    pub failure_reason: Option<String>,
    pub gap_trajectory: Vec<GapTrajectoryEntry>,
    pub criteria_verdicts: Vec<CriterionVerdict>,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl SubTaskOutcome {
    /// Evidence-driven classification overrides the model's own
    /// `failure_class` when the evidence or tool-calls contain one of
    /// these strings, per §4.3's agent-validator description.
    pub fn environmental_evidence_markers() -> &'static [&'static str] {
        &[
            "permission denied",
            "no such file",
            "connection refused",
            "[LAW1]",
        ]
    }

    pub fn failed_criteria(&self) -> Vec<&CriterionVerdict> {
        self.criteria_verdicts.iter().filter(|v| !v.passed).collect()
    }
}

/// Scans `text` for the evidence-driven environmental markers in §4.3.
/// Case-insensitive: real tool output capitalizes these ("Permission
/// denied"), and the override must still fire against that form.
pub fn evidence_forces_environmental(text: &str) -> bool {
    let text = text.to_lowercase();
    SubTaskOutcome::environmental_evidence_markers()
        .iter()
        .any(|marker| text.contains(&marker.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_line_formats_with_arrow() {
        let rec = ToolCallRecord {
            tool: "shell".into(),
            input: serde_json::json!({"cmd": "date"}),
            output_snippet: "Tue Jul 28".into(),
        };
        assert!(rec.as_line().contains("shell:"));
        assert!(rec.as_line().contains("→"));
    }

    #[test]
    fn permission_denied_forces_environmental() {
        assert!(evidence_forces_environmental(
            "ls: cannot open /root: Permission denied"
        ));
        assert!(!evidence_forces_environmental("the output looked fine"));
    }
}
