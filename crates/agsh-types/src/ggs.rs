use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{FailureClass, SubTaskOutcome};

/// The controller's chosen next action. Action states route to R2;
/// terminal states route directly to the user as `FinalResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    Refine,
    ChangePath,
    ChangeApproach,
    BreakSymmetry,
    Success,
    Abandon,
    Accept,
}

impl Directive {
    pub fn is_terminal(self) -> bool {
        matches!(self, Directive::Success | Directive::Abandon | Directive::Accept)
    }

    pub fn is_action(self) -> bool {
        !self.is_terminal()
    }
}

/// `plateau` / `stable` / `improving` / `worsening`, computed independently
/// of the directive and used only by the Law-2 kill-switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientLabel {
    Plateau,
    Stable,
    Improving,
    Worsening,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Loss {
    pub d: f64,
    pub p: f64,
    pub omega: f64,
    pub l: f64,
}

/// R4b → R7. Carries the full per-criterion breakdown so the controller
/// never has to re-query R4a.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanRequest {
    pub task_id: Uuid,
    pub gap_summary: String,
    pub failed_subtask_ids: Vec<Uuid>,
    pub correction_count: u32,
    pub elapsed_ms: u64,
    pub outcomes: Vec<SubTaskOutcome>,
}

/// R4b → R7. Emitted only when R4b's verdict is `accept`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub task_id: Uuid,
    pub summary: String,
    pub merged_output: String,
    pub elapsed_ms: u64,
    pub outcomes: Vec<SubTaskOutcome>,
}

/// R7 → R2. Action-state directives route to R2; terminal directives are
/// never published as a `PlanDirective` (they become `FinalResult`
/// instead) but the type still carries `directive` so tests and logs can
/// record the complete decision uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDirective {
    pub task_id: Uuid,
    pub loss: Loss,
    pub prev_directive: Option<Directive>,
    pub directive: Directive,
    pub blocked_tools: Vec<String>,
    pub blocked_targets: Vec<String>,
    pub failed_criterion: Option<String>,
    pub failure_class: Option<FailureClass>,
    pub rationale: String,
}

/// R7 → user. Only R7 may emit this; at most one per task (§8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    pub task_id: Uuid,
    pub summary: String,
    pub output: String,
    pub loss: Loss,
    pub grad_l: f64,
    pub replans: u32,
    pub directive: Directive,
    pub prev_directive: Option<Directive>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_directives_partition_action_directives() {
        for d in [
            Directive::Refine,
            Directive::ChangePath,
            Directive::ChangeApproach,
            Directive::BreakSymmetry,
        ] {
            assert!(d.is_action());
            assert!(!d.is_terminal());
        }
        for d in [Directive::Success, Directive::Abandon, Directive::Accept] {
            assert!(d.is_terminal());
            assert!(!d.is_action());
        }
    }
}
