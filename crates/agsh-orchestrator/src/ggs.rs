//! The Goal Gradient Solver (R7, §4.5): loss computation, macro-state
//! selection, the Law-2 kill-switch, and the fixed quantization matrix that
//! turns a terminal/action directive into a Megram write.

use std::collections::HashMap;

use agsh_bus::config::GgsConfig;
use agsh_types::{Directive, FailureClass, GradientLabel, Loss, SubTaskOutcome};
use uuid::Uuid;

const LOGICAL_KEYWORDS: &[&str] = &[
    "wrong approach",
    "incorrect logic",
    "misunderstood",
    "wrong tool",
    "bad assumption",
    "misread",
];
const ENVIRONMENTAL_KEYWORDS: &[&str] = &[
    "permission denied",
    "no such file",
    "connection refused",
    "timeout",
    "timed out",
    "network",
    "[law1]",
];

/// Per-task controller memory, one entry per in-flight task (§4.5
/// implementation note: `HashMap<TaskId, GgsTaskState>` behind one mutex).
#[derive(Debug, Clone, Default)]
pub struct GgsTaskState {
    pub l_prev: f64,
    pub replan_count: u32,
    pub worsening_count: u32,
    pub tried_targets: Vec<String>,
    pub prev_directive: Option<Directive>,
}

#[derive(Debug, Default)]
pub struct GgsStateTable {
    states: HashMap<Uuid, GgsTaskState>,
}

impl GgsStateTable {
    pub fn state_for(&mut self, task_id: Uuid) -> &mut GgsTaskState {
        self.states.entry(task_id).or_default()
    }

    pub fn clear(&mut self, task_id: Uuid) {
        self.states.remove(&task_id);
    }
}

/// D (§4.5): fraction of failed criteria, or failed subtasks when no
/// criterion-level verdicts exist. `1.0` for an empty outcome set.
pub fn compute_d(outcomes: &[SubTaskOutcome]) -> f64 {
    if outcomes.is_empty() {
        return 1.0;
    }
    let total_criteria: usize = outcomes.iter().map(|o| o.criteria_verdicts.len()).sum();
    if total_criteria > 0 {
        let failed: usize = outcomes
            .iter()
            .flat_map(|o| o.criteria_verdicts.iter())
            .filter(|v| !v.passed)
            .count();
        failed as f64 / total_criteria as f64
    } else {
        let failed = outcomes
            .iter()
            .filter(|o| o.status == agsh_types::SubTaskStatus::Failed)
            .count();
        failed as f64 / outcomes.len() as f64
    }
}

/// P (§4.5): ratio of logical to (logical + environmental) failure classes
/// over failed criteria, or a keyword heuristic over free text when no
/// criterion-level failure_class exists.
pub fn compute_p(outcomes: &[SubTaskOutcome]) -> f64 {
    let classified: Vec<FailureClass> = outcomes
        .iter()
        .flat_map(|o| o.criteria_verdicts.iter())
        .filter(|v| !v.passed)
        .filter_map(|v| v.failure_class)
        .collect();

    if !classified.is_empty() {
        let logical = classified.iter().filter(|c| **c == FailureClass::Logical).count();
        return logical as f64 / classified.len() as f64;
    }

    let mut text = String::new();
    for outcome in outcomes {
        if let Some(reason) = &outcome.failure_reason {
            text.push_str(&reason.to_lowercase());
            text.push(' ');
        }
        for unmet in outcome.failed_criteria() {
            text.push_str(&unmet.to_lowercase());
            text.push(' ');
        }
    }
    if text.is_empty() {
        return 0.5;
    }
    let is_logical = LOGICAL_KEYWORDS.iter().any(|kw| text.contains(kw));
    let is_environmental = ENVIRONMENTAL_KEYWORDS.iter().any(|kw| text.contains(kw));
    match (is_logical, is_environmental) {
        (true, false) => 0.7,
        (false, true) => 0.3,
        _ => 0.5,
    }
}

/// Omega (§4.5), clipped to `[0, 1]`.
pub fn compute_omega(replan_count: u32, elapsed_ms: u64, cfg: &GgsConfig) -> f64 {
    let replan_term = cfg.w1 * (replan_count as f64 / cfg.r_max);
    let time_term = cfg.w2 * (elapsed_ms as f64 / cfg.t_budget_ms);
    (replan_term + time_term).min(1.0).max(0.0)
}

/// L (§4.5): `alpha*D + beta*(1-Omega)*P + lambda*Omega`.
pub fn compute_loss(d: f64, p: f64, omega: f64, cfg: &GgsConfig) -> f64 {
    cfg.alpha * d + cfg.beta * (1.0 - omega) * p + cfg.lambda * omega
}

pub fn gradient_label(grad_l: f64, d: f64, cfg: &GgsConfig) -> GradientLabel {
    if grad_l < -cfg.epsilon {
        GradientLabel::Improving
    } else if grad_l.abs() < cfg.epsilon {
        if d > cfg.delta {
            GradientLabel::Plateau
        } else {
            GradientLabel::Stable
        }
    } else {
        GradientLabel::Worsening
    }
}

/// Macro-state selection (§4.5 priority cascade), before the Law-2 override.
pub fn select_directive(d: f64, p: f64, omega: f64, grad_l: f64, cfg: &GgsConfig) -> Directive {
    if omega >= cfg.theta_abandon {
        return Directive::Abandon;
    }
    if d <= cfg.delta {
        return Directive::Success;
    }
    let signal = grad_l.abs() >= cfg.epsilon;
    let logical = p > cfg.rho;
    match (signal, logical) {
        (false, true) => Directive::BreakSymmetry,
        (true, true) => Directive::ChangeApproach,
        (false, false) => Directive::ChangePath,
        (true, false) => Directive::Refine,
    }
}

/// Law-2 kill-switch: two consecutive non-terminal rounds whose loss did
/// not improve (`grad_L >= 0`) while `D` is still above the success
/// threshold force `abandon`, regardless of the cascade's pick. This is
/// broader than the diagnostic `GradientLabel::Worsening` alone (spec
/// scenario 4): a `Plateau` round — loss flat, `D` still high — counts
/// toward the kill-switch too, since a run that never decreases its loss
/// is as stuck as one that is actively getting worse.
pub fn apply_law2(directive: Directive, grad_l: f64, d: f64, cfg: &GgsConfig, state: &mut GgsTaskState) -> Directive {
    let stuck = grad_l >= 0.0 && d > cfg.delta;
    if stuck && !directive.is_terminal() {
        state.worsening_count += 1;
    } else {
        state.worsening_count = 0;
    }
    if state.worsening_count >= 2 && !directive.is_terminal() {
        Directive::Abandon
    } else {
        directive
    }
}

pub fn loss_snapshot(d: f64, p: f64, omega: f64, l: f64) -> Loss {
    Loss { d, p, omega, l }
}

/// `(f, sigma, k)` quantization matrix (§4.5). These constants are spec-fixed,
/// not user-tunable — only the GGS weights above are config-driven.
pub fn quantize(directive: Directive) -> (f64, f64, f64) {
    match directive {
        Directive::Abandon => (0.95, -1.0, 0.05),
        Directive::Accept | Directive::Success => (0.90, 1.0, 0.05),
        Directive::Refine => (0.60, 0.2, 0.5),
        Directive::ChangePath => (0.50, 0.0, 0.3),
        Directive::ChangeApproach => (0.70, -0.3, 0.2),
        Directive::BreakSymmetry => (0.80, -0.6, 0.1),
    }
}

/// Unique tool names from failed outcomes' tool_calls (§4.5 action-state
/// derivation; `break_symmetry` / `change_approach` only).
pub fn blocked_tools(outcomes: &[SubTaskOutcome]) -> Vec<String> {
    let mut tools: Vec<String> = outcomes
        .iter()
        .filter(|o| o.status == agsh_types::SubTaskStatus::Failed)
        .flat_map(|o| o.tool_calls.iter())
        .map(|call| call.tool.clone())
        .collect();
    tools.sort();
    tools.dedup();
    tools
}

/// Parses each failed outcome's `"tool: {json-input} -> output"` tool_call
/// line, extracts `query`/`command`/`path` fields, and merges into the
/// accumulating target list (`change_path` / `refine` only).
pub fn blocked_targets(outcomes: &[SubTaskOutcome], accumulated: &mut Vec<String>) {
    for outcome in outcomes.iter().filter(|o| o.status == agsh_types::SubTaskStatus::Failed) {
        for call in &outcome.tool_calls {
            for field in ["query", "command", "path"] {
                if let Some(value) = call.input.get(field).and_then(|v| v.as_str()) {
                    let target = value.to_string();
                    if !accumulated.contains(&target) {
                        accumulated.push(target);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsh_types::{CriterionVerdict, SubTaskStatus};

    fn cfg() -> GgsConfig {
        GgsConfig::default()
    }

    fn outcome(passed: &[bool]) -> SubTaskOutcome {
        SubTaskOutcome {
            subtask_id: Uuid::new_v4(),
            parent_task_id: Uuid::new_v4(),
            status: if passed.iter().all(|p| *p) {
                SubTaskStatus::Matched
            } else {
                SubTaskStatus::Failed
            },
            output: String::new(),
            failure_reason: None,
            gap_trajectory: Vec::new(),
            criteria_verdicts: passed
                .iter()
                .map(|p| CriterionVerdict {
                    criterion: "c".into(),
                    passed: *p,
                    failure_class: None,
                    evidence: String::new(),
                })
                .collect(),
            tool_calls: Vec::new(),
        }
    }

    #[test]
    fn loss_boundary_matches_spec_scenario_one() {
        let cfg = cfg();
        let d = 1.0;
        let p = 0.0;
        let omega = 0.0;
        let l = compute_loss(d, p, omega, &cfg);
        assert!((l - cfg.alpha).abs() < 1e-9);
    }

    #[test]
    fn loss_boundary_matches_spec_scenario_two() {
        let cfg = cfg();
        let l = compute_loss(0.0, 0.9, 1.0, &cfg);
        assert!((l - cfg.lambda).abs() < 1e-9);
    }

    #[test]
    fn empty_outcomes_force_d_to_one() {
        assert_eq!(compute_d(&[]), 1.0);
    }

    #[test]
    fn directive_cascade_matches_decision_table() {
        let cfg = cfg();
        assert_eq!(select_directive(0.6, 0.9, 0.0, 0.01, &cfg), Directive::BreakSymmetry);
        assert_eq!(select_directive(0.6, 0.9, 0.0, 0.5, &cfg), Directive::ChangeApproach);
        assert_eq!(select_directive(0.6, 0.1, 0.0, 0.01, &cfg), Directive::ChangePath);
        assert_eq!(select_directive(0.6, 0.1, 0.0, 0.5, &cfg), Directive::Refine);
    }

    #[test]
    fn high_omega_always_abandons() {
        let cfg = cfg();
        assert_eq!(select_directive(0.9, 0.9, 0.9, 0.5, &cfg), Directive::Abandon);
    }

    #[test]
    fn low_d_is_success_even_under_pressure() {
        let cfg = cfg();
        assert_eq!(select_directive(0.1, 0.9, 0.0, 0.5, &cfg), Directive::Success);
    }

    #[test]
    fn law2_overrides_to_abandon_after_two_worsening_rounds() {
        let cfg = cfg();
        let mut state = GgsTaskState::default();
        let d1 = apply_law2(Directive::Refine, 0.73, 1.0, &cfg, &mut state);
        assert_eq!(d1, Directive::Refine);
        let d2 = apply_law2(Directive::Refine, 0.73, 1.0, &cfg, &mut state);
        assert_eq!(d2, Directive::Abandon);
    }

    #[test]
    fn law2_overrides_to_abandon_on_a_stuck_plateau_too() {
        // spec scenario 4: round 1 worsening (grad_L well above epsilon),
        // round 2 a plateau (grad_L small but non-negative) — still stuck
        // since D never dropped below the success threshold.
        let cfg = cfg();
        let mut state = GgsTaskState::default();
        let d1 = apply_law2(Directive::Refine, 0.73, 1.0, &cfg, &mut state);
        assert_eq!(d1, Directive::Refine);
        let d2 = apply_law2(Directive::ChangePath, 0.05, 1.0, &cfg, &mut state);
        assert_eq!(d2, Directive::Abandon);
    }

    #[test]
    fn law2_does_not_fire_once_d_drops_below_the_success_threshold() {
        let cfg = cfg();
        let mut state = GgsTaskState::default();
        apply_law2(Directive::Refine, 0.73, 1.0, &cfg, &mut state);
        let d2 = apply_law2(Directive::Refine, 0.02, 0.1, &cfg, &mut state);
        assert_eq!(d2, Directive::Refine);
    }

    #[test]
    fn budget_exhausted_scenario_matches_spec() {
        let cfg = cfg();
        let omega = compute_omega(0, 600_000, &cfg);
        assert!(omega >= cfg.theta_abandon);
    }

    #[test]
    fn blocked_tools_are_unique_and_sorted() {
        use agsh_types::ToolCallRecord;
        let mut outcome = outcome(&[false]);
        outcome.tool_calls = vec![
            ToolCallRecord {
                tool: "shell".into(),
                input: serde_json::json!({}),
                output_snippet: String::new(),
            },
            ToolCallRecord {
                tool: "shell".into(),
                input: serde_json::json!({}),
                output_snippet: String::new(),
            },
        ];
        assert_eq!(blocked_tools(&[outcome]), vec!["shell".to_string()]);
    }
}
