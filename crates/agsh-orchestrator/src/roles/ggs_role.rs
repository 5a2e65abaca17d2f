//! R7 GGS role wiring (§4.5): turns the pure loss/decision math in
//! `crate::ggs` into the controller's reaction to one `ReplanRequest` or
//! `OutcomeSummary` — a `PlanDirective` to R2, or a `FinalResult` to the
//! user plus per-task state cleanup. Also the sole writer to memory.

use agsh_bus::GgsConfig;
use agsh_memory::MemoryStore;
use agsh_types::{
    intent_slug, Directive, FinalResult, Megram, MegramLevel, OutcomeSummary, PlanDirective, ReplanRequest,
};
use chrono::Utc;
use uuid::Uuid;

use crate::ggs::{
    apply_law2, blocked_targets, blocked_tools, compute_d, compute_loss, compute_omega, compute_p,
    gradient_label, loss_snapshot, quantize, select_directive, GgsStateTable,
};

/// What the GGS role produced for one round: either an action directive
/// to forward to the planner, or a terminal `FinalResult` for the user.
/// Both variants also carry the Megram the GGS wrote (for task-log/audit
/// visibility of the "sole writer to memory" rule).
pub enum GgsOutcome {
    Directive(PlanDirective),
    Final(FinalResult),
}

fn intent_of(intent_hint: &str) -> String {
    intent_slug(intent_hint)
}

/// Processes one `ReplanRequest`: computes `(D, P, Omega, L, grad_L)`,
/// picks a macro-state, applies the Law-2 kill-switch, and returns the
/// resulting directive/final plus the Megram(s) to persist.
pub fn decide_on_replan(
    request: &ReplanRequest,
    intent_hint: &str,
    table: &mut GgsStateTable,
    cfg: &GgsConfig,
) -> (GgsOutcome, Vec<Megram>) {
    let state = table.state_for(request.task_id);
    let prev_directive = state.prev_directive;

    let d = compute_d(&request.outcomes);
    let p = compute_p(&request.outcomes);
    let omega = compute_omega(state.replan_count, request.elapsed_ms, cfg);
    let l = compute_loss(d, p, omega, cfg);
    let grad_l = l - state.l_prev;

    let mut directive = select_directive(d, p, omega, grad_l, cfg);
    let label = gradient_label(grad_l, d, cfg);
    directive = apply_law2(directive, grad_l, d, cfg, state);

    state.l_prev = l;
    state.replan_count += 1;
    if directive.is_action() {
        blocked_targets(&request.outcomes, &mut state.tried_targets);
    }
    let tried_targets = state.tried_targets.clone();
    state.prev_directive = Some(directive);

    let loss = loss_snapshot(d, p, omega, l);
    let rationale = format!(
        "D={d:.2} P={p:.2} Omega={omega:.2} L={l:.2} grad_L={grad_l:.2} label={label:?}"
    );

    let mut megrams = Vec::new();
    if directive.is_action() {
        let failed_tools = blocked_tools(&request.outcomes);
        for tool in &failed_tools {
            megrams.push(tool_failure_megram(tool.clone(), &request.gap_summary, directive));
        }
        let blocked_tools_for_directive = match directive {
            Directive::BreakSymmetry | Directive::ChangeApproach => failed_tools,
            _ => Vec::new(),
        };
        let blocked_targets_for_directive = match directive {
            Directive::ChangePath | Directive::Refine => tried_targets,
            _ => Vec::new(),
        };
        let plan_directive = PlanDirective {
            task_id: request.task_id,
            loss,
            prev_directive,
            directive,
            blocked_tools: blocked_tools_for_directive,
            blocked_targets: blocked_targets_for_directive,
            failed_criterion: request
                .outcomes
                .iter()
                .flat_map(|o| o.failed_criteria())
                .next()
                .map(|v| v.criterion.clone()),
            failure_class: request
                .outcomes
                .iter()
                .flat_map(|o| o.failed_criteria())
                .find_map(|v| v.failure_class),
            rationale,
        };
        (GgsOutcome::Directive(plan_directive), megrams)
    } else {
        let terminal_megram = terminal_megram(&intent_of(intent_hint), directive);
        megrams.push(terminal_megram);
        let summary = terminal_summary(directive, request.outcomes.len());
        let final_result = FinalResult {
            task_id: request.task_id,
            summary,
            output: request
                .outcomes
                .iter()
                .map(|o| o.output.clone())
                .collect::<Vec<_>>()
                .join("\n"),
            loss,
            grad_l,
            replans: table.state_for(request.task_id).replan_count,
            directive,
            prev_directive,
        };
        table.clear(request.task_id);
        (GgsOutcome::Final(final_result), megrams)
    }
}

/// Processes one `OutcomeSummary` (R4b's `accept` path): always terminal
/// (`accept`), D computed from the accepted outcomes for reporting.
pub fn decide_on_accept(
    summary: &OutcomeSummary,
    intent_hint: &str,
    table: &mut GgsStateTable,
    cfg: &GgsConfig,
) -> (FinalResult, Megram) {
    let state = table.state_for(summary.task_id);
    let prev_directive = state.prev_directive;
    let replans = state.replan_count;

    let d = compute_d(&summary.outcomes);
    let p = compute_p(&summary.outcomes);
    let omega = compute_omega(replans, summary.elapsed_ms, cfg);
    let l = compute_loss(d, p, omega, cfg);
    let grad_l = l - state.l_prev;

    table.clear(summary.task_id);

    let loss = loss_snapshot(d, p, omega, l);
    let megram = terminal_megram(&intent_of(intent_hint), Directive::Accept);
    let final_result = FinalResult {
        task_id: summary.task_id,
        summary: summary.summary.clone(),
        output: summary.merged_output.clone(),
        loss,
        grad_l,
        replans,
        directive: Directive::Accept,
        prev_directive,
    };
    (final_result, megram)
}

fn terminal_summary(directive: Directive, outcome_count: usize) -> String {
    match directive {
        Directive::Success => format!("✅ Task succeeded across {outcome_count} subtask outcomes"),
        Directive::Abandon => {
            format!("❌ Task abandoned after exhausting the replan budget ({outcome_count} outcomes)")
        }
        _ => unreachable!("terminal_summary called on an action directive"),
    }
}

fn tool_failure_megram(tool: String, gap_summary: &str, directive: Directive) -> Megram {
    let (f, sigma, k) = quantize(directive);
    Megram {
        id: Uuid::new_v4(),
        level: MegramLevel::M,
        created_at: Utc::now(),
        space: format!("tool:{tool}"),
        entity: format!("target:{}", truncate(gap_summary, 120)),
        content: gap_summary.to_string(),
        state: directive,
        f,
        sigma,
        k,
    }
}

fn terminal_megram(space: &str, directive: Directive) -> Megram {
    let (f, sigma, k) = quantize(directive);
    Megram {
        id: Uuid::new_v4(),
        level: MegramLevel::M,
        created_at: Utc::now(),
        space: space.to_string(),
        entity: "env:local".to_string(),
        content: format!("task terminated with directive {directive:?}"),
        state: directive,
        f,
        sigma,
        k,
    }
}

/// Byte-length truncation that never splits a multi-byte UTF-8 char,
/// since `gap_summary` is model-generated free text.
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

/// Persists every Megram the GGS decided to write this round (the
/// authoritative write, per §6's "Megram | R7 -> R5 (observation copy;
/// authoritative write is direct)").
pub async fn persist_megrams(memory: &MemoryStore, megrams: &[Megram]) {
    for megram in megrams {
        memory.write(megram.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsh_types::{CriterionVerdict, SubTaskOutcome, SubTaskStatus};

    fn cfg() -> GgsConfig {
        GgsConfig::default()
    }

    fn failed_outcome(task_id: Uuid) -> SubTaskOutcome {
        SubTaskOutcome {
            subtask_id: Uuid::new_v4(),
            parent_task_id: task_id,
            status: SubTaskStatus::Failed,
            output: String::new(),
            failure_reason: Some("wrong approach entirely".into()),
            gap_trajectory: Vec::new(),
            criteria_verdicts: vec![CriterionVerdict {
                criterion: "c".into(),
                passed: false,
                failure_class: None,
                evidence: String::new(),
            }],
            tool_calls: Vec::new(),
        }
    }

    #[test]
    fn budget_exhausted_scenario_abandons_with_matching_summary() {
        let mut table = GgsStateTable::default();
        let task_id = Uuid::new_v4();
        let request = ReplanRequest {
            task_id,
            gap_summary: "still failing".into(),
            failed_subtask_ids: vec![],
            correction_count: 0,
            elapsed_ms: 600_000,
            outcomes: vec![failed_outcome(task_id)],
        };
        let (outcome, _megrams) = decide_on_replan(&request, "do the thing", &mut table, &cfg());
        match outcome {
            GgsOutcome::Final(final_result) => {
                assert_eq!(final_result.directive, Directive::Abandon);
                assert!(final_result.loss.omega >= 0.8);
                assert!(final_result.summary.starts_with("❌ Task abandoned"));
            }
            GgsOutcome::Directive(_) => panic!("expected a terminal result"),
        }
    }

    #[test]
    fn law2_kill_switch_forces_abandon_on_second_worsening_round() {
        let mut table = GgsStateTable::default();
        let task_id = Uuid::new_v4();
        table.state_for(task_id).l_prev = 0.01;

        let request = ReplanRequest {
            task_id,
            gap_summary: "all failed".into(),
            failed_subtask_ids: vec![],
            correction_count: 0,
            elapsed_ms: 1_000,
            outcomes: vec![failed_outcome(task_id)],
        };

        let (first, _) = decide_on_replan(&request, "do the thing", &mut table, &cfg());
        assert!(matches!(first, GgsOutcome::Directive(_)));

        let (second, _) = decide_on_replan(&request, "do the thing", &mut table, &cfg());
        match second {
            GgsOutcome::Final(final_result) => assert_eq!(final_result.directive, Directive::Abandon),
            GgsOutcome::Directive(d) => panic!("expected abandon, got {:?}", d.directive),
        }
    }

    #[test]
    fn accept_path_always_terminal_with_accept_directive() {
        let mut table = GgsStateTable::default();
        let task_id = Uuid::new_v4();
        let summary = OutcomeSummary {
            task_id,
            summary: "done".into(),
            merged_output: "Tuesday".into(),
            elapsed_ms: 500,
            outcomes: vec![],
        };
        let (final_result, megram) = decide_on_accept(&summary, "what day is it", &mut table, &cfg());
        assert_eq!(final_result.directive, Directive::Accept);
        assert_eq!(megram.entity, "env:local");
    }
}
