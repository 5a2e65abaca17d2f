//! R2 Planner (§4.3). Subscribes to `TaskSpec` and action-state
//! `PlanDirective`s, queries memory for constraints, and asks the model to
//! decompose into `{task_criteria[], subtasks[]}`.

use agsh_memory::MemoryStore;
use agsh_providers::ModelClient;
use agsh_types::{intent_slug, Action, DispatchManifest, Directive, PlanDirective, SubTask, TaskSpec};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::parsing::strict_parse_with_wrappers;

const SYSTEM_PROMPT: &str = "\
You are the planning step of an agentic pipeline. Given a task, decompose \
it into an ordered set of subtasks. Subtasks sharing a `sequence` run \
concurrently; a higher `sequence` runs only after every subtask at the \
prior sequence has completed. Respond with exactly one JSON object:
{\"task_criteria\": [...], \"subtasks\": [{\"intent\": \"...\", \
\"success_criteria\": [...], \"sequence\": 1}]}";

#[derive(Deserialize)]
struct RawSubTask {
    intent: String,
    #[serde(default)]
    success_criteria: Vec<String>,
    #[serde(default = "default_sequence")]
    sequence: u32,
}

fn default_sequence() -> u32 {
    1
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    task_criteria: Vec<String>,
    subtasks: Vec<RawSubTask>,
}

/// One decomposed plan: the manifest plus the subtasks that will follow it
/// on the bus, in that order (§4.3: "emits a `DispatchManifest` followed
/// by one `SubTask` per decomposed step").
pub struct Plan {
    pub manifest: DispatchManifest,
    pub subtasks: Vec<SubTask>,
}

/// Constraints injected into the planning prompt. `None` fields are simply
/// omitted from the composed prompt block.
#[derive(Debug, Clone, Default)]
pub struct PlanningConstraints {
    pub blocked_tools: Vec<String>,
    pub blocked_targets: Vec<String>,
    pub memory_note: Option<String>,
}

fn plan_wrappers() -> &'static [fn(&Value) -> Option<RawPlan>] {
    fn plan_key(v: &Value) -> Option<RawPlan> {
        v.get("plan")
            .and_then(|p| serde_json::from_value(p.clone()).ok())
            .map(|subtasks| RawPlan {
                task_criteria: Vec::new(),
                subtasks,
            })
    }
    fn steps_key(v: &Value) -> Option<RawPlan> {
        v.get("steps")
            .and_then(|p| serde_json::from_value(p.clone()).ok())
            .map(|subtasks| RawPlan {
                task_criteria: Vec::new(),
                subtasks,
            })
    }
    fn bare_array(v: &Value) -> Option<RawPlan> {
        serde_json::from_value::<Vec<RawSubTask>>(v.clone())
            .ok()
            .map(|subtasks| RawPlan {
                task_criteria: Vec::new(),
                subtasks,
            })
    }
    &[plan_key, steps_key, bare_array]
}

/// Composes the `MUST NOT` / `SHOULD PREFER` / `CAUTION` constraint blocks
/// described in §4.3 from a replan directive's blocked tools/targets plus
/// a memory-derived `Potentials` note.
pub fn constraint_block(constraints: &PlanningConstraints) -> String {
    let mut lines = Vec::new();
    if !constraints.blocked_tools.is_empty() {
        for tool in &constraints.blocked_tools {
            lines.push(format!("MUST NOT: use tool {tool}"));
        }
    }
    if !constraints.blocked_targets.is_empty() {
        for target in &constraints.blocked_targets {
            lines.push(format!("MUST NOT: use this query/command/path again: {target}"));
        }
    }
    if let Some(note) = &constraints.memory_note {
        lines.push(format!("CAUTION: {note}"));
    }
    lines.join("\n")
}

/// Queries `QueryC` (SOPs) and `QueryMK` (decayed potentials) against the
/// intent-slug space and `env:local` entity, and renders them into a
/// `SHOULD PREFER` / `CAUTION` note for the prompt.
pub async fn memory_constraints(memory: &MemoryStore, intent: &str) -> String {
    let space = intent_slug(intent);
    let mut lines = Vec::new();

    match memory.query_c(&space, "env:local").await {
        Ok(sops) if !sops.is_empty() => {
            for sop in sops {
                let verb = if sop.sigma >= 0.0 { "SHOULD PREFER" } else { "CAUTION" };
                lines.push(format!("{verb}: {}", sop.content));
            }
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "planner: QueryC failed, continuing without SOPs"),
    }

    match memory.query_mk(&space, "env:local").await {
        Ok(potentials) => match potentials.action() {
            Action::Avoid => lines.push("CAUTION: past attempts at this kind of task trended negative".to_string()),
            Action::Exploit => lines.push("SHOULD PREFER: past attempts at this kind of task trended positive".to_string()),
            Action::Ignore | Action::Caution => {}
        },
        Err(err) => tracing::warn!(error = %err, "planner: QueryMK failed, continuing without potentials"),
    }

    lines.join("\n")
}

/// Builds the planning constraints for a `PlanDirective` (§4.3): blocked
/// tools for `break_symmetry`/`change_approach`, blocked targets for
/// `change_path`/`refine`.
pub fn constraints_from_directive(directive: &PlanDirective) -> PlanningConstraints {
    let blocked_tools = match directive.directive {
        Directive::BreakSymmetry | Directive::ChangeApproach => directive.blocked_tools.clone(),
        _ => Vec::new(),
    };
    let blocked_targets = match directive.directive {
        Directive::ChangePath | Directive::Refine => directive.blocked_targets.clone(),
        _ => Vec::new(),
    };
    PlanningConstraints {
        blocked_tools,
        blocked_targets,
        memory_note: None,
    }
}

/// Asks the model to decompose `spec` into a `Plan`, honouring `constraints`.
pub async fn plan(
    spec: &TaskSpec,
    constraints: &PlanningConstraints,
    model: &dyn ModelClient,
) -> Result<Plan, String> {
    let user_prompt = format!(
        "Intent: {}\nSuccess criteria:\n{}\nConstraints:\n{}",
        spec.intent,
        spec.success_criteria
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n"),
        constraint_block(constraints),
    );

    let completion = model
        .complete(SYSTEM_PROMPT, &user_prompt, &[])
        .await
        .map_err(|e| format!("planner model call failed: {e}"))?;

    let raw: RawPlan = strict_parse_with_wrappers(&completion.text, plan_wrappers())?;
    if raw.subtasks.is_empty() {
        return Err("plan contained zero subtasks".to_string());
    }

    let subtasks: Vec<SubTask> = raw
        .subtasks
        .into_iter()
        .map(|s| SubTask {
            subtask_id: Uuid::new_v4(),
            parent_task_id: spec.task_id,
            intent: s.intent,
            success_criteria: s.success_criteria,
            context: String::new(),
            sequence: s.sequence.max(1),
        })
        .collect();

    let manifest = DispatchManifest {
        task_id: spec.task_id,
        subtask_ids: subtasks.iter().map(|s| s.subtask_id).collect(),
        task_criteria: if raw.task_criteria.is_empty() {
            spec.success_criteria.clone()
        } else {
            raw.task_criteria
        },
        dispatched_at: Utc::now(),
    };

    Ok(Plan { manifest, subtasks })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_block_composes_must_not_lines() {
        let constraints = PlanningConstraints {
            blocked_tools: vec!["shell".to_string()],
            blocked_targets: vec!["ls /tmp".to_string()],
            memory_note: Some("last run timed out".to_string()),
        };
        let block = constraint_block(&constraints);
        assert!(block.contains("MUST NOT: use tool shell"));
        assert!(block.contains("MUST NOT: use this query/command/path again: ls /tmp"));
        assert!(block.contains("CAUTION: last run timed out"));
    }

    #[test]
    fn constraints_from_directive_route_by_macro_state() {
        let mut directive = PlanDirective {
            task_id: Uuid::new_v4(),
            loss: Default::default(),
            prev_directive: None,
            directive: Directive::BreakSymmetry,
            blocked_tools: vec!["shell".to_string()],
            blocked_targets: vec!["ls /tmp".to_string()],
            failed_criterion: None,
            failure_class: None,
            rationale: String::new(),
        };
        let c = constraints_from_directive(&directive);
        assert_eq!(c.blocked_tools, vec!["shell".to_string()]);
        assert!(c.blocked_targets.is_empty());

        directive.directive = Directive::Refine;
        let c = constraints_from_directive(&directive);
        assert!(c.blocked_tools.is_empty());
        assert_eq!(c.blocked_targets, vec!["ls /tmp".to_string()]);
    }

    #[test]
    fn plan_wrapper_accepts_bare_subtask_array() {
        let raw = serde_json::json!([
            {"intent": "find file", "success_criteria": ["file exists"], "sequence": 1}
        ]);
        let parsed = bare_array_for_test(&raw);
        assert_eq!(parsed.subtasks.len(), 1);
    }

    fn bare_array_for_test(v: &Value) -> RawPlan {
        plan_wrappers()[2](v).unwrap()
    }
}
