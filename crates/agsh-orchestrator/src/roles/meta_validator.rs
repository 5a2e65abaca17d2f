//! R4b Meta-Validator (§4.4). Tracks one manifest per task; once every
//! expected `SubTaskOutcome` has arrived, asks the model to accept or
//! replan.

use std::collections::HashMap;

use agsh_providers::ModelClient;
use agsh_types::{DispatchManifest, OutcomeSummary, ReplanRequest, SubTaskOutcome, SubTaskStatus};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::parsing::strict_parse;

const SYSTEM_PROMPT: &str = "\
You are the aggregation step of an agentic pipeline. Given every subtask \
outcome for a task and the task-level success criteria, decide whether to \
accept the merged result or replan. Respond with exactly one JSON object, \
one of:
{\"verdict\": \"accept\", \"summary\": \"...\", \"merged_output\": \"...\"}
{\"verdict\": \"replan\", \"gap_summary\": \"...\", \"failed_subtasks\": [...]}";

/// Either outcome of one aggregation round.
pub enum AggregationVerdict {
    Accept(OutcomeSummary),
    Replan(ReplanRequest),
}

#[derive(Deserialize)]
struct RawVerdict {
    verdict: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    merged_output: String,
    #[serde(default)]
    gap_summary: String,
}

/// Per-task tracker: the manifest's expected count plus the outcomes
/// accumulated so far this round. Reset between rounds; a fresh
/// `DispatchManifest` overwrites `expected` (§4.4).
#[derive(Debug, Default)]
struct TaskTracker {
    expected: usize,
    first_plan_at: Option<chrono::DateTime<chrono::Utc>>,
    correction_count: u32,
    outcomes: Vec<SubTaskOutcome>,
}

#[derive(Default)]
pub struct MetaValidatorState {
    trackers: HashMap<Uuid, TaskTracker>,
}

impl MetaValidatorState {
    pub fn on_manifest(&mut self, manifest: &DispatchManifest) {
        let tracker = self.trackers.entry(manifest.task_id).or_default();
        tracker.expected = manifest.subtask_ids.len();
        tracker.outcomes.clear();
        if tracker.first_plan_at.is_none() {
            tracker.first_plan_at = Some(manifest.dispatched_at);
        }
    }

    pub fn record_correction(&mut self, task_id: Uuid) {
        if let Some(tracker) = self.trackers.get_mut(&task_id) {
            tracker.correction_count += 1;
        }
    }

    /// Buffers `outcome`; returns the complete set once the tracker's
    /// expected count is reached, or `None` if more are still outstanding.
    pub fn on_outcome(&mut self, outcome: SubTaskOutcome) -> Option<(Uuid, Vec<SubTaskOutcome>, u32, i64)> {
        let task_id = outcome.parent_task_id;
        let tracker = self.trackers.entry(task_id).or_default();
        tracker.outcomes.push(outcome);
        if tracker.expected > 0 && tracker.outcomes.len() >= tracker.expected {
            let elapsed_ms = tracker
                .first_plan_at
                .map(|t| (chrono::Utc::now() - t).num_milliseconds())
                .unwrap_or(0);
            let outcomes = std::mem::take(&mut tracker.outcomes);
            let correction_count = tracker.correction_count;
            Some((task_id, outcomes, correction_count, elapsed_ms))
        } else {
            None
        }
    }

    pub fn clear(&mut self, task_id: Uuid) {
        self.trackers.remove(&task_id);
    }
}

/// Asks the model to accept or replan given a complete set of outcomes.
/// A parse failure is *also* treated as `replan` (§4.4) — never silently
/// swallowed.
pub async fn aggregate(
    task_id: Uuid,
    outcomes: Vec<SubTaskOutcome>,
    task_criteria: &[String],
    correction_count: u32,
    elapsed_ms: i64,
    model: &dyn ModelClient,
) -> AggregationVerdict {
    let user_prompt = format!(
        "Task criteria:\n{}\nSubtask outcomes:\n{}",
        task_criteria.iter().map(|c| format!("- {c}")).collect::<Vec<_>>().join("\n"),
        outcomes
            .iter()
            .map(|o| format!("{}: {:?} - {}", o.subtask_id, o.status, o.output))
            .collect::<Vec<_>>()
            .join("\n"),
    );

    let parsed = match model.complete(SYSTEM_PROMPT, &user_prompt, &[]).await {
        Ok(completion) => parse_verdict(&completion.text),
        Err(err) => Err(format!("meta-validator model call failed: {err}")),
    };

    let failed_subtask_ids: Vec<Uuid> = outcomes
        .iter()
        .filter(|o| o.status == SubTaskStatus::Failed)
        .map(|o| o.subtask_id)
        .collect();

    match parsed {
        Ok(raw) if raw.verdict == "accept" => AggregationVerdict::Accept(OutcomeSummary {
            task_id,
            summary: raw.summary,
            merged_output: raw.merged_output,
            elapsed_ms: elapsed_ms.max(0) as u64,
            outcomes,
        }),
        Ok(raw) => AggregationVerdict::Replan(ReplanRequest {
            task_id,
            gap_summary: raw.gap_summary,
            failed_subtask_ids,
            correction_count,
            elapsed_ms: elapsed_ms.max(0) as u64,
            outcomes,
        }),
        Err(reason) => AggregationVerdict::Replan(ReplanRequest {
            task_id,
            gap_summary: format!("aggregation parse failure, treated as replan-worthy: {reason}"),
            failed_subtask_ids,
            correction_count,
            elapsed_ms: elapsed_ms.max(0) as u64,
            outcomes,
        }),
    }
}

fn parse_verdict(text: &str) -> Result<RawVerdict, String> {
    let value: Value = strict_parse(text)?;
    serde_json::from_value(value).map_err(|e| format!("aggregation verdict did not match schema: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsh_types::CriterionVerdict;
    use chrono::Utc;

    fn manifest(task_id: Uuid, n: usize) -> DispatchManifest {
        DispatchManifest {
            task_id,
            subtask_ids: (0..n).map(|_| Uuid::new_v4()).collect(),
            task_criteria: vec!["done".into()],
            dispatched_at: Utc::now(),
        }
    }

    fn outcome(parent: Uuid, status: SubTaskStatus) -> SubTaskOutcome {
        SubTaskOutcome {
            subtask_id: Uuid::new_v4(),
            parent_task_id: parent,
            status,
            output: "ok".into(),
            failure_reason: None,
            gap_trajectory: Vec::new(),
            criteria_verdicts: vec![CriterionVerdict {
                criterion: "done".into(),
                passed: status == SubTaskStatus::Matched,
                failure_class: None,
                evidence: String::new(),
            }],
            tool_calls: Vec::new(),
        }
    }

    #[test]
    fn completes_only_once_expected_count_reached() {
        let mut state = MetaValidatorState::default();
        let task_id = Uuid::new_v4();
        state.on_manifest(&manifest(task_id, 2));

        assert!(state.on_outcome(outcome(task_id, SubTaskStatus::Matched)).is_none());
        let complete = state.on_outcome(outcome(task_id, SubTaskStatus::Matched));
        assert!(complete.is_some());
        let (_, outcomes, _, _) = complete.unwrap();
        assert_eq!(outcomes.len(), 2);
    }

    #[test]
    fn fresh_manifest_overwrites_expected_count() {
        let mut state = MetaValidatorState::default();
        let task_id = Uuid::new_v4();
        state.on_manifest(&manifest(task_id, 3));
        state.on_outcome(outcome(task_id, SubTaskStatus::Matched));
        // replan round: fresh manifest with fewer subtasks
        state.on_manifest(&manifest(task_id, 1));
        let complete = state.on_outcome(outcome(task_id, SubTaskStatus::Matched));
        assert!(complete.is_some());
    }
}
