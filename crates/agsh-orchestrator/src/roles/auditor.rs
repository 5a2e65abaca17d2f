//! R6 Auditor (§4.7). Taps every message on the bus independently of the
//! subscriber set: flags boundary violations against the allowed-paths
//! table, tracks GGS thrashing and per-class failure counts, persists a
//! JSONL trail, and answers `AuditQuery` with an aggregated `AuditReport`.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use agsh_types::{
    AuditReport, CorrectionFailureTally, CorrectionSignal, ExecutionResult, ExecutionStatus,
    FailureClass, Message, MessageType, PlanDirective, Role,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit_log::{AuditEvent, AuditLog};

#[derive(Debug, Default)]
struct ThrashTracker {
    last_d: Option<f64>,
    consecutive_no_decrease: u32,
}

/// Accumulated view the auditor hands back on `AuditQuery` or emits
/// periodically, independent of any one task.
#[derive(Debug, Default)]
struct AuditorState {
    boundary_violations: u64,
    executor_failure_count: u64,
    correction_tally: CorrectionFailureTally,
    thrash_trackers: HashMap<Uuid, ThrashTracker>,
    thrashing_tasks: HashSet<Uuid>,
}

impl AuditorState {
    fn report(&self) -> AuditReport {
        AuditReport {
            boundary_violations: self.boundary_violations,
            ggs_thrashing_tasks: self.thrashing_tasks.iter().copied().collect(),
            executor_failure_count: self.executor_failure_count,
            correction_failure_classes: self.correction_tally.clone(),
        }
    }

    /// §4.7: two consecutive `break_symmetry` decisions without a D
    /// decrease flags `ggs_thrashing` for that task.
    fn observe_plan_directive(&mut self, directive: &PlanDirective) {
        if directive.directive != agsh_types::Directive::BreakSymmetry {
            self.thrash_trackers.remove(&directive.task_id);
            return;
        }
        let tracker = self.thrash_trackers.entry(directive.task_id).or_default();
        let d = directive.loss.d;
        let no_decrease = tracker.last_d.map(|prev| d >= prev).unwrap_or(false);
        if no_decrease {
            tracker.consecutive_no_decrease += 1;
        } else {
            tracker.consecutive_no_decrease = 0;
        }
        tracker.last_d = Some(d);
        if tracker.consecutive_no_decrease >= 2 {
            self.thrashing_tasks.insert(directive.task_id);
        }
    }

    fn observe_execution_result(&mut self, result: &ExecutionResult) {
        if result.status == ExecutionStatus::Failed {
            self.executor_failure_count += 1;
        }
    }

    fn observe_correction_signal(&mut self, signal: &CorrectionSignal) {
        match signal.failure_class {
            FailureClass::Logical => self.correction_tally.logical += 1,
            FailureClass::Environmental => self.correction_tally.environmental += 1,
        }
    }
}

/// Tap loop: runs until `cancel` fires, persisting one `AuditEvent` per
/// boundary violation and tracking the running tallies, periodically
/// publishing an `AuditReport` and answering on-demand `AuditQuery`s.
pub async fn run(bus: agsh_bus::Bus, audit_log: AuditLog, report_interval: Duration, cancel: CancellationToken) {
    let mut tap = bus.new_tap();
    let mut ticker = tokio::time::interval(report_interval);
    let mut state = AuditorState::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                publish_report(&bus, &state);
            }
            maybe_message = tap.recv() => {
                match maybe_message {
                    Some(message) => handle_message(&bus, &audit_log, &mut state, message).await,
                    None => break,
                }
            }
        }
    }
}

async fn handle_message(bus: &agsh_bus::Bus, audit_log: &AuditLog, state: &mut AuditorState, message: Message) {
    if !message.is_on_allowed_path() {
        state.boundary_violations += 1;
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            timestamp: message.timestamp,
            from: message.from,
            to: message.to,
            message_type: message.message_type,
            anomaly: Some("boundary_violation".to_string()),
            detail: message.payload.clone(),
        };
        if let Err(err) = audit_log.append(&event).await {
            tracing::warn!(error = %err, "auditor: failed to persist boundary_violation event");
        }
    }

    match message.message_type {
        MessageType::PlanDirective => {
            if let Ok(directive) = message.payload_as::<PlanDirective>() {
                state.observe_plan_directive(&directive);
                if state.thrashing_tasks.contains(&directive.task_id) {
                    record_thrashing(audit_log, &message, directive.task_id).await;
                }
            }
        }
        MessageType::ExecutionResult => {
            if let Ok(result) = message.payload_as::<ExecutionResult>() {
                state.observe_execution_result(&result);
            }
        }
        MessageType::CorrectionSignal => {
            if let Ok(signal) = message.payload_as::<CorrectionSignal>() {
                state.observe_correction_signal(&signal);
            }
        }
        MessageType::AuditQuery if message.to == Role::Auditor => {
            publish_report(bus, state);
        }
        _ => {}
    }
}

async fn record_thrashing(audit_log: &AuditLog, message: &Message, task_id: Uuid) {
    let event = AuditEvent {
        event_id: Uuid::new_v4(),
        timestamp: message.timestamp,
        from: message.from,
        to: message.to,
        message_type: message.message_type,
        anomaly: Some("ggs_thrashing".to_string()),
        detail: serde_json::json!({ "task_id": task_id }),
    };
    if let Err(err) = audit_log.append(&event).await {
        tracing::warn!(error = %err, "auditor: failed to persist ggs_thrashing event");
    }
}

fn publish_report(bus: &agsh_bus::Bus, state: &AuditorState) {
    let report = state.report();
    match Message::new(Role::Auditor, Role::User, MessageType::AuditReport, &report) {
        Ok(message) => bus.publish(message),
        Err(err) => tracing::warn!(error = %err, "auditor: failed to build AuditReport message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsh_types::{Directive, Loss};

    fn directive(task_id: Uuid, d: f64) -> PlanDirective {
        PlanDirective {
            task_id,
            loss: Loss { d, p: 0.0, omega: 0.0, l: 0.0 },
            prev_directive: None,
            directive: Directive::BreakSymmetry,
            blocked_tools: vec![],
            blocked_targets: vec![],
            failed_criterion: None,
            failure_class: None,
            rationale: String::new(),
        }
    }

    #[test]
    fn flags_ggs_thrashing_after_two_non_decreasing_break_symmetry_rounds() {
        let mut state = AuditorState::default();
        let task_id = Uuid::new_v4();
        state.observe_plan_directive(&directive(task_id, 0.6)); // baseline, no prior to compare
        assert!(!state.thrashing_tasks.contains(&task_id));
        state.observe_plan_directive(&directive(task_id, 0.6)); // first non-decreasing transition
        assert!(!state.thrashing_tasks.contains(&task_id));
        state.observe_plan_directive(&directive(task_id, 0.6)); // second non-decreasing transition
        assert!(state.thrashing_tasks.contains(&task_id));
    }

    #[test]
    fn a_decreasing_d_resets_the_thrash_counter() {
        let mut state = AuditorState::default();
        let task_id = Uuid::new_v4();
        state.observe_plan_directive(&directive(task_id, 0.8));
        state.observe_plan_directive(&directive(task_id, 0.5)); // decrease, resets
        state.observe_plan_directive(&directive(task_id, 0.5)); // first no-decrease
        assert!(!state.thrashing_tasks.contains(&task_id));
        state.observe_plan_directive(&directive(task_id, 0.5)); // second no-decrease
        assert!(state.thrashing_tasks.contains(&task_id));
    }

    #[test]
    fn non_break_symmetry_directives_clear_the_tracker() {
        let mut state = AuditorState::default();
        let task_id = Uuid::new_v4();
        state.observe_plan_directive(&directive(task_id, 0.6));
        let mut refine = directive(task_id, 0.6);
        refine.directive = Directive::Refine;
        state.observe_plan_directive(&refine);
        assert!(!state.thrash_trackers.contains_key(&task_id));
    }

    #[test]
    fn correction_tally_splits_by_failure_class() {
        let mut state = AuditorState::default();
        state.observe_correction_signal(&CorrectionSignal {
            subtask_id: Uuid::new_v4(),
            attempt_number: 1,
            what_was_wrong: String::new(),
            what_to_do: String::new(),
            failure_class: FailureClass::Logical,
        });
        state.observe_correction_signal(&CorrectionSignal {
            subtask_id: Uuid::new_v4(),
            attempt_number: 1,
            what_was_wrong: String::new(),
            what_to_do: String::new(),
            failure_class: FailureClass::Environmental,
        });
        assert_eq!(state.correction_tally.logical, 1);
        assert_eq!(state.correction_tally.environmental, 1);
    }
}
