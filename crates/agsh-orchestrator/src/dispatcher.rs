//! The subtask dispatcher (§4.2): buffers a `DispatchManifest`, launches
//! subtasks in sequence groups, forwards each group's outputs into the
//! next group's context, and cancels the whole task tree on abort.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use agsh_bus::{Bus, ExecutorConfig, ValidatorConfig};
use agsh_providers::ModelClient;
use agsh_tools::ToolRegistry;
use agsh_types::{
    CorrectionSignal, CriterionVerdict, ExecutionResult, GapTrajectoryEntry, Message, MessageType, Role,
    SubTask, SubTaskOutcome, SubTaskStatus, Verdict, PRIOR_OUTPUTS_MARKER,
};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::roles::agent_validator;
use crate::roles::executor;

/// Per-parent-task dispatcher state (§4.2): buffered subtasks by sequence,
/// the expected count, in-flight tracking, and the accumulated outputs of
/// completed groups.
struct TaskState {
    expected: usize,
    by_sequence: HashMap<u32, Vec<SubTask>>,
    launched_sequences: HashSet<u32>,
    in_flight: usize,
    current_sequence: Option<u32>,
    prior_outputs: Vec<String>,
    cancel: CancellationToken,
}

impl TaskState {
    fn new(root_cancel: &CancellationToken) -> Self {
        Self {
            expected: 0,
            by_sequence: HashMap::new(),
            launched_sequences: HashSet::new(),
            in_flight: 0,
            current_sequence: None,
            prior_outputs: Vec::new(),
            cancel: root_cancel.child_token(),
        }
    }

    fn total_buffered(&self) -> usize {
        self.by_sequence.values().map(Vec::len).sum()
    }

    fn next_sequence_to_launch(&self) -> Option<u32> {
        self.by_sequence
            .keys()
            .copied()
            .filter(|seq| !self.launched_sequences.contains(seq))
            .min()
    }
}

/// Dependencies each spawned executor+agent-validator pair needs.
pub struct DispatcherDeps {
    pub bus: Bus,
    pub model: Arc<dyn ModelClient>,
    pub tools: ToolRegistry,
    pub executor_cfg: ExecutorConfig,
    pub validator_cfg: ValidatorConfig,
}

/// Owns per-task dispatcher state behind one mutex per task (§5), and the
/// root cancellation token every per-task child token descends from.
pub struct Dispatcher {
    deps: Arc<DispatcherDeps>,
    tasks: Mutex<HashMap<Uuid, TaskState>>,
    root_cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(deps: DispatcherDeps, root_cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            deps: Arc::new(deps),
            tasks: Mutex::new(HashMap::new()),
            root_cancel,
        })
    }

    /// §4.2 step 1: record the expected subtask count for a freshly
    /// (re)planned task.
    pub async fn on_manifest(self: &Arc<Self>, task_id: Uuid, expected: usize) {
        let mut tasks = self.tasks.lock().await;
        let state = tasks.entry(task_id).or_insert_with(|| TaskState::new(&self.root_cancel));
        state.expected = expected;
        state.by_sequence.clear();
        state.launched_sequences.clear();
        state.current_sequence = None;
        state.prior_outputs.clear();
        drop(tasks);
        self.try_launch(task_id).await;
    }

    /// §4.2 step 2-3: buffer a subtask; launch its sequence group once
    /// every subtask in the manifest has arrived and no group is in flight.
    pub async fn on_subtask(self: &Arc<Self>, subtask: SubTask) {
        let task_id = subtask.parent_task_id;
        {
            let mut tasks = self.tasks.lock().await;
            let state = tasks.entry(task_id).or_insert_with(|| TaskState::new(&self.root_cancel));
            state.by_sequence.entry(subtask.sequence).or_default().push(subtask);
        }
        self.try_launch(task_id).await;
    }

    /// §4.2 step 7: cancel the sub-context; spawned pairs unblock and exit
    /// without publishing further messages.
    pub async fn abort(&self, task_id: Uuid) {
        let mut tasks = self.tasks.lock().await;
        if let Some(state) = tasks.remove(&task_id) {
            state.cancel.cancel();
        }
    }

    async fn try_launch(self: &Arc<Self>, task_id: Uuid) {
        let group = {
            let mut tasks = self.tasks.lock().await;
            let Some(state) = tasks.get_mut(&task_id) else {
                return;
            };
            if state.expected == 0 || state.total_buffered() < state.expected || state.in_flight > 0 {
                return;
            }
            let Some(seq) = state.next_sequence_to_launch() else {
                return;
            };
            state.launched_sequences.insert(seq);
            state.current_sequence = Some(seq);
            let mut group = state.by_sequence.get(&seq).cloned().unwrap_or_default();
            if !state.prior_outputs.is_empty() {
                for subtask in &mut group {
                    subtask.context = format!(
                        "{}\n{PRIOR_OUTPUTS_MARKER}\n{}",
                        subtask.context,
                        state.prior_outputs.join("\n---\n")
                    );
                }
            }
            state.in_flight = group.len();
            group
        };

        if group.is_empty() {
            return;
        }

        let cancel = {
            let tasks = self.tasks.lock().await;
            tasks.get(&task_id).map(|s| s.cancel.clone()).unwrap_or_default()
        };

        let mut join_set: JoinSet<SubTaskOutcome> = JoinSet::new();
        for subtask in group {
            let deps = self.deps.clone();
            let child_cancel = cancel.clone();
            join_set.spawn(async move { run_pair(subtask, deps, child_cancel).await });
        }

        let dispatcher = self.clone();
        tokio::spawn(async move {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(outcome) => dispatcher.on_group_member_done(task_id, outcome).await,
                    Err(err) => tracing::warn!(%task_id, error = %err, "dispatcher: executor/validator pair panicked"),
                }
            }
        });
    }

    async fn on_group_member_done(self: &Arc<Self>, task_id: Uuid, outcome: SubTaskOutcome) {
        let launch_next = {
            let mut tasks = self.tasks.lock().await;
            let Some(state) = tasks.get_mut(&task_id) else {
                return;
            };
            if state.cancel.is_cancelled() {
                return;
            }
            state.prior_outputs.push(outcome.output.clone());
            state.in_flight = state.in_flight.saturating_sub(1);
            state.in_flight == 0
        };
        if launch_next {
            self.try_launch(task_id).await;
        }
    }
}

/// One spawned executor+agent-validator pair (§4.2 step 3, §4.3). Loops
/// executor attempts through `CorrectionSignal`s until the validator
/// reaches a terminal verdict or the retry cap is exhausted, publishing
/// the full allowed-path message sequence along the way for audit
/// visibility.
async fn run_pair(subtask: SubTask, deps: Arc<DispatcherDeps>, cancel: CancellationToken) -> SubTaskOutcome {
    let exec_deps = executor::ExecutorDeps {
        model: deps.model.as_ref(),
        tools: &deps.tools,
        max_iterations: deps.executor_cfg.max_iterations,
    };

    let mut correction: Option<CorrectionSignal> = None;
    let mut attempt: u32 = 0;
    let mut gap_trajectory: Vec<GapTrajectoryEntry> = Vec::new();
    let mut prior_tool_calls: Vec<agsh_types::ToolCallRecord> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return SubTaskOutcome {
                subtask_id: subtask.subtask_id,
                parent_task_id: subtask.parent_task_id,
                status: SubTaskStatus::Failed,
                output: String::new(),
                failure_reason: Some("cancelled".to_string()),
                gap_trajectory,
                criteria_verdicts: Vec::new(),
                tool_calls: Vec::new(),
            };
        }

        attempt += 1;
        let result =
            executor::run_attempt(&subtask, correction.as_ref(), &prior_tool_calls, &exec_deps, &cancel)
                .await;
        prior_tool_calls = result.tool_calls.clone();
        publish(
            &deps.bus,
            Role::Executor,
            Role::AgentValidator,
            MessageType::ExecutionResult,
            &result,
        );

        let verdict = agent_validator::score(&subtask, &result, deps.model.as_ref()).await;
        gap_trajectory.push(GapTrajectoryEntry {
            attempt,
            score: verdict.score,
            unmet_criteria: verdict.unmet_criteria.clone(),
        });

        match verdict.verdict {
            Verdict::Matched => {
                let outcome =
                    terminal_outcome(&subtask, &result, verdict, gap_trajectory, SubTaskStatus::Matched);
                publish(
                    &deps.bus,
                    Role::AgentValidator,
                    Role::MetaValidator,
                    MessageType::SubTaskOutcome,
                    &outcome,
                );
                return outcome;
            }
            Verdict::Retry if attempt <= deps.validator_cfg.max_retries => {
                let failure_class = classify(&verdict.criteria_verdicts);
                let signal = CorrectionSignal {
                    subtask_id: subtask.subtask_id,
                    attempt_number: attempt,
                    what_was_wrong: verdict.what_was_wrong.clone(),
                    what_to_do: verdict.what_to_do.clone(),
                    failure_class,
                };
                publish(
                    &deps.bus,
                    Role::AgentValidator,
                    Role::Executor,
                    MessageType::CorrectionSignal,
                    &signal,
                );
                correction = Some(signal);
                continue;
            }
            _ => {
                let outcome =
                    terminal_outcome(&subtask, &result, verdict, gap_trajectory, SubTaskStatus::Failed);
                publish(
                    &deps.bus,
                    Role::AgentValidator,
                    Role::MetaValidator,
                    MessageType::SubTaskOutcome,
                    &outcome,
                );
                return outcome;
            }
        }
    }
}

fn classify(verdicts: &[CriterionVerdict]) -> agsh_types::FailureClass {
    verdicts
        .iter()
        .find_map(|v| v.failure_class)
        .unwrap_or(agsh_types::FailureClass::Logical)
}

fn terminal_outcome(
    subtask: &SubTask,
    result: &ExecutionResult,
    verdict: agent_validator::ValidatorVerdict,
    gap_trajectory: Vec<GapTrajectoryEntry>,
    status: SubTaskStatus,
) -> SubTaskOutcome {
    SubTaskOutcome {
        subtask_id: subtask.subtask_id,
        parent_task_id: subtask.parent_task_id,
        status,
        output: result.output.clone(),
        failure_reason: verdict.failure_reason,
        gap_trajectory,
        criteria_verdicts: verdict.criteria_verdicts,
        tool_calls: result.tool_calls.clone(),
    }
}

fn publish<T: serde::Serialize>(bus: &Bus, from: Role, to: Role, message_type: MessageType, payload: &T) {
    match Message::new(from, to, message_type, payload) {
        Ok(message) => bus.publish(message),
        Err(err) => tracing::warn!(%message_type, error = %err, "dispatcher: failed to build message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask(parent: Uuid, sequence: u32) -> SubTask {
        SubTask {
            subtask_id: Uuid::new_v4(),
            parent_task_id: parent,
            intent: "test".into(),
            success_criteria: vec![],
            context: String::new(),
            sequence,
        }
    }

    #[test]
    fn task_state_reports_next_unlaunched_sequence_in_order() {
        let root = CancellationToken::new();
        let mut state = TaskState::new(&root);
        let parent = Uuid::new_v4();
        state.by_sequence.insert(1, vec![subtask(parent, 1)]);
        state.by_sequence.insert(2, vec![subtask(parent, 2)]);
        assert_eq!(state.next_sequence_to_launch(), Some(1));
        state.launched_sequences.insert(1);
        assert_eq!(state.next_sequence_to_launch(), Some(2));
        state.launched_sequences.insert(2);
        assert_eq!(state.next_sequence_to_launch(), None);
    }

    #[test]
    fn total_buffered_sums_across_sequences() {
        let root = CancellationToken::new();
        let mut state = TaskState::new(&root);
        let parent = Uuid::new_v4();
        state.by_sequence.insert(1, vec![subtask(parent, 1), subtask(parent, 1)]);
        state.by_sequence.insert(2, vec![subtask(parent, 2)]);
        assert_eq!(state.total_buffered(), 3);
    }
}
