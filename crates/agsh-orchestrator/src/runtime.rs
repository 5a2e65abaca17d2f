//! Wires every role into one running pipeline (§5): the planner and GGS
//! react to bus subscriptions, the dispatcher and agent-validator pair run
//! inside spawned per-subtask tasks, the auditor taps the whole bus, and
//! memory runs its own background sweeps. `Runtime::submit` is the single
//! entry point the CLI drives per user request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agsh_bus::{Bus, ExecutorConfig, GgsConfig, ValidatorConfig};
use agsh_memory::MemoryStore;
use agsh_providers::ModelClient;
use agsh_tools::ToolRegistry;
use agsh_types::{
    DispatchManifest, FinalResult, Message, MessageType, OutcomeSummary, PlanDirective,
    ReplanRequest, Role, SubTaskOutcome, TaskSpec,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit_log::AuditLog;
use crate::dispatcher::{Dispatcher, DispatcherDeps};
use crate::ggs::GgsStateTable;
use crate::roles::perceiver::ClarifyCallback;
use crate::roles::{auditor, ggs_role, meta_validator, planner};
use crate::task_log::{TaskLogEvent, TaskLogRegistry};

const AUDIT_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Everything one running pipeline needs, shared across every spawned role
/// task via `Arc<Runtime>`.
pub struct Runtime {
    bus: Bus,
    memory: Arc<MemoryStore>,
    model: Arc<dyn ModelClient>,
    tools: ToolRegistry,
    audit_log: AuditLog,
    task_log: TaskLogRegistry,
    dispatcher: Arc<Dispatcher>,
    ggs_config: GgsConfig,
    ggs_state: Mutex<GgsStateTable>,
    meta_state: Mutex<meta_validator::MetaValidatorState>,
    task_specs: Mutex<HashMap<Uuid, TaskSpec>>,
    manifest_criteria: Mutex<HashMap<Uuid, Vec<String>>>,
    subtask_owner: Mutex<HashMap<Uuid, Uuid>>,
}

pub struct RuntimeConfig {
    pub ggs: GgsConfig,
    pub executor: ExecutorConfig,
    pub validator: ValidatorConfig,
}

impl Runtime {
    pub fn new(
        memory: Arc<MemoryStore>,
        model: Arc<dyn ModelClient>,
        tools: ToolRegistry,
        audit_log: AuditLog,
        task_log: TaskLogRegistry,
        cfg: RuntimeConfig,
        root_cancel: &CancellationToken,
    ) -> Arc<Self> {
        let bus = Bus::new();
        let deps = DispatcherDeps {
            bus: bus.clone(),
            model: model.clone(),
            tools: tools.clone(),
            executor_cfg: cfg.executor,
            validator_cfg: cfg.validator,
        };
        let dispatcher = Dispatcher::new(deps, root_cancel.clone());

        Arc::new(Self {
            bus,
            memory,
            model,
            tools,
            audit_log,
            task_log,
            dispatcher,
            ggs_config: cfg.ggs,
            ggs_state: Mutex::new(GgsStateTable::default()),
            meta_state: Mutex::new(meta_validator::MetaValidatorState::default()),
            task_specs: Mutex::new(HashMap::new()),
            manifest_criteria: Mutex::new(HashMap::new()),
            subtask_owner: Mutex::new(HashMap::new()),
        })
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Spawns the planner, meta-validator, GGS, and auditor reaction loops.
    /// Memory's own background sweeps are spawned separately by the caller
    /// via `MemoryStore::spawn_background_sweeps`, since that task outlives
    /// any one `Runtime` in the REPL's `/brain` reset path.
    pub fn spawn_roles(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.clone().spawn_planner_loop(cancel.clone()),
            self.clone().spawn_meta_validator_loop(cancel.clone()),
            self.clone().spawn_ggs_loop(cancel.clone()),
            self.clone().spawn_task_log_tap(cancel.clone()),
            tokio::spawn(auditor::run(
                self.bus.clone(),
                self.audit_log.clone(),
                AUDIT_REPORT_INTERVAL,
                cancel,
            )),
        ]
    }

    /// Taps `ExecutionResult`/`CorrectionSignal` traffic — which only carry
    /// `subtask_id`, not `parent_task_id` — to record `tool_call` and
    /// `correction` task-log events under the owning task's file, using the
    /// `subtask_id -> task_id` map populated in `run_plan`.
    fn spawn_task_log_tap(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut exec_rx = self.bus.subscribe(MessageType::ExecutionResult);
        let mut correction_rx = self.bus.subscribe(MessageType::CorrectionSignal);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = exec_rx.recv() => {
                        match maybe {
                            Some(message) => self.on_execution_result_tap(message).await,
                            None => break,
                        }
                    }
                    maybe = correction_rx.recv() => {
                        match maybe {
                            Some(message) => self.on_correction_signal_tap(message).await,
                            None => break,
                        }
                    }
                }
            }
        })
    }

    async fn owner_of(&self, subtask_id: Uuid) -> Option<Uuid> {
        self.subtask_owner.lock().await.get(&subtask_id).copied()
    }

    async fn on_execution_result_tap(&self, message: Message) {
        let Ok(result) = message.payload_as::<agsh_types::ExecutionResult>() else {
            return;
        };
        let Some(task_id) = self.owner_of(result.subtask_id).await else {
            return;
        };
        for call in &result.tool_calls {
            self.task_log
                .log(
                    task_id,
                    TaskLogEvent::ToolCall,
                    serde_json::json!({"subtask_id": result.subtask_id, "tool": call.tool, "input": call.input}),
                )
                .await;
        }
        self.task_log
            .log(
                task_id,
                TaskLogEvent::LlmCall,
                serde_json::json!({"subtask_id": result.subtask_id, "status": result.status}),
            )
            .await;
    }

    async fn on_correction_signal_tap(&self, message: Message) {
        let Ok(signal) = message.payload_as::<agsh_types::CorrectionSignal>() else {
            return;
        };
        let Some(task_id) = self.owner_of(signal.subtask_id).await else {
            return;
        };
        self.task_log
            .log(
                task_id,
                TaskLogEvent::Correction,
                serde_json::json!({
                    "subtask_id": signal.subtask_id,
                    "attempt_number": signal.attempt_number,
                    "what_to_do": signal.what_to_do,
                }),
            )
            .await;
    }

    /// R1 entry point: perceives `raw_input` into a `TaskSpec`, publishes
    /// it, and waits for the matching terminal `FinalResult`.
    pub async fn submit(
        self: &Arc<Self>,
        raw_input: &str,
        history: &[String],
        clarify: &dyn ClarifyCallback,
    ) -> Result<FinalResult, String> {
        let spec = crate::roles::perceiver::perceive(raw_input, history, self.model.as_ref(), clarify).await?;
        let task_id = spec.task_id;

        let mut final_rx = self.bus.subscribe(MessageType::FinalResult);
        self.task_specs.lock().await.insert(task_id, spec.clone());
        self.publish(Role::Perceiver, Role::Planner, MessageType::TaskSpec, &spec);

        loop {
            match final_rx.recv().await {
                Some(message) => {
                    if let Ok(final_result) = message.payload_as::<FinalResult>() {
                        if final_result.task_id == task_id {
                            return Ok(final_result);
                        }
                    }
                }
                None => return Err("bus closed before a final result arrived".to_string()),
            }
        }
    }

    fn publish<T: serde::Serialize>(&self, from: Role, to: Role, message_type: MessageType, payload: &T) {
        match Message::new(from, to, message_type, payload) {
            Ok(message) => self.bus.publish(message),
            Err(err) => tracing::warn!(%message_type, error = %err, "runtime: failed to build message"),
        }
    }

    fn spawn_planner_loop(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut task_spec_rx = self.bus.subscribe(MessageType::TaskSpec);
        let mut plan_directive_rx = self.bus.subscribe(MessageType::PlanDirective);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = task_spec_rx.recv() => {
                        match maybe {
                            Some(message) => self.on_task_spec(message).await,
                            None => break,
                        }
                    }
                    maybe = plan_directive_rx.recv() => {
                        match maybe {
                            Some(message) => self.on_plan_directive(message).await,
                            None => break,
                        }
                    }
                }
            }
        })
    }

    async fn on_task_spec(self: &Arc<Self>, message: Message) {
        let Ok(spec) = message.payload_as::<TaskSpec>() else {
            tracing::warn!("planner: TaskSpec payload did not remarshal");
            return;
        };
        self.task_specs.lock().await.insert(spec.task_id, spec.clone());
        self.task_log
            .log(
                spec.task_id,
                TaskLogEvent::TaskBegin,
                serde_json::json!({"intent": spec.intent, "raw_input": spec.raw_input}),
            )
            .await;
        let memory_note = planner::memory_constraints(&self.memory, &spec.intent).await;
        let constraints = planner::PlanningConstraints {
            memory_note: (!memory_note.is_empty()).then_some(memory_note),
            ..Default::default()
        };
        self.run_plan(&spec, &constraints).await;
    }

    async fn on_plan_directive(self: &Arc<Self>, message: Message) {
        let Ok(directive) = message.payload_as::<PlanDirective>() else {
            tracing::warn!("planner: PlanDirective payload did not remarshal");
            return;
        };
        let spec = { self.task_specs.lock().await.get(&directive.task_id).cloned() };
        let Some(spec) = spec else {
            tracing::warn!(task_id = %directive.task_id, "planner: replan directive for unknown task, dropping");
            return;
        };
        let mut constraints = planner::constraints_from_directive(&directive);
        let memory_note = planner::memory_constraints(&self.memory, &spec.intent).await;
        if !memory_note.is_empty() {
            constraints.memory_note = Some(memory_note);
        }
        self.run_plan(&spec, &constraints).await;
    }

    async fn run_plan(self: &Arc<Self>, spec: &TaskSpec, constraints: &planner::PlanningConstraints) {
        if constraints.memory_note.is_some() {
            self.task_log
                .log(
                    spec.task_id,
                    TaskLogEvent::MemoryQuery,
                    serde_json::json!({"intent": spec.intent}),
                )
                .await;
        }
        match planner::plan(spec, constraints, self.model.as_ref()).await {
            Ok(plan) => {
                self.manifest_criteria
                    .lock()
                    .await
                    .insert(spec.task_id, plan.manifest.task_criteria.clone());
                self.meta_state.lock().await.on_manifest(&plan.manifest);
                self.dispatcher.on_manifest(spec.task_id, plan.subtasks.len()).await;
                self.publish(Role::Planner, Role::MetaValidator, MessageType::DispatchManifest, &plan.manifest);
                for subtask in plan.subtasks {
                    self.subtask_owner.lock().await.insert(subtask.subtask_id, spec.task_id);
                    self.task_log
                        .log(
                            spec.task_id,
                            TaskLogEvent::SubtaskBegin,
                            serde_json::json!({"subtask_id": subtask.subtask_id, "sequence": subtask.sequence}),
                        )
                        .await;
                    self.dispatcher.on_subtask(subtask.clone()).await;
                    self.publish(Role::Planner, Role::Executor, MessageType::SubTask, &subtask);
                }
            }
            Err(err) => tracing::warn!(task_id = %spec.task_id, error = %err, "planner: failed to produce a plan"),
        }
    }

    fn spawn_meta_validator_loop(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut outcome_rx = self.bus.subscribe(MessageType::SubTaskOutcome);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = outcome_rx.recv() => {
                        match maybe {
                            Some(message) => self.on_subtask_outcome(message).await,
                            None => break,
                        }
                    }
                }
            }
        })
    }

    async fn on_subtask_outcome(self: &Arc<Self>, message: Message) {
        let Ok(outcome) = message.payload_as::<SubTaskOutcome>() else {
            tracing::warn!("meta-validator: SubTaskOutcome payload did not remarshal");
            return;
        };
        for verdict in &outcome.criteria_verdicts {
            self.task_log
                .log(
                    outcome.parent_task_id,
                    TaskLogEvent::CriterionVerdict,
                    serde_json::json!({
                        "subtask_id": outcome.subtask_id,
                        "criterion": verdict.criterion,
                        "passed": verdict.passed,
                    }),
                )
                .await;
        }
        self.task_log
            .log(
                outcome.parent_task_id,
                TaskLogEvent::SubtaskEnd,
                serde_json::json!({"subtask_id": outcome.subtask_id, "status": outcome.status}),
            )
            .await;
        let complete = self.meta_state.lock().await.on_outcome(outcome);
        let Some((task_id, outcomes, correction_count, elapsed_ms)) = complete else {
            return;
        };
        let criteria = self.manifest_criteria.lock().await.get(&task_id).cloned().unwrap_or_default();
        let verdict =
            meta_validator::aggregate(task_id, outcomes, &criteria, correction_count, elapsed_ms, self.model.as_ref())
                .await;
        match verdict {
            meta_validator::AggregationVerdict::Accept(summary) => {
                self.publish(Role::MetaValidator, Role::Ggs, MessageType::OutcomeSummary, &summary);
            }
            meta_validator::AggregationVerdict::Replan(request) => {
                self.publish(Role::MetaValidator, Role::Ggs, MessageType::ReplanRequest, &request);
            }
        }
    }

    fn spawn_ggs_loop(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut replan_rx = self.bus.subscribe(MessageType::ReplanRequest);
        let mut accept_rx = self.bus.subscribe(MessageType::OutcomeSummary);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = replan_rx.recv() => {
                        match maybe {
                            Some(message) => self.on_replan_request(message).await,
                            None => break,
                        }
                    }
                    maybe = accept_rx.recv() => {
                        match maybe {
                            Some(message) => self.on_outcome_summary(message).await,
                            None => break,
                        }
                    }
                }
            }
        })
    }

    async fn intent_hint(&self, task_id: Uuid) -> String {
        self.task_specs
            .lock()
            .await
            .get(&task_id)
            .map(|s| s.intent.clone())
            .unwrap_or_default()
    }

    async fn forget_task(&self, task_id: Uuid) {
        self.task_specs.lock().await.remove(&task_id);
        self.manifest_criteria.lock().await.remove(&task_id);
        self.subtask_owner.lock().await.retain(|_, owner| *owner != task_id);
    }

    async fn on_replan_request(self: &Arc<Self>, message: Message) {
        let Ok(request) = message.payload_as::<ReplanRequest>() else {
            tracing::warn!("ggs: ReplanRequest payload did not remarshal");
            return;
        };
        self.task_log
            .log(
                request.task_id,
                TaskLogEvent::Replan,
                serde_json::json!({"gap_summary": request.gap_summary, "elapsed_ms": request.elapsed_ms}),
            )
            .await;
        let intent = self.intent_hint(request.task_id).await;
        let (outcome, megrams) = {
            let mut state = self.ggs_state.lock().await;
            ggs_role::decide_on_replan(&request, &intent, &mut state, &self.ggs_config)
        };
        for megram in &megrams {
            self.task_log
                .log(
                    request.task_id,
                    TaskLogEvent::MemoryWrite,
                    serde_json::json!({"space": megram.space, "entity": megram.entity, "f": megram.f, "sigma": megram.sigma}),
                )
                .await;
        }
        ggs_role::persist_megrams(&self.memory, &megrams).await;
        match outcome {
            ggs_role::GgsOutcome::Directive(directive) => {
                self.task_log
                    .log(
                        request.task_id,
                        TaskLogEvent::GgsDecision,
                        serde_json::json!({"directive": directive.directive, "loss": directive.loss}),
                    )
                    .await;
                self.task_log
                    .log(
                        request.task_id,
                        TaskLogEvent::PlanDirective,
                        serde_json::json!({"directive": directive.directive, "blocked_tools": directive.blocked_tools, "blocked_targets": directive.blocked_targets}),
                    )
                    .await;
                self.publish(Role::Ggs, Role::Planner, MessageType::PlanDirective, &directive);
            }
            ggs_role::GgsOutcome::Final(final_result) => {
                self.task_log
                    .log(
                        final_result.task_id,
                        TaskLogEvent::GgsDecision,
                        serde_json::json!({"directive": final_result.directive, "loss": final_result.loss}),
                    )
                    .await;
                self.task_log
                    .log(
                        final_result.task_id,
                        TaskLogEvent::TaskEnd,
                        serde_json::json!({"directive": final_result.directive, "replans": final_result.replans}),
                    )
                    .await;
                self.forget_task(final_result.task_id).await;
                self.publish(Role::Ggs, Role::User, MessageType::FinalResult, &final_result);
            }
        }
    }

    async fn on_outcome_summary(self: &Arc<Self>, message: Message) {
        let Ok(summary) = message.payload_as::<OutcomeSummary>() else {
            tracing::warn!("ggs: OutcomeSummary payload did not remarshal");
            return;
        };
        let intent = self.intent_hint(summary.task_id).await;
        let (final_result, megram) = {
            let mut state = self.ggs_state.lock().await;
            ggs_role::decide_on_accept(&summary, &intent, &mut state, &self.ggs_config)
        };
        self.task_log
            .log(
                summary.task_id,
                TaskLogEvent::MemoryWrite,
                serde_json::json!({"space": megram.space, "entity": megram.entity, "f": megram.f, "sigma": megram.sigma}),
            )
            .await;
        ggs_role::persist_megrams(&self.memory, &[megram]).await;
        self.task_log
            .log(
                summary.task_id,
                TaskLogEvent::GgsDecision,
                serde_json::json!({"directive": final_result.directive, "loss": final_result.loss}),
            )
            .await;
        self.task_log
            .log(
                summary.task_id,
                TaskLogEvent::TaskEnd,
                serde_json::json!({"directive": final_result.directive, "replans": final_result.replans}),
            )
            .await;
        self.forget_task(final_result.task_id).await;
        self.publish(Role::Ggs, Role::User, MessageType::FinalResult, &final_result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsh_providers::{Completion, ProviderResult, TokenUsage};
    use async_trait::async_trait;

    struct EchoModel;

    #[async_trait]
    impl ModelClient for EchoModel {
        async fn complete(&self, _s: &str, _u: &str, _c: &[String]) -> ProviderResult<Completion> {
            Ok(Completion {
                text: r#"{"intent": "t", "success_criteria": ["done"]}"#.to_string(),
                usage: TokenUsage::default(),
            })
        }
    }

    struct NeverAsked;

    #[async_trait]
    impl ClarifyCallback for NeverAsked {
        async fn ask(&self, _q: &str) -> String {
            panic!("should not be asked to clarify")
        }
    }

    #[tokio::test]
    async fn runtime_constructs_with_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryStore::open(&dir.path().join("megrams.sqlite")).await.unwrap();
        let model: Arc<dyn ModelClient> = Arc::new(EchoModel);
        let tools = ToolRegistry::new();
        let audit_log = AuditLog::new(dir.path().join("audit.jsonl"));
        let task_log = TaskLogRegistry::new(dir.path().join("tasks"));
        let cancel = CancellationToken::new();
        let runtime = Runtime::new(
            memory,
            model,
            tools,
            audit_log,
            task_log,
            RuntimeConfig {
                ggs: GgsConfig::default(),
                executor: ExecutorConfig::default(),
                validator: ValidatorConfig::default(),
            },
            &cancel,
        );
        assert_eq!(runtime.bus().tap_count(), 0);
    }
}
