//! Data model shared by every agsh crate: the message envelope, the
//! task/subtask/dispatch shapes, execution and validation results, the
//! GGS loss and directive types, and the memory (Megram) types.

pub mod audit;
pub mod error;
pub mod execution;
pub mod ggs;
pub mod memory;
pub mod message;
pub mod task;

pub use audit::{AuditQuery, AuditReport, CorrectionFailureTally};
pub use error::{TypesError, TypesResult};
pub use execution::{
    evidence_forces_environmental, CorrectionSignal, CriterionVerdict, ExecutionResult,
    ExecutionStatus, FailureClass, GapTrajectoryEntry, SubTaskOutcome, SubTaskStatus,
    ToolCallRecord, Verdict,
};
pub use ggs::{Directive, FinalResult, GradientLabel, Loss, OutcomeSummary, PlanDirective, ReplanRequest};
pub use memory::{intent_slug, Action, Megram, MegramLevel, Potentials, SopRecord};
pub use message::{allowed_paths, is_allowed_path, Message, MessageType, Role};
pub use task::{DispatchManifest, SubTask, TaskConstraints, TaskSpec, PRIOR_OUTPUTS_MARKER};
