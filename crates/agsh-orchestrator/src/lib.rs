//! Subtask dispatcher, role tasks, the GGS controller, and the runtime
//! wiring that turns them into one running agentic pipeline (§4, §5).

pub mod audit_log;
pub mod dispatcher;
pub mod error;
pub mod ggs;
pub mod parsing;
pub mod roles;
pub mod runtime;
pub mod task_log;

pub use audit_log::{AuditEvent, AuditLog};
pub use dispatcher::{Dispatcher, DispatcherDeps};
pub use error::{OrchestratorError, OrchestratorResult};
pub use ggs::GgsStateTable;
pub use runtime::{Runtime, RuntimeConfig};
pub use task_log::{TaskLogEvent, TaskLogRegistry};
