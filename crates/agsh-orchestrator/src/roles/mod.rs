//! One module per logical role (R1-R4b, R6, R7). R3/R4a are pure
//! function-call steps invoked directly by the dispatcher; R1/R2/R4b/R7
//! are invoked by the runtime wiring off bus subscriptions; R6 taps the
//! whole bus independently.

pub mod agent_validator;
pub mod auditor;
pub mod executor;
pub mod ggs_role;
pub mod meta_validator;
pub mod perceiver;
pub mod planner;
