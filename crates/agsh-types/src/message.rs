use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TypesError, TypesResult};

/// The eight logical roles plus the user, who sits outside the bus proper
/// but is the source/sink of `FinalResult` and `AuditQuery`/`AuditReport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Perceiver,
    Planner,
    Executor,
    AgentValidator,
    MetaValidator,
    Memory,
    Auditor,
    Ggs,
    User,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Role::Perceiver => "R1",
            Role::Planner => "R2",
            Role::Executor => "R3",
            Role::AgentValidator => "R4a",
            Role::MetaValidator => "R4b",
            Role::Memory => "R5",
            Role::Auditor => "R6",
            Role::Ggs => "R7",
            Role::User => "user",
        };
        write!(f, "{label}")
    }
}

/// Every type of datum that crosses the bus. Variant names match §6's
/// allowed-paths table exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskSpec,
    DispatchManifest,
    SubTask,
    ExecutionResult,
    CorrectionSignal,
    SubTaskOutcome,
    ReplanRequest,
    OutcomeSummary,
    PlanDirective,
    FinalResult,
    Megram,
    AuditQuery,
    AuditReport,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One entry in the allowed-paths table (§6). `AuditQuery`/`AuditReport`
/// flow both directions between the user and R6, so they are returned as
/// two separate table rows rather than modelled as a single pair.
pub fn allowed_paths(message_type: MessageType) -> &'static [(Role, Role)] {
    use MessageType::*;
    use Role::*;
    match message_type {
        TaskSpec => &[(Perceiver, Planner)],
        DispatchManifest => &[(Planner, MetaValidator)],
        SubTask => &[(Planner, Executor)],
        ExecutionResult => &[(Executor, AgentValidator)],
        CorrectionSignal => &[(AgentValidator, Executor)],
        SubTaskOutcome => &[(AgentValidator, MetaValidator)],
        ReplanRequest => &[(MetaValidator, Ggs)],
        OutcomeSummary => &[(MetaValidator, Ggs)],
        PlanDirective => &[(Ggs, Planner)],
        FinalResult => &[(Ggs, User)],
        Megram => &[(Ggs, Memory)],
        AuditQuery => &[(User, Auditor)],
        AuditReport => &[(Auditor, User)],
    }
}

/// Is `(from, to)` a legal path for a message of type `message_type`?
pub fn is_allowed_path(message_type: MessageType, from: Role, to: Role) -> bool {
    allowed_paths(message_type)
        .iter()
        .any(|(f, t)| *f == from && *t == to)
}

/// Every inter-role datum is exactly one `Message`. The payload is opaque
/// JSON; roles remarshal it into their expected shape via [`Message::payload_as`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub from: Role,
    pub to: Role,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new<T: Serialize>(
        from: Role,
        to: Role,
        message_type: MessageType,
        payload: &T,
    ) -> TypesResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            from,
            to,
            message_type,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Remarshal the opaque payload into `T`. A mismatch is never a panic
    /// — it degrades to a boundary-violation-worthy error that the caller
    /// (normally the auditor) records, per §9.
    pub fn payload_as<T: DeserializeOwned>(&self) -> TypesResult<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| TypesError::Remarshal(format!("{} payload: {e}", self.message_type)))
    }

    pub fn is_on_allowed_path(&self) -> bool {
        is_allowed_path(self.message_type, self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_path_matches_spec_table() {
        assert!(is_allowed_path(
            MessageType::TaskSpec,
            Role::Perceiver,
            Role::Planner
        ));
        assert!(!is_allowed_path(
            MessageType::TaskSpec,
            Role::Planner,
            Role::Perceiver
        ));
    }

    #[test]
    fn final_result_is_ggs_to_user_only() {
        assert_eq!(allowed_paths(MessageType::FinalResult), &[(Role::Ggs, Role::User)]);
    }

    #[test]
    fn payload_remarshal_roundtrips() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Dummy {
            a: i32,
        }
        let msg = Message::new(
            Role::Perceiver,
            Role::Planner,
            MessageType::TaskSpec,
            &Dummy { a: 7 },
        )
        .unwrap();
        let back: Dummy = msg.payload_as().unwrap();
        assert_eq!(back, Dummy { a: 7 });
    }

    #[test]
    fn payload_remarshal_mismatch_is_an_error_not_a_panic() {
        #[derive(Serialize, Deserialize)]
        struct A {
            a: i32,
        }
        #[derive(Serialize, Deserialize)]
        struct B {
            totally_different_field: String,
        }
        let msg = Message::new(Role::Perceiver, Role::Planner, MessageType::TaskSpec, &A { a: 1 })
            .unwrap();
        let result: TypesResult<B> = msg.payload_as();
        assert!(result.is_err());
    }
}
