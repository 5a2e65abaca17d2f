use serde::{Deserialize, Serialize};

/// user -> R6: ask for the current aggregated view (§4.7, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    /// `None` asks for the whole-session view.
    pub task_id: Option<uuid::Uuid>,
}

/// R6 -> user. Also emitted periodically on the bus unprompted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub boundary_violations: u64,
    pub ggs_thrashing_tasks: Vec<uuid::Uuid>,
    pub executor_failure_count: u64,
    pub correction_failure_classes: CorrectionFailureTally,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrectionFailureTally {
    pub logical: u64,
    pub environmental: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_report_is_empty() {
        let report = AuditReport::default();
        assert_eq!(report.boundary_violations, 0);
        assert!(report.ggs_thrashing_tasks.is_empty());
    }
}
