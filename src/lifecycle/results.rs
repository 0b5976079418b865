//! Typed per-node outcomes for batch lifecycle operations
//!
//! Batch operations (idle, activate, transfer) act on many nodes and succeed
//! or fail per node. Each node lands in exactly one outcome bucket; callers
//! inspect the report rather than parsing error strings.

use serde::{Deserialize, Serialize};

/// Outcome of one node within a batch operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeOutcome {
    Success,
    /// Idle requested on a node already idle
    AlreadyIdle,
    /// Activate requested on a node already active
    AlreadyActive,
    /// Node's software profile is locked against the operation
    Locked,
    /// Activate with no destination and no current software profile
    SoftwareProfileNotFound,
    /// Destination software profile is itself an idle profile
    InvalidDestination { software_profile: String },
    /// Destination profile not usable from the node's hardware profile
    ProfileMappingNotAllowed {
        hardware_profile: String,
        software_profile: String,
    },
    /// Transfer preconditions not met
    TransferNotValid { reason: String },
    /// Suspend refused and the hardware profile names no idle profile;
    /// the node was idled in place without a profile reassignment
    IdledWithoutProfile,
    /// Backend operation failed after validation passed
    Failed { reason: String },
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Success | NodeOutcome::IdledWithoutProfile)
    }
}

/// One node's entry in a [`BatchReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node: String,
    pub outcome: NodeOutcome,
}

/// Per-node results of a batch lifecycle operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<NodeResult>,
}

impl BatchReport {
    pub fn push(&mut self, node: impl Into<String>, outcome: NodeOutcome) {
        self.results.push(NodeResult { node: node.into(), outcome });
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.outcome.is_success())
            .map(|r| r.node.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&NodeResult> {
        self.results.iter().filter(|r| !r.outcome.is_success()).collect()
    }

    pub fn outcome_of(&self, node: &str) -> Option<&NodeOutcome> {
        self.results.iter().find(|r| r.node == node).map(|r| &r.outcome)
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_buckets() {
        let mut report = BatchReport::default();
        report.push("n1.cluster", NodeOutcome::Success);
        report.push("n2.cluster", NodeOutcome::AlreadyIdle);
        report.push("n3.cluster", NodeOutcome::IdledWithoutProfile);

        assert_eq!(report.succeeded(), vec!["n1.cluster", "n3.cluster"]);
        assert_eq!(report.failed().len(), 1);
        assert!(!report.all_succeeded());
        assert_eq!(report.outcome_of("n2.cluster"), Some(&NodeOutcome::AlreadyIdle));
    }
}
