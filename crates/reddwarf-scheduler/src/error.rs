// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use crate::types::FailedPredicateMap;
use miette::Diagnostic;
use std::collections::BTreeMap;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// There are no nodes at all to schedule onto
    #[error("No nodes available to schedule pods")]
    #[diagnostic(
        code(scheduler::no_nodes_available),
        help("Register at least one node with the scheduler cache")
    )]
    NoNodesAvailable,

    /// Nodes exist, but none of them passed every predicate
    #[error("0/{num_all_nodes} nodes are available: {}.", reason_histogram(.failed_predicates))]
    #[diagnostic(
        code(scheduler::fit_error),
        help("Check node resources, taints, and pod requirements for pod {pod_name}")
    )]
    FitError {
        pod_name: String,
        num_all_nodes: usize,
        failed_predicates: FailedPredicateMap,
    },

    /// A predicate function failed to evaluate
    #[error("Predicate {predicate} failed on node {node_name}: {message}")]
    #[diagnostic(
        code(scheduler::predicate_failed),
        help("The predicate could not be evaluated; the scheduling attempt was aborted")
    )]
    PredicateFailed {
        predicate: String,
        node_name: String,
        message: String,
    },

    /// Several nodes reported predicate errors during one filtering pass
    #[error("{} errors occurred while filtering nodes: [{}]", .messages.len(), .messages.join(", "))]
    #[diagnostic(
        code(scheduler::predicate_errors),
        help("The scheduling attempt was aborted; no partial result was used")
    )]
    PredicateErrors { messages: Vec<String> },

    /// A priority function failed to evaluate
    #[error("Priority {priority} failed: {message}")]
    #[diagnostic(
        code(scheduler::priority_failed),
        help("The scheduling attempt was aborted; no partial scores were used")
    )]
    PriorityFailed { priority: String, message: String },

    /// An extender returned an error and is not ignorable
    #[error("Extender {extender} failed: {message}")]
    #[diagnostic(
        code(scheduler::extender_failed),
        help("Mark the extender as ignorable to skip it when it fails")
    )]
    ExtenderFailed { extender: String, message: String },

    /// Host selection was invoked without candidates
    #[error("Empty priority list")]
    #[diagnostic(
        code(scheduler::empty_priority_list),
        help("This is likely a bug. Host selection requires at least one scored node")
    )]
    EmptyPriorityList,

    /// The pod cannot be scheduled as specified
    #[error("Pod {pod_name} is invalid: {reason}")]
    #[diagnostic(
        code(scheduler::invalid_pod),
        help("Fix the pod's references before it can be scheduled")
    )]
    InvalidPod { pod_name: String, reason: String },

    /// A predicate or priority name is not registered
    #[error("Unknown {kind} '{name}'")]
    #[diagnostic(
        code(scheduler::unknown_algorithm),
        help("Use one of the registered names: {available}")
    )]
    UnknownAlgorithm {
        kind: String,
        name: String,
        available: String,
    },

    /// A scheduling policy could not be loaded
    #[error("Invalid scheduling policy: {message}")]
    #[diagnostic(
        code(scheduler::invalid_policy),
        help("Check the policy file syntax and values")
    )]
    InvalidPolicy { message: String },

    /// A node is missing from the scheduler cache
    #[error("Node {node_name} not found in scheduler cache")]
    #[diagnostic(
        code(scheduler::node_not_found),
        help("The node may have been deleted while the pod was being scheduled")
    )]
    NodeNotFound { node_name: String },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("This is an internal error")
    )]
    CoreError(#[from] reddwarf_core::ReddwarfError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError { message: String },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Render "<count> <reason>" entries, sorted, for a fit error message
fn reason_histogram(failed_predicates: &FailedPredicateMap) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for reasons in failed_predicates.values() {
        for reason in reasons {
            *counts.entry(reason.reason()).or_default() += 1;
        }
    }

    let mut entries: Vec<String> = counts
        .into_iter()
        .map(|(reason, count)| format!("{} {}", count, reason))
        .collect();
    entries.sort();
    entries.join(", ")
}

impl SchedulerError {
    /// Create a FitError
    pub fn fit_error(
        pod_name: impl Into<String>,
        num_all_nodes: usize,
        failed_predicates: FailedPredicateMap,
    ) -> Self {
        Self::FitError {
            pod_name: pod_name.into(),
            num_all_nodes,
            failed_predicates,
        }
    }

    /// Create a PredicateFailed error
    pub fn predicate_failed(
        predicate: impl Into<String>,
        node_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::PredicateFailed {
            predicate: predicate.into(),
            node_name: node_name.into(),
            message: message.into(),
        }
    }

    /// Create a PriorityFailed error
    pub fn priority_failed(priority: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PriorityFailed {
            priority: priority.into(),
            message: message.into(),
        }
    }

    /// Create an ExtenderFailed error
    pub fn extender_failed(extender: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtenderFailed {
            extender: extender.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidPod error
    pub fn invalid_pod(pod_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPod {
            pod_name: pod_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnknownAlgorithm error
    pub fn unknown_algorithm(
        kind: impl Into<String>,
        name: impl Into<String>,
        available: &[&str],
    ) -> Self {
        Self::UnknownAlgorithm {
            kind: kind.into(),
            name: name.into(),
            available: available.join(", "),
        }
    }

    /// Create an InvalidPolicy error
    pub fn invalid_policy(message: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            message: message.into(),
        }
    }

    /// Create a NodeNotFound error
    pub fn node_not_found(node_name: impl Into<String>) -> Self {
        Self::NodeNotFound {
            node_name: node_name.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether this error means "no node fits", the trigger for preemption
    pub fn is_fit_error(&self) -> bool {
        matches!(self, Self::FitError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PredicateFailureReason;

    #[test]
    fn test_fit_error_message() {
        let mut failed = FailedPredicateMap::new();
        failed.insert(
            "node1".to_string(),
            vec![PredicateFailureReason::NodeSelectorNotMatch],
        );
        failed.insert(
            "node2".to_string(),
            vec![PredicateFailureReason::insufficient("cpu", 2000, 0, 1000)],
        );
        failed.insert(
            "node3".to_string(),
            vec![PredicateFailureReason::NodeSelectorNotMatch],
        );

        let err = SchedulerError::fit_error("default/web", 3, failed);
        assert!(err.is_fit_error());
        assert_eq!(
            err.to_string(),
            "0/3 nodes are available: 1 Insufficient cpu, 2 node(s) didn't match node selector."
        );
    }

    #[test]
    fn test_aggregate_message() {
        let err = SchedulerError::PredicateErrors {
            messages: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "2 errors occurred while filtering nodes: [a, b]");
        assert!(!err.is_fit_error());
    }
}
