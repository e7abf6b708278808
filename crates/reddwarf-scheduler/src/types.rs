use reddwarf_core::Pod;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Why a node failed a predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum PredicateFailureReason {
    NodeSelectorNotMatch,
    PodNotMatchHostName,
    TaintsTolerationsNotMatch,
    NodeLabelPresenceViolated,
    NodeNotReady,
    NodeNetworkUnavailable,
    NodeUnschedulable,
    NodeUnknownCondition,
    VolumeZoneConflict,
    VolumeNodeConflict,
    VolumeBindConflict,
    PodNotFitsHostPorts,
    DiskConflict,
    MaxVolumeCountExceeded,
    PodAffinityNotMatch,
    NodeUnderMemoryPressure,
    NodeUnderDiskPressure,
    /// The node does not have enough of a resource left
    InsufficientResource {
        resource: String,
        requested: i64,
        used: i64,
        capacity: i64,
    },
    /// Free-form reason, e.g. reported by an extender
    Custom(String),
}

impl PredicateFailureReason {
    pub fn insufficient(resource: impl Into<String>, requested: i64, used: i64, capacity: i64) -> Self {
        Self::InsufficientResource {
            resource: resource.into(),
            requested,
            used,
            capacity,
        }
    }

    /// Human readable reason, aggregated in fit error messages
    pub fn reason(&self) -> String {
        let text = match self {
            Self::NodeSelectorNotMatch => "node(s) didn't match node selector",
            Self::PodNotMatchHostName => "node(s) didn't match the requested hostname",
            Self::TaintsTolerationsNotMatch => "node(s) had taints that the pod didn't tolerate",
            Self::NodeLabelPresenceViolated => "node(s) didn't have the requested labels",
            Self::NodeNotReady => "node(s) were not ready",
            Self::NodeNetworkUnavailable => "node(s) had unavailable network",
            Self::NodeUnschedulable => "node(s) were unschedulable",
            Self::NodeUnknownCondition => "node(s) had unknown conditions",
            Self::VolumeZoneConflict => "node(s) had no available volume zone",
            Self::VolumeNodeConflict => "node(s) had volume node affinity conflict",
            Self::VolumeBindConflict => "node(s) didn't find available persistent volumes to bind",
            Self::PodNotFitsHostPorts => "node(s) didn't have free ports for the requested pod ports",
            Self::DiskConflict => "node(s) had no available disk",
            Self::MaxVolumeCountExceeded => "node(s) exceed max volume count",
            Self::PodAffinityNotMatch => "node(s) didn't match pod affinity/anti-affinity",
            Self::NodeUnderMemoryPressure => "node(s) had memory pressure",
            Self::NodeUnderDiskPressure => "node(s) had disk pressure",
            Self::InsufficientResource { resource, .. } => return format!("Insufficient {}", resource),
            Self::Custom(message) => return message.clone(),
        };
        text.to_string()
    }

    /// Whether evicting pods from the node could make this reason go away
    pub fn resolvable_by_preemption(&self) -> bool {
        !matches!(
            self,
            Self::NodeSelectorNotMatch
                | Self::PodNotMatchHostName
                | Self::TaintsTolerationsNotMatch
                | Self::NodeLabelPresenceViolated
                | Self::NodeNotReady
                | Self::NodeNetworkUnavailable
                | Self::NodeUnschedulable
                | Self::NodeUnknownCondition
                | Self::VolumeZoneConflict
                | Self::VolumeNodeConflict
                | Self::VolumeBindConflict
        )
    }
}

impl fmt::Display for PredicateFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Outcome of evaluating one predicate against one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateResult {
    /// Whether the node passed
    pub fit: bool,
    /// Reasons for failure (empty when the node passed)
    pub reasons: Vec<PredicateFailureReason>,
}

impl PredicateResult {
    /// Create a passing result
    pub fn fit() -> Self {
        Self {
            fit: true,
            reasons: Vec::new(),
        }
    }

    /// Create a failing result with a single reason
    pub fn fail(reason: PredicateFailureReason) -> Self {
        Self {
            fit: false,
            reasons: vec![reason],
        }
    }

    /// Create a result from accumulated reasons; passes when there are none
    pub fn from_reasons(reasons: Vec<PredicateFailureReason>) -> Self {
        Self {
            fit: reasons.is_empty(),
            reasons,
        }
    }
}

/// Predicate failure reasons per node name
pub type FailedPredicateMap = HashMap<String, Vec<PredicateFailureReason>>;

/// Score of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostPriority {
    /// Node name
    pub host: String,
    /// Score, higher is better
    pub score: i64,
}

impl HostPriority {
    /// Create a new host priority
    pub fn new(host: impl Into<String>, score: i64) -> Self {
        Self {
            host: host.into(),
            score,
        }
    }
}

/// Scores for a set of nodes
pub type HostPriorityList = Vec<HostPriority>;

/// Pods to evict from one node for a preemptor to fit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Victims {
    /// Pods to evict, highest priority first
    pub pods: Vec<Pod>,
    /// How many of `pods` are protected by an exhausted disruption budget
    pub num_pdb_violations: usize,
}

/// Victims per candidate node, iterated in node name order
pub type NodeToVictims = BTreeMap<String, Victims>;

/// Result of a preemption attempt
#[derive(Debug, Clone, Default)]
pub struct PreemptionResult {
    /// Node on which the preemptor should be nominated
    pub node: Option<reddwarf_core::Node>,
    /// Pods to evict from that node
    pub victims: Vec<Pod>,
    /// Pods whose nominated node should be cleared
    pub nominated_pods_to_clear: Vec<Pod>,
}
