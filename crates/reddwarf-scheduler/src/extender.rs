//! Out-of-process scheduling plugins

use crate::types::{HostPriorityList, NodeToVictims};
use crate::Result;
use reddwarf_core::{Node, Pod};
use std::collections::HashMap;

/// An external component that can filter and score nodes and take part in
/// preemption.
///
/// Calls are synchronous; an implementation talking to a remote process is
/// responsible for bounding its own latency.
pub trait SchedulerExtender: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Whether the extender wants to see this pod at all
    fn is_interested(&self, pod: &Pod) -> bool;

    /// Narrow down `nodes`. Returns the nodes that passed and a failure
    /// message for each node that was dropped.
    fn filter(&self, pod: &Pod, nodes: Vec<Node>) -> Result<(Vec<Node>, HashMap<String, String>)>;

    /// Score `nodes`. Returns the scores and the weight to apply to them.
    fn prioritize(&self, pod: &Pod, nodes: &[Node]) -> Result<(HostPriorityList, i64)>;

    /// Whether [`process_preemption`](Self::process_preemption) is implemented
    fn supports_preemption(&self) -> bool {
        false
    }

    /// Adjust the victims chosen for each candidate node
    fn process_preemption(&self, _pod: &Pod, node_to_victims: NodeToVictims) -> Result<NodeToVictims> {
        Ok(node_to_victims)
    }

    /// Whether errors from this extender may be skipped
    fn is_ignorable(&self) -> bool {
        false
    }
}
