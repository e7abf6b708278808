use crate::{Result, SchedulerError};
use k8s_openapi::api::core::v1::Taint;
use reddwarf_core::{
    node_allocatable, pod_full_name, pod_host_ports, pod_non_zero_request, pod_resource_request,
    Node, Pod, ResourceQuantities,
};
use std::sync::atomic::{AtomicU64, Ordering};

static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Draw the next value of the process-wide generation counter
fn next_generation() -> u64 {
    GENERATION.fetch_add(1, Ordering::SeqCst) + 1
}

/// A node together with the pods assigned to it.
///
/// This is the unit predicates and priorities evaluate. Every mutation bumps
/// `generation`, which lets the authoritative cache tell whether a snapshot
/// still matches what it holds. Cloning keeps the generation, so a clone is
/// fresh until it is mutated.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    node: Option<Node>,
    pods: Vec<Pod>,
    requested: ResourceQuantities,
    non_zero_requested: ResourceQuantities,
    allocatable: ResourceQuantities,
    taints: Vec<Taint>,
    generation: u64,
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            node: None,
            pods: Vec::new(),
            requested: ResourceQuantities::default(),
            non_zero_requested: ResourceQuantities::default(),
            allocatable: ResourceQuantities::default(),
            taints: Vec::new(),
            generation: next_generation(),
        }
    }
}

impl NodeInfo {
    /// Create a node info holding the given pods and no node
    pub fn new(pods: impl IntoIterator<Item = Pod>) -> Self {
        let mut info = Self::default();
        for pod in pods {
            info.add_pod(pod);
        }
        info
    }

    /// Create a node info for a node and its pods
    pub fn with_node(node: Node, pods: impl IntoIterator<Item = Pod>) -> Self {
        let mut info = Self::new(pods);
        info.set_node(node);
        info
    }

    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    /// Name of the node, if one is set
    pub fn node_name(&self) -> Option<&str> {
        self.node.as_ref().and_then(|n| n.metadata.name.as_deref())
    }

    pub fn pods(&self) -> &[Pod] {
        &self.pods
    }

    /// Sum of the requests of all pods on the node
    pub fn requested(&self) -> &ResourceQuantities {
        &self.requested
    }

    /// Sum of requests with per-container scoring defaults applied
    pub fn non_zero_requested(&self) -> &ResourceQuantities {
        &self.non_zero_requested
    }

    pub fn allocatable(&self) -> &ResourceQuantities {
        &self.allocatable
    }

    /// Maximum number of pods the node accepts. A node that does not
    /// advertise a pod capacity is unlimited.
    pub fn allowed_pod_number(&self) -> i64 {
        if self.allocatable.pods > 0 {
            self.allocatable.pods
        } else {
            i64::MAX
        }
    }

    pub fn taints(&self) -> &[Taint] {
        &self.taints
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Host ports in use on the node as `(ip, protocol, port)`
    pub fn used_ports(&self) -> Vec<(String, String, i32)> {
        self.pods.iter().flat_map(pod_host_ports).collect()
    }

    /// Set (or replace) the node object
    pub fn set_node(&mut self, node: Node) {
        self.allocatable = node_allocatable(&node);
        self.taints = node
            .spec
            .as_ref()
            .and_then(|s| s.taints.clone())
            .unwrap_or_default();
        self.node = Some(node);
        self.generation = next_generation();
    }

    /// Drop the node object, keeping its pods
    pub fn remove_node(&mut self) {
        self.node = None;
        self.allocatable = ResourceQuantities::default();
        self.taints.clear();
        self.generation = next_generation();
    }

    /// Account a pod to this node
    pub fn add_pod(&mut self, pod: Pod) {
        let mut request = pod_resource_request(&pod);
        request.pods = 1;
        let mut non_zero = pod_non_zero_request(&pod);
        non_zero.pods = 1;

        self.requested.add(&request);
        self.non_zero_requested.add(&non_zero);
        self.pods.push(pod);
        self.generation = next_generation();
    }

    /// Remove a pod from this node, matched by `namespace/name`
    pub fn remove_pod(&mut self, pod: &Pod) -> Result<()> {
        let key = pod_full_name(pod);
        let index = self
            .pods
            .iter()
            .position(|p| pod_full_name(p) == key)
            .ok_or_else(|| {
                SchedulerError::internal_error(format!(
                    "no corresponding pod {} in pods of node {}",
                    key,
                    self.node_name().unwrap_or("<none>")
                ))
            })?;

        let removed = self.pods.swap_remove(index);
        let mut request = pod_resource_request(&removed);
        request.pods = 1;
        let mut non_zero = pod_non_zero_request(&removed);
        non_zero.pods = 1;

        self.requested.sub(&request);
        self.non_zero_requested.sub(&non_zero);
        self.generation = next_generation();
        Ok(())
    }
}
