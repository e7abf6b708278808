//! Builders shared by the unit tests

use crate::extender::SchedulerExtender;
use crate::types::{HostPriority, HostPriorityList, NodeToVictims};
use crate::{Result, SchedulerError};
use k8s_openapi::api::core::v1::{
    Container, NodeCondition, NodeSpec, NodeStatus, PodSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use reddwarf_core::{Node, Pod};
use std::collections::{BTreeMap, HashMap};

/// A ready node with the given allocatable cpu, memory and pod count
/// (a pod count of 0 leaves the pod capacity unset)
pub fn make_node(name: &str, cpu: &str, memory: &str, pods: i64) -> Node {
    let mut allocatable = BTreeMap::new();
    allocatable.insert("cpu".to_string(), Quantity(cpu.to_string()));
    allocatable.insert("memory".to_string(), Quantity(memory.to_string()));
    if pods > 0 {
        allocatable.insert("pods".to_string(), Quantity(pods.to_string()));
    }

    let mut node = Node::default();
    node.metadata.name = Some(name.to_string());
    node.spec = Some(NodeSpec::default());
    node.status = Some(NodeStatus {
        allocatable: Some(allocatable),
        conditions: Some(vec![NodeCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    node
}

/// A pod in the default namespace with one container requesting cpu and memory
pub fn make_pod(name: &str, cpu: &str, memory: &str, priority: i32) -> Pod {
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity(cpu.to_string()));
    requests.insert("memory".to_string(), Quantity(memory.to_string()));

    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some("default".to_string());
    pod.spec = Some(PodSpec {
        containers: vec![Container {
            name: "main".to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }],
        priority: Some(priority),
        ..Default::default()
    });
    pod
}

/// Bind a pod to a node
pub fn on_node(mut pod: Pod, node_name: &str) -> Pod {
    if let Some(spec) = pod.spec.as_mut() {
        spec.node_name = Some(node_name.to_string());
    }
    pod
}

/// Attach labels to a pod
pub fn with_labels(mut pod: Pod, labels: &[(&str, &str)]) -> Pod {
    pod.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    pod
}

/// Configurable in-process extender
#[derive(Default)]
pub struct FakeExtender {
    pub name: String,
    pub uninterested: bool,
    pub ignorable: bool,
    pub fail: bool,
    /// Nodes dropped by `filter`
    pub reject: Vec<String>,
    pub scores: HashMap<String, i64>,
    pub weight: i64,
    pub preemption: bool,
    /// Candidate nodes dropped by `process_preemption`
    pub drop_candidates: Vec<String>,
}

impl FakeExtender {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            weight: 1,
            ..Default::default()
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            return Err(SchedulerError::extender_failed(&self.name, "unavailable"));
        }
        Ok(())
    }
}

impl SchedulerExtender for FakeExtender {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_interested(&self, _pod: &Pod) -> bool {
        !self.uninterested
    }

    fn filter(&self, _pod: &Pod, nodes: Vec<Node>) -> Result<(Vec<Node>, HashMap<String, String>)> {
        self.check()?;
        let mut failed = HashMap::new();
        let mut kept = Vec::new();
        for node in nodes {
            let name = node.metadata.name.clone().unwrap_or_default();
            if self.reject.contains(&name) {
                failed.insert(name, format!("rejected by {}", self.name));
            } else {
                kept.push(node);
            }
        }
        Ok((kept, failed))
    }

    fn prioritize(&self, _pod: &Pod, nodes: &[Node]) -> Result<(HostPriorityList, i64)> {
        self.check()?;
        let scores = nodes
            .iter()
            .filter_map(|n| n.metadata.name.clone())
            .map(|name| {
                let score = self.scores.get(&name).copied().unwrap_or(0);
                HostPriority::new(name, score)
            })
            .collect();
        Ok((scores, self.weight))
    }

    fn supports_preemption(&self) -> bool {
        self.preemption
    }

    fn process_preemption(&self, _pod: &Pod, mut node_to_victims: NodeToVictims) -> Result<NodeToVictims> {
        self.check()?;
        for name in &self.drop_candidates {
            node_to_victims.remove(name);
        }
        Ok(node_to_victims)
    }

    fn is_ignorable(&self) -> bool {
        self.ignorable
    }
}
