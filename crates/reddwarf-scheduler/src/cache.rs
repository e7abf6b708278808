use crate::equivalence::EquivalenceCache;
use crate::listers::{NodeLister, SchedulerCache};
use crate::node_info::NodeInfo;
use crate::{Result, SchedulerError};
use parking_lot::RwLock;
use reddwarf_core::{pod_full_name, pod_node_name, Node, Pod};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Authoritative view of nodes and the pods assigned to them.
///
/// When an equivalence cache is attached, every mutation invalidates the
/// cached predicate results it can affect.
#[derive(Default)]
pub struct NodeCache {
    nodes: RwLock<HashMap<String, NodeInfo>>,
    equivalence_cache: Option<Arc<EquivalenceCache>>,
}

fn node_name(node: &Node) -> Result<String> {
    node.metadata
        .name
        .clone()
        .ok_or_else(|| SchedulerError::internal_error("node has no name"))
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an equivalence cache to keep in sync
    pub fn with_equivalence_cache(mut self, cache: Arc<EquivalenceCache>) -> Self {
        self.equivalence_cache = Some(cache);
        self
    }

    /// Add a node, or replace the node object of a known one
    pub fn add_node(&self, node: Node) -> Result<()> {
        let name = node_name(&node)?;
        self.nodes
            .write()
            .entry(name.clone())
            .or_default()
            .set_node(node);

        if let Some(ecache) = &self.equivalence_cache {
            ecache.invalidate_node(&name);
        }
        info!("Added node {} to scheduler cache", name);
        Ok(())
    }

    /// Replace the node object of a node
    pub fn update_node(&self, node: Node) -> Result<()> {
        let name = node_name(&node)?;
        {
            let mut nodes = self.nodes.write();
            let info = nodes
                .get_mut(&name)
                .ok_or_else(|| SchedulerError::node_not_found(&name))?;
            info.set_node(node);
        }

        if let Some(ecache) = &self.equivalence_cache {
            ecache.invalidate_node(&name);
        }
        debug!("Updated node {} in scheduler cache", name);
        Ok(())
    }

    /// Remove a node. Pods still assigned to it are kept until they are
    /// removed themselves.
    pub fn remove_node(&self, name: &str) -> Result<()> {
        {
            let mut nodes = self.nodes.write();
            let info = nodes
                .get_mut(name)
                .ok_or_else(|| SchedulerError::node_not_found(name))?;
            if info.pods().is_empty() {
                nodes.remove(name);
            } else {
                info.remove_node();
            }
        }

        if let Some(ecache) = &self.equivalence_cache {
            ecache.invalidate_node(name);
        }
        info!("Removed node {} from scheduler cache", name);
        Ok(())
    }

    /// Account a pod to the node named in its `spec.nodeName`
    pub fn add_pod(&self, pod: Pod) -> Result<()> {
        let node_name = pod_node_name(&pod)
            .ok_or_else(|| SchedulerError::invalid_pod(pod_full_name(&pod), "pod is not assigned to a node"))?
            .to_string();

        if let Some(ecache) = &self.equivalence_cache {
            ecache.invalidate_for_pod_add(&pod, &node_name);
        }

        debug!("Adding pod {} to node {}", pod_full_name(&pod), node_name);
        self.nodes
            .write()
            .entry(node_name)
            .or_default()
            .add_pod(pod);
        Ok(())
    }

    /// Remove a pod from the node it is assigned to
    pub fn remove_pod(&self, pod: &Pod) -> Result<()> {
        let node_name = pod_node_name(pod)
            .ok_or_else(|| SchedulerError::invalid_pod(pod_full_name(pod), "pod is not assigned to a node"))?;

        {
            let mut nodes = self.nodes.write();
            let info = nodes
                .get_mut(node_name)
                .ok_or_else(|| SchedulerError::node_not_found(node_name))?;
            info.remove_pod(pod)?;
            if info.node().is_none() && info.pods().is_empty() {
                nodes.remove(node_name);
            }
        }

        if let Some(ecache) = &self.equivalence_cache {
            ecache.invalidate_for_pod_delete(pod);
        }
        debug!("Removed pod {} from node {}", pod_full_name(pod), node_name);
        Ok(())
    }

    /// Replace a pod, possibly moving it to another node
    pub fn update_pod(&self, old: &Pod, new: Pod) -> Result<()> {
        self.remove_pod(old)?;
        self.add_pod(new)
    }

    /// Copy of the cached info for a node
    pub fn get_node_info(&self, name: &str) -> Option<NodeInfo> {
        self.nodes.read().get(name).cloned()
    }

    /// Number of nodes with cached state
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl SchedulerCache for NodeCache {
    fn update_node_name_to_info_map(
        &self,
        node_infos: &mut HashMap<String, Arc<NodeInfo>>,
    ) -> Result<()> {
        let nodes = self.nodes.read();
        for (name, info) in nodes.iter() {
            let current = node_infos.get(name).map(|i| i.generation());
            if current != Some(info.generation()) {
                node_infos.insert(name.clone(), Arc::new(info.clone()));
            }
        }
        node_infos.retain(|name, _| nodes.contains_key(name));
        Ok(())
    }

    fn is_up_to_date(&self, node_info: &NodeInfo) -> bool {
        let Some(name) = node_info.node_name() else {
            return false;
        };
        self.nodes
            .read()
            .get(name)
            .is_some_and(|cached| cached.generation() == node_info.generation())
    }
}

impl NodeLister for NodeCache {
    fn list(&self) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .nodes
            .read()
            .values()
            .filter_map(|info| info.node().cloned())
            .collect();
        nodes.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(nodes)
    }
}
