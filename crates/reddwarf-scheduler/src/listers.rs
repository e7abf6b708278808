//! Read access to the cluster state the scheduling core depends on

use crate::node_info::NodeInfo;
use crate::Result;
use reddwarf_core::{Node, PersistentVolumeClaim, Pod, PodDisruptionBudget};
use std::collections::HashMap;
use std::sync::Arc;

/// Source of the nodes to schedule onto
pub trait NodeLister: Send + Sync {
    fn list(&self) -> Result<Vec<Node>>;
}

impl NodeLister for Vec<Node> {
    fn list(&self) -> Result<Vec<Node>> {
        Ok(self.clone())
    }
}

/// Authoritative per-node state
pub trait SchedulerCache: Send + Sync {
    /// Bring `node_infos` in line with the cache: refresh entries whose
    /// generation changed, add new nodes and drop deleted ones
    fn update_node_name_to_info_map(
        &self,
        node_infos: &mut HashMap<String, Arc<NodeInfo>>,
    ) -> Result<()>;

    /// Whether `node_info` still reflects the cache's current state
    fn is_up_to_date(&self, node_info: &NodeInfo) -> bool;
}

/// Pods nominated to run on a node by an earlier preemption
pub trait NominatedPodLister: Send + Sync {
    fn waiting_pods_for_node(&self, node_name: &str) -> Vec<Pod>;
}

/// Source of pod disruption budgets
pub trait PdbLister: Send + Sync {
    fn list(&self) -> Result<Vec<PodDisruptionBudget>>;
}

impl PdbLister for Vec<PodDisruptionBudget> {
    fn list(&self) -> Result<Vec<PodDisruptionBudget>> {
        Ok(self.clone())
    }
}

/// Lookup of persistent volume claims
pub trait PvcLister: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim>;
}

impl PvcLister for Vec<PersistentVolumeClaim> {
    fn get(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.iter()
            .find(|pvc| {
                pvc.metadata.namespace.as_deref().unwrap_or("default") == namespace
                    && pvc.metadata.name.as_deref() == Some(name)
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pvc_lister_for_vec() {
        let mut pvc = PersistentVolumeClaim::default();
        pvc.metadata.name = Some("data".to_string());
        let claims = vec![pvc];

        assert!(claims.get("default", "data").is_some());
        assert!(claims.get("other", "data").is_none());
        assert!(claims.get("default", "logs").is_none());
    }
}
