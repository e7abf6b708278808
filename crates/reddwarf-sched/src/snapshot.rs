use reddwarf_core::{pod_node_name, Node, PersistentVolumeClaim, Pod, PodDisruptionBudget};
use reddwarf_scheduler::{NodeCache, SchedulingQueue};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Cluster state read from a YAML or JSON document
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Pods with `spec.nodeName` set are already running; the rest are pending
    #[serde(default)]
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub pod_disruption_budgets: Vec<PodDisruptionBudget>,
    #[serde(default)]
    pub persistent_volume_claims: Vec<PersistentVolumeClaim>,
}

impl ClusterSnapshot {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| miette::miette!("Failed to read snapshot '{}': {}", path.display(), e))?;
        let snapshot: Self = reddwarf_core::from_yaml(&data)?;
        info!(
            "Loaded snapshot with {} node(s), {} pod(s), {} disruption budget(s)",
            snapshot.nodes.len(),
            snapshot.pods.len(),
            snapshot.pod_disruption_budgets.len()
        );
        Ok(snapshot)
    }

    /// Seed the cache with nodes and running pods and queue the pending
    /// pods. Returns the number of pending pods.
    pub fn populate(
        &self,
        cache: &NodeCache,
        queue: &SchedulingQueue,
    ) -> reddwarf_scheduler::Result<usize> {
        for node in &self.nodes {
            cache.add_node(node.clone())?;
        }

        let mut pending = 0;
        for pod in &self.pods {
            if pod_node_name(pod).is_some() {
                cache.add_pod(pod.clone())?;
            } else {
                queue.add(pod.clone());
                pending += 1;
            }
        }
        Ok(pending)
    }
}
