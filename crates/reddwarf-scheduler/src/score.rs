use crate::filter::toleration_tolerates_taint;
use crate::node_info::NodeInfo;
use crate::types::HostPriorityList;
use crate::Result;
use k8s_openapi::api::core::v1::Toleration;
use reddwarf_core::{pod_non_zero_request, Pod, ResourceQuantities};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Highest score a priority function hands out
pub const MAX_PRIORITY: i64 = 10;

pub const LEAST_REQUESTED_PRIORITY: &str = "LeastRequestedPriority";
pub const BALANCED_RESOURCE_ALLOCATION: &str = "BalancedResourceAllocation";
pub const TAINT_TOLERATION_PRIORITY: &str = "TaintTolerationPriority";
pub const EQUAL_PRIORITY: &str = "EqualPriority";

/// Facts about the pod being scored, computed once per scheduling attempt
#[derive(Debug, Clone, Default)]
pub struct PriorityMetadata {
    /// Request of the pod with scoring defaults for empty containers
    pub non_zero_request: ResourceQuantities,
    /// Tolerations that apply to PreferNoSchedule taints
    pub tolerations: Vec<Toleration>,
}

impl PriorityMetadata {
    pub fn new(pod: &Pod) -> Self {
        let tolerations = pod
            .spec
            .as_ref()
            .and_then(|s| s.tolerations.as_deref())
            .unwrap_or(&[])
            .iter()
            .filter(|t| {
                matches!(t.effect.as_deref(), None | Some("") | Some("PreferNoSchedule"))
            })
            .cloned()
            .collect();

        Self {
            non_zero_request: pod_non_zero_request(pod),
            tolerations,
        }
    }
}

/// Scoring function trait
pub trait PriorityFunction: Send + Sync {
    /// Score one node (0-10, higher is better)
    fn map(&self, pod: &Pod, meta: &PriorityMetadata, node_info: &NodeInfo) -> Result<i64>;

    /// Adjust the scores of all nodes once every node was mapped
    fn reduce(
        &self,
        _pod: &Pod,
        _meta: &PriorityMetadata,
        _node_infos: &HashMap<String, Arc<NodeInfo>>,
        _scores: &mut HostPriorityList,
    ) -> Result<()> {
        Ok(())
    }

    /// Name of the scoring function
    fn name(&self) -> &str;
}

/// A priority function and its weight in the combined score
#[derive(Clone)]
pub struct PriorityConfig {
    pub function: Arc<dyn PriorityFunction>,
    pub weight: i64,
}

impl PriorityConfig {
    pub fn new(function: Arc<dyn PriorityFunction>, weight: i64) -> Self {
        Self { function, weight }
    }
}

/// A map-only priority backed by a closure
pub struct PriorityFn<F> {
    name: String,
    f: F,
}

impl<F> PriorityFunction for PriorityFn<F>
where
    F: Fn(&Pod, &PriorityMetadata, &NodeInfo) -> Result<i64> + Send + Sync,
{
    fn map(&self, pod: &Pod, meta: &PriorityMetadata, node_info: &NodeInfo) -> Result<i64> {
        (self.f)(pod, meta, node_info)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap a closure as a named priority function
pub fn priority_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn PriorityFunction>
where
    F: Fn(&Pod, &PriorityMetadata, &NodeInfo) -> Result<i64> + Send + Sync + 'static,
{
    Arc::new(PriorityFn {
        name: name.into(),
        f,
    })
}

/// Resources the node would have requested with the pod placed on it
fn requested_with_pod(meta: &PriorityMetadata, node_info: &NodeInfo) -> ResourceQuantities {
    let mut requested = *node_info.non_zero_requested();
    requested.add(&meta.non_zero_request);
    requested
}

fn least_requested_score(requested: i64, capacity: i64) -> i64 {
    if capacity == 0 || requested > capacity {
        return 0;
    }
    ((capacity - requested) as i128 * MAX_PRIORITY as i128 / capacity as i128) as i64
}

/// Score based on least requested resources
pub struct LeastRequested;

impl PriorityFunction for LeastRequested {
    fn map(&self, _pod: &Pod, meta: &PriorityMetadata, node_info: &NodeInfo) -> Result<i64> {
        let allocatable = node_info.allocatable();
        let requested = requested_with_pod(meta, node_info);

        let cpu_score = least_requested_score(requested.cpu_millicores, allocatable.cpu_millicores);
        let memory_score = least_requested_score(requested.memory_bytes, allocatable.memory_bytes);
        let score = (cpu_score + memory_score) / 2;

        debug!(
            "Node {} least requested score: {} (cpu: {}, memory: {})",
            node_info.node_name().unwrap_or("<none>"),
            score,
            cpu_score,
            memory_score
        );

        Ok(score)
    }

    fn name(&self) -> &str {
        LEAST_REQUESTED_PRIORITY
    }
}

fn fraction_of_capacity(requested: i64, capacity: i64) -> f64 {
    if capacity == 0 {
        return 1.0;
    }
    requested as f64 / capacity as f64
}

/// Score based on balanced resource allocation
pub struct BalancedResourceAllocation;

impl PriorityFunction for BalancedResourceAllocation {
    fn map(&self, _pod: &Pod, meta: &PriorityMetadata, node_info: &NodeInfo) -> Result<i64> {
        let allocatable = node_info.allocatable();
        let requested = requested_with_pod(meta, node_info);

        let cpu_fraction =
            fraction_of_capacity(requested.cpu_millicores, allocatable.cpu_millicores);
        let memory_fraction =
            fraction_of_capacity(requested.memory_bytes, allocatable.memory_bytes);

        // Overcommitted nodes get the lowest score
        if cpu_fraction >= 1.0 || memory_fraction >= 1.0 {
            return Ok(0);
        }

        let diff = (cpu_fraction - memory_fraction).abs();
        let score = ((1.0 - diff) * MAX_PRIORITY as f64) as i64;

        debug!(
            "Node {} balance score: {} (cpu: {:.2}, memory: {:.2})",
            node_info.node_name().unwrap_or("<none>"),
            score,
            cpu_fraction,
            memory_fraction
        );

        Ok(score)
    }

    fn name(&self) -> &str {
        BALANCED_RESOURCE_ALLOCATION
    }
}

/// Prefer nodes with fewer PreferNoSchedule taints the pod does not tolerate
pub struct TaintTolerationPriority;

impl PriorityFunction for TaintTolerationPriority {
    fn map(&self, _pod: &Pod, meta: &PriorityMetadata, node_info: &NodeInfo) -> Result<i64> {
        let intolerable = node_info
            .taints()
            .iter()
            .filter(|taint| taint.effect == "PreferNoSchedule")
            .filter(|taint| {
                !meta
                    .tolerations
                    .iter()
                    .any(|t| toleration_tolerates_taint(t, taint))
            })
            .count();
        Ok(intolerable as i64)
    }

    fn reduce(
        &self,
        _pod: &Pod,
        _meta: &PriorityMetadata,
        _node_infos: &HashMap<String, Arc<NodeInfo>>,
        scores: &mut HostPriorityList,
    ) -> Result<()> {
        let max_count = scores.iter().map(|s| s.score).max().unwrap_or(0);
        for host in scores.iter_mut() {
            host.score = if max_count == 0 {
                MAX_PRIORITY
            } else {
                MAX_PRIORITY - MAX_PRIORITY * host.score / max_count
            };
        }
        Ok(())
    }

    fn name(&self) -> &str {
        TAINT_TOLERATION_PRIORITY
    }
}

/// Same score for every node
pub struct EqualPriority;

impl PriorityFunction for EqualPriority {
    fn map(&self, _pod: &Pod, _meta: &PriorityMetadata, _node_info: &NodeInfo) -> Result<i64> {
        Ok(1)
    }

    fn name(&self) -> &str {
        EQUAL_PRIORITY
    }
}

/// Names accepted by [`priority_by_name`]
pub const REGISTERED_PRIORITIES: [&str; 4] = [
    LEAST_REQUESTED_PRIORITY,
    BALANCED_RESOURCE_ALLOCATION,
    TAINT_TOLERATION_PRIORITY,
    EQUAL_PRIORITY,
];

/// Look up a built-in priority function
pub fn priority_by_name(name: &str) -> Option<Arc<dyn PriorityFunction>> {
    let function: Arc<dyn PriorityFunction> = match name {
        LEAST_REQUESTED_PRIORITY => Arc::new(LeastRequested),
        BALANCED_RESOURCE_ALLOCATION => Arc::new(BalancedResourceAllocation),
        TAINT_TOLERATION_PRIORITY => Arc::new(TaintTolerationPriority),
        EQUAL_PRIORITY => Arc::new(EqualPriority),
        _ => return None,
    };
    Some(function)
}

/// Get default scoring functions
pub fn default_priorities() -> Vec<PriorityConfig> {
    [
        LEAST_REQUESTED_PRIORITY,
        BALANCED_RESOURCE_ALLOCATION,
        TAINT_TOLERATION_PRIORITY,
    ]
    .into_iter()
    .filter_map(priority_by_name)
    .map(|function| PriorityConfig::new(function, 1))
    .collect()
}
