//! Choosing pods to evict so that a higher priority pod fits

use crate::filter::PredicateMetadata;
use crate::generic::{node_name, GenericScheduler};
use crate::listers::NodeLister;
use crate::node_info::NodeInfo;
use crate::parallel::parallel_map;
use crate::pdb::filter_pods_with_pdb_violation;
use crate::types::{FailedPredicateMap, NodeToVictims, PreemptionResult, Victims};
use crate::{Result, SchedulerError};
use reddwarf_core::{
    higher_priority_first, pod_full_name, pod_is_terminating, pod_nominated_node_name,
    pod_priority, Node, Pod, PodDisruptionBudget,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether `pod` may preempt others now.
///
/// A pod whose nominated node still has lower priority pods terminating is
/// waiting on an earlier preemption and must not start another one.
pub fn pod_eligible_to_preempt_others(
    pod: &Pod,
    node_infos: &HashMap<String, Arc<NodeInfo>>,
) -> bool {
    let Some(nominated) = pod_nominated_node_name(pod) else {
        return true;
    };
    let Some(info) = node_infos.get(nominated) else {
        return true;
    };

    let priority = pod_priority(pod);
    !info
        .pods()
        .iter()
        .any(|p| pod_is_terminating(p) && pod_priority(p) < priority)
}

/// Nodes where evicting pods could make `pod` fit, judged by why they
/// failed the predicates. Nodes without recorded failures are kept.
pub fn nodes_where_preemption_might_help(
    nodes: &[Node],
    failed_predicates: &FailedPredicateMap,
) -> Vec<Node> {
    nodes
        .iter()
        .filter(|node| {
            failed_predicates
                .get(node_name(node))
                .map_or(true, |reasons| reasons.iter().all(|r| r.resolvable_by_preemption()))
        })
        .cloned()
        .collect()
}

/// Pick the node to preempt on.
///
/// A node needing no eviction wins outright. Otherwise candidates are
/// narrowed, in order, to the fewest disruption budget violations, the
/// lowest highest-victim priority, the lowest sum of victim priorities and
/// the fewest victims; the first remaining node in name order wins.
///
/// Priorities are `i32`; each is shifted by `2^31` into `[0, 2^32)` before
/// summing in an `i64`, so negative priorities cannot reorder the sums.
pub fn pick_one_node_for_preemption(node_to_victims: &NodeToVictims) -> Option<String> {
    if let Some((name, _)) = node_to_victims.iter().find(|(_, v)| v.pods.is_empty()) {
        return Some(name.clone());
    }

    let mut candidates: Vec<(&String, &Victims)> = node_to_victims.iter().collect();

    retain_min(&mut candidates, |(_, v)| v.num_pdb_violations as i64);
    retain_min(&mut candidates, |(_, v)| {
        v.pods.iter().map(pod_priority).max().unwrap_or(i32::MIN) as i64
    });
    retain_min(&mut candidates, |(_, v)| {
        v.pods
            .iter()
            .map(|p| pod_priority(p) as i64 - i32::MIN as i64)
            .sum()
    });
    retain_min(&mut candidates, |(_, v)| v.pods.len() as i64);

    candidates.first().map(|(name, _)| (*name).clone())
}

fn retain_min<T>(items: &mut Vec<T>, key: impl Fn(&T) -> i64) {
    if let Some(min) = items.iter().map(&key).min() {
        items.retain(|item| key(item) == min);
    }
}

impl GenericScheduler {
    /// Find a node where evicting lower priority pods lets `pod` fit.
    ///
    /// Only acts on a `FitError` from [`schedule`](Self::schedule); any
    /// other error yields an empty result. Errors while evaluating a single
    /// candidate node drop that node instead of failing the call.
    pub fn preempt(
        &self,
        pod: &Pod,
        node_lister: &dyn NodeLister,
        schedule_err: &SchedulerError,
    ) -> Result<PreemptionResult> {
        let SchedulerError::FitError {
            failed_predicates, ..
        } = schedule_err
        else {
            return Ok(PreemptionResult::default());
        };

        let node_infos = self.snapshot()?;
        if !pod_eligible_to_preempt_others(pod, &node_infos) {
            debug!(
                "Pod {} is not eligible for more preemption",
                pod_full_name(pod)
            );
            return Ok(PreemptionResult::default());
        }

        let all_nodes = node_lister.list()?;
        if all_nodes.is_empty() {
            return Err(SchedulerError::NoNodesAvailable);
        }

        let potential_nodes = nodes_where_preemption_might_help(&all_nodes, failed_predicates);
        if potential_nodes.is_empty() {
            debug!(
                "Preemption will not help schedule pod {} on any node",
                pod_full_name(pod)
            );
            // The pod's nominated node, if any, is of no use anymore
            return Ok(PreemptionResult {
                nominated_pods_to_clear: vec![pod.clone()],
                ..Default::default()
            });
        }

        let pdbs = match &self.pdb_lister {
            Some(lister) => lister.list()?,
            None => Vec::new(),
        };

        let node_to_victims =
            self.select_nodes_for_preemption(pod, &node_infos, &potential_nodes, &pdbs);
        let node_to_victims = self.process_preemption_with_extenders(pod, node_to_victims)?;

        let Some(candidate) = pick_one_node_for_preemption(&node_to_victims) else {
            return Ok(PreemptionResult::default());
        };

        let node = node_infos
            .get(&candidate)
            .and_then(|info| info.node().cloned())
            .ok_or_else(|| SchedulerError::node_not_found(&candidate))?;
        let victims = node_to_victims
            .get(&candidate)
            .map(|v| v.pods.clone())
            .unwrap_or_default();
        let nominated_pods_to_clear = self.lower_priority_nominated_pods(pod, &candidate);

        info!(
            "Preempting {} pod(s) on node {} for pod {}",
            victims.len(),
            candidate,
            pod_full_name(pod)
        );

        Ok(PreemptionResult {
            node: Some(node),
            victims,
            nominated_pods_to_clear,
        })
    }

    /// Victims for every candidate node where preemption works
    pub(crate) fn select_nodes_for_preemption(
        &self,
        pod: &Pod,
        node_infos: &HashMap<String, Arc<NodeInfo>>,
        potential_nodes: &[Node],
        pdbs: &[PodDisruptionBudget],
    ) -> NodeToVictims {
        let meta = PredicateMetadata::new(pod);

        let selected = parallel_map(self.config.parallelism, potential_nodes.len(), |i| {
            let name = node_name(&potential_nodes[i]);
            let info = node_infos.get(name)?;
            match self.select_victims_on_node(pod, &meta, info, pdbs) {
                Ok(victims) => victims.map(|v| (name.to_string(), v)),
                Err(e) => {
                    warn!("Skipping node {} for preemption: {}", name, e);
                    None
                }
            }
        });

        selected.into_iter().flatten().collect()
    }

    /// The fewest pods to evict from one node for `pod` to fit.
    ///
    /// Works on a copy of the node info. Returns `None` when `pod` does not
    /// fit even with every lower priority pod gone.
    pub(crate) fn select_victims_on_node(
        &self,
        pod: &Pod,
        meta: &PredicateMetadata,
        node_info: &NodeInfo,
        pdbs: &[PodDisruptionBudget],
    ) -> Result<Option<Victims>> {
        let mut info = node_info.clone();
        let priority = pod_priority(pod);

        let mut potential_victims: Vec<Pod> = info
            .pods()
            .iter()
            .filter(|p| pod_priority(p) < priority)
            .cloned()
            .collect();
        for victim in &potential_victims {
            info.remove_pod(victim)?;
        }
        potential_victims.sort_by(higher_priority_first);

        let (fits, _) = self.pod_fits_on_node(pod, meta, &info, None, None)?;
        if !fits {
            return Ok(None);
        }

        let (violating, non_violating) = filter_pods_with_pdb_violation(&potential_victims, pdbs);

        let mut victims = Victims::default();
        for (candidate, violates_pdb) in violating
            .into_iter()
            .map(|p| (p, true))
            .chain(non_violating.into_iter().map(|p| (p, false)))
        {
            info.add_pod(candidate.clone());
            let (fits, _) = self.pod_fits_on_node(pod, meta, &info, None, None)?;
            if !fits {
                info.remove_pod(&candidate)?;
                if violates_pdb {
                    victims.num_pdb_violations += 1;
                }
                victims.pods.push(candidate);
            }
        }

        victims.pods.sort_by(higher_priority_first);
        Ok(Some(victims))
    }

    fn process_preemption_with_extenders(
        &self,
        pod: &Pod,
        mut node_to_victims: NodeToVictims,
    ) -> Result<NodeToVictims> {
        if node_to_victims.is_empty() {
            return Ok(node_to_victims);
        }

        for extender in &self.extenders {
            if !extender.supports_preemption() || !extender.is_interested(pod) {
                continue;
            }
            match extender.process_preemption(pod, node_to_victims.clone()) {
                Ok(updated) => node_to_victims = updated,
                Err(e) if extender.is_ignorable() => {
                    warn!("Skipping extender {} as it returned error {}", extender.name(), e);
                    continue;
                }
                Err(e) => return Err(e),
            }
            if node_to_victims.is_empty() {
                break;
            }
        }

        Ok(node_to_victims)
    }

    /// Pods nominated to `node_name` with lower priority than `pod`. They
    /// may no longer fit once `pod` takes their place.
    fn lower_priority_nominated_pods(&self, pod: &Pod, node_name: &str) -> Vec<Pod> {
        let Some(lister) = &self.nominated_pods else {
            return Vec::new();
        };
        let priority = pod_priority(pod);
        lister
            .waiting_pods_for_node(node_name)
            .into_iter()
            .filter(|p| pod_priority(p) < priority)
            .collect()
    }
}
