//! The scheduling algorithm: filter nodes, score them, pick one

use crate::equivalence::{EquivalenceCache, EquivalenceClassInfo};
use crate::extender::SchedulerExtender;
use crate::filter::{PredicateMetadata, PredicateSet};
use crate::listers::{NodeLister, NominatedPodLister, PdbLister, PvcLister, SchedulerCache};
use crate::node_info::NodeInfo;
use crate::parallel::{parallel_map, parallelize_until, DEFAULT_PARALLELISM};
use crate::score::{PriorityConfig, PriorityMetadata};
use crate::types::{
    FailedPredicateMap, HostPriority, HostPriorityList, PredicateFailureReason,
};
use crate::{Result, SchedulerError};
use parking_lot::Mutex;
use reddwarf_core::{pod_full_name, pod_namespace, pod_priority, Node, Pod};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Tuning of the scheduling algorithm
#[derive(Debug, Clone)]
pub struct GenericSchedulerConfig {
    /// Evaluate every predicate on a node even after one failed, to report
    /// all failure reasons
    pub always_check_all_predicates: bool,
    /// Number of workers for per-node work
    pub parallelism: usize,
}

impl Default for GenericSchedulerConfig {
    fn default() -> Self {
        Self {
            always_check_all_predicates: false,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

pub(crate) fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

fn aggregate(mut errors: Vec<SchedulerError>) -> SchedulerError {
    if errors.len() == 1 {
        if let Some(error) = errors.pop() {
            return error;
        }
    }
    SchedulerError::PredicateErrors {
        messages: errors.iter().map(|e| e.to_string()).collect(),
    }
}

/// Copy of `node_info` with the pods nominated to the node that have at
/// least the priority of `pod`. `None` when no such pod exists.
fn add_nominated_pods(
    pod: &Pod,
    node_info: &NodeInfo,
    nominated: Option<&dyn NominatedPodLister>,
) -> Option<NodeInfo> {
    let lister = nominated?;
    let node_name = node_info.node_name()?;
    let priority = pod_priority(pod);
    let key = pod_full_name(pod);

    let mut augmented: Option<NodeInfo> = None;
    for waiting in lister.waiting_pods_for_node(node_name) {
        if pod_priority(&waiting) >= priority && pod_full_name(&waiting) != key {
            augmented
                .get_or_insert_with(|| node_info.clone())
                .add_pod(waiting);
        }
    }
    augmented
}

/// Filters, scores and selects a node for one pod at a time.
///
/// The node info snapshot and the round-robin counter persist across calls.
pub struct GenericScheduler {
    pub(crate) cache: Arc<dyn SchedulerCache>,
    pub(crate) equivalence_cache: Option<Arc<EquivalenceCache>>,
    pub(crate) nominated_pods: Option<Arc<dyn NominatedPodLister>>,
    pub(crate) predicates: PredicateSet,
    pub(crate) prioritizers: Vec<PriorityConfig>,
    pub(crate) extenders: Vec<Arc<dyn SchedulerExtender>>,
    pub(crate) pdb_lister: Option<Arc<dyn PdbLister>>,
    pub(crate) pvc_lister: Option<Arc<dyn PvcLister>>,
    pub(crate) config: GenericSchedulerConfig,
    cached_node_info_map: Mutex<HashMap<String, Arc<NodeInfo>>>,
    last_node_index: Mutex<u64>,
}

impl GenericScheduler {
    /// Create a scheduler over a cache with the given predicates and priorities
    pub fn new(
        cache: Arc<dyn SchedulerCache>,
        predicates: PredicateSet,
        prioritizers: Vec<PriorityConfig>,
    ) -> Self {
        Self {
            cache,
            equivalence_cache: None,
            nominated_pods: None,
            predicates,
            prioritizers,
            extenders: Vec::new(),
            pdb_lister: None,
            pvc_lister: None,
            config: GenericSchedulerConfig::default(),
            cached_node_info_map: Mutex::new(HashMap::new()),
            last_node_index: Mutex::new(0),
        }
    }

    pub fn with_equivalence_cache(mut self, cache: Arc<EquivalenceCache>) -> Self {
        self.equivalence_cache = Some(cache);
        self
    }

    pub fn with_nominated_pods(mut self, lister: Arc<dyn NominatedPodLister>) -> Self {
        self.nominated_pods = Some(lister);
        self
    }

    pub fn with_extenders(mut self, extenders: Vec<Arc<dyn SchedulerExtender>>) -> Self {
        self.extenders = extenders;
        self
    }

    pub fn with_pdb_lister(mut self, lister: Arc<dyn PdbLister>) -> Self {
        self.pdb_lister = Some(lister);
        self
    }

    pub fn with_pvc_lister(mut self, lister: Arc<dyn PvcLister>) -> Self {
        self.pvc_lister = Some(lister);
        self
    }

    pub fn with_config(mut self, config: GenericSchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn equivalence_cache(&self) -> Option<&Arc<EquivalenceCache>> {
        self.equivalence_cache.as_ref()
    }

    pub fn config(&self) -> &GenericSchedulerConfig {
        &self.config
    }

    /// Refresh the node info snapshot from the cache and return a copy of it
    pub(crate) fn snapshot(&self) -> Result<HashMap<String, Arc<NodeInfo>>> {
        let mut node_infos = self.cached_node_info_map.lock();
        self.cache.update_node_name_to_info_map(&mut node_infos)?;
        Ok(node_infos.clone())
    }

    /// Pick a node for `pod`.
    ///
    /// Fails with `FitError` when nodes exist but none passes the
    /// predicates; that error is what [`preempt`](Self::preempt) expects.
    pub fn schedule(&self, pod: &Pod, node_lister: &dyn NodeLister) -> Result<String> {
        self.pod_passes_basic_checks(pod)?;

        let nodes = node_lister.list()?;
        if nodes.is_empty() {
            return Err(SchedulerError::NoNodesAvailable);
        }

        let node_infos = self.snapshot()?;
        let (filtered, failed_predicates) = self.find_nodes_that_fit(pod, &nodes, &node_infos)?;

        if filtered.is_empty() {
            return Err(SchedulerError::fit_error(
                pod_full_name(pod),
                nodes.len(),
                failed_predicates,
            ));
        }

        debug!(
            "{} of {} nodes fit pod {}",
            filtered.len(),
            nodes.len(),
            pod_full_name(pod)
        );

        // Nothing to rank
        if let [only] = filtered.as_slice() {
            return Ok(node_name(only).to_string());
        }

        let priorities = self.prioritize_nodes(pod, &node_infos, &filtered)?;
        self.select_host(&priorities)
    }

    /// Reject pods referencing claims that are missing or being deleted
    fn pod_passes_basic_checks(&self, pod: &Pod) -> Result<()> {
        let Some(pvc_lister) = &self.pvc_lister else {
            return Ok(());
        };

        let volumes = pod
            .spec
            .as_ref()
            .and_then(|s| s.volumes.as_deref())
            .unwrap_or(&[]);

        for volume in volumes {
            let Some(claim) = &volume.persistent_volume_claim else {
                continue;
            };
            let pvc = pvc_lister
                .get(pod_namespace(pod), &claim.claim_name)
                .ok_or_else(|| {
                    SchedulerError::invalid_pod(
                        pod_full_name(pod),
                        format!("persistentvolumeclaim {} not found", claim.claim_name),
                    )
                })?;
            if pvc.metadata.deletion_timestamp.is_some() {
                return Err(SchedulerError::invalid_pod(
                    pod_full_name(pod),
                    format!("persistentvolumeclaim {} is being deleted", claim.claim_name),
                ));
            }
        }
        Ok(())
    }

    /// Nodes that pass every predicate and every interested extender, plus
    /// the failure reasons of the others
    pub fn find_nodes_that_fit(
        &self,
        pod: &Pod,
        nodes: &[Node],
        node_infos: &HashMap<String, Arc<NodeInfo>>,
    ) -> Result<(Vec<Node>, FailedPredicateMap)> {
        let (mut filtered, mut failed_predicates) = if self.predicates.is_empty() {
            (nodes.to_vec(), FailedPredicateMap::new())
        } else {
            self.run_predicates(pod, nodes, node_infos)?
        };

        if !filtered.is_empty() {
            for extender in &self.extenders {
                if !extender.is_interested(pod) {
                    continue;
                }

                match extender.filter(pod, filtered.clone()) {
                    Ok((kept, failed)) => {
                        for (node, message) in failed {
                            failed_predicates
                                .entry(node)
                                .or_default()
                                .push(PredicateFailureReason::Custom(message));
                        }
                        filtered = kept;
                    }
                    Err(e) if extender.is_ignorable() => {
                        warn!("Skipping extender {} as it returned error {}", extender.name(), e);
                        continue;
                    }
                    Err(e) => return Err(e),
                }

                if filtered.is_empty() {
                    break;
                }
            }
        }

        Ok((filtered, failed_predicates))
    }

    fn run_predicates(
        &self,
        pod: &Pod,
        nodes: &[Node],
        node_infos: &HashMap<String, Arc<NodeInfo>>,
    ) -> Result<(Vec<Node>, FailedPredicateMap)> {
        let meta = PredicateMetadata::new(pod);
        let class = self
            .equivalence_cache
            .as_ref()
            .and_then(|ecache| ecache.equivalence_class_info(pod));
        let nominated = self.nominated_pods.as_deref();

        let slots: Vec<OnceLock<Node>> = nodes.iter().map(|_| OnceLock::new()).collect();
        let filtered_len = AtomicUsize::new(0);
        let failed = Mutex::new(FailedPredicateMap::new());
        let errors = Mutex::new(Vec::new());
        let stop = AtomicBool::new(false);

        parallelize_until(self.config.parallelism, nodes.len(), &stop, |i| {
            let node = &nodes[i];
            let name = node_name(node);
            let result = match node_infos.get(name) {
                Some(info) => self.pod_fits_on_node(pod, &meta, info, class.as_ref(), nominated),
                None => Err(SchedulerError::node_not_found(name)),
            };

            match result {
                Ok((true, _)) => {
                    let slot = filtered_len.fetch_add(1, Ordering::SeqCst);
                    let _ = slots[slot].set(node.clone());
                }
                Ok((false, reasons)) => {
                    failed.lock().insert(name.to_string(), reasons);
                }
                Err(e) => {
                    errors.lock().push(e);
                    stop.store(true, Ordering::SeqCst);
                }
            }
        });

        let errors = errors.into_inner();
        if !errors.is_empty() {
            return Err(aggregate(errors));
        }

        let len = filtered_len.into_inner();
        let filtered = slots
            .into_iter()
            .take(len)
            .filter_map(OnceLock::into_inner)
            .collect();
        Ok((filtered, failed.into_inner()))
    }

    /// Check `pod` against every predicate on one node.
    ///
    /// With nominated pods of equal or higher priority waiting for the node,
    /// the check runs twice: with them added and, if that passed, without
    /// them. The equivalence cache is only consulted on a pass that did not
    /// add nominated pods.
    pub(crate) fn pod_fits_on_node(
        &self,
        pod: &Pod,
        meta: &PredicateMetadata,
        node_info: &NodeInfo,
        class: Option<&EquivalenceClassInfo>,
        nominated: Option<&dyn NominatedPodLister>,
    ) -> Result<(bool, Vec<PredicateFailureReason>)> {
        let mut failed = Vec::new();
        let mut pods_added = false;

        for pass in 0..2 {
            let augmented;
            let info: &NodeInfo = if pass == 0 {
                match add_nominated_pods(pod, node_info, nominated) {
                    Some(with_nominated) => {
                        pods_added = true;
                        augmented = with_nominated;
                        &augmented
                    }
                    None => node_info,
                }
            } else if !pods_added || !failed.is_empty() {
                break;
            } else {
                node_info
            };

            let ecache = if pass == 0 && pods_added {
                None
            } else {
                class.zip(self.equivalence_cache.as_deref())
            };
            let fresh = ecache.is_some() && self.cache.is_up_to_date(info);

            for (name, predicate) in self.predicates.ordered() {
                let result = match ecache {
                    Some((class, ecache)) => ecache.run_predicate(
                        predicate.as_ref(),
                        name,
                        pod,
                        meta,
                        info,
                        class,
                        fresh,
                    )?,
                    None => predicate.predicate(pod, meta, info)?,
                };

                if !result.fit {
                    failed.extend(result.reasons);
                    if !self.config.always_check_all_predicates {
                        break;
                    }
                }
            }
        }

        Ok((failed.is_empty(), failed))
    }

    /// Score `nodes` as the weighted sum of every priority function plus
    /// the scores of interested extenders
    pub fn prioritize_nodes(
        &self,
        pod: &Pod,
        node_infos: &HashMap<String, Arc<NodeInfo>>,
        nodes: &[Node],
    ) -> Result<HostPriorityList> {
        if self.prioritizers.is_empty() && self.extenders.is_empty() {
            return Ok(nodes
                .iter()
                .map(|node| HostPriority::new(node_name(node), 1))
                .collect());
        }

        let meta = PriorityMetadata::new(pod);
        let infos = nodes
            .iter()
            .map(|node| {
                node_infos
                    .get(node_name(node))
                    .cloned()
                    .ok_or_else(|| SchedulerError::node_not_found(node_name(node)))
            })
            .collect::<Result<Vec<Arc<NodeInfo>>>>()?;

        let mapped: Vec<Result<Vec<i64>>> =
            parallel_map(self.config.parallelism, infos.len(), |i| {
                self.prioritizers
                    .iter()
                    .map(|config| config.function.map(pod, &meta, &infos[i]))
                    .collect()
            });

        let mut errors = Vec::new();
        let mut node_scores = Vec::with_capacity(mapped.len());
        for scores in mapped {
            match scores {
                Ok(scores) => node_scores.push(scores),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if !errors.is_empty() {
            return Err(SchedulerError::priority_failed("map", errors.join(", ")));
        }

        let mut totals: HashMap<String, i64> = HashMap::new();
        for (j, config) in self.prioritizers.iter().enumerate() {
            let mut scores: HostPriorityList = nodes
                .iter()
                .zip(&node_scores)
                .map(|(node, scores)| HostPriority::new(node_name(node), scores[j]))
                .collect();

            config
                .function
                .reduce(pod, &meta, node_infos, &mut scores)
                .map_err(|e| SchedulerError::priority_failed(config.function.name(), e.to_string()))?;

            for host in scores {
                *totals.entry(host.host).or_default() += host.score * config.weight;
            }
        }

        let interested: Vec<&Arc<dyn SchedulerExtender>> = self
            .extenders
            .iter()
            .filter(|extender| extender.is_interested(pod))
            .collect();
        let outputs = parallel_map(interested.len(), interested.len(), |i| {
            interested[i].prioritize(pod, nodes)
        });

        for (extender, output) in interested.iter().zip(outputs) {
            match output {
                Ok((scores, weight)) => {
                    for host in scores {
                        *totals.entry(host.host).or_default() += host.score * weight;
                    }
                }
                Err(e) => {
                    debug!("Ignoring priorities of extender {}: {}", extender.name(), e);
                }
            }
        }

        Ok(nodes
            .iter()
            .map(|node| {
                let name = node_name(node);
                HostPriority::new(name, totals.get(name).copied().unwrap_or(0))
            })
            .collect())
    }

    /// Pick the best scored node, rotating among nodes that tie for the top
    /// score
    pub fn select_host(&self, priorities: &HostPriorityList) -> Result<String> {
        if priorities.is_empty() {
            return Err(SchedulerError::EmptyPriorityList);
        }

        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.host.cmp(&b.host)));

        let max_score = sorted[0].score;
        let ties = sorted
            .iter()
            .position(|host| host.score < max_score)
            .unwrap_or(sorted.len());

        let mut last_node_index = self.last_node_index.lock();
        let index = (*last_node_index % ties as u64) as usize;
        *last_node_index += 1;

        Ok(sorted[index].host.clone())
    }
}
