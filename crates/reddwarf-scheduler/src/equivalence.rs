//! Equivalence cache: reuse predicate results across pods that the
//! predicates cannot tell apart.
//!
//! Layout is node name -> LRU of predicate name -> equivalence hash -> result.

use crate::filter::{
    FitPredicate, PredicateMetadata, GENERAL_PRED, MATCH_INTER_POD_AFFINITY_PRED,
    MAX_AZURE_DISK_VOLUME_COUNT_PRED, MAX_EBS_VOLUME_COUNT_PRED, MAX_GCE_PD_VOLUME_COUNT_PRED,
    NO_DISK_CONFLICT_PRED, POD_FITS_HOST_PORTS_PRED, POD_FITS_RESOURCES_PRED,
};
use crate::lru::LruCache;
use crate::node_info::NodeInfo;
use crate::types::{PredicateFailureReason, PredicateResult};
use crate::{Result, SchedulerError};
use k8s_openapi::api::core::v1::{Affinity, Container, Toleration, Volume};
use parking_lot::Mutex;
use reddwarf_core::{pod_node_name, Pod};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace};

/// Number of predicate names cached per node
pub const MAX_CACHE_ENTRIES: usize = 100;

/// A cached predicate outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPredicate {
    pub fit: bool,
    pub reasons: Vec<PredicateFailureReason>,
}

impl From<HostPredicate> for PredicateResult {
    fn from(cached: HostPredicate) -> Self {
        PredicateResult {
            fit: cached.fit,
            reasons: cached.reasons,
        }
    }
}

/// Results of one predicate on one node, by equivalence hash
pub type PredicateMap = HashMap<u64, HostPredicate>;

/// Results of all predicates on one node
pub type AlgorithmCache = LruCache<String, PredicateMap>;

/// Equivalence class of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EquivalenceClassInfo {
    pub hash: u64,
}

/// The pod fields predicates look at
#[derive(Serialize)]
struct EquivalencePod<'a> {
    namespace: Option<&'a String>,
    labels: Option<&'a BTreeMap<String, String>>,
    affinity: Option<&'a Affinity>,
    containers: Option<&'a Vec<Container>>,
    init_containers: Option<&'a Vec<Container>>,
    node_name: Option<&'a String>,
    node_selector: Option<&'a BTreeMap<String, String>>,
    tolerations: Option<&'a Vec<Toleration>>,
    volumes: Option<&'a Vec<Volume>>,
}

impl<'a> EquivalencePod<'a> {
    fn from_pod(pod: &'a Pod) -> Self {
        let spec = pod.spec.as_ref();
        Self {
            namespace: pod.metadata.namespace.as_ref(),
            labels: pod.metadata.labels.as_ref(),
            affinity: spec.and_then(|s| s.affinity.as_ref()),
            containers: spec.map(|s| &s.containers),
            init_containers: spec.and_then(|s| s.init_containers.as_ref()),
            node_name: spec.and_then(|s| s.node_name.as_ref()),
            node_selector: spec.and_then(|s| s.node_selector.as_ref()),
            tolerations: spec.and_then(|s| s.tolerations.as_ref()),
            volumes: spec.and_then(|s| s.volumes.as_ref()),
        }
    }
}

/// Drop nulls and empty collections so that absent and empty fields look
/// the same
fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(items) => {
            let items: Vec<Value> = items.into_iter().filter_map(prune).collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        Value::Object(fields) => {
            let fields: serde_json::Map<String, Value> = fields
                .into_iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k, v)))
                .collect();
            (!fields.is_empty()).then_some(Value::Object(fields))
        }
        other => Some(other),
    }
}

/// Hash the equivalence-relevant fields of a pod.
///
/// Returns `None` only when the fields cannot be serialized.
pub fn equivalence_hash(pod: &Pod) -> Option<u64> {
    let value = serde_json::to_value(EquivalencePod::from_pod(pod)).ok()?;
    let canonical = prune(value).unwrap_or(Value::Null);
    let bytes = serde_json::to_vec(&canonical).ok()?;

    let digest = blake3::hash(&bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    Some(u64::from_le_bytes(head))
}

fn names(predicates: &[&str]) -> HashSet<String> {
    predicates.iter().map(|p| p.to_string()).collect()
}

/// Predicates whose cached results depend on the volumes of the pods on a node
fn volume_predicates(pod: &Pod) -> Vec<&'static str> {
    let mut predicates = Vec::new();
    let volumes = pod
        .spec
        .as_ref()
        .and_then(|s| s.volumes.as_deref())
        .unwrap_or(&[]);

    for volume in volumes {
        if volume.persistent_volume_claim.is_some() {
            predicates.extend([
                MAX_EBS_VOLUME_COUNT_PRED,
                MAX_GCE_PD_VOLUME_COUNT_PRED,
                MAX_AZURE_DISK_VOLUME_COUNT_PRED,
            ]);
            continue;
        }
        if volume.aws_elastic_block_store.is_some() {
            predicates.push(MAX_EBS_VOLUME_COUNT_PRED);
        }
        if volume.gce_persistent_disk.is_some() {
            predicates.push(MAX_GCE_PD_VOLUME_COUNT_PRED);
        }
        if volume.azure_disk.is_some() {
            predicates.push(MAX_AZURE_DISK_VOLUME_COUNT_PRED);
        }
    }
    predicates
}

/// Cache of predicate results shared by every scheduling attempt
pub struct EquivalenceCache {
    algorithm_cache: Mutex<HashMap<String, AlgorithmCache>>,
}

impl Default for EquivalenceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EquivalenceCache {
    pub fn new() -> Self {
        Self {
            algorithm_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Compute the equivalence class of a pod
    pub fn equivalence_class_info(&self, pod: &Pod) -> Option<EquivalenceClassInfo> {
        equivalence_hash(pod).map(|hash| EquivalenceClassInfo { hash })
    }

    /// Evaluate a predicate, serving the result from the cache when possible.
    ///
    /// A computed result is stored only when `node_info_fresh` says the
    /// snapshot matches the authoritative cache. Errors are never cached.
    #[allow(clippy::too_many_arguments)]
    pub fn run_predicate(
        &self,
        predicate: &dyn FitPredicate,
        predicate_name: &str,
        pod: &Pod,
        meta: &PredicateMetadata,
        node_info: &NodeInfo,
        class: &EquivalenceClassInfo,
        node_info_fresh: bool,
    ) -> Result<PredicateResult> {
        let node_name = node_info.node_name().ok_or_else(|| {
            SchedulerError::predicate_failed(predicate_name, "<none>", "node not found")
        })?;

        if let Some(cached) = self.lookup_result(node_name, predicate_name, class.hash) {
            trace!(
                "Equivalence cache hit for {} on node {}",
                predicate_name,
                node_name
            );
            return Ok(cached.into());
        }

        let result = predicate.predicate(pod, meta, node_info)?;

        if node_info_fresh {
            self.update_result(node_name, predicate_name, class.hash, &result);
        } else {
            debug!(
                "Skipping equivalence cache update for {} on stale node {}",
                predicate_name, node_name
            );
        }

        Ok(result)
    }

    /// Cached result for a node, predicate and equivalence hash
    pub fn lookup_result(
        &self,
        node_name: &str,
        predicate_name: &str,
        hash: u64,
    ) -> Option<HostPredicate> {
        let mut cache = self.algorithm_cache.lock();
        cache
            .get_mut(node_name)?
            .get(&predicate_name.to_string())?
            .get(&hash)
            .cloned()
    }

    /// Store a result for a node, predicate and equivalence hash
    pub fn update_result(
        &self,
        node_name: &str,
        predicate_name: &str,
        hash: u64,
        result: &PredicateResult,
    ) {
        let entry = HostPredicate {
            fit: result.fit,
            reasons: result.reasons.clone(),
        };

        let mut cache = self.algorithm_cache.lock();
        let node_cache = cache
            .entry(node_name.to_string())
            .or_insert_with(|| LruCache::new(MAX_CACHE_ENTRIES));

        let key = predicate_name.to_string();
        if let Some(predicate_map) = node_cache.get_mut(&key) {
            predicate_map.insert(hash, entry);
        } else {
            node_cache.insert(key, PredicateMap::from([(hash, entry)]));
        }
    }

    /// Drop cached results of the given predicates on one node
    pub fn invalidate_predicates(&self, node_name: &str, predicates: &HashSet<String>) {
        if predicates.is_empty() {
            return;
        }
        let mut cache = self.algorithm_cache.lock();
        if let Some(node_cache) = cache.get_mut(node_name) {
            for predicate in predicates {
                node_cache.remove(predicate);
            }
        }
        debug!(
            "Invalidated cached predicates {:?} on node {}",
            predicates, node_name
        );
    }

    /// Drop cached results of the given predicates on every node
    pub fn invalidate_predicates_on_all_nodes(&self, predicates: &HashSet<String>) {
        if predicates.is_empty() {
            return;
        }
        let mut cache = self.algorithm_cache.lock();
        for node_cache in cache.values_mut() {
            for predicate in predicates {
                node_cache.remove(predicate);
            }
        }
        debug!("Invalidated cached predicates {:?} on all nodes", predicates);
    }

    /// Drop everything cached for a node
    pub fn invalidate_node(&self, node_name: &str) {
        self.algorithm_cache.lock().remove(node_name);
        debug!("Invalidated all cached predicates on node {}", node_name);
    }

    /// Invalidate what a new pod on `node_name` can change: the predicates
    /// that count the node's pods (general, resource fit and host ports) and
    /// the volume count predicates of the volumes it mounts.
    ///
    /// Affinity results stay valid; placing a pod never breaks the affinity
    /// of pods already running.
    pub fn invalidate_for_pod_add(&self, pod: &Pod, node_name: &str) {
        let mut predicates = names(&[
            GENERAL_PRED,
            POD_FITS_RESOURCES_PRED,
            POD_FITS_HOST_PORTS_PRED,
        ]);
        predicates.extend(volume_predicates(pod).into_iter().map(String::from));
        self.invalidate_predicates(node_name, &predicates);
    }

    /// Invalidate what removing a pod can change: everything a pod add
    /// invalidates on its node, disk conflicts for its volumes, and pod
    /// affinity on every node
    pub fn invalidate_for_pod_delete(&self, pod: &Pod) {
        let Some(node_name) = pod_node_name(pod) else {
            return;
        };
        self.invalidate_for_pod_add(pod, node_name);
        self.invalidate_predicates_on_all_nodes(&names(&[MATCH_INTER_POD_AFFINITY_PRED]));

        let has_disk = pod
            .spec
            .as_ref()
            .and_then(|s| s.volumes.as_deref())
            .unwrap_or(&[])
            .iter()
            .any(|v| {
                v.gce_persistent_disk.is_some()
                    || v.aws_elastic_block_store.is_some()
                    || v.rbd.is_some()
                    || v.iscsi.is_some()
            });
        if has_disk {
            self.invalidate_predicates(node_name, &names(&[NO_DISK_CONFLICT_PRED]));
        }
    }

    /// Number of nodes with cached results
    pub fn node_count(&self) -> usize {
        self.algorithm_cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::predicate_fn;
    use crate::test_util::{make_node, make_pod, with_labels};
    use k8s_openapi::api::core::v1::{
        AWSElasticBlockStoreVolumeSource, GCEPersistentDiskVolumeSource,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_predicate(
        name: &str,
        fit: bool,
    ) -> (Arc<dyn FitPredicate>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let predicate = predicate_fn(name, move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(if fit {
                PredicateResult::fit()
            } else {
                PredicateResult::fail(PredicateFailureReason::NodeNotReady)
            })
        });
        (predicate, calls)
    }

    fn run(
        cache: &EquivalenceCache,
        predicate: &Arc<dyn FitPredicate>,
        node_info: &NodeInfo,
        fresh: bool,
    ) -> PredicateResult {
        let pod = make_pod("p", "1", "1Gi", 0);
        let class = cache.equivalence_class_info(&pod).unwrap();
        cache
            .run_predicate(
                predicate.as_ref(),
                predicate.name(),
                &pod,
                &PredicateMetadata::new(&pod),
                node_info,
                &class,
                fresh,
            )
            .unwrap()
    }

    #[test]
    fn test_hash_ignores_nil_versus_empty() {
        let plain = make_pod("a", "1", "1Gi", 0);

        let mut empty = with_labels(make_pod("b", "1", "1Gi", 0), &[]);
        let spec = empty.spec.as_mut().unwrap();
        spec.tolerations = Some(vec![]);
        spec.volumes = Some(vec![]);
        spec.init_containers = Some(vec![]);
        spec.node_selector = Some(BTreeMap::new());
        spec.containers[0].ports = Some(vec![]);

        assert_eq!(equivalence_hash(&plain), equivalence_hash(&empty));
        assert!(equivalence_hash(&plain).is_some());
    }

    #[test]
    fn test_hash_ignores_name_and_priority() {
        let a = make_pod("a", "1", "1Gi", 0);
        let b = make_pod("b", "1", "1Gi", 100);
        assert_eq!(equivalence_hash(&a), equivalence_hash(&b));
    }

    #[test]
    fn test_hash_differs_on_relevant_fields() {
        let a = make_pod("a", "1", "1Gi", 0);
        let labelled = with_labels(make_pod("a", "1", "1Gi", 0), &[("app", "web")]);
        let bigger = make_pod("a", "2", "1Gi", 0);

        assert_ne!(equivalence_hash(&a), equivalence_hash(&labelled));
        assert_ne!(equivalence_hash(&a), equivalence_hash(&bigger));
    }

    #[test]
    fn test_cached_result_skips_predicate() {
        let cache = EquivalenceCache::new();
        let (predicate, calls) = counting_predicate("Counting", true);
        let node_info = NodeInfo::with_node(make_node("node1", "4", "8Gi", 10), vec![]);

        assert!(run(&cache, &predicate, &node_info, true).fit);
        assert!(run(&cache, &predicate, &node_info, true).fit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_reasons_are_cached() {
        let cache = EquivalenceCache::new();
        let (predicate, calls) = counting_predicate("Failing", false);
        let node_info = NodeInfo::with_node(make_node("node1", "4", "8Gi", 10), vec![]);

        run(&cache, &predicate, &node_info, true);
        let second = run(&cache, &predicate, &node_info, true);
        assert_eq!(second.reasons, vec![PredicateFailureReason::NodeNotReady]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_result_not_stored() {
        let cache = EquivalenceCache::new();
        let (predicate, calls) = counting_predicate("Counting", true);
        let node_info = NodeInfo::with_node(make_node("node1", "4", "8Gi", 10), vec![]);

        run(&cache, &predicate, &node_info, false);
        run(&cache, &predicate, &node_info, false);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let hash = equivalence_hash(&make_pod("p", "1", "1Gi", 0)).unwrap();
        assert!(cache.lookup_result("node1", "Counting", hash).is_none());
    }

    #[test]
    fn test_errors_not_cached() {
        let cache = EquivalenceCache::new();
        let predicate = predicate_fn("Broken", |_, _, _| {
            Err(SchedulerError::internal_error("boom"))
        });
        let node_info = NodeInfo::with_node(make_node("node1", "4", "8Gi", 10), vec![]);
        let pod = make_pod("p", "1", "1Gi", 0);
        let class = cache.equivalence_class_info(&pod).unwrap();

        let result = cache.run_predicate(
            predicate.as_ref(),
            "Broken",
            &pod,
            &PredicateMetadata::new(&pod),
            &node_info,
            &class,
            true,
        );
        assert!(result.is_err());
        assert!(cache.lookup_result("node1", "Broken", class.hash).is_none());
    }

    #[test]
    fn test_invalidate_node() {
        let cache = EquivalenceCache::new();
        let (predicate, calls) = counting_predicate("Counting", true);
        let node1 = NodeInfo::with_node(make_node("node1", "4", "8Gi", 10), vec![]);
        let node2 = NodeInfo::with_node(make_node("node2", "4", "8Gi", 10), vec![]);

        run(&cache, &predicate, &node1, true);
        run(&cache, &predicate, &node2, true);
        assert_eq!(cache.node_count(), 2);

        cache.invalidate_node("node1");
        run(&cache, &predicate, &node1, true);
        run(&cache, &predicate, &node2, true);

        // node1 recomputed, node2 served from cache
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_invalidate_for_pod_add_only_touches_mounted_volume_kinds() {
        let cache = EquivalenceCache::new();
        let hash = 7;
        for predicate in [
            GENERAL_PRED,
            POD_FITS_RESOURCES_PRED,
            POD_FITS_HOST_PORTS_PRED,
            MAX_EBS_VOLUME_COUNT_PRED,
            MAX_GCE_PD_VOLUME_COUNT_PRED,
            MATCH_INTER_POD_AFFINITY_PRED,
        ] {
            cache.update_result("node1", predicate, hash, &PredicateResult::fit());
        }

        let mut pod = make_pod("p", "1", "1Gi", 0);
        pod.spec.as_mut().unwrap().volumes = Some(vec![Volume {
            name: "data".to_string(),
            aws_elastic_block_store: Some(AWSElasticBlockStoreVolumeSource {
                volume_id: "vol-1".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        cache.invalidate_for_pod_add(&pod, "node1");

        assert!(cache.lookup_result("node1", GENERAL_PRED, hash).is_none());
        assert!(cache.lookup_result("node1", POD_FITS_RESOURCES_PRED, hash).is_none());
        assert!(cache.lookup_result("node1", POD_FITS_HOST_PORTS_PRED, hash).is_none());
        assert!(cache.lookup_result("node1", MAX_EBS_VOLUME_COUNT_PRED, hash).is_none());
        assert!(cache.lookup_result("node1", MAX_GCE_PD_VOLUME_COUNT_PRED, hash).is_some());
        assert!(cache.lookup_result("node1", MATCH_INTER_POD_AFFINITY_PRED, hash).is_some());
    }

    #[test]
    fn test_invalidate_for_pod_delete() {
        let cache = EquivalenceCache::new();
        let hash = 7;
        for node in ["node1", "node2"] {
            for predicate in [GENERAL_PRED, MATCH_INTER_POD_AFFINITY_PRED, NO_DISK_CONFLICT_PRED] {
                cache.update_result(node, predicate, hash, &PredicateResult::fit());
            }
        }

        let mut pod = crate::test_util::on_node(make_pod("p", "1", "1Gi", 0), "node1");
        pod.spec.as_mut().unwrap().volumes = Some(vec![Volume {
            name: "disk".to_string(),
            gce_persistent_disk: Some(GCEPersistentDiskVolumeSource {
                pd_name: "pd-1".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        cache.invalidate_for_pod_delete(&pod);

        assert!(cache.lookup_result("node1", GENERAL_PRED, hash).is_none());
        assert!(cache.lookup_result("node1", NO_DISK_CONFLICT_PRED, hash).is_none());
        assert!(cache.lookup_result("node2", MATCH_INTER_POD_AFFINITY_PRED, hash).is_none());
        assert!(cache.lookup_result("node2", GENERAL_PRED, hash).is_some());
        assert!(cache.lookup_result("node2", NO_DISK_CONFLICT_PRED, hash).is_some());
    }

    #[test]
    fn test_predicate_maps_evicted_past_capacity() {
        let cache = EquivalenceCache::new();
        for i in 0..=MAX_CACHE_ENTRIES {
            cache.update_result("node1", &format!("Pred{}", i), 1, &PredicateResult::fit());
        }
        assert!(cache.lookup_result("node1", "Pred0", 1).is_none());
        assert!(cache
            .lookup_result("node1", &format!("Pred{}", MAX_CACHE_ENTRIES), 1)
            .is_some());
    }
}
