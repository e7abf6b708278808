use crate::node_info::NodeInfo;
use crate::types::{PredicateFailureReason, PredicateResult};
use crate::{Result, SchedulerError};
use k8s_openapi::api::core::v1::{
    NodeSelectorRequirement, NodeSelectorTerm, Taint, Toleration, Volume,
};
use reddwarf_core::{pod_host_ports, pod_node_name, pod_resource_request, Node, Pod, ResourceQuantities};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

pub const CHECK_NODE_CONDITION_PRED: &str = "CheckNodeCondition";
pub const CHECK_NODE_UNSCHEDULABLE_PRED: &str = "CheckNodeUnschedulable";
pub const GENERAL_PRED: &str = "GeneralPredicates";
pub const HOST_NAME_PRED: &str = "HostName";
pub const POD_FITS_HOST_PORTS_PRED: &str = "PodFitsHostPorts";
pub const MATCH_NODE_SELECTOR_PRED: &str = "MatchNodeSelector";
pub const POD_FITS_RESOURCES_PRED: &str = "PodFitsResources";
pub const NO_DISK_CONFLICT_PRED: &str = "NoDiskConflict";
pub const POD_TOLERATES_NODE_TAINTS_PRED: &str = "PodToleratesNodeTaints";
pub const POD_TOLERATES_NODE_NO_EXECUTE_TAINTS_PRED: &str = "PodToleratesNodeNoExecuteTaints";
pub const CHECK_NODE_LABEL_PRESENCE_PRED: &str = "CheckNodeLabelPresence";
pub const CHECK_SERVICE_AFFINITY_PRED: &str = "CheckServiceAffinity";
pub const MAX_EBS_VOLUME_COUNT_PRED: &str = "MaxEBSVolumeCount";
pub const MAX_GCE_PD_VOLUME_COUNT_PRED: &str = "MaxGCEPDVolumeCount";
pub const MAX_AZURE_DISK_VOLUME_COUNT_PRED: &str = "MaxAzureDiskVolumeCount";
pub const CHECK_VOLUME_BINDING_PRED: &str = "CheckVolumeBinding";
pub const NO_VOLUME_ZONE_CONFLICT_PRED: &str = "NoVolumeZoneConflict";
pub const CHECK_NODE_MEMORY_PRESSURE_PRED: &str = "CheckNodeMemoryPressure";
pub const CHECK_NODE_DISK_PRESSURE_PRED: &str = "CheckNodeDiskPressure";
pub const MATCH_INTER_POD_AFFINITY_PRED: &str = "MatchInterPodAffinity";

/// Canonical evaluation order. Cheap, general checks come first so that,
/// when evaluation short-circuits, expensive predicates only run on nodes
/// that already passed the basic ones.
pub const PREDICATE_ORDERING: [&str; 20] = [
    CHECK_NODE_CONDITION_PRED,
    CHECK_NODE_UNSCHEDULABLE_PRED,
    GENERAL_PRED,
    HOST_NAME_PRED,
    POD_FITS_HOST_PORTS_PRED,
    MATCH_NODE_SELECTOR_PRED,
    POD_FITS_RESOURCES_PRED,
    NO_DISK_CONFLICT_PRED,
    POD_TOLERATES_NODE_TAINTS_PRED,
    POD_TOLERATES_NODE_NO_EXECUTE_TAINTS_PRED,
    CHECK_NODE_LABEL_PRESENCE_PRED,
    CHECK_SERVICE_AFFINITY_PRED,
    MAX_EBS_VOLUME_COUNT_PRED,
    MAX_GCE_PD_VOLUME_COUNT_PRED,
    MAX_AZURE_DISK_VOLUME_COUNT_PRED,
    CHECK_VOLUME_BINDING_PRED,
    NO_VOLUME_ZONE_CONFLICT_PRED,
    CHECK_NODE_MEMORY_PRESSURE_PRED,
    CHECK_NODE_DISK_PRESSURE_PRED,
    MATCH_INTER_POD_AFFINITY_PRED,
];

/// Facts about the pod being scheduled, computed once per attempt and shared
/// by every predicate invocation
#[derive(Debug, Clone, Default)]
pub struct PredicateMetadata {
    /// Effective resource request of the pod
    pub pod_request: ResourceQuantities,
    /// Host ports the pod wants as `(ip, protocol, port)`
    pub pod_ports: Vec<(String, String, i32)>,
}

impl PredicateMetadata {
    pub fn new(pod: &Pod) -> Self {
        Self {
            pod_request: pod_resource_request(pod),
            pod_ports: pod_host_ports(pod),
        }
    }
}

/// Filter predicate trait
pub trait FitPredicate: Send + Sync {
    /// Check whether the pod fits on the node.
    ///
    /// An `Err` means the predicate could not be evaluated; it aborts the
    /// whole filtering pass.
    fn predicate(
        &self,
        pod: &Pod,
        meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<PredicateResult>;

    /// Name of the predicate
    fn name(&self) -> &str;
}

/// A predicate backed by a closure
pub struct PredicateFn<F> {
    name: String,
    f: F,
}

impl<F> FitPredicate for PredicateFn<F>
where
    F: Fn(&Pod, &PredicateMetadata, &NodeInfo) -> Result<PredicateResult> + Send + Sync,
{
    fn predicate(
        &self,
        pod: &Pod,
        meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<PredicateResult> {
        (self.f)(pod, meta, node_info)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap a closure as a named predicate
pub fn predicate_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn FitPredicate>
where
    F: Fn(&Pod, &PredicateMetadata, &NodeInfo) -> Result<PredicateResult> + Send + Sync + 'static,
{
    Arc::new(PredicateFn {
        name: name.into(),
        f,
    })
}

/// Named predicates with a stable evaluation order.
///
/// Predicates named in [`PREDICATE_ORDERING`] run in that order; any other
/// registered predicate runs afterwards, sorted by name.
#[derive(Clone, Default)]
pub struct PredicateSet {
    predicates: HashMap<String, Arc<dyn FitPredicate>>,
    ordering: Vec<String>,
}

impl PredicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate under its name, replacing any previous one
    pub fn insert(&mut self, predicate: Arc<dyn FitPredicate>) {
        self.predicates
            .insert(predicate.name().to_string(), predicate);
        self.rebuild_ordering();
    }

    fn rebuild_ordering(&mut self) {
        let mut ordering: Vec<String> = PREDICATE_ORDERING
            .iter()
            .filter(|name| self.predicates.contains_key(**name))
            .map(|name| name.to_string())
            .collect();

        let mut extra: Vec<String> = self
            .predicates
            .keys()
            .filter(|name| !PREDICATE_ORDERING.contains(&name.as_str()))
            .cloned()
            .collect();
        extra.sort();
        ordering.extend(extra);

        self.ordering = ordering;
    }

    /// Predicates in evaluation order
    pub fn ordered(&self) -> impl Iterator<Item = (&str, &Arc<dyn FitPredicate>)> {
        self.ordering
            .iter()
            .filter_map(|name| self.predicates.get(name).map(|p| (name.as_str(), p)))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn FitPredicate>> {
        self.predicates.get(name)
    }

    pub fn names(&self) -> &[String] {
        &self.ordering
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl FromIterator<Arc<dyn FitPredicate>> for PredicateSet {
    fn from_iter<T: IntoIterator<Item = Arc<dyn FitPredicate>>>(iter: T) -> Self {
        let mut set = Self::new();
        for predicate in iter {
            set.predicates
                .insert(predicate.name().to_string(), predicate);
        }
        set.rebuild_ordering();
        set
    }
}

fn node_or_error<'a>(predicate: &str, node_info: &'a NodeInfo) -> Result<&'a Node> {
    node_info
        .node()
        .ok_or_else(|| SchedulerError::predicate_failed(predicate, "<none>", "node not found"))
}

fn node_labels(node: &Node) -> BTreeMap<String, String> {
    node.metadata.labels.clone().unwrap_or_default()
}

/// Whether a toleration matches a taint
pub fn toleration_tolerates_taint(toleration: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref().filter(|e| !e.is_empty()) {
        if effect != taint.effect {
            return false;
        }
    }

    let key = toleration.key.as_deref().unwrap_or("");
    let operator = toleration.operator.as_deref().unwrap_or("Equal");

    // An empty key with Exists tolerates everything
    if key.is_empty() {
        return operator == "Exists";
    }
    if key != taint.key {
        return false;
    }

    match operator {
        "Exists" => true,
        "Equal" | "" => {
            toleration.value.as_deref().unwrap_or("") == taint.value.as_deref().unwrap_or("")
        }
        _ => false,
    }
}

/// Whether any toleration in the list matches the taint
pub fn taint_tolerated(tolerations: &[Toleration], taint: &Taint) -> bool {
    tolerations
        .iter()
        .any(|t| toleration_tolerates_taint(t, taint))
}

fn pod_tolerations(pod: &Pod) -> &[Toleration] {
    pod.spec
        .as_ref()
        .and_then(|s| s.tolerations.as_deref())
        .unwrap_or(&[])
}

/// Node condition check: ready, network available, schedulable
pub struct CheckNodeCondition;

impl FitPredicate for CheckNodeCondition {
    fn predicate(
        &self,
        _pod: &Pod,
        _meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<PredicateResult> {
        let node = node_or_error(self.name(), node_info)?;
        let mut reasons = Vec::new();

        let conditions = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_deref())
            .unwrap_or(&[]);

        for condition in conditions {
            match (condition.type_.as_str(), condition.status.as_str()) {
                ("Ready", "True") => {}
                ("Ready", "False") => reasons.push(PredicateFailureReason::NodeNotReady),
                ("Ready", _) => reasons.push(PredicateFailureReason::NodeUnknownCondition),
                ("NetworkUnavailable", status) if status != "False" => {
                    reasons.push(PredicateFailureReason::NodeNetworkUnavailable)
                }
                _ => {}
            }
        }

        if node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false)
        {
            reasons.push(PredicateFailureReason::NodeUnschedulable);
        }

        Ok(PredicateResult::from_reasons(reasons))
    }

    fn name(&self) -> &str {
        CHECK_NODE_CONDITION_PRED
    }
}

fn check_resources(meta: &PredicateMetadata, node_info: &NodeInfo) -> Vec<PredicateFailureReason> {
    let mut reasons = Vec::new();

    let pod_count = node_info.pods().len() as i64;
    let allowed = node_info.allowed_pod_number();
    if pod_count.saturating_add(1) > allowed {
        reasons.push(PredicateFailureReason::insufficient("pods", 1, pod_count, allowed));
    }

    let request = &meta.pod_request;
    if request.is_zero() {
        return reasons;
    }

    let allocatable = node_info.allocatable();
    let requested = node_info.requested();

    debug!(
        "Node {} has CPU: {}/{} milli, Memory: {}/{} bytes",
        node_info.node_name().unwrap_or("<none>"),
        requested.cpu_millicores,
        allocatable.cpu_millicores,
        requested.memory_bytes,
        allocatable.memory_bytes
    );

    if allocatable.cpu_millicores < request.cpu_millicores.saturating_add(requested.cpu_millicores) {
        reasons.push(PredicateFailureReason::insufficient(
            "cpu",
            request.cpu_millicores,
            requested.cpu_millicores,
            allocatable.cpu_millicores,
        ));
    }

    if allocatable.memory_bytes < request.memory_bytes.saturating_add(requested.memory_bytes) {
        reasons.push(PredicateFailureReason::insufficient(
            "memory",
            request.memory_bytes,
            requested.memory_bytes,
            allocatable.memory_bytes,
        ));
    }

    reasons
}

/// Filter for pod resource requirements
pub struct PodFitsResources;

impl FitPredicate for PodFitsResources {
    fn predicate(
        &self,
        _pod: &Pod,
        meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<PredicateResult> {
        node_or_error(self.name(), node_info)?;
        Ok(PredicateResult::from_reasons(check_resources(meta, node_info)))
    }

    fn name(&self) -> &str {
        POD_FITS_RESOURCES_PRED
    }
}

fn check_host_name(pod: &Pod, node: &Node) -> Option<PredicateFailureReason> {
    let wanted = pod_node_name(pod)?;
    if node.metadata.name.as_deref() == Some(wanted) {
        None
    } else {
        Some(PredicateFailureReason::PodNotMatchHostName)
    }
}

/// Filter for pods that ask for a specific node by name
pub struct HostName;

impl FitPredicate for HostName {
    fn predicate(
        &self,
        pod: &Pod,
        _meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<PredicateResult> {
        let node = node_or_error(self.name(), node_info)?;
        Ok(match check_host_name(pod, node) {
            Some(reason) => PredicateResult::fail(reason),
            None => PredicateResult::fit(),
        })
    }

    fn name(&self) -> &str {
        HOST_NAME_PRED
    }
}

fn ports_conflict(wanted: &(String, String, i32), used: &(String, String, i32)) -> bool {
    let (wanted_ip, wanted_proto, wanted_port) = wanted;
    let (used_ip, used_proto, used_port) = used;
    if wanted_port != used_port || wanted_proto != used_proto {
        return false;
    }
    wanted_ip == used_ip || wanted_ip == "0.0.0.0" || used_ip == "0.0.0.0"
}

fn check_host_ports(meta: &PredicateMetadata, node_info: &NodeInfo) -> Option<PredicateFailureReason> {
    if meta.pod_ports.is_empty() {
        return None;
    }
    let used = node_info.used_ports();
    let conflict = meta
        .pod_ports
        .iter()
        .any(|wanted| used.iter().any(|u| ports_conflict(wanted, u)));
    conflict.then_some(PredicateFailureReason::PodNotFitsHostPorts)
}

/// Filter for host port conflicts
pub struct PodFitsHostPorts;

impl FitPredicate for PodFitsHostPorts {
    fn predicate(
        &self,
        _pod: &Pod,
        meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<PredicateResult> {
        Ok(match check_host_ports(meta, node_info) {
            Some(reason) => PredicateResult::fail(reason),
            None => PredicateResult::fit(),
        })
    }

    fn name(&self) -> &str {
        POD_FITS_HOST_PORTS_PRED
    }
}

fn requirement_matches(requirement: &NodeSelectorRequirement, value: Option<&str>) -> bool {
    let values = requirement.values.as_deref().unwrap_or(&[]);
    match requirement.operator.as_str() {
        "In" => value.is_some_and(|v| values.iter().any(|x| x == v)),
        "NotIn" => !value.is_some_and(|v| values.iter().any(|x| x == v)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        "Gt" | "Lt" => {
            let (Some(actual), Some(bound)) = (
                value.and_then(|v| v.parse::<i64>().ok()),
                values.first().and_then(|v| v.parse::<i64>().ok()),
            ) else {
                return false;
            };
            if requirement.operator == "Gt" {
                actual > bound
            } else {
                actual < bound
            }
        }
        _ => false,
    }
}

fn term_matches(term: &NodeSelectorTerm, node: &Node, labels: &BTreeMap<String, String>) -> bool {
    let expressions = term.match_expressions.as_deref().unwrap_or(&[]);
    let fields = term.match_fields.as_deref().unwrap_or(&[]);
    if expressions.is_empty() && fields.is_empty() {
        return false;
    }

    let labels_ok = expressions
        .iter()
        .all(|req| requirement_matches(req, labels.get(&req.key).map(String::as_str)));

    let fields_ok = fields.iter().all(|req| {
        let value = match req.key.as_str() {
            "metadata.name" => node.metadata.name.as_deref(),
            _ => None,
        };
        requirement_matches(req, value)
    });

    labels_ok && fields_ok
}

fn check_node_selector(pod: &Pod, node: &Node) -> Option<PredicateFailureReason> {
    let spec = pod.spec.as_ref()?;
    let labels = node_labels(node);

    if let Some(selector) = &spec.node_selector {
        for (key, value) in selector {
            if labels.get(key) != Some(value) {
                debug!("Node selector mismatch: {}={}", key, value);
                return Some(PredicateFailureReason::NodeSelectorNotMatch);
            }
        }
    }

    let required = spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|na| na.required_during_scheduling_ignored_during_execution.as_ref());

    if let Some(required) = required {
        let matched = required
            .node_selector_terms
            .iter()
            .any(|term| term_matches(term, node, &labels));
        if !matched {
            return Some(PredicateFailureReason::NodeSelectorNotMatch);
        }
    }

    None
}

/// Filter for node selector and required node affinity
pub struct MatchNodeSelector;

impl FitPredicate for MatchNodeSelector {
    fn predicate(
        &self,
        pod: &Pod,
        _meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<PredicateResult> {
        let node = node_or_error(self.name(), node_info)?;
        Ok(match check_node_selector(pod, node) {
            Some(reason) => PredicateResult::fail(reason),
            None => PredicateResult::fit(),
        })
    }

    fn name(&self) -> &str {
        MATCH_NODE_SELECTOR_PRED
    }
}

/// Resources, host name, host ports and node selector in one pass.
///
/// Unlike evaluating the individual predicates in sequence, this always
/// reports every failing reason of the group.
pub struct GeneralPredicates;

impl FitPredicate for GeneralPredicates {
    fn predicate(
        &self,
        pod: &Pod,
        meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<PredicateResult> {
        let node = node_or_error(self.name(), node_info)?;

        let mut reasons = check_resources(meta, node_info);
        reasons.extend(check_host_name(pod, node));
        reasons.extend(check_host_ports(meta, node_info));
        reasons.extend(check_node_selector(pod, node));

        Ok(PredicateResult::from_reasons(reasons))
    }

    fn name(&self) -> &str {
        GENERAL_PRED
    }
}

/// Filter for taints and tolerations (NoSchedule and NoExecute)
pub struct PodToleratesNodeTaints;

impl FitPredicate for PodToleratesNodeTaints {
    fn predicate(
        &self,
        pod: &Pod,
        _meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<PredicateResult> {
        node_or_error(self.name(), node_info)?;
        let tolerations = pod_tolerations(pod);

        for taint in node_info.taints() {
            if taint.effect != "NoSchedule" && taint.effect != "NoExecute" {
                continue;
            }
            if !taint_tolerated(tolerations, taint) {
                debug!(
                    "Pod does not tolerate taint: {}={}",
                    taint.key, taint.effect
                );
                return Ok(PredicateResult::fail(
                    PredicateFailureReason::TaintsTolerationsNotMatch,
                ));
            }
        }

        Ok(PredicateResult::fit())
    }

    fn name(&self) -> &str {
        POD_TOLERATES_NODE_TAINTS_PRED
    }
}

/// Cloud volume types with a per-node attach limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    AwsElasticBlockStore,
    GcePersistentDisk,
    AzureDisk,
}

impl VolumeKind {
    /// Identifier of the volume when it is of this kind
    pub fn volume_id(self, volume: &Volume) -> Option<&str> {
        match self {
            Self::AwsElasticBlockStore => volume
                .aws_elastic_block_store
                .as_ref()
                .map(|v| v.volume_id.as_str()),
            Self::GcePersistentDisk => volume
                .gce_persistent_disk
                .as_ref()
                .map(|v| v.pd_name.as_str()),
            Self::AzureDisk => volume.azure_disk.as_ref().map(|v| v.disk_name.as_str()),
        }
    }

    /// Name of the predicate counting volumes of this kind
    pub fn predicate_name(self) -> &'static str {
        match self {
            Self::AwsElasticBlockStore => MAX_EBS_VOLUME_COUNT_PRED,
            Self::GcePersistentDisk => MAX_GCE_PD_VOLUME_COUNT_PRED,
            Self::AzureDisk => MAX_AZURE_DISK_VOLUME_COUNT_PRED,
        }
    }

    /// Default number of volumes of this kind a node can attach
    pub fn default_max_volumes(self) -> usize {
        match self {
            Self::AwsElasticBlockStore => 39,
            Self::GcePersistentDisk => 16,
            Self::AzureDisk => 16,
        }
    }
}

/// Filter limiting how many volumes of one cloud kind a node attaches
pub struct MaxVolumeCount {
    kind: VolumeKind,
    max_volumes: usize,
}

impl MaxVolumeCount {
    pub fn new(kind: VolumeKind) -> Self {
        Self {
            kind,
            max_volumes: kind.default_max_volumes(),
        }
    }

    pub fn with_max_volumes(kind: VolumeKind, max_volumes: usize) -> Self {
        Self { kind, max_volumes }
    }

    fn volume_ids<'a>(&self, pod: &'a Pod) -> HashSet<&'a str> {
        pod.spec
            .as_ref()
            .and_then(|s| s.volumes.as_deref())
            .unwrap_or(&[])
            .iter()
            .filter_map(|v| self.kind.volume_id(v))
            .collect()
    }
}

impl FitPredicate for MaxVolumeCount {
    fn predicate(
        &self,
        pod: &Pod,
        _meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<PredicateResult> {
        let new_volumes = self.volume_ids(pod);
        if new_volumes.is_empty() {
            return Ok(PredicateResult::fit());
        }

        let existing: HashSet<&str> = node_info
            .pods()
            .iter()
            .flat_map(|p| self.volume_ids(p))
            .collect();

        let additional = new_volumes.difference(&existing).count();
        if existing.len() + additional > self.max_volumes {
            return Ok(PredicateResult::fail(
                PredicateFailureReason::MaxVolumeCountExceeded,
            ));
        }

        Ok(PredicateResult::fit())
    }

    fn name(&self) -> &str {
        self.kind.predicate_name()
    }
}

/// Names accepted by [`predicate_by_name`]
pub const REGISTERED_PREDICATES: [&str; 10] = [
    CHECK_NODE_CONDITION_PRED,
    GENERAL_PRED,
    HOST_NAME_PRED,
    POD_FITS_HOST_PORTS_PRED,
    MATCH_NODE_SELECTOR_PRED,
    POD_FITS_RESOURCES_PRED,
    POD_TOLERATES_NODE_TAINTS_PRED,
    MAX_EBS_VOLUME_COUNT_PRED,
    MAX_GCE_PD_VOLUME_COUNT_PRED,
    MAX_AZURE_DISK_VOLUME_COUNT_PRED,
];

/// Look up a built-in predicate
pub fn predicate_by_name(name: &str) -> Option<Arc<dyn FitPredicate>> {
    let predicate: Arc<dyn FitPredicate> = match name {
        CHECK_NODE_CONDITION_PRED => Arc::new(CheckNodeCondition),
        GENERAL_PRED => Arc::new(GeneralPredicates),
        HOST_NAME_PRED => Arc::new(HostName),
        POD_FITS_HOST_PORTS_PRED => Arc::new(PodFitsHostPorts),
        MATCH_NODE_SELECTOR_PRED => Arc::new(MatchNodeSelector),
        POD_FITS_RESOURCES_PRED => Arc::new(PodFitsResources),
        POD_TOLERATES_NODE_TAINTS_PRED => Arc::new(PodToleratesNodeTaints),
        MAX_EBS_VOLUME_COUNT_PRED => Arc::new(MaxVolumeCount::new(VolumeKind::AwsElasticBlockStore)),
        MAX_GCE_PD_VOLUME_COUNT_PRED => Arc::new(MaxVolumeCount::new(VolumeKind::GcePersistentDisk)),
        MAX_AZURE_DISK_VOLUME_COUNT_PRED => Arc::new(MaxVolumeCount::new(VolumeKind::AzureDisk)),
        _ => return None,
    };
    Some(predicate)
}

/// Get default filter predicates
pub fn default_predicates() -> PredicateSet {
    [
        CHECK_NODE_CONDITION_PRED,
        GENERAL_PRED,
        POD_TOLERATES_NODE_TAINTS_PRED,
        MAX_EBS_VOLUME_COUNT_PRED,
        MAX_GCE_PD_VOLUME_COUNT_PRED,
        MAX_AZURE_DISK_VOLUME_COUNT_PRED,
    ]
    .into_iter()
    .filter_map(predicate_by_name)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{make_node, make_pod, on_node};
    use k8s_openapi::api::core::v1::{
        AWSElasticBlockStoreVolumeSource, Affinity, NodeAffinity, NodeSelector,
    };

    fn info(node: Node, pods: Vec<Pod>) -> NodeInfo {
        NodeInfo::with_node(node, pods)
    }

    fn run(predicate: &dyn FitPredicate, pod: &Pod, node_info: &NodeInfo) -> PredicateResult {
        predicate
            .predicate(pod, &PredicateMetadata::new(pod), node_info)
            .unwrap()
    }

    fn ebs_pod(name: &str, volume_ids: &[&str]) -> Pod {
        let mut pod = make_pod(name, "100m", "128Mi", 0);
        pod.spec.as_mut().unwrap().volumes = Some(
            volume_ids
                .iter()
                .map(|id| Volume {
                    name: id.to_string(),
                    aws_elastic_block_store: Some(AWSElasticBlockStoreVolumeSource {
                        volume_id: id.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .collect(),
        );
        pod
    }

    #[test]
    fn test_pod_fits_resources_pass() {
        let node_info = info(make_node("node1", "4", "8Gi", 10), vec![]);
        let pod = make_pod("test-pod", "1", "1Gi", 0);

        assert!(run(&PodFitsResources, &pod, &node_info).fit);
    }

    #[test]
    fn test_pod_fits_resources_counts_existing_pods() {
        let node_info = info(
            make_node("node1", "2", "8Gi", 10),
            vec![make_pod("existing", "1500m", "1Gi", 0)],
        );
        let pod = make_pod("test-pod", "1", "1Gi", 0);

        let result = run(&PodFitsResources, &pod, &node_info);
        assert!(!result.fit);
        assert_eq!(
            result.reasons,
            vec![PredicateFailureReason::insufficient("cpu", 1000, 1500, 2000)]
        );
    }

    #[test]
    fn test_pod_fits_resources_fail_memory_and_pods() {
        let node_info = info(
            make_node("node1", "4", "1Gi", 1),
            vec![make_pod("existing", "100m", "128Mi", 0)],
        );
        let pod = make_pod("test-pod", "1", "2Gi", 0);

        let reasons: Vec<String> = run(&PodFitsResources, &pod, &node_info)
            .reasons
            .iter()
            .map(|r| r.reason())
            .collect();
        assert_eq!(reasons, vec!["Insufficient pods", "Insufficient memory"]);
    }

    #[test]
    fn test_pod_fits_resources_huge_requests() {
        let node_info = info(
            make_node("node1", "4", "7Ei", 10),
            vec![make_pod("existing", "100m", "5Ei", 0)],
        );
        let pod = make_pod("test-pod", "100m", "5Ei", 0);

        let reasons: Vec<String> = run(&PodFitsResources, &pod, &node_info)
            .reasons
            .iter()
            .map(|r| r.reason())
            .collect();
        assert_eq!(reasons, vec!["Insufficient memory"]);
    }

    #[test]
    fn test_node_selector() {
        let mut node = make_node("node1", "4", "8Gi", 10);
        node.metadata.labels = Some(BTreeMap::from([("disk".to_string(), "ssd".to_string())]));
        let node_info = info(node, vec![]);

        let mut pod = make_pod("test-pod", "1", "1Gi", 0);
        pod.spec.as_mut().unwrap().node_selector =
            Some(BTreeMap::from([("disk".to_string(), "ssd".to_string())]));
        assert!(run(&MatchNodeSelector, &pod, &node_info).fit);

        pod.spec.as_mut().unwrap().node_selector =
            Some(BTreeMap::from([("disk".to_string(), "hdd".to_string())]));
        assert_eq!(
            run(&MatchNodeSelector, &pod, &node_info).reasons,
            vec![PredicateFailureReason::NodeSelectorNotMatch]
        );
    }

    #[test]
    fn test_required_node_affinity() {
        let mut node = make_node("node1", "4", "8Gi", 10);
        node.metadata.labels = Some(BTreeMap::from([("zone".to_string(), "a".to_string())]));
        let node_info = info(node, vec![]);

        let affinity = |operator: &str, values: &[&str]| Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: "zone".to_string(),
                            operator: operator.to_string(),
                            values: Some(values.iter().map(|v| v.to_string()).collect()),
                        }]),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut pod = make_pod("test-pod", "1", "1Gi", 0);
        pod.spec.as_mut().unwrap().affinity = Some(affinity("In", &["a", "b"]));
        assert!(run(&MatchNodeSelector, &pod, &node_info).fit);

        pod.spec.as_mut().unwrap().affinity = Some(affinity("NotIn", &["a"]));
        assert!(!run(&MatchNodeSelector, &pod, &node_info).fit);
    }

    #[test]
    fn test_host_name_and_ports() {
        let node_info = info(make_node("node1", "4", "8Gi", 10), vec![]);
        let pod = on_node(make_pod("test-pod", "1", "1Gi", 0), "node2");
        assert_eq!(
            run(&HostName, &pod, &node_info).reasons,
            vec![PredicateFailureReason::PodNotMatchHostName]
        );

        let meta = PredicateMetadata {
            pod_ports: vec![("0.0.0.0".to_string(), "TCP".to_string(), 8080)],
            ..Default::default()
        };
        let mut used = make_pod("existing", "1", "1Gi", 0);
        used.spec.as_mut().unwrap().containers[0].ports = Some(vec![
            k8s_openapi::api::core::v1::ContainerPort {
                container_port: 80,
                host_port: Some(8080),
                host_ip: Some("10.0.0.1".to_string()),
                ..Default::default()
            },
        ]);
        let busy = info(make_node("node1", "4", "8Gi", 10), vec![used]);
        let result = PodFitsHostPorts
            .predicate(&make_pod("p", "1", "1Gi", 0), &meta, &busy)
            .unwrap();
        assert_eq!(result.reasons, vec![PredicateFailureReason::PodNotFitsHostPorts]);
    }

    #[test]
    fn test_taint_toleration() {
        let mut node = make_node("node1", "4", "8Gi", 10);
        node.spec.as_mut().unwrap().taints = Some(vec![
            Taint {
                key: "dedicated".to_string(),
                value: Some("gpu".to_string()),
                effect: "NoSchedule".to_string(),
                ..Default::default()
            },
            Taint {
                key: "soft".to_string(),
                effect: "PreferNoSchedule".to_string(),
                ..Default::default()
            },
        ]);
        let node_info = info(node, vec![]);

        let mut pod = make_pod("test-pod", "1", "1Gi", 0);
        assert_eq!(
            run(&PodToleratesNodeTaints, &pod, &node_info).reasons,
            vec![PredicateFailureReason::TaintsTolerationsNotMatch]
        );

        pod.spec.as_mut().unwrap().tolerations = Some(vec![Toleration {
            key: Some("dedicated".to_string()),
            operator: Some("Equal".to_string()),
            value: Some("gpu".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        }]);
        assert!(run(&PodToleratesNodeTaints, &pod, &node_info).fit);

        pod.spec.as_mut().unwrap().tolerations = Some(vec![Toleration {
            operator: Some("Exists".to_string()),
            ..Default::default()
        }]);
        assert!(run(&PodToleratesNodeTaints, &pod, &node_info).fit);
    }

    #[test]
    fn test_check_node_condition() {
        let mut node = make_node("node1", "4", "8Gi", 10);
        assert!(run(&CheckNodeCondition, &make_pod("p", "1", "1Gi", 0), &info(node.clone(), vec![])).fit);

        let status = node.status.as_mut().unwrap();
        status.conditions.as_mut().unwrap()[0].status = "False".to_string();
        node.spec.as_mut().unwrap().unschedulable = Some(true);

        let result = run(&CheckNodeCondition, &make_pod("p", "1", "1Gi", 0), &info(node, vec![]));
        assert_eq!(
            result.reasons,
            vec![
                PredicateFailureReason::NodeNotReady,
                PredicateFailureReason::NodeUnschedulable
            ]
        );
    }

    #[test]
    fn test_predicate_without_node_errors() {
        let node_info = NodeInfo::new(vec![]);
        let pod = make_pod("p", "1", "1Gi", 0);
        assert!(GeneralPredicates
            .predicate(&pod, &PredicateMetadata::new(&pod), &node_info)
            .is_err());
    }

    #[test]
    fn test_max_volume_count() {
        let predicate = MaxVolumeCount::with_max_volumes(VolumeKind::AwsElasticBlockStore, 2);
        let node_info = info(
            make_node("node1", "4", "8Gi", 10),
            vec![ebs_pod("existing", &["vol-1", "vol-2"])],
        );

        // Reusing an attached volume does not count twice
        assert!(run(&predicate, &ebs_pod("reuse", &["vol-1"]), &node_info).fit);
        assert_eq!(
            run(&predicate, &ebs_pod("new", &["vol-3"]), &node_info).reasons,
            vec![PredicateFailureReason::MaxVolumeCountExceeded]
        );
        assert!(run(&predicate, &make_pod("plain", "1", "1Gi", 0), &node_info).fit);
    }

    #[test]
    fn test_general_predicates_accumulates() {
        let mut node = make_node("node1", "1", "8Gi", 10);
        node.metadata.labels = Some(BTreeMap::new());
        let node_info = info(node, vec![]);

        let mut pod = on_node(make_pod("p", "2", "1Gi", 0), "other");
        pod.spec.as_mut().unwrap().node_selector =
            Some(BTreeMap::from([("disk".to_string(), "ssd".to_string())]));

        let result = run(&GeneralPredicates, &pod, &node_info);
        assert_eq!(result.reasons.len(), 3);
    }

    #[test]
    fn test_predicate_set_ordering() {
        let custom = predicate_fn("AAACustom", |_, _, _| Ok(PredicateResult::fit()));
        let set: PredicateSet = vec![
            custom,
            predicate_by_name(POD_TOLERATES_NODE_TAINTS_PRED).unwrap(),
            predicate_by_name(CHECK_NODE_CONDITION_PRED).unwrap(),
            predicate_by_name(GENERAL_PRED).unwrap(),
        ]
        .into_iter()
        .collect();

        let names: Vec<&str> = set.ordered().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec![
                CHECK_NODE_CONDITION_PRED,
                GENERAL_PRED,
                POD_TOLERATES_NODE_TAINTS_PRED,
                "AAACustom"
            ]
        );
    }

    #[test]
    fn test_default_predicates_registered() {
        let set = default_predicates();
        assert_eq!(set.len(), 6);
        assert!(set.get(GENERAL_PRED).is_some());
        assert!(predicate_by_name("NoSuchPredicate").is_none());
    }
}
