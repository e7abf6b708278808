//! Scheduling-relevant accessors for pods

use k8s_openapi::api::core::v1::Pod;
use std::cmp::Ordering;

/// Priority used when a pod does not carry one
pub const DEFAULT_POD_PRIORITY: i32 = 0;

/// Namespace assumed for pods without one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Get the scheduling priority of a pod
pub fn pod_priority(pod: &Pod) -> i32 {
    pod.spec
        .as_ref()
        .and_then(|s| s.priority)
        .unwrap_or(DEFAULT_POD_PRIORITY)
}

/// Namespace of a pod, defaulting to "default"
pub fn pod_namespace(pod: &Pod) -> &str {
    pod.metadata
        .namespace
        .as_deref()
        .unwrap_or(DEFAULT_NAMESPACE)
}

/// Name of a pod, or "unknown" when it has none
pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("unknown")
}

/// `namespace/name` identity of a pod
pub fn pod_full_name(pod: &Pod) -> String {
    format!("{}/{}", pod_namespace(pod), pod_name(pod))
}

/// Node the pod is bound to, if any
pub fn pod_node_name(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// Node the pod was nominated to by an earlier preemption, if any
pub fn pod_nominated_node_name(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|s| s.nominated_node_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// Whether the pod is being torn down
pub fn pod_is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Host ports requested by the pod's containers as `(ip, protocol, port)`.
///
/// Empty host IPs are reported as "0.0.0.0" and empty protocols as "TCP".
pub fn pod_host_ports(pod: &Pod) -> Vec<(String, String, i32)> {
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };

    spec.containers
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .filter_map(|p| {
            let port = p.host_port.filter(|p| *p > 0)?;
            let ip = p
                .host_ip
                .clone()
                .filter(|ip| !ip.is_empty())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            let protocol = p
                .protocol
                .clone()
                .filter(|proto| !proto.is_empty())
                .unwrap_or_else(|| "TCP".to_string());
            Some((ip, protocol, port))
        })
        .collect()
}

/// Order pods from highest to lowest priority
pub fn higher_priority_first(a: &Pod, b: &Pod) -> Ordering {
    pod_priority(b).cmp(&pod_priority(a))
}
