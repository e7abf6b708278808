//! Reddwarf Core - Fundamental types shared by the Reddwarf scheduler
//!
//! This crate provides:
//! - Re-exports of the Kubernetes resource types the scheduler works on
//! - Resource quantity parsing and arithmetic
//! - Scheduling accessors for pods (priority, identity, requests, ports)
//! - Error types with miette diagnostics
//! - Serialization helpers

pub mod error;
pub mod pod;
pub mod resources;

// Re-export commonly used types
pub use error::{ReddwarfError, Result};
pub use pod::{
    higher_priority_first, pod_full_name, pod_host_ports, pod_is_terminating, pod_name,
    pod_namespace, pod_node_name, pod_nominated_node_name, pod_priority,
};
pub use resources::{node_allocatable, pod_non_zero_request, pod_resource_request, ResourceQuantities};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim, Pod};
pub use k8s_openapi::api::policy::v1::PodDisruptionBudget;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Serialize a resource to JSON
pub fn to_json<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string(resource).map_err(|e| {
        ReddwarfError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a resource to pretty JSON
pub fn to_json_pretty<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string_pretty(resource).map_err(|e| {
        ReddwarfError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from YAML (JSON is accepted as well)
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        ReddwarfError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}
