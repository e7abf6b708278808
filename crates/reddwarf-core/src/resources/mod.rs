pub mod quantities;

pub use quantities::{ResourceQuantities, DEFAULT_MEMORY_REQUEST, DEFAULT_MILLI_CPU_REQUEST};

use k8s_openapi::api::core::v1::{Container, Node, Pod};

fn container_request(container: &Container) -> ResourceQuantities {
    container
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .map(ResourceQuantities::from_k8s_resource_map)
        .unwrap_or_default()
}

fn container_non_zero_request(container: &Container) -> ResourceQuantities {
    let mut request = container_request(container);
    if request.cpu_millicores == 0 {
        request.cpu_millicores = DEFAULT_MILLI_CPU_REQUEST;
    }
    if request.memory_bytes == 0 {
        request.memory_bytes = DEFAULT_MEMORY_REQUEST;
    }
    request
}

/// Compute the effective resource request of a pod.
///
/// Regular containers run concurrently so their requests are summed. Init
/// containers run one at a time before them, so each one only has to fit on
/// its own: the result is raised to the largest init container request.
pub fn pod_resource_request(pod: &Pod) -> ResourceQuantities {
    let Some(spec) = pod.spec.as_ref() else {
        return ResourceQuantities::default();
    };

    let mut total = ResourceQuantities::default();
    for container in &spec.containers {
        total.add(&container_request(container));
    }

    for init in spec.init_containers.iter().flatten() {
        total.set_max(&container_request(init));
    }

    total.pods = 0;
    total
}

/// Like [`pod_resource_request`], but containers without a cpu or memory
/// request are charged the scoring defaults instead of zero.
pub fn pod_non_zero_request(pod: &Pod) -> ResourceQuantities {
    let Some(spec) = pod.spec.as_ref() else {
        return ResourceQuantities::default();
    };

    let mut total = ResourceQuantities::default();
    for container in &spec.containers {
        total.add(&container_non_zero_request(container));
    }
    total.pods = 0;
    total
}

/// Allocatable resources advertised by a node
pub fn node_allocatable(node: &Node) -> ResourceQuantities {
    node.status
        .as_ref()
        .and_then(|s| s.allocatable.as_ref())
        .map(ResourceQuantities::from_k8s_resource_map)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn container(cpu: Option<&str>, memory: Option<&str>) -> Container {
        let mut requests = BTreeMap::new();
        if let Some(cpu) = cpu {
            requests.insert("cpu".to_string(), Quantity(cpu.to_string()));
        }
        if let Some(memory) = memory {
            requests.insert("memory".to_string(), Quantity(memory.to_string()));
        }
        Container {
            name: "c".to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_request_sums_containers() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![
                    container(Some("500m"), Some("1Gi")),
                    container(Some("250m"), Some("512Mi")),
                ],
                ..Default::default()
            }),
            ..Default::default()
        };

        let request = pod_resource_request(&pod);
        assert_eq!(request.cpu_millicores, 750);
        assert_eq!(request.memory_bytes, 1536 * 1024 * 1024);
    }

    #[test]
    fn test_pod_request_init_container_max() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![container(Some("500m"), Some("1Gi"))],
                init_containers: Some(vec![container(Some("2"), Some("128Mi"))]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let request = pod_resource_request(&pod);
        assert_eq!(request.cpu_millicores, 2000);
        assert_eq!(request.memory_bytes, 1024 * 1024 * 1024);
    }

    #[test]
    fn test_non_zero_request_defaults() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![container(None, None), container(Some("1"), None)],
                ..Default::default()
            }),
            ..Default::default()
        };

        let request = pod_non_zero_request(&pod);
        assert_eq!(request.cpu_millicores, DEFAULT_MILLI_CPU_REQUEST + 1000);
        assert_eq!(request.memory_bytes, 2 * DEFAULT_MEMORY_REQUEST);
        assert!(pod_resource_request(&pod).memory_bytes == 0);
    }

    #[test]
    fn test_pod_request_saturates() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![container(None, Some("5Ei")), container(None, Some("5Ei"))],
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(pod_resource_request(&pod).memory_bytes, i64::MAX);
    }
}
