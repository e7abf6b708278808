//! Matching pods against pod disruption budgets

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use reddwarf_core::{pod_namespace, Pod, PodDisruptionBudget};
use std::collections::BTreeMap;
use tracing::warn;

/// Whether a label selector selects the given labels.
///
/// Returns `None` for a selector with an unknown operator.
pub fn label_selector_matches(
    selector: &LabelSelector,
    labels: &BTreeMap<String, String>,
) -> Option<bool> {
    if let Some(match_labels) = &selector.match_labels {
        if match_labels.iter().any(|(k, v)| labels.get(k) != Some(v)) {
            return Some(false);
        }
    }

    for requirement in selector.match_expressions.as_deref().unwrap_or(&[]) {
        let value = labels.get(&requirement.key);
        let values = requirement.values.as_deref().unwrap_or(&[]);
        let matched = match requirement.operator.as_str() {
            "In" => value.is_some_and(|v| values.contains(v)),
            "NotIn" => !value.is_some_and(|v| values.contains(v)),
            "Exists" => value.is_some(),
            "DoesNotExist" => value.is_none(),
            _ => return None,
        };
        if !matched {
            return Some(false);
        }
    }

    Some(true)
}

fn selector_is_empty(selector: &LabelSelector) -> bool {
    selector.match_labels.as_ref().map_or(true, |m| m.is_empty())
        && selector
            .match_expressions
            .as_ref()
            .map_or(true, |e| e.is_empty())
}

/// Split pods into those whose eviction would violate a disruption budget
/// and those whose eviction would not. Order is preserved within each group.
///
/// Each budget's allowed disruptions are consumed as matching pods are
/// visited; a pod is violating once a matching budget has none left. A
/// budget with an empty selector matches nothing, and neither does a pod
/// without labels.
pub fn filter_pods_with_pdb_violation(
    pods: &[Pod],
    pdbs: &[PodDisruptionBudget],
) -> (Vec<Pod>, Vec<Pod>) {
    let mut allowed: Vec<i32> = pdbs
        .iter()
        .map(|pdb| pdb.status.as_ref().map_or(0, |s| s.disruptions_allowed))
        .collect();

    let mut violating = Vec::new();
    let mut non_violating = Vec::new();

    for pod in pods {
        let mut violated = false;
        let labels = pod.metadata.labels.clone().unwrap_or_default();

        if !labels.is_empty() {
            for (i, pdb) in pdbs.iter().enumerate() {
                if pdb.metadata.namespace.as_deref().unwrap_or("default") != pod_namespace(pod) {
                    continue;
                }
                let Some(selector) = pdb.spec.as_ref().and_then(|s| s.selector.as_ref()) else {
                    continue;
                };
                if selector_is_empty(selector) {
                    continue;
                }
                match label_selector_matches(selector, &labels) {
                    Some(true) => {}
                    Some(false) => continue,
                    None => {
                        warn!(
                            "Skipping disruption budget {} with an invalid selector",
                            pdb.metadata.name.as_deref().unwrap_or("unknown")
                        );
                        continue;
                    }
                }

                allowed[i] -= 1;
                if allowed[i] < 0 {
                    violated = true;
                }
            }
        }

        if violated {
            violating.push(pod.clone());
        } else {
            non_violating.push(pod.clone());
        }
    }

    (violating, non_violating)
}
