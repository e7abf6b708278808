//! Scheduling policy: which predicates and priorities to run

use crate::filter::{default_predicates, predicate_by_name, PredicateSet, REGISTERED_PREDICATES};
use crate::generic::{GenericScheduler, GenericSchedulerConfig};
use crate::listers::SchedulerCache;
use crate::score::{default_priorities, priority_by_name, PriorityConfig, REGISTERED_PRIORITIES};
use crate::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A predicate enabled by a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicatePolicy {
    pub name: String,
}

/// A priority enabled by a policy, with its weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPolicy {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: i64,
}

fn default_weight() -> i64 {
    1
}

/// Scheduling policy, read from YAML or JSON:
///
/// ```yaml
/// predicates:
///   - name: GeneralPredicates
///   - name: PodToleratesNodeTaints
/// priorities:
///   - name: LeastRequestedPriority
///     weight: 2
/// alwaysCheckAllPredicates: true
/// ```
///
/// An omitted list selects the default algorithms; an empty list disables
/// them all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicates: Option<Vec<PredicatePolicy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priorities: Option<Vec<PriorityPolicy>>,
    #[serde(default)]
    pub always_check_all_predicates: bool,
}

impl Policy {
    /// Parse a policy document
    pub fn from_yaml(data: &str) -> Result<Self> {
        reddwarf_core::from_yaml(data).map_err(|e| SchedulerError::invalid_policy(e.to_string()))
    }

    /// Load a policy file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::invalid_policy(format!("failed to read {}: {}", path.display(), e))
        })?;
        let policy = Self::from_yaml(&data)?;
        info!("Loaded scheduling policy from {}", path.display());
        Ok(policy)
    }

    /// Resolve the predicate names
    pub fn predicates(&self) -> Result<PredicateSet> {
        let Some(predicates) = &self.predicates else {
            return Ok(default_predicates());
        };

        predicates
            .iter()
            .map(|p| {
                predicate_by_name(&p.name).ok_or_else(|| {
                    SchedulerError::unknown_algorithm("predicate", &p.name, &REGISTERED_PREDICATES)
                })
            })
            .collect()
    }

    /// Resolve the priority names and check their weights
    pub fn priorities(&self) -> Result<Vec<PriorityConfig>> {
        let Some(priorities) = &self.priorities else {
            return Ok(default_priorities());
        };

        priorities
            .iter()
            .map(|p| {
                if p.weight <= 0 {
                    return Err(SchedulerError::invalid_policy(format!(
                        "priority {} should have a positive weight, got {}",
                        p.name, p.weight
                    )));
                }
                let function = priority_by_name(&p.name).ok_or_else(|| {
                    SchedulerError::unknown_algorithm("priority", &p.name, &REGISTERED_PRIORITIES)
                })?;
                Ok(PriorityConfig::new(function, p.weight))
            })
            .collect()
    }

    /// Algorithm settings carried by the policy
    pub fn generic_config(&self) -> GenericSchedulerConfig {
        GenericSchedulerConfig {
            always_check_all_predicates: self.always_check_all_predicates,
            ..Default::default()
        }
    }

    /// Build a scheduler running this policy over `cache`
    pub fn build(&self, cache: Arc<dyn SchedulerCache>) -> Result<GenericScheduler> {
        let predicates = self.predicates()?;
        let priorities = self.priorities()?;
        info!(
            "Using {} predicate(s) and {} priority function(s)",
            predicates.len(),
            priorities.len()
        );
        Ok(GenericScheduler::new(cache, predicates, priorities).with_config(self.generic_config()))
    }
}
