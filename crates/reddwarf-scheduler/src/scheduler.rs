use crate::cache::NodeCache;
use crate::generic::GenericScheduler;
use crate::queue::SchedulingQueue;
use crate::{Result, SchedulerError};
use k8s_openapi::api::core::v1::PodStatus;
use reddwarf_core::{pod_full_name, Pod};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between scheduling cycles
    pub schedule_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(1),
        }
    }
}

/// What happened to a pod in a scheduling attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// The pod was bound to a node
    Scheduled { pod: String, node: String },
    /// Pods were evicted and the pod is nominated to run on a node once
    /// they are gone
    Preempted {
        pod: String,
        node: String,
        victims: Vec<String>,
    },
    /// No node could take the pod
    Unschedulable { pod: String, reason: String },
}

impl fmt::Display for ScheduleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled { pod, node } => write!(f, "{} scheduled on {}", pod, node),
            Self::Preempted { pod, node, victims } => write!(
                f,
                "{} nominated on {}, evicting [{}]",
                pod,
                node,
                victims.join(", ")
            ),
            Self::Unschedulable { pod, reason } => write!(f, "{} unschedulable: {}", pod, reason),
        }
    }
}

/// Drives the scheduling algorithm over the queue.
///
/// Bindings and evictions are applied to the [`NodeCache`] directly. The
/// algorithm should share the queue as its nominated pod lister so that
/// nominated pods hold their place on the chosen node.
#[derive(Clone)]
pub struct Scheduler {
    algorithm: Arc<GenericScheduler>,
    cache: Arc<NodeCache>,
    queue: Arc<SchedulingQueue>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        algorithm: GenericScheduler,
        cache: Arc<NodeCache>,
        queue: Arc<SchedulingQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            algorithm: Arc::new(algorithm),
            cache,
            queue,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<NodeCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<SchedulingQueue> {
        &self.queue
    }

    /// Run scheduling cycles until cancelled
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting scheduler (interval: {:?})",
            self.config.schedule_interval
        );

        let mut interval = tokio::time::interval(self.config.schedule_interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {
                    let scheduler = self.clone();
                    let cycle = tokio::task::spawn_blocking(move || scheduler.schedule_cycle())
                        .await
                        .map_err(|e| SchedulerError::internal_error(format!("Scheduling cycle panicked: {}", e)))
                        .and_then(|result| result);
                    if let Err(e) = cycle {
                        error!("Scheduling cycle failed: {}", e);
                    }
                }
            }
        }
    }

    /// Attempt every queued pod once.
    ///
    /// When anything was evicted, parked pods go back to the active queue
    /// since the freed room may let them in.
    pub fn schedule_cycle(&self) -> Result<Vec<ScheduleOutcome>> {
        let mut outcomes = Vec::new();

        while let Some(pod) = self.queue.pop() {
            let pod_name = pod_full_name(&pod);
            match self.schedule_one(pod.clone()) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("Failed to schedule pod {}: {}", pod_name, e);
                    self.queue.add_unschedulable(pod);
                    outcomes.push(ScheduleOutcome::Unschedulable {
                        pod: pod_name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if outcomes.is_empty() {
            debug!("No pods waiting to be scheduled");
            return Ok(outcomes);
        }

        if outcomes
            .iter()
            .any(|o| matches!(o, ScheduleOutcome::Preempted { .. }))
        {
            self.queue.move_all_to_active();
        }

        info!("Scheduling cycle handled {} pod(s)", outcomes.len());
        Ok(outcomes)
    }

    /// Schedule one pod, preempting lower priority pods if nothing fits
    pub fn schedule_one(&self, pod: Pod) -> Result<ScheduleOutcome> {
        let pod_name = pod_full_name(&pod);

        match self.algorithm.schedule(&pod, self.cache.as_ref()) {
            Ok(node) => {
                self.assume(pod, &node)?;
                info!("Scheduled pod {} to node {}", pod_name, node);
                Ok(ScheduleOutcome::Scheduled {
                    pod: pod_name,
                    node,
                })
            }
            Err(e) if e.is_fit_error() => self.preempt(pod, &e),
            Err(e) => {
                warn!("Failed to schedule pod {}: {}", pod_name, e);
                self.queue.add_unschedulable(pod);
                Ok(ScheduleOutcome::Unschedulable {
                    pod: pod_name,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Bind the pod in the cache
    fn assume(&self, mut pod: Pod, node: &str) -> Result<()> {
        self.queue.delete_nominated_pod_if_exists(&pod);
        if let Some(spec) = pod.spec.as_mut() {
            spec.node_name = Some(node.to_string());
        }
        if let Some(status) = pod.status.as_mut() {
            status.nominated_node_name = None;
        }
        self.cache.add_pod(pod)
    }

    fn preempt(&self, mut pod: Pod, fit_error: &SchedulerError) -> Result<ScheduleOutcome> {
        let pod_name = pod_full_name(&pod);

        let result = match self.algorithm.preempt(&pod, self.cache.as_ref(), fit_error) {
            Ok(result) => result,
            Err(e) => {
                warn!("Preemption for pod {} failed: {}", pod_name, e);
                self.queue.add_unschedulable(pod);
                return Ok(ScheduleOutcome::Unschedulable {
                    pod: pod_name,
                    reason: fit_error.to_string(),
                });
            }
        };

        for cleared in &result.nominated_pods_to_clear {
            self.queue.delete_nominated_pod_if_exists(cleared);
        }

        let Some(node_name) = result.node.and_then(|n| n.metadata.name) else {
            let clear_own = result
                .nominated_pods_to_clear
                .iter()
                .any(|p| pod_full_name(p) == pod_name);
            if let Some(status) = pod.status.as_mut().filter(|_| clear_own) {
                status.nominated_node_name = None;
            }
            info!("Pod {} is unschedulable: {}", pod_name, fit_error);
            self.queue.add_unschedulable(pod);
            return Ok(ScheduleOutcome::Unschedulable {
                pod: pod_name,
                reason: fit_error.to_string(),
            });
        };

        let mut victims = Vec::with_capacity(result.victims.len());
        for victim in &result.victims {
            self.cache.remove_pod(victim)?;
            info!(
                "Evicted pod {} from node {} for pod {}",
                pod_full_name(victim),
                node_name,
                pod_name
            );
            victims.push(pod_full_name(victim));
        }

        pod.status
            .get_or_insert_with(PodStatus::default)
            .nominated_node_name = Some(node_name.clone());
        self.queue.add_unschedulable(pod);

        Ok(ScheduleOutcome::Preempted {
            pod: pod_name,
            node: node_name,
            victims,
        })
    }
}
