use crate::listers::NominatedPodLister;
use k8s_openapi::api::core::v1::PodStatus;
use parking_lot::Mutex;
use reddwarf_core::{pod_full_name, pod_nominated_node_name, pod_priority, Pod};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;

/// A pod waiting in the active queue
struct QueuedPod {
    priority: i32,
    /// Insertion order, for FIFO among equal priorities
    seq: u64,
    pod: Pod,
}

impl Ord for QueuedPod {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedPod {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedPod {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedPod {}

#[derive(Default)]
struct QueueState {
    active: BinaryHeap<QueuedPod>,
    unschedulable: HashMap<String, Pod>,
    /// node name -> pods nominated to run there
    nominated: HashMap<String, Vec<Pod>>,
    /// pod full name -> node it is nominated to
    nominated_node: HashMap<String, String>,
    seq: u64,
}

impl QueueState {
    fn push_active(&mut self, pod: Pod) {
        self.seq += 1;
        self.active.push(QueuedPod {
            priority: pod_priority(&pod),
            seq: self.seq,
            pod,
        });
    }

    fn delete_nominated(&mut self, key: &str) {
        let Some(node_name) = self.nominated_node.remove(key) else {
            return;
        };
        if let Some(pods) = self.nominated.get_mut(&node_name) {
            pods.retain(|p| pod_full_name(p) != key);
            if pods.is_empty() {
                self.nominated.remove(&node_name);
            }
        }
    }

    fn set_nominated(&mut self, pod: &Pod, node_name: &str) {
        let key = pod_full_name(pod);
        self.delete_nominated(&key);

        let mut nominated = pod.clone();
        nominated
            .status
            .get_or_insert_with(PodStatus::default)
            .nominated_node_name = Some(node_name.to_string());

        self.nominated
            .entry(node_name.to_string())
            .or_default()
            .push(nominated);
        self.nominated_node.insert(key, node_name.to_string());
    }

    /// Drop the nominated node from the status of the queued copies of a pod
    fn clear_stored_nomination(&mut self, key: &str) {
        if let Some(status) = self
            .unschedulable
            .get_mut(key)
            .and_then(|pod| pod.status.as_mut())
        {
            status.nominated_node_name = None;
        }

        let mut active = std::mem::take(&mut self.active).into_vec();
        for queued in active.iter_mut().filter(|q| pod_full_name(&q.pod) == key) {
            if let Some(status) = queued.pod.status.as_mut() {
                status.nominated_node_name = None;
            }
        }
        self.active = BinaryHeap::from(active);
    }

    /// Track the nomination a pod carries in its status
    fn sync_nominated(&mut self, pod: &Pod) {
        if let Some(node_name) = pod_nominated_node_name(pod) {
            let node_name = node_name.to_string();
            self.set_nominated(pod, &node_name);
        }
    }
}

/// Pods waiting to be scheduled, highest priority first.
///
/// Also indexes the pods nominated to nodes by preemption, which the filter
/// takes into account when checking whether another pod fits.
#[derive(Default)]
pub struct SchedulingQueue {
    state: Mutex<QueueState>,
}

impl SchedulingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pod for scheduling
    pub fn add(&self, pod: Pod) {
        let mut state = self.state.lock();
        state.unschedulable.remove(&pod_full_name(&pod));
        state.sync_nominated(&pod);
        debug!("Queued pod {}", pod_full_name(&pod));
        state.push_active(pod);
    }

    /// Take the highest priority pod
    pub fn pop(&self) -> Option<Pod> {
        self.state.lock().active.pop().map(|queued| queued.pod)
    }

    /// Park a pod that could not be scheduled until the cluster changes
    pub fn add_unschedulable(&self, pod: Pod) {
        let mut state = self.state.lock();
        state.sync_nominated(&pod);
        debug!("Pod {} is unschedulable", pod_full_name(&pod));
        state.unschedulable.insert(pod_full_name(&pod), pod);
    }

    /// Retry every parked pod
    pub fn move_all_to_active(&self) {
        let mut state = self.state.lock();
        let parked: Vec<Pod> = state.unschedulable.drain().map(|(_, pod)| pod).collect();
        for pod in parked {
            state.push_active(pod);
        }
    }

    /// Record that a pod is nominated to run on a node
    pub fn update_nominated_pod_for_node(&self, pod: &Pod, node_name: &str) {
        self.state.lock().set_nominated(pod, node_name);
    }

    /// Forget the nomination of a pod, including the one recorded in the
    /// status of its queued copy
    pub fn delete_nominated_pod_if_exists(&self, pod: &Pod) {
        let key = pod_full_name(pod);
        let mut state = self.state.lock();
        state.delete_nominated(&key);
        state.clear_stored_nomination(&key);
    }

    /// Number of pods ready to be popped
    pub fn len(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().active.is_empty()
    }

    /// Number of parked pods
    pub fn unschedulable_len(&self) -> usize {
        self.state.lock().unschedulable.len()
    }
}

impl NominatedPodLister for SchedulingQueue {
    fn waiting_pods_for_node(&self, node_name: &str) -> Vec<Pod> {
        self.state
            .lock()
            .nominated
            .get(node_name)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::make_pod;

    #[test]
    fn test_pop_order_priority_then_fifo() {
        let queue = SchedulingQueue::new();
        queue.add(make_pod("low", "1", "1Gi", 1));
        queue.add(make_pod("high-a", "1", "1Gi", 10));
        queue.add(make_pod("high-b", "1", "1Gi", 10));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|p| p.metadata.name.unwrap())
            .collect();
        assert_eq!(order, vec!["high-a", "high-b", "low"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unschedulable_moves_back() {
        let queue = SchedulingQueue::new();
        queue.add_unschedulable(make_pod("parked", "1", "1Gi", 0));
        assert!(queue.pop().is_none());
        assert_eq!(queue.unschedulable_len(), 1);

        queue.move_all_to_active();
        assert_eq!(queue.unschedulable_len(), 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().metadata.name.unwrap(), "parked");
    }

    #[test]
    fn test_nominated_pods() {
        let queue = SchedulingQueue::new();
        let pod = make_pod("p1", "1", "1Gi", 5);

        queue.update_nominated_pod_for_node(&pod, "node1");
        let waiting = queue.waiting_pods_for_node("node1");
        assert_eq!(waiting.len(), 1);
        assert_eq!(pod_nominated_node_name(&waiting[0]), Some("node1"));

        // Re-nominating moves the pod
        queue.update_nominated_pod_for_node(&pod, "node2");
        assert!(queue.waiting_pods_for_node("node1").is_empty());
        assert_eq!(queue.waiting_pods_for_node("node2").len(), 1);

        queue.delete_nominated_pod_if_exists(&pod);
        assert!(queue.waiting_pods_for_node("node2").is_empty());
    }

    #[test]
    fn test_add_tracks_status_nomination() {
        let queue = SchedulingQueue::new();
        let mut pod = make_pod("p1", "1", "1Gi", 5);
        pod.status = Some(PodStatus {
            nominated_node_name: Some("node3".to_string()),
            ..Default::default()
        });
        queue.add(pod);
        assert_eq!(queue.waiting_pods_for_node("node3").len(), 1);
    }

    #[test]
    fn test_cleared_nomination_not_restored() {
        let queue = SchedulingQueue::new();
        let mut pod = make_pod("p1", "1", "1Gi", 5);
        pod.status = Some(PodStatus {
            nominated_node_name: Some("node1".to_string()),
            ..Default::default()
        });
        queue.add_unschedulable(pod.clone());
        assert_eq!(queue.waiting_pods_for_node("node1").len(), 1);

        queue.delete_nominated_pod_if_exists(&pod);
        queue.move_all_to_active();
        let popped = queue.pop().unwrap();
        assert_eq!(pod_nominated_node_name(&popped), None);

        queue.add_unschedulable(popped);
        assert!(queue.waiting_pods_for_node("node1").is_empty());
    }

    #[test]
    fn test_clear_nomination_of_active_pod() {
        let queue = SchedulingQueue::new();
        let mut pod = make_pod("p1", "1", "1Gi", 5);
        pod.status = Some(PodStatus {
            nominated_node_name: Some("node1".to_string()),
            ..Default::default()
        });
        queue.add(pod.clone());
        queue.add(make_pod("p2", "1", "1Gi", 1));

        queue.delete_nominated_pod_if_exists(&pod);
        let popped = queue.pop().unwrap();
        assert_eq!(popped.metadata.name.as_deref(), Some("p1"));
        assert_eq!(pod_nominated_node_name(&popped), None);
        assert_eq!(queue.len(), 1);
    }
}
