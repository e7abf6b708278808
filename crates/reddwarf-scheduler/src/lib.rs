//! Reddwarf Scheduler - Pod to Node scheduling
//!
//! This crate provides:
//! - Filter predicates evaluated in parallel across nodes, with an
//!   equivalence cache of per-class predicate results
//! - Weighted priority functions and round-robin host selection
//! - Priority preemption honoring pod disruption budgets
//! - Scheduler cache, scheduling queue and the outer scheduling loop
//! - Extender hooks and a YAML scheduling policy

pub mod cache;
pub mod equivalence;
pub mod error;
pub mod extender;
pub mod filter;
pub mod generic;
pub mod listers;
mod lru;
pub mod node_info;
pub mod parallel;
pub mod pdb;
pub mod policy;
pub mod preemption;
pub mod queue;
pub mod scheduler;
pub mod score;
pub mod types;

#[cfg(test)]
mod test_util;

// Re-export commonly used types
pub use cache::NodeCache;
pub use equivalence::EquivalenceCache;
pub use error::{Result, SchedulerError};
pub use extender::SchedulerExtender;
pub use generic::{GenericScheduler, GenericSchedulerConfig};
pub use listers::{NodeLister, NominatedPodLister, PdbLister, PvcLister, SchedulerCache};
pub use node_info::NodeInfo;
pub use policy::Policy;
pub use queue::SchedulingQueue;
pub use scheduler::{ScheduleOutcome, Scheduler, SchedulerConfig};
pub use types::{
    FailedPredicateMap, HostPriority, HostPriorityList, NodeToVictims, PredicateFailureReason,
    PredicateResult, PreemptionResult, Victims,
};
