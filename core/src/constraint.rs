//! Constraint and fitness capability traits. Rather than a constraint
//! plug-in hierarchy with runtime type inspection, evaluators are plain
//! `dyn` trait objects -- a hard constraint returns `Ok`/`Err(reason)`, a
//! soft constraint returns a `[0,1]` score, and fitness is a plain
//! closure-shaped trait bound.
use crate::request::{PreviouslyAssignedTask, TaskAssignmentResult, TaskRequest};

/// The view of this machine's own in-progress and running tasks, handed to
/// every constraint/fitness evaluation.
#[derive(Debug)]
pub struct VmCurrentState<'a> {
    pub hostname: &'a str,
    pub currently_assigned: Vec<&'a TaskAssignmentResult>,
    pub running: Vec<&'a PreviouslyAssignedTask>,
}

/// The cluster-wide view from the external task tracker, opaque to the
/// core beyond this contract.
pub trait TaskTrackerState: Send + Sync {
    /// Is `task_id` already tracked as running or pending anywhere in the
    /// cluster?
    fn is_task_tracked(&self, task_id: &str) -> bool;
    /// Record that `task_id` is pending assignment to `hostname`. Returns
    /// `Err` if the tracker already had a pending/running entry for this
    /// task id -- callers log this, they do not propagate it.
    fn track_pending_assignment(&self, task_id: &str, hostname: &str) -> Result<(), TrackerDuplicate>;
    /// Drop a task from the tracker.
    fn untrack(&self, task_id: &str);
}

/// Returned by [`TaskTrackerState::track_pending_assignment`] when the
/// tracker already had an entry for the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerDuplicate;

/// A hard constraint: if it fails, placement is forbidden outright.
pub trait ConstraintEvaluator: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(
        &self,
        request: &TaskRequest,
        vm_state: &VmCurrentState<'_>,
        tracker_state: &dyn TaskTrackerState,
    ) -> Result<(), String>;
}

/// A soft constraint: never rejects, only nudges fitness.
pub trait SoftConstraintEvaluator: Send + Sync {
    fn name(&self) -> &str;
    fn score(&self, request: &TaskRequest, vm_state: &VmCurrentState<'_>) -> f64;
}

/// `FitnessFn(request, vmState, trackerState) -> float64 in [0, 1]`.
pub type FitnessFn = dyn Fn(&TaskRequest, &VmCurrentState<'_>, &dyn TaskTrackerState) -> f64 + Send + Sync;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// A trivial in-memory tracker for tests.
    #[derive(Debug, Default)]
    pub struct FakeTracker {
        tracked: Mutex<HashSet<String>>,
    }

    impl TaskTrackerState for FakeTracker {
        fn is_task_tracked(&self, task_id: &str) -> bool {
            self.tracked.lock().unwrap().contains(task_id)
        }

        fn track_pending_assignment(&self, task_id: &str, _hostname: &str) -> Result<(), TrackerDuplicate> {
            if !self.tracked.lock().unwrap().insert(task_id.to_string()) {
                return Err(TrackerDuplicate);
            }
            Ok(())
        }

        fn untrack(&self, task_id: &str) {
            self.tracked.lock().unwrap().remove(task_id);
        }
    }

    pub fn identity_fitness() -> Box<FitnessFn> {
        Box::new(|_req, _vm, _tracker| 1.0)
    }
}
