//! [`MachineState`]: the mutable resource bookkeeping for a single worker.
//!
//! A `MachineState` is single-writer: callers are expected to serialize
//! access per machine (e.g. behind a `Mutex<MachineState>`), matching the
//! reference's per-connection state objects. `set_disabled_until` is safe
//! to call from the autoscaler between scheduling iterations as long as
//! that same lock is held for the call.
use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use lease_index::HostIndex;
use tracing::{debug, error, trace};

use crate::{
    constraint::{ConstraintEvaluator, FitnessFn, TaskTrackerState, VmCurrentState},
    error::Error,
    lease::{AttributeMap, Lease, PortRange},
    port_pool::PortRangePool,
    reject_limiter::RejectLimiter,
    request::{
        AssignmentFailure, ConstraintFailure, PreviouslyAssignedTask, ResourceDimension, TaskAssignmentResult,
        TaskRequest, EXCLUSIVE_HOST_CONSTRAINT,
    },
};

/// The two process-wide concurrent indices shared by every `MachineState`.
#[derive(Debug, Default)]
pub struct Indices {
    pub lease_id: HostIndex<String>,
    pub vm_id: HostIndex<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ResourceTotals {
    cpu_cores: f64,
    memory_mb: f64,
    network_mbps: f64,
    disk_mb: f64,
}

/// An immutable snapshot of a machine's totaled resources, published by
/// `update_total_lease_view` and safe to read from other threads.
#[derive(Debug, Clone)]
pub struct TotalLeaseView {
    pub cpu_cores: f64,
    pub memory_mb: f64,
    pub network_mbps: f64,
    pub disk_mb: f64,
    pub port_ranges: Vec<PortRange>,
    pub attributes: AttributeMap,
}

/// `resourceStatus` snapshot. Disk is included only when
/// `report_disk_in_status` is set.
#[derive(Debug, Clone)]
pub struct ResourceStatus {
    pub cpu_cores: (f64, f64),
    pub memory_mb: (f64, f64),
    pub network_mbps: (f64, f64),
    pub disk_mb: Option<(f64, f64)>,
}

/// The sizing hint the autoscaler's shortfall oracle uses: resources
/// currently held plus resources committed to previously-assigned tasks.
/// Ports are summed `end - beg` (exclusive) deliberately -- this does not
/// match the inclusive convention used everywhere else and is not
/// "corrected" here.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxResources {
    pub cpu_cores: f64,
    pub memory_mb: f64,
    pub network_mbps: f64,
    pub disk_mb: f64,
    pub ports: u64,
}

/// What a scheduler harvests off a machine at the end of an iteration: the
/// leases it held and the successful assignments made against them.
#[derive(Debug, Clone)]
pub struct VmAssignmentResult {
    pub hostname: String,
    pub leases: Vec<Lease>,
    pub successful_assignments: Vec<TaskAssignmentResult>,
}

#[derive(Debug)]
pub struct MachineState {
    hostname: String,
    curr_vm_id: String,
    leases: HashMap<String, Lease>,
    totals: ResourceTotals,
    used: ResourceTotals,
    port_pool: PortRangePool,
    attributes: AttributeMap,
    leases_to_expire: Vec<String>,
    expire_all_latch: bool,
    unassign_queue: Vec<String>,
    previously_assigned: HashMap<String, PreviouslyAssignedTask>,
    iteration_results: HashMap<String, TaskAssignmentResult>,
    disabled_until_millis: i64,
    exclusive_task_id: Option<String>,
    total_lease_view: Option<Arc<TotalLeaseView>>,
}

impl MachineState {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            curr_vm_id: String::new(),
            leases: HashMap::new(),
            totals: ResourceTotals::default(),
            used: ResourceTotals::default(),
            port_pool: PortRangePool::new(),
            attributes: AttributeMap::new(),
            leases_to_expire: Vec::new(),
            expire_all_latch: false,
            unassign_queue: Vec::new(),
            previously_assigned: HashMap::new(),
            iteration_results: HashMap::new(),
            disabled_until_millis: 0,
            exclusive_task_id: None,
            total_lease_view: None,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn exclusive_task_id(&self) -> Option<&str> {
        self.exclusive_task_id.as_deref()
    }

    // -- offer ingestion ----------------------------------------------

    /// Accept or reject an offer. Returns `Ok(true)` on acceptance,
    /// `Ok(false)` if rejected because the machine is disabled, and
    /// `Err(DuplicateLease)` if the lease id is already held.
    pub fn add_lease(
        &mut self,
        lease: Lease,
        indices: &Indices,
        now_millis: i64,
        mut on_reject: impl FnMut(&Lease),
    ) -> Result<bool, Error> {
        if lease.vm_id != self.curr_vm_id {
            self.curr_vm_id = lease.vm_id.clone();
            indices.vm_id.publish(lease.vm_id.clone(), self.hostname.clone());
        }
        if now_millis < self.disabled_until_millis {
            on_reject(&lease);
            return Ok(false);
        }
        if self.leases.contains_key(&lease.lease_id) {
            return Err(Error::DuplicateLease(lease.lease_id));
        }
        indices.lease_id.publish(lease.lease_id.clone(), self.hostname.clone());
        self.fold_in(&lease);
        self.attributes = lease.attributes.clone();
        self.leases.insert(lease.lease_id.clone(), lease);
        Ok(true)
    }

    pub fn expire_lease(&mut self, lease_id: impl Into<String>) {
        self.leases_to_expire.push(lease_id.into());
    }

    pub fn expire_all_leases(&mut self) {
        self.expire_all_latch = true;
    }

    pub fn mark_task_for_unassign(&mut self, task_id: impl Into<String>) {
        self.unassign_queue.push(task_id.into());
    }

    /// Drain the expiry queues and remove the affected leases. When
    /// `expireAll` fires (either the latch was set or `force` is passed),
    /// every removed lease triggers `on_reject`; individually-named
    /// expiries do not.
    pub fn remove_expired_leases(&mut self, force: bool, indices: &Indices, mut on_reject: impl FnMut(&Lease)) {
        let ids: std::collections::HashSet<String> = self.leases_to_expire.drain(..).collect();
        let expire_all = std::mem::take(&mut self.expire_all_latch) || force;
        let to_remove: Vec<String> = self
            .leases
            .keys()
            .filter(|id| expire_all || ids.contains(*id))
            .cloned()
            .collect();
        for id in to_remove {
            if let Some(lease) = self.leases.remove(&id) {
                self.unfold(&lease);
                indices.lease_id.remove(&id);
                if expire_all {
                    on_reject(&lease);
                }
            }
        }
    }

    /// Remove leases older than `lease_offer_expiry_secs`, subject to a
    /// cluster-wide cap on rejections per tick. Returns the count
    /// rejected.
    pub fn expire_limited_leases(
        &mut self,
        limiter: &dyn RejectLimiter,
        now_millis: i64,
        lease_offer_expiry_secs: i64,
        indices: &Indices,
        mut on_reject: impl FnMut(&Lease),
    ) -> usize {
        let cutoff = now_millis - lease_offer_expiry_secs * 1000;
        let stale: Vec<String> = self
            .leases
            .iter()
            .filter(|(_, l)| l.offered_at_millis < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        let mut rejected = 0;
        for id in stale {
            if !limiter.try_reject() {
                trace!(%id, "reject limiter denied, lease remains");
                continue;
            }
            if let Some(lease) = self.leases.remove(&id) {
                self.unfold(&lease);
                indices.lease_id.remove(&id);
                on_reject(&lease);
                rejected += 1;
            }
        }
        rejected
    }

    /// Zero totals/used and re-fold every surviving lease. Attributes are
    /// left untouched -- they persist until a new offer refreshes them.
    pub fn reset_resources(&mut self) {
        self.totals = ResourceTotals::default();
        self.used = ResourceTotals::default();
        self.port_pool.clear();
        let leases: Vec<Lease> = self.leases.values().cloned().collect();
        for lease in &leases {
            self.fold_in(lease);
        }
    }

    pub fn update_total_lease_view(&mut self) -> Arc<TotalLeaseView> {
        let view = Arc::new(TotalLeaseView {
            cpu_cores: self.totals.cpu_cores,
            memory_mb: self.totals.memory_mb,
            network_mbps: self.totals.network_mbps,
            disk_mb: self.totals.disk_mb,
            port_ranges: self.port_pool.ranges().to_vec(),
            attributes: self.attributes.clone(),
        });
        self.total_lease_view = Some(view.clone());
        view
    }

    pub fn total_lease_view(&self) -> Option<Arc<TotalLeaseView>> {
        self.total_lease_view.clone()
    }

    // -- disable / enable -----------------------------------------------

    /// Disable the machine until `until_millis`, rejecting and dropping
    /// every held lease. Safe to call between scheduling iterations
    /// while holding this machine's lock.
    pub fn set_disabled_until(&mut self, until_millis: i64, indices: &Indices, mut on_reject: impl FnMut(&Lease)) {
        self.disabled_until_millis = until_millis;
        let ids: Vec<String> = self.leases.keys().cloned().collect();
        for id in ids {
            if let Some(lease) = self.leases.remove(&id) {
                self.unfold(&lease);
                indices.lease_id.remove(&id);
                on_reject(&lease);
            }
        }
    }

    pub fn enable(&mut self) {
        self.disabled_until_millis = 0;
    }

    pub fn is_active(&self, now_millis: i64) -> bool {
        now_millis >= self.disabled_until_millis
    }

    pub fn is_assignable_now(&self, now_millis: i64) -> bool {
        self.is_active(now_millis) && !self.leases.is_empty()
    }

    pub fn disabled_until_millis(&self) -> i64 {
        self.disabled_until_millis
    }

    // -- placement --------------------------------------------------

    /// Register a task this machine already committed to in a previous
    /// iteration, so later `try_assign` calls see it as "running" and
    /// `max_resources` accounts for it.
    pub fn record_running(&mut self, task: PreviouslyAssignedTask) {
        self.previously_assigned.insert(task.task_id.clone(), task);
    }

    pub fn running_task(&self, task_id: &str) -> Option<&PreviouslyAssignedTask> {
        self.previously_assigned.get(task_id)
    }

    fn vm_current_state(&self) -> VmCurrentState<'_> {
        VmCurrentState {
            hostname: &self.hostname,
            currently_assigned: self.iteration_results.values().filter(|r| r.successful).collect(),
            running: self.previously_assigned.values().collect(),
        }
    }

    /// Evaluate whether `request` could be placed here. Returns `None` if
    /// the machine holds no leases this tick (not assignable at all).
    pub fn try_assign(
        &self,
        request: &TaskRequest,
        hard_constraints: &[Arc<dyn ConstraintEvaluator>],
        fitness_fn: &FitnessFn,
        tracker_state: &dyn TaskTrackerState,
    ) -> Option<TaskAssignmentResult> {
        if self.leases.is_empty() {
            return None;
        }
        if let Some(held_by) = &self.exclusive_task_id {
            debug!(held_by, request_id = %request.request_id, "machine held exclusively");
            return Some(TaskAssignmentResult::failed_constraint(
                request,
                &self.hostname,
                ConstraintFailure {
                    name: EXCLUSIVE_HOST_CONSTRAINT.to_string(),
                    reason: format!("machine is exclusively held by task {held_by}"),
                },
            ));
        }

        let vm_state = self.vm_current_state();
        for constraint in hard_constraints {
            if let Err(reason) = constraint.evaluate(request, &vm_state, tracker_state) {
                return Some(TaskAssignmentResult::failed_constraint(
                    request,
                    &self.hostname,
                    ConstraintFailure { name: constraint.name().to_string(), reason },
                ));
            }
        }

        let mut failures = Vec::new();
        Self::check_dim(ResourceDimension::Cpu, request.cpu_cores, self.used.cpu_cores, self.totals.cpu_cores, &mut failures);
        Self::check_dim(
            ResourceDimension::Memory,
            request.memory_mb,
            self.used.memory_mb,
            self.totals.memory_mb,
            &mut failures,
        );
        Self::check_dim(
            ResourceDimension::Network,
            request.network_mbps,
            self.used.network_mbps,
            self.totals.network_mbps,
            &mut failures,
        );
        Self::check_dim(ResourceDimension::Disk, request.disk_mb, self.used.disk_mb, self.totals.disk_mb, &mut failures);
        if request.ports_requested > 0 && !self.port_pool.has_ports(request.ports_requested as u64) {
            failures.push(AssignmentFailure {
                dimension: ResourceDimension::Ports,
                requested: request.ports_requested as f64,
                used: self.port_pool.used_ports() as f64,
                total: self.port_pool.total_ports() as f64,
            });
        }
        if !failures.is_empty() {
            return Some(TaskAssignmentResult::failed_resources(request, &self.hostname, failures));
        }

        let fit = fitness_fn(request, &vm_state, tracker_state);
        if fit == 0.0 {
            let failure = AssignmentFailure { dimension: ResourceDimension::Fitness, requested: 0.0, used: 0.0, total: 0.0 };
            return Some(TaskAssignmentResult::failed_fitness(request, &self.hostname, failure, 0.0));
        }

        let final_fitness = if request.soft_constraints.is_empty() {
            fit
        } else {
            const SOFT_WEIGHT: f64 = 75.0;
            let soft_fit = request.soft_constraints.iter().map(|sc| sc.score(request, &vm_state)).sum::<f64>()
                / request.soft_constraints.len() as f64;
            (soft_fit * SOFT_WEIGHT + fit * (100.0 - SOFT_WEIGHT)) / 100.0
        };
        Some(TaskAssignmentResult::success(request, &self.hostname, final_fitness))
    }

    fn check_dim(dimension: ResourceDimension, requested: f64, used: f64, total: f64, failures: &mut Vec<AssignmentFailure>) {
        if used + requested > total {
            failures.push(AssignmentFailure { dimension, requested, used, total });
        }
    }

    /// Commit a successful `try_assign` result: reserve resources and
    /// ports, notify the task tracker, and store the result keyed by
    /// request id for this iteration.
    pub fn assign(
        &mut self,
        request: &TaskRequest,
        mut result: TaskAssignmentResult,
        tracker: &dyn TaskTrackerState,
    ) -> Result<TaskAssignmentResult, Error> {
        self.used.cpu_cores += request.cpu_cores;
        self.used.memory_mb += request.memory_mb;
        self.used.network_mbps += request.network_mbps;
        self.used.disk_mb += request.disk_mb;
        for _ in 0..request.ports_requested {
            let port = self.port_pool.consume_next()?;
            result.assigned_ports.push(port);
        }
        if request.is_exclusive {
            self.exclusive_task_id = Some(request.task_id.clone());
        }
        if tracker.track_pending_assignment(&request.task_id, &self.hostname).is_err() {
            error!(task_id = %request.task_id, "tracker reported duplicate pending assignment");
        }
        self.iteration_results.insert(request.request_id.clone(), result.clone());
        Ok(result)
    }

    /// Drain the unassign queue and reset per-iteration state ahead of a
    /// new scheduling pass.
    pub fn prepare_for_scheduling(&mut self, tracker: &dyn TaskTrackerState) {
        let unassign: Vec<String> = self.unassign_queue.drain(..).collect();
        for task_id in unassign {
            tracker.untrack(&task_id);
            self.previously_assigned.remove(&task_id);
            if self.exclusive_task_id.as_deref() == Some(task_id.as_str()) {
                self.exclusive_task_id = None;
            }
        }
        self.iteration_results.clear();
    }

    /// Select successful assignments from this iteration, unlink held
    /// leases from the shared index, and clear lease/iteration state.
    /// Returns `None` if nothing was successfully assigned.
    pub fn reset_and_harvest_successful(&mut self, indices: &Indices) -> Option<VmAssignmentResult> {
        let successful: Vec<TaskAssignmentResult> = self.iteration_results.values().filter(|r| r.successful).cloned().collect();
        if successful.is_empty() {
            return None;
        }
        for id in self.leases.keys() {
            indices.lease_id.remove(id);
        }
        let leases: Vec<Lease> = self.leases.drain().map(|(_, l)| l).collect();
        self.iteration_results.clear();
        Some(VmAssignmentResult { hostname: self.hostname.clone(), leases, successful_assignments: successful })
    }

    /// Sizing hint for the shortfall oracle: demand already committed to
    /// previously-assigned tasks, plus this machine's current lease
    /// totals. Ports counted `end - beg`, exclusive -- see the open
    /// question on [`MaxResources`].
    pub fn max_resources(&self) -> MaxResources {
        let mut m = MaxResources::default();
        for t in self.previously_assigned.values() {
            m.cpu_cores += t.cpu_cores;
            m.memory_mb += t.memory_mb;
            m.network_mbps += t.network_mbps;
            m.disk_mb += t.disk_mb;
            m.ports += t.ports as u64;
        }
        m.cpu_cores += self.totals.cpu_cores;
        m.memory_mb += self.totals.memory_mb;
        m.network_mbps += self.totals.network_mbps;
        m.disk_mb += self.totals.disk_mb;
        m.ports += self.port_pool.ranges().iter().map(|r| (r.end - r.beg) as u64).sum::<u64>();
        m
    }

    pub fn resource_status(&self, report_disk_in_status: bool) -> ResourceStatus {
        ResourceStatus {
            cpu_cores: (self.used.cpu_cores, self.totals.cpu_cores),
            memory_mb: (self.used.memory_mb, self.totals.memory_mb),
            network_mbps: (self.used.network_mbps, self.totals.network_mbps),
            disk_mb: report_disk_in_status.then_some((self.used.disk_mb, self.totals.disk_mb)),
        }
    }

    /// Order by descending `total_cpus`, with a special case: machines
    /// holding no leases sort after ones that do.
    pub fn compare_to(&self, other: &MachineState) -> Ordering {
        match (self.leases.is_empty(), other.leases.is_empty()) {
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => other
                .totals
                .cpu_cores
                .partial_cmp(&self.totals.cpu_cores)
                .unwrap_or(Ordering::Equal),
        }
    }

    fn fold_in(&mut self, lease: &Lease) {
        self.totals.cpu_cores += lease.cpu_cores;
        self.totals.memory_mb += lease.memory_mb;
        self.totals.network_mbps += lease.network_mbps;
        self.totals.disk_mb += lease.disk_mb;
        self.port_pool.add(&lease.port_ranges);
    }

    fn unfold(&mut self, lease: &Lease) {
        self.totals.cpu_cores -= lease.cpu_cores;
        self.totals.memory_mb -= lease.memory_mb;
        self.totals.network_mbps -= lease.network_mbps;
        self.totals.disk_mb -= lease.disk_mb;
        // The port pool is deliberately left untouched here: per spec,
        // ports are only reclaimed in bulk via `reset_resources`/`clear`.
        trace!(lease_id = %lease.lease_id, "lease resources unfolded, port pool left for next reset_resources");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::test_support::{identity_fitness, FakeTracker};
    use tracing_test::traced_test;

    fn lease(id: &str, vm: &str, host: &str) -> Lease {
        Lease {
            lease_id: id.to_string(),
            vm_id: vm.to_string(),
            hostname: host.to_string(),
            cpu_cores: 8.0,
            memory_mb: 16384.0,
            network_mbps: 1000.0,
            disk_mb: 100_000.0,
            port_ranges: vec![PortRange::new(31000, 31010)],
            attributes: AttributeMap::new(),
            offered_at_millis: 0,
        }
    }

    fn request(id: &str) -> TaskRequest {
        TaskRequest {
            request_id: id.to_string(),
            task_id: format!("task-{id}"),
            cpu_cores: 2.0,
            memory_mb: 4096.0,
            network_mbps: 100.0,
            disk_mb: 1000.0,
            ports_requested: 2,
            is_exclusive: false,
            soft_constraints: vec![],
        }
    }

    #[test]
    fn simple_placement_end_to_end() {
        let indices = Indices::default();
        let tracker = FakeTracker::default();
        let mut machine = MachineState::new("host-a");
        machine.add_lease(lease("l1", "vm1", "host-a"), &indices, 0, |_| {}).unwrap();

        let req = request("r1");
        let fitness = identity_fitness();
        let result = machine.try_assign(&req, &[], &fitness, &tracker).expect("assignable");
        assert!(result.successful);
        assert_eq!(result.fitness, 1.0);

        let committed = machine.assign(&req, result, &tracker).unwrap();
        assert_eq!(committed.assigned_ports, vec![31000, 31001]);
        assert_eq!(machine.used.cpu_cores, 2.0);

        let harvested = machine.reset_and_harvest_successful(&indices).expect("one success");
        assert_eq!(harvested.successful_assignments.len(), 1);
        assert_eq!(machine.lease_count(), 0);
        assert!(indices.lease_id.get("l1").is_none());
    }

    #[test]
    fn exclusive_host_sticks() {
        let indices = Indices::default();
        let tracker = FakeTracker::default();
        let mut machine = MachineState::new("host-a");
        machine.add_lease(lease("l1", "vm1", "host-a"), &indices, 0, |_| {}).unwrap();

        let mut excl = request("r1");
        excl.is_exclusive = true;
        let fitness = identity_fitness();
        let result = machine.try_assign(&excl, &[], &fitness, &tracker).unwrap();
        machine.assign(&excl, result, &tracker).unwrap();

        let other = request("r2");
        let second = machine.try_assign(&other, &[], &fitness, &tracker).unwrap();
        assert!(!second.successful);
        match second.failure {
            Some(crate::request::PlacementFailure::Constraint(c)) => assert_eq!(c.name, EXCLUSIVE_HOST_CONSTRAINT),
            other => panic!("expected exclusive-host constraint failure, got {other:?}"),
        }
    }

    #[test]
    #[traced_test]
    fn duplicate_tracker_assignment_is_logged_not_fatal() {
        let indices = Indices::default();
        let tracker = FakeTracker::default();
        let mut machine = MachineState::new("host-a");
        machine.add_lease(lease("l1", "vm1", "host-a"), &indices, 0, |_| {}).unwrap();
        let fitness = identity_fitness();

        let mut first = request("r1");
        first.task_id = "shared-task".to_string();
        let result = machine.try_assign(&first, &[], &fitness, &tracker).unwrap();
        machine.assign(&first, result, &tracker).unwrap();

        // same task id, different request -- tracker reports a duplicate,
        // but the commit still succeeds.
        let mut second = request("r2");
        second.task_id = "shared-task".to_string();
        let result = machine.try_assign(&second, &[], &fitness, &tracker).unwrap();
        let committed = machine.assign(&second, result, &tracker).unwrap();
        assert!(committed.successful);
    }

    #[test]
    fn zero_fitness_is_a_failure() {
        let indices = Indices::default();
        let tracker = FakeTracker::default();
        let mut machine = MachineState::new("host-a");
        machine.add_lease(lease("l1", "vm1", "host-a"), &indices, 0, |_| {}).unwrap();

        let req = request("r1");
        let zero_fitness: Box<FitnessFn> = Box::new(|_, _, _| 0.0);
        let result = machine.try_assign(&req, &[], &zero_fitness, &tracker).unwrap();
        assert!(!result.successful);
        assert_eq!(result.fitness, 0.0);
        assert!(matches!(result.failure, Some(crate::request::PlacementFailure::Fitness(_))));
    }

    #[test]
    fn used_never_exceeds_total() {
        let indices = Indices::default();
        let tracker = FakeTracker::default();
        let mut machine = MachineState::new("host-a");
        machine.add_lease(lease("l1", "vm1", "host-a"), &indices, 0, |_| {}).unwrap();
        let mut huge = request("r1");
        huge.cpu_cores = 100.0;
        let fitness = identity_fitness();
        let result = machine.try_assign(&huge, &[], &fitness, &tracker).unwrap();
        assert!(!result.successful);
        assert!(matches!(result.failure, Some(crate::request::PlacementFailure::Resources(_))));
    }

    #[test]
    fn set_disabled_until_empties_leases_and_rejects() {
        let indices = Indices::default();
        let mut machine = MachineState::new("host-a");
        machine.add_lease(lease("l1", "vm1", "host-a"), &indices, 0, |_| {}).unwrap();
        let mut rejects = 0;
        machine.set_disabled_until(1_000_000, &indices, |_| rejects += 1);
        assert_eq!(machine.lease_count(), 0);
        assert_eq!(rejects, 1);
        assert!(!machine.is_active(0));
    }

    #[test]
    fn expire_then_remove_round_trips_totals() {
        let indices = Indices::default();
        let mut machine = MachineState::new("host-a");
        machine.add_lease(lease("l1", "vm1", "host-a"), &indices, 0, |_| {}).unwrap();
        let before_cpu = machine.totals.cpu_cores;
        machine.expire_lease("l1");
        machine.remove_expired_leases(false, &indices, |_| {});
        assert_eq!(machine.totals.cpu_cores, before_cpu - 8.0);
        assert_eq!(machine.lease_count(), 0);
    }

    #[test]
    fn reset_resources_recomputes_from_surviving_leases() {
        let indices = Indices::default();
        let mut machine = MachineState::new("host-a");
        machine.add_lease(lease("l1", "vm1", "host-a"), &indices, 0, |_| {}).unwrap();
        machine.used.cpu_cores = 2.0;
        machine.reset_resources();
        assert_eq!(machine.used.cpu_cores, 0.0);
        assert_eq!(machine.totals.cpu_cores, 8.0);
    }

    #[test]
    fn harvest_returns_none_without_success() {
        let indices = Indices::default();
        let mut machine = MachineState::new("host-a");
        machine.add_lease(lease("l1", "vm1", "host-a"), &indices, 0, |_| {}).unwrap();
        assert!(machine.reset_and_harvest_successful(&indices).is_none());
    }

    #[test]
    fn compare_to_prefers_populated_and_higher_cpu() {
        let indices = Indices::default();
        let mut empty = MachineState::new("empty");
        let mut busy = MachineState::new("busy");
        busy.add_lease(lease("l1", "vm1", "busy"), &indices, 0, |_| {}).unwrap();
        assert_eq!(busy.compare_to(&empty), Ordering::Less);
        assert_eq!(empty.compare_to(&busy), Ordering::Greater);

        let mut bigger = MachineState::new("bigger");
        let mut bigger_lease = lease("l2", "vm2", "bigger");
        bigger_lease.cpu_cores = 32.0;
        bigger.add_lease(bigger_lease, &indices, 0, |_| {}).unwrap();
        assert_eq!(bigger.compare_to(&busy), Ordering::Less);
    }
}
