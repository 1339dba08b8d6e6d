//! Task placement requests and the (non-thrown) results of attempting to
//! place them.
use std::sync::Arc;

use crate::constraint::SoftConstraintEvaluator;

/// The resource dimension an [`AssignmentFailure`] pertains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    Cpu,
    Memory,
    Network,
    Disk,
    Ports,
    Fitness,
}

/// A resource or fitness shortfall recorded against one dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentFailure {
    pub dimension: ResourceDimension,
    pub requested: f64,
    pub used: f64,
    pub total: f64,
}

/// A named hard-constraint rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintFailure {
    pub name: String,
    pub reason: String,
}

/// The reason `try_assign` did not produce a successful placement.
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementFailure {
    Constraint(ConstraintFailure),
    Resources(Vec<AssignmentFailure>),
    Fitness(AssignmentFailure),
}

/// Name reserved for the exclusive-host hard constraint, surfaced when a
/// machine already holds an exclusive task and a second request arrives.
pub const EXCLUSIVE_HOST_CONSTRAINT: &str = "ExclusiveHost";

/// A task's resource needs and placement constraints for one scheduling
/// attempt. Two distinct requests with equal field values must still
/// occupy distinct slots in a machine's iteration map, so identity is
/// carried explicitly via `request_id` rather than derived from content.
#[derive(Clone)]
pub struct TaskRequest {
    pub request_id: String,
    pub task_id: String,
    pub cpu_cores: f64,
    pub memory_mb: f64,
    pub network_mbps: f64,
    pub disk_mb: f64,
    pub ports_requested: u32,
    pub is_exclusive: bool,
    pub soft_constraints: Vec<Arc<dyn SoftConstraintEvaluator>>,
}

impl std::fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRequest")
            .field("request_id", &self.request_id)
            .field("task_id", &self.task_id)
            .field("cpu_cores", &self.cpu_cores)
            .field("memory_mb", &self.memory_mb)
            .field("network_mbps", &self.network_mbps)
            .field("disk_mb", &self.disk_mb)
            .field("ports_requested", &self.ports_requested)
            .field("is_exclusive", &self.is_exclusive)
            .field("soft_constraints", &self.soft_constraints.len())
            .finish()
    }
}

impl PartialEq for TaskRequest {
    fn eq(&self, other: &Self) -> bool {
        self.request_id == other.request_id
    }
}
impl Eq for TaskRequest {}

impl std::hash::Hash for TaskRequest {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.request_id.hash(state);
    }
}

/// The outcome of one `try_assign` call, keyed in a machine's per-iteration
/// map by `request_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskAssignmentResult {
    pub request_id: String,
    pub task_id: String,
    pub hostname: String,
    pub successful: bool,
    pub fitness: f64,
    pub failure: Option<PlacementFailure>,
    pub assigned_ports: Vec<u32>,
}

impl TaskAssignmentResult {
    pub fn success(request: &TaskRequest, hostname: &str, fitness: f64) -> Self {
        Self {
            request_id: request.request_id.clone(),
            task_id: request.task_id.clone(),
            hostname: hostname.to_string(),
            successful: true,
            fitness,
            failure: None,
            assigned_ports: Vec::new(),
        }
    }

    pub fn failed_constraint(request: &TaskRequest, hostname: &str, failure: ConstraintFailure) -> Self {
        Self {
            request_id: request.request_id.clone(),
            task_id: request.task_id.clone(),
            hostname: hostname.to_string(),
            successful: false,
            fitness: 0.0,
            failure: Some(PlacementFailure::Constraint(failure)),
            assigned_ports: Vec::new(),
        }
    }

    pub fn failed_resources(request: &TaskRequest, hostname: &str, failures: Vec<AssignmentFailure>) -> Self {
        Self {
            request_id: request.request_id.clone(),
            task_id: request.task_id.clone(),
            hostname: hostname.to_string(),
            successful: false,
            fitness: 0.0,
            failure: Some(PlacementFailure::Resources(failures)),
            assigned_ports: Vec::new(),
        }
    }

    pub fn failed_fitness(request: &TaskRequest, hostname: &str, failure: AssignmentFailure, fitness: f64) -> Self {
        Self {
            request_id: request.request_id.clone(),
            task_id: request.task_id.clone(),
            hostname: hostname.to_string(),
            successful: false,
            fitness,
            failure: Some(PlacementFailure::Fitness(failure)),
            assigned_ports: Vec::new(),
        }
    }
}

/// A task this machine already committed to in a previous iteration --
/// "running" from the point of view of a new `try_assign` call.
#[derive(Debug, Clone)]
pub struct PreviouslyAssignedTask {
    pub task_id: String,
    pub cpu_cores: f64,
    pub memory_mb: f64,
    pub network_mbps: f64,
    pub disk_mb: f64,
    pub ports: u32,
}
