//! Autoscaler input/output wire types.
use std::collections::HashMap;

use placement_core::{lease::Lease, request::AssignmentFailure};

/// One tick's worth of input: machines considered idle by the scheduler,
/// and the per-task failures the scheduler could not place anywhere.
#[derive(Debug, Clone)]
pub struct AutoscalerInput {
    pub idle_leases: Vec<Lease>,
    pub failures: HashMap<String, Vec<AssignmentFailure>>,
}

/// A recommended cluster-size change. The core only recommends; executing
/// it is someone else's job.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoScaleAction {
    ScaleUp { rule_name: String, count: u32 },
    ScaleDown { rule_name: String, host_identifiers: Vec<String> },
}
