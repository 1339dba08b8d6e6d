//! placement-core prelude

pub use crate::{
    constraint::{ConstraintEvaluator, FitnessFn, SoftConstraintEvaluator, TaskTrackerState, TrackerDuplicate, VmCurrentState},
    error::Error,
    lease::{AttributeMap, AttributeValue, Lease, PortRange},
    machine::{Indices, MachineState, MaxResources, ResourceStatus, TotalLeaseView, VmAssignmentResult},
    port_pool::PortRangePool,
    reject_limiter::{GovernorRejectLimiter, RejectLimiter, UnboundedRejectLimiter},
    request::{
        AssignmentFailure, ConstraintFailure, PlacementFailure, PreviouslyAssignedTask, ResourceDimension,
        TaskAssignmentResult, TaskRequest, EXCLUSIVE_HOST_CONSTRAINT,
    },
};

pub use anyhow::{Context, Result};
pub use std::sync::Arc;
pub use tracing::{self, debug, error, info, instrument, trace, warn};
