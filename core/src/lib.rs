//! # placement-core
//!
//! Per-machine resource bookkeeping and task placement evaluation for a
//! compute-cluster scheduler. Given a stream of resource offers
//! ([`Lease`](lease::Lease)) and a queue of task requests with declared
//! resource needs and constraints, a [`MachineState`](machine::MachineState)
//! decides whether a task fits and scores how well it fits.
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub, non_snake_case, non_upper_case_globals)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod constraint;
pub mod error;
pub mod lease;
pub mod machine;
pub mod port_pool;
pub mod prelude;
pub mod reject_limiter;
pub mod request;

pub use anyhow;
pub use tracing;
