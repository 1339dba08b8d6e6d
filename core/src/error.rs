//! Fatal, programmer-facing errors. Recoverable placement outcomes are
//! carried as data in [`crate::request::TaskAssignmentResult`], not here --
//! see `crate::request::PlacementFailure`.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// `add_lease` of an already-present lease id.
    #[error("lease {0} already present on this machine")]
    DuplicateLease(String),
    /// `consume_next` called on an empty pool; must not happen if
    /// `has_ports` was honored beforehand.
    #[error("port pool exhausted")]
    ExhaustedPorts,
}
