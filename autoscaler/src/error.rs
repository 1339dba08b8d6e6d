//! Fatal, programmer-error conditions. Placement/scaling outcomes that are
//! expected in normal operation are never represented here -- see
//! [`crate::action::AutoScaleAction`] and `placement_core::error::Error`
//! for that split.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate autoscale rule name: {0}")]
    DuplicateRule(String),
}
