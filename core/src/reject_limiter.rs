//! Cluster-wide cap on lease rejections per tick, used by
//! `MachineState::expire_limited_leases`. Wraps `governor`'s token-bucket
//! limiter behind a small trait rather than exposing it directly.
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;

/// Whether a single reject is permitted right now.
pub trait RejectLimiter: Send + Sync {
    fn try_reject(&self) -> bool;
}

/// Token-bucket backed limiter: at most `per_tick` rejects per `period`.
pub struct GovernorRejectLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl std::fmt::Debug for GovernorRejectLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernorRejectLimiter").finish()
    }
}

impl GovernorRejectLimiter {
    pub fn new(per_tick: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(per_tick.max(1)).expect("per_tick.max(1) is nonzero"));
        Self { limiter: RateLimiter::direct(quota) }
    }
}

impl RejectLimiter for GovernorRejectLimiter {
    fn try_reject(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// A limiter that always allows the reject -- useful in tests and when no
/// cluster-wide cap is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnboundedRejectLimiter;

impl RejectLimiter for UnboundedRejectLimiter {
    fn try_reject(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_always_allows() {
        let limiter = UnboundedRejectLimiter;
        for _ in 0..100 {
            assert!(limiter.try_reject());
        }
    }

    #[test]
    fn governor_limiter_caps_rate() {
        let limiter = GovernorRejectLimiter::new(2);
        assert!(limiter.try_reject());
        assert!(limiter.try_reject());
        assert!(!limiter.try_reject());
    }
}
