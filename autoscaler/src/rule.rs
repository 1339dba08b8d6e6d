//! Per-rule configuration and persistent scaling activity.
use std::sync::Arc;

use placement_core::lease::Lease;

/// Configuration for one autoscaling rule/group.
#[derive(Clone)]
pub struct AutoScaleRule {
    pub rule_name: String,
    pub min_idle_hosts_to_keep: i64,
    pub max_idle_hosts_to_keep: i64,
    pub cool_down_secs: i64,
    /// returns `true` when the given idle lease should be excluded from
    /// this group's idle count (e.g. too small to be worth keeping idle)
    pub idle_machine_too_small: Arc<dyn Fn(&Lease) -> bool + Send + Sync>,
}

impl std::fmt::Debug for AutoScaleRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoScaleRule")
            .field("rule_name", &self.rule_name)
            .field("min_idle_hosts_to_keep", &self.min_idle_hosts_to_keep)
            .field("max_idle_hosts_to_keep", &self.max_idle_hosts_to_keep)
            .field("cool_down_secs", &self.cool_down_secs)
            .finish()
    }
}

impl AutoScaleRule {
    /// A rule with no lower size filter: every idle lease counts.
    pub fn keep_all(rule_name: impl Into<String>, min: i64, max: i64, cool_down_secs: i64) -> Self {
        Self {
            rule_name: rule_name.into(),
            min_idle_hosts_to_keep: min,
            max_idle_hosts_to_keep: max,
            cool_down_secs,
            idle_machine_too_small: Arc::new(|_| false),
        }
    }
}

/// The type of the most recent scale action taken for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleType {
    None,
    Up,
    Down,
}

/// Persists across ticks so cooldowns and hysteresis can be evaluated.
#[derive(Debug, Clone, Copy)]
pub struct ScalingActivity {
    pub scale_up_at: i64,
    pub scale_down_at: i64,
    pub last_shortfall: i64,
    pub last_scaled_count: i64,
    pub last_type: ScaleType,
}

impl ScalingActivity {
    /// A fresh activity record whose first allowed scale action is
    /// `min(120, cool_down_secs)` seconds from `now_millis`, rather than
    /// immediately at boot.
    pub fn fresh(now_millis: i64, cool_down_secs: i64) -> Self {
        let synthetic_delay_secs = cool_down_secs.min(120);
        let at = now_millis - cool_down_secs * 1000 + synthetic_delay_secs * 1000;
        Self { scale_up_at: at, scale_down_at: at, last_shortfall: 0, last_scaled_count: 0, last_type: ScaleType::None }
    }
}

/// Per-tick, transient grouping of a rule with the idle hosts and
/// shortfall assigned to it this tick.
#[derive(Debug, Clone)]
pub struct HostAttributeGroup {
    pub name: String,
    pub rule: AutoScaleRule,
    pub idle_hosts: Vec<Lease>,
    pub shortfall: i64,
}
