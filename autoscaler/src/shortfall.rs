//! Pluggable shortfall sizing: the autoscaler core never decides how a
//! deficit translates into a scale-up count, it asks an evaluator.
use std::collections::HashMap;

use async_trait::async_trait;

use placement_core::machine::MaxResources;
use placement_core::request::{AssignmentFailure, ResourceDimension};

/// A "phantom scheduler" oracle: given the known group names, the tick's
/// unplaceable-task failures, and each group's maximum achievable
/// resource vector (one representative machine's `max_resources()` per
/// group), estimate how many additional machines each group needs.
/// Absent keys in the returned map are treated as zero shortfall.
#[async_trait]
pub trait ShortfallEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        group_names: &[String],
        failures: &HashMap<String, Vec<AssignmentFailure>>,
        max_resources: &HashMap<String, MaxResources>,
    ) -> HashMap<String, i64>;
}

/// An evaluator that never recommends scaling up. Useful when group
/// capacity is managed entirely by min/max idle host bounds.
#[derive(Debug, Default)]
pub struct NoShortfall;

#[async_trait]
impl ShortfallEvaluator for NoShortfall {
    async fn evaluate(
        &self,
        _group_names: &[String],
        _failures: &HashMap<String, Vec<AssignmentFailure>>,
        _max_resources: &HashMap<String, MaxResources>,
    ) -> HashMap<String, i64> {
        HashMap::new()
    }
}

fn dimension_capacity(dimension: ResourceDimension, capacity: &MaxResources) -> f64 {
    match dimension {
        ResourceDimension::Cpu => capacity.cpu_cores,
        ResourceDimension::Memory => capacity.memory_mb,
        ResourceDimension::Network => capacity.network_mbps,
        ResourceDimension::Disk => capacity.disk_mb,
        ResourceDimension::Ports => capacity.ports as f64,
        ResourceDimension::Fitness => 0.0,
    }
}

/// Sizes a group's shortfall against its own machines' achievable
/// capacity: sums the requested amount of every resource-dimension
/// failure across all tasks, then divides by that group's per-machine
/// `max_resources()` to estimate how many whole additional machines
/// would absorb the failing demand. The worst (largest) dimension ratio
/// wins, since a single new machine must clear every dimension at once.
/// Ignores `Fitness`/constraint rejections -- those can't be fixed by
/// adding capacity of the same shape. Groups with no machines currently
/// registered have no capacity to divide by and report zero shortfall.
#[derive(Debug, Default)]
pub struct ResourceAwareShortfall;

#[async_trait]
impl ShortfallEvaluator for ResourceAwareShortfall {
    async fn evaluate(
        &self,
        group_names: &[String],
        failures: &HashMap<String, Vec<AssignmentFailure>>,
        max_resources: &HashMap<String, MaxResources>,
    ) -> HashMap<String, i64> {
        let mut requested_by_dimension: HashMap<ResourceDimension, f64> = HashMap::new();
        for failure in failures.values().flatten() {
            if matches!(failure.dimension, ResourceDimension::Fitness) {
                continue;
            }
            *requested_by_dimension.entry(failure.dimension).or_default() += failure.requested;
        }

        group_names
            .iter()
            .map(|name| {
                let Some(capacity) = max_resources.get(name) else {
                    return (name.clone(), 0);
                };
                let needed = requested_by_dimension
                    .iter()
                    .filter_map(|(dimension, requested)| {
                        let per_machine = dimension_capacity(*dimension, capacity);
                        (per_machine > 0.0).then(|| (requested / per_machine).ceil() as i64)
                    })
                    .max()
                    .unwrap_or(0);
                (name.clone(), needed)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity(cpu_cores: f64, memory_mb: f64) -> MaxResources {
        MaxResources { cpu_cores, memory_mb, network_mbps: 0.0, disk_mb: 0.0, ports: 0 }
    }

    #[tokio::test]
    async fn no_shortfall_is_always_empty() {
        let failures = HashMap::from([(
            "task-1".to_string(),
            vec![AssignmentFailure { dimension: ResourceDimension::Cpu, requested: 1.0, used: 1.0, total: 1.0 }],
        )]);
        let groups = vec!["a".to_string()];
        assert!(NoShortfall.evaluate(&groups, &failures, &HashMap::new()).await.is_empty());
    }

    #[tokio::test]
    async fn sizes_shortfall_against_group_capacity() {
        // two tasks failed on cpu, needing 6 cores total; group "a"'s
        // machines average 4 cores each -> ceil(6/4) = 2 more machines.
        let failures = HashMap::from([(
            "task-1".to_string(),
            vec![AssignmentFailure { dimension: ResourceDimension::Cpu, requested: 4.0, used: 4.0, total: 4.0 }],
        ), (
            "task-2".to_string(),
            vec![AssignmentFailure { dimension: ResourceDimension::Cpu, requested: 2.0, used: 4.0, total: 4.0 }],
        )]);
        let groups = vec!["a".to_string(), "b".to_string()];
        let max_resources = HashMap::from([("a".to_string(), capacity(4.0, 1024.0))]);

        let result = ResourceAwareShortfall.evaluate(&groups, &failures, &max_resources).await;
        assert_eq!(result.get("a"), Some(&2));
        // group "b" has no registered machines, so no capacity to divide by.
        assert_eq!(result.get("b"), Some(&0));
    }

    #[tokio::test]
    async fn ignores_fitness_failures() {
        let failures = HashMap::from([(
            "task-1".to_string(),
            vec![AssignmentFailure { dimension: ResourceDimension::Fitness, requested: 99.0, used: 0.0, total: 0.0 }],
        )]);
        let groups = vec!["a".to_string()];
        let max_resources = HashMap::from([("a".to_string(), capacity(4.0, 1024.0))]);
        let result = ResourceAwareShortfall.evaluate(&groups, &failures, &max_resources).await;
        assert_eq!(result.get("a"), Some(&0));
    }
}
