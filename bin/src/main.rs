//! Demo scheduler loop: wires `placement-core` and `autoscaler` together
//! against synthetic offers and requests. Stands in for the external
//! scheduler loop the core crates leave out of scope -- it exists to
//! exercise both end to end, not as a production scheduler.
use std::{collections::HashSet, sync::Arc, sync::Mutex, time::SystemTime};

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::{runtime::Builder, sync::mpsc, time::interval};
use tokio_util::sync::CancellationToken;

use autoscaler::{
    action::{AutoScaleAction, AutoscalerInput},
    rule::AutoScaleRule,
    shortfall::ResourceAwareShortfall,
    Autoscaler, MachineRegistry,
};
use placement_core::{
    config::{cli, trace},
    constraint::{FitnessFn, TaskTrackerState, TrackerDuplicate},
    lease::{AttributeMap, Lease, PortRange},
    machine::{Indices, MachineState},
    reject_limiter::GovernorRejectLimiter,
    request::TaskRequest,
    tracing::{debug, error, info, warn},
};

/// A trivial cluster-wide task tracker for the demo loop -- a real
/// deployment wires this up to its own external tracker.
#[derive(Debug, Default)]
struct InMemoryTracker(Mutex<HashSet<String>>);

impl TaskTrackerState for InMemoryTracker {
    fn is_task_tracked(&self, task_id: &str) -> bool {
        self.0.lock().unwrap().contains(task_id)
    }

    fn track_pending_assignment(&self, task_id: &str, _hostname: &str) -> Result<(), TrackerDuplicate> {
        if !self.0.lock().unwrap().insert(task_id.to_string()) {
            return Err(TrackerDuplicate);
        }
        Ok(())
    }

    fn untrack(&self, task_id: &str) {
        self.0.lock().unwrap().remove(task_id);
    }
}

fn identity_fitness() -> Box<FitnessFn> {
    Box::new(|_req, _vm, _tracker| 1.0)
}

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const ZONES: [&str; 3] = ["zone-a", "zone-b", "zone-c"];
const DEMO_GROUP: &str = "default";

fn main() -> Result<()> {
    use cli::Parser;
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.sched_log)?;
    debug!(?config, ?trace_config);

    let mut builder = Builder::new_multi_thread();
    builder.thread_name(&config.thread_name).enable_all();
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    let rt = builder.build()?;

    rt.block_on(async move {
        match tokio::spawn(run(config)).await {
            Err(err) => error!(?err, "demo scheduler task panicked"),
            Ok(Err(err)) => error!(?err, "demo scheduler exited with error"),
            Ok(Ok(())) => debug!("exiting..."),
        }
    });

    Ok(())
}

async fn run(config: cli::Config) -> Result<()> {
    let indices = Arc::new(Indices::default());
    let machines: MachineRegistry = Arc::new(DashMap::new());
    seed_demo_machines(&machines);

    let rule = AutoScaleRule::keep_all(DEMO_GROUP, 1, 3, config.tick_secs.max(1) as i64 * 6);
    let (autoscaler, mut actions) = Autoscaler::new(
        vec![rule],
        config.partition_attribute_name.clone(),
        config.map_hostname_attribute_name.clone(),
        config.scale_down_balanced_by_attribute_name.clone(),
        Arc::new(ResourceAwareShortfall),
        machines.clone(),
        indices.clone(),
        now_millis(),
    )
    .context("duplicate autoscale rule name in static demo configuration")?;

    let (input_tx, input_rx) = mpsc::channel::<Result<AutoscalerInput, anyhow::Error>>(16);
    let token = CancellationToken::new();

    let autoscaler_task = tokio::spawn(autoscaler.run(input_rx, now_millis));
    let actions_task = tokio::spawn(async move {
        while let Ok(action) = actions.recv().await {
            log_action(&action);
        }
    });

    let reject_limiter = GovernorRejectLimiter::new(config.rejects_per_tick);
    let mut ticker = interval(config.tick_duration());
    let shutdown = token.clone();
    let scheduler_loop = async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    run_scheduling_tick(&machines, &indices, &reject_limiter, &input_tx, &config).await;
                }
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            token.cancel();
        }
        _ = scheduler_loop => {}
    }

    // scheduler_loop owned `input_tx`; it just dropped, closing the
    // channel and letting `autoscaler.run` end naturally.
    if let Err(err) = autoscaler_task.await {
        warn!(?err, "autoscaler task failed");
    }
    if let Err(err) = actions_task.await {
        warn!(?err, "action-logging task failed");
    }
    Ok(())
}

/// Populate the registry with a small fixed fleet of idle machines spread
/// across synthetic zones, standing in for a real offer feed.
fn seed_demo_machines(machines: &MachineRegistry) {
    let indices = Indices::default();
    for zone in ZONES {
        for replica in 0..2 {
            let hostname = format!("host-{zone}-{replica}");
            let mut machine = MachineState::new(hostname.clone());
            let mut attributes = AttributeMap::new();
            attributes.insert("zone".to_string(), zone.into());
            attributes.insert(DEMO_GROUP.to_string(), DEMO_GROUP.into());
            let lease = Lease {
                lease_id: format!("{hostname}-offer-0"),
                vm_id: format!("{hostname}-vm"),
                hostname: hostname.clone(),
                cpu_cores: 16.0,
                memory_mb: 32_768.0,
                network_mbps: 10_000.0,
                disk_mb: 500_000.0,
                port_ranges: vec![PortRange::new(31000, 32000)],
                attributes,
                offered_at_millis: now_millis(),
            };
            if let Err(err) = machine.add_lease(lease, &indices, now_millis(), |_| {}) {
                error!(?err, hostname, "failed to seed demo machine");
            }
            machines.insert(hostname, Arc::new(Mutex::new(machine)));
        }
    }
}

/// Attempt to place one synthetic task per machine, then report idle
/// machines and any placement failures to the autoscaler for this tick.
async fn run_scheduling_tick(
    machines: &MachineRegistry,
    indices: &Arc<Indices>,
    reject_limiter: &GovernorRejectLimiter,
    input_tx: &mpsc::Sender<Result<AutoscalerInput, anyhow::Error>>,
    config: &cli::Config,
) {
    let now = now_millis();
    let tracker = InMemoryTracker::default();
    let fitness = identity_fitness();
    let mut idle_leases = Vec::new();
    let mut failures = std::collections::HashMap::new();

    for entry in machines.iter() {
        let hostname = entry.key().clone();
        let handle = entry.value().clone();
        let Ok(mut machine) = handle.lock() else {
            error!(hostname, "machine lock poisoned, skipping this tick");
            continue;
        };

        machine.prepare_for_scheduling(&tracker);
        // undo the drain `reset_and_harvest_successful` left behind last
        // tick and re-fold whatever leases are still held.
        machine.reset_resources();
        machine.expire_limited_leases(reject_limiter, now, config.lease_offer_expiry_secs, indices, |lease| {
            debug!(lease_id = %lease.lease_id, "lease expired");
        });

        let request = TaskRequest {
            request_id: format!("demo-task-{hostname}-{now}"),
            task_id: format!("demo-task-{hostname}"),
            cpu_cores: 1.0,
            memory_mb: 1024.0,
            network_mbps: 10.0,
            disk_mb: 1000.0,
            ports_requested: 1,
            is_exclusive: false,
            soft_constraints: vec![],
        };

        match machine.try_assign(&request, &[], &fitness, &tracker) {
            Some(result) if result.successful => {
                if let Err(err) = machine.assign(&request, result, &tracker) {
                    error!(?err, hostname, "commit failed after successful try_assign");
                }
            }
            Some(result) => {
                if let Some(failure) = result.failure {
                    if let placement_core::request::PlacementFailure::Resources(dims) = failure {
                        failures.entry(request.task_id.clone()).or_insert_with(Vec::new).extend(dims);
                    }
                }
            }
            None => {}
        }

        let view = machine.update_total_lease_view();
        debug!(hostname, cpu_cores = view.cpu_cores, "published total lease view");

        if let Some(result) = machine.reset_and_harvest_successful(indices) {
            debug!(hostname, assignments = result.successful_assignments.len(), "closed out iteration, harvested completed assignment");
        }

        if machine.lease_count() > 0 {
            let status = machine.resource_status(config.report_disk_in_status);
            if status.cpu_cores.0 == 0.0 {
                // nothing assigned this tick on this host -- report its lease as idle capacity
                if let Some(lease) = demo_idle_lease_snapshot(&hostname) {
                    idle_leases.push(lease);
                }
            }
        }
    }

    if input_tx.send(Ok(AutoscalerInput { idle_leases, failures })).await.is_err() {
        warn!("autoscaler input channel closed, dropping tick");
    }
}

/// The demo doesn't keep a full lease snapshot around per machine outside
/// `MachineState`; reconstruct a minimal idle-lease record carrying just
/// the attributes the autoscaler's partitioning and balance logic need.
fn demo_idle_lease_snapshot(hostname: &str) -> Option<Lease> {
    let zone = ZONES.iter().find(|z| hostname.contains(*z))?;
    let mut attributes = AttributeMap::new();
    attributes.insert("zone".to_string(), (*zone).into());
    attributes.insert(DEMO_GROUP.to_string(), DEMO_GROUP.into());
    Some(Lease {
        lease_id: format!("{hostname}-idle-snapshot"),
        vm_id: String::new(),
        hostname: hostname.to_string(),
        cpu_cores: 0.0,
        memory_mb: 0.0,
        network_mbps: 0.0,
        disk_mb: 0.0,
        port_ranges: vec![],
        attributes,
        offered_at_millis: now_millis(),
    })
}

fn log_action(action: &AutoScaleAction) {
    match action {
        AutoScaleAction::ScaleUp { rule_name, count } => info!(rule_name, count, "recommend scale up"),
        AutoScaleAction::ScaleDown { rule_name, host_identifiers } => {
            info!(rule_name, hosts = ?host_identifiers, "recommend scale down")
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}
