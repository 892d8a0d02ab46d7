//! Creo Isolation: the resource-isolation core of a Kubernetes container runtime.
//!
//! This library maps sandboxes and containers onto kernel cgroups through either systemd or
//! the cgroup filesystem, on cgroup v1 and v2 hosts. It normalises their resource statistics
//! and reversibly isolates CPUs from scheduler load balancing, interrupts and CFS quotas for
//! latency sensitive workloads.

use std::sync::Arc;

use cgroup::{CgroupManager, HostContext};
use command::{CommandRunner, SystemCommandRunner};
use error::ResultOkLogExt;
use hooks::{HookDeps, IrqBalanceService};
use systemd::BusctlUnitManager;

pub mod bitmask;
pub mod cgroup;
pub mod command;
pub mod config;
pub mod container;
pub mod cpuset;
pub mod error;
pub mod fsutil;
pub mod hooks;
pub mod mountinfo;
pub mod systemd;

/// Prepares the host for the configured runtime.
///
/// Loads the configuration, resolves the cgroup driver and version, selects the runtime
/// handler hooks and puts back the irqbalance configuration a reboot may have left behind.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or names an unknown cgroup manager.
/// A failed irqbalance restore is only logged.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::load()?;
    log::debug!("Loaded config: {config:?}");

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let units = Arc::new(BusctlUnitManager::new(Arc::clone(&runner)));
    let mut ctx = HostContext::new(&config.paths.cgroup_root, &config.paths.proc_root, units);
    if let Some(version) = config.cgroup_version {
        ctx = ctx.with_version(version);
    }

    let manager = Arc::new(CgroupManager::for_driver(config.driver()?, Arc::new(ctx)));
    log::info!("Using cgroup manager {}", manager.identity());
    if manager.is_systemd() {
        log::debug!(
            "systemd supports AllowedCPUs: {}",
            manager.context().systemd_has_allowed_cpus()
        );
    }

    let deps = HookDeps::new(
        Arc::clone(&manager),
        Arc::clone(&runner),
        config.paths.clone(),
    )
    .with_shared_cpus(config.shared_cpus()?)
    .with_exec_cpu_affinity(config.exec_cpu_affinity);
    match hooks::hooks_for_handler(&config.runtime_handler, &config.allowed_annotations, deps) {
        Some(hooks) => log::info!(
            "Runtime handler {:?} runs {hooks:?}",
            config.runtime_handler
        ),
        None => log::info!(
            "Runtime handler {:?} needs no isolation hooks",
            config.runtime_handler
        ),
    }

    hooks::irq::restore_irq_balance_config(&config.paths, &IrqBalanceService::new(runner))
        .ok_log("failed to restore irqbalance config");
    Ok(())
}
