use crate::container::{Container, Sandbox};
use crate::cpuset::CpuSet;

use super::sched_domain::set_cpus_load_balancing_with_retry;
use super::{Error, HookDeps, Result, RuntimeHandlerHooks};

/// Hooks for runtimes that allow the CPU load balancing annotation without the full
/// high-performance treatment. They only undo load balancing changes once a container is gone.
#[derive(Debug)]
pub struct DefaultCpuLoadBalanceHooks {
    deps: HookDeps,
}

impl DefaultCpuLoadBalanceHooks {
    pub fn new(deps: HookDeps) -> Self {
        Self { deps }
    }
}

impl RuntimeHandlerHooks for DefaultCpuLoadBalanceHooks {
    fn pre_start(&self, _container: &Container, _sandbox: &Sandbox) -> Result<()> {
        Ok(())
    }

    fn pre_stop(&self, _container: &Container, _sandbox: &Sandbox) -> Result<()> {
        Ok(())
    }

    fn post_stop(&self, container: &Container, _sandbox: &Sandbox) -> Result<()> {
        restore_load_balancing(&self.deps, container)
    }
}

/// Turns load balancing back on for the CPUs of a stopped container.
///
/// Only cgroupfs on v1 needs this; systemd cleans up its own cpusets.
pub(super) fn restore_load_balancing(deps: &HookDeps, container: &Container) -> Result<()> {
    let Some(cpus) = container.resources().cpus() else {
        return Ok(());
    };
    if deps.manager.is_systemd() {
        return Ok(());
    }
    if deps.manager.context().is_v2() {
        return Err(Error::Unsupported(
            "post-stop load balancing restore on cgroup v2",
        ));
    }

    let cpus: CpuSet = cpus.parse()?;
    log::info!(
        "Restore cpu load balancing for stopped container {}",
        container.id()
    );
    set_cpus_load_balancing_with_retry(&deps.paths.sched_domain, &cpus, true, deps.retry)
}
