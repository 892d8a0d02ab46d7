use std::sync::Arc;

use crate::cgroup::{CgroupHandle, CgroupManager};
use crate::container::{Container, Sandbox};

use super::annotations::{self, c_state_latency};
use super::default::restore_load_balancing;
use super::quota::QuotaStore;
use super::sched_domain::set_cpus_load_balancing_with_retry;
use super::service::IrqBalanceService;
use super::{
    Error, HIGH_PERFORMANCE, HookDeps, Result, RuntimeHandlerHooks, irq, power, shared,
};

/// Hooks that isolate the CPUs of guaranteed, whole-CPU containers for latency sensitive
/// workloads, as requested by the pod's annotations.
#[derive(Debug)]
pub struct HighPerformanceHooks {
    deps: HookDeps,
    irqbalance: IrqBalanceService,
    quotas: QuotaStore,
}

fn wrap(stage: fn(Box<Error>) -> Error) -> impl FnOnce(Error) -> Error {
    move |err| stage(Box::new(err))
}

impl HighPerformanceHooks {
    pub fn new(deps: HookDeps) -> Self {
        let irqbalance = IrqBalanceService::new(Arc::clone(&deps.runner));
        Self {
            deps,
            irqbalance,
            quotas: QuotaStore::default(),
        }
    }

    fn set_load_balancing(&self, container: &Container, enable: bool) -> Result<()> {
        let cpus = container.cpu_set()?;
        set_cpus_load_balancing_with_retry(
            &self.deps.paths.sched_domain,
            &cpus,
            enable,
            self.deps.retry,
        )
    }

    fn set_irq_load_balancing(&self, container: &Container, enable: bool) -> Result<()> {
        let cpus = container.cpu_set()?;
        irq::set_irq_load_balancing(
            &self.deps.paths,
            &self.irqbalance,
            &cpus.to_string(),
            enable,
        )
    }

    /// Handles for the pod cgroup and the cgroups of the container.
    fn cgroups(
        &self,
        container: &Container,
        sandbox: &Sandbox,
    ) -> Result<(CgroupHandle, Vec<CgroupHandle>)> {
        let parent = sandbox.cgroup_parent();
        let manager = CgroupManager::for_parent(parent, Arc::clone(self.deps.manager.context()));
        Ok(manager.pod_and_container_handles(parent, container.id().as_ref())?)
    }

    fn set_shared_cpus(
        &self,
        container: &Container,
        pod: &CgroupHandle,
        containers: &mut Vec<CgroupHandle>,
    ) -> Result<()> {
        let exclusive = container.cpu_set()?;
        let pool = self.deps.shared_cpus_for(container)?;
        log::info!(
            "Add shared CPUs {pool} to container {} with exclusive CPUs {exclusive}",
            container.id()
        );
        shared::set_shared_cpus(self.deps.manager.context(), containers, &exclusive, pool)?;
        let period = container.resources().period_or_default();
        shared::inject_shared_quota(pod, containers, &exclusive, pool, period)
    }

    fn set_c_states(&self, container: &Container, value: &str) -> Result<()> {
        let latency = c_state_latency(value)?;
        log::info!(
            "Configure c-states for container {} to {value:?} (pm_qos_resume_latency_us: {})",
            container.id(),
            latency
        );
        let paths = &self.deps.paths;
        let cpus = container.cpu_set()?;
        power::set_resume_latency(&paths.sysfs_cpu, &paths.cpu_save_dir, &cpus, &latency)
            .map_err(wrap(Error::ResumeLatency))
    }

    fn set_governor(&self, container: &Container, governor: &str) -> Result<()> {
        log::info!(
            "Configure cpu freq governor for container {} to {governor:?}",
            container.id()
        );
        let paths = &self.deps.paths;
        let cpus = container.cpu_set()?;
        power::set_freq_governor(&paths.sysfs_cpu, &paths.cpu_save_dir, &cpus, governor)
            .map_err(wrap(Error::ScalingGovernor))
    }
}

impl RuntimeHandlerHooks for HighPerformanceHooks {
    fn pre_create(
        &self,
        container: &Container,
        sandbox: &Sandbox,
    ) -> Result<Vec<(String, String)>> {
        log::info!(
            "Run {HIGH_PERFORMANCE:?} runtime handler pre-create hook for the container {}",
            container.id()
        );
        if !super::should_run_hooks(container, sandbox, "PreCreate")
            || !annotations::shared_cpus_requested(sandbox.annotations(), container.name())
        {
            return Ok(Vec::new());
        }
        let exclusive = container.cpu_set()?;
        let pool = self.deps.shared_cpus_for(container)?;
        Ok(shared::cpuset_env(&exclusive, pool))
    }

    fn pre_start(&self, container: &Container, sandbox: &Sandbox) -> Result<()> {
        log::info!(
            "Run {HIGH_PERFORMANCE:?} runtime handler pre-start hook for the container {}",
            container.id()
        );
        if !super::should_run_hooks(container, sandbox, "PreStart") {
            return Ok(());
        }
        let annotations = sandbox.annotations();

        let mut cgroups = None;
        if annotations::shared_cpus_requested(annotations, container.name()) {
            let (pod, mut containers) = self
                .cgroups(container, sandbox)
                .map_err(wrap(Error::SharedCpus))?;
            self.set_shared_cpus(container, &pod, &mut containers)
                .map_err(wrap(Error::SharedCpus))?;
            cgroups = Some((pod, containers));
        }

        if annotations::cpu_load_balancing_disabled(annotations) {
            self.set_load_balancing(container, false)
                .map_err(wrap(Error::LoadBalancing))?;
        }

        if annotations::irq_load_balancing_disabled(annotations) {
            log::info!("Disable irq smp balancing for container {}", container.id());
            self.set_irq_load_balancing(container, false)
                .map_err(wrap(Error::IrqLoadBalancing))?;
        }

        if annotations::cpu_quota_disabled(annotations) {
            log::info!("Disable cpu cfs quota for container {}", container.id());
            let (pod, containers) = match cgroups.take() {
                Some(cgroups) => cgroups,
                None => self
                    .cgroups(container, sandbox)
                    .map_err(wrap(Error::CpuQuota))?,
            };
            self.quotas
                .disable(container.id().as_ref(), &pod, &containers)
                .map_err(wrap(Error::CpuQuota))?;
        }

        if let Some(value) = annotations::c_states(annotations) {
            self.set_c_states(container, value)?;
        }

        if let Some(governor) = annotations::freq_governor(annotations) {
            self.set_governor(container, governor)?;
        }

        Ok(())
    }

    fn pre_stop(&self, container: &Container, sandbox: &Sandbox) -> Result<()> {
        log::info!(
            "Run {HIGH_PERFORMANCE:?} runtime handler pre-stop hook for the container {}",
            container.id()
        );
        if !super::should_run_hooks(container, sandbox, "PreStop") {
            return Ok(());
        }
        let annotations = sandbox.annotations();

        if annotations::cpu_load_balancing_disabled(annotations) {
            self.set_load_balancing(container, true)
                .map_err(wrap(Error::LoadBalancing))?;
        }

        if annotations::irq_load_balancing_disabled(annotations) {
            self.set_irq_load_balancing(container, true)
                .map_err(wrap(Error::IrqLoadBalancing))?;
        }

        if annotations::cpu_quota_disabled(annotations) {
            self.quotas
                .restore(container.id().as_ref())
                .map_err(wrap(Error::CpuQuota))?;
        }

        let paths = &self.deps.paths;
        if annotations::c_states(annotations).is_some() {
            let cpus = container.cpu_set()?;
            power::restore_resume_latency(&paths.sysfs_cpu, &paths.cpu_save_dir, &cpus)
                .map_err(wrap(Error::ResumeLatency))?;
        }

        if annotations::freq_governor(annotations).is_some() {
            let cpus = container.cpu_set()?;
            power::restore_freq_governor(&paths.sysfs_cpu, &paths.cpu_save_dir, &cpus)
                .map_err(wrap(Error::ScalingGovernor))?;
        }

        Ok(())
    }

    fn post_stop(&self, container: &Container, _sandbox: &Sandbox) -> Result<()> {
        restore_load_balancing(&self.deps, container)
    }
}
