//! Runtime handler hooks that isolate CPUs for latency sensitive containers.
//!
//! The hooks run synchronously around a container's lifecycle:
//!
//! - `pre_create` hands out the environment of containers using the shared CPU pool.
//! - `pre_start` disables scheduler load balancing, IRQ handling and the CFS quota on the
//!   container's CPUs, and applies c-state and frequency governor settings.
//! - `pre_stop` reverses every change, and may safely be repeated.
//! - `post_stop` re-enables load balancing once the container is gone.
//!
//! Only containers of guaranteed pods that request whole CPUs are isolated, and only for the
//! features their pod's annotations ask for.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use creo_isolation::cgroup::{CgroupManager, HostContext};
//! use creo_isolation::command::SystemCommandRunner;
//! use creo_isolation::config::HostPaths;
//! use creo_isolation::hooks::{self, HookDeps};
//! use creo_isolation::systemd::BusctlUnitManager;
//!
//! let runner = Arc::new(SystemCommandRunner);
//! let units = Arc::new(BusctlUnitManager::new(runner.clone()));
//! let ctx = Arc::new(HostContext::new("/sys/fs/cgroup", "/proc", units));
//! let deps = HookDeps::new(
//!     Arc::new(CgroupManager::new("systemd", ctx).unwrap()),
//!     runner,
//!     HostPaths::default(),
//! );
//! assert!(hooks::hooks_for_handler("high-performance", &[], deps).is_some());
//! ```

pub mod annotations;
mod default;
mod error;
mod high_performance;
pub mod irq;
pub mod power;
mod quota;
pub mod sched_domain;
mod service;
pub mod shared;

use std::fmt;
use std::sync::Arc;

use crate::cgroup::CgroupManager;
use crate::command::CommandRunner;
use crate::config::HostPaths;
use crate::container::{Container, Sandbox};
use crate::cpuset::CpuSet;

pub use default::DefaultCpuLoadBalanceHooks;
pub use error::{Error, Result};
pub use high_performance::HighPerformanceHooks;
pub use quota::QuotaStore;
pub use sched_domain::Retry;
pub use service::IrqBalanceService;
pub use shared::ExecCpuAffinity;

/// Runtime handler name, or name fragment, selecting [`HighPerformanceHooks`].
pub const HIGH_PERFORMANCE: &str = "high-performance";

/// Lifecycle callbacks a runtime handler runs for each of its containers.
pub trait RuntimeHandlerHooks: fmt::Debug + Send + Sync {
    /// Environment variables to add to the container's process.
    fn pre_create(
        &self,
        _container: &Container,
        _sandbox: &Sandbox,
    ) -> Result<Vec<(String, String)>> {
        Ok(Vec::new())
    }
    fn pre_start(&self, container: &Container, sandbox: &Sandbox) -> Result<()>;
    fn pre_stop(&self, container: &Container, sandbox: &Sandbox) -> Result<()>;
    fn post_stop(&self, container: &Container, sandbox: &Sandbox) -> Result<()>;
}

/// What the hooks act through.
#[derive(Debug, Clone)]
pub struct HookDeps {
    pub manager: Arc<CgroupManager>,
    pub runner: Arc<dyn CommandRunner>,
    pub paths: HostPaths,
    pub retry: Retry,
    /// The shared CPU pool, if the host has one.
    pub shared_cpus: Option<CpuSet>,
    pub exec_cpu_affinity: ExecCpuAffinity,
}

impl HookDeps {
    pub fn new(
        manager: Arc<CgroupManager>,
        runner: Arc<dyn CommandRunner>,
        paths: HostPaths,
    ) -> Self {
        Self {
            manager,
            runner,
            paths,
            retry: Retry::default(),
            shared_cpus: None,
            exec_cpu_affinity: ExecCpuAffinity::Default,
        }
    }

    pub fn with_shared_cpus(mut self, shared_cpus: Option<CpuSet>) -> Self {
        self.shared_cpus = shared_cpus.filter(|cpus| !cpus.is_empty());
        self
    }

    pub fn with_exec_cpu_affinity(mut self, affinity: ExecCpuAffinity) -> Self {
        self.exec_cpu_affinity = affinity;
        self
    }

    /// The shared pool handed to `container`, which asked for it.
    fn shared_cpus_for(&self, container: &Container) -> Result<&CpuSet> {
        self.shared_cpus
            .as_ref()
            .ok_or_else(|| Error::NoSharedCpus(container.id().clone()))
    }
}

/// The hooks for runtime handler `name`, if it needs any.
///
/// High-performance handlers get the full isolation; any other handler only gets the load
/// balancing cleanup, and only when the load balancing annotation is allowed.
pub fn hooks_for_handler(
    name: &str,
    allowed_annotations: &[String],
    deps: HookDeps,
) -> Option<Box<dyn RuntimeHandlerHooks>> {
    if name.contains(HIGH_PERFORMANCE) {
        return Some(Box::new(HighPerformanceHooks::new(deps)));
    }
    if allowed_annotations
        .iter()
        .any(|a| a == annotations::CPU_LOAD_BALANCING)
    {
        return Some(Box::new(DefaultCpuLoadBalanceHooks::new(deps)));
    }
    None
}

/// Whether the container qualifies for isolation: a guaranteed pod asking for whole CPUs.
fn should_run_hooks(container: &Container, sandbox: &Sandbox, stage: &str) -> bool {
    let id = container.id();
    if sandbox.cgroup_parent().contains("burstable") {
        log::info!("Container {id} is a burstable pod. Skip {stage}.");
        return false;
    }
    if sandbox.cgroup_parent().contains("besteffort") {
        log::info!("Container {id} is a besteffort pod. Skip {stage}.");
        return false;
    }
    if !container.resources().has_whole_cpus() {
        log::info!("Container {id} requests partial cpu(s). Skip {stage}.");
        return false;
    }
    true
}

/// The CPU processes exec'd into `container` are pinned to, if any.
///
/// # Errors
///
/// Fails if the container has no CPUs, or asked for the shared pool on a host without one.
pub fn exec_cpu(
    deps: &HookDeps,
    container: &Container,
    sandbox: &Sandbox,
) -> Result<Option<usize>> {
    if deps.exec_cpu_affinity == ExecCpuAffinity::Default {
        return Ok(None);
    }
    let exclusive = container.cpu_set()?;
    let shared = if annotations::shared_cpus_requested(sandbox.annotations(), container.name()) {
        Some(deps.shared_cpus_for(container)?)
    } else {
        None
    };
    Ok(shared::exec_cpu(deps.exec_cpu_affinity, &exclusive, shared))
}

/// Whether the container will run without a CFS quota, so its creator can leave it unset.
pub fn should_cpu_quota_be_disabled(container: &Container, sandbox: &Sandbox) -> bool {
    should_run_hooks(container, sandbox, "CPU quota")
        && annotations::cpu_quota_disabled(sandbox.annotations())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::cgroup::{CgroupDriver, CgroupVersion, HostContext, ResourceSpec};
    use crate::command::testing::MockRunner;
    use crate::container::ContainerID;
    use crate::systemd::testing::MockUnitManager;

    /// Dependencies for a host rooted in `root`, with every path below it.
    pub fn deps(root: &Path, driver: CgroupDriver, version: CgroupVersion) -> HookDeps {
        let paths = HostPaths::rooted_at(root);
        std::fs::create_dir_all(&paths.cgroup_root).unwrap();
        let ctx = HostContext::new(
            &paths.cgroup_root,
            &paths.proc_root,
            Arc::new(MockUnitManager::new(true)),
        )
        .with_version(version);
        HookDeps {
            manager: Arc::new(CgroupManager::for_driver(driver, Arc::new(ctx))),
            runner: Arc::new(MockRunner::new()),
            paths,
            retry: Retry {
                interval: Duration::from_millis(1),
                timeout: Duration::from_millis(10),
            },
            shared_cpus: None,
            exec_cpu_affinity: ExecCpuAffinity::Default,
        }
    }

    pub fn container(id: &str, cpus: Option<&str>, shares: u64) -> Container {
        let resources = ResourceSpec {
            cpus: cpus.map(str::to_owned),
            shares: Some(shares),
            ..Default::default()
        };
        Container::new(ContainerID::new(id).unwrap(), "app", resources)
    }

    pub fn sandbox(parent: &str, annotations: &[(&str, &str)]) -> Sandbox {
        let annotations: HashMap<String, String> = annotations
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Sandbox::new(ContainerID::new("sb").unwrap(), parent, annotations)
    }
}
