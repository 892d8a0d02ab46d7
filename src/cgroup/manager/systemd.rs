use std::sync::Arc;

use crate::bitmask::AffinityMask;
use crate::cpuset::CpuSet;
use crate::systemd::{UnitProperty, run_under_systemd_scope};

use crate::cgroup::memory::verify_cgroup_has_enough_memory;
use crate::cgroup::path;
use crate::cgroup::resources::{quota_per_sec_usec, shares_to_weight};
use crate::cgroup::slice::{base_name, conmon_scope, container_scope, expand_slice, is_slice};
use crate::cgroup::{
    CRIO_PREFIX, CgroupPath, Error, HostContext, ManagerRegistry, ResourceSpec, Result,
};

/// Parent slice of containers whose sandbox has none.
const DEFAULT_PARENT: &str = "system.slice";

/// Unit the supervisor scopes are ordered after.
const RUNTIME_UNIT: &str = "crio.service";

/// Cgroups owned by systemd: sandboxes are slices, containers and supervisors are scopes.
#[derive(Debug)]
pub struct SystemdManager {
    ctx: Arc<HostContext>,
    registry: ManagerRegistry,
}

impl SystemdManager {
    pub fn new(ctx: Arc<HostContext>) -> Self {
        Self {
            ctx,
            registry: ManagerRegistry::default(),
        }
    }

    pub fn context(&self) -> &Arc<HostContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &ManagerRegistry {
        &self.registry
    }

    fn parent_or_default(parent: &str) -> &str {
        if parent.is_empty() {
            DEFAULT_PARENT
        } else {
            parent
        }
    }

    /// `<slice>:crio:<id>`, the systemd cgroup path syntax understood by OCI runtimes.
    pub fn container_cgroup_path(&self, parent: &str, id: &str) -> String {
        format!("{}:{CRIO_PREFIX}:{id}", Self::parent_or_default(parent))
    }

    pub fn container_cgroup(&self, parent: &str, id: &str) -> Result<CgroupPath> {
        let parent = Self::parent_or_default(parent);
        log::debug!("Expanding systemd cgroup slice {parent}");
        let expanded = expand_slice(parent).map_err(|source| Error::ContainerSlice {
            id: id.to_owned(),
            source: Box::new(source),
        })?;
        let scope = container_scope(id);
        let absolute = path::absolute(&[&expanded, &scope]);
        Ok(CgroupPath::new(parent, scope, absolute))
    }

    pub fn sandbox_cgroup_path(
        &self,
        parent: &str,
        id: &str,
        min_memory: i64,
    ) -> Result<(String, String)> {
        if parent.is_empty() {
            return Ok((String::new(), String::new()));
        }
        let cgroup_parent = base_name(parent);
        if !is_slice(cgroup_parent) {
            return Err(Error::ParentNotSlice(parent.to_owned()));
        }
        verify_cgroup_has_enough_memory(&self.ctx, parent, min_memory).map_err(Error::for_pod)?;
        let cgroup_path = format!("{cgroup_parent}:{CRIO_PREFIX}:{id}");
        Ok((cgroup_parent.to_owned(), cgroup_path))
    }

    pub(super) fn sandbox_cgroup_absolute_path(&self, parent: &str) -> Result<String> {
        expand_slice(base_name(parent))
    }

    /// Starts a `crio-conmon-<id>.scope` for `pid` below the sandbox slice.
    ///
    /// A slice given as `conmon_cgroup` takes precedence over `cgroup_parent`.
    pub fn move_conmon_to_cgroup(
        &self,
        id: &str,
        cgroup_parent: &str,
        conmon_cgroup: &str,
        pid: u32,
        resources: &ResourceSpec,
    ) -> Result<String> {
        let parent = if is_slice(conmon_cgroup) {
            conmon_cgroup
        } else {
            cgroup_parent
        };
        let unit = conmon_scope(id);

        // conmon ignores SIGPIPE and keeps waiting for its container on shutdown
        let mut properties = vec![
            UnitProperty::KillSignal(libc::SIGPIPE),
            UnitProperty::After(vec![RUNTIME_UNIT.to_owned()]),
        ];

        if let Some(cpus) = resources.cpus() {
            if self.ctx.systemd_has_allowed_cpus() {
                let cpus: CpuSet = cpus.parse()?;
                properties.push(UnitProperty::AllowedCpus(
                    AffinityMask::from_cpus(&cpus).as_bytes().to_vec(),
                ));
            } else {
                log::warn!("Systemd does not support AllowedCPUs; skipping setting for workload");
            }
        }
        if let Some(shares) = resources.shares {
            properties.push(if self.ctx.is_v2() {
                UnitProperty::CpuWeight(shares_to_weight(shares))
            } else {
                UnitProperty::CpuShares(shares)
            });
        }
        if let Some(quota) = resources.quota {
            properties.push(UnitProperty::CpuQuotaPerSecUsec(quota_per_sec_usec(
                quota,
                resources.period_or_default(),
            )));
        }
        if let Some(period) = resources.period {
            properties.push(UnitProperty::CpuQuotaPeriodUsec(period));
        }

        log::debug!("Running conmon under slice {parent} and unit name {unit}");
        run_under_systemd_scope(self.ctx.units(), pid, parent, &unit, properties)
            .map_err(Error::ConmonScope)?;
        Ok(String::new())
    }

    pub fn create_sandbox_cgroup(&self, parent: &str, id: &str) -> Result<()> {
        if parent.is_empty() {
            log::info!("Not creating sandbox cgroup: sbParent is empty");
            return Ok(());
        }
        super::create_sandbox_cgroup(&self.ctx, &expand_slice(parent)?, id)
    }

    pub fn remove_sandbox_cgroup(&self, parent: &str, id: &str) -> Result<()> {
        if parent.is_empty() {
            log::info!("Not removing sandbox cgroup: sbParent is empty");
            return Ok(());
        }
        super::remove_sandbox_cgroup(&self.ctx, &expand_slice(parent)?, id)
    }
}
