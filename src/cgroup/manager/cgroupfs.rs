use std::sync::Arc;

use crate::cgroup::memory::verify_cgroup_has_enough_memory;
use crate::cgroup::path;
use crate::cgroup::slice::{base_name, is_slice};
use crate::cgroup::{
    CgroupHandle, CgroupPath, Error, HostContext, ManagerRegistry, ResourceSpec, Result,
};

use super::leaf_name;

/// Parent of containers whose sandbox has none.
const DEFAULT_PARENT: &str = "/crio";

/// `conmon_cgroup` value placing the supervisor next to its pod.
const POD_CGROUP: &str = "pod";

/// Cgroups managed as plain directories below the cgroup root.
#[derive(Debug)]
pub struct CgroupfsManager {
    ctx: Arc<HostContext>,
    registry: ManagerRegistry,
}

impl CgroupfsManager {
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

    pub fn container_cgroup_path(&self, parent: &str, id: &str) -> String {
        self.container_cgroup(parent, id).absolute().to_owned()
    }

    pub fn container_cgroup(&self, parent: &str, id: &str) -> CgroupPath {
        let parent = if parent.is_empty() {
            DEFAULT_PARENT
        } else {
            parent
        };
        let leaf = leaf_name(id);
        let absolute = path::absolute(&[parent, &leaf]);
        CgroupPath::new(parent, leaf, absolute)
    }

    pub fn sandbox_cgroup_path(
        &self,
        parent: &str,
        id: &str,
        min_memory: i64,
    ) -> Result<(String, String)> {
        if is_slice(base_name(parent)) {
            return Err(Error::ParentIsSlice(parent.to_owned()));
        }
        verify_cgroup_has_enough_memory(&self.ctx, parent, min_memory).map_err(Error::for_pod)?;
        Ok((parent.to_owned(), path::join(parent, &leaf_name(id))))
    }

    pub(super) fn sandbox_cgroup_absolute_path(&self, parent: &str) -> String {
        path::absolute(&[parent])
    }

    /// Moves `pid` into `<cgroup_parent>/crio-conmon-<id>` with the CPU settings of `resources`.
    ///
    /// Returns the created cgroup path, which the caller removes once the supervisor exits.
    pub fn move_conmon_to_cgroup(
        &self,
        id: &str,
        cgroup_parent: &str,
        conmon_cgroup: &str,
        pid: u32,
        resources: &ResourceSpec,
    ) -> Result<String> {
        if conmon_cgroup != POD_CGROUP && !conmon_cgroup.is_empty() {
            return Err(Error::InvalidConmonCgroup(conmon_cgroup.to_owned()));
        }

        let cgroup_path = format!("{cgroup_parent}/crio-conmon-{id}");
        let handle = CgroupHandle::new(&self.ctx, &cgroup_path);
        handle.create()?;
        let cpu_only = ResourceSpec {
            memory_limit: None,
            ..resources.clone()
        };
        handle.set_resources(&cpu_only, 0)?;
        handle.add_process(pid)?;
        log::debug!("Moved conmon {pid} to cgroup {cgroup_path}");
        Ok(cgroup_path)
    }

    pub fn create_sandbox_cgroup(&self, parent: &str, id: &str) -> Result<()> {
        super::create_sandbox_cgroup(&self.ctx, &path::absolute(&[parent]), id)
    }

    pub fn remove_sandbox_cgroup(&self, parent: &str, id: &str) -> Result<()> {
        super::remove_sandbox_cgroup(&self.ctx, &path::absolute(&[parent]), id)
    }
}
