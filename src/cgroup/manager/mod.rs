//! Driver dispatch for cgroup operations.
//!
//! [`CgroupManager`] is built once from the configured driver name. Both drivers share the
//! [`HostContext`] and keep their own [`ManagerRegistry`] of per-entity handles.

mod cgroupfs;
mod systemd;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::fsutil;

use super::context::join_cgroup;
use super::stats::{CgroupStats, ContainerStats, SandboxStats};
use super::{
    CRIO_PREFIX, CgroupDriver, CgroupHandle, CgroupIdentity, CgroupPath, Error, HostContext,
    ManagerRegistry, ResourceSpec, Result, path,
};

pub use cgroupfs::CgroupfsManager;
pub use systemd::SystemdManager;

/// Name of the cgroup leaf of a container or sandbox.
pub(crate) fn leaf_name(id: &str) -> String {
    format!("{CRIO_PREFIX}-{id}")
}

/// Maps sandboxes and containers onto cgroups for one driver.
#[derive(Debug)]
pub enum CgroupManager {
    Systemd(SystemdManager),
    Cgroupfs(CgroupfsManager),
}

impl CgroupManager {
    /// Builds the manager for the driver called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidManager`] for names other than `systemd` and `cgroupfs`.
    pub fn new(name: &str, ctx: Arc<HostContext>) -> Result<Self> {
        Ok(Self::for_driver(name.parse()?, ctx))
    }

    pub fn for_driver(driver: CgroupDriver, ctx: Arc<HostContext>) -> Self {
        match driver {
            CgroupDriver::Systemd => CgroupManager::Systemd(SystemdManager::new(ctx)),
            CgroupDriver::Cgroupfs => CgroupManager::Cgroupfs(CgroupfsManager::new(ctx)),
        }
    }

    /// The manager matching the naming convention of `parent`: systemd for slices, cgroupfs
    /// otherwise.
    pub fn for_parent(parent: &str, ctx: Arc<HostContext>) -> Self {
        let driver = if super::slice::is_slice(parent) {
            CgroupDriver::Systemd
        } else {
            CgroupDriver::Cgroupfs
        };
        Self::for_driver(driver, ctx)
    }

    pub fn driver(&self) -> CgroupDriver {
        match self {
            CgroupManager::Systemd(_) => CgroupDriver::Systemd,
            CgroupManager::Cgroupfs(_) => CgroupDriver::Cgroupfs,
        }
    }

    pub fn name(&self) -> &'static str {
        self.driver().name()
    }

    pub fn is_systemd(&self) -> bool {
        matches!(self, CgroupManager::Systemd(_))
    }

    pub fn context(&self) -> &Arc<HostContext> {
        match self {
            CgroupManager::Systemd(m) => m.context(),
            CgroupManager::Cgroupfs(m) => m.context(),
        }
    }

    fn registry(&self) -> &ManagerRegistry {
        match self {
            CgroupManager::Systemd(m) => m.registry(),
            CgroupManager::Cgroupfs(m) => m.registry(),
        }
    }

    pub fn identity(&self) -> CgroupIdentity {
        CgroupIdentity {
            driver: self.driver(),
            version: self.context().cgroup_version(),
        }
    }

    /// The cgroup path handed to the OCI runtime for container `id`.
    pub fn container_cgroup_path(&self, parent: &str, id: &str) -> String {
        match self {
            CgroupManager::Systemd(m) => m.container_cgroup_path(parent, id),
            CgroupManager::Cgroupfs(m) => m.container_cgroup_path(parent, id),
        }
    }

    /// The container cgroup resolved below the cgroup root.
    ///
    /// # Errors
    ///
    /// Fails on systemd if the parent is not a valid slice name.
    pub fn container_cgroup(&self, parent: &str, id: &str) -> Result<CgroupPath> {
        match self {
            CgroupManager::Systemd(m) => m.container_cgroup(parent, id),
            CgroupManager::Cgroupfs(m) => Ok(m.container_cgroup(parent, id)),
        }
    }

    pub fn container_cgroup_absolute_path(&self, parent: &str, id: &str) -> Result<String> {
        Ok(self.container_cgroup(parent, id)?.absolute().to_owned())
    }

    /// Validates `parent` and returns the cgroup parent and the cgroup path of sandbox `id`.
    ///
    /// The memory limit already configured on the parent must be at least `min_memory`.
    ///
    /// # Errors
    ///
    /// Fails if the parent contradicts the driver's naming convention or if its memory limit
    /// is too low.
    pub fn sandbox_cgroup_path(
        &self,
        parent: &str,
        id: &str,
        min_memory: i64,
    ) -> Result<(String, String)> {
        match self {
            CgroupManager::Systemd(m) => m.sandbox_cgroup_path(parent, id, min_memory),
            CgroupManager::Cgroupfs(m) => m.sandbox_cgroup_path(parent, id, min_memory),
        }
    }

    fn sandbox_cgroup_absolute_path(&self, parent: &str) -> Result<String> {
        match self {
            CgroupManager::Systemd(m) => m.sandbox_cgroup_absolute_path(parent),
            CgroupManager::Cgroupfs(m) => Ok(m.sandbox_cgroup_absolute_path(parent)),
        }
    }

    fn container_handle(&self, parent: &str, id: &str) -> Result<Arc<CgroupHandle>> {
        let path = self.container_cgroup_absolute_path(parent, id)?;
        Ok(self
            .registry()
            .container_or_insert_with(id, &path, || CgroupHandle::new(self.context(), &path)))
    }

    fn sandbox_handle(&self, parent: &str, id: &str) -> Result<Arc<CgroupHandle>> {
        let path = self.sandbox_cgroup_absolute_path(parent)?;
        Ok(self
            .registry()
            .sandbox_or_insert_with(id, &path, || CgroupHandle::new(self.context(), &path)))
    }

    /// Normalised stats of container `id`.
    pub fn container_cgroup_stats(&self, parent: &str, id: &str) -> Result<CgroupStats> {
        Ok(self.container_handle(parent, id)?.stats())
    }

    /// Normalised stats of sandbox `id`, read from its parent cgroup.
    pub fn sandbox_cgroup_stats(&self, parent: &str, id: &str) -> Result<CgroupStats> {
        Ok(self.sandbox_handle(parent, id)?.stats())
    }

    pub fn populate_container_cgroup_stats(
        &self,
        parent: &str,
        id: &str,
        stats: &mut ContainerStats,
    ) -> Result<()> {
        stats.populate(&self.container_cgroup_stats(parent, id)?);
        Ok(())
    }

    pub fn populate_sandbox_cgroup_stats(
        &self,
        parent: &str,
        id: &str,
        stats: &mut SandboxStats,
    ) -> Result<()> {
        stats.populate(&self.sandbox_cgroup_stats(parent, id)?);
        Ok(())
    }

    /// Drops the cached handle of container `id`.
    pub fn remove_container_cg_manager(&self, id: &str) {
        if self.registry().remove_container(id).is_some() {
            log::debug!("Removed cgroup handle of container {id}");
        }
    }

    /// Drops the cached handle of sandbox `id`.
    pub fn remove_sandbox_cg_manager(&self, id: &str) {
        if self.registry().remove_sandbox(id).is_some() {
            log::debug!("Removed cgroup handle of sandbox {id}");
        }
    }

    /// Places the supervisor process `pid` of container `id` into its own cgroup.
    ///
    /// Returns the cgroup path the caller has to remove once the supervisor exits; systemd
    /// cleans up its scopes itself and returns an empty path.
    pub fn move_conmon_to_cgroup(
        &self,
        id: &str,
        cgroup_parent: &str,
        conmon_cgroup: &str,
        pid: u32,
        resources: &ResourceSpec,
    ) -> Result<String> {
        match self {
            CgroupManager::Systemd(m) => {
                m.move_conmon_to_cgroup(id, cgroup_parent, conmon_cgroup, pid, resources)
            }
            CgroupManager::Cgroupfs(m) => {
                m.move_conmon_to_cgroup(id, cgroup_parent, conmon_cgroup, pid, resources)
            }
        }
    }

    /// Creates the empty cgroup of an infra-less sandbox below `parent`.
    pub fn create_sandbox_cgroup(&self, parent: &str, id: &str) -> Result<()> {
        match self {
            CgroupManager::Systemd(m) => m.create_sandbox_cgroup(parent, id),
            CgroupManager::Cgroupfs(m) => m.create_sandbox_cgroup(parent, id),
        }
    }

    pub fn remove_sandbox_cgroup(&self, parent: &str, id: &str) -> Result<()> {
        match self {
            CgroupManager::Systemd(m) => m.remove_sandbox_cgroup(parent, id),
            CgroupManager::Cgroupfs(m) => m.remove_sandbox_cgroup(parent, id),
        }
    }

    /// Moves `command_pid` into every cgroup the process `container_pid` belongs to.
    pub fn move_process_to_container_cgroup(
        &self,
        container_pid: u32,
        command_pid: u32,
    ) -> Result<()> {
        move_process_to_container_cgroup(self.context(), container_pid, command_pid)
    }

    /// Writes `resources` into the cgroup of container `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryTooLow`] before anything is written if the memory limit is below
    /// `min_memory`.
    pub fn update_container_resources(
        &self,
        parent: &str,
        id: &str,
        resources: &ResourceSpec,
        min_memory: i64,
    ) -> Result<()> {
        let handle = self.container_handle(parent, id)?;
        handle.set_resources(resources, min_memory)?;
        log::debug!("Updated resources of container {id} in {}", handle.path());
        Ok(())
    }

    /// Handles for the pod cgroup and the cgroups of container `id`.
    ///
    /// Some runtimes manage a container from a nested `container` child cgroup; when it exists
    /// it is returned after the container's own cgroup.
    pub fn pod_and_container_handles(
        &self,
        parent: &str,
        id: &str,
    ) -> Result<(CgroupHandle, Vec<CgroupHandle>)> {
        let ctx = self.context();
        let container_path = self.container_cgroup_absolute_path(parent, id)?;
        let pod = CgroupHandle::new(ctx, path::dir_name(&container_path));
        let container = CgroupHandle::new(ctx, &container_path);

        let nested = container.child(ctx, "container");
        let mut containers = vec![container];
        if nested
            .controller_dir("cpuset")
            .is_some_and(|dir| dir.is_dir())
        {
            log::debug!("Found nested container cgroup {}", nested.path());
            containers.push(nested);
        }
        Ok((pod, containers))
    }
}

/// Creates `<parent>/crio-<id>` in every hierarchy without attaching a process.
///
/// On v1 the cpuset is created first with load balancing off, so the new cgroup never joins
/// the scheduler domains of isolated CPUs.
pub(crate) fn create_sandbox_cgroup(ctx: &HostContext, parent: &str, id: &str) -> Result<()> {
    let handle = CgroupHandle::new(ctx, path::join(parent, &leaf_name(id)));
    if !ctx.is_v2() {
        if let Some(cpuset) = handle.controller_dir("cpuset") {
            std::fs::create_dir_all(cpuset).map_err(|source| Error::Create {
                path: cpuset.to_path_buf(),
                source,
            })?;
        }
        handle.write("cpuset", "cpuset.sched_load_balance", "0")?;
    }
    handle.create()?;
    if !ctx.is_v2() {
        handle.write("devices", "devices.allow", "a *:* rwm")?;
    }
    log::debug!("Created sandbox cgroup {}", handle.path());
    Ok(())
}

pub(crate) fn remove_sandbox_cgroup(ctx: &HostContext, parent: &str, id: &str) -> Result<()> {
    let handle = CgroupHandle::new(ctx, path::join(parent, &leaf_name(id)));
    handle.destroy()?;
    log::debug!("Removed sandbox cgroup {}", handle.path());
    Ok(())
}

fn move_process_to_container_cgroup(
    ctx: &HostContext,
    container_pid: u32,
    command_pid: u32,
) -> Result<()> {
    let file = ctx.proc_root().join(container_pid.to_string()).join("cgroup");
    let content = fsutil::read_trimmed(&file)?;

    let mut seen: HashSet<PathBuf> = HashSet::new();
    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        let mut fields = line.splitn(3, ':');
        let (Some(_), Some(controllers), Some(cgroup)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::MalformedProcCgroup {
                path: file.clone(),
                line: line.to_owned(),
            });
        };

        for controller in controllers.split(',') {
            let controller = controller.strip_prefix("name=").unwrap_or(controller);
            let dir = join_cgroup(&ctx.cgroup_root().join(controller), cgroup);
            if !dir.is_dir() || !seen.insert(dir.clone()) {
                continue;
            }
            fsutil::write_file(dir.join("cgroup.procs"), command_pid.to_string())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::CgroupVersion;
    use crate::cgroup::context::testing::context;

    fn manager(root: &std::path::Path, name: &str, version: CgroupVersion) -> CgroupManager {
        CgroupManager::new(name, Arc::new(context(root, version))).unwrap()
    }

    #[test]
    fn test_unknown_manager() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Arc::new(context(tmp.path(), CgroupVersion::V2));
        match CgroupManager::new("lxc", ctx) {
            Err(Error::InvalidManager(name)) => assert_eq!(name, "lxc"),
            other => panic!("expected InvalidManager, got {other:?}"),
        }
    }

    #[test]
    fn test_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "systemd", CgroupVersion::V1);
        assert!(m.is_systemd());
        assert_eq!(m.name(), "systemd");
        assert_eq!(m.identity().to_string(), "systemd on cgroup v1");
    }

    #[test]
    fn test_for_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Arc::new(context(tmp.path(), CgroupVersion::V2));
        assert!(CgroupManager::for_parent("kubepods.slice", Arc::clone(&ctx)).is_systemd());
        assert!(!CgroupManager::for_parent("/kubepods", ctx).is_systemd());
    }

    #[test]
    fn test_parent_suffix_rejected_for_every_identity() {
        for version in [CgroupVersion::V1, CgroupVersion::V2] {
            let tmp = tempfile::tempdir().unwrap();
            let systemd = manager(tmp.path(), "systemd", version);
            match systemd.sandbox_cgroup_path("/kubepods/pod1", "sb", 0) {
                Err(Error::ParentNotSlice(parent)) => assert_eq!(parent, "/kubepods/pod1"),
                other => panic!("expected ParentNotSlice, got {other:?}"),
            }

            let cgroupfs = manager(tmp.path(), "cgroupfs", version);
            match cgroupfs.sandbox_cgroup_path("kubepods.slice", "sb", 0) {
                Err(Error::ParentIsSlice(parent)) => assert_eq!(parent, "kubepods.slice"),
                other => panic!("expected ParentIsSlice, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_sandbox_memory_check_is_pod_prefixed() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "cgroupfs", CgroupVersion::V2);
        let dir = m.context().cgroup_root().join("kubepods/pod1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("memory.max"), "1024\n").unwrap();

        let err = m
            .sandbox_cgroup_path("/kubepods/pod1", "sb", 12 << 20)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "pod set memory limit 1024 too low; should be at least 12582912 bytes"
        );
    }

    #[test]
    fn test_container_stats_cached_and_evicted() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "cgroupfs", CgroupVersion::V2);
        let dir = m.context().cgroup_root().join("crio/crio-cid");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("memory.current"), "2048\n").unwrap();
        std::fs::write(dir.join("memory.stat"), "inactive_file 48\nanon 1000\n").unwrap();
        std::fs::write(dir.join("cpu.stat"), "usage_usec 10\n").unwrap();

        let mut stats = ContainerStats::default();
        m.populate_container_cgroup_stats("", "cid", &mut stats).unwrap();
        let memory = stats.memory.unwrap();
        assert_eq!(memory.usage, 2048);
        assert_eq!(memory.working_set, 2000);
        assert_eq!(stats.cpu.map(|cpu| cpu.total_usage_ns), Some(10_000));
        assert_eq!(m.registry().counts(), (1, 0));

        m.remove_container_cg_manager("cid");
        assert_eq!(m.registry().counts(), (0, 0));
    }

    #[test]
    fn test_update_container_resources() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "cgroupfs", CgroupVersion::V1);
        let root = m.context().cgroup_root().to_path_buf();
        for controller in ["cpu", "memory"] {
            std::fs::create_dir_all(root.join(controller).join("kubepods/crio-cid")).unwrap();
        }
        let memory = root.join("memory/kubepods/crio-cid/memory.limit_in_bytes");

        let too_low = ResourceSpec {
            shares: Some(512),
            memory_limit: Some(4096),
            ..Default::default()
        };
        match m.update_container_resources("/kubepods", "cid", &too_low, 12 << 20) {
            Err(Error::MemoryTooLow { limit, .. }) => assert_eq!(limit, 4096),
            other => panic!("expected MemoryTooLow, got {other:?}"),
        }
        assert!(!root.join("cpu/kubepods/crio-cid/cpu.shares").exists());
        assert!(!memory.exists());

        let resources = ResourceSpec {
            shares: Some(512),
            memory_limit: Some(256 << 20),
            ..Default::default()
        };
        m.update_container_resources("/kubepods", "cid", &resources, 12 << 20)
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join("cpu/kubepods/crio-cid/cpu.shares")).unwrap(),
            "512"
        );
        assert_eq!(std::fs::read_to_string(memory).unwrap(), (256 << 20).to_string());
    }

    #[test]
    fn test_sandbox_stats_v1() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "systemd", CgroupVersion::V1);
        let root = m.context().cgroup_root().to_path_buf();
        let pids = root.join("pids/kubepods.slice/kubepods-pod1.slice");
        let cpuacct = root.join("cpuacct/kubepods.slice/kubepods-pod1.slice");
        std::fs::create_dir_all(&pids).unwrap();
        std::fs::create_dir_all(&cpuacct).unwrap();
        std::fs::write(pids.join("pids.current"), "5\n").unwrap();
        std::fs::write(cpuacct.join("cpuacct.usage"), "900\n").unwrap();

        let mut stats = SandboxStats::default();
        m.populate_sandbox_cgroup_stats("kubepods-pod1.slice", "sb", &mut stats)
            .unwrap();
        assert_eq!(stats.process_count, Some(5));
        assert_eq!(stats.cpu.map(|cpu| cpu.total_usage_ns), Some(900));
        assert!(stats.memory.is_none());

        m.remove_sandbox_cg_manager("sb");
        assert_eq!(m.registry().counts(), (0, 0));
    }

    #[test]
    fn test_create_and_remove_sandbox_cgroup_v1() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "cgroupfs", CgroupVersion::V1);
        let root = m.context().cgroup_root().to_path_buf();

        m.create_sandbox_cgroup("kubepods", "sb").unwrap();
        let cpuset = root.join("cpuset/kubepods/crio-sb");
        assert_eq!(
            std::fs::read_to_string(cpuset.join("cpuset.sched_load_balance")).unwrap(),
            "0"
        );
        assert_eq!(
            std::fs::read_to_string(root.join("devices/kubepods/crio-sb/devices.allow")).unwrap(),
            "a *:* rwm"
        );
        assert!(root.join("memory/kubepods/crio-sb").is_dir());

        std::fs::remove_file(cpuset.join("cpuset.sched_load_balance")).unwrap();
        std::fs::remove_file(root.join("devices/kubepods/crio-sb/devices.allow")).unwrap();
        m.remove_sandbox_cgroup("kubepods", "sb").unwrap();
        assert!(!root.join("memory/kubepods/crio-sb").exists());
        // already gone
        m.remove_sandbox_cgroup("kubepods", "sb").unwrap();
    }

    #[test]
    fn test_create_sandbox_cgroup_v2() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "systemd", CgroupVersion::V2);
        m.create_sandbox_cgroup("kubepods-pod1.slice", "sb").unwrap();
        let dir = m
            .context()
            .cgroup_root()
            .join("kubepods.slice/kubepods-pod1.slice/crio-sb");
        assert!(dir.is_dir());
        assert!(!dir.join("devices.allow").exists());
    }

    #[test]
    fn test_move_process_to_container_cgroup() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "cgroupfs", CgroupVersion::V1);
        let ctx = m.context();
        let proc_dir = ctx.proc_root().join("100");
        std::fs::create_dir_all(&proc_dir).unwrap();
        std::fs::write(
            proc_dir.join("cgroup"),
            "4:memory:/crio/crio-cid\n3:cpu,cpuacct:/crio/crio-cid\n1:name=systemd:/crio/crio-cid\n",
        )
        .unwrap();
        let memory = ctx.cgroup_root().join("memory/crio/crio-cid");
        let cpu = ctx.cgroup_root().join("cpu/crio/crio-cid");
        std::fs::create_dir_all(&memory).unwrap();
        std::fs::create_dir_all(&cpu).unwrap();

        m.move_process_to_container_cgroup(100, 200).unwrap();
        assert_eq!(std::fs::read_to_string(memory.join("cgroup.procs")).unwrap(), "200");
        assert_eq!(std::fs::read_to_string(cpu.join("cgroup.procs")).unwrap(), "200");
        assert!(!ctx.cgroup_root().join("cpuacct/crio/crio-cid").exists());
    }

    #[test]
    fn test_move_process_malformed_proc_cgroup() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "cgroupfs", CgroupVersion::V2);
        let proc_dir = m.context().proc_root().join("7");
        std::fs::create_dir_all(&proc_dir).unwrap();
        std::fs::write(proc_dir.join("cgroup"), "garbage\n").unwrap();

        match m.move_process_to_container_cgroup(7, 8) {
            Err(Error::MalformedProcCgroup { line, .. }) => assert_eq!(line, "garbage"),
            other => panic!("expected MalformedProcCgroup, got {other:?}"),
        }
    }

    #[test]
    fn test_pod_and_container_handles() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "systemd", CgroupVersion::V2);
        let (pod, containers) = m.pod_and_container_handles("kubepods-pod1.slice", "cid").unwrap();
        assert_eq!(pod.path(), "/kubepods.slice/kubepods-pod1.slice");
        assert_eq!(containers.len(), 1);

        std::fs::create_dir_all(
            m.context()
                .cgroup_root()
                .join("kubepods.slice/kubepods-pod1.slice/crio-cid.scope/container"),
        )
        .unwrap();
        let (_, containers) = m.pod_and_container_handles("kubepods-pod1.slice", "cid").unwrap();
        assert_eq!(
            containers.iter().map(CgroupHandle::path).collect::<Vec<_>>(),
            vec![
                "/kubepods.slice/kubepods-pod1.slice/crio-cid.scope",
                "/kubepods.slice/kubepods-pod1.slice/crio-cid.scope/container",
            ]
        );
    }
}
