use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::error::ResultOkLogExt;
use crate::mountinfo::{self, CgroupMounts};
use crate::systemd::UnitManager;

use super::CgroupVersion;

/// Host facts every cgroup consumer needs, resolved lazily and at most once.
///
/// All roots are explicit so tests can point the context at a scratch directory tree.
pub struct HostContext {
    cgroup_root: PathBuf,
    proc_root: PathBuf,
    version: OnceLock<CgroupVersion>,
    mounts: OnceLock<CgroupMounts>,
    allowed_cpus_supported: OnceLock<bool>,
    units: Arc<dyn UnitManager>,
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("cgroup_root", &self.cgroup_root)
            .field("proc_root", &self.proc_root)
            .field("version", &self.version.get())
            .field("allowed_cpus_supported", &self.allowed_cpus_supported.get())
            .finish_non_exhaustive()
    }
}

impl HostContext {
    pub fn new(
        cgroup_root: impl Into<PathBuf>,
        proc_root: impl Into<PathBuf>,
        units: Arc<dyn UnitManager>,
    ) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            proc_root: proc_root.into(),
            version: OnceLock::new(),
            mounts: OnceLock::new(),
            allowed_cpus_supported: OnceLock::new(),
            units,
        }
    }

    /// Pins the cgroup version instead of probing for it.
    pub fn with_version(self, version: CgroupVersion) -> Self {
        let _ = self.version.set(version);
        self
    }

    pub fn cgroup_root(&self) -> &Path {
        &self.cgroup_root
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    pub fn units(&self) -> &dyn UnitManager {
        self.units.as_ref()
    }

    /// The cgroup version of the host.
    ///
    /// The cgroup root is v2 when mountinfo lists it as a `cgroup2` mount. Without a mount entry
    /// for the root, the presence of `cgroup.controllers` decides.
    pub fn cgroup_version(&self) -> CgroupVersion {
        *self.version.get_or_init(|| {
            let version = if self.mounts().is_unified_at(&self.cgroup_root)
                || (self.mounts().unified.is_none()
                    && self.mounts().controllers.is_empty()
                    && self.cgroup_root.join("cgroup.controllers").exists())
            {
                CgroupVersion::V2
            } else {
                CgroupVersion::V1
            };
            log::debug!(
                "Detected cgroup {version} at `{}`",
                self.cgroup_root.display()
            );
            version
        })
    }

    pub fn is_v2(&self) -> bool {
        self.cgroup_version() == CgroupVersion::V2
    }

    fn mounts(&self) -> &CgroupMounts {
        self.mounts.get_or_init(|| {
            mountinfo::detect_cgroup_mounts(self.proc_root.join("self/mountinfo"))
                .ok_log("failed to read cgroup mounts")
                .unwrap_or_default()
        })
    }

    /// Directory of a v1 controller hierarchy, or the unified root on v2.
    ///
    /// Mount points outside the cgroup root are ignored in favour of `<root>/<controller>`.
    pub fn controller_root(&self, controller: &str) -> PathBuf {
        if self.is_v2() {
            return self.cgroup_root.clone();
        }
        match self.mounts().controller(controller) {
            Some(mount) if mount.starts_with(&self.cgroup_root) => mount.to_path_buf(),
            _ => self.cgroup_root.join(controller),
        }
    }

    pub fn memory_root(&self) -> PathBuf {
        self.controller_root("memory")
    }

    pub fn memory_limit_file(&self) -> &'static str {
        match self.cgroup_version() {
            CgroupVersion::V1 => "memory.limit_in_bytes",
            CgroupVersion::V2 => "memory.max",
        }
    }

    /// Whether systemd accepts the `AllowedCPUs` unit property.
    ///
    /// A failed query is logged and counts as unsupported.
    pub fn systemd_has_allowed_cpus(&self) -> bool {
        *self.allowed_cpus_supported.get_or_init(|| {
            self.units
                .supports_property("AllowedCPUs")
                .ok_log("failed to query systemd for AllowedCPUs")
                .unwrap_or(false)
        })
    }
}

/// Joins a cgroup path onto a directory, treating a leading `/` as relative.
pub(crate) fn join_cgroup(base: &Path, cgroup: impl AsRef<Path>) -> PathBuf {
    let cgroup = cgroup.as_ref();
    base.join(cgroup.strip_prefix("/").unwrap_or(cgroup))
}
