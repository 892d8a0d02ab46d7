//! Runtime configuration.
//!
//! The configuration is a JSON document named by `CREO_ISOLATION_CONFIG`. Every field is
//! optional and falls back to the host defaults; `CGROUP_MANAGER` overrides the driver.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cgroup::{self, CgroupDriver, CgroupVersion, MIN_MEMORY_LIMIT};
use crate::cpuset::{self, CpuSet};
use crate::fsutil::{self, FileReadError};
use crate::hooks::ExecCpuAffinity;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "CREO_ISOLATION_CONFIG";

/// Environment variable overriding [`Config::cgroup_manager`].
pub const CGROUP_MANAGER_ENV: &str = "CGROUP_MANAGER";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Read(#[from] FileReadError),
    #[error("failed to parse config `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Cgroup(#[from] cgroup::Error),
    #[error("invalid shared_cpuset: {0}")]
    SharedCpuset(#[from] cpuset::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Host locations the crate reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostPaths {
    pub cgroup_root: PathBuf,
    pub proc_root: PathBuf,
    /// `/sys/devices/system/cpu`, home of the per-CPU power and cpufreq knobs.
    pub sysfs_cpu: PathBuf,
    pub sched_domain: PathBuf,
    pub irq_smp_affinity: PathBuf,
    pub irqbalance_config: PathBuf,
    /// Banned CPU mask of the irqbalance config as it was at first boot.
    pub irqbalance_snapshot: PathBuf,
    /// Where the original per-CPU power and governor settings are saved.
    pub cpu_save_dir: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            proc_root: PathBuf::from("/proc"),
            sysfs_cpu: PathBuf::from("/sys/devices/system/cpu"),
            sched_domain: PathBuf::from("/proc/sys/kernel/sched_domain"),
            irq_smp_affinity: PathBuf::from("/proc/irq/default_smp_affinity"),
            irqbalance_config: PathBuf::from("/etc/sysconfig/irqbalance"),
            irqbalance_snapshot: PathBuf::from("/etc/sysconfig/orig_irq_banned_cpus"),
            cpu_save_dir: PathBuf::from("/var/run/crio/cpu"),
        }
    }
}

#[cfg(test)]
impl HostPaths {
    /// Re-roots every path under `root`, for hermetic trees.
    pub(crate) fn rooted_at(root: &Path) -> Self {
        let reroot = |path: PathBuf| root.join(path.strip_prefix("/").unwrap_or(&path));
        let defaults = Self::default();
        Self {
            cgroup_root: reroot(defaults.cgroup_root),
            proc_root: reroot(defaults.proc_root),
            sysfs_cpu: reroot(defaults.sysfs_cpu),
            sched_domain: reroot(defaults.sched_domain),
            irq_smp_affinity: reroot(defaults.irq_smp_affinity),
            irqbalance_config: reroot(defaults.irqbalance_config),
            irqbalance_snapshot: reroot(defaults.irqbalance_snapshot),
            cpu_save_dir: reroot(defaults.cpu_save_dir),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `systemd` or `cgroupfs`.
    pub cgroup_manager: String,
    /// Skips cgroup version detection when set.
    pub cgroup_version: Option<CgroupVersion>,
    /// Name of the runtime handler whose hooks run around container start and stop.
    pub runtime_handler: String,
    /// Annotations pods are allowed to use.
    pub allowed_annotations: Vec<String>,
    /// Smallest accepted non-zero memory limit in bytes.
    pub min_memory: i64,
    /// CPUs guaranteed containers may share next to their exclusive ones, in list syntax.
    pub shared_cpuset: String,
    pub exec_cpu_affinity: ExecCpuAffinity,
    pub paths: HostPaths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cgroup_manager: CgroupDriver::Systemd.name().to_owned(),
            cgroup_version: None,
            runtime_handler: String::new(),
            allowed_annotations: Vec::new(),
            min_memory: MIN_MEMORY_LIMIT,
            shared_cpuset: String::new(),
            exec_cpu_affinity: ExecCpuAffinity::Default,
            paths: HostPaths::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from the environment.
    ///
    /// # Errors
    ///
    /// Fails if the file named by [`CONFIG_ENV`] cannot be read or parsed, if the driver
    /// name is unknown or if the shared cpuset is malformed.
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let manager = std::env::var(CGROUP_MANAGER_ENV).ok();
        Self::from_sources(file.as_deref(), manager)
    }

    /// Builds the configuration from an optional file and an optional driver override.
    pub fn from_sources(file: Option<&Path>, manager: Option<String>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(manager) = manager.filter(|m| !m.is_empty()) {
            log::debug!("Cgroup manager overridden by {CGROUP_MANAGER_ENV}: {manager}");
            config.cgroup_manager = manager;
        }
        config.driver()?;
        config.shared_cpus()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fsutil::read_trimmed(path)?;
        serde_json::from_str(&content).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn driver(&self) -> Result<CgroupDriver> {
        Ok(self.cgroup_manager.parse()?)
    }

    /// The shared CPU pool, or `None` when none is configured.
    pub fn shared_cpus(&self) -> Result<Option<CpuSet>> {
        if self.shared_cpuset.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.shared_cpuset.trim().parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(None, None).unwrap();
        assert_eq!(config.cgroup_manager, "systemd");
        assert_eq!(config.min_memory, 12 * 1024 * 1024);
        assert_eq!(config.paths.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert_eq!(
            config.paths.irqbalance_snapshot,
            PathBuf::from("/etc/sysconfig/orig_irq_banned_cpus")
        );
    }

    #[test]
    fn test_partial_file_and_override() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.json");
        std::fs::write(
            &file,
            r#"{
                "cgroup_version": "v1",
                "runtime_handler": "high-performance",
                "allowed_annotations": ["cpu-load-balancing.crio.io"],
                "shared_cpuset": "0-1",
                "exec_cpu_affinity": "first",
                "paths": { "cgroup_root": "/tmp/cg" }
            }"#,
        )
        .unwrap();

        let config = Config::from_sources(Some(&file), Some("cgroupfs".to_owned())).unwrap();
        assert_eq!(config.driver().unwrap(), CgroupDriver::Cgroupfs);
        assert_eq!(config.cgroup_version, Some(CgroupVersion::V1));
        assert_eq!(config.allowed_annotations, ["cpu-load-balancing.crio.io"]);
        assert_eq!(config.shared_cpus().unwrap().map(|cpus| cpus.len()), Some(2));
        assert_eq!(config.exec_cpu_affinity, ExecCpuAffinity::First);
        assert_eq!(config.paths.cgroup_root, PathBuf::from("/tmp/cg"));
        assert_eq!(config.paths.proc_root, PathBuf::from("/proc"));
    }

    #[test]
    fn test_invalid_manager() {
        match Config::from_sources(None, Some("docker".to_owned())) {
            Err(Error::Cgroup(cgroup::Error::InvalidManager(name))) => assert_eq!(name, "docker"),
            other => panic!("expected InvalidManager, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_shared_cpuset() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.json");
        std::fs::write(&file, r#"{ "shared_cpuset": "3-1" }"#).unwrap();
        match Config::from_sources(Some(&file), None) {
            Err(Error::SharedCpuset(_)) => {}
            other => panic!("expected SharedCpuset, got {other:?}"),
        }
        assert_eq!(Config::default().shared_cpus().unwrap(), None);
    }

    #[test]
    fn test_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.json");
        std::fs::write(&file, "{ not json").unwrap();
        match Config::from_sources(Some(&file), None) {
            Err(Error::Parse { path, .. }) => assert_eq!(path, file),
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn test_rooted_paths() {
        let paths = HostPaths::rooted_at(Path::new("/scratch"));
        assert_eq!(
            paths.irq_smp_affinity,
            PathBuf::from("/scratch/proc/irq/default_smp_affinity")
        );
        assert_eq!(paths.cpu_save_dir, PathBuf::from("/scratch/var/run/crio/cpu"));
    }
}
