use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::fsutil;

use super::context::{HostContext, join_cgroup};
use super::memory::verify_memory_is_enough;
use super::resources::{cpu_max, shares_to_weight};
use super::stats::{self, CgroupStats, RawCgroupStats};
use super::{CgroupVersion, Collector, CollectorBuilder, Error, ResourceSpec, Result};

/// Controllers a v1 cgroup is materialised in.
const V1_CONTROLLERS: [&str; 7] = [
    "cpuset", "cpu", "cpuacct", "memory", "pids", "devices", "freezer",
];

/// Cpuset files a new v1 cpuset must be populated with before it can take tasks.
const CPUSET_INHERITED: [&str; 2] = ["cpuset.cpus", "cpuset.mems"];

/// One cgroup, resolved to its directories on the host.
///
/// On v1 every controller has its own directory; on v2 all controllers share the unified one.
/// The stats files are opened on first use and kept open until the handle is dropped.
#[derive(Debug)]
pub struct CgroupHandle {
    path: String,
    version: CgroupVersion,
    dirs: Vec<(&'static str, PathBuf)>,
    collector: Mutex<Option<Collector>>,
}

impl CgroupHandle {
    pub fn new(ctx: &HostContext, path: impl Into<String>) -> Self {
        let path = path.into();
        let version = ctx.cgroup_version();
        let dirs = V1_CONTROLLERS
            .iter()
            .map(|controller| {
                (
                    *controller,
                    join_cgroup(&ctx.controller_root(controller), &path),
                )
            })
            .collect();
        Self {
            path,
            version,
            dirs,
            collector: Mutex::new(None),
        }
    }

    /// The cgroup path relative to the root of each hierarchy.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> CgroupVersion {
        self.version
    }

    /// Directory of `controller`, or `None` for a controller this handle does not manage.
    pub fn controller_dir(&self, controller: &str) -> Option<&Path> {
        self.dirs
            .iter()
            .find(|(name, _)| *name == controller)
            .map(|(_, dir)| dir.as_path())
    }

    /// Every distinct directory backing this cgroup.
    pub fn dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = Vec::with_capacity(self.dirs.len());
        for (_, dir) in &self.dirs {
            if !dirs.contains(&dir.as_path()) {
                dirs.push(dir);
            }
        }
        dirs
    }

    /// Whether the cgroup exists in at least one hierarchy.
    pub fn exists(&self) -> bool {
        self.dirs().iter().any(|dir| dir.is_dir())
    }

    /// A handle for the child cgroup `name`.
    pub fn child(&self, ctx: &HostContext, name: &str) -> Self {
        Self::new(ctx, format!("{}/{name}", self.path.trim_end_matches('/')))
    }

    /// Creates every controller directory. Existing directories are kept.
    ///
    /// On v1 the new cpuset, and any empty cpuset above it, inherits `cpuset.cpus` and
    /// `cpuset.mems` from its nearest configured ancestor. The kernel refuses tasks in a cpuset
    /// without either.
    pub fn create(&self) -> Result<()> {
        for dir in self.dirs() {
            std::fs::create_dir_all(dir).map_err(|source| Error::Create {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        if self.version == CgroupVersion::V1 {
            if let Some(cpuset) = self.controller_dir("cpuset") {
                let depth = self.path.split('/').filter(|part| !part.is_empty()).count();
                for file in CPUSET_INHERITED {
                    inherit_cpuset_file(cpuset, depth, file)?;
                }
            }
        }
        Ok(())
    }

    /// Moves `pid` into the cgroup in every hierarchy.
    pub fn add_process(&self, pid: u32) -> Result<()> {
        for dir in self.dirs() {
            fsutil::write_file(dir.join("cgroup.procs"), pid.to_string())?;
        }
        Ok(())
    }

    fn dir(&self, controller: &str) -> Result<&Path> {
        self.controller_dir(controller)
            .ok_or_else(|| Error::InvalidValue {
                path: PathBuf::from(&self.path),
                value: controller.to_owned(),
            })
    }

    pub fn read(&self, controller: &str, file: &str) -> Result<String> {
        Ok(fsutil::read_trimmed(self.dir(controller)?.join(file))?)
    }

    pub fn write(&self, controller: &str, file: &str, value: impl AsRef<[u8]>) -> Result<()> {
        Ok(fsutil::write_file(self.dir(controller)?.join(file), value)?)
    }

    /// Writes the CPU and memory settings of `spec`.
    ///
    /// The memory limit is checked against `min_memory` before anything is written.
    pub fn set_resources(&self, spec: &ResourceSpec, min_memory: i64) -> Result<()> {
        if let Some(limit) = spec.memory_limit {
            verify_memory_is_enough(limit, min_memory)?;
        }

        if let Some(cpus) = spec.cpus() {
            self.write("cpuset", "cpuset.cpus", cpus)?;
        }

        match self.version {
            CgroupVersion::V1 => {
                if let Some(shares) = spec.shares.filter(|shares| *shares > 0) {
                    self.write("cpu", "cpu.shares", shares.to_string())?;
                }
                // the kernel checks the quota against the current period
                if let Some(period) = spec.period.filter(|period| *period > 0) {
                    self.write("cpu", "cpu.cfs_period_us", period.to_string())?;
                }
                if let Some(quota) = spec.quota {
                    let quota = if quota > 0 { quota } else { -1 };
                    self.write("cpu", "cpu.cfs_quota_us", quota.to_string())?;
                }
            }
            CgroupVersion::V2 => {
                if let Some(shares) = spec.shares.filter(|shares| *shares > 0) {
                    self.write("cpu", "cpu.weight", shares_to_weight(shares).to_string())?;
                }
                if spec.quota.is_some() || spec.period.is_some() {
                    self.write("cpu", "cpu.max", cpu_max(spec.quota, spec.period_or_default()))?;
                }
            }
        }

        if let Some(limit) = spec.memory_limit.filter(|limit| *limit > 0) {
            let file = match self.version {
                CgroupVersion::V1 => "memory.limit_in_bytes",
                CgroupVersion::V2 => "memory.max",
            };
            self.write("memory", file, limit.to_string())?;
        }
        Ok(())
    }

    /// Removes every controller directory. Missing directories are ignored.
    pub fn destroy(&self) -> Result<()> {
        for dir in self.dirs() {
            match std::fs::remove_dir(dir) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(Error::Remove {
                        path: dir.to_path_buf(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn build_collector(&self) -> Collector {
        let mut builder = CollectorBuilder::new(self.version);
        let dir = |controller| self.controller_dir(controller).unwrap_or(Path::new(""));
        builder
            .set_memory_dir(dir("memory"))
            .set_cpu_dir(dir("cpu"))
            .set_pids_dir(dir("pids"));
        if self.version == CgroupVersion::V1 {
            builder.set_cpuacct_dir(dir("cpuacct"));
        }
        builder.build()
    }

    /// Reads the raw counters of the cgroup.
    ///
    /// The open stat files are cached; they are reopened while none could be opened so a
    /// cgroup created after the first call is picked up.
    pub fn raw_stats(&self) -> RawCgroupStats {
        let mut collector = self
            .collector
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if collector.as_ref().is_none_or(Collector::is_empty) {
            *collector = Some(self.build_collector());
        }
        match collector.as_mut() {
            Some(collector) => collector.refresh_stats(),
            None => RawCgroupStats::new(self.version),
        }
    }

    /// Reads and normalises the cgroup's counters, stamped with the current time.
    pub fn stats(&self) -> CgroupStats {
        stats::normalize(&self.raw_stats(), timestamp_ns())
    }
}

fn read_if_present(path: &Path) -> Result<Option<String>> {
    match fsutil::read_trimmed(path) {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Copies `file` down into `dir` and its empty ancestors from the nearest ancestor with a value.
///
/// `depth` is the number of hierarchy levels above `dir`, the root included.
fn inherit_cpuset_file(dir: &Path, depth: usize, file: &str) -> Result<()> {
    let is_set = |dir: &Path| -> Result<Option<String>> {
        Ok(read_if_present(&dir.join(file))?.filter(|value| !value.is_empty()))
    };
    if is_set(dir)?.is_some() {
        return Ok(());
    }

    let mut empty = vec![dir];
    let mut inherited = None;
    for ancestor in dir.ancestors().skip(1).take(depth) {
        match is_set(ancestor)? {
            Some(value) => {
                inherited = Some(value);
                break;
            }
            None => empty.push(ancestor),
        }
    }

    let Some(value) = inherited else {
        log::debug!("No ancestor of {} sets {file}", dir.display());
        return Ok(());
    };
    for dir in empty.into_iter().rev() {
        fsutil::write_file(dir.join(file), &value)?;
    }
    Ok(())
}

fn timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
        })
}
