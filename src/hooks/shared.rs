//! The shared CPU pool guaranteed containers may opt into next to their exclusive CPUs.
//!
//! A container asking for it via `cpu-shared.crio.io/<container name>` gets the pool added to
//! its cpuset and its CFS quota widened to cover both sets; the pod quota grows by the pool's
//! share. On v2 the exclusive CPUs move into a `cgroup-child` below the container cgroup.

use std::path::Path;

use serde::Deserialize;

use crate::cgroup::{CgroupHandle, CgroupVersion, HostContext};
use crate::cpuset::CpuSet;
use crate::fsutil;

use super::quota::quota_file;
use super::{Error, Result};

/// Environment variable listing the exclusive CPUs of a container using the shared pool.
pub const ISOLATED_CPUS_ENV: &str = "OPENSHIFT_ISOLATED_CPUS";
/// Environment variable listing the shared pool.
pub const SHARED_CPUS_ENV: &str = "OPENSHIFT_SHARED_CPUS";

/// Child cgroup holding the exclusive CPUs on v2.
const CHILD_CGROUP: &str = "cgroup-child";

/// Which CPU processes exec'd into a container are pinned to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ExecCpuAffinity {
    /// Leave it to the runtime.
    #[default]
    #[serde(rename = "")]
    Default,
    /// The first shared CPU when the container uses the pool, else its first exclusive CPU.
    #[serde(rename = "first")]
    First,
}

/// The CPU an exec'd process is pinned to, if any.
pub fn exec_cpu(
    affinity: ExecCpuAffinity,
    exclusive: &CpuSet,
    shared: Option<&CpuSet>,
) -> Option<usize> {
    match affinity {
        ExecCpuAffinity::Default => None,
        ExecCpuAffinity::First => shared
            .and_then(|shared| shared.iter().next())
            .or_else(|| exclusive.iter().next()),
    }
}

/// Environment a container using the shared pool starts with.
pub fn cpuset_env(exclusive: &CpuSet, shared: &CpuSet) -> Vec<(String, String)> {
    vec![
        (ISOLATED_CPUS_ENV.to_owned(), exclusive.to_string()),
        (SHARED_CPUS_ENV.to_owned(), shared.to_string()),
    ]
}

fn union(a: &CpuSet, b: &CpuSet) -> CpuSet {
    a.iter().chain(b.iter()).collect()
}

/// Widens the cpuset of the innermost container cgroup to `exclusive` and `shared`.
///
/// On v2 the exclusive CPUs are additionally confined to a child cgroup, which is appended to
/// `containers`.
pub fn set_shared_cpus(
    ctx: &HostContext,
    containers: &mut Vec<CgroupHandle>,
    exclusive: &CpuSet,
    shared: &CpuSet,
) -> Result<()> {
    let Some(innermost) = containers.last() else {
        return Ok(());
    };
    innermost.write("cpuset", "cpuset.cpus", union(exclusive, shared).to_string())?;

    if innermost.version() == CgroupVersion::V2 {
        innermost.write("cpu", "cgroup.subtree_control", "+cpu +cpuset")?;
        let child = innermost.child(ctx, CHILD_CGROUP);
        child.create()?;
        child.write("cpuset", "cpuset.cpus", exclusive.to_string())?;
        log::debug!("Confined exclusive CPUs {exclusive} to {}", child.path());
        containers.push(child);
    }
    Ok(())
}

/// Quota of `cpus` full CPUs over `period`.
fn full_quota(cpus: &CpuSet, period: u64) -> i64 {
    i64::try_from(cpus.len() as u64 * period).unwrap_or(i64::MAX)
}

/// The current quota in `file`, or `None` when it is unlimited.
fn read_quota(file: &Path) -> Result<Option<i64>> {
    let content = fsutil::read_trimmed(file)?;
    // cpu.max carries the period after the quota
    let quota = content.split_whitespace().next().unwrap_or_default();
    match quota {
        "-1" | "max" => Ok(None),
        _ => quota.parse().map(Some).map_err(|_| Error::InvalidQuota {
            path: file.to_path_buf(),
            value: content.clone(),
        }),
    }
}

fn write_quota(handle: &CgroupHandle, quota: Option<i64>) -> Result<()> {
    let Some(file) = quota_file(handle) else {
        return Ok(());
    };
    let value = match (quota, handle.version()) {
        (Some(quota), _) => quota.to_string(),
        (None, CgroupVersion::V1) => "-1".to_owned(),
        (None, CgroupVersion::V2) => "max".to_owned(),
    };
    fsutil::write_file(&file, value)?;
    Ok(())
}

/// Grows the pod quota by the shared pool and sets the container quota to cover all its CPUs.
///
/// An unlimited pod quota stays unlimited.
pub fn inject_shared_quota(
    pod: &CgroupHandle,
    containers: &[CgroupHandle],
    exclusive: &CpuSet,
    shared: &CpuSet,
    period: u64,
) -> Result<()> {
    if let Some(file) = quota_file(pod) {
        let quota = read_quota(&file)?
            .map(|quota| quota.saturating_add(full_quota(shared, period)));
        write_quota(pod, quota)?;
    }
    if let Some(innermost) = containers.last() {
        write_quota(innermost, Some(full_quota(&union(exclusive, shared), period)))?;
    }
    Ok(())
}
