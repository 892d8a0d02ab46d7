//! Scheduler load balancing through the `sched_domain` flags in procfs.
//!
//! The kernel rebuilds the sched domain tree whenever the CPU topology or cpusets change, so
//! files may vanish between listing and writing them. Those races are retried.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::cpuset::CpuSet;
use crate::fsutil;

use super::{Error, Result};

/// `SD_LOAD_BALANCE`, the lowest flag bit.
const LOAD_BALANCE_FLAG: i64 = 1;

/// Every sched domain flag except [`LOAD_BALANCE_FLAG`].
const LOAD_BALANCE_CLEAR_MASK: i64 = 32766;

/// Polling schedule for operations racing with the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Retry {
    /// Runs `op` immediately and again every interval while it fails with a not-found error.
    ///
    /// # Errors
    ///
    /// Any other error is returned at once. Once the timeout passes, the last not-found error
    /// is returned wrapped in [`Error::Timeout`].
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_not_found() => {
                    log::error!("Failed to set CPU load balancing: {err}");
                    if start.elapsed() >= self.timeout {
                        return Err(Error::Timeout(Box::new(err)));
                    }
                    std::thread::sleep(self.interval);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Sets or clears the load balancing flag in every sched domain of `cpus`.
///
/// The flags are rewritten from their current value, so repeating a call changes nothing.
pub fn set_cpus_load_balancing(sched_domain: &Path, cpus: &CpuSet, enable: bool) -> Result<()> {
    for cpu in cpus.iter() {
        let mut queue = VecDeque::from([sched_domain.join(format!("cpu{cpu}"))]);
        while let Some(dir) = queue.pop_front() {
            let walk_err = |source| Error::Walk {
                path: dir.clone(),
                source,
            };
            for entry in std::fs::read_dir(&dir).map_err(walk_err)? {
                let entry = entry.map_err(walk_err)?;
                let file_type = entry.file_type().map_err(walk_err)?;
                if file_type.is_dir() {
                    queue.push_back(entry.path());
                } else if file_type.is_file() && entry.file_name() == "flags" {
                    toggle_flags(&entry.path(), enable)?;
                }
            }
        }
    }
    Ok(())
}

fn toggle_flags(path: &Path, enable: bool) -> Result<()> {
    let content = fsutil::read_trimmed(path)?;
    let flags: i64 = content.parse().map_err(|_| Error::InvalidFlags {
        path: path.to_path_buf(),
        value: content.clone(),
    })?;
    let flags = if enable {
        flags | LOAD_BALANCE_FLAG
    } else {
        flags & LOAD_BALANCE_CLEAR_MASK
    };
    fsutil::write_file(path, flags.to_string())?;
    Ok(())
}

/// [`set_cpus_load_balancing`] under the `retry` schedule.
pub fn set_cpus_load_balancing_with_retry(
    sched_domain: &Path,
    cpus: &CpuSet,
    enable: bool,
    retry: Retry,
) -> Result<()> {
    log::info!(
        "{} cpu load balancing for cpus {cpus}",
        if enable { "Enable" } else { "Disable" }
    );
    retry.run(|| set_cpus_load_balancing(sched_domain, cpus, enable))
}
