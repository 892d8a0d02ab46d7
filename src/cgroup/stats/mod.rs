//! Cgroup resource statistics.
//!
//! Raw counters are read by the typed parsers in this module into a [`RawCgroupStats`], whose
//! shape depends on the cgroup version. [`normalize`] turns them into the canonical,
//! version-independent [`CgroupStats`]; [`ContainerStats`] and [`SandboxStats`] are the
//! records handed to the stats-reporting layer.
//!
//! # Main types
//!
//! - [`MemoryStats`]: usage, limit, working set, available, rss, cache, faults and swap.
//! - [`CpuStats`]: total, per-core, user and kernel time plus throttling counters.
//! - [`PidsStats`]: current task count and limit.

mod cpu;
mod error;
mod memory;
mod normalize;
mod parser;
mod pids;
mod raw;

pub use cpu::{CpuAcctStat, CpuAcctUsage, CpuStat, PerCpuUsage};
pub use error::StatParseError;
pub use memory::{MemoryLimit, MemoryStat, MemoryUsage};
pub use normalize::{normalize, working_set};
pub use parser::{KeyValueStat, SingleLineStat};
pub use pids::{PidsCurrent, PidsLimit};
pub use raw::RawCgroupStats;

/// Memory usage of a cgroup in bytes. Unlimited limits are `u64::MAX`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub usage: u64,
    pub limit: u64,
    pub max_usage: u64,
    pub cache: u64,
    pub working_set: u64,
    /// Zero when the limit is unlimited.
    pub available: u64,
    pub rss: u64,
    pub page_faults: u64,
    pub major_page_faults: u64,
    pub kernel_usage: u64,
    pub kernel_tcp_usage: u64,
    pub swap_usage: u64,
    pub swap_limit: u64,
}

/// Which CPU a [`CoreUsage`] entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuCore {
    Index(usize),
    /// Aggregate over all CPUs, used when the kernel has no per-core breakdown.
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreUsage {
    pub core: CpuCore,
    pub usage_ns: u64,
}

impl CoreUsage {
    pub fn total(usage_ns: u64) -> Self {
        Self {
            core: CpuCore::Total,
            usage_ns,
        }
    }
}

/// CPU usage of a cgroup in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuStats {
    pub total_usage_ns: u64,
    /// Never empty.
    pub per_core: Vec<CoreUsage>,
    pub user_ns: u64,
    pub kernel_ns: u64,
    /// Periods with throttling active.
    pub throttling_periods: u64,
    /// Periods in which the cgroup hit its limit.
    pub throttled_periods: u64,
    pub throttled_time_ns: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PidsStats {
    pub current: u64,
    pub limit: Option<u64>,
}

/// Canonical statistics of one cgroup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgroupStats {
    pub memory: Option<MemoryStats>,
    pub cpu: Option<CpuStats>,
    pub pids: Option<PidsStats>,
    /// Collection time in nanoseconds since the UNIX epoch.
    pub timestamp_ns: u64,
}

/// Stats reported for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStats {
    pub timestamp_ns: u64,
    pub cpu: Option<CpuStats>,
    pub memory: Option<MemoryStats>,
}

impl ContainerStats {
    /// Copies the cpu and memory groups of `stats`.
    pub fn populate(&mut self, stats: &CgroupStats) {
        self.timestamp_ns = stats.timestamp_ns;
        self.cpu = stats.cpu.clone();
        self.memory = stats.memory.clone();
    }
}

/// Stats reported for a sandbox (pod).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxStats {
    pub timestamp_ns: u64,
    pub cpu: Option<CpuStats>,
    pub memory: Option<MemoryStats>,
    pub process_count: Option<u64>,
}

impl SandboxStats {
    /// Copies the cpu and memory groups of `stats` and the process count.
    pub fn populate(&mut self, stats: &CgroupStats) {
        self.timestamp_ns = stats.timestamp_ns;
        self.cpu = stats.cpu.clone();
        self.memory = stats.memory.clone();
        self.process_count = stats.pids.map(|pids| pids.current);
    }
}
