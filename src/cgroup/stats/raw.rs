use crate::cgroup::CgroupVersion;

use super::{
    CpuAcctStat, CpuAcctUsage, CpuStat, MemoryLimit, MemoryStat, MemoryUsage, PerCpuUsage,
    PidsCurrent, PidsLimit,
};

/// Counters read from one cgroup, before normalisation.
///
/// Every field is optional: a file that is missing or fails to parse leaves its field empty.
/// Which fields a host can fill depends on `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCgroupStats {
    pub version: CgroupVersion,
    /// `memory.stat`.
    pub memory_stat: Option<MemoryStat>,
    /// `memory.current` or `memory.usage_in_bytes`.
    pub memory_usage: Option<MemoryUsage>,
    /// `memory.peak` or `memory.max_usage_in_bytes`.
    pub memory_max_usage: Option<MemoryUsage>,
    /// `memory.max` or `memory.limit_in_bytes`.
    pub memory_limit: Option<MemoryLimit>,
    /// `memory.swap.current` (swap only) or `memory.memsw.usage_in_bytes` (memory plus swap).
    pub swap_usage: Option<MemoryUsage>,
    /// `memory.swap.max` or `memory.memsw.limit_in_bytes`.
    pub swap_limit: Option<MemoryLimit>,
    /// `memory.kmem.usage_in_bytes`, v1 only.
    pub kernel_usage: Option<MemoryUsage>,
    /// `memory.kmem.tcp.usage_in_bytes`, v1 only.
    pub kernel_tcp_usage: Option<MemoryUsage>,
    /// `cpu.stat`.
    pub cpu_stat: Option<CpuStat>,
    /// `cpuacct.usage`, v1 only.
    pub cpuacct_usage: Option<CpuAcctUsage>,
    /// `cpuacct.usage_percpu`, v1 only.
    pub cpuacct_percpu: Option<PerCpuUsage>,
    /// `cpuacct.stat`, v1 only.
    pub cpuacct_stat: Option<CpuAcctStat>,
    /// `pids.current`.
    pub pids_current: Option<PidsCurrent>,
    /// `pids.max`.
    pub pids_limit: Option<PidsLimit>,
}

impl RawCgroupStats {
    pub fn new(version: CgroupVersion) -> Self {
        Self {
            version,
            memory_stat: None,
            memory_usage: None,
            memory_max_usage: None,
            memory_limit: None,
            swap_usage: None,
            swap_limit: None,
            kernel_usage: None,
            kernel_tcp_usage: None,
            cpu_stat: None,
            cpuacct_usage: None,
            cpuacct_percpu: None,
            cpuacct_stat: None,
            pids_current: None,
            pids_limit: None,
        }
    }

    /// Memory plus swap usage in bytes.
    pub fn swap_inclusive_usage(&self) -> Option<u64> {
        let swap = self.swap_usage?.usage_bytes;
        match self.version {
            CgroupVersion::V1 => Some(swap),
            CgroupVersion::V2 => {
                let usage = self.memory_usage.map_or(0, |usage| usage.usage_bytes);
                Some(swap.saturating_add(usage))
            }
        }
    }
}
