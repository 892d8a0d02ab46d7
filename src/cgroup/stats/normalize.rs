use crate::cgroup::CgroupVersion;

use super::{CgroupStats, CoreUsage, CpuCore, CpuStats, MemoryStats, PidsStats, RawCgroupStats};

/// Kernel `USER_HZ`, the tick rate of `cpuacct.stat`.
const USER_HZ: u64 = 100;
const NANOS_PER_TICK: u64 = 1_000_000_000 / USER_HZ;
const NANOS_PER_MICRO: u64 = 1_000;

/// Collapses version-specific counters into [`CgroupStats`].
///
/// Metric groups whose source files were unavailable stay `None`.
pub fn normalize(raw: &RawCgroupStats, timestamp_ns: u64) -> CgroupStats {
    CgroupStats {
        memory: normalize_memory(raw),
        cpu: normalize_cpu(raw),
        pids: raw.pids_current.map(|current| PidsStats {
            current: current.current,
            limit: raw.pids_limit.and_then(|limit| limit.limit),
        }),
        timestamp_ns,
    }
}

/// `usage - inactive_file`, clamped at zero.
pub fn working_set(usage: u64, inactive_file: u64) -> u64 {
    if inactive_file > usage {
        log::warn!(
            "Unable to account working set stats: inactive_file ({inactive_file}) > memory usage ({usage})"
        );
        return 0;
    }
    usage - inactive_file
}

fn normalize_memory(raw: &RawCgroupStats) -> Option<MemoryStats> {
    let usage = raw.memory_usage?.usage_bytes;
    let stat = raw.memory_stat.clone().unwrap_or_default();
    let limit = raw
        .memory_limit
        .and_then(|limit| limit.limit_bytes)
        .unwrap_or(u64::MAX);

    let (inactive_file, rss, cache, page_faults, major_page_faults) = match raw.version {
        CgroupVersion::V2 => (
            stat.inactive_file,
            stat.anon,
            stat.file,
            stat.pgfault,
            stat.pgmajfault,
        ),
        // v1 has no page-fault counters for the hierarchy
        CgroupVersion::V1 => (stat.total_inactive_file, stat.total_rss, stat.total_cache, 0, 0),
    };
    let (kernel_usage, kernel_tcp_usage) = match raw.version {
        CgroupVersion::V2 => (stat.kernel_stack.saturating_add(stat.slab), stat.sock),
        CgroupVersion::V1 => (
            raw.kernel_usage.map_or(0, |usage| usage.usage_bytes),
            raw.kernel_tcp_usage.map_or(0, |usage| usage.usage_bytes),
        ),
    };

    let working_set = working_set(usage, inactive_file);
    let available = if limit == u64::MAX {
        0
    } else {
        limit.saturating_sub(working_set)
    };

    Some(MemoryStats {
        usage,
        limit,
        max_usage: raw.memory_max_usage.map_or(0, |usage| usage.usage_bytes),
        cache,
        working_set,
        available,
        rss,
        page_faults,
        major_page_faults,
        kernel_usage,
        kernel_tcp_usage,
        swap_usage: raw
            .swap_inclusive_usage()
            .map_or(0, |inclusive| inclusive.saturating_sub(usage)),
        swap_limit: raw
            .swap_limit
            .and_then(|limit| limit.limit_bytes)
            .unwrap_or(u64::MAX),
    })
}

fn normalize_cpu(raw: &RawCgroupStats) -> Option<CpuStats> {
    match raw.version {
        CgroupVersion::V2 => {
            let stat = raw.cpu_stat.as_ref()?;
            let total = stat.usage_usec.saturating_mul(NANOS_PER_MICRO);
            Some(CpuStats {
                total_usage_ns: total,
                per_core: vec![CoreUsage::total(total)],
                user_ns: stat.user_usec.saturating_mul(NANOS_PER_MICRO),
                kernel_ns: stat.system_usec.saturating_mul(NANOS_PER_MICRO),
                throttling_periods: stat.nr_periods,
                throttled_periods: stat.nr_throttled,
                throttled_time_ns: stat.throttled_usec.saturating_mul(NANOS_PER_MICRO),
            })
        }
        CgroupVersion::V1 => {
            let total = raw.cpuacct_usage?.usage_ns;
            let per_core = match &raw.cpuacct_percpu {
                Some(per_cpu) if !per_cpu.usage_ns.is_empty() => per_cpu
                    .usage_ns
                    .iter()
                    .enumerate()
                    .map(|(index, usage_ns)| CoreUsage {
                        core: CpuCore::Index(index),
                        usage_ns: *usage_ns,
                    })
                    .collect(),
                _ => vec![CoreUsage::total(total)],
            };
            let acct = raw.cpuacct_stat.clone().unwrap_or_default();
            let throttling = raw.cpu_stat.clone().unwrap_or_default();
            Some(CpuStats {
                total_usage_ns: total,
                per_core,
                user_ns: acct.user.saturating_mul(NANOS_PER_TICK),
                kernel_ns: acct.system.saturating_mul(NANOS_PER_TICK),
                throttling_periods: throttling.nr_periods,
                throttled_periods: throttling.nr_throttled,
                throttled_time_ns: throttling.throttled_time,
            })
        }
    }
}
