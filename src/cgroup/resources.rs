/// Default CFS period in microseconds.
pub const DEFAULT_CPU_PERIOD: u64 = 100_000;

/// CPU and memory settings requested for a cgroup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSpec {
    /// CPU list in `0-3,7` syntax.
    pub cpus: Option<String>,
    pub shares: Option<u64>,
    /// CFS quota in microseconds per period; `<= 0` means unlimited.
    pub quota: Option<i64>,
    pub period: Option<u64>,
    /// Memory limit in bytes; `0` means unlimited.
    pub memory_limit: Option<i64>,
}

impl ResourceSpec {
    /// The non-empty CPU list, if any.
    pub fn cpus(&self) -> Option<&str> {
        self.cpus.as_deref().filter(|cpus| !cpus.is_empty())
    }

    pub fn period_or_default(&self) -> u64 {
        self.period.filter(|p| *p > 0).unwrap_or(DEFAULT_CPU_PERIOD)
    }

    /// Whether the shares describe a whole number of CPUs. Missing shares do not.
    pub fn has_whole_cpus(&self) -> bool {
        self.shares.is_some_and(|shares| shares % 1024 == 0)
    }
}

/// Converts v1 `cpu.shares` (2..=262144) to v2 `cpu.weight` (1..=10000).
///
/// Zero stays zero, meaning unset.
pub fn shares_to_weight(shares: u64) -> u64 {
    if shares == 0 {
        return 0;
    }
    1 + (shares.saturating_sub(2) * 9999) / 262_142
}

/// Systemd's `CPUQuotaPerSecUSec` for a CFS quota, rounded up to whole 10ms steps.
///
/// A non-positive quota is unlimited (`u64::MAX`).
pub fn quota_per_sec_usec(quota: i64, period: u64) -> u64 {
    if quota <= 0 || period == 0 {
        return u64::MAX;
    }
    let per_sec = (quota as u64).saturating_mul(1_000_000) / period;
    per_sec.div_ceil(10_000) * 10_000
}

/// The v2 `cpu.max` line for a quota and period.
pub fn cpu_max(quota: Option<i64>, period: u64) -> String {
    match quota {
        Some(quota) if quota > 0 => format!("{quota} {period}"),
        _ => format!("max {period}"),
    }
}
