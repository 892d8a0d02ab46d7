//! Parsers for the cpu and cpuacct controllers.
//!
//! - [`CpuStat`] reads `cpu.stat`. On v2 it carries usage in microseconds and throttling
//!   counters; on v1 it only carries throttling counters, with `throttled_time` in nanoseconds.
//! - [`CpuAcctUsage`] reads v1 `cpuacct.usage` (nanoseconds).
//! - [`PerCpuUsage`] reads v1 `cpuacct.usage_percpu`, one nanosecond counter per core.
//! - [`CpuAcctStat`] reads v1 `cpuacct.stat` (`user`/`system` in `USER_HZ` ticks).
//!
//! ```rust
//! use creo_isolation::cgroup::stats::{CpuStat, KeyValueStat, PerCpuUsage, SingleLineStat};
//!
//! let stat = CpuStat::from_reader(&mut "usage_usec 1000\nnr_throttled 2\n".as_bytes()).unwrap();
//! assert_eq!(stat.usage_usec, 1000);
//!
//! let per_cpu = PerCpuUsage::from_reader(&mut "10 20 30 \n".as_bytes()).unwrap();
//! assert_eq!(per_cpu.usage_ns, vec![10, 20, 30]);
//! ```

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::LazyLock;

use super::parser::read_u64_line;
use super::{KeyValueStat, SingleLineStat, StatParseError};

/// Counters from `cpu.stat`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuStat {
    /// Total CPU time in microseconds (v2).
    pub usage_usec: u64,
    /// User CPU time in microseconds (v2).
    pub user_usec: u64,
    /// System CPU time in microseconds (v2).
    pub system_usec: u64,
    /// Enforcement periods that elapsed.
    pub nr_periods: u64,
    /// Periods in which the group was throttled.
    pub nr_throttled: u64,
    /// Throttled time in microseconds (v2).
    pub throttled_usec: u64,
    /// Throttled time in nanoseconds (v1).
    pub throttled_time: u64,
}

type Setter = fn(&mut CpuStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(7);

    m.insert("usage_usec", |s, v| s.usage_usec = v);
    m.insert("user_usec", |s, v| s.user_usec = v);
    m.insert("system_usec", |s, v| s.system_usec = v);
    m.insert("nr_periods", |s, v| s.nr_periods = v);
    m.insert("nr_throttled", |s, v| s.nr_throttled = v);
    m.insert("throttled_usec", |s, v| s.throttled_usec = v);
    m.insert("throttled_time", |s, v| s.throttled_time = v);

    m
});

impl KeyValueStat for CpuStat {
    const SPLIT_CHAR: Option<char> = None;
    const SKIP_LINES: usize = 0;
    const SKIP_VALUES: usize = 0;
    const ALLOW_DUPLICATE_KEYS: bool = false;
    const ALLOW_MULTIPLE_KV_PER_LINE: bool = false;

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}

/// Ticks from `cpuacct.stat`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuAcctStat {
    pub user: u64,
    pub system: u64,
}

type AcctSetter = fn(&mut CpuAcctStat, u64);

static ACCT_SETTERS: LazyLock<HashMap<&'static str, AcctSetter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, AcctSetter> = HashMap::with_capacity(2);
    m.insert("user", |s, v| s.user = v);
    m.insert("system", |s, v| s.system = v);
    m
});

impl KeyValueStat for CpuAcctStat {
    const SPLIT_CHAR: Option<char> = None;
    const SKIP_LINES: usize = 0;
    const SKIP_VALUES: usize = 0;
    const ALLOW_DUPLICATE_KEYS: bool = false;
    const ALLOW_MULTIPLE_KV_PER_LINE: bool = false;

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &ACCT_SETTERS
    }
}

/// Aggregate CPU time from `cpuacct.usage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuAcctUsage {
    pub usage_ns: u64,
}

impl SingleLineStat for CpuAcctUsage {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        Ok(CpuAcctUsage {
            usage_ns: read_u64_line(buf)?,
        })
    }
}

/// Per-core CPU time from `cpuacct.usage_percpu`, indexed by core.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PerCpuUsage {
    pub usage_ns: Vec<u64>,
}

impl SingleLineStat for PerCpuUsage {
    /// # Errors
    ///
    /// Fails with kind `InvalidData` on the first value that is not a `u64`.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut line = String::new();
        buf.read_line(&mut line)?;
        let usage_ns = line
            .split_whitespace()
            .map(|value| {
                value
                    .parse::<u64>()
                    .map_err(|source| StatParseError::InvalidValue {
                        value: value.to_string(),
                        line: 1,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PerCpuUsage { usage_ns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::stats::error::extract_stat_parse_error;

    #[test]
    fn test_parse_empty_cpu_stat() {
        let data = "";
        let stat = CpuStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat, CpuStat::default());
    }

    #[test]
    fn test_parse_v2_cpu_stat() {
        let data = "\
usage_usec 623932088000
user_usec 421230248000
system_usec 202701840000
nr_periods 10
nr_throttled 3
throttled_usec 4500
nr_bursts 0
burst_usec 0
";
        let stat = CpuStat::from_reader(&mut data.as_bytes()).unwrap();

        assert_eq!(stat.usage_usec, 623_932_088_000);
        assert_eq!(stat.user_usec, 421_230_248_000);
        assert_eq!(stat.system_usec, 202_701_840_000);
        assert_eq!(stat.nr_periods, 10);
        assert_eq!(stat.nr_throttled, 3);
        assert_eq!(stat.throttled_usec, 4500);
        assert_eq!(stat.throttled_time, 0);
    }

    #[test]
    fn test_parse_v1_cpu_stat() {
        let data = "\
nr_periods 10
nr_throttled 3
throttled_time 4500000
";
        let stat = CpuStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat.nr_periods, 10);
        assert_eq!(stat.throttled_time, 4_500_000);
        assert_eq!(stat.usage_usec, 0);
    }

    #[test]
    fn test_parse_invalid_cpu_stat() {
        let data = "\
invalid_line
usage_usec abc
user_usec 42
";
        let err = CpuStat::from_reader(&mut data.as_bytes()).unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        let err = extract_stat_parse_error(&err);
        match err {
            StatParseError::InvalidKeyValue {
                key, value, line, ..
            } => {
                assert_eq!(key, "usage_usec");
                assert_eq!(value, "abc");
                assert_eq!(*line, 2);
            }
            _ => panic!("Expected InvalidKeyValue error"),
        }
    }

    #[test]
    fn test_parse_cpuacct_stat() {
        let stat = CpuAcctStat::from_reader(&mut "user 250\nsystem 120\n".as_bytes()).unwrap();
        assert_eq!(stat.user, 250);
        assert_eq!(stat.system, 120);
    }

    #[test]
    fn test_parse_cpuacct_usage() {
        let usage = CpuAcctUsage::from_reader(&mut "123456789\n".as_bytes()).unwrap();
        assert_eq!(usage.usage_ns, 123_456_789);
    }

    #[test]
    fn test_parse_empty_percpu_usage() {
        let usage = PerCpuUsage::from_reader(&mut "\n".as_bytes()).unwrap();
        assert!(usage.usage_ns.is_empty());
    }

    #[test]
    fn test_parse_invalid_percpu_usage() {
        let err = PerCpuUsage::from_reader(&mut "10 x 30\n".as_bytes()).unwrap_err();
        match extract_stat_parse_error(&err) {
            StatParseError::InvalidValue { value, .. } => assert_eq!(value, "x"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
