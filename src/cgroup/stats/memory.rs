//! Parsers for the memory controller.
//!
//! - [`MemoryStat`] reads `memory.stat`. The v2 keys (`anon`, `file`, `inactive_file`,
//!   `pgfault`, ...) and the hierarchical v1 keys (`total_rss`, `total_cache`,
//!   `total_inactive_file`, ...) share one struct; whichever the kernel writes gets filled.
//! - [`MemoryUsage`] reads single counters: `memory.current`, `memory.usage_in_bytes`,
//!   `memory.peak`, `memory.max_usage_in_bytes`, `memory.swap.current`,
//!   `memory.memsw.usage_in_bytes` and the v1 `memory.kmem.*` usage files.
//! - [`MemoryLimit`] reads limits: `memory.max`, `memory.limit_in_bytes`, `memory.swap.max`
//!   and `memory.memsw.limit_in_bytes`. Both `max` and the v1 "no limit" value map to `None`.
//!
//! ```rust
//! use creo_isolation::cgroup::stats::{KeyValueStat, MemoryLimit, MemoryStat, SingleLineStat};
//!
//! let stat = MemoryStat::from_reader(&mut "anon 1000\ninactive_file 2000\n".as_bytes()).unwrap();
//! assert_eq!(stat.inactive_file, 2000);
//!
//! let limit = MemoryLimit::from_reader(&mut "9223372036854771712\n".as_bytes()).unwrap();
//! assert_eq!(limit.limit_bytes, None);
//! ```

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::LazyLock;

use super::parser::{KeyValueStat, read_limit_line, read_u64_line};
use super::SingleLineStat;

/// Smallest value cgroup v1 reports for an unset limit (`PAGE_COUNTER_MAX` rounded to pages).
const V1_UNLIMITED: u64 = 0x7FFF_FFFF_FFFF_F000;

/// Counters from `memory.stat`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryStat {
    pub anon: u64,
    pub file: u64,
    pub kernel_stack: u64,
    pub slab: u64,
    pub sock: u64,
    pub shmem: u64,
    pub file_mapped: u64,
    pub inactive_file: u64,
    pub active_file: u64,
    pub pgfault: u64,
    pub pgmajfault: u64,
    pub cache: u64,
    pub rss: u64,
    pub mapped_file: u64,
    pub total_cache: u64,
    pub total_rss: u64,
    pub total_mapped_file: u64,
    pub total_inactive_file: u64,
}

type Setter = fn(&mut MemoryStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(18);

    m.insert("anon", |s, v| s.anon = v);
    m.insert("file", |s, v| s.file = v);
    m.insert("kernel_stack", |s, v| s.kernel_stack = v);
    m.insert("slab", |s, v| s.slab = v);
    m.insert("sock", |s, v| s.sock = v);
    m.insert("shmem", |s, v| s.shmem = v);
    m.insert("file_mapped", |s, v| s.file_mapped = v);
    m.insert("inactive_file", |s, v| s.inactive_file = v);
    m.insert("active_file", |s, v| s.active_file = v);
    m.insert("pgfault", |s, v| s.pgfault = v);
    m.insert("pgmajfault", |s, v| s.pgmajfault = v);
    m.insert("cache", |s, v| s.cache = v);
    m.insert("rss", |s, v| s.rss = v);
    m.insert("mapped_file", |s, v| s.mapped_file = v);
    m.insert("total_cache", |s, v| s.total_cache = v);
    m.insert("total_rss", |s, v| s.total_rss = v);
    m.insert("total_mapped_file", |s, v| s.total_mapped_file = v);
    m.insert("total_inactive_file", |s, v| s.total_inactive_file = v);

    m
});

impl KeyValueStat for MemoryStat {
    const SPLIT_CHAR: Option<char> = None;
    const SKIP_LINES: usize = 0;
    const SKIP_VALUES: usize = 0;
    const ALLOW_DUPLICATE_KEYS: bool = false;
    const ALLOW_MULTIPLE_KV_PER_LINE: bool = false;

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}

/// A single memory counter in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    pub usage_bytes: u64,
}

impl SingleLineStat for MemoryUsage {
    /// # Errors
    ///
    /// Fails with kind `InvalidData` if the value is not a `u64`.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        Ok(MemoryUsage {
            usage_bytes: read_u64_line(buf)?,
        })
    }
}

/// A memory limit in bytes. `None` means no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryLimit {
    pub limit_bytes: Option<u64>,
}

impl SingleLineStat for MemoryLimit {
    /// # Errors
    ///
    /// Fails with kind `InvalidData` if the value is neither `max` nor a `u64`.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let limit_bytes = read_limit_line(buf)?.filter(|limit| *limit < V1_UNLIMITED);
        Ok(MemoryLimit { limit_bytes })
    }
}
