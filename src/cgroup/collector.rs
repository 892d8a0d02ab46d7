use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::ResultOkLogExt;

use super::CgroupVersion;
use super::stats::{
    CpuAcctStat, CpuAcctUsage, CpuStat, KeyValueStat, MemoryLimit, MemoryStat, MemoryUsage,
    PerCpuUsage, PidsCurrent, PidsLimit, RawCgroupStats, SingleLineStat,
};
use super::utils;

type Reader = Option<BufReader<File>>;

/// Keeps the stat files of one cgroup open and re-reads them on demand.
///
/// A file that could not be opened or fails to parse leaves its metric empty; the failure is
/// logged and the rest of the collection continues.
#[derive(Debug)]
pub struct Collector {
    version: CgroupVersion,
    memory_stat_file: Reader,
    memory_usage_file: Reader,
    memory_max_usage_file: Reader,
    memory_limit_file: Reader,
    swap_usage_file: Reader,
    swap_limit_file: Reader,
    kernel_usage_file: Reader,
    kernel_tcp_usage_file: Reader,
    cpu_stat_file: Reader,
    cpuacct_usage_file: Reader,
    cpuacct_percpu_file: Reader,
    cpuacct_stat_file: Reader,
    pids_current_file: Reader,
    pids_max_file: Reader,
}

fn key_value<T: KeyValueStat>(file: &mut Reader, name: &str) -> Option<T> {
    utils::read_and_rewind(file.as_mut(), T::from_reader)
        .ok_log(&format!("failed to read {name}"))
        .flatten()
}

fn single_line<T: SingleLineStat>(file: &mut Reader, name: &str) -> Option<T> {
    utils::read_and_rewind(file.as_mut(), T::from_reader)
        .ok_log(&format!("failed to read {name}"))
        .flatten()
}

impl Collector {
    /// Reads every open stat file once.
    pub fn refresh_stats(&mut self) -> RawCgroupStats {
        let mut raw = RawCgroupStats::new(self.version);
        raw.memory_stat = key_value::<MemoryStat>(&mut self.memory_stat_file, "memory.stat");
        raw.memory_usage = single_line::<MemoryUsage>(&mut self.memory_usage_file, "memory usage");
        raw.memory_max_usage =
            single_line::<MemoryUsage>(&mut self.memory_max_usage_file, "memory max usage");
        raw.memory_limit = single_line::<MemoryLimit>(&mut self.memory_limit_file, "memory limit");
        raw.swap_usage = single_line::<MemoryUsage>(&mut self.swap_usage_file, "swap usage");
        raw.swap_limit = single_line::<MemoryLimit>(&mut self.swap_limit_file, "swap limit");
        raw.kernel_usage =
            single_line::<MemoryUsage>(&mut self.kernel_usage_file, "kernel memory usage");
        raw.kernel_tcp_usage = single_line::<MemoryUsage>(
            &mut self.kernel_tcp_usage_file,
            "kernel TCP memory usage",
        );
        raw.cpu_stat = key_value::<CpuStat>(&mut self.cpu_stat_file, "cpu.stat");
        raw.cpuacct_usage =
            single_line::<CpuAcctUsage>(&mut self.cpuacct_usage_file, "cpuacct.usage");
        raw.cpuacct_percpu =
            single_line::<PerCpuUsage>(&mut self.cpuacct_percpu_file, "cpuacct.usage_percpu");
        raw.cpuacct_stat = key_value::<CpuAcctStat>(&mut self.cpuacct_stat_file, "cpuacct.stat");
        raw.pids_current = single_line::<PidsCurrent>(&mut self.pids_current_file, "pids.current");
        raw.pids_limit = single_line::<PidsLimit>(&mut self.pids_max_file, "pids.max");
        raw
    }

    /// Whether no stat file could be opened, e.g. because the cgroup did not exist yet.
    pub fn is_empty(&self) -> bool {
        [
            &self.memory_stat_file,
            &self.memory_usage_file,
            &self.memory_max_usage_file,
            &self.memory_limit_file,
            &self.swap_usage_file,
            &self.swap_limit_file,
            &self.kernel_usage_file,
            &self.kernel_tcp_usage_file,
            &self.cpu_stat_file,
            &self.cpuacct_usage_file,
            &self.cpuacct_percpu_file,
            &self.cpuacct_stat_file,
            &self.pids_current_file,
            &self.pids_max_file,
        ]
        .iter()
        .all(|file| file.is_none())
    }
}

/// Builds a [`Collector`] from the per-controller directories of a cgroup.
#[derive(Debug)]
pub struct CollectorBuilder {
    collector: Collector,
}

impl CollectorBuilder {
    pub fn new(version: CgroupVersion) -> Self {
        Self {
            collector: Collector {
                version,
                memory_stat_file: None,
                memory_usage_file: None,
                memory_max_usage_file: None,
                memory_limit_file: None,
                swap_usage_file: None,
                swap_limit_file: None,
                kernel_usage_file: None,
                kernel_tcp_usage_file: None,
                cpu_stat_file: None,
                cpuacct_usage_file: None,
                cpuacct_percpu_file: None,
                cpuacct_stat_file: None,
                pids_current_file: None,
                pids_max_file: None,
            },
        }
    }

    /// Opens the memory controller files below `dir`.
    pub fn set_memory_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        let dir = dir.as_ref();
        let c = &mut self.collector;
        c.memory_stat_file = utils::open_file(dir.join("memory.stat"));
        match c.version {
            CgroupVersion::V2 => {
                c.memory_usage_file = utils::open_file(dir.join("memory.current"));
                c.memory_max_usage_file = utils::open_file(dir.join("memory.peak"));
                c.memory_limit_file = utils::open_file(dir.join("memory.max"));
                c.swap_usage_file = utils::open_file(dir.join("memory.swap.current"));
                c.swap_limit_file = utils::open_file(dir.join("memory.swap.max"));
            }
            CgroupVersion::V1 => {
                c.memory_usage_file = utils::open_file(dir.join("memory.usage_in_bytes"));
                c.memory_max_usage_file = utils::open_file(dir.join("memory.max_usage_in_bytes"));
                c.memory_limit_file = utils::open_file(dir.join("memory.limit_in_bytes"));
                c.swap_usage_file = utils::open_file(dir.join("memory.memsw.usage_in_bytes"));
                c.swap_limit_file = utils::open_file(dir.join("memory.memsw.limit_in_bytes"));
                c.kernel_usage_file = utils::open_file(dir.join("memory.kmem.usage_in_bytes"));
                c.kernel_tcp_usage_file =
                    utils::open_file(dir.join("memory.kmem.tcp.usage_in_bytes"));
            }
        }
        self
    }

    /// Opens `cpu.stat` below `dir`.
    pub fn set_cpu_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.collector.cpu_stat_file = utils::open_file(dir.as_ref().join("cpu.stat"));
        self
    }

    /// Opens the v1 cpuacct files below `dir`.
    pub fn set_cpuacct_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        let dir = dir.as_ref();
        let c = &mut self.collector;
        c.cpuacct_usage_file = utils::open_file(dir.join("cpuacct.usage"));
        c.cpuacct_percpu_file = utils::open_file(dir.join("cpuacct.usage_percpu"));
        c.cpuacct_stat_file = utils::open_file(dir.join("cpuacct.stat"));
        self
    }

    /// Opens the pids controller files below `dir`.
    pub fn set_pids_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        let dir = dir.as_ref();
        self.collector.pids_current_file = utils::open_file(dir.join("pids.current"));
        self.collector.pids_max_file = utils::open_file(dir.join("pids.max"));
        self
    }

    pub fn build(self) -> Collector {
        self.collector
    }
}
