//! Per-CPU power management: c-state wakeup latency and the cpufreq scaling governor.
//!
//! Each knob is overwritten for the CPUs of a container after its current value has been
//! saved under the save directory, mirroring the sysfs layout. An existing saved copy is never
//! replaced. Restoring writes the saved value back and deletes the copy.

use std::path::{Path, PathBuf};

use crate::cpuset::CpuSet;
use crate::fsutil;

use super::{Error, Result};

/// A per-CPU sysfs file below `cpu<N>/`.
#[derive(Debug, Clone, Copy)]
struct Knob {
    dir: &'static str,
    file: &'static str,
}

const RESUME_LATENCY: Knob = Knob {
    dir: "power",
    file: "pm_qos_resume_latency_us",
};

const SCALING_GOVERNOR: Knob = Knob {
    dir: "cpufreq",
    file: "scaling_governor",
};

impl Knob {
    fn live(&self, sysfs_cpu: &Path, cpu: usize) -> PathBuf {
        sysfs_cpu.join(format!("cpu{cpu}")).join(self.dir).join(self.file)
    }

    fn saved_dir(&self, save_dir: &Path, cpu: usize) -> PathBuf {
        save_dir.join(format!("cpu{cpu}")).join(self.dir)
    }

    fn set(&self, sysfs_cpu: &Path, save_dir: &Path, cpu: usize, value: &str) -> Result<()> {
        let live = self.live(sysfs_cpu, cpu);
        let saved_dir = self.saved_dir(save_dir, cpu);
        let saved = saved_dir.join(self.file);

        // a restarted container finds its own value live; the saved copy is the host's
        if !fsutil::file_exists(&saved) {
            let original = fsutil::read_trimmed(&live)?;
            std::fs::create_dir_all(&saved_dir).map_err(|source| Error::CreateDir {
                path: saved_dir.clone(),
                source,
            })?;
            fsutil::write_file(&saved, original)?;
        }
        fsutil::write_file(&live, value)?;
        Ok(())
    }

    fn restore(&self, sysfs_cpu: &Path, save_dir: &Path, cpu: usize) -> Result<()> {
        let saved = self.saved_dir(save_dir, cpu).join(self.file);
        let original = match fsutil::read_trimmed(&saved) {
            Ok(original) => original,
            // restored by an earlier invocation
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        fsutil::write_file(self.live(sysfs_cpu, cpu), original)?;
        std::fs::remove_file(&saved).map_err(|source| Error::Remove {
            path: saved.clone(),
            source,
        })
    }
}

/// Sets `pm_qos_resume_latency_us` of every CPU in `cpus` to `latency`.
pub fn set_resume_latency(
    sysfs_cpu: &Path,
    save_dir: &Path,
    cpus: &CpuSet,
    latency: &str,
) -> Result<()> {
    for cpu in cpus.iter() {
        RESUME_LATENCY.set(sysfs_cpu, save_dir, cpu, latency)?;
    }
    Ok(())
}

pub fn restore_resume_latency(sysfs_cpu: &Path, save_dir: &Path, cpus: &CpuSet) -> Result<()> {
    for cpu in cpus.iter() {
        RESUME_LATENCY.restore(sysfs_cpu, save_dir, cpu)?;
    }
    Ok(())
}

fn ensure_governor_available(sysfs_cpu: &Path, cpu: usize, governor: &str) -> Result<()> {
    let available = fsutil::read_trimmed(
        sysfs_cpu
            .join(format!("cpu{cpu}"))
            .join("cpufreq/scaling_available_governors"),
    )?;
    if available.split_whitespace().any(|g| g == governor) {
        Ok(())
    } else {
        Err(Error::GovernorUnavailable {
            governor: governor.to_owned(),
            cpu,
        })
    }
}

/// Switches every CPU in `cpus` to the scaling `governor`.
///
/// # Errors
///
/// Returns [`Error::GovernorUnavailable`] if a CPU does not offer the governor.
pub fn set_freq_governor(
    sysfs_cpu: &Path,
    save_dir: &Path,
    cpus: &CpuSet,
    governor: &str,
) -> Result<()> {
    for cpu in cpus.iter() {
        ensure_governor_available(sysfs_cpu, cpu, governor)?;
        SCALING_GOVERNOR.set(sysfs_cpu, save_dir, cpu, governor)?;
    }
    Ok(())
}

pub fn restore_freq_governor(sysfs_cpu: &Path, save_dir: &Path, cpus: &CpuSet) -> Result<()> {
    for cpu in cpus.iter() {
        SCALING_GOVERNOR.restore(sysfs_cpu, save_dir, cpu)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sysfs(root: &Path, cpus: &[usize]) -> PathBuf {
        let sysfs = root.join("sys");
        for cpu in cpus {
            let dir = sysfs.join(format!("cpu{cpu}"));
            std::fs::create_dir_all(dir.join("power")).unwrap();
            std::fs::create_dir_all(dir.join("cpufreq")).unwrap();
            std::fs::write(dir.join("power/pm_qos_resume_latency_us"), "0\n").unwrap();
            std::fs::write(dir.join("cpufreq/scaling_governor"), "schedutil\n").unwrap();
            std::fs::write(
                dir.join("cpufreq/scaling_available_governors"),
                "performance powersave schedutil\n",
            )
            .unwrap();
        }
        sysfs
    }

    fn read(path: PathBuf) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_resume_latency_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = sysfs(tmp.path(), &[1, 2]);
        let save = tmp.path().join("save");
        let cpus: CpuSet = "1-2".parse().unwrap();

        set_resume_latency(&sysfs, &save, &cpus, "n/a").unwrap();
        assert_eq!(read(sysfs.join("cpu2/power/pm_qos_resume_latency_us")), "n/a");
        assert_eq!(read(save.join("cpu1/power/pm_qos_resume_latency_us")), "0");

        restore_resume_latency(&sysfs, &save, &cpus).unwrap();
        assert_eq!(read(sysfs.join("cpu1/power/pm_qos_resume_latency_us")), "0");
        assert!(!save.join("cpu1/power/pm_qos_resume_latency_us").exists());

        restore_resume_latency(&sysfs, &save, &cpus).unwrap();
    }

    #[test]
    fn test_repeated_set_keeps_host_value() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = sysfs(tmp.path(), &[3]);
        let save = tmp.path().join("save");
        let cpus: CpuSet = "3".parse().unwrap();

        set_resume_latency(&sysfs, &save, &cpus, "n/a").unwrap();
        set_resume_latency(&sysfs, &save, &cpus, "n/a").unwrap();
        set_freq_governor(&sysfs, &save, &cpus, "performance").unwrap();
        set_freq_governor(&sysfs, &save, &cpus, "performance").unwrap();
        assert_eq!(read(save.join("cpu3/power/pm_qos_resume_latency_us")), "0");

        restore_resume_latency(&sysfs, &save, &cpus).unwrap();
        restore_freq_governor(&sysfs, &save, &cpus).unwrap();
        assert_eq!(read(sysfs.join("cpu3/power/pm_qos_resume_latency_us")), "0");
        assert_eq!(read(sysfs.join("cpu3/cpufreq/scaling_governor")), "schedutil");
    }

    #[test]
    fn test_governor_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = sysfs(tmp.path(), &[0]);
        let save = tmp.path().join("save");
        let cpus: CpuSet = "0".parse().unwrap();

        set_freq_governor(&sysfs, &save, &cpus, "performance").unwrap();
        assert_eq!(read(sysfs.join("cpu0/cpufreq/scaling_governor")), "performance");
        restore_freq_governor(&sysfs, &save, &cpus).unwrap();
        assert_eq!(read(sysfs.join("cpu0/cpufreq/scaling_governor")), "schedutil");
    }

    #[test]
    fn test_unavailable_governor() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = sysfs(tmp.path(), &[0]);
        let save = tmp.path().join("save");
        let cpus: CpuSet = "0".parse().unwrap();

        match set_freq_governor(&sysfs, &save, &cpus, "ondemand") {
            Err(Error::GovernorUnavailable { governor, cpu }) => {
                assert_eq!(governor, "ondemand");
                assert_eq!(cpu, 0);
            }
            other => panic!("expected GovernorUnavailable, got {other:?}"),
        }
        assert_eq!(read(sysfs.join("cpu0/cpufreq/scaling_governor")), "schedutil\n");
        assert!(!save.exists());
    }
}
