//! Keeping device interrupts off isolated CPUs.
//!
//! Two places decide where interrupts land: the kernel's default SMP affinity mask and the
//! irqbalance daemon, which is told which CPUs to avoid through its sysconfig file. Both are
//! updated together.

use std::path::Path;

use crate::bitmask::{AffinityMask, update_irq_smp_affinity_mask};
use crate::config::HostPaths;
use crate::fsutil;

use super::Result;
use super::service::{IRQBALANCE_BANNED_CPUS, IrqBalanceService};

/// Older irqbalance releases read the banned mask from this key.
const LEGACY_BANNED_KEY: &str = "IRQ_AFFINITY_MASK";

/// Enables or disables interrupt handling on `cpus`.
///
/// The new affinity mask is written to procfs and the complementing banned mask to the
/// irqbalance config. Without a running irqbalance service the daemon is invoked once
/// directly so the new placement takes effect.
pub fn set_irq_load_balancing(
    paths: &HostPaths,
    service: &IrqBalanceService,
    cpus: &str,
    enable: bool,
) -> Result<()> {
    let current = fsutil::read_trimmed(&paths.irq_smp_affinity)?;
    let update = update_irq_smp_affinity_mask(cpus, &current, enable)?;
    fsutil::write_file(&paths.irq_smp_affinity, &update.mask)?;
    log::debug!(
        "IRQ affinity for cpus {cpus} is now {}, banned {}",
        update.mask,
        update.banned
    );

    let config_exists = fsutil::file_exists(&paths.irqbalance_config);
    if config_exists {
        update_irq_balance_config(&paths.irqbalance_config, &update.banned)?;
    }

    if !config_exists || !service.is_enabled() {
        return service.run_oneshot(&update.banned);
    }

    if let Err(err) = service.restart() {
        log::warn!("Irqbalance service restart failed: {err}");
    }
    Ok(())
}

fn banned_line(mask: &str) -> String {
    format!("{IRQBALANCE_BANNED_CPUS}=\"{mask}\"")
}

fn key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key)?
        .strip_prefix('=')
        .map(|value| value.trim().trim_matches('"'))
}

/// Rewrites the banned CPU mask in the irqbalance config.
///
/// The legacy key is commented out, the current key is replaced in place, or appended when the
/// file has none.
pub fn update_irq_balance_config(path: &Path, banned: &str) -> Result<()> {
    let input = std::fs::read_to_string(path).map_err(|source| fsutil::FileReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let mut found = false;
    let mut lines: Vec<String> = input
        .split('\n')
        .map(|line| {
            if key_value(line, LEGACY_BANNED_KEY).is_some() {
                format!("#{line}")
            } else if key_value(line, IRQBALANCE_BANNED_CPUS).is_some() {
                found = true;
                banned_line(banned)
            } else {
                line.to_owned()
            }
        })
        .collect();

    if !found {
        if lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        lines.push(banned_line(banned));
        lines.push(String::new());
    }

    fsutil::write_file(path, lines.join("\n"))?;
    Ok(())
}

/// The banned CPU mask configured for irqbalance, or an empty string when there is none.
///
/// The legacy key is only consulted when the current one is absent.
pub fn retrieve_irq_banned_cpu_mask(path: &Path) -> Result<String> {
    let input = fsutil::read_trimmed(path)?;
    let lookup = |key: &str| input.lines().find_map(|line| key_value(line, key));
    Ok(lookup(IRQBALANCE_BANNED_CPUS)
        .or_else(|| lookup(LEGACY_BANNED_KEY))
        .unwrap_or_default()
        .to_owned())
}

/// Puts back the banned CPU mask irqbalance had before any container changed it.
///
/// Runs at startup. Only a freshly booted host, whose affinity mask still covers every CPU,
/// is considered; the first such boot records the snapshot the later ones restore.
pub fn restore_irq_balance_config(paths: &HostPaths, service: &IrqBalanceService) -> Result<()> {
    let current = fsutil::read_trimmed(&paths.irq_smp_affinity)?;
    if !AffinityMask::decode(&current)?.is_all_set() {
        log::info!("Restore irqbalance config: not system reboot, ignoring");
        return Ok(());
    }

    let banned = match retrieve_irq_banned_cpu_mask(&paths.irqbalance_config) {
        Ok(banned) => banned,
        Err(err) => {
            log::info!(
                "Restore irqbalance config: failed to get current CPU ban list, ignoring: {err}"
            );
            return Ok(());
        }
    };

    let snapshot = &paths.irqbalance_snapshot;
    if !fsutil::file_exists(snapshot) {
        log::info!("Creating banned CPU list file {}", snapshot.display());
        fsutil::write_file(snapshot, &banned)?;
        log::info!("Restore irqbalance config: created backup file");
        return Ok(());
    }

    let original = match fsutil::read_trimmed(snapshot) {
        Ok(original) => original,
        Err(err) => {
            log::warn!("Restore irqbalance config: failed to read backup file: {err}");
            return Ok(());
        }
    };

    if original == banned {
        log::info!("Restore irqbalance config: nothing to do");
        return Ok(());
    }

    log::info!(
        "Restore irqbalance banned CPU list in {} to {original:?}",
        paths.irqbalance_config.display()
    );
    update_irq_balance_config(&paths.irqbalance_config, &original)?;
    if service.is_enabled() {
        if let Err(err) = service.restart() {
            log::warn!("Irqbalance service restart failed: {err}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::command::Output;
    use crate::command::testing::MockRunner;
    use crate::hooks::Error;

    struct Host {
        _tmp: tempfile::TempDir,
        paths: HostPaths,
    }

    fn host(affinity: &str, config: Option<&str>) -> Host {
        let tmp = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted_at(tmp.path());
        std::fs::create_dir_all(paths.irq_smp_affinity.parent().unwrap()).unwrap();
        std::fs::create_dir_all(paths.irqbalance_config.parent().unwrap()).unwrap();
        std::fs::write(&paths.irq_smp_affinity, affinity).unwrap();
        if let Some(config) = config {
            std::fs::write(&paths.irqbalance_config, config).unwrap();
        }
        Host { _tmp: tmp, paths }
    }

    fn enabled_runner() -> MockRunner {
        MockRunner::new()
            .with_binary("irqbalance", "/usr/sbin/irqbalance")
            .with_response("systemctl is-enabled", Output::success("enabled"))
    }

    #[test]
    fn test_enable_with_running_service() {
        let host = host(
            "00000000,00003003\n",
            Some("IRQBALANCE_BANNED_CPUS=\"ffffffff,ffffcffc\"\n"),
        );
        let runner = Arc::new(enabled_runner());
        let service = IrqBalanceService::new(runner.clone());

        set_irq_load_balancing(&host.paths, &service, "4,5", true).unwrap();

        assert_eq!(
            std::fs::read_to_string(&host.paths.irq_smp_affinity).unwrap(),
            "00000000,00003033"
        );
        assert_eq!(
            retrieve_irq_banned_cpu_mask(&host.paths.irqbalance_config).unwrap(),
            "ffffffff,ffffcfcc"
        );
        assert_eq!(
            runner.history(),
            vec!["systemctl is-enabled irqbalance", "systemctl restart irqbalance"]
        );
    }

    #[test]
    fn test_disable_without_config_runs_oneshot() {
        let host = host("00000000,00003003", None);
        let runner = Arc::new(enabled_runner());
        let service = IrqBalanceService::new(runner.clone());

        set_irq_load_balancing(&host.paths, &service, "0", false).unwrap();

        assert_eq!(
            std::fs::read_to_string(&host.paths.irq_smp_affinity).unwrap(),
            "00000000,00003002"
        );
        assert!(!host.paths.irqbalance_config.exists());
        assert_eq!(
            runner.history(),
            vec!["IRQBALANCE_BANNED_CPUS=ffffffff,ffffcffd irqbalance --oneshot"]
        );
    }

    #[test]
    fn test_restart_failure_only_warns() {
        let host = host("ff", Some(""));
        let runner =
            enabled_runner().with_response("systemctl restart", Output::failure(1, "nope"));
        let service = IrqBalanceService::new(Arc::new(runner));
        set_irq_load_balancing(&host.paths, &service, "1", false).unwrap();
        assert_eq!(
            std::fs::read_to_string(&host.paths.irq_smp_affinity).unwrap(),
            "000000fd"
        );
    }

    #[test]
    fn test_cpu_outside_mask() {
        let host = host("ff", None);
        let service = IrqBalanceService::new(Arc::new(MockRunner::new()));
        match set_irq_load_balancing(&host.paths, &service, "9", true) {
            Err(Error::Bitmask(_)) => {}
            other => panic!("expected bitmask error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_rewrite() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("irqbalance");
        std::fs::write(
            &path,
            "# comment\nIRQ_AFFINITY_MASK=0000000f\nIRQBALANCE_ARGS=\"--foo\"\nIRQBALANCE_BANNED_CPUS=\"00000001\"\n",
        )
        .unwrap();

        update_irq_balance_config(&path, "000000f0").unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# comment\n#IRQ_AFFINITY_MASK=0000000f\nIRQBALANCE_ARGS=\"--foo\"\nIRQBALANCE_BANNED_CPUS=\"000000f0\"\n"
        );
    }

    #[test]
    fn test_config_append_and_legacy_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("irqbalance");
        std::fs::write(&path, "IRQ_AFFINITY_MASK=0000000f\n").unwrap();
        assert_eq!(retrieve_irq_banned_cpu_mask(&path).unwrap(), "0000000f");

        update_irq_balance_config(&path, "00000003").unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "#IRQ_AFFINITY_MASK=0000000f\nIRQBALANCE_BANNED_CPUS=\"00000003\"\n"
        );
        assert_eq!(retrieve_irq_banned_cpu_mask(&path).unwrap(), "00000003");

        std::fs::write(&path, "").unwrap();
        assert_eq!(retrieve_irq_banned_cpu_mask(&path).unwrap(), "");
    }

    #[test]
    fn test_restore_not_reboot() {
        let host = host("00000000,00003003", Some("IRQBALANCE_BANNED_CPUS=\"0\"\n"));
        let runner = Arc::new(enabled_runner());
        restore_irq_balance_config(&host.paths, &IrqBalanceService::new(runner.clone())).unwrap();
        assert!(!host.paths.irqbalance_snapshot.exists());
        assert!(runner.history().is_empty());
    }

    #[test]
    fn test_restore_creates_snapshot() {
        let host = host("ffffffff,ffffffff", Some("IRQBALANCE_BANNED_CPUS=\"00000003\"\n"));
        let service = IrqBalanceService::new(Arc::new(enabled_runner()));
        restore_irq_balance_config(&host.paths, &service).unwrap();
        assert_eq!(
            std::fs::read_to_string(&host.paths.irqbalance_snapshot).unwrap(),
            "00000003"
        );
    }

    #[test]
    fn test_restore_without_config() {
        let host = host("ff", None);
        let service = IrqBalanceService::new(Arc::new(enabled_runner()));
        restore_irq_balance_config(&host.paths, &service).unwrap();
        assert!(!host.paths.irqbalance_snapshot.exists());
    }

    #[test]
    fn test_restore_rewrites_config() {
        let host = host("ff", Some("IRQBALANCE_BANNED_CPUS=\"0000000c\"\n"));
        std::fs::write(&host.paths.irqbalance_snapshot, "00000000\n").unwrap();
        let runner = Arc::new(enabled_runner());
        restore_irq_balance_config(&host.paths, &IrqBalanceService::new(runner.clone())).unwrap();

        assert_eq!(
            retrieve_irq_banned_cpu_mask(&host.paths.irqbalance_config).unwrap(),
            "00000000"
        );
        assert_eq!(
            runner.history(),
            vec!["systemctl is-enabled irqbalance", "systemctl restart irqbalance"]
        );

        restore_irq_balance_config(&host.paths, &IrqBalanceService::new(runner.clone())).unwrap();
        assert_eq!(runner.history().len(), 2);
    }
}
