use std::sync::Arc;

use crate::command::{self, Command, CommandRunner};

use super::Result;

const IRQBALANCE: &str = "irqbalance";

/// Environment variable irqbalance reads its banned CPU mask from.
pub const IRQBALANCE_BANNED_CPUS: &str = "IRQBALANCE_BANNED_CPUS";

/// Control over the host's irqbalance daemon.
#[derive(Debug, Clone)]
pub struct IrqBalanceService {
    runner: Arc<dyn CommandRunner>,
}

impl IrqBalanceService {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Whether systemd starts irqbalance at boot. Any failure to ask counts as no.
    pub fn is_enabled(&self) -> bool {
        let command = Command::new("systemctl").args(["is-enabled", IRQBALANCE]);
        match self.runner.output(&command) {
            Ok(output) if output.success => output.stdout.trim() == "enabled",
            Ok(output) => {
                log::info!(
                    "Service {IRQBALANCE} is-enabled check returned with: {}",
                    output.stdout.trim()
                );
                false
            }
            Err(err) => {
                log::info!("Service {IRQBALANCE} is-enabled check returned with: {err}");
                false
            }
        }
    }

    pub fn restart(&self) -> command::Result<()> {
        let command = Command::new("systemctl").args(["restart", IRQBALANCE]);
        self.runner.run(&command).map(|_| ())
    }

    /// Rebalances interrupts once, keeping them off the `banned` CPUs.
    ///
    /// A host without irqbalance is not an error.
    pub fn run_oneshot(&self, banned: &str) -> Result<()> {
        let Some(binary) = self.runner.look_path(IRQBALANCE) else {
            log::warn!("Irqbalance binary not found, skipping rebalance");
            return Ok(());
        };
        log::debug!("Running {} --oneshot", binary.display());
        let command = Command::new(IRQBALANCE)
            .arg("--oneshot")
            .env(IRQBALANCE_BANNED_CPUS, banned);
        self.runner.run(&command)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Output;
    use crate::command::testing::MockRunner;
    use crate::hooks::Error;

    #[test]
    fn test_is_enabled() {
        let runner = MockRunner::new()
            .with_response("systemctl is-enabled", Output::success("enabled\n"));
        assert!(IrqBalanceService::new(Arc::new(runner)).is_enabled());

        let runner = MockRunner::new().with_response(
            "systemctl is-enabled",
            Output {
                stdout: "disabled\n".to_owned(),
                ..Output::failure(1, "")
            },
        );
        assert!(!IrqBalanceService::new(Arc::new(runner)).is_enabled());
    }

    #[test]
    fn test_oneshot_without_binary() {
        let runner = Arc::new(MockRunner::new());
        IrqBalanceService::new(runner.clone()).run_oneshot("ff").unwrap();
        assert!(runner.history().is_empty());
    }

    #[test]
    fn test_oneshot_passes_banned_mask() {
        let runner = Arc::new(MockRunner::new().with_binary("irqbalance", "/usr/sbin/irqbalance"));
        IrqBalanceService::new(runner.clone())
            .run_oneshot("00000000,00000003")
            .unwrap();
        assert_eq!(
            runner.history(),
            vec!["IRQBALANCE_BANNED_CPUS=00000000,00000003 irqbalance --oneshot"]
        );
    }

    #[test]
    fn test_oneshot_failure() {
        let runner = MockRunner::new()
            .with_binary("irqbalance", "/usr/sbin/irqbalance")
            .with_response("irqbalance", Output::failure(2, "boom"));
        match IrqBalanceService::new(Arc::new(runner)).run_oneshot("0") {
            Err(Error::Command(command::Error::Failed { stderr, .. })) => assert_eq!(stderr, "boom"),
            other => panic!("expected command failure, got {other:?}"),
        }
    }
}
