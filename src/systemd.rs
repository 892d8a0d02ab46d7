//! Systemd unit management.
//!
//! The runtime only needs two calls from systemd's manager interface: starting a transient
//! scope for a process and setting properties on an existing unit. [`UnitManager`] captures
//! exactly that, [`BusctlUnitManager`] performs the calls through `busctl`.

use std::fmt;
use std::sync::Arc;

use crate::command::{self, Command, CommandRunner};

const SYSTEMD_DESTINATION: &str = "org.freedesktop.systemd1";
const SYSTEMD_OBJECT_PATH: &str = "/org/freedesktop/systemd1";
const SYSTEMD_MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("systemd call `{method}` for unit `{unit}` failed: {source}")]
    Call {
        method: &'static str,
        unit: String,
        #[source]
        source: command::Error,
    },
    #[error("failed to query systemd property `{property}`: {source}")]
    Query {
        property: String,
        #[source]
        source: command::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A typed unit property with its D-Bus signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitProperty {
    Slice(String),
    Description(String),
    Pids(Vec<u32>),
    Delegate(bool),
    DefaultDependencies(bool),
    KillSignal(i32),
    After(Vec<String>),
    /// CPU bitmask, byte 0 holding CPUs 0-7.
    AllowedCpus(Vec<u8>),
    CpuShares(u64),
    CpuWeight(u64),
    CpuQuotaPerSecUsec(u64),
    CpuQuotaPeriodUsec(u64),
}

impl UnitProperty {
    pub fn name(&self) -> &'static str {
        match self {
            UnitProperty::Slice(_) => "Slice",
            UnitProperty::Description(_) => "Description",
            UnitProperty::Pids(_) => "PIDs",
            UnitProperty::Delegate(_) => "Delegate",
            UnitProperty::DefaultDependencies(_) => "DefaultDependencies",
            UnitProperty::KillSignal(_) => "KillSignal",
            UnitProperty::After(_) => "After",
            UnitProperty::AllowedCpus(_) => "AllowedCPUs",
            UnitProperty::CpuShares(_) => "CPUShares",
            UnitProperty::CpuWeight(_) => "CPUWeight",
            UnitProperty::CpuQuotaPerSecUsec(_) => "CPUQuotaPerSecUSec",
            UnitProperty::CpuQuotaPeriodUsec(_) => "CPUQuotaPeriodUSec",
        }
    }

    /// Renders the property as `busctl` arguments: name, signature, then the value.
    fn busctl_args(&self) -> Vec<String> {
        fn array<T: ToString>(signature: &str, items: &[T]) -> Vec<String> {
            let mut args = vec![signature.to_owned(), items.len().to_string()];
            args.extend(items.iter().map(ToString::to_string));
            args
        }

        let mut args = vec![self.name().to_owned()];
        args.extend(match self {
            UnitProperty::Slice(value) | UnitProperty::Description(value) => {
                vec!["s".to_owned(), value.clone()]
            }
            UnitProperty::Pids(pids) => array("au", pids),
            UnitProperty::Delegate(value) | UnitProperty::DefaultDependencies(value) => {
                vec!["b".to_owned(), value.to_string()]
            }
            UnitProperty::KillSignal(signal) => vec!["i".to_owned(), signal.to_string()],
            UnitProperty::After(units) => array("as", units),
            UnitProperty::AllowedCpus(bits) => array("ay", bits),
            UnitProperty::CpuShares(value)
            | UnitProperty::CpuWeight(value)
            | UnitProperty::CpuQuotaPerSecUsec(value)
            | UnitProperty::CpuQuotaPeriodUsec(value) => vec!["t".to_owned(), value.to_string()],
        });
        args
    }
}

/// The subset of systemd's manager interface the runtime relies on.
pub trait UnitManager: fmt::Debug + Send + Sync {
    /// Starts a transient unit (usually a scope) with the given properties.
    fn start_transient_unit(&self, name: &str, properties: &[UnitProperty]) -> Result<()>;

    /// Sets runtime properties on an existing unit.
    fn set_unit_properties(&self, name: &str, properties: &[UnitProperty]) -> Result<()>;

    /// Reports whether the running systemd knows `property`.
    fn supports_property(&self, property: &str) -> Result<bool>;
}

/// Places `pid` into a new transient scope `unit` below `slice`.
///
/// The scope is delegated and carries no default dependencies; `extra` properties are appended.
pub fn run_under_systemd_scope(
    units: &dyn UnitManager,
    pid: u32,
    slice: &str,
    unit: &str,
    extra: Vec<UnitProperty>,
) -> Result<()> {
    let mut properties = vec![
        UnitProperty::Slice(slice.to_owned()),
        UnitProperty::Description(format!("crio scope for pid {pid}")),
        UnitProperty::Pids(vec![pid]),
        UnitProperty::Delegate(true),
        UnitProperty::DefaultDependencies(false),
    ];
    properties.extend(extra);
    units.start_transient_unit(unit, &properties)
}

/// [`UnitManager`] that talks to systemd through `busctl` and `systemctl`.
#[derive(Debug, Clone)]
pub struct BusctlUnitManager {
    runner: Arc<dyn CommandRunner>,
}

impl BusctlUnitManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn call(&self, method: &'static str, unit: &str, args: Vec<String>) -> Result<()> {
        let command = Command::new("busctl")
            .args([
                "call",
                SYSTEMD_DESTINATION,
                SYSTEMD_OBJECT_PATH,
                SYSTEMD_MANAGER_INTERFACE,
                method,
            ])
            .args(args);
        self.runner
            .run(&command)
            .map(|_| ())
            .map_err(|source| Error::Call {
                method,
                unit: unit.to_owned(),
                source,
            })
    }
}

fn property_args(properties: &[UnitProperty]) -> Vec<String> {
    let mut args = vec![properties.len().to_string()];
    args.extend(properties.iter().flat_map(UnitProperty::busctl_args));
    args
}

impl UnitManager for BusctlUnitManager {
    fn start_transient_unit(&self, name: &str, properties: &[UnitProperty]) -> Result<()> {
        let mut args = vec![
            "ssa(sv)a(sa(sv))".to_owned(),
            name.to_owned(),
            "fail".to_owned(),
        ];
        args.extend(property_args(properties));
        // no auxiliary units
        args.push("0".to_owned());
        self.call("StartTransientUnit", name, args)
    }

    fn set_unit_properties(&self, name: &str, properties: &[UnitProperty]) -> Result<()> {
        let mut args = vec!["sba(sv)".to_owned(), name.to_owned(), "true".to_owned()];
        args.extend(property_args(properties));
        self.call("SetUnitProperties", name, args)
    }

    fn supports_property(&self, property: &str) -> Result<bool> {
        let command = Command::new("systemctl").args(["show", "-p", property, "systemd"]);
        let output = self
            .runner
            .run(&command)
            .map_err(|source| Error::Query {
                property: property.to_owned(),
                source,
            })?;
        Ok(!output.stdout.trim().is_empty())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records started units and set properties.
    #[derive(Debug, Default)]
    pub struct MockUnitManager {
        pub supports_allowed_cpus: bool,
        pub fail_start: bool,
        pub started: Mutex<Vec<(String, Vec<UnitProperty>)>>,
        pub queries: Mutex<usize>,
    }

    impl MockUnitManager {
        pub fn new(supports_allowed_cpus: bool) -> Self {
            Self {
                supports_allowed_cpus,
                ..Default::default()
            }
        }
    }

    impl UnitManager for MockUnitManager {
        fn start_transient_unit(&self, name: &str, properties: &[UnitProperty]) -> Result<()> {
            if self.fail_start {
                return Err(Error::Call {
                    method: "StartTransientUnit",
                    unit: name.to_owned(),
                    source: command::Error::Failed {
                        command: "busctl".to_owned(),
                        status: "exit code 1".to_owned(),
                        stderr: "unit exists".to_owned(),
                    },
                });
            }
            self.started
                .lock()
                .unwrap()
                .push((name.to_owned(), properties.to_vec()));
            Ok(())
        }

        fn set_unit_properties(&self, name: &str, properties: &[UnitProperty]) -> Result<()> {
            self.started
                .lock()
                .unwrap()
                .push((name.to_owned(), properties.to_vec()));
            Ok(())
        }

        fn supports_property(&self, _property: &str) -> Result<bool> {
            *self.queries.lock().unwrap() += 1;
            Ok(self.supports_allowed_cpus)
        }
    }
}
