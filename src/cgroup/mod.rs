//! Mapping of sandboxes and containers onto kernel cgroups.
//!
//! Two axes of host variability are hidden behind [`CgroupManager`]: the cgroup version
//! (legacy v1 hierarchies vs. the unified v2 hierarchy) and the driver (systemd-managed slices
//! and scopes vs. plain directories under the cgroup root).
//!
//! # Key Components
//!
//! - [`HostContext`]: lazily resolved host facts (cgroup version, v1 mount points, systemd
//!   property support), shared by every consumer.
//! - [`CgroupManager`]: driver dispatch for path resolution, resource application, stats and
//!   supervisor placement.
//! - [`ManagerRegistry`]: per-entity [`CgroupHandle`] cache behind a single lock.
//! - [`stats`]: raw cgroup file parsers and the normalisation into [`stats::CgroupStats`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use creo_isolation::cgroup::{CgroupManager, HostContext};
//! use creo_isolation::command::SystemCommandRunner;
//! use creo_isolation::systemd::BusctlUnitManager;
//!
//! let units = Arc::new(BusctlUnitManager::new(Arc::new(SystemCommandRunner)));
//! let ctx = Arc::new(HostContext::new("/sys/fs/cgroup", "/proc", units));
//! let manager = CgroupManager::new("cgroupfs", ctx).unwrap();
//! assert_eq!(manager.container_cgroup_path("", "cid"), "/crio/crio-cid");
//! ```
mod collector;
pub(crate) mod context;
mod error;
mod handle;
pub mod manager;
mod memory;
mod path;
mod registry;
mod resources;
pub mod slice;
pub mod stats;
mod utils;

use std::fmt;
use std::str::FromStr;

pub use collector::{Collector, CollectorBuilder};
pub use context::HostContext;
pub use error::{Error, Result};
pub use handle::CgroupHandle;
pub use manager::CgroupManager;
pub use memory::{verify_cgroup_has_enough_memory, verify_memory_is_enough};
pub use path::CgroupPath;
pub use registry::ManagerRegistry;
pub use resources::ResourceSpec;

/// Prefix of every cgroup leaf and scope the runtime creates.
pub const CRIO_PREFIX: &str = "crio";

/// Smallest non-zero memory limit a sandbox or container may be given.
pub const MIN_MEMORY_LIMIT: i64 = 12 * 1024 * 1024;

/// Cgroup hierarchy layout of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupVersion {
    V1,
    V2,
}

impl fmt::Display for CgroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgroupVersion::V1 => f.write_str("v1"),
            CgroupVersion::V2 => f.write_str("v2"),
        }
    }
}

/// Who owns the cgroup tree: systemd or the runtime itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CgroupDriver {
    Systemd,
    Cgroupfs,
}

impl CgroupDriver {
    pub fn name(&self) -> &'static str {
        match self {
            CgroupDriver::Systemd => "systemd",
            CgroupDriver::Cgroupfs => "cgroupfs",
        }
    }
}

impl FromStr for CgroupDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "systemd" => Ok(CgroupDriver::Systemd),
            "cgroupfs" => Ok(CgroupDriver::Cgroupfs),
            other => Err(Error::InvalidManager(other.to_owned())),
        }
    }
}

impl fmt::Display for CgroupDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Driver and version pair, resolved once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CgroupIdentity {
    pub driver: CgroupDriver,
    pub version: CgroupVersion,
}

impl fmt::Display for CgroupIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on cgroup {}", self.driver, self.version)
    }
}
