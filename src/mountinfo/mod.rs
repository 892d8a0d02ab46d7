//! Cgroup hierarchy detection from `/proc/<pid>/mountinfo`.
mod detect;
mod error;
mod parser;

pub use detect::{CgroupMounts, detect_cgroup_mounts};
pub use error::{Error, Result};
