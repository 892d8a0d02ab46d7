use std::path::PathBuf;

use crate::fsutil::{FileReadError, FileWriteError};
use crate::{bitmask, cgroup, command, container, cpuset};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("set CPU load balancing: {0}")]
    LoadBalancing(#[source] Box<Error>),
    #[error("set IRQ load balancing: {0}")]
    IrqLoadBalancing(#[source] Box<Error>),
    #[error("set CPU CFS quota: {0}")]
    CpuQuota(#[source] Box<Error>),
    #[error("set CPU PM QOS resume latency: {0}")]
    ResumeLatency(#[source] Box<Error>),
    #[error("set CPU scaling governor: {0}")]
    ScalingGovernor(#[source] Box<Error>),
    #[error("set shared CPUs: {0}")]
    SharedCpus(#[source] Box<Error>),

    #[error("timed out waiting for the condition: {0}")]
    Timeout(#[source] Box<Error>),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("invalid annotation value {value} for {annotation}")]
    InvalidAnnotation {
        annotation: &'static str,
        value: String,
    },

    #[error("governor {governor} not available for cpu {cpu}")]
    GovernorUnavailable { governor: String, cpu: usize },

    #[error("shared CPUs were requested for container {0} but none are defined")]
    NoSharedCpus(container::ContainerID),

    #[error("invalid CFS quota `{value}` in `{path}`")]
    InvalidQuota { path: PathBuf, value: String },

    #[error("invalid sched domain flags `{value}` in `{path}`")]
    InvalidFlags { path: PathBuf, value: String },

    #[error("failed to walk `{path}`: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove `{path}`: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Container(#[from] container::Error),
    #[error(transparent)]
    CpuSet(#[from] cpuset::ParseError),
    #[error(transparent)]
    Bitmask(#[from] bitmask::Error),
    #[error(transparent)]
    Cgroup(#[from] cgroup::Error),
    #[error(transparent)]
    Command(#[from] command::Error),
    #[error(transparent)]
    Read(#[from] FileReadError),
    #[error(transparent)]
    Write(#[from] FileWriteError),
}

impl Error {
    /// Whether the error stems from a file or directory that vanished, which is what a kernel
    /// rebuilding its sched domains looks like.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Walk { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            Error::Read(err) => err.is_not_found(),
            Error::Write(err) => err.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
