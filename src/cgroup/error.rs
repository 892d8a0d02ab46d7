use std::path::PathBuf;

use crate::{cpuset, fsutil, systemd};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid cgroup manager: {0}")]
    InvalidManager(String),

    #[error("invalid slice name: {0}")]
    InvalidSlice(String),

    #[error("expanding systemd slice for container {id}: {source}")]
    ContainerSlice {
        id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("configured with systemd cgroup manager, but did not receive slice as parent: {0}")]
    ParentNotSlice(String),

    #[error("configured with cgroupfs cgroup manager, but received systemd slice as parent: {0}")]
    ParentIsSlice(String),

    #[error("set memory limit {limit} too low; should be at least {min} bytes")]
    MemoryTooLow { limit: i64, min: i64 },

    #[error("pod {0}")]
    Pod(#[source] Box<Error>),

    #[error("invalid memory limit `{value}` in `{path}`: {source}")]
    InvalidMemoryLimit {
        path: PathBuf,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("conmon cgroup {0} invalid for cgroupfs")]
    InvalidConmonCgroup(String),

    #[error("failed to add conmon to systemd sandbox cgroup: {0}")]
    ConmonScope(#[source] systemd::Error),

    #[error("invalid cpuset: {0}")]
    CpuSet(#[from] cpuset::ParseError),

    #[error("failed to create cgroup `{path}`: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove cgroup `{path}`: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed cgroup entry `{line}` in `{path}`")]
    MalformedProcCgroup { path: PathBuf, line: String },

    #[error("invalid value `{value}` in `{path}`")]
    InvalidValue { path: PathBuf, value: String },

    #[error(transparent)]
    Read(#[from] fsutil::FileReadError),

    #[error(transparent)]
    Write(#[from] fsutil::FileWriteError),
}

impl Error {
    /// Marks an error raised while resolving a sandbox (pod) path.
    pub(crate) fn for_pod(self) -> Self {
        Error::Pod(Box::new(self))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
