use crate::cpuset;

use super::ContainerID;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid container id: {0}")]
    InvalidContainerID(String),
    #[error("find container {0} CPUs")]
    MissingCpus(ContainerID),
    #[error("invalid container cpuset: {0}")]
    CpuSet(#[from] cpuset::ParseError),
}
pub type Result<T> = std::result::Result<T, Error>;
