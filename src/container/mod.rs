//! The runtime's view of containers and sandboxes, reduced to what isolation needs.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cgroup::ResourceSpec;
use crate::cpuset::CpuSet;

mod error;

pub use error::{Error, Result};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 255;

/// A validated container or sandbox identifier.
///
/// # Examples
///
/// ```
/// # use creo_isolation::container::{ContainerID, Error};
/// let raw_id = "abc123abc123abc123abc123abc123abc123abc123abc123abc123abc123abcd";
/// let container_id = ContainerID::new(raw_id).unwrap();
/// assert_eq!(container_id.as_ref(), raw_id);
/// assert!(matches!(ContainerID::new(""), Err(Error::InvalidContainerID(_))));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerID`] if the input is empty, longer than
    /// [`CONTAINER_ID_MAX_LEN`], or contains a `/`, which would escape its cgroup leaf.
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() || src.len() > CONTAINER_ID_MAX_LEN || src.contains('/') {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }

}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A container about to start or stop, with the resources it was created with.
#[derive(Debug, Clone)]
pub struct Container {
    id: ContainerID,
    name: String,
    resources: ResourceSpec,
}

impl Container {
    pub fn new(id: ContainerID, name: impl Into<String>, resources: ResourceSpec) -> Self {
        Self {
            id,
            name: name.into(),
            resources,
        }
    }

    pub fn id(&self) -> &ContainerID {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> &ResourceSpec {
        &self.resources
    }

    /// The CPUs the container is pinned to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCpus`] when no CPU list was requested and [`Error::CpuSet`] when
    /// the list does not parse.
    pub fn cpu_set(&self) -> Result<CpuSet> {
        let cpus = self
            .resources
            .cpus()
            .ok_or_else(|| Error::MissingCpus(self.id.clone()))?;
        Ok(cpus.parse()?)
    }
}

/// The pod sandbox a container belongs to.
#[derive(Debug, Clone)]
pub struct Sandbox {
    id: ContainerID,
    cgroup_parent: String,
    annotations: HashMap<String, String>,
}

impl Sandbox {
    pub fn new(
        id: ContainerID,
        cgroup_parent: impl Into<String>,
        annotations: HashMap<String, String>,
    ) -> Self {
        Self {
            id,
            cgroup_parent: cgroup_parent.into(),
            annotations,
        }
    }

    pub fn id(&self) -> &ContainerID {
        &self.id
    }

    pub fn cgroup_parent(&self) -> &str {
        &self.cgroup_parent
    }

    pub fn annotations(&self) -> &HashMap<String, String> {
        &self.annotations
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_validation() {
        assert!(ContainerID::new("abc").is_ok());
        for invalid in ["", "a/b", &"x".repeat(256)] {
            match ContainerID::new(invalid) {
                Err(Error::InvalidContainerID(id)) => assert_eq!(id, invalid),
                other => panic!("expected InvalidContainerID, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_cpu_set() {
        let id = ContainerID::new("cid").unwrap();
        let resources = ResourceSpec {
            cpus: Some("1-2,4".to_owned()),
            ..Default::default()
        };
        let container = Container::new(id.clone(), "app", resources);
        assert_eq!(container.cpu_set().unwrap().to_string(), "1-2,4");

        let container = Container::new(id, "app", ResourceSpec::default());
        match container.cpu_set() {
            Err(Error::MissingCpus(id)) => assert_eq!(id.as_ref(), "cid"),
            other => panic!("expected MissingCpus, got {other:?}"),
        }
    }

    #[test]
    fn test_sandbox_annotation() {
        let annotations = HashMap::from([("k".to_owned(), "v".to_owned())]);
        let sandbox = Sandbox::new(ContainerID::new("sb").unwrap(), "/kubepods", annotations);
        assert_eq!(sandbox.annotation("k"), Some("v"));
        assert_eq!(sandbox.annotation("missing"), None);
        assert_eq!(sandbox.cgroup_parent(), "/kubepods");
    }
}
