use std::fmt;
use std::path::{Path, PathBuf};

use super::context::join_cgroup;

/// A resolved cgroup location: the parent it was derived from, the leaf name below it and the
/// path relative to the cgroup root (or a controller hierarchy on v1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CgroupPath {
    parent: String,
    leaf: String,
    absolute: String,
}

impl CgroupPath {
    pub(crate) fn new(
        parent: impl Into<String>,
        leaf: impl Into<String>,
        absolute: impl Into<String>,
    ) -> Self {
        Self {
            parent: parent.into(),
            leaf: leaf.into(),
            absolute: absolute.into(),
        }
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn leaf(&self) -> &str {
        &self.leaf
    }

    pub fn absolute(&self) -> &str {
        &self.absolute
    }

    /// Location of this cgroup below `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        join_cgroup(root, &self.absolute)
    }
}

impl fmt::Display for CgroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.absolute)
    }
}

/// Joins path elements below `/`, dropping empty, `.` and `..` components.
pub(crate) fn absolute(parts: &[&str]) -> String {
    let mut out = String::new();
    for component in parts.iter().flat_map(|part| part.split('/')) {
        match component {
            "" | "." => {}
            ".." => out.truncate(out.rfind('/').unwrap_or(0)),
            _ => {
                out.push('/');
                out.push_str(component);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Appends `leaf` to `parent`. An empty parent yields the bare leaf.
pub(crate) fn join(parent: &str, leaf: &str) -> String {
    if parent.is_empty() {
        return leaf.to_owned();
    }
    format!(
        "{}/{}",
        parent.trim_end_matches('/'),
        leaf.trim_start_matches('/')
    )
}

/// Everything but the last element of `path`.
pub(crate) fn dir_name(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => ".",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute() {
        assert_eq!(absolute(&["/", "", "crio-cid"]), "/crio-cid");
        assert_eq!(absolute(&["/", "crio", "crio-cid"]), "/crio/crio-cid");
        assert_eq!(absolute(&["/", "/kubepods//pod1/", "crio-cid"]), "/kubepods/pod1/crio-cid");
        assert_eq!(absolute(&["/", "a/../b"]), "/b");
        assert_eq!(absolute(&["/"]), "/");
    }

    #[test]
    fn test_join_and_dir_name() {
        assert_eq!(join("", "crio-sb"), "crio-sb");
        assert_eq!(join("/", "crio-sb"), "/crio-sb");
        assert_eq!(join("/kubepods/", "crio-sb"), "/kubepods/crio-sb");
        assert_eq!(dir_name("/kubepods.slice/crio-cid.scope"), "/kubepods.slice");
        assert_eq!(dir_name("/crio-cid.scope"), "/");
        assert_eq!(dir_name("crio-cid"), ".");
    }

    #[test]
    fn test_under_root() {
        let path = CgroupPath::new("/crio", "crio-cid", "/crio/crio-cid");
        assert_eq!(path.parent(), "/crio");
        assert_eq!(path.leaf(), "crio-cid");
        assert_eq!(
            path.under(Path::new("/sys/fs/cgroup")),
            PathBuf::from("/sys/fs/cgroup/crio/crio-cid")
        );
        assert_eq!(path.to_string(), "/crio/crio-cid");
    }
}
