use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::fsutil;

use super::parser::parse_mount_info_line;
use super::{Error, Result};

/// Cgroup filesystems found in a mount table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CgroupMounts {
    /// Mount point of the first `cgroup2` filesystem, if any.
    pub unified: Option<PathBuf>,
    /// Cgroup v1 hierarchies keyed by controller name (e.g. `cpu`, `memory`, `name=systemd`).
    pub controllers: HashMap<String, PathBuf>,
}

impl CgroupMounts {
    /// Reports whether `root` itself is a `cgroup2` mount.
    pub fn is_unified_at(&self, root: &Path) -> bool {
        self.unified.as_deref() == Some(root)
    }

    /// Mount point of the v1 hierarchy carrying `controller`.
    pub fn controller(&self, controller: &str) -> Option<&Path> {
        self.controllers.get(controller).map(PathBuf::as_path)
    }
}

/// Collects the cgroup mounts listed in a Linux `mountinfo` file.
///
/// # Errors
///
/// - [`Error::FileOpen`] if the file can't be opened.
/// - [`Error::ReadLine`] if reading from the file fails.
/// - [`Error::Parse`] if parsing any line fails.
///
/// # Example
///
/// ```no_run
/// use creo_isolation::mountinfo::detect_cgroup_mounts;
///
/// let mounts = detect_cgroup_mounts("/proc/self/mountinfo").unwrap();
/// println!("unified hierarchy: {:?}", mounts.unified);
/// ```
pub fn detect_cgroup_mounts(path: impl AsRef<Path>) -> Result<CgroupMounts> {
    let path = path.as_ref();
    let buf = fsutil::open_file_reader(path)?;

    detect_cgroup_mounts_from_reader(buf, path)
}

/// Scans `reader` line by line. `origin` only labels errors.
fn detect_cgroup_mounts_from_reader<R: BufRead>(
    mut reader: R,
    origin: &Path,
) -> Result<CgroupMounts> {
    let mut line = String::with_capacity(256);
    let mut mounts = CgroupMounts::default();

    while reader
        .read_line(&mut line)
        .map_err(|source| Error::ReadLine {
            path: origin.to_path_buf(),
            source,
        })?
        != 0
    {
        if line.trim().is_empty() {
            line.clear();
            continue;
        }
        let mount_info = parse_mount_info_line(line.as_str()).map_err(|source| Error::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        match mount_info.fs_type {
            "cgroup2" if mounts.unified.is_none() => {
                log::debug!("Found `cgroup2` mount point: {}", mount_info.mount_point);
                mounts.unified = Some(PathBuf::from(mount_info.mount_point().as_ref()));
            }
            "cgroup" => {
                let mount_point = PathBuf::from(mount_info.mount_point().as_ref());
                for controller in mount_info
                    .super_options()
                    .filter(|opt| *opt != "rw" && *opt != "ro")
                {
                    mounts
                        .controllers
                        .entry(controller.to_owned())
                        .or_insert_with(|| mount_point.clone());
                }
            }
            _ => {}
        }

        line.clear();
    }

    Ok(mounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn new_cursor_from_contents(contents: &str) -> Cursor<Vec<u8>> {
        Cursor::new(contents.as_bytes().to_vec())
    }

    #[test]
    fn test_detect_single_cgroup2_mount() {
        let input =
            "42 35 0:39 / /sys/fs/cgroup rw nosuid,nodev,noexec,relatime - cgroup2 cgroup rw\n";
        let reader = new_cursor_from_contents(input);

        let mounts = detect_cgroup_mounts_from_reader(reader, Path::new("/dummy")).unwrap();
        assert_eq!(mounts.unified, Some(PathBuf::from("/sys/fs/cgroup")));
        assert!(mounts.is_unified_at(Path::new("/sys/fs/cgroup")));
        assert!(mounts.controllers.is_empty());
    }

    #[test]
    fn test_detect_first_of_multiple_cgroup2_mounts() {
        let input = "\
43 35 0:39 / /sys/fs/cgroup rw nosuid,nodev,noexec,relatime - cgroup2 cgroup rw
42 35 0:39 / /ignored rw nosuid,nodev,noexec,relatime - cgroup2 cgroup rw
";
        let reader = new_cursor_from_contents(input);

        let mounts = detect_cgroup_mounts_from_reader(reader, Path::new("/dummy")).unwrap();
        assert_eq!(mounts.unified, Some(PathBuf::from("/sys/fs/cgroup")));
    }

    #[test]
    fn test_detect_v1_hierarchies() {
        let input = "\
25 1 0:24 / /proc rw,relatime - proc proc rw
30 25 0:26 / /sys/fs/cgroup rw - tmpfs tmpfs ro,mode=755
31 30 0:27 / /sys/fs/cgroup/unified rw - cgroup2 cgroup2 rw,nsdelegate
32 30 0:28 / /sys/fs/cgroup/systemd rw - cgroup cgroup rw,xattr,name=systemd
33 30 0:29 / /sys/fs/cgroup/cpu,cpuacct rw - cgroup cgroup rw,cpu,cpuacct
34 30 0:30 / /sys/fs/cgroup/memory rw - cgroup cgroup rw,memory
";
        let reader = new_cursor_from_contents(input);

        let mounts = detect_cgroup_mounts_from_reader(reader, Path::new("/dummy")).unwrap();
        assert!(!mounts.is_unified_at(Path::new("/sys/fs/cgroup")));
        assert_eq!(
            mounts.controller("cpu"),
            Some(Path::new("/sys/fs/cgroup/cpu,cpuacct"))
        );
        assert_eq!(
            mounts.controller("cpuacct"),
            Some(Path::new("/sys/fs/cgroup/cpu,cpuacct"))
        );
        assert_eq!(
            mounts.controller("memory"),
            Some(Path::new("/sys/fs/cgroup/memory"))
        );
        assert_eq!(
            mounts.controller("name=systemd"),
            Some(Path::new("/sys/fs/cgroup/systemd"))
        );
        assert!(mounts.controller("rw").is_none());
        assert!(mounts.controller("pids").is_none());
    }

    #[test]
    fn test_detect_no_cgroup_mounts() {
        let input = "25 1 0:24 / /proc rw,relatime - proc proc rw\n";
        let reader = new_cursor_from_contents(input);

        let mounts = detect_cgroup_mounts_from_reader(reader, Path::new("/dummy")).unwrap();
        assert_eq!(mounts, CgroupMounts::default());
    }

    #[test]
    fn test_detect_invalid_line() {
        let input = "invalid mountinfo line";
        let path = Path::new("/dummy");
        let reader = new_cursor_from_contents(input);

        let err = detect_cgroup_mounts_from_reader(reader, path).unwrap_err();
        match err {
            Error::Parse { path: err_path, .. } => assert_eq!(err_path, path),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_detect_from_tempfile() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            "42 35 0:39 / /sys/fs/cgroup rw nosuid,nodev,noexec,relatime - cgroup2 cgroup rw"
        )
        .unwrap();

        let mounts = detect_cgroup_mounts(tmp.path()).unwrap();
        assert_eq!(mounts.unified, Some(PathBuf::from("/sys/fs/cgroup")));
    }

    #[test]
    fn test_detect_missing_file() {
        let err = detect_cgroup_mounts("/definitely/does/not/exist").unwrap_err();
        assert!(matches!(err, Error::FileOpen(_)));
    }
}
