//! Systemd slice and scope naming.

use super::{CRIO_PREFIX, Error, Result};

const SLICE_SUFFIX: &str = ".slice";

/// Expands a slice name into the cgroup path systemd creates for it.
///
/// Every dash-separated component names an ancestor slice, so `a-b-c.slice` lives at
/// `/a.slice/a-b.slice/a-b-c.slice`. The root slice `-.slice` expands to `/`.
///
/// # Errors
///
/// Returns [`Error::InvalidSlice`] for names without the `.slice` suffix, names containing `/`,
/// and names with empty components such as `a--b.slice` or `-a.slice`.
///
/// # Example
///
/// ```rust
/// use creo_isolation::cgroup::slice::expand_slice;
///
/// assert_eq!(
///     expand_slice("kubepods-burstable.slice").unwrap(),
///     "/kubepods.slice/kubepods-burstable.slice"
/// );
/// ```
pub fn expand_slice(slice: &str) -> Result<String> {
    let invalid = || Error::InvalidSlice(slice.to_owned());
    let name = slice.strip_suffix(SLICE_SUFFIX).ok_or_else(invalid)?;
    if slice.contains('/') {
        return Err(invalid());
    }
    if name == "-" {
        return Ok("/".to_owned());
    }

    let mut path = String::with_capacity(slice.len() * 2);
    let mut prefix = String::with_capacity(slice.len());
    for component in name.split('-') {
        if component.is_empty() {
            return Err(invalid());
        }
        path.push('/');
        path.push_str(&prefix);
        path.push_str(component);
        path.push_str(SLICE_SUFFIX);
        prefix.push_str(component);
        prefix.push('-');
    }
    Ok(path)
}

/// The last element of a `/`-separated path, ignoring trailing slashes.
///
/// An empty path yields `.` and a path of only slashes yields `/`.
pub fn base_name(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

pub fn is_slice(name: &str) -> bool {
    name.ends_with(SLICE_SUFFIX)
}

/// Scope unit name of a container.
pub fn container_scope(id: &str) -> String {
    format!("{CRIO_PREFIX}-{id}.scope")
}

/// Scope unit name of a container's supervisor.
pub fn conmon_scope(id: &str) -> String {
    format!("{CRIO_PREFIX}-conmon-{id}.scope")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_nested_slice() {
        assert_eq!(
            expand_slice("kubepods-besteffort-pod123.slice").unwrap(),
            "/kubepods.slice/kubepods-besteffort.slice/kubepods-besteffort-pod123.slice"
        );
    }

    #[test]
    fn test_expand_single_component() {
        assert_eq!(expand_slice("system.slice").unwrap(), "/system.slice");
    }

    #[test]
    fn test_expand_root_slice() {
        assert_eq!(expand_slice("-.slice").unwrap(), "/");
    }

    #[test]
    fn test_expand_rejects_malformed_names() {
        for name in ["", ".slice", "system", "a/b.slice", "a--b.slice", "-a.slice", "a-.slice"] {
            match expand_slice(name) {
                Err(Error::InvalidSlice(got)) => assert_eq!(got, name),
                other => panic!("expected InvalidSlice for {name:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(""), ".");
        assert_eq!(base_name("///"), "/");
        assert_eq!(base_name("pod.slice"), "pod.slice");
        assert_eq!(base_name("/kubepods.slice/pod.slice/"), "pod.slice");
        assert_eq!(base_name("/crio"), "crio");
    }

    #[test]
    fn test_scope_names() {
        assert_eq!(container_scope("abc"), "crio-abc.scope");
        assert_eq!(conmon_scope("abc"), "crio-conmon-abc.scope");
        assert!(is_slice("pod.slice"));
        assert!(!is_slice("pod.scope"));
    }
}
