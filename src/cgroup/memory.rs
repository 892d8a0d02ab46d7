use crate::fsutil;

use super::context::{HostContext, join_cgroup};
use super::{Error, Result};

/// Rejects a memory limit below `min_memory`. Zero means no limit and is always accepted.
///
/// # Errors
///
/// Returns [`Error::MemoryTooLow`] iff `limit != 0 && limit < min_memory`.
///
/// # Example
///
/// ```rust
/// use creo_isolation::cgroup::verify_memory_is_enough;
///
/// assert!(verify_memory_is_enough(100, 200).is_err());
/// assert!(verify_memory_is_enough(151, 150).is_ok());
/// assert!(verify_memory_is_enough(0, 150).is_ok());
/// ```
pub fn verify_memory_is_enough(limit: i64, min_memory: i64) -> Result<()> {
    if limit != 0 && limit < min_memory {
        return Err(Error::MemoryTooLow {
            limit,
            min: min_memory,
        });
    }
    Ok(())
}

/// Checks the memory limit already configured on the cgroup `cgroup_path`.
///
/// A missing limit file, an empty file and `max` all mean no limit.
///
/// # Errors
///
/// Fails if the file cannot be read or parsed, or if the limit is too low.
pub fn verify_cgroup_has_enough_memory(
    ctx: &HostContext,
    cgroup_path: &str,
    min_memory: i64,
) -> Result<()> {
    let file = join_cgroup(&ctx.memory_root(), cgroup_path).join(ctx.memory_limit_file());
    let content = match fsutil::read_trimmed(&file) {
        Ok(content) => content,
        Err(err) if err.is_not_found() => {
            log::warn!("Failed to find {}: {err}", file.display());
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if content.is_empty() || content == "max" {
        return Ok(());
    }

    let limit = content
        .parse::<i64>()
        .map_err(|source| Error::InvalidMemoryLimit {
            path: file.clone(),
            value: content.clone(),
            source,
        })?;
    verify_memory_is_enough(limit, min_memory)
}
