use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::cgroup::{CgroupHandle, CgroupVersion};
use crate::fsutil;

use super::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedQuota {
    file: PathBuf,
    value: String,
}

/// The original quota of a pod cgroup and the isolated containers keeping it lifted.
#[derive(Debug)]
struct PodQuota {
    value: String,
    holders: HashSet<String>,
}

#[derive(Debug, Default)]
struct Saved {
    pods: HashMap<PathBuf, PodQuota>,
    containers: HashMap<String, Vec<SavedQuota>>,
}

/// CFS quotas lifted for isolated containers, remembered so they can be put back.
///
/// Container quotas are kept per container id. A pod quota is shared by every isolated container
/// of the pod and only goes back once the last of them is restored.
#[derive(Debug, Default)]
pub struct QuotaStore {
    saved: Mutex<Saved>,
}

pub(super) fn quota_file(handle: &CgroupHandle) -> Option<PathBuf> {
    let file = match handle.version() {
        CgroupVersion::V1 => "cpu.cfs_quota_us",
        CgroupVersion::V2 => "cpu.max",
    };
    handle.controller_dir("cpu").map(|dir| dir.join(file))
}

fn unlimited(version: CgroupVersion) -> &'static str {
    match version {
        CgroupVersion::V1 => "-1",
        // the period is kept
        CgroupVersion::V2 => "max",
    }
}

fn lift(file: &Path, version: CgroupVersion) -> Result<()> {
    fsutil::write_file(file, unlimited(version))?;
    log::debug!("Disabled CFS quota in {}", file.display());
    Ok(())
}

fn put_back(file: &Path, value: &str) -> Result<()> {
    if !fsutil::file_exists(file) {
        log::debug!("Not restoring CFS quota of removed {}", file.display());
        return Ok(());
    }
    fsutil::write_file(file, value)?;
    Ok(())
}

impl QuotaStore {
    /// Removes the CFS quota of the pod cgroup and of every container cgroup.
    ///
    /// The pod goes first since the kernel refuses a child quota above its parent's. The first
    /// original value seen for each file is kept, so disabling twice restores the real original.
    pub fn disable(&self, id: &str, pod: &CgroupHandle, containers: &[CgroupHandle]) -> Result<()> {
        let mut saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);
        let Saved {
            pods,
            containers: saved_containers,
        } = &mut *saved;

        if let Some(file) = quota_file(pod) {
            match pods.get_mut(&file) {
                Some(quota) => {
                    quota.holders.insert(id.to_owned());
                }
                None => {
                    let value = fsutil::read_trimmed(&file)?;
                    pods.insert(
                        file.clone(),
                        PodQuota {
                            value,
                            holders: HashSet::from([id.to_owned()]),
                        },
                    );
                }
            }
            lift(&file, pod.version())?;
        }

        let entries = saved_containers.entry(id.to_owned()).or_default();
        for handle in containers {
            let Some(file) = quota_file(handle) else {
                continue;
            };
            let value = fsutil::read_trimmed(&file)?;
            if !entries.iter().any(|entry| entry.file == file) {
                entries.push(SavedQuota {
                    file: file.clone(),
                    value,
                });
            }
            lift(&file, handle.version())?;
        }
        Ok(())
    }

    /// Writes back the quotas [`QuotaStore::disable`] replaced for container `id`.
    ///
    /// Containers are restored before their pod, and the pod only when no other isolated
    /// container holds it. Cgroups that are gone by now are skipped, and a second call finds
    /// nothing left to do.
    pub fn restore(&self, id: &str) -> Result<()> {
        let mut saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);

        let entries = saved.containers.remove(id).unwrap_or_default();
        for entry in entries.iter().rev() {
            put_back(&entry.file, &entry.value)?;
        }

        let released: Vec<PathBuf> = saved
            .pods
            .iter_mut()
            .filter_map(|(file, quota)| {
                (quota.holders.remove(id) && quota.holders.is_empty()).then(|| file.clone())
            })
            .collect();
        for file in released {
            if let Some(quota) = saved.pods.remove(&file) {
                put_back(&file, &quota.value)?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        let saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);
        saved.pods.is_empty() && saved.containers.is_empty()
    }
}
