use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::CgroupHandle;

#[derive(Debug, Default)]
struct Registry {
    containers: HashMap<String, Arc<CgroupHandle>>,
    sandboxes: HashMap<String, Arc<CgroupHandle>>,
}

/// Caches one [`CgroupHandle`] per container and sandbox id.
///
/// Both maps share a single lock, so a lookup followed by an insert cannot race with an
/// eviction of the same id.
#[derive(Debug, Default)]
pub struct ManagerRegistry {
    inner: Mutex<Registry>,
}

/// Returns the cached handle for `id` if it still points at `path`, otherwise replaces it.
fn get_or_insert(
    map: &mut HashMap<String, Arc<CgroupHandle>>,
    id: &str,
    path: &str,
    make: impl FnOnce() -> CgroupHandle,
) -> Arc<CgroupHandle> {
    if let Some(handle) = map.get(id).filter(|handle| handle.path() == path) {
        return Arc::clone(handle);
    }
    let handle = Arc::new(make());
    map.insert(id.to_owned(), Arc::clone(&handle));
    handle
}

impl ManagerRegistry {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The handle of container `id` at `path`, created with `make` on first use.
    pub fn container_or_insert_with(
        &self,
        id: &str,
        path: &str,
        make: impl FnOnce() -> CgroupHandle,
    ) -> Arc<CgroupHandle> {
        get_or_insert(&mut self.lock().containers, id, path, make)
    }

    /// The handle of sandbox `id` at `path`, created with `make` on first use.
    pub fn sandbox_or_insert_with(
        &self,
        id: &str,
        path: &str,
        make: impl FnOnce() -> CgroupHandle,
    ) -> Arc<CgroupHandle> {
        get_or_insert(&mut self.lock().sandboxes, id, path, make)
    }

    pub fn remove_container(&self, id: &str) -> Option<Arc<CgroupHandle>> {
        self.lock().containers.remove(id)
    }

    pub fn remove_sandbox(&self, id: &str) -> Option<Arc<CgroupHandle>> {
        self.lock().sandboxes.remove(id)
    }

    /// Number of cached containers and sandboxes.
    #[cfg(test)]
    pub(crate) fn counts(&self) -> (usize, usize) {
        let registry = self.lock();
        (registry.containers.len(), registry.sandboxes.len())
    }
}
