//! Object identity registries
//!
//! Lock objects and thread objects are only known to the engine through their
//! tracked identities. These registries map those identities to shadow state.

use crate::core::error::{EngineError, Result};
use crate::core::shadow_lock::ShadowLock;
use crate::core::types::{ProcessId, ProcessThreadId, ProcessTrackedObjectId, TrackedObjectId};
use fxhash::FxHashMap;

/// Shadow locks of one process, created lazily on first use
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: FxHashMap<ProcessTrackedObjectId, ShadowLock>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_add(&mut self, id: ProcessTrackedObjectId) -> &mut ShadowLock {
        self.locks.entry(id).or_insert_with(|| ShadowLock::new(id))
    }

    pub fn get(&self, id: ProcessTrackedObjectId) -> Result<&ShadowLock> {
        self.locks.get(&id).ok_or(EngineError::UnknownObject(id))
    }

    pub fn get_mut(&mut self, id: ProcessTrackedObjectId) -> Result<&mut ShadowLock> {
        self.locks.get_mut(&id).ok_or(EngineError::UnknownObject(id))
    }

    pub fn try_get(&self, id: ProcessTrackedObjectId) -> Option<&ShadowLock> {
        self.locks.get(&id)
    }

    pub fn remove(&mut self, id: ProcessTrackedObjectId) -> Option<ShadowLock> {
        self.locks.remove(&id)
    }

    /// Remove every listed lock of a process
    ///
    /// Ids without a shadow lock are skipped.
    ///
    /// # Returns
    /// Number of locks that were actually removed
    pub fn remove_range<I>(&mut self, process_id: ProcessId, ids: I) -> usize
    where
        I: IntoIterator<Item = TrackedObjectId>,
    {
        ids.into_iter()
            .filter(|&object_id| {
                self.locks
                    .remove(&ProcessTrackedObjectId::new(process_id, object_id))
                    .is_some()
            })
            .count()
    }

    pub fn locks(&self) -> impl Iterator<Item = &ShadowLock> {
        self.locks.values()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn clear(&mut self) {
        self.locks.clear();
    }
}

/// Mapping from runtime thread objects to the OS threads running them
#[derive(Debug, Default)]
pub struct ThreadObjectRegistry {
    mappings: FxHashMap<ProcessTrackedObjectId, ProcessThreadId>,
}

impl ThreadObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a thread object to a thread, overwriting an older binding
    pub fn register_mapping(&mut self, object: ProcessTrackedObjectId, thread: ProcessThreadId) {
        self.mappings.insert(object, thread);
    }

    pub fn try_get_thread_id(&self, object: ProcessTrackedObjectId) -> Option<ProcessThreadId> {
        self.mappings.get(&object).copied()
    }

    pub fn get_thread_id(&self, object: ProcessTrackedObjectId) -> Result<ProcessThreadId> {
        self.try_get_thread_id(object)
            .ok_or(EngineError::UnknownThread(object))
    }

    /// Drop every mapping pointing at `thread`
    pub fn remove_thread(&mut self, thread: ProcessThreadId) {
        self.mappings.retain(|_, mapped| *mapped != thread);
    }

    /// Whether any thread object is still bound to `thread`
    pub fn contains_thread(&self, thread: ProcessThreadId) -> bool {
        self.mappings.values().any(|mapped| *mapped == thread)
    }

    /// Forget a collected thread object
    pub fn remove_object(&mut self, object: ProcessTrackedObjectId) -> Option<ProcessThreadId> {
        self.mappings.remove(&object)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn clear(&mut self) {
        self.mappings.clear();
    }
}
