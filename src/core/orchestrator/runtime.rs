use super::ProcessOrchestrator;
use crate::core::events::SemanticEvent;
use crate::core::methods::{MethodDescriptor, MethodInterpretation};
use crate::core::types::{MethodToken, ModuleId, ProcessTrackedObjectId, TrackedObjectId};
use log::debug;

impl ProcessOrchestrator {
    pub(super) fn on_module_load(&mut self, module_id: ModuleId, path: &str) {
        debug!("Module {module_id:#x} loaded from {path}");
        self.modules.insert(module_id, path.to_owned());
    }

    pub(super) fn on_method_bound(
        &mut self,
        module_id: ModuleId,
        method_token: MethodToken,
        interpretation: MethodInterpretation,
    ) {
        let previous = self.methods.register(MethodDescriptor::new(
            module_id,
            method_token,
            interpretation,
        ));
        if let Some(previous) = previous
            && previous != interpretation
        {
            debug!(
                "Method {module_id:#x}:{method_token:#x} rebound from {previous:?} to {interpretation:?}"
            );
        }
    }

    pub(super) fn on_suspend_finished(&mut self) {
        let epoch = self.epochs.on_suspend_finished();
        self.raise(SemanticEvent::RuntimeSuspended {
            process_id: self.process_id,
            epoch,
        });
    }

    pub(super) fn on_resume_finished(&mut self) {
        let epoch = self.epochs.on_resume_finished();
        self.raise(SemanticEvent::RuntimeResumed {
            process_id: self.process_id,
            epoch,
        });
    }

    /// Drop shadow state of collected objects
    ///
    /// A lock that is still owned, waited for, or held by a pending frame is
    /// kept until the last reference is gone.
    pub(super) fn on_garbage_collected(&mut self, removed: &[TrackedObjectId]) {
        let mut collectable = Vec::with_capacity(removed.len());
        let mut deferred = 0;

        for &object_id in removed {
            let id = ProcessTrackedObjectId::new(self.process_id, object_id);
            if let Some(thread) = self.thread_objects.remove_object(id)
                && !self.thread_objects.contains_thread(thread)
                && self.destroyed.remove(&thread)
            {
                debug!("Forgot destroyed thread {thread}, its thread object was collected");
            }
            if self.locks.try_get(id).is_none() {
                continue;
            }
            if self.is_lock_referenced(id) {
                self.pending_removals.insert(id);
                deferred += 1;
            } else {
                collectable.push(object_id);
            }
        }

        let removed = self.locks.remove_range(self.process_id, collectable);
        self.raise(SemanticEvent::GarbageCollected {
            process_id: self.process_id,
            removed,
            deferred,
        });
    }

    /// Remove collected locks whose last reference has gone away
    pub(super) fn retry_pending_removals(&mut self) {
        if self.pending_removals.is_empty() {
            return;
        }

        let ready: Vec<ProcessTrackedObjectId> = self
            .pending_removals
            .iter()
            .copied()
            .filter(|id| !self.is_lock_referenced(*id))
            .collect();
        for id in ready {
            self.pending_removals.remove(&id);
            self.locks.remove(id);
            debug!("Removed collected lock {id} after its last use");
        }
    }

    fn is_lock_referenced(&self, id: ProcessTrackedObjectId) -> bool {
        self.locks.try_get(id).is_some_and(|lock| !lock.is_free())
            || self.delivery.references_lock(id)
            || self.callstacks.references_object(id.object_id)
    }
}
