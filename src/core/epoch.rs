use crate::core::types::ProcessThreadId;
use fxhash::FxHashMap;
use log::warn;
use serde::Serialize;

/// Execution-engine phase of a monitored runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuntimePhase {
    Running,
    Suspending,
    Suspended,
    GarbageCollecting,
    Resuming,
}

/// Tracks runtime suspensions of one process
///
/// The epoch advances whenever a suspension or a resumption completes, so two
/// events from different epochs are separated by a stop-the-world boundary.
/// Threads enter the current epoch when the runtime reports them suspended or
/// resumed.
#[derive(Debug)]
pub struct EpochTracker {
    epoch: u64,
    phase: RuntimePhase,
    thread_epochs: FxHashMap<ProcessThreadId, u64>,
}

impl Default for EpochTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochTracker {
    pub fn new() -> Self {
        EpochTracker {
            epoch: 0,
            phase: RuntimePhase::Running,
            thread_epochs: FxHashMap::default(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn phase(&self) -> RuntimePhase {
        self.phase
    }

    pub fn thread_epoch(&self, thread: ProcessThreadId) -> Option<u64> {
        self.thread_epochs.get(&thread).copied()
    }

    pub fn register_thread(&mut self, thread: ProcessThreadId) {
        self.thread_epochs.insert(thread, self.epoch);
    }

    pub fn remove_thread(&mut self, thread: ProcessThreadId) {
        self.thread_epochs.remove(&thread);
    }

    pub fn on_suspend_started(&mut self) {
        self.transition(RuntimePhase::Running, RuntimePhase::Suspending);
    }

    /// # Returns
    /// The new epoch
    pub fn on_suspend_finished(&mut self) -> u64 {
        self.transition(RuntimePhase::Suspending, RuntimePhase::Suspended);
        self.epoch += 1;
        self.epoch
    }

    pub fn on_garbage_collection_started(&mut self) {
        self.transition(RuntimePhase::Suspended, RuntimePhase::GarbageCollecting);
    }

    pub fn on_garbage_collection_finished(&mut self) {
        self.transition(RuntimePhase::GarbageCollecting, RuntimePhase::Suspended);
    }

    pub fn on_resume_started(&mut self) {
        self.transition(RuntimePhase::Suspended, RuntimePhase::Resuming);
    }

    /// # Returns
    /// The new epoch
    pub fn on_resume_finished(&mut self) -> u64 {
        self.transition(RuntimePhase::Resuming, RuntimePhase::Running);
        self.epoch += 1;
        self.epoch
    }

    pub fn on_thread_suspended(&mut self, thread: ProcessThreadId) {
        self.register_thread(thread);
    }

    pub fn on_thread_resumed(&mut self, thread: ProcessThreadId) {
        self.register_thread(thread);
    }

    fn transition(&mut self, expected: RuntimePhase, next: RuntimePhase) {
        if self.phase != expected {
            warn!(
                "Unexpected runtime transition {:?} -> {:?} (expected from {:?})",
                self.phase, next, expected
            );
        }
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle_advances_epoch_twice() {
        let mut tracker = EpochTracker::new();
        let thread = ProcessThreadId::new(1, 1);
        tracker.register_thread(thread);
        assert_eq!(tracker.thread_epoch(thread), Some(0));

        tracker.on_suspend_started();
        assert_eq!(tracker.phase(), RuntimePhase::Suspending);
        assert_eq!(tracker.on_suspend_finished(), 1);
        tracker.on_thread_suspended(thread);
        assert_eq!(tracker.thread_epoch(thread), Some(1));

        tracker.on_garbage_collection_started();
        assert_eq!(tracker.phase(), RuntimePhase::GarbageCollecting);
        tracker.on_garbage_collection_finished();
        assert_eq!(tracker.phase(), RuntimePhase::Suspended);

        tracker.on_resume_started();
        assert_eq!(tracker.on_resume_finished(), 2);
        assert_eq!(tracker.phase(), RuntimePhase::Running);
        tracker.on_thread_resumed(thread);
        assert_eq!(tracker.thread_epoch(thread), Some(2));
    }

    #[test]
    fn test_unexpected_transition_still_applies() {
        let mut tracker = EpochTracker::new();
        tracker.on_resume_started();
        assert_eq!(tracker.phase(), RuntimePhase::Resuming);
        assert_eq!(tracker.on_resume_finished(), 1);
    }
}
