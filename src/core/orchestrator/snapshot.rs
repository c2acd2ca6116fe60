use super::ProcessOrchestrator;
use crate::core::callstack::Callstack;
use crate::core::delivery::BlockReason;
use crate::core::epoch::RuntimePhase;
use crate::core::types::{ModuleId, ProcessId, ProcessThreadId, ProcessTrackedObjectId};
use serde::Serialize;

/// Replay state of one thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThreadState {
    Running,
    BlockedOnLock,
    BlockedOnPulse,
    BlockedOnThreadStart,
    BlockedOnThreadExit,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadSnapshot {
    pub id: ProcessThreadId,
    pub state: ThreadState,
    /// Epoch the thread was last seen in
    pub epoch: Option<u64>,
    pub parked_events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    pub id: ProcessTrackedObjectId,
    pub owner: Option<ProcessThreadId>,
    pub reentrancy: u32,
    /// Wait-set, oldest waiter first
    pub pulse_waiters: Vec<ProcessThreadId>,
    /// Collected by the runtime but still referenced
    pub pending_removal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSnapshot {
    pub id: ModuleId,
    pub path: String,
}

/// Point-in-time view of a replayed process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeSnapshot {
    pub process_id: ProcessId,
    pub epoch: u64,
    pub phase: RuntimePhase,
    pub callstacks: Vec<Callstack>,
    pub threads: Vec<ThreadSnapshot>,
    pub locks: Vec<LockSnapshot>,
    /// Loaded modules, by id
    pub modules: Vec<ModuleSnapshot>,
}

impl RuntimeSnapshot {
    pub fn thread(&self, id: ProcessThreadId) -> Option<&ThreadSnapshot> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn lock(&self, id: ProcessTrackedObjectId) -> Option<&LockSnapshot> {
        self.locks.iter().find(|l| l.id == id)
    }

    pub fn callstack(&self, id: ProcessThreadId) -> Option<&Callstack> {
        self.callstacks.iter().find(|c| c.thread == id)
    }

    /// Path a module was loaded from
    pub fn module_path(&self, id: ModuleId) -> Option<&str> {
        self.modules
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.path.as_str())
    }
}

impl ProcessOrchestrator {
    /// Capture callstacks, thread states and lock states
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let mut thread_ids = self.callstacks.thread_ids();
        thread_ids.extend(self.destroyed.iter().copied());
        thread_ids.sort();
        thread_ids.dedup();

        let threads = thread_ids
            .into_iter()
            .map(|id| ThreadSnapshot {
                id,
                state: self.thread_state(id),
                epoch: self.epochs.thread_epoch(id),
                parked_events: self.delivery.parked_count(id),
            })
            .collect();

        let mut locks: Vec<LockSnapshot> = self
            .locks
            .locks()
            .map(|lock| LockSnapshot {
                id: lock.id,
                owner: lock.owner(),
                reentrancy: lock.reentrancy(),
                pulse_waiters: self.delivery.pulse_waiters(lock.id),
                pending_removal: self.pending_removals.contains(&lock.id),
            })
            .collect();
        locks.sort_by_key(|l| l.id);

        let mut modules: Vec<ModuleSnapshot> = self
            .modules
            .iter()
            .map(|(id, path)| ModuleSnapshot {
                id: *id,
                path: path.clone(),
            })
            .collect();
        modules.sort_by_key(|m| m.id);

        RuntimeSnapshot {
            process_id: self.process_id,
            epoch: self.epochs.epoch(),
            phase: self.epochs.phase(),
            callstacks: self.callstacks.snapshot(),
            threads,
            locks,
            modules,
        }
    }

    fn thread_state(&self, thread: ProcessThreadId) -> ThreadState {
        if self.destroyed.contains(&thread) && !self.callstacks.contains(thread) {
            return ThreadState::Destroyed;
        }
        match self.delivery.block_reason(thread) {
            None => ThreadState::Running,
            Some(BlockReason::Lock(lock)) if self.delivery.is_waiting_for_pulse(thread, lock) => {
                ThreadState::BlockedOnPulse
            }
            Some(BlockReason::Lock(_)) => ThreadState::BlockedOnLock,
            Some(BlockReason::ThreadStart(_)) => ThreadState::BlockedOnThreadStart,
            Some(BlockReason::ThreadExit(_)) => ThreadState::BlockedOnThreadExit,
        }
    }
}
