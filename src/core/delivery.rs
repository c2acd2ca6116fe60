//! Deferred delivery of raw events
//!
//! A thread whose next event cannot be applied yet (the lock it takes is
//! still owned, the thread it joins has not been started, ...) is blocked:
//! its event and everything that arrives for it afterwards is parked until
//! the causal predecessor shows up. The [`DeliveryCoordinator`] keeps those
//! parked continuations and decides which threads become runnable again.

use crate::core::types::{ProcessThreadId, ProcessTrackedObjectId, RawEvent};
use fxhash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::collections::VecDeque;

/// Causal predecessor a blocked thread is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockReason {
    /// The lock must become acquirable (also used by a wait return that
    /// still needs its pulse)
    Lock(ProcessTrackedObjectId),
    /// The thread object must be mapped to a running thread
    ThreadStart(ProcessTrackedObjectId),
    /// The thread must be destroyed
    ThreadExit(ProcessThreadId),
}

/// Bookkeeping of blocked threads and their parked events
///
/// Registering a thread as waiting blocks it. Unblocking moves it to a FIFO
/// of runnable threads, drained by the owner through [`next_unblocked`]
/// and [`take_parked`]. A thread stays blocked from the point of view of
/// [`is_blocked`] until it has been taken off that FIFO.
///
/// [`next_unblocked`]: DeliveryCoordinator::next_unblocked
/// [`take_parked`]: DeliveryCoordinator::take_parked
/// [`is_blocked`]: DeliveryCoordinator::is_blocked
pub trait DeliveryCoordinator: Send {
    fn register_waiting_for_lock(&mut self, thread: ProcessThreadId, lock: ProcessTrackedObjectId);

    /// Make every thread blocked on `lock` runnable again
    fn unblock_waiting_for_lock_release(&mut self, lock: ProcessTrackedObjectId);

    /// Add `thread` to the wait-set of `lock`
    ///
    /// Being in a wait-set does not block delivery by itself.
    fn register_waiting_for_pulse(&mut self, thread: ProcessThreadId, lock: ProcessTrackedObjectId);

    /// Remove the oldest waiter of `lock` from its wait-set
    ///
    /// # Returns
    /// `false` if nobody was waiting
    fn signal_one_pulse_waiter(&mut self, lock: ProcessTrackedObjectId) -> bool;

    /// Empty the wait-set of `lock`
    ///
    /// # Returns
    /// `false` if nobody was waiting
    fn signal_all_pulse_waiters(&mut self, lock: ProcessTrackedObjectId) -> bool;

    fn is_waiting_for_pulse(&self, thread: ProcessThreadId, lock: ProcessTrackedObjectId) -> bool;

    fn unregister_waiting_for_pulse(
        &mut self,
        thread: ProcessThreadId,
        lock: ProcessTrackedObjectId,
    );

    fn register_waiting_for_thread_start(
        &mut self,
        thread: ProcessThreadId,
        thread_object: ProcessTrackedObjectId,
    );

    fn unblock_waiting_for_thread_start(&mut self, thread_object: ProcessTrackedObjectId);

    fn register_waiting_for_thread_exit(
        &mut self,
        thread: ProcessThreadId,
        joined: ProcessThreadId,
    );

    fn unblock_waiting_for_thread_exit(&mut self, joined: ProcessThreadId);

    /// Whether new events of `thread` must be parked
    fn is_blocked(&self, thread: ProcessThreadId) -> bool;

    /// Append an event to the parked queue of `thread`
    fn park(&mut self, thread: ProcessThreadId, event: RawEvent);

    /// Take every parked event of `thread`, oldest first
    fn take_parked(&mut self, thread: ProcessThreadId) -> VecDeque<RawEvent>;

    fn parked_count(&self, thread: ProcessThreadId) -> usize;

    /// Pop the next runnable thread
    fn next_unblocked(&mut self) -> Option<ProcessThreadId>;

    fn block_reason(&self, thread: ProcessThreadId) -> Option<BlockReason>;

    /// Wait-set of `lock`, oldest waiter first
    fn pulse_waiters(&self, lock: ProcessTrackedObjectId) -> Vec<ProcessThreadId>;

    /// Whether any blocked thread or wait-set still refers to `lock`
    fn references_lock(&self, lock: ProcessTrackedObjectId) -> bool;

    /// Drop all state of `thread`
    ///
    /// # Returns
    /// Number of parked events that were discarded
    fn forget_thread(&mut self, thread: ProcessThreadId) -> usize;

    /// Drop all state
    ///
    /// # Returns
    /// Number of parked events that were discarded
    fn clear(&mut self) -> usize;
}

/// Default in-memory [`DeliveryCoordinator`]
#[derive(Debug, Default)]
pub struct DeliveryContext {
    parked: FxHashMap<ProcessThreadId, VecDeque<RawEvent>>,
    blocked: FxHashMap<ProcessThreadId, BlockReason>,
    unblocked: VecDeque<ProcessThreadId>,
    unblocked_set: FxHashSet<ProcessThreadId>,
    lock_waiters: FxHashMap<ProcessTrackedObjectId, VecDeque<ProcessThreadId>>,
    start_waiters: FxHashMap<ProcessTrackedObjectId, VecDeque<ProcessThreadId>>,
    exit_waiters: FxHashMap<ProcessThreadId, VecDeque<ProcessThreadId>>,
    pulse_waiters: FxHashMap<ProcessTrackedObjectId, VecDeque<ProcessThreadId>>,
}

impl DeliveryContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn block(&mut self, thread: ProcessThreadId, reason: BlockReason) {
        self.blocked.insert(thread, reason);
        self.parked.entry(thread).or_default();
    }

    /// Move `thread` to the runnable FIFO if it is still blocked for `reason`
    fn wake(&mut self, thread: ProcessThreadId, reason: BlockReason) -> bool {
        if self.blocked.get(&thread) != Some(&reason) {
            return false;
        }
        self.blocked.remove(&thread);
        if self.unblocked_set.insert(thread) {
            self.unblocked.push_back(thread);
        }
        true
    }

    fn wake_signalled(&mut self, thread: ProcessThreadId, lock: ProcessTrackedObjectId) {
        if self.wake(thread, BlockReason::Lock(lock))
            && let Some(queue) = self.lock_waiters.get_mut(&lock)
        {
            queue.retain(|t| *t != thread);
        }
    }
}

fn enqueue_once<K: std::hash::Hash + Eq>(
    map: &mut FxHashMap<K, VecDeque<ProcessThreadId>>,
    key: K,
    thread: ProcessThreadId,
) {
    let queue = map.entry(key).or_default();
    if !queue.contains(&thread) {
        queue.push_back(thread);
    }
}

impl DeliveryCoordinator for DeliveryContext {
    fn register_waiting_for_lock(&mut self, thread: ProcessThreadId, lock: ProcessTrackedObjectId) {
        self.block(thread, BlockReason::Lock(lock));
        enqueue_once(&mut self.lock_waiters, lock, thread);
    }

    fn unblock_waiting_for_lock_release(&mut self, lock: ProcessTrackedObjectId) {
        if let Some(waiters) = self.lock_waiters.remove(&lock) {
            for thread in waiters {
                self.wake(thread, BlockReason::Lock(lock));
            }
        }
    }

    fn register_waiting_for_pulse(&mut self, thread: ProcessThreadId, lock: ProcessTrackedObjectId) {
        enqueue_once(&mut self.pulse_waiters, lock, thread);
    }

    fn signal_one_pulse_waiter(&mut self, lock: ProcessTrackedObjectId) -> bool {
        let Some(thread) = self
            .pulse_waiters
            .get_mut(&lock)
            .and_then(|queue| queue.pop_front())
        else {
            return false;
        };
        if self.pulse_waiters.get(&lock).is_some_and(|q| q.is_empty()) {
            self.pulse_waiters.remove(&lock);
        }
        self.wake_signalled(thread, lock);
        true
    }

    fn signal_all_pulse_waiters(&mut self, lock: ProcessTrackedObjectId) -> bool {
        let Some(waiters) = self.pulse_waiters.remove(&lock) else {
            return false;
        };
        let signalled = !waiters.is_empty();
        for thread in waiters {
            self.wake_signalled(thread, lock);
        }
        signalled
    }

    fn is_waiting_for_pulse(&self, thread: ProcessThreadId, lock: ProcessTrackedObjectId) -> bool {
        self.pulse_waiters
            .get(&lock)
            .is_some_and(|queue| queue.contains(&thread))
    }

    fn unregister_waiting_for_pulse(
        &mut self,
        thread: ProcessThreadId,
        lock: ProcessTrackedObjectId,
    ) {
        if let Some(queue) = self.pulse_waiters.get_mut(&lock) {
            queue.retain(|t| *t != thread);
            if queue.is_empty() {
                self.pulse_waiters.remove(&lock);
            }
        }
    }

    fn register_waiting_for_thread_start(
        &mut self,
        thread: ProcessThreadId,
        thread_object: ProcessTrackedObjectId,
    ) {
        self.block(thread, BlockReason::ThreadStart(thread_object));
        enqueue_once(&mut self.start_waiters, thread_object, thread);
    }

    fn unblock_waiting_for_thread_start(&mut self, thread_object: ProcessTrackedObjectId) {
        if let Some(waiters) = self.start_waiters.remove(&thread_object) {
            for thread in waiters {
                self.wake(thread, BlockReason::ThreadStart(thread_object));
            }
        }
    }

    fn register_waiting_for_thread_exit(
        &mut self,
        thread: ProcessThreadId,
        joined: ProcessThreadId,
    ) {
        self.block(thread, BlockReason::ThreadExit(joined));
        enqueue_once(&mut self.exit_waiters, joined, thread);
    }

    fn unblock_waiting_for_thread_exit(&mut self, joined: ProcessThreadId) {
        if let Some(waiters) = self.exit_waiters.remove(&joined) {
            for thread in waiters {
                self.wake(thread, BlockReason::ThreadExit(joined));
            }
        }
    }

    fn is_blocked(&self, thread: ProcessThreadId) -> bool {
        self.blocked.contains_key(&thread) || self.unblocked_set.contains(&thread)
    }

    fn park(&mut self, thread: ProcessThreadId, event: RawEvent) {
        self.parked.entry(thread).or_default().push_back(event);
    }

    fn take_parked(&mut self, thread: ProcessThreadId) -> VecDeque<RawEvent> {
        self.parked.remove(&thread).unwrap_or_default()
    }

    fn parked_count(&self, thread: ProcessThreadId) -> usize {
        self.parked.get(&thread).map_or(0, VecDeque::len)
    }

    fn next_unblocked(&mut self) -> Option<ProcessThreadId> {
        let thread = self.unblocked.pop_front()?;
        self.unblocked_set.remove(&thread);
        Some(thread)
    }

    fn block_reason(&self, thread: ProcessThreadId) -> Option<BlockReason> {
        self.blocked.get(&thread).copied()
    }

    fn pulse_waiters(&self, lock: ProcessTrackedObjectId) -> Vec<ProcessThreadId> {
        self.pulse_waiters
            .get(&lock)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    fn references_lock(&self, lock: ProcessTrackedObjectId) -> bool {
        self.pulse_waiters.get(&lock).is_some_and(|q| !q.is_empty())
            || self.lock_waiters.get(&lock).is_some_and(|q| !q.is_empty())
            || self
                .blocked
                .values()
                .any(|reason| *reason == BlockReason::Lock(lock))
    }

    fn forget_thread(&mut self, thread: ProcessThreadId) -> usize {
        self.blocked.remove(&thread);
        if self.unblocked_set.remove(&thread) {
            self.unblocked.retain(|t| *t != thread);
        }
        for queues in [
            &mut self.lock_waiters,
            &mut self.start_waiters,
            &mut self.pulse_waiters,
        ] {
            queues.retain(|_, queue| {
                queue.retain(|t| *t != thread);
                !queue.is_empty()
            });
        }
        self.exit_waiters.retain(|_, queue| {
            queue.retain(|t| *t != thread);
            !queue.is_empty()
        });
        self.parked.remove(&thread).map_or(0, |queue| queue.len())
    }

    fn clear(&mut self) -> usize {
        let dropped = self.parked.values().map(VecDeque::len).sum();
        self.parked.clear();
        self.blocked.clear();
        self.unblocked.clear();
        self.unblocked_set.clear();
        self.lock_waiters.clear();
        self.start_waiters.clear();
        self.exit_waiters.clear();
        self.pulse_waiters.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RawEventKind;

    fn thread(id: u64) -> ProcessThreadId {
        ProcessThreadId::new(1, id)
    }

    fn lock(id: u64) -> ProcessTrackedObjectId {
        ProcessTrackedObjectId::new(1, id)
    }

    fn event(tid: u64) -> RawEvent {
        RawEvent::new(1, tid, RawEventKind::Heartbeat)
    }

    #[test]
    fn test_lock_release_wakes_all_waiters_in_order() {
        let mut ctx = DeliveryContext::new();
        ctx.register_waiting_for_lock(thread(2), lock(10));
        ctx.register_waiting_for_lock(thread(3), lock(10));
        ctx.register_waiting_for_lock(thread(4), lock(11));

        assert!(ctx.is_blocked(thread(2)));
        assert_eq!(ctx.block_reason(thread(2)), Some(BlockReason::Lock(lock(10))));

        ctx.unblock_waiting_for_lock_release(lock(10));
        // Still blocked until taken off the runnable queue
        assert!(ctx.is_blocked(thread(2)));
        assert_eq!(ctx.next_unblocked(), Some(thread(2)));
        assert_eq!(ctx.next_unblocked(), Some(thread(3)));
        assert_eq!(ctx.next_unblocked(), None);
        assert!(!ctx.is_blocked(thread(2)));
        assert!(ctx.is_blocked(thread(4)));
    }

    #[test]
    fn test_parked_events_are_fifo() {
        let mut ctx = DeliveryContext::new();
        let mut first = event(2);
        first.id = 1;
        let mut second = event(2);
        second.id = 2;

        ctx.register_waiting_for_lock(thread(2), lock(10));
        ctx.park(thread(2), first);
        ctx.park(thread(2), second);
        assert_eq!(ctx.parked_count(thread(2)), 2);

        let parked: Vec<u64> = ctx.take_parked(thread(2)).into_iter().map(|e| e.id).collect();
        assert_eq!(parked, vec![1, 2]);
        assert_eq!(ctx.parked_count(thread(2)), 0);
    }

    #[test]
    fn test_pulse_signals_oldest_waiter() {
        let mut ctx = DeliveryContext::new();
        assert!(!ctx.signal_one_pulse_waiter(lock(10)));

        ctx.register_waiting_for_pulse(thread(2), lock(10));
        ctx.register_waiting_for_pulse(thread(3), lock(10));
        assert!(!ctx.is_blocked(thread(2)));
        assert_eq!(ctx.pulse_waiters(lock(10)), vec![thread(2), thread(3)]);

        assert!(ctx.signal_one_pulse_waiter(lock(10)));
        assert!(!ctx.is_waiting_for_pulse(thread(2), lock(10)));
        assert!(ctx.is_waiting_for_pulse(thread(3), lock(10)));

        assert!(ctx.signal_all_pulse_waiters(lock(10)));
        assert!(!ctx.signal_all_pulse_waiters(lock(10)));
        assert!(ctx.pulse_waiters(lock(10)).is_empty());
    }

    #[test]
    fn test_pulse_wakes_parked_waiter() {
        let mut ctx = DeliveryContext::new();
        ctx.register_waiting_for_pulse(thread(2), lock(10));
        ctx.register_waiting_for_lock(thread(2), lock(10));

        assert!(ctx.signal_one_pulse_waiter(lock(10)));
        assert_eq!(ctx.next_unblocked(), Some(thread(2)));
        assert!(!ctx.references_lock(lock(10)));
    }

    #[test]
    fn test_thread_start_and_exit_waiters() {
        let mut ctx = DeliveryContext::new();
        let object = ProcessTrackedObjectId::new(1, 500);
        ctx.register_waiting_for_thread_start(thread(1), object);
        ctx.register_waiting_for_thread_exit(thread(3), thread(2));

        ctx.unblock_waiting_for_thread_exit(thread(9));
        assert_eq!(ctx.next_unblocked(), None);

        ctx.unblock_waiting_for_thread_start(object);
        ctx.unblock_waiting_for_thread_exit(thread(2));
        assert_eq!(ctx.next_unblocked(), Some(thread(1)));
        assert_eq!(ctx.next_unblocked(), Some(thread(3)));
    }

    #[test]
    fn test_forget_thread_drops_everything() {
        let mut ctx = DeliveryContext::new();
        ctx.register_waiting_for_lock(thread(2), lock(10));
        ctx.register_waiting_for_pulse(thread(2), lock(11));
        ctx.park(thread(2), event(2));
        ctx.park(thread(2), event(2));

        assert!(ctx.references_lock(lock(10)));
        assert_eq!(ctx.forget_thread(thread(2)), 2);
        assert!(!ctx.is_blocked(thread(2)));
        assert!(!ctx.references_lock(lock(10)));
        assert!(!ctx.references_lock(lock(11)));
    }
}
