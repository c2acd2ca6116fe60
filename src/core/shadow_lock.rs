use crate::core::error::{EngineError, Result};
use crate::core::types::{ProcessId, ProcessThreadId, ProcessTrackedObjectId};
use serde::Serialize;

/// Replayed ownership state of one monitor lock
///
/// `owner` is `None` exactly when `reentrancy` is zero. All operations check
/// that the requesting thread lives in the lock's process and that ownership
/// rules hold, failing with a typed error otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadowLock {
    pub id: ProcessTrackedObjectId,
    owner: Option<ProcessThreadId>,
    reentrancy: u32,
}

impl ShadowLock {
    pub fn new(id: ProcessTrackedObjectId) -> Self {
        ShadowLock {
            id,
            owner: None,
            reentrancy: 0,
        }
    }

    pub fn owner(&self) -> Option<ProcessThreadId> {
        self.owner
    }

    pub fn reentrancy(&self) -> u32 {
        self.reentrancy
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    /// Whether `thread` could take the lock right now
    pub fn can_acquire(&self, thread: ProcessThreadId) -> bool {
        thread.process_id == self.id.process_id && self.owner.is_none_or(|owner| owner == thread)
    }

    pub fn acquire(&mut self, thread: ProcessThreadId) -> Result<()> {
        self.acquire_multiple(thread, 1)
    }

    /// Take the lock `count` times at once, restoring a saved reentrancy depth
    pub fn acquire_multiple(&mut self, thread: ProcessThreadId, count: u32) -> Result<()> {
        if count == 0 {
            return Err(EngineError::InvalidReentrancyCount {
                lock: self.id,
                count,
            });
        }
        self.ensure_can_acquire(thread)?;
        self.owner = Some(thread);
        self.reentrancy += count;
        Ok(())
    }

    /// Drop one level of ownership
    ///
    /// # Returns
    /// `true` if the lock became free
    pub fn release(&mut self, thread: ProcessThreadId) -> Result<bool> {
        self.ensure_can_release(thread)?;
        self.reentrancy -= 1;
        if self.reentrancy == 0 {
            self.owner = None;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drop every level of ownership held by `thread`
    ///
    /// # Returns
    /// The reentrancy depth held before the release
    pub fn release_all(&mut self, thread: ProcessThreadId) -> Result<u32> {
        self.ensure_can_release(thread)?;
        let previous = self.reentrancy;
        self.reentrancy = 0;
        self.owner = None;
        Ok(previous)
    }

    fn ensure_can_acquire(&self, thread: ProcessThreadId) -> Result<()> {
        self.ensure_correct_process(thread.process_id)?;
        match self.owner {
            Some(owner) if owner != thread => Err(EngineError::LockAlreadyAcquired {
                lock: self.id,
                thread,
                owner,
            }),
            _ => Ok(()),
        }
    }

    fn ensure_can_release(&self, thread: ProcessThreadId) -> Result<()> {
        self.ensure_correct_process(thread.process_id)?;
        match self.owner {
            None => Err(EngineError::LockNotTaken {
                lock: self.id,
                thread,
            }),
            Some(owner) if owner != thread => Err(EngineError::LockReleasedByAnotherThread {
                lock: self.id,
                thread,
                owner,
            }),
            Some(_) => Ok(()),
        }
    }

    fn ensure_correct_process(&self, process_id: ProcessId) -> Result<()> {
        if process_id != self.id.process_id {
            return Err(EngineError::WrongProcess {
                lock: self.id,
                process_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lock() -> ShadowLock {
        ShadowLock::new(ProcessTrackedObjectId::new(1, 0x100))
    }

    #[test]
    fn test_reentrant_acquire_and_release() {
        let t1 = ProcessThreadId::new(1, 1);
        let mut lock = lock();

        lock.acquire(t1).unwrap();
        lock.acquire(t1).unwrap();
        assert_eq!(lock.reentrancy(), 2);
        assert_eq!(lock.owner(), Some(t1));

        assert!(!lock.release(t1).unwrap());
        assert!(lock.release(t1).unwrap());
        assert!(lock.is_free());
        assert_eq!(lock.reentrancy(), 0);
    }

    #[test]
    fn test_contended_acquire_fails() {
        let t1 = ProcessThreadId::new(1, 1);
        let t2 = ProcessThreadId::new(1, 2);
        let mut lock = lock();

        lock.acquire(t1).unwrap();
        assert!(!lock.can_acquire(t2));
        assert!(matches!(
            lock.acquire(t2),
            Err(EngineError::LockAlreadyAcquired { owner, .. }) if owner == t1
        ));
        assert!(matches!(
            lock.release(t2),
            Err(EngineError::LockReleasedByAnotherThread { .. })
        ));
    }

    #[test]
    fn test_release_of_free_lock_fails() {
        let mut lock = lock();
        assert!(matches!(
            lock.release(ProcessThreadId::new(1, 1)),
            Err(EngineError::LockNotTaken { .. })
        ));
        assert!(matches!(
            lock.release_all(ProcessThreadId::new(1, 1)),
            Err(EngineError::LockNotTaken { .. })
        ));
    }

    #[test]
    fn test_wrong_process_is_rejected() {
        let mut lock = lock();
        let foreign = ProcessThreadId::new(2, 1);
        assert!(!lock.can_acquire(foreign));
        assert!(matches!(
            lock.acquire(foreign),
            Err(EngineError::WrongProcess { process_id: 2, .. })
        ));
    }

    #[test]
    fn test_release_all_then_restore() {
        let t1 = ProcessThreadId::new(1, 1);
        let mut lock = lock();
        lock.acquire(t1).unwrap();
        lock.acquire(t1).unwrap();
        lock.acquire(t1).unwrap();

        let depth = lock.release_all(t1).unwrap();
        assert_eq!(depth, 3);
        assert!(lock.is_free());

        lock.acquire_multiple(t1, depth).unwrap();
        assert_eq!(lock.reentrancy(), 3);
        assert!(matches!(
            lock.acquire_multiple(t1, 0),
            Err(EngineError::InvalidReentrancyCount { count: 0, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_reentrancy_round_trip(depth in 1u32..64) {
            let t1 = ProcessThreadId::new(1, 1);
            let mut lock = lock();
            for _ in 0..depth {
                lock.acquire(t1).unwrap();
            }
            for remaining in (0..depth).rev() {
                let became_free = lock.release(t1).unwrap();
                prop_assert_eq!(became_free, remaining == 0);
                prop_assert_eq!(lock.reentrancy(), remaining);
            }
            prop_assert!(lock.is_free());
        }

        #[test]
        fn prop_owner_iff_reentrancy(ops in proptest::collection::vec((0u64..3, any::<bool>()), 0..128)) {
            let mut lock = lock();
            for (thread, acquire) in ops {
                let thread = ProcessThreadId::new(1, thread);
                // Failed operations must leave the lock untouched
                let before = lock.clone();
                let result = if acquire {
                    lock.acquire(thread).map(|_| ())
                } else {
                    lock.release(thread).map(|_| ())
                };
                if result.is_err() {
                    prop_assert_eq!(&lock, &before);
                }
                prop_assert_eq!(lock.owner().is_none(), lock.reentrancy() == 0);
            }
        }
    }
}
