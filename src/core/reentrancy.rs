use crate::core::error::{EngineError, Result};
use crate::core::types::ProcessThreadId;
use fxhash::FxHashMap;

/// Saved lock depths of threads inside `Monitor.Wait`
///
/// A wait releases every level of the lock and must restore exactly that many
/// on return. Nested waits on different locks stack per thread.
#[derive(Debug, Default)]
pub struct ReentrancyTracker {
    counts: FxHashMap<ProcessThreadId, Vec<u32>>,
}

impl ReentrancyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reentrancy_count(&mut self, thread: ProcessThreadId, count: u32) {
        self.counts.entry(thread).or_default().push(count);
    }

    pub fn peek_reentrancy_count(&self, thread: ProcessThreadId) -> Result<u32> {
        self.counts
            .get(&thread)
            .and_then(|stack| stack.last().copied())
            .ok_or(EngineError::NoReentrancyRecorded(thread))
    }

    pub fn pop_reentrancy_count(&mut self, thread: ProcessThreadId) -> Result<u32> {
        let stack = self
            .counts
            .get_mut(&thread)
            .ok_or(EngineError::NoReentrancyRecorded(thread))?;
        let count = stack.pop().ok_or(EngineError::NoReentrancyRecorded(thread))?;
        if stack.is_empty() {
            self.counts.remove(&thread);
        }
        Ok(count)
    }

    pub fn remove_thread(&mut self, thread: ProcessThreadId) {
        self.counts.remove(&thread);
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
