//! Per-thread shadow callstacks
//!
//! Every hooked method enter pushes a [`StackFrame`] and the matching exit
//! pops it. A frame popped by an exit whose module or method differs from the
//! frame means the stream can no longer be trusted.

use crate::core::arguments::RuntimeArgumentList;
use crate::core::error::{EngineError, Result};
use crate::core::methods::MethodInterpretation;
use crate::core::types::{MethodToken, ModuleId, ProcessThreadId, TrackedObjectId};
use fxhash::FxHashMap;
use serde::Serialize;

/// A hooked method call that has been entered but not yet exited
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub module_id: ModuleId,
    pub method_token: MethodToken,
    pub interpretation: MethodInterpretation,
    pub arguments: RuntimeArgumentList,
    /// Re-entrant notification of a call already on the stack (duplicate wait)
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nested: bool,
}

impl StackFrame {
    pub fn new(
        module_id: ModuleId,
        method_token: MethodToken,
        interpretation: MethodInterpretation,
        arguments: RuntimeArgumentList,
    ) -> Self {
        StackFrame {
            module_id,
            method_token,
            interpretation,
            arguments,
            nested: false,
        }
    }

    pub fn nested(mut self) -> Self {
        self.nested = true;
        self
    }
}

/// Callstack of one thread, innermost frame last
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Callstack {
    pub thread: ProcessThreadId,
    pub frames: Vec<StackFrame>,
}

impl Callstack {
    pub fn new(thread: ProcessThreadId) -> Self {
        Callstack {
            thread,
            frames: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Tracks the callstacks of every live thread of one process
#[derive(Debug, Default)]
pub struct CallstackTracker {
    callstacks: FxHashMap<ProcessThreadId, Callstack>,
}

impl CallstackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty callstack for a freshly created thread
    ///
    /// Re-initializing a known thread keeps its existing frames.
    pub fn initialize_callstack(&mut self, thread: ProcessThreadId) {
        self.callstacks
            .entry(thread)
            .or_insert_with(|| Callstack::new(thread));
    }

    pub fn push(&mut self, thread: ProcessThreadId, frame: StackFrame) -> Result<()> {
        self.callstack_mut(thread)?.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self, thread: ProcessThreadId) -> Result<StackFrame> {
        self.callstack_mut(thread)?
            .frames
            .pop()
            .ok_or(EngineError::EmptyCallstack(thread))
    }

    pub fn peek(&self, thread: ProcessThreadId) -> Result<&StackFrame> {
        self.callstacks
            .get(&thread)
            .ok_or(EngineError::MissingCallstack(thread))?
            .frames
            .last()
            .ok_or(EngineError::EmptyCallstack(thread))
    }

    /// Innermost frame, `None` when the callstack is empty
    ///
    /// # Errors
    /// `MissingCallstack` if the thread was never initialized
    pub fn top(&self, thread: ProcessThreadId) -> Result<Option<&StackFrame>> {
        Ok(self
            .callstacks
            .get(&thread)
            .ok_or(EngineError::MissingCallstack(thread))?
            .frames
            .last())
    }

    pub fn get(&self, thread: ProcessThreadId) -> Option<&Callstack> {
        self.callstacks.get(&thread)
    }

    pub fn contains(&self, thread: ProcessThreadId) -> bool {
        self.callstacks.contains_key(&thread)
    }

    /// Deep copy of every callstack, ordered by thread
    pub fn snapshot(&self) -> Vec<Callstack> {
        let mut callstacks: Vec<Callstack> = self.callstacks.values().cloned().collect();
        callstacks.sort_by_key(|c| c.thread);
        callstacks
    }

    pub fn remove(&mut self, thread: ProcessThreadId) -> Option<Callstack> {
        self.callstacks.remove(&thread)
    }

    pub fn thread_ids(&self) -> Vec<ProcessThreadId> {
        let mut ids: Vec<ProcessThreadId> = self.callstacks.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Whether a pending frame on any thread holds the given object as an argument
    pub fn references_object(&self, object_id: TrackedObjectId) -> bool {
        self.callstacks
            .values()
            .flat_map(|c| c.frames.iter())
            .any(|f| f.arguments.references(object_id))
    }

    /// Check that `frame` belongs to the exit of `module_id:method_token`
    pub fn ensure_integrity(
        thread: ProcessThreadId,
        frame: &StackFrame,
        module_id: ModuleId,
        method_token: MethodToken,
    ) -> Result<()> {
        if frame.module_id != module_id || frame.method_token != method_token {
            return Err(EngineError::CallstackMismatch {
                thread,
                frame_module: frame.module_id,
                frame_method: frame.method_token,
                exit_module: module_id,
                exit_method: method_token,
            });
        }
        Ok(())
    }

    fn callstack_mut(&mut self, thread: ProcessThreadId) -> Result<&mut Callstack> {
        self.callstacks
            .get_mut(&thread)
            .ok_or(EngineError::MissingCallstack(thread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arguments::{ArgumentParser, PackedArgumentParser, PackedArguments};

    fn frame(method_token: MethodToken) -> StackFrame {
        StackFrame::new(
            1,
            method_token,
            MethodInterpretation::LockAcquire,
            RuntimeArgumentList::default(),
        )
    }

    #[test]
    fn test_push_peek_pop() {
        let thread = ProcessThreadId::new(1, 1);
        let mut tracker = CallstackTracker::new();
        tracker.initialize_callstack(thread);

        tracker.push(thread, frame(10)).unwrap();
        tracker.push(thread, frame(11)).unwrap();
        assert_eq!(tracker.peek(thread).unwrap().method_token, 11);
        assert_eq!(tracker.pop(thread).unwrap().method_token, 11);
        assert_eq!(tracker.pop(thread).unwrap().method_token, 10);
        assert!(tracker.top(thread).unwrap().is_none());
    }

    #[test]
    fn test_missing_and_empty_callstacks() {
        let thread = ProcessThreadId::new(1, 9);
        let mut tracker = CallstackTracker::new();

        assert!(matches!(
            tracker.push(thread, frame(1)),
            Err(EngineError::MissingCallstack(t)) if t == thread
        ));
        assert!(matches!(
            tracker.top(thread),
            Err(EngineError::MissingCallstack(_))
        ));

        tracker.initialize_callstack(thread);
        assert!(matches!(
            tracker.pop(thread),
            Err(EngineError::EmptyCallstack(_))
        ));
        assert!(matches!(
            tracker.peek(thread),
            Err(EngineError::EmptyCallstack(_))
        ));
    }

    #[test]
    fn test_integrity_check() {
        let thread = ProcessThreadId::new(1, 1);
        let f = frame(10);
        assert!(CallstackTracker::ensure_integrity(thread, &f, 1, 10).is_ok());
        assert!(matches!(
            CallstackTracker::ensure_integrity(thread, &f, 1, 12),
            Err(EngineError::CallstackMismatch {
                frame_method: 10,
                exit_method: 12,
                ..
            })
        ));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let a = ProcessThreadId::new(1, 2);
        let b = ProcessThreadId::new(1, 1);
        let mut tracker = CallstackTracker::new();
        tracker.initialize_callstack(a);
        tracker.initialize_callstack(b);
        tracker.push(a, frame(5)).unwrap();

        let snapshot = tracker.snapshot();
        tracker.pop(a).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].thread, b);
        assert_eq!(snapshot[1].depth(), 1);
        assert_eq!(tracker.thread_ids(), vec![b, a]);
    }

    #[test]
    fn test_references_object() {
        let thread = ProcessThreadId::new(1, 1);
        let mut tracker = CallstackTracker::new();
        tracker.initialize_callstack(thread);

        let (values, layout) = PackedArguments::new().object(42).build();
        let arguments = PackedArgumentParser
            .parse_arguments(1, 1, &values, &layout)
            .unwrap();
        tracker
            .push(
                thread,
                StackFrame::new(1, 1, MethodInterpretation::MonitorWait, arguments),
            )
            .unwrap();

        assert!(tracker.references_object(42));
        assert!(!tracker.references_object(43));
        tracker.remove(thread);
        assert!(!tracker.references_object(42));
    }
}
