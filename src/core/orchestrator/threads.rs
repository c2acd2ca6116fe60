use super::{Dispatch, ProcessOrchestrator, object_argument, read_bool, read_u64};
use crate::core::callstack::StackFrame;
use crate::core::error::Result;
use crate::core::events::SemanticEvent;
use crate::core::methods::MethodInterpretation;
use crate::core::types::{MethodCall, ProcessThreadId, ProcessTrackedObjectId};
use log::{info, warn};

impl ProcessOrchestrator {
    pub(super) fn on_thread_create(&mut self, thread: ProcessThreadId) {
        if self.destroyed.remove(&thread) {
            // OS thread id reused; mappings to the old thread are stale
            self.thread_objects.remove_thread(thread);
        }
        self.callstacks.initialize_callstack(thread);
        self.epochs.register_thread(thread);
        self.raise(SemanticEvent::ThreadCreated { thread });
    }

    pub(super) fn on_thread_destroy(&mut self, thread: ProcessThreadId) {
        if let Some(callstack) = self.callstacks.remove(thread)
            && !callstack.is_empty()
        {
            warn!(
                "Thread {thread} destroyed with {} frames left on its callstack",
                callstack.depth()
            );
        }
        self.reentrancy.remove_thread(thread);
        self.epochs.remove_thread(thread);

        let dropped = self.delivery.forget_thread(thread);
        if dropped > 0 {
            warn!("Dropped {dropped} parked events of destroyed thread {thread}");
        }

        // Kept only while a thread object can still resolve to it
        if self.thread_objects.contains_thread(thread) {
            self.destroyed.insert(thread);
        }
        self.raise(SemanticEvent::ThreadDestroyed { thread });
        self.delivery.unblock_waiting_for_thread_exit(thread);
    }

    /// Replay the start routine of a thread, running on the started thread
    pub(super) fn on_thread_start(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
    ) -> Result<Dispatch> {
        let arguments = self.parse_arguments(call)?;
        let thread_object = object_argument(self.process_id, &arguments, call.method_token, 0)?;
        self.thread_objects.register_mapping(thread_object, thread);

        self.raise(SemanticEvent::ThreadStarted {
            thread,
            thread_object,
        });
        info!("Thread started {thread} (object {thread_object})");
        self.delivery.unblock_waiting_for_thread_start(thread_object);
        Ok(Dispatch::Consumed)
    }

    /// Replay the exit of the current-thread getter, binding its result to
    /// the calling thread
    pub(super) fn on_thread_mapping_exit(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
    ) -> Result<Dispatch> {
        let object_id = read_u64(&call.return_value, "thread mapping return value")?;
        let thread_object = ProcessTrackedObjectId::new(self.process_id, object_id);
        self.thread_objects.register_mapping(thread_object, thread);

        self.raise(SemanticEvent::ThreadMappingUpdated {
            thread,
            thread_object,
        });
        self.delivery.unblock_waiting_for_thread_start(thread_object);
        Ok(Dispatch::Consumed)
    }

    /// Replay the enter of `Join`
    ///
    /// Joining a thread object that is not yet bound to a thread is deferred
    /// until the binding shows up. Nothing is pushed in that case, so the
    /// attempt is published exactly once when the enter is re-delivered.
    pub(super) fn on_join_enter(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
    ) -> Result<Dispatch> {
        let arguments = self.parse_arguments(call)?;
        let thread_object = object_argument(self.process_id, &arguments, call.method_token, 0)?;

        let Some(joined) = self.thread_objects.try_get_thread_id(thread_object) else {
            self.delivery
                .register_waiting_for_thread_start(thread, thread_object);
            return Ok(Dispatch::Deferred);
        };

        self.callstacks.push(
            thread,
            StackFrame::new(
                call.module_id,
                call.method_token,
                MethodInterpretation::ThreadJoin,
                arguments,
            ),
        )?;
        self.raise(SemanticEvent::ThreadJoinAttempted {
            thread,
            joined,
            module_id: call.module_id,
            method_token: call.method_token,
        });
        Ok(Dispatch::Consumed)
    }

    /// Replay the exit of `Join`
    ///
    /// A successful join of a thread that is still alive waits for that
    /// thread's destruction.
    pub(super) fn on_join_exit(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
    ) -> Result<Dispatch> {
        let frame = self.peek_frame(thread, call)?;
        let thread_object = object_argument(self.process_id, &frame.arguments, call.method_token, 0)?;
        let joined = self.thread_objects.get_thread_id(thread_object)?;
        let success = read_bool(&call.return_value, true);

        if success && self.callstacks.contains(joined) {
            self.delivery.register_waiting_for_thread_exit(thread, joined);
            return Ok(Dispatch::Deferred);
        }

        self.callstacks.pop(thread)?;
        self.raise(SemanticEvent::ThreadJoinReturned {
            thread,
            joined,
            module_id: call.module_id,
            method_token: call.method_token,
            success,
        });
        Ok(Dispatch::Consumed)
    }
}
