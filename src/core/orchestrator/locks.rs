use super::{Dispatch, ProcessOrchestrator, object_argument, read_bool};
use crate::core::error::{EngineError, Result};
use crate::core::events::SemanticEvent;
use crate::core::methods::MethodInterpretation;
use crate::core::types::{MethodCall, ProcessThreadId};

impl ProcessOrchestrator {
    /// Replay the enter of a lock acquire
    ///
    /// Pushes the call on the callstack and publishes the attempt. Whether
    /// the lock is actually taken is only known on exit.
    pub(super) fn on_lock_acquire_enter(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
        interpretation: MethodInterpretation,
    ) -> Result<Dispatch> {
        let arguments = self.push_arguments(thread, call, interpretation)?;
        let lock = object_argument(self.process_id, &arguments, call.method_token, 0)?;
        self.locks.get_or_add(lock);

        self.raise(SemanticEvent::LockAcquireAttempted {
            thread,
            module_id: call.module_id,
            method_token: call.method_token,
            lock,
        });
        Ok(Dispatch::Consumed)
    }

    /// Replay the exit of a lock acquire
    ///
    /// A taken lock is applied only when the shadow lock is free or already
    /// owned by `thread`; otherwise the exit is deferred until the owner
    /// releases it.
    pub(super) fn on_lock_acquire_exit(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
    ) -> Result<Dispatch> {
        let frame = self.peek_frame(thread, call)?;
        let lock = object_argument(self.process_id, &frame.arguments, call.method_token, 0)?;

        if !self.lock_taken(call)? {
            self.callstacks.pop(thread)?;
            self.raise(SemanticEvent::LockAcquireReturned {
                thread,
                module_id: call.module_id,
                method_token: call.method_token,
                lock,
                success: false,
            });
            return Ok(Dispatch::Consumed);
        }

        let shadow = self.locks.get_or_add(lock);
        if !shadow.can_acquire(thread) {
            self.delivery.register_waiting_for_lock(thread, lock);
            return Ok(Dispatch::Deferred);
        }
        shadow.acquire(thread)?;

        self.callstacks.pop(thread)?;
        self.raise(SemanticEvent::LockAcquireReturned {
            thread,
            module_id: call.module_id,
            method_token: call.method_token,
            lock,
            success: true,
        });
        Ok(Dispatch::Consumed)
    }

    /// Replay the exit of a lock release
    ///
    /// Releases with an explicit `lockTaken == false` argument are ignored.
    pub(super) fn on_lock_release_exit(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
    ) -> Result<Dispatch> {
        let frame = self.pop_frame(thread, call)?;
        let lock = object_argument(self.process_id, &frame.arguments, call.method_token, 0)?;
        let taken = match frame.arguments.get(1) {
            None => true,
            Some(_) => frame
                .arguments
                .flag(1)
                .ok_or(EngineError::UnexpectedArgument {
                    method_token: call.method_token,
                    position: 1,
                })?,
        };
        if !taken {
            return Ok(Dispatch::Consumed);
        }

        let became_free = self.locks.get_mut(lock)?.release(thread)?;
        self.raise(SemanticEvent::LockReleased {
            thread,
            module_id: call.module_id,
            method_token: call.method_token,
            lock,
        });
        if became_free {
            self.delivery.unblock_waiting_for_lock_release(lock);
        }
        Ok(Dispatch::Consumed)
    }

    /// Whether the acquire reported by an exit took the lock
    ///
    /// Taken from the return value (`TryEnter`), else from the by-ref
    /// `lockTaken` argument, else the acquire is unconditional.
    fn lock_taken(&self, call: &MethodCall) -> Result<bool> {
        if !call.return_value.is_empty() {
            return Ok(read_bool(&call.return_value, true));
        }
        if !call.argument_values.is_empty() {
            let by_ref = self.parse_arguments(call)?;
            return by_ref.flag(0).ok_or(EngineError::UnexpectedArgument {
                method_token: call.method_token,
                position: 0,
            });
        }
        Ok(true)
    }
}
