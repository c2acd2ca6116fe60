use super::{Dispatch, ProcessOrchestrator, object_argument, read_bool};
use crate::core::callstack::StackFrame;
use crate::core::error::Result;
use crate::core::events::SemanticEvent;
use crate::core::methods::MethodInterpretation;
use crate::core::types::{MethodCall, ProcessThreadId, ProcessTrackedObjectId};
use log::warn;

impl ProcessOrchestrator {
    /// Replay the exit of `Pulse` / `PulseAll`
    pub(super) fn on_pulse_exit(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
        all: bool,
    ) -> Result<Dispatch> {
        let frame = self.pop_frame(thread, call)?;
        let lock = object_argument(self.process_id, &frame.arguments, call.method_token, 0)?;
        self.locks.get(lock)?;

        if all {
            if !self.delivery.signal_all_pulse_waiters(lock) {
                warn!("No threads were waiting on lock {lock} for pulse all");
            }
            self.raise(SemanticEvent::ObjectPulsedAll {
                thread,
                module_id: call.module_id,
                method_token: call.method_token,
                lock,
            });
        } else {
            if !self.delivery.signal_one_pulse_waiter(lock) {
                warn!("No threads were waiting on lock {lock} for pulse one");
            }
            self.raise(SemanticEvent::ObjectPulsedOne {
                thread,
                module_id: call.module_id,
                method_token: call.method_token,
                lock,
            });
        }
        Ok(Dispatch::Consumed)
    }

    /// Replay the enter of `Wait`
    ///
    /// The thread gives up every level of the lock and joins its wait-set.
    /// An enter arriving while the innermost frame is already a wait is the
    /// runtime forwarding to another `Wait` overload; it only gets a nested
    /// frame so its exit can be matched.
    pub(super) fn on_wait_enter(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
    ) -> Result<Dispatch> {
        let arguments = self.parse_arguments(call)?;
        let frame = StackFrame::new(
            call.module_id,
            call.method_token,
            MethodInterpretation::MonitorWait,
            arguments,
        );

        let duplicate = self
            .callstacks
            .top(thread)?
            .is_some_and(|top| top.interpretation == MethodInterpretation::MonitorWait);
        if duplicate {
            self.callstacks.push(thread, frame.nested())?;
            return Ok(Dispatch::Consumed);
        }

        let lock = object_argument(self.process_id, &frame.arguments, call.method_token, 0)?;
        let depth = self.locks.get_or_add(lock).release_all(thread)?;
        self.reentrancy.push_reentrancy_count(thread, depth);
        self.callstacks.push(thread, frame)?;
        self.delivery.register_waiting_for_pulse(thread, lock);

        self.raise(SemanticEvent::ObjectWaitAttempted {
            thread,
            module_id: call.module_id,
            method_token: call.method_token,
            lock,
        });
        self.delivery.unblock_waiting_for_lock_release(lock);
        Ok(Dispatch::Consumed)
    }

    /// Replay the exit of `Wait`
    ///
    /// A successful wait returns once the thread has been pulsed and can take
    /// the lock back. A timed out wait only needs the lock and leaves the
    /// wait-set on its own.
    pub(super) fn on_wait_exit(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
    ) -> Result<Dispatch> {
        let frame = self.peek_frame(thread, call)?;
        if frame.nested {
            self.callstacks.pop(thread)?;
            return Ok(Dispatch::Consumed);
        }
        let lock = object_argument(self.process_id, &frame.arguments, call.method_token, 0)?;
        let success = read_bool(&call.return_value, true);

        let can_reacquire = self.locks.get(lock)?.can_acquire(thread);
        let waiting_for_pulse = self.delivery.is_waiting_for_pulse(thread, lock);

        if !can_reacquire || (success && waiting_for_pulse) {
            self.delivery.register_waiting_for_lock(thread, lock);
            return Ok(Dispatch::Deferred);
        }
        if !success {
            self.delivery.unregister_waiting_for_pulse(thread, lock);
        }

        self.complete_wait(thread, call, lock, success)
    }

    fn complete_wait(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
        lock: ProcessTrackedObjectId,
        success: bool,
    ) -> Result<Dispatch> {
        let depth = self.reentrancy.pop_reentrancy_count(thread)?;
        self.locks.get_mut(lock)?.acquire_multiple(thread, depth)?;
        self.callstacks.pop(thread)?;

        self.raise(SemanticEvent::ObjectWaitReturned {
            thread,
            module_id: call.module_id,
            method_token: call.method_token,
            lock,
            success,
        });
        Ok(Dispatch::Consumed)
    }
}
