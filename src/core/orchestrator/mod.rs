mod fields;
mod locks;
mod monitor;
mod runtime;
mod snapshot;
mod threads;

pub use snapshot::{LockSnapshot, ModuleSnapshot, RuntimeSnapshot, ThreadSnapshot, ThreadState};

use crate::core::arguments::{ArgumentParser, RuntimeArgumentList};
use crate::core::callstack::{CallstackTracker, StackFrame};
use crate::core::delivery::DeliveryCoordinator;
use crate::core::epoch::EpochTracker;
use crate::core::error::{EngineError, Result};
use crate::core::events::{EventHub, SemanticEvent};
use crate::core::methods::{MethodInterpretation, MethodRegistry};
use crate::core::registry::{LockRegistry, ThreadObjectRegistry};
use crate::core::reentrancy::ReentrancyTracker;
use crate::core::types::{
    FieldToken, InstrumentationPointId, MethodCall, MethodToken, ModuleId, ProcessId,
    ProcessThreadId, ProcessTrackedObjectId, RawEvent, RawEventKind,
};
use fxhash::{FxHashMap, FxHashSet};
use log::debug;
use std::sync::Arc;

/// Outcome of dispatching one raw event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// The event was applied
    Consumed,
    /// The event waits for a causal predecessor; the handler has already
    /// registered what it waits for with the delivery coordinator
    Deferred,
}

/// Static field access injected at one instrumentation point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldAccess {
    pub module_id: ModuleId,
    pub method_token: MethodToken,
    pub field_token: FieldToken,
}

/// Replays the event streams of one monitored process
///
/// Raw events arrive FIFO per thread with no ordering across threads. The
/// orchestrator applies each event as soon as its causal predecessors have
/// been applied and parks it otherwise:
///
/// 1. Events of a blocked thread are parked behind its blocked event
/// 2. Other events are dispatched; a deferred event becomes the head of its
///    thread's parked queue
/// 3. Threads unblocked by the dispatch have their parked events re-dispatched
///    in FIFO order until the queue is empty or the thread blocks again
///
/// Every error returned by [`process`](Self::process) means the stream of the
/// process can no longer be trusted.
pub struct ProcessOrchestrator {
    process_id: ProcessId,
    hub: Arc<EventHub>,
    parser: Arc<dyn ArgumentParser>,
    delivery: Box<dyn DeliveryCoordinator>,
    methods: MethodRegistry,
    callstacks: CallstackTracker,
    locks: LockRegistry,
    thread_objects: ThreadObjectRegistry,
    reentrancy: ReentrancyTracker,
    epochs: EpochTracker,
    modules: FxHashMap<ModuleId, String>,
    field_accesses: FxHashMap<InstrumentationPointId, FieldAccess>,
    /// Collected locks still referenced by a pending operation
    pending_removals: FxHashSet<ProcessTrackedObjectId>,
    /// Destroyed threads that a thread object is still bound to
    destroyed: FxHashSet<ProcessThreadId>,
}

impl ProcessOrchestrator {
    pub fn new(
        process_id: ProcessId,
        hub: Arc<EventHub>,
        parser: Arc<dyn ArgumentParser>,
        delivery: Box<dyn DeliveryCoordinator>,
        methods: MethodRegistry,
    ) -> Self {
        ProcessOrchestrator {
            process_id,
            hub,
            parser,
            delivery,
            methods,
            callstacks: CallstackTracker::new(),
            locks: LockRegistry::new(),
            thread_objects: ThreadObjectRegistry::new(),
            reentrancy: ReentrancyTracker::new(),
            epochs: EpochTracker::new(),
            modules: FxHashMap::default(),
            field_accesses: FxHashMap::default(),
            pending_removals: FxHashSet::default(),
            destroyed: FxHashSet::default(),
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Feed one raw event of this process
    ///
    /// # Errors
    /// Any stream integrity, identity or argument parsing error. The
    /// orchestrator must not be fed further events afterwards.
    pub fn process(&mut self, event: RawEvent) -> Result<()> {
        let thread = event.thread();
        if self.delivery.is_blocked(thread) {
            self.delivery.park(thread, event);
            return Ok(());
        }

        if self.dispatch(&event)? == Dispatch::Deferred {
            self.delivery.park(thread, event);
        }

        self.drain_unblocked()?;
        self.retry_pending_removals();
        Ok(())
    }

    /// Drop all state, including parked continuations
    ///
    /// # Returns
    /// Number of parked events that were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.delivery.clear();
        self.callstacks = CallstackTracker::new();
        self.locks.clear();
        self.thread_objects.clear();
        self.reentrancy.clear();
        self.pending_removals.clear();
        self.destroyed.clear();
        self.modules.clear();
        self.field_accesses.clear();
        dropped
    }

    fn drain_unblocked(&mut self) -> Result<()> {
        while let Some(thread) = self.delivery.next_unblocked() {
            let mut parked = self.delivery.take_parked(thread);
            while let Some(event) = parked.pop_front() {
                if self.dispatch(&event)? == Dispatch::Deferred {
                    self.delivery.park(thread, event);
                    for rest in parked.drain(..) {
                        self.delivery.park(thread, rest);
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &RawEvent) -> Result<Dispatch> {
        let thread = event.thread();
        match &event.kind {
            RawEventKind::MethodEnter(call) => self.on_method_enter(thread, call),
            RawEventKind::MethodExit(call) => self.on_method_exit(thread, call),
            RawEventKind::ThreadCreate { thread_id } => {
                self.on_thread_create(self.thread_id(*thread_id));
                Ok(Dispatch::Consumed)
            }
            RawEventKind::ThreadDestroy { thread_id } => {
                self.on_thread_destroy(self.thread_id(*thread_id));
                Ok(Dispatch::Consumed)
            }
            RawEventKind::ModuleLoad { module_id, path } => {
                self.on_module_load(*module_id, path);
                Ok(Dispatch::Consumed)
            }
            RawEventKind::MethodBound {
                module_id,
                method_token,
                interpretation,
            } => {
                self.on_method_bound(*module_id, *method_token, *interpretation);
                Ok(Dispatch::Consumed)
            }
            RawEventKind::FieldAccessInstrumented {
                instrumentation_point,
                module_id,
                method_token,
                field_token,
            } => {
                self.on_field_access_instrumented(
                    *instrumentation_point,
                    FieldAccess {
                        module_id: *module_id,
                        method_token: *method_token,
                        field_token: *field_token,
                    },
                );
                Ok(Dispatch::Consumed)
            }
            RawEventKind::GarbageCollectionStarted => {
                self.epochs.on_garbage_collection_started();
                Ok(Dispatch::Consumed)
            }
            RawEventKind::GarbageCollectionFinished => {
                self.epochs.on_garbage_collection_finished();
                Ok(Dispatch::Consumed)
            }
            RawEventKind::GarbageCollectedTrackedObjects { removed } => {
                self.on_garbage_collected(removed);
                Ok(Dispatch::Consumed)
            }
            RawEventKind::RuntimeSuspendStarted => {
                self.epochs.on_suspend_started();
                Ok(Dispatch::Consumed)
            }
            RawEventKind::RuntimeSuspendFinished => {
                self.on_suspend_finished();
                Ok(Dispatch::Consumed)
            }
            RawEventKind::RuntimeResumeStarted => {
                self.epochs.on_resume_started();
                Ok(Dispatch::Consumed)
            }
            RawEventKind::RuntimeResumeFinished => {
                self.on_resume_finished();
                Ok(Dispatch::Consumed)
            }
            RawEventKind::RuntimeThreadSuspended { thread_id } => {
                self.epochs.on_thread_suspended(self.thread_id(*thread_id));
                Ok(Dispatch::Consumed)
            }
            RawEventKind::RuntimeThreadResumed { thread_id } => {
                self.epochs.on_thread_resumed(self.thread_id(*thread_id));
                Ok(Dispatch::Consumed)
            }
            // Process lifecycle is handled by the engine
            RawEventKind::Heartbeat | RawEventKind::ProfilerDestroy => Ok(Dispatch::Consumed),
        }
    }

    fn on_method_enter(&mut self, thread: ProcessThreadId, call: &MethodCall) -> Result<Dispatch> {
        let Some(interpretation) = self.methods.resolve(call.module_id, call.method_token) else {
            debug!(
                "Ignoring enter of unbound method {:#x}:{:#x} on thread {thread}",
                call.module_id, call.method_token
            );
            return Ok(Dispatch::Consumed);
        };

        match interpretation {
            MethodInterpretation::LockAcquire | MethodInterpretation::LockTryAcquire => {
                self.on_lock_acquire_enter(thread, call, interpretation)
            }
            MethodInterpretation::LockRelease
            | MethodInterpretation::MonitorPulseOne
            | MethodInterpretation::MonitorPulseAll => {
                self.push_arguments(thread, call, interpretation)?;
                Ok(Dispatch::Consumed)
            }
            MethodInterpretation::MonitorWait => self.on_wait_enter(thread, call),
            MethodInterpretation::ThreadStart => self.on_thread_start(thread, call),
            MethodInterpretation::ThreadJoin => self.on_join_enter(thread, call),
            MethodInterpretation::StaticFieldRead => self.on_static_field(thread, call, false),
            MethodInterpretation::StaticFieldWrite => self.on_static_field(thread, call, true),
            MethodInterpretation::ThreadMapping => Ok(Dispatch::Consumed),
        }
    }

    fn on_method_exit(&mut self, thread: ProcessThreadId, call: &MethodCall) -> Result<Dispatch> {
        let Some(interpretation) = self.methods.resolve(call.module_id, call.method_token) else {
            debug!(
                "Ignoring exit of unbound method {:#x}:{:#x} on thread {thread}",
                call.module_id, call.method_token
            );
            return Ok(Dispatch::Consumed);
        };

        match interpretation {
            MethodInterpretation::LockAcquire | MethodInterpretation::LockTryAcquire => {
                self.on_lock_acquire_exit(thread, call)
            }
            MethodInterpretation::LockRelease => self.on_lock_release_exit(thread, call),
            MethodInterpretation::MonitorPulseOne => self.on_pulse_exit(thread, call, false),
            MethodInterpretation::MonitorPulseAll => self.on_pulse_exit(thread, call, true),
            MethodInterpretation::MonitorWait => self.on_wait_exit(thread, call),
            MethodInterpretation::ThreadMapping => self.on_thread_mapping_exit(thread, call),
            MethodInterpretation::ThreadJoin => self.on_join_exit(thread, call),
            MethodInterpretation::ThreadStart
            | MethodInterpretation::StaticFieldRead
            | MethodInterpretation::StaticFieldWrite => Ok(Dispatch::Consumed),
        }
    }

    fn raise(&self, event: SemanticEvent) {
        self.hub.publish(event);
    }

    fn thread_id(&self, thread_id: u64) -> ProcessThreadId {
        ProcessThreadId::new(self.process_id, thread_id)
    }

    fn parse_arguments(&self, call: &MethodCall) -> Result<RuntimeArgumentList> {
        self.parser
            .parse_arguments(
                call.module_id,
                call.method_token,
                &call.argument_values,
                &call.argument_layout,
            )
            .map_err(|source| EngineError::ArgumentParse {
                module_id: call.module_id,
                method_token: call.method_token,
                source,
            })
    }

    /// Parse the arguments of `call` and push them as a new frame
    fn push_arguments(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
        interpretation: MethodInterpretation,
    ) -> Result<RuntimeArgumentList> {
        let arguments = self.parse_arguments(call)?;
        self.callstacks.push(
            thread,
            StackFrame::new(
                call.module_id,
                call.method_token,
                interpretation,
                arguments.clone(),
            ),
        )?;
        Ok(arguments)
    }

    /// Pop the innermost frame of `thread` and check it belongs to `call`
    fn pop_frame(&mut self, thread: ProcessThreadId, call: &MethodCall) -> Result<StackFrame> {
        let frame = self.callstacks.pop(thread)?;
        CallstackTracker::ensure_integrity(thread, &frame, call.module_id, call.method_token)?;
        Ok(frame)
    }

    /// Peek the innermost frame of `thread` and check it belongs to `call`
    fn peek_frame(&self, thread: ProcessThreadId, call: &MethodCall) -> Result<&StackFrame> {
        let frame = self.callstacks.peek(thread)?;
        CallstackTracker::ensure_integrity(thread, frame, call.module_id, call.method_token)?;
        Ok(frame)
    }
}

/// Tracked object passed as argument `position`, scoped to `process_id`
fn object_argument(
    process_id: ProcessId,
    arguments: &RuntimeArgumentList,
    method_token: MethodToken,
    position: usize,
) -> Result<ProcessTrackedObjectId> {
    arguments
        .object(position)
        .map(|object_id| ProcessTrackedObjectId::new(process_id, object_id))
        .ok_or(EngineError::UnexpectedArgument {
            method_token,
            position,
        })
}

/// Little-endian `u64` at the start of a raw payload
fn read_u64(bytes: &[u8], what: &'static str) -> Result<u64> {
    bytes
        .get(..8)
        .and_then(|head| head.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or(EngineError::MalformedPayload {
            what,
            expected: 8,
            found: bytes.len(),
        })
}

/// Boolean return value, `default` when none was captured
fn read_bool(bytes: &[u8], default: bool) -> bool {
    bytes.first().map_or(default, |b| *b != 0)
}
