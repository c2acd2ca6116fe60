use crate::core::methods::MethodInterpretation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process identifier type
///
/// Identifies one monitored process. This is the natural sharding key of the
/// engine: no state is shared between two processes.
pub type ProcessId = u32;

/// Thread identifier type
///
/// The runtime's identifier of an OS thread inside one process.
pub type ThreadId = u64;

/// Tracked object identifier type
///
/// A GC-stable identity assigned by the runtime's object tracking mechanism.
/// It survives heap compaction and is never a raw address.
pub type TrackedObjectId = u64;

/// Module identifier type
pub type ModuleId = u64;

/// Method definition token type
pub type MethodToken = u32;

/// Field definition token type
pub type FieldToken = u32;

/// Identifier of an injected instrumentation point (call site)
pub type InstrumentationPointId = u64;

/// One OS thread inside one monitored process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessThreadId {
    pub process_id: ProcessId,
    pub thread_id: ThreadId,
}

impl ProcessThreadId {
    pub fn new(process_id: ProcessId, thread_id: ThreadId) -> Self {
        ProcessThreadId {
            process_id,
            thread_id,
        }
    }
}

impl fmt::Display for ProcessThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.process_id, self.thread_id)
    }
}

/// A heap object's tracked identity, scoped to a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessTrackedObjectId {
    pub process_id: ProcessId,
    pub object_id: TrackedObjectId,
}

impl ProcessTrackedObjectId {
    pub fn new(process_id: ProcessId, object_id: TrackedObjectId) -> Self {
        ProcessTrackedObjectId {
            process_id,
            object_id,
        }
    }
}

impl fmt::Display for ProcessTrackedObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:#{}", self.process_id, self.object_id)
    }
}

/// Payload of a hooked method enter or exit notification
///
/// `argument_values` and `argument_layout` are the raw captured bytes; on an
/// exit they hold by-ref arguments. `return_value` is only filled on exits of
/// methods with a captured return value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCall {
    pub module_id: ModuleId,
    pub method_token: MethodToken,
    #[serde(default)]
    pub argument_values: Vec<u8>,
    #[serde(default)]
    pub argument_layout: Vec<u8>,
    #[serde(default)]
    pub return_value: Vec<u8>,
}

impl MethodCall {
    pub fn new(module_id: ModuleId, method_token: MethodToken) -> Self {
        MethodCall {
            module_id,
            method_token,
            ..Default::default()
        }
    }
}

/// Kind of a raw notification delivered by the instrumentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RawEventKind {
    /// A hooked method was entered
    MethodEnter(MethodCall),
    /// A hooked method returned
    MethodExit(MethodCall),
    /// A runtime thread was created (reported by any thread)
    ThreadCreate { thread_id: ThreadId },
    /// A runtime thread was destroyed (reported by any thread)
    ThreadDestroy { thread_id: ThreadId },
    /// A module was loaded
    ModuleLoad { module_id: ModuleId, path: String },
    /// The instrumentation layer bound a method to an interpretation
    MethodBound {
        module_id: ModuleId,
        method_token: MethodToken,
        interpretation: MethodInterpretation,
    },
    /// A static field access was instrumented at a call site
    FieldAccessInstrumented {
        instrumentation_point: InstrumentationPointId,
        module_id: ModuleId,
        method_token: MethodToken,
        field_token: FieldToken,
    },
    GarbageCollectionStarted,
    GarbageCollectionFinished,
    /// Tracked objects were collected; their ids may be reused afterwards
    GarbageCollectedTrackedObjects { removed: Vec<TrackedObjectId> },
    RuntimeSuspendStarted,
    RuntimeSuspendFinished,
    RuntimeResumeStarted,
    RuntimeResumeFinished,
    RuntimeThreadSuspended { thread_id: ThreadId },
    RuntimeThreadResumed { thread_id: ThreadId },
    /// Liveness signal of the monitored process
    Heartbeat,
    /// The profiler inside the monitored process shut down
    ProfilerDestroy,
}

/// A raw notification as delivered by the event source
///
/// Delivery is FIFO per `(process_id, thread_id)`; nothing orders the streams
/// of two different threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Sequence number assigned by the event source
    #[serde(default)]
    pub id: u64,
    pub process_id: ProcessId,
    pub thread_id: ThreadId,
    pub kind: RawEventKind,
}

impl RawEvent {
    pub fn new(process_id: ProcessId, thread_id: ThreadId, kind: RawEventKind) -> Self {
        RawEvent {
            id: 0,
            process_id,
            thread_id,
            kind,
        }
    }

    /// The thread whose stream this event belongs to
    pub fn thread(&self) -> ProcessThreadId {
        ProcessThreadId::new(self.process_id, self.thread_id)
    }
}
