//! Semantic events published by the engine
//!
//! Every replayed synchronization operation is republished as a
//! [`SemanticEvent`]. Downstream analyzers subscribe through
//! [`EventObserver`]; the optional [`EventLogger`] journal receives the same
//! stream.

use crate::core::logger::EventLogger;
use crate::core::types::{
    FieldToken, MethodToken, ModuleId, ProcessId, ProcessThreadId, ProcessTrackedObjectId,
};
use crossbeam_channel::Sender;
use serde::Serialize;

/// Why the engine stopped tracking a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    /// The profiler inside the process shut down normally
    ProfilerDestroyed,
    /// No heartbeat arrived within the configured timeout
    HeartbeatTimeout,
    /// The event stream violated an invariant
    StreamInvalid { error: String },
    /// Termination was requested through the engine
    Requested,
}

/// Typed, causally ordered synchronization event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum SemanticEvent {
    LockAcquireAttempted {
        thread: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
        lock: ProcessTrackedObjectId,
    },
    LockAcquireReturned {
        thread: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
        lock: ProcessTrackedObjectId,
        success: bool,
    },
    LockReleased {
        thread: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
        lock: ProcessTrackedObjectId,
    },
    ObjectPulsedOne {
        thread: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
        lock: ProcessTrackedObjectId,
    },
    ObjectPulsedAll {
        thread: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
        lock: ProcessTrackedObjectId,
    },
    ObjectWaitAttempted {
        thread: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
        lock: ProcessTrackedObjectId,
    },
    ObjectWaitReturned {
        thread: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
        lock: ProcessTrackedObjectId,
        success: bool,
    },
    ThreadCreated {
        thread: ProcessThreadId,
    },
    ThreadDestroyed {
        thread: ProcessThreadId,
    },
    ThreadStarted {
        thread: ProcessThreadId,
        thread_object: ProcessTrackedObjectId,
    },
    ThreadMappingUpdated {
        thread: ProcessThreadId,
        thread_object: ProcessTrackedObjectId,
    },
    ThreadJoinAttempted {
        thread: ProcessThreadId,
        joined: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
    },
    ThreadJoinReturned {
        thread: ProcessThreadId,
        joined: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
        success: bool,
    },
    StaticFieldRead {
        thread: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
        field_token: FieldToken,
    },
    StaticFieldWritten {
        thread: ProcessThreadId,
        module_id: ModuleId,
        method_token: MethodToken,
        field_token: FieldToken,
    },
    RuntimeSuspended {
        process_id: ProcessId,
        epoch: u64,
    },
    RuntimeResumed {
        process_id: ProcessId,
        epoch: u64,
    },
    GarbageCollected {
        process_id: ProcessId,
        removed: usize,
        deferred: usize,
    },
    ProcessTerminated {
        process_id: ProcessId,
        reason: TerminationReason,
    },
}

impl SemanticEvent {
    /// Thread that performed the operation, if the event belongs to one
    pub fn thread(&self) -> Option<ProcessThreadId> {
        match self {
            SemanticEvent::LockAcquireAttempted { thread, .. }
            | SemanticEvent::LockAcquireReturned { thread, .. }
            | SemanticEvent::LockReleased { thread, .. }
            | SemanticEvent::ObjectPulsedOne { thread, .. }
            | SemanticEvent::ObjectPulsedAll { thread, .. }
            | SemanticEvent::ObjectWaitAttempted { thread, .. }
            | SemanticEvent::ObjectWaitReturned { thread, .. }
            | SemanticEvent::ThreadCreated { thread }
            | SemanticEvent::ThreadDestroyed { thread }
            | SemanticEvent::ThreadStarted { thread, .. }
            | SemanticEvent::ThreadMappingUpdated { thread, .. }
            | SemanticEvent::ThreadJoinAttempted { thread, .. }
            | SemanticEvent::ThreadJoinReturned { thread, .. }
            | SemanticEvent::StaticFieldRead { thread, .. }
            | SemanticEvent::StaticFieldWritten { thread, .. } => Some(*thread),
            _ => None,
        }
    }

    pub fn process_id(&self) -> ProcessId {
        match self {
            SemanticEvent::RuntimeSuspended { process_id, .. }
            | SemanticEvent::RuntimeResumed { process_id, .. }
            | SemanticEvent::GarbageCollected { process_id, .. }
            | SemanticEvent::ProcessTerminated { process_id, .. } => *process_id,
            other => other.thread().map_or(0, |t| t.process_id),
        }
    }
}

/// Receiver of semantic events
///
/// Observers are called synchronously while the owning process is locked, so
/// they must not call back into the engine.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &SemanticEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&SemanticEvent) + Send + Sync,
{
    fn on_event(&self, event: &SemanticEvent) {
        self(event)
    }
}

/// Observer forwarding every event into a channel
///
/// Events are dropped once the receiving side is gone.
pub struct ChannelObserver {
    sender: Sender<SemanticEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<SemanticEvent>) -> Self {
        ChannelObserver { sender }
    }
}

impl From<Sender<SemanticEvent>> for ChannelObserver {
    fn from(sender: Sender<SemanticEvent>) -> Self {
        ChannelObserver::new(sender)
    }
}

impl EventObserver for ChannelObserver {
    fn on_event(&self, event: &SemanticEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Fan-out of semantic events to the journal and all observers
#[derive(Default)]
pub struct EventHub {
    observers: Vec<Box<dyn EventObserver>>,
    logger: Option<EventLogger>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(mut self, logger: EventLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn EventObserver>) {
        self.observers.push(observer);
    }

    pub fn publish(&self, event: SemanticEvent) {
        if let Some(logger) = &self.logger {
            logger.log_event(&event);
        }
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    pub fn logger(&self) -> Option<&EventLogger> {
        self.logger.as_ref()
    }
}
