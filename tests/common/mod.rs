#![allow(dead_code)]

use crossbeam_channel::Receiver;
use syncshadow::{
    ChannelObserver, Engine, MethodCall, MethodInterpretation, MethodToken, ModuleId,
    PackedArguments, ProcessId, ProcessThreadId, ProcessTrackedObjectId, RawEvent, RawEventKind,
    SemanticEvent, SyncShadow, ThreadId, TrackedObjectId,
};

pub const MODULE: ModuleId = 1;
pub const ENTER: MethodToken = 0x10;
pub const TRY_ENTER: MethodToken = 0x11;
pub const EXIT: MethodToken = 0x12;
pub const PULSE: MethodToken = 0x13;
pub const PULSE_ALL: MethodToken = 0x14;
pub const WAIT: MethodToken = 0x15;
pub const THREAD_START: MethodToken = 0x20;
pub const CURRENT_THREAD: MethodToken = 0x21;
pub const JOIN: MethodToken = 0x22;
pub const FIELD_READ: MethodToken = 0x30;
pub const FIELD_WRITE: MethodToken = 0x31;

pub struct EngineHarness {
    pub engine: Engine,
    pub rx: Receiver<SemanticEvent>,
}

/// Engine with the test module's hooked methods bound up front
pub fn start_engine() -> EngineHarness {
    start_with(SyncShadow::new())
}

pub fn start_with(builder: SyncShadow) -> EngineHarness {
    let (tx, rx) = crossbeam_channel::unbounded();
    let engine = builder
        .method(MODULE, ENTER, MethodInterpretation::LockAcquire)
        .method(MODULE, TRY_ENTER, MethodInterpretation::LockTryAcquire)
        .method(MODULE, EXIT, MethodInterpretation::LockRelease)
        .method(MODULE, PULSE, MethodInterpretation::MonitorPulseOne)
        .method(MODULE, PULSE_ALL, MethodInterpretation::MonitorPulseAll)
        .method(MODULE, WAIT, MethodInterpretation::MonitorWait)
        .method(MODULE, THREAD_START, MethodInterpretation::ThreadStart)
        .method(MODULE, CURRENT_THREAD, MethodInterpretation::ThreadMapping)
        .method(MODULE, JOIN, MethodInterpretation::ThreadJoin)
        .method(MODULE, FIELD_READ, MethodInterpretation::StaticFieldRead)
        .method(MODULE, FIELD_WRITE, MethodInterpretation::StaticFieldWrite)
        .observer(ChannelObserver::new(tx))
        .start()
        .expect("Failed to start engine");
    EngineHarness { engine, rx }
}

impl EngineHarness {
    pub fn feed<I>(&self, events: I)
    where
        I: IntoIterator<Item = RawEvent>,
    {
        for event in events {
            self.engine.dispatch(event).expect("Replay failed");
        }
    }

    /// Everything published since the last call, without thread lifecycle
    /// noise
    pub fn events(&self) -> Vec<SemanticEvent> {
        self.rx
            .try_iter()
            .filter(|e| {
                !matches!(
                    e,
                    SemanticEvent::ThreadCreated { .. } | SemanticEvent::ThreadDestroyed { .. }
                )
            })
            .collect()
    }
}

/// Builder of raw events for one thread of one process
#[derive(Clone, Copy)]
pub struct ThreadTrace {
    pub process_id: ProcessId,
    pub thread_id: ThreadId,
}

impl ThreadTrace {
    pub fn new(process_id: ProcessId, thread_id: ThreadId) -> Self {
        ThreadTrace {
            process_id,
            thread_id,
        }
    }

    pub fn id(&self) -> ProcessThreadId {
        ProcessThreadId::new(self.process_id, self.thread_id)
    }

    pub fn object(&self, object_id: TrackedObjectId) -> ProcessTrackedObjectId {
        ProcessTrackedObjectId::new(self.process_id, object_id)
    }

    pub fn raw(&self, kind: RawEventKind) -> RawEvent {
        RawEvent::new(self.process_id, self.thread_id, kind)
    }

    pub fn created(&self) -> RawEvent {
        self.raw(RawEventKind::ThreadCreate {
            thread_id: self.thread_id,
        })
    }

    pub fn destroyed(&self) -> RawEvent {
        self.raw(RawEventKind::ThreadDestroy {
            thread_id: self.thread_id,
        })
    }

    pub fn enter(&self, token: MethodToken, arguments: PackedArguments) -> RawEvent {
        let (argument_values, argument_layout) = arguments.build();
        self.raw(RawEventKind::MethodEnter(MethodCall {
            module_id: MODULE,
            method_token: token,
            argument_values,
            argument_layout,
            return_value: Vec::new(),
        }))
    }

    pub fn exit(&self, token: MethodToken) -> RawEvent {
        self.raw(RawEventKind::MethodExit(MethodCall::new(MODULE, token)))
    }

    pub fn exit_returning(&self, token: MethodToken, return_value: Vec<u8>) -> RawEvent {
        let mut call = MethodCall::new(MODULE, token);
        call.return_value = return_value;
        self.raw(RawEventKind::MethodExit(call))
    }

    /// `Monitor.Enter(lock)` followed by its return
    pub fn acquire(&self, lock: TrackedObjectId) -> Vec<RawEvent> {
        vec![
            self.enter(ENTER, PackedArguments::new().object(lock)),
            self.exit(ENTER),
        ]
    }

    pub fn try_acquire(&self, lock: TrackedObjectId, taken: bool) -> Vec<RawEvent> {
        vec![
            self.enter(TRY_ENTER, PackedArguments::new().object(lock)),
            self.exit_returning(TRY_ENTER, vec![taken as u8]),
        ]
    }

    pub fn release(&self, lock: TrackedObjectId) -> Vec<RawEvent> {
        vec![
            self.enter(EXIT, PackedArguments::new().object(lock)),
            self.exit(EXIT),
        ]
    }

    pub fn pulse(&self, lock: TrackedObjectId) -> Vec<RawEvent> {
        vec![
            self.enter(PULSE, PackedArguments::new().object(lock)),
            self.exit(PULSE),
        ]
    }

    pub fn pulse_all(&self, lock: TrackedObjectId) -> Vec<RawEvent> {
        vec![
            self.enter(PULSE_ALL, PackedArguments::new().object(lock)),
            self.exit(PULSE_ALL),
        ]
    }

    /// `Monitor.Wait(lock)` returning `signalled`
    pub fn wait(&self, lock: TrackedObjectId, signalled: bool) -> Vec<RawEvent> {
        vec![
            self.enter(WAIT, PackedArguments::new().object(lock)),
            self.exit_returning(WAIT, vec![signalled as u8]),
        ]
    }

    /// Start routine of a thread bound to `thread_object`
    pub fn start(&self, thread_object: TrackedObjectId) -> Vec<RawEvent> {
        vec![
            self.enter(THREAD_START, PackedArguments::new().object(thread_object)),
            self.exit(THREAD_START),
        ]
    }

    pub fn current_thread(&self, thread_object: TrackedObjectId) -> Vec<RawEvent> {
        vec![
            self.enter(CURRENT_THREAD, PackedArguments::new()),
            self.exit_returning(CURRENT_THREAD, thread_object.to_le_bytes().to_vec()),
        ]
    }

    pub fn join(&self, thread_object: TrackedObjectId) -> Vec<RawEvent> {
        vec![
            self.enter(JOIN, PackedArguments::new().object(thread_object)),
            self.exit(JOIN),
        ]
    }
}

/// Event name as serialized in the journal
pub fn event_name(event: &SemanticEvent) -> String {
    serde_json::to_value(event).expect("Serializable event")["event"]
        .as_str()
        .expect("Tagged event")
        .to_owned()
}
