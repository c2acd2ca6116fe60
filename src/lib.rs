//! # SyncShadow
//!
//! Causally ordered replay of synchronization events from monitored managed
//! processes.
//!
//! A profiler inside each monitored process reports method enter and exit
//! notifications per thread. Those streams are FIFO per thread but arrive
//! with no ordering across threads, so a lock acquire can show up before the
//! release that made it possible. SyncShadow keeps a shadow model of every
//! process (callstacks, lock owners, monitor wait-sets, thread bindings) and
//! holds back each event until its causal predecessors have been replayed.
//!
//! ## Features
//!
//! - Lock acquire/release with reentrancy and `TryEnter` support
//! - Monitor `Wait` / `Pulse` / `PulseAll` with reentrancy restore
//! - Thread start, current-thread binding and `Join`
//! - Static field access reporting
//! - Garbage collection and runtime suspension epochs
//! - Per-process isolation and heartbeat watchdog
//! - Optional JSON lines journal of the replayed events
//!
//! ## Example
//!
//! ```
//! use syncshadow::{MethodCall, MethodInterpretation, PackedArguments, RawEvent, RawEventKind, SyncShadow};
//!
//! let engine = SyncShadow::new()
//!     .method(1, 0x10, MethodInterpretation::LockAcquire)
//!     .observer(|event: &syncshadow::SemanticEvent| println!("{event:?}"))
//!     .start()
//!     .unwrap();
//!
//! let (values, layout) = PackedArguments::new().object(42).build();
//! let mut call = MethodCall::new(1, 0x10);
//! call.argument_values = values;
//! call.argument_layout = layout;
//!
//! engine.dispatch(RawEvent::new(7, 1, RawEventKind::ThreadCreate { thread_id: 1 })).unwrap();
//! engine.dispatch(RawEvent::new(7, 1, RawEventKind::MethodEnter(call))).unwrap();
//! ```

mod core;
pub use self::core::{
    EngineError, ErrorKind, SyncShadow,
    arguments::{
        ArgumentParser, PackedArgumentParser, PackedArguments, ParseError, RuntimeArgument,
        RuntimeArgumentList, RuntimeArgumentValue,
    },
    callstack::{Callstack, StackFrame},
    config::EngineConfig,
    delivery::{BlockReason, DeliveryContext, DeliveryCoordinator},
    engine::{Engine, ProcessStatus},
    epoch::RuntimePhase,
    events::{ChannelObserver, EventObserver, SemanticEvent, TerminationReason},
    logger::{EventLogger, LogEntry},
    methods::{MethodDescriptor, MethodInterpretation, MethodRegistry},
    orchestrator::{
        LockSnapshot, ModuleSnapshot, RuntimeSnapshot, ThreadSnapshot, ThreadState,
    },
    types::{
        FieldToken, InstrumentationPointId, MethodCall, MethodToken, ModuleId, ProcessId,
        ProcessThreadId, ProcessTrackedObjectId, RawEvent, RawEventKind, ThreadId,
        TrackedObjectId,
    },
};
