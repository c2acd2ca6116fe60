//! Typed error taxonomy of the replay engine
//!
//! Using thiserror for automatic Display implementation and error chaining.

use crate::core::arguments::ParseError;
use crate::core::types::{
    InstrumentationPointId, MethodToken, ModuleId, ProcessId, ProcessThreadId,
    ProcessTrackedObjectId,
};
use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Coarse classification of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The causal model can no longer be trusted for the owning process
    StreamIntegrity,
    /// A lock or thread object id was never registered (or already collected)
    UnknownIdentity,
    /// Captured argument bytes could not be parsed
    ArgumentParsing,
    /// A process was torn down because one of the above escaped its boundary
    ProcessFailed,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Thread {0} has no callstack")]
    MissingCallstack(ProcessThreadId),

    #[error("Callstack of thread {0} is empty")]
    EmptyCallstack(ProcessThreadId),

    #[error(
        "Callstack frame mismatch on thread {thread}: frame is {frame_module:#x}:{frame_method:#x}, exit is {exit_module:#x}:{exit_method:#x}"
    )]
    CallstackMismatch {
        thread: ProcessThreadId,
        frame_module: ModuleId,
        frame_method: MethodToken,
        exit_module: ModuleId,
        exit_method: MethodToken,
    },

    #[error("No reentrancy count recorded for thread {0}")]
    NoReentrancyRecorded(ProcessThreadId),

    #[error("Lock {lock} cannot be acquired by thread {thread} because it is acquired by thread {owner}")]
    LockAlreadyAcquired {
        lock: ProcessTrackedObjectId,
        thread: ProcessThreadId,
        owner: ProcessThreadId,
    },

    #[error("Lock {lock} cannot be released by thread {thread} because it is not acquired")]
    LockNotTaken {
        lock: ProcessTrackedObjectId,
        thread: ProcessThreadId,
    },

    #[error("Lock {lock} cannot be released by thread {thread} because it is acquired by thread {owner}")]
    LockReleasedByAnotherThread {
        lock: ProcessTrackedObjectId,
        thread: ProcessThreadId,
        owner: ProcessThreadId,
    },

    #[error("Lock operation attempted on process {process_id} but lock {lock} belongs to another process")]
    WrongProcess {
        lock: ProcessTrackedObjectId,
        process_id: ProcessId,
    },

    #[error("Cannot restore reentrancy count {count} on lock {lock}")]
    InvalidReentrancyCount {
        lock: ProcessTrackedObjectId,
        count: u32,
    },

    #[error("Could not resolve object {0} to a known lock")]
    UnknownObject(ProcessTrackedObjectId),

    #[error("No thread mapping found for object {0}")]
    UnknownThread(ProcessTrackedObjectId),

    #[error("Unknown instrumentation point {instrumentation_point} in process {process_id}")]
    UnknownInstrumentationPoint {
        process_id: ProcessId,
        instrumentation_point: InstrumentationPointId,
    },

    #[error("Could not parse arguments for method {method_token:#x} from module {module_id:#x}")]
    ArgumentParse {
        module_id: ModuleId,
        method_token: MethodToken,
        #[source]
        source: ParseError,
    },

    #[error("Argument at position {position} of method {method_token:#x} is missing or has an unexpected kind")]
    UnexpectedArgument {
        method_token: MethodToken,
        position: usize,
    },

    #[error("Malformed {what}: expected at least {expected} bytes, found {found}")]
    MalformedPayload {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Analysis of process {process_id} failed")]
    ProcessFailed {
        process_id: ProcessId,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnknownObject(_)
            | EngineError::UnknownThread(_)
            | EngineError::UnknownInstrumentationPoint { .. } => ErrorKind::UnknownIdentity,
            EngineError::ArgumentParse { .. } => ErrorKind::ArgumentParsing,
            EngineError::ProcessFailed { .. } => ErrorKind::ProcessFailed,
            _ => ErrorKind::StreamIntegrity,
        }
    }

    /// Whether the model of the owning process can no longer be trusted
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            EngineError::ProcessFailed { source, .. } => source.is_integrity_violation(),
            other => other.kind() == ErrorKind::StreamIntegrity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callstack_mismatch_display() {
        let err = EngineError::CallstackMismatch {
            thread: ProcessThreadId::new(1, 2),
            frame_module: 0x10,
            frame_method: 0x0600_0001,
            exit_module: 0x10,
            exit_method: 0x0600_0002,
        };
        let text = err.to_string();
        assert!(text.contains("1:2"));
        assert!(text.contains("0x6000001"));
        assert!(text.contains("0x6000002"));
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn test_kind_classification() {
        let unknown = EngineError::UnknownObject(ProcessTrackedObjectId::new(1, 5));
        assert_eq!(unknown.kind(), ErrorKind::UnknownIdentity);
        assert!(!unknown.is_integrity_violation());

        let failed = EngineError::ProcessFailed {
            process_id: 1,
            source: Box::new(EngineError::EmptyCallstack(ProcessThreadId::new(1, 1))),
        };
        assert_eq!(failed.kind(), ErrorKind::ProcessFailed);
        assert!(failed.is_integrity_violation());
    }
}
