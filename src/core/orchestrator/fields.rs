use super::{Dispatch, FieldAccess, ProcessOrchestrator, read_u64};
use crate::core::error::{EngineError, Result};
use crate::core::events::SemanticEvent;
use crate::core::types::{InstrumentationPointId, MethodCall, ProcessThreadId};
use log::debug;

impl ProcessOrchestrator {
    pub(super) fn on_field_access_instrumented(
        &mut self,
        instrumentation_point: InstrumentationPointId,
        access: FieldAccess,
    ) {
        debug!(
            "Static field {:#x} accessed from {:#x}:{:#x} at point {instrumentation_point}",
            access.field_token, access.module_id, access.method_token
        );
        self.field_accesses.insert(instrumentation_point, access);
    }

    /// Replay a static field access hook
    ///
    /// The captured arguments start with the id of the instrumentation point,
    /// which resolves to the accessed field.
    pub(super) fn on_static_field(
        &mut self,
        thread: ProcessThreadId,
        call: &MethodCall,
        write: bool,
    ) -> Result<Dispatch> {
        let instrumentation_point = read_u64(&call.argument_values, "instrumentation point id")?;
        let access = self
            .field_accesses
            .get(&instrumentation_point)
            .copied()
            .ok_or(EngineError::UnknownInstrumentationPoint {
                process_id: self.process_id,
                instrumentation_point,
            })?;

        let event = if write {
            SemanticEvent::StaticFieldWritten {
                thread,
                module_id: access.module_id,
                method_token: access.method_token,
                field_token: access.field_token,
            }
        } else {
            SemanticEvent::StaticFieldRead {
                thread,
                module_id: access.module_id,
                method_token: access.method_token,
                field_token: access.field_token,
            }
        };
        self.raise(event);
        Ok(Dispatch::Consumed)
    }
}
