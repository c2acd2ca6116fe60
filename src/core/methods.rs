//! Method interpretations
//!
//! The instrumentation layer hooks a fixed set of runtime methods. Each hooked
//! `(module, method token)` pair is bound to one [`MethodInterpretation`],
//! which decides how its enter and exit notifications are replayed.

use crate::core::types::{MethodToken, ModuleId};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Synchronization meaning of a hooked method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodInterpretation {
    /// `Monitor.Enter` and friends; argument 0 is the lock object
    LockAcquire,
    /// `Monitor.TryEnter`; the return value tells whether the lock was taken
    LockTryAcquire,
    /// `Monitor.Exit`; argument 1, when present, is the `lockTaken` flag
    LockRelease,
    MonitorPulseOne,
    MonitorPulseAll,
    /// `Monitor.Wait`; argument 0 is the lock object
    MonitorWait,
    /// `Thread.Start`; argument 0 is the thread object
    ThreadStart,
    /// `Thread.CurrentThread` getter; the return value is the thread object
    ThreadMapping,
    /// `Thread.Join`; argument 0 is the thread object
    ThreadJoin,
    StaticFieldRead,
    StaticFieldWrite,
}

/// Binding of one hooked method to its interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub module_id: ModuleId,
    pub method_token: MethodToken,
    pub interpretation: MethodInterpretation,
}

impl MethodDescriptor {
    pub fn new(
        module_id: ModuleId,
        method_token: MethodToken,
        interpretation: MethodInterpretation,
    ) -> Self {
        MethodDescriptor {
            module_id,
            method_token,
            interpretation,
        }
    }
}

/// Lookup table from `(module, method token)` to interpretation
#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    methods: FxHashMap<(ModuleId, MethodToken), MethodInterpretation>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a descriptor table
    pub fn from_descriptors<'a, I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = &'a MethodDescriptor>,
    {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(*descriptor);
        }
        registry
    }

    /// Bind a method, replacing any previous binding
    ///
    /// # Returns
    /// The previous interpretation of the method, if any
    pub fn register(&mut self, descriptor: MethodDescriptor) -> Option<MethodInterpretation> {
        self.methods.insert(
            (descriptor.module_id, descriptor.method_token),
            descriptor.interpretation,
        )
    }

    pub fn resolve(
        &self,
        module_id: ModuleId,
        method_token: MethodToken,
    ) -> Option<MethodInterpretation> {
        self.methods.get(&(module_id, method_token)).copied()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = MethodRegistry::new();
        assert!(registry.is_empty());

        let previous = registry.register(MethodDescriptor::new(
            1,
            0x0600_0010,
            MethodInterpretation::LockAcquire,
        ));
        assert_eq!(previous, None);
        assert_eq!(
            registry.resolve(1, 0x0600_0010),
            Some(MethodInterpretation::LockAcquire)
        );
        assert_eq!(registry.resolve(2, 0x0600_0010), None);

        let previous = registry.register(MethodDescriptor::new(
            1,
            0x0600_0010,
            MethodInterpretation::LockTryAcquire,
        ));
        assert_eq!(previous, Some(MethodInterpretation::LockAcquire));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_descriptor_table_from_json() {
        let json = r#"[{"module_id":1,"method_token":5,"interpretation":"MonitorWait"}]"#;
        let descriptors: Vec<MethodDescriptor> = serde_json::from_str(json).unwrap();
        let registry = MethodRegistry::from_descriptors(&descriptors);
        assert_eq!(registry.resolve(1, 5), Some(MethodInterpretation::MonitorWait));
    }
}
