// Core types
pub mod types;
pub use types::*;

pub mod error;
pub use error::{EngineError, ErrorKind};

// Argument decoding and hooked method table
pub mod arguments;
pub mod methods;

// Per-process shadow state
pub mod callstack;
pub mod epoch;
pub mod reentrancy;
pub mod registry;
pub mod shadow_lock;

// Deferred delivery of out-of-order events
pub mod delivery;

// Semantic event fan-out and journal
pub mod events;
pub mod logger;

pub mod orchestrator;

pub mod config;
pub mod engine;

use crate::core::arguments::{ArgumentParser, PackedArgumentParser};
use crate::core::config::EngineConfig;
use crate::core::delivery::{DeliveryContext, DeliveryCoordinator};
use crate::core::engine::{DeliveryFactory, Engine};
use crate::core::events::{EventHub, EventObserver};
use crate::core::logger::EventLogger;
use crate::core::methods::{MethodDescriptor, MethodInterpretation};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// SyncShadow engine builder
pub struct SyncShadow {
    config: EngineConfig,
    observers: Vec<Box<dyn EventObserver>>,
    parser: Arc<dyn ArgumentParser>,
    delivery: DeliveryFactory,
}

impl Default for SyncShadow {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncShadow {
    /// Create a new builder with default settings
    ///
    /// By default:
    /// - No event journal is written
    /// - No hooked methods are known until bound by the event stream
    /// - Arguments are decoded with [`PackedArgumentParser`]
    pub fn new() -> Self {
        SyncShadow {
            config: EngineConfig::default(),
            observers: Vec::new(),
            parser: Arc::new(PackedArgumentParser),
            delivery: Box::new(|| Box::new(DeliveryContext::new())),
        }
    }

    /// Replace the whole configuration
    ///
    /// Methods and the journal path set earlier on the builder are discarded.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Activate the event journal
    ///
    /// # Arguments
    /// * `path` - Path to the journal file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    ///
    /// # Returns
    /// The builder for method chaining
    pub fn with_log<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.event_log = Some(path.into());
        self
    }

    pub fn heartbeat_timeout(mut self, seconds: u64) -> Self {
        self.config.heartbeat_timeout_secs = seconds;
        self
    }

    /// Bind a hooked method up front
    ///
    /// # Arguments
    /// * `module_id` - Module defining the method
    /// * `method_token` - Metadata token of the method
    /// * `interpretation` - Synchronization meaning of the method
    ///
    /// # Returns
    /// The builder for method chaining
    pub fn method(
        mut self,
        module_id: types::ModuleId,
        method_token: types::MethodToken,
        interpretation: MethodInterpretation,
    ) -> Self {
        self.config
            .methods
            .push(MethodDescriptor::new(module_id, method_token, interpretation));
        self
    }

    /// Subscribe an observer to semantic events
    pub fn observer<O>(mut self, observer: O) -> Self
    where
        O: EventObserver + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn argument_parser<P>(mut self, parser: P) -> Self
    where
        P: ArgumentParser + 'static,
    {
        self.parser = Arc::new(parser);
        self
    }

    /// Use a custom delivery coordinator for every process
    ///
    /// # Arguments
    /// * `factory` - Called once for each newly seen process
    pub fn delivery_coordinator<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn DeliveryCoordinator> + Send + Sync + 'static,
    {
        self.delivery = Box::new(factory);
        self
    }

    /// Build the engine with the configured settings
    ///
    /// # Returns
    /// The engine, ready to receive raw events
    ///
    /// # Errors
    /// Returns an error if the event journal cannot be created
    pub fn start(self) -> Result<Engine> {
        let mut hub = EventHub::new();
        if let Some(path) = &self.config.event_log {
            let logger = EventLogger::with_file(path).context("Failed to initialize event journal")?;
            hub = hub.with_logger(logger);
        }
        for observer in self.observers {
            hub.add_observer(observer);
        }

        Ok(Engine::new(self.config, hub, self.parser, self.delivery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MethodCall, RawEvent, RawEventKind};
    use crossbeam_channel::unbounded;
    use tempfile::TempDir;

    #[test]
    fn test_builder_binds_methods() {
        let (tx, rx) = unbounded();
        let engine = SyncShadow::new()
            .method(1, 0x10, MethodInterpretation::LockAcquire)
            .observer(events::ChannelObserver::new(tx))
            .start()
            .unwrap();

        engine
            .dispatch(RawEvent::new(1, 1, RawEventKind::ThreadCreate { thread_id: 1 }))
            .unwrap();
        let (values, layout) = arguments::PackedArguments::new().object(7).build();
        let mut call = MethodCall::new(1, 0x10);
        call.argument_values = values;
        call.argument_layout = layout;
        engine
            .dispatch(RawEvent::new(1, 1, RawEventKind::MethodEnter(call)))
            .unwrap();

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert!(matches!(
            received[1],
            events::SemanticEvent::LockAcquireAttempted { .. }
        ));
    }

    #[test]
    fn test_start_with_journal() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("journal.jsonl");
        let engine = SyncShadow::new().with_log(&path).start().unwrap();

        engine
            .dispatch(RawEvent::new(1, 1, RawEventKind::ThreadCreate { thread_id: 1 }))
            .unwrap();
        engine.flush_logs().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("ThreadCreated"));
    }
}
