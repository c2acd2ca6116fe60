use crate::core::methods::MethodDescriptor;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Engine settings
///
/// Deserializable from JSON; every field is optional.
///
/// ```json
/// {
///   "heartbeat_timeout_secs": 10,
///   "event_log": "logs/events_{timestamp}.jsonl",
///   "methods": [
///     { "module_id": 1, "method_token": 100663313, "interpretation": "LockAcquire" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds without a heartbeat after which a process is considered crashed
    pub heartbeat_timeout_secs: u64,
    /// Journal of semantic events; may contain a `{timestamp}` placeholder
    pub event_log: Option<PathBuf>,
    /// Hooked methods known up front
    pub methods: Vec<MethodDescriptor>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            event_log: None,
            methods: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        i64::try_from(self.heartbeat_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}
