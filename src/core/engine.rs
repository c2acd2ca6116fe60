//! Multi-process front of the replay engine
//!
//! Raw events are routed by process id to one [`ProcessOrchestrator`] per
//! monitored process. Processes share nothing: each sits behind its own
//! mutex, and a failure tears down only the process it happened in.

use crate::core::arguments::ArgumentParser;
use crate::core::config::EngineConfig;
use crate::core::delivery::DeliveryCoordinator;
use crate::core::error::{EngineError, Result};
use crate::core::events::{EventHub, SemanticEvent, TerminationReason};
use crate::core::methods::MethodRegistry;
use crate::core::orchestrator::{ProcessOrchestrator, RuntimeSnapshot};
use crate::core::types::{ProcessId, RawEvent, RawEventKind};
use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;

/// Factory for the delivery coordinator of a newly seen process
pub type DeliveryFactory = Box<dyn Fn() -> Box<dyn DeliveryCoordinator> + Send + Sync>;

/// Lifecycle of a monitored process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProcessStatus {
    Running,
    /// The profiler shut down normally
    Finished,
    /// Heartbeats stopped
    Crashed,
    /// Torn down through [`Engine::terminate`]
    Terminated,
    /// The event stream violated an invariant; later events are discarded
    Invalid(String),
}

struct ProcessEntry {
    orchestrator: ProcessOrchestrator,
    status: ProcessStatus,
    last_heartbeat: DateTime<Utc>,
}

/// Replay engine for any number of monitored processes
pub struct Engine {
    config: EngineConfig,
    processes: RwLock<FxHashMap<ProcessId, Arc<Mutex<ProcessEntry>>>>,
    hub: Arc<EventHub>,
    parser: Arc<dyn ArgumentParser>,
    methods: MethodRegistry,
    delivery: DeliveryFactory,
}

impl Engine {
    pub(crate) fn new(
        config: EngineConfig,
        hub: EventHub,
        parser: Arc<dyn ArgumentParser>,
        delivery: DeliveryFactory,
    ) -> Self {
        let methods = MethodRegistry::from_descriptors(&config.methods);
        Engine {
            config,
            processes: RwLock::new(FxHashMap::default()),
            hub: Arc::new(hub),
            parser,
            methods,
            delivery,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Feed one raw event
    ///
    /// Events of a process that is no longer running are discarded.
    ///
    /// # Errors
    /// `ProcessFailed` when the event broke the stream of its process. The
    /// process is torn down and marked invalid; other processes are not
    /// affected.
    pub fn dispatch(&self, event: RawEvent) -> Result<()> {
        let process_id = event.process_id;
        let entry = self.entry(process_id);
        let mut entry = entry.lock();

        if entry.status != ProcessStatus::Running {
            debug!("Discarding event of process {process_id} ({:?})", entry.status);
            return Ok(());
        }

        match event.kind {
            RawEventKind::Heartbeat => {
                entry.last_heartbeat = Utc::now();
                return Ok(());
            }
            RawEventKind::ProfilerDestroy => {
                self.teardown(
                    &mut entry,
                    ProcessStatus::Finished,
                    TerminationReason::ProfilerDestroyed,
                );
                return Ok(());
            }
            _ => {}
        }

        if let Err(source) = entry.orchestrator.process(event) {
            error!("Analysis of process {process_id} failed: {source}");
            let message = source.to_string();
            self.teardown(
                &mut entry,
                ProcessStatus::Invalid(message.clone()),
                TerminationReason::StreamInvalid { error: message },
            );
            return Err(EngineError::ProcessFailed {
                process_id,
                source: Box::new(source),
            });
        }
        Ok(())
    }

    pub fn status(&self, process_id: ProcessId) -> Option<ProcessStatus> {
        let entry = self.processes.read().get(&process_id).cloned()?;
        let status = entry.lock().status.clone();
        Some(status)
    }

    pub fn snapshot(&self, process_id: ProcessId) -> Option<RuntimeSnapshot> {
        let entry = self.processes.read().get(&process_id).cloned()?;
        let snapshot = entry.lock().orchestrator.snapshot();
        Some(snapshot)
    }

    /// Ids of every process seen so far, sorted
    pub fn process_ids(&self) -> Vec<ProcessId> {
        let mut ids: Vec<ProcessId> = self.processes.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Tear a running process down on request
    ///
    /// The entry is kept as a tombstone, so events of the process that are
    /// still in transit are discarded instead of starting a fresh replay.
    ///
    /// # Returns
    /// `false` if the process was unknown or no longer running
    pub fn terminate(&self, process_id: ProcessId) -> bool {
        let Some(entry) = self.processes.read().get(&process_id).cloned() else {
            return false;
        };
        let mut entry = entry.lock();
        if entry.status != ProcessStatus::Running {
            return false;
        }
        self.teardown(
            &mut entry,
            ProcessStatus::Terminated,
            TerminationReason::Requested,
        );
        true
    }

    /// Mark processes without a recent heartbeat as crashed
    ///
    /// # Returns
    /// Ids of the processes that were torn down by this call
    pub fn check_heartbeats(&self, now: DateTime<Utc>) -> Vec<ProcessId> {
        let entries: Vec<(ProcessId, Arc<Mutex<ProcessEntry>>)> = self
            .processes
            .read()
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();

        let timeout = self.config.heartbeat_timeout();
        let mut crashed = Vec::new();
        for (process_id, entry) in entries {
            let mut entry = entry.lock();
            if entry.status == ProcessStatus::Running && now - entry.last_heartbeat > timeout {
                warn!("No heartbeat from process {process_id} within {timeout}");
                self.teardown(
                    &mut entry,
                    ProcessStatus::Crashed,
                    TerminationReason::HeartbeatTimeout,
                );
                crashed.push(process_id);
            }
        }
        crashed.sort_unstable();
        crashed
    }

    /// Flush the event journal, if one is configured
    pub fn flush_logs(&self) -> anyhow::Result<()> {
        match self.hub.logger() {
            Some(logger) => logger.flush(),
            None => Ok(()),
        }
    }

    fn entry(&self, process_id: ProcessId) -> Arc<Mutex<ProcessEntry>> {
        if let Some(entry) = self.processes.read().get(&process_id) {
            return Arc::clone(entry);
        }

        let mut processes = self.processes.write();
        let entry = processes.entry(process_id).or_insert_with(|| {
            info!("Tracking process {process_id}");
            Arc::new(Mutex::new(ProcessEntry {
                orchestrator: ProcessOrchestrator::new(
                    process_id,
                    Arc::clone(&self.hub),
                    Arc::clone(&self.parser),
                    (self.delivery)(),
                    self.methods.clone(),
                ),
                status: ProcessStatus::Running,
                last_heartbeat: Utc::now(),
            }))
        });
        Arc::clone(entry)
    }

    fn teardown(&self, entry: &mut ProcessEntry, status: ProcessStatus, reason: TerminationReason) {
        let process_id = entry.orchestrator.process_id();
        let dropped = entry.orchestrator.clear();
        if dropped > 0 {
            warn!("Dropped {dropped} parked events of process {process_id}");
        }
        info!("Process {process_id} terminated: {status:?}");
        entry.status = status;
        self.hub
            .publish(SemanticEvent::ProcessTerminated { process_id, reason });
    }
}
