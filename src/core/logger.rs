//! Journal of semantic events
//!
//! This module provides an asynchronous JSON-lines journal. Every published
//! [`SemanticEvent`] is stamped with the current time and handed to a
//! background writer thread, so replay never waits on disk I/O. The journal
//! is flushed explicitly through [`EventLogger::flush`] and when the logger
//! is dropped.

use crate::core::events::SemanticEvent;
use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::warn;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// A single journal line
#[derive(Debug, Serialize, Clone)]
pub struct LogEntry {
    /// Absolute timestamp of when the event was published (seconds since Unix Epoch)
    pub timestamp: f64,
    /// The published event
    pub event: SemanticEvent,
}

/// Commands for controlling the writer thread
#[derive(Debug)]
enum LoggerCommand {
    /// Write a journal entry
    Entry(LogEntry),
    /// Flush all pending entries to disk and signal completion
    Flush(Sender<()>),
}

/// Asynchronous journal writer
pub struct EventLogger {
    /// Channel sender for communication with the writer thread
    sender: Sender<LoggerCommand>,
    /// Flag indicating if a flush operation is in progress
    flushing: Arc<AtomicBool>,
    /// Resolved path of the journal file
    path: PathBuf,
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush event journal during drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a journal writing to the specified file
    ///
    /// # Arguments
    /// * `path` - Path to the journal file. If the filename contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    ///
    /// # Returns
    /// A Result containing the configured EventLogger or an error if setup fails
    ///
    /// # Errors
    /// Returns an error if:
    /// - The directory containing the journal could not be created
    /// - The journal file could not be opened for writing
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = resolve_path(path.as_ref());

        if let Some(parent) = path.parent()
            && parent.to_string_lossy() != ""
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create journal directory {}", parent.display())
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to open journal file {}", path.display()))?;

        let (tx, rx) = unbounded::<LoggerCommand>();
        let flushing = Arc::new(AtomicBool::new(false));

        thread::Builder::new()
            .name("syncshadow-journal".into())
            .spawn(move || writer_thread(file, rx))
            .context("Failed to spawn journal writer thread")?;

        Ok(EventLogger {
            sender: tx,
            flushing,
            path,
        })
    }

    /// Path of the journal file after placeholder substitution
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue an event for writing
    ///
    /// Never blocks; a closed writer only produces a warning.
    pub fn log_event(&self, event: &SemanticEvent) {
        let now = Utc::now();
        let timestamp = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0;

        let entry = LogEntry {
            timestamp,
            event: event.clone(),
        };

        if let Err(e) = self.sender.send(LoggerCommand::Entry(entry)) {
            warn!("Failed to queue journal entry: {e:?}");
        }
    }

    /// Force all queued entries to disk
    ///
    /// Blocks until the writer thread confirms. Concurrent callers return
    /// immediately while another flush is in progress.
    ///
    /// # Errors
    /// Returns an error if the writer thread is gone or does not confirm in time
    pub fn flush(&self) -> Result<()> {
        let already_flushing = self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err();

        if already_flushing {
            return Ok(());
        }

        let result = (|| {
            let (flush_tx, flush_rx) = crossbeam_channel::bounded(1);
            self.sender
                .send(LoggerCommand::Flush(flush_tx))
                .map_err(|_| anyhow::anyhow!("Journal writer is gone"))?;

            flush_rx
                .recv_timeout(Duration::from_secs(10))
                .map_err(|_| anyhow::anyhow!("Flush operation timed out"))
        })();

        self.flushing.store(false, Ordering::SeqCst);
        result
    }
}

fn resolve_path(path: &Path) -> PathBuf {
    #[allow(clippy::literal_string_with_formatting_args)]
    let placeholder = "{timestamp}";
    let raw = path.to_string_lossy();
    if raw.contains(placeholder) {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(raw.replace(placeholder, &timestamp))
    } else {
        path.to_path_buf()
    }
}

/// Writer loop, runs until every sender is dropped
fn writer_thread(file: File, rx: Receiver<LoggerCommand>) {
    let mut writer = BufWriter::new(file);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::Entry(entry) => {
                if let Ok(json) = serde_json::to_string(&entry)
                    && let Err(e) = writeln!(writer, "{json}")
                {
                    warn!("Journal write error: {e:?}");
                }
            }
            LoggerCommand::Flush(responder) => {
                if let Err(e) = writer.flush() {
                    warn!("Journal flush error: {e:?}");
                }
                let _ = responder.send(());
            }
        }
    }

    if let Err(e) = writer.flush() {
        warn!("Journal final flush error: {e:?}");
    }
}
