//! Outcome reporting for reconciliation cycles
//!
//! Every attempted mutation produces a [`SyncEvent`]. Events are handed to an
//! [`OutcomeReporter`], whose `record` cannot fail: a broken sink must never
//! stop a cycle.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::scanner::EntryKind;

/// Severity tag written in front of every outcome line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// One outcome of a reconciliation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Replication started for a pair of roots
    Started {
        source: PathBuf,
        replica: PathBuf,
    },
    /// An extraneous replica entry is about to be removed
    Deleting {
        path: PathBuf,
        kind: EntryKind,
    },
    DeleteFailed {
        path: PathBuf,
        error: String,
    },
    /// A missing replica entry is about to be created
    Creating {
        path: PathBuf,
        kind: EntryKind,
    },
    CreateFailed {
        path: PathBuf,
        error: String,
    },
    /// A stale replica entry is about to be overwritten from the source
    Copying {
        source: PathBuf,
        destination: PathBuf,
    },
    CopyFailed {
        source: PathBuf,
        destination: PathBuf,
        error: String,
    },
    /// Part of a tree could not be read and was left out of the snapshot
    ScanFailed {
        path: PathBuf,
        error: String,
    },
    /// The cycle stopped before mutating anything
    CycleAborted {
        reason: String,
    },
}

impl SyncEvent {
    pub fn severity(&self) -> Severity {
        match self {
            SyncEvent::Started { .. }
            | SyncEvent::Deleting { .. }
            | SyncEvent::Creating { .. }
            | SyncEvent::Copying { .. } => Severity::Info,
            SyncEvent::DeleteFailed { .. }
            | SyncEvent::CreateFailed { .. }
            | SyncEvent::CopyFailed { .. }
            | SyncEvent::ScanFailed { .. }
            | SyncEvent::CycleAborted { .. } => Severity::Error,
        }
    }

    /// Whether this event announces a delete, create or copy
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            SyncEvent::Deleting { .. } | SyncEvent::Creating { .. } | SyncEvent::Copying { .. }
        )
    }

    pub fn is_error(&self) -> bool {
        self.severity() == Severity::Error
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.severity())?;
        match self {
            SyncEvent::Started { source, replica } => write!(
                f,
                "Starting replication of {} into {}",
                source.display(),
                replica.display()
            ),
            SyncEvent::Deleting { path, kind } => write!(f, "Deleting {} {}", kind, path.display()),
            SyncEvent::DeleteFailed { path, error } => {
                write!(f, "Could not delete {}: {}", path.display(), error)
            }
            SyncEvent::Creating { path, kind } => write!(f, "Creating {} {}", kind, path.display()),
            SyncEvent::CreateFailed { path, error } => {
                write!(f, "Failed to create {}: {}", path.display(), error)
            }
            SyncEvent::Copying { source, destination } => write!(
                f,
                "Copying {} to {}",
                source.display(),
                destination.display()
            ),
            SyncEvent::CopyFailed { source, destination, error } => write!(
                f,
                "Failed to copy {} to {}: {}",
                source.display(),
                destination.display(),
                error
            ),
            SyncEvent::ScanFailed { path, error } => {
                write!(f, "Could not scan {}: {}", path.display(), error)
            }
            SyncEvent::CycleAborted { reason } => write!(f, "Cycle aborted: {}", reason),
        }
    }
}

/// Sink for cycle outcomes
pub trait OutcomeReporter: Send + Sync {
    fn record(&self, event: &SyncEvent);
}

impl<R: OutcomeReporter + ?Sized> OutcomeReporter for std::sync::Arc<R> {
    fn record(&self, event: &SyncEvent) {
        (**self).record(event)
    }
}

/// Reporter that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl OutcomeReporter for NoopReporter {
    fn record(&self, _event: &SyncEvent) {}
}

/// Append-only text log of outcome lines, echoed to the tracing console.
///
/// The first write of the reporter's lifetime truncates the file; every
/// later write appends.
pub struct LogFileReporter {
    path: PathBuf,
    state: Mutex<SinkState>,
}

#[derive(Default)]
struct SinkState {
    file: Option<File>,
    initialized: bool,
    failed: bool,
}

impl LogFileReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(SinkState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut state = self.state.lock();

        if state.file.is_none() {
            let mut options = OpenOptions::new();
            if state.initialized {
                options.append(true);
            } else {
                options.write(true).truncate(true);
            }
            let file = options.create(true).open(&self.path)?;
            state.initialized = true;
            state.file = Some(file);
        }

        let result = match state.file.as_mut() {
            Some(file) => writeln!(file, "{}", line),
            None => Ok(()),
        };

        if result.is_err() {
            // reopen in append mode on the next event
            state.file = None;
        }
        result
    }
}

impl OutcomeReporter for LogFileReporter {
    fn record(&self, event: &SyncEvent) {
        let line = event.to_string();
        match event.severity() {
            Severity::Info => tracing::info!("{}", line),
            Severity::Error => tracing::error!("{}", line),
        }

        if let Err(e) = self.write_line(&line) {
            let mut state = self.state.lock();
            if !state.failed {
                state.failed = true;
                tracing::warn!(
                    "Error writing to log file '{}': {}; continuing with console output only",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Receiving side of a [`ChannelReporter`]
pub struct EventChannel {
    receiver: mpsc::UnboundedReceiver<SyncEvent>,
}

impl EventChannel {
    /// Create a connected reporter/receiver pair
    pub fn new() -> (ChannelReporter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelReporter { sender }, Self { receiver })
    }

    /// Receive the next event
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.receiver.recv().await
    }

    /// Take the next event if one is queued
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain every queued event
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Reporter forwarding events into a channel
#[derive(Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<SyncEvent>,
}

impl OutcomeReporter for ChannelReporter {
    fn record(&self, event: &SyncEvent) {
        // a dropped receiver only loses visibility
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn deleting(path: &str) -> SyncEvent {
        SyncEvent::Deleting {
            path: PathBuf::from(path),
            kind: EntryKind::File,
        }
    }

    #[test]
    fn test_event_lines_carry_severity_prefix() {
        assert_eq!(deleting("/r/x.txt").to_string(), "INFO: Deleting file /r/x.txt");

        let failed = SyncEvent::CopyFailed {
            source: PathBuf::from("/s/a"),
            destination: PathBuf::from("/r/a"),
            error: "denied".to_string(),
        };
        assert_eq!(failed.to_string(), "ERROR: Failed to copy /s/a to /r/a: denied");
    }

    #[test]
    fn test_mutation_classification() {
        assert!(deleting("/r/x").is_mutation());
        assert!(!SyncEvent::Started {
            source: PathBuf::from("/s"),
            replica: PathBuf::from("/r"),
        }
        .is_mutation());
        assert!(!SyncEvent::ScanFailed {
            path: PathBuf::from("/s/locked"),
            error: "denied".to_string(),
        }
        .is_mutation());
    }

    #[test]
    fn test_log_file_truncates_then_appends() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("sync.log");
        std::fs::write(&log_path, "stale line from a previous run\n").unwrap();

        let reporter = LogFileReporter::new(&log_path);
        reporter.record(&deleting("/r/one"));
        reporter.record(&deleting("/r/two"));

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(
            content,
            "INFO: Deleting file /r/one\nINFO: Deleting file /r/two\n"
        );
    }

    #[test]
    fn test_unwritable_log_is_swallowed() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = LogFileReporter::new(temp_dir.path().join("missing-dir").join("sync.log"));

        // must not panic or propagate
        reporter.record(&deleting("/r/one"));
        reporter.record(&deleting("/r/two"));
        assert!(!reporter.path().exists());
    }

    #[tokio::test]
    async fn test_channel_reporter_forwards_events() {
        let (reporter, mut channel) = EventChannel::new();
        reporter.record(&deleting("/r/a"));
        reporter.record(&deleting("/r/b"));

        assert_eq!(channel.recv().await, Some(deleting("/r/a")));
        assert_eq!(channel.drain(), vec![deleting("/r/b")]);
    }

    #[test]
    fn test_channel_reporter_survives_closed_receiver() {
        let (reporter, channel) = EventChannel::new();
        drop(channel);
        reporter.record(&deleting("/r/a"));
    }
}
