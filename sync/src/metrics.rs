//! Per-cycle statistics and event log

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::report::SyncEvent;
use crate::scanner::EntryKind;

/// Counters for one reconciliation cycle. Mutations are counted when they
/// are attempted; failed attempts also count towards `failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub source_entries: usize,
    pub replica_entries: usize,
    pub deletions: usize,
    pub files_created: usize,
    pub directories_created: usize,
    pub symlinks_created: usize,
    pub copies: usize,
    pub failures: usize,
    pub scan_errors: usize,
}

impl CycleStats {
    pub fn mutations(&self) -> usize {
        self.deletions
            + self.files_created
            + self.directories_created
            + self.symlinks_created
            + self.copies
    }
}

/// Everything one cycle did, in order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub aborted: bool,
    pub stats: CycleStats,
    pub events: Vec<SyncEvent>,
    #[serde(skip)]
    clock: Option<Instant>,
}

impl Default for CycleReport {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleReport {
    pub fn new() -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration: Duration::default(),
            aborted: false,
            stats: CycleStats::default(),
            events: Vec::new(),
            clock: Some(Instant::now()),
        }
    }

    /// Append an event and update the counters
    pub fn record(&mut self, event: SyncEvent) {
        match &event {
            SyncEvent::Deleting { .. } => self.stats.deletions += 1,
            SyncEvent::Creating { kind, .. } => match kind {
                EntryKind::File => self.stats.files_created += 1,
                EntryKind::Directory => self.stats.directories_created += 1,
                EntryKind::Symlink => self.stats.symlinks_created += 1,
                EntryKind::Other => {}
            },
            SyncEvent::Copying { .. } => self.stats.copies += 1,
            SyncEvent::DeleteFailed { .. }
            | SyncEvent::CreateFailed { .. }
            | SyncEvent::CopyFailed { .. } => self.stats.failures += 1,
            SyncEvent::ScanFailed { .. } => self.stats.scan_errors += 1,
            SyncEvent::CycleAborted { .. } => self.aborted = true,
            SyncEvent::Started { .. } => {}
        }
        self.events.push(event);
    }

    /// Mark the cycle as finished and log its summary
    pub fn complete(&mut self) {
        if let Some(clock) = self.clock.take() {
            self.duration = clock.elapsed();
        }

        info!(
            cycle_id = %self.cycle_id,
            duration_ms = self.duration.as_millis() as u64,
            deletions = self.stats.deletions,
            created = self.stats.files_created + self.stats.directories_created + self.stats.symlinks_created,
            copies = self.stats.copies,
            failures = self.stats.failures,
            scan_errors = self.stats.scan_errors,
            aborted = self.aborted,
            "Cycle completed"
        );
    }

    /// Events announcing a delete, create or copy
    pub fn mutations(&self) -> impl Iterator<Item = &SyncEvent> {
        self.events.iter().filter(|e| e.is_mutation())
    }

    pub fn errors(&self) -> impl Iterator<Item = &SyncEvent> {
        self.events.iter().filter(|e| e.is_error())
    }

    /// True when nothing failed, nothing was skipped and the cycle ran to the end
    pub fn is_successful(&self) -> bool {
        !self.aborted && self.stats.failures == 0 && self.stats.scan_errors == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "Cycle finished in {:.2}s: {} deleted, {} created, {} copied, {} failed",
            self.duration.as_secs_f64(),
            self.stats.deletions,
            self.stats.files_created + self.stats.directories_created + self.stats.symlinks_created,
            self.stats.copies,
            self.stats.failures,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_new_report() {
        let report = CycleReport::new();
        assert!(report.events.is_empty());
        assert_eq!(report.stats.mutations(), 0);
        assert!(report.is_successful());
    }

    #[test]
    fn test_record_counts_by_kind() {
        let mut report = CycleReport::new();
        report.record(SyncEvent::Creating {
            path: PathBuf::from("/r/a"),
            kind: EntryKind::Directory,
        });
        report.record(SyncEvent::Creating {
            path: PathBuf::from("/r/a/b"),
            kind: EntryKind::File,
        });
        report.record(SyncEvent::Copying {
            source: PathBuf::from("/s/a/b"),
            destination: PathBuf::from("/r/a/b"),
        });
        report.record(SyncEvent::CopyFailed {
            source: PathBuf::from("/s/a/b"),
            destination: PathBuf::from("/r/a/b"),
            error: "denied".to_string(),
        });
        report.complete();

        assert_eq!(report.stats.directories_created, 1);
        assert_eq!(report.stats.files_created, 1);
        assert_eq!(report.stats.copies, 1);
        assert_eq!(report.stats.failures, 1);
        assert_eq!(report.stats.mutations(), 3);
        assert_eq!(report.mutations().count(), 3);
        assert_eq!(report.errors().count(), 1);
        assert!(!report.is_successful());
        assert!(report.summary().contains("1 copied, 1 failed"));
    }

    #[test]
    fn test_abort_marks_report() {
        let mut report = CycleReport::new();
        report.record(SyncEvent::CycleAborted {
            reason: "source missing".to_string(),
        });
        assert!(report.aborted);
        assert!(!report.is_successful());
    }
}
