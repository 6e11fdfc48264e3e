//! Replica Sync Library
//!
//! One-way reconciliation of a replica directory tree against a source tree:
//! - Tree snapshots with walkdir
//! - Root-relative path mapping between the two trees
//! - Size+mtime staleness checks, with opt-in Blake3/SHA-256 comparison
//! - A three-pass engine (prune, materialize, refresh) with per-item failure isolation
//! - Outcome reporting to log files and channels

pub mod scanner;
pub mod path;
pub mod compare;
pub mod engine;
pub mod report;
pub mod metrics;
pub mod error;

// Re-export main types and functions
pub use scanner::{DirectoryScanner, EntryKind, FileEntry, Snapshot};
pub use path::{to_other, TreeRoot};
pub use compare::{ComparisonMethod, ComparisonResult, FileComparator, FileStamp};
pub use engine::{SyncEngine, SyncOptions};
pub use report::{
    ChannelReporter, EventChannel, LogFileReporter, NoopReporter, OutcomeReporter, Severity,
    SyncEvent,
};
pub use metrics::{CycleReport, CycleStats};
pub use error::{Result, SyncError};

/// Run one reconciliation cycle of `replica` against `source`
pub async fn reconcile(
    source: impl AsRef<std::path::Path>,
    replica: impl AsRef<std::path::Path>,
    options: SyncOptions,
    reporter: &dyn OutcomeReporter,
) -> Result<CycleReport> {
    let engine = SyncEngine::new(options);
    engine.reconcile(source, replica, reporter).await
}

/// Snapshot a directory tree
pub async fn scan_directory(
    root: impl AsRef<std::path::Path>,
    reporter: &dyn OutcomeReporter,
) -> Result<Snapshot> {
    let root = TreeRoot::new(root)?;
    DirectoryScanner::new().scan(&root, reporter).await
}
