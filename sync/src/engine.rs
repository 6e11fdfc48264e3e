//! Reconciliation engine: prune, materialize, refresh
//!
//! One cycle snapshots both trees and then runs three passes, each over its
//! whole input:
//!
//! 1. prune: delete replica entries whose source counterpart is gone or has
//!    a different kind
//! 2. materialize: create missing replica entries (files as empty
//!    placeholders, directories with their parents, links with the source's
//!    target)
//! 3. refresh: overwrite stale replica files from the source
//!
//! A failing item is reported and skipped; nothing is rolled back.

use std::io;
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info_span, Instrument};

use crate::compare::{ComparisonMethod, FileComparator};
use crate::error::Result;
use crate::metrics::CycleReport;
use crate::path::TreeRoot;
use crate::report::{OutcomeReporter, SyncEvent};
use crate::scanner::{DirectoryScanner, EntryKind, FileEntry, Snapshot};

/// Options for reconciliation cycles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Staleness rule for the refresh pass
    #[serde(default)]
    pub comparison_method: ComparisonMethod,
    /// Report every decision without touching the replica
    #[serde(default)]
    pub dry_run: bool,
}

/// Stateless driver of reconciliation cycles
pub struct SyncEngine {
    options: SyncOptions,
    scanner: DirectoryScanner,
    comparator: FileComparator,
}

impl SyncEngine {
    pub fn new(options: SyncOptions) -> Self {
        let comparator = FileComparator::new(options.comparison_method);
        Self {
            options,
            scanner: DirectoryScanner::new(),
            comparator,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Run one full cycle converging `replica` onto `source`.
    ///
    /// Every event goes to `reporter` as it happens and is also returned in
    /// the report. Only invalid root paths produce an `Err`; everything else
    /// is an event.
    pub async fn reconcile(
        &self,
        source: impl AsRef<Path>,
        replica: impl AsRef<Path>,
        reporter: &dyn OutcomeReporter,
    ) -> Result<CycleReport> {
        let source_root = TreeRoot::new(source)?;
        let replica_root = TreeRoot::new(replica)?;

        let recorder = CycleRecorder::new(reporter);
        let span = info_span!(
            "reconcile",
            cycle_id = %recorder.cycle_id(),
            source = %source_root,
            replica = %replica_root,
            dry_run = self.options.dry_run,
        );

        self.run_cycle(&source_root, &replica_root, &recorder)
            .instrument(span)
            .await;

        let mut report = recorder.into_report();
        report.complete();
        Ok(report)
    }

    async fn run_cycle(
        &self,
        source_root: &TreeRoot,
        replica_root: &TreeRoot,
        recorder: &CycleRecorder<'_>,
    ) {
        if source_root.overlaps(replica_root) {
            recorder.record(&SyncEvent::CycleAborted {
                reason: format!(
                    "source '{}' and replica '{}' overlap",
                    source_root, replica_root
                ),
            });
            return;
        }

        // An unreadable source must never be mirrored as an empty tree.
        let source = match self.scanner.scan(source_root, recorder).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                recorder.record(&SyncEvent::CycleAborted {
                    reason: format!("source tree unavailable: {}", e),
                });
                return;
            }
        };

        let replica = if exists(replica_root.as_path()).await {
            match self.scanner.scan(replica_root, recorder).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    recorder.record(&SyncEvent::CycleAborted {
                        reason: format!("replica tree unavailable: {}", e),
                    });
                    return;
                }
            }
        } else {
            recorder.record(&SyncEvent::Creating {
                path: replica_root.as_path().to_path_buf(),
                kind: EntryKind::Directory,
            });
            if !self.options.dry_run {
                if let Err(e) = fs::create_dir_all(replica_root.as_path()).await {
                    recorder.record(&SyncEvent::CreateFailed {
                        path: replica_root.as_path().to_path_buf(),
                        error: e.to_string(),
                    });
                    recorder.record(&SyncEvent::CycleAborted {
                        reason: "replica root could not be created".to_string(),
                    });
                    return;
                }
            }
            Snapshot {
                root: replica_root.clone(),
                entries: Vec::new(),
            }
        };

        recorder.note_sizes(source.len(), replica.len());
        debug!(
            source_entries = source.len(),
            replica_entries = replica.len(),
            "Snapshots taken"
        );

        self.prune(&replica, source_root, recorder).await;
        self.materialize(&source, replica_root, recorder).await;
        self.refresh(&source, replica_root, recorder).await;
    }

    /// Pass 1: delete replica entries with no same-kind source counterpart
    pub async fn prune(
        &self,
        replica: &Snapshot,
        source_root: &TreeRoot,
        reporter: &dyn OutcomeReporter,
    ) {
        let mut removed_dirs: Vec<&Path> = Vec::new();

        for entry in &replica.entries {
            if removed_dirs.iter().any(|dir| entry.path.starts_with(dir)) {
                continue;
            }

            let counterpart = source_root.resolve(&entry.relative_path);
            match entry_kind(&counterpart).await {
                Ok(Some(kind)) if kind == entry.kind => continue,
                Ok(_) => {}
                Err(e) => {
                    // unreadable is not the same as gone
                    reporter.record(&SyncEvent::ScanFailed {
                        path: counterpart,
                        error: e.to_string(),
                    });
                    continue;
                }
            }

            // may have vanished since the scan
            if !exists(&entry.path).await {
                continue;
            }

            reporter.record(&SyncEvent::Deleting {
                path: entry.path.clone(),
                kind: entry.kind,
            });

            if self.options.dry_run {
                if entry.is_dir() {
                    removed_dirs.push(&entry.path);
                }
                continue;
            }

            match remove_entry(entry).await {
                Ok(()) => {
                    if entry.is_dir() {
                        removed_dirs.push(&entry.path);
                    }
                }
                Err(e) => reporter.record(&SyncEvent::DeleteFailed {
                    path: entry.path.clone(),
                    error: e.to_string(),
                }),
            }
        }
    }

    /// Pass 2: create replica entries that do not exist yet
    pub async fn materialize(
        &self,
        source: &Snapshot,
        replica_root: &TreeRoot,
        reporter: &dyn OutcomeReporter,
    ) {
        // parents sort before their children
        let mut entries: Vec<&FileEntry> = source.entries.iter().collect();
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        for entry in entries {
            if entry.kind == EntryKind::Other {
                debug!(path = %entry.path.display(), "Special file is not mirrored");
                continue;
            }

            let target = replica_root.resolve(&entry.relative_path);
            if exists(&target).await {
                continue;
            }

            reporter.record(&SyncEvent::Creating {
                path: target.clone(),
                kind: entry.kind,
            });

            if self.options.dry_run {
                continue;
            }

            let result = match entry.kind {
                EntryKind::File => create_file(&entry.path, &target).await,
                EntryKind::Directory => fs::create_dir_all(&target).await,
                EntryKind::Symlink => copy_link(&entry.path, &target).await,
                EntryKind::Other => continue,
            };

            if let Err(e) = result {
                reporter.record(&SyncEvent::CreateFailed {
                    path: target,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Pass 3: overwrite stale replica files and re-point changed links
    pub async fn refresh(
        &self,
        source: &Snapshot,
        replica_root: &TreeRoot,
        reporter: &dyn OutcomeReporter,
    ) {
        for entry in &source.entries {
            let destination = replica_root.resolve(&entry.relative_path);
            match entry.kind {
                EntryKind::File => self.refresh_file(entry, &destination, reporter).await,
                EntryKind::Symlink => self.refresh_link(entry, &destination, reporter).await,
                EntryKind::Directory | EntryKind::Other => {}
            }
        }
    }

    async fn refresh_file(
        &self,
        entry: &FileEntry,
        destination: &Path,
        reporter: &dyn OutcomeReporter,
    ) {
        let comparison = match self.comparator.compare(&entry.path, destination).await {
            Ok(comparison) => comparison,
            Err(e) => {
                reporter.record(&SyncEvent::CopyFailed {
                    source: entry.path.clone(),
                    destination: destination.to_path_buf(),
                    error: e.to_string(),
                });
                return;
            }
        };

        if !comparison.needs_copy() {
            return;
        }
        debug!(path = %destination.display(), ?comparison, "Replica file is stale");

        reporter.record(&SyncEvent::Copying {
            source: entry.path.clone(),
            destination: destination.to_path_buf(),
        });

        if self.options.dry_run {
            return;
        }

        if let Err(e) = fs::copy(&entry.path, destination).await {
            reporter.record(&SyncEvent::CopyFailed {
                source: entry.path.clone(),
                destination: destination.to_path_buf(),
                error: e.to_string(),
            });
        }
    }

    async fn refresh_link(
        &self,
        entry: &FileEntry,
        destination: &Path,
        reporter: &dyn OutcomeReporter,
    ) {
        let source_target = match fs::read_link(&entry.path).await {
            Ok(target) => target,
            Err(e) => {
                reporter.record(&SyncEvent::CopyFailed {
                    source: entry.path.clone(),
                    destination: destination.to_path_buf(),
                    error: e.to_string(),
                });
                return;
            }
        };

        match fs::read_link(destination).await {
            Ok(replica_target) if replica_target == source_target => return,
            Ok(_) => {}
            Err(_) => {
                // creation already failed and was reported in the materialize pass
                if !exists(destination).await {
                    return;
                }
            }
        }

        reporter.record(&SyncEvent::Copying {
            source: entry.path.clone(),
            destination: destination.to_path_buf(),
        });

        if self.options.dry_run {
            return;
        }

        let result = match fs::remove_file(destination).await {
            Ok(()) => copy_link(&entry.path, destination).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            reporter.record(&SyncEvent::CopyFailed {
                source: entry.path.clone(),
                destination: destination.to_path_buf(),
                error: e.to_string(),
            });
        }
    }
}

/// Forwards events to the caller's reporter and keeps them for the report
struct CycleRecorder<'a> {
    sink: &'a dyn OutcomeReporter,
    report: Mutex<CycleReport>,
}

impl<'a> CycleRecorder<'a> {
    fn new(sink: &'a dyn OutcomeReporter) -> Self {
        Self {
            sink,
            report: Mutex::new(CycleReport::new()),
        }
    }

    fn cycle_id(&self) -> uuid::Uuid {
        self.report.lock().cycle_id
    }

    fn note_sizes(&self, source_entries: usize, replica_entries: usize) {
        let mut report = self.report.lock();
        report.stats.source_entries = source_entries;
        report.stats.replica_entries = replica_entries;
    }

    fn into_report(self) -> CycleReport {
        self.report.into_inner()
    }
}

impl OutcomeReporter for CycleRecorder<'_> {
    fn record(&self, event: &SyncEvent) {
        self.sink.record(event);
        self.report.lock().record(event.clone());
    }
}

/// Whether anything exists at `path`, dangling links included
async fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).await.is_ok()
}

/// Kind of the object at `path`, `None` when nothing is there
async fn entry_kind(path: &Path) -> io::Result<Option<EntryKind>> {
    match fs::symlink_metadata(path).await {
        Ok(metadata) => Ok(Some(EntryKind::from_file_type(metadata.file_type()))),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn remove_entry(entry: &FileEntry) -> io::Result<()> {
    match entry.kind {
        EntryKind::Directory => fs::remove_dir_all(&entry.path).await,
        EntryKind::File | EntryKind::Symlink | EntryKind::Other => {
            fs::remove_file(&entry.path).await
        }
    }
}

/// Empty placeholder at `target`, filled by the refresh pass.
///
/// An empty source is never recopied, so its permissions are applied here.
async fn create_file(source: &Path, target: &Path) -> io::Result<()> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await?;

    match fs::metadata(source).await {
        Ok(metadata) if metadata.len() == 0 => {
            fs::set_permissions(target, metadata.permissions()).await
        }
        _ => Ok(()),
    }
}

#[cfg(unix)]
async fn copy_link(source: &Path, destination: &Path) -> io::Result<()> {
    let target = fs::read_link(source).await?;
    fs::symlink(target, destination).await
}

#[cfg(not(unix))]
async fn copy_link(_source: &Path, _destination: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are only mirrored on unix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::NoopReporter;
    use tempfile::TempDir;

    struct Trees {
        _temp: TempDir,
        source: std::path::PathBuf,
        replica: std::path::PathBuf,
    }

    async fn trees() -> Trees {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let replica = temp.path().join("replica");
        fs::create_dir_all(&source).await.unwrap();
        fs::create_dir_all(&replica).await.unwrap();
        Trees {
            _temp: temp,
            source,
            replica,
        }
    }

    async fn snapshot(path: &Path) -> Snapshot {
        let root = TreeRoot::new(path).unwrap();
        DirectoryScanner::new().scan(&root, &NoopReporter).await.unwrap()
    }

    #[tokio::test]
    async fn test_prune_removes_directory_once() {
        let t = trees().await;
        fs::create_dir_all(t.replica.join("old").join("deep")).await.unwrap();
        fs::write(t.replica.join("old").join("deep").join("x.txt"), b"x").await.unwrap();

        let engine = SyncEngine::new(SyncOptions::default());
        let replica = snapshot(&t.replica).await;
        let source_root = TreeRoot::new(&t.source).unwrap();

        let recorder = CycleRecorder::new(&NoopReporter);
        engine.prune(&replica, &source_root, &recorder).await;
        let report = recorder.into_report();

        assert!(!t.replica.join("old").exists());
        // nested entries are covered by the directory removal
        assert_eq!(report.stats.deletions, 1);
        assert_eq!(report.stats.failures, 0);
    }

    #[tokio::test]
    async fn test_prune_replaces_kind_mismatch() {
        let t = trees().await;
        fs::create_dir(t.source.join("thing")).await.unwrap();
        fs::write(t.replica.join("thing"), b"was a file").await.unwrap();

        let engine = SyncEngine::new(SyncOptions::default());
        let replica = snapshot(&t.replica).await;
        let source_root = TreeRoot::new(&t.source).unwrap();
        engine.prune(&replica, &source_root, &NoopReporter).await;

        assert!(!t.replica.join("thing").exists());
    }

    #[tokio::test]
    async fn test_materialize_creates_empty_placeholders() {
        let t = trees().await;
        fs::create_dir(t.source.join("a")).await.unwrap();
        fs::write(t.source.join("a").join("b.txt"), b"0123456789").await.unwrap();

        let engine = SyncEngine::new(SyncOptions::default());
        let source = snapshot(&t.source).await;
        let replica_root = TreeRoot::new(&t.replica).unwrap();
        engine.materialize(&source, &replica_root, &NoopReporter).await;

        assert!(t.replica.join("a").is_dir());
        let placeholder = std::fs::metadata(t.replica.join("a").join("b.txt")).unwrap();
        assert!(placeholder.is_file());
        assert_eq!(placeholder.len(), 0);
    }

    #[tokio::test]
    async fn test_materialize_order_does_not_depend_on_snapshot_order() {
        let t = trees().await;
        fs::create_dir_all(t.source.join("x").join("y")).await.unwrap();
        fs::write(t.source.join("x").join("y").join("z.txt"), b"z").await.unwrap();

        let mut source = snapshot(&t.source).await;
        source.entries.reverse();

        let engine = SyncEngine::new(SyncOptions::default());
        let replica_root = TreeRoot::new(&t.replica).unwrap();
        let recorder = CycleRecorder::new(&NoopReporter);
        engine.materialize(&source, &replica_root, &recorder).await;

        assert_eq!(recorder.into_report().stats.failures, 0);
        assert!(t.replica.join("x").join("y").join("z.txt").is_file());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let t = trees().await;
        fs::write(t.source.join("new.txt"), b"new").await.unwrap();
        fs::write(t.replica.join("extra.txt"), b"extra").await.unwrap();

        let engine = SyncEngine::new(SyncOptions {
            dry_run: true,
            ..Default::default()
        });
        let report = engine.reconcile(&t.source, &t.replica, &NoopReporter).await.unwrap();

        assert!(t.replica.join("extra.txt").exists());
        assert!(!t.replica.join("new.txt").exists());
        assert_eq!(report.stats.deletions, 1);
        assert_eq!(report.stats.files_created, 1);
        assert_eq!(report.stats.copies, 1);
        assert_eq!(report.stats.failures, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_mirrored_as_links() {
        let t = trees().await;
        fs::write(t.source.join("target.txt"), b"data").await.unwrap();
        fs::symlink("target.txt", t.source.join("alias")).await.unwrap();
        fs::symlink("does-not-exist", t.source.join("dangling")).await.unwrap();

        let engine = SyncEngine::new(SyncOptions::default());
        let first = engine.reconcile(&t.source, &t.replica, &NoopReporter).await.unwrap();
        assert_eq!(first.stats.symlinks_created, 2);
        assert_eq!(first.stats.failures, 0);

        assert_eq!(
            std::fs::read_link(t.replica.join("alias")).unwrap(),
            Path::new("target.txt")
        );
        assert_eq!(
            std::fs::read_link(t.replica.join("dangling")).unwrap(),
            Path::new("does-not-exist")
        );

        // re-pointing the source link is picked up
        fs::remove_file(t.source.join("alias")).await.unwrap();
        fs::symlink("elsewhere.txt", t.source.join("alias")).await.unwrap();

        let second = engine.reconcile(&t.source, &t.replica, &NoopReporter).await.unwrap();
        assert_eq!(second.stats.copies, 1);
        assert_eq!(
            std::fs::read_link(t.replica.join("alias")).unwrap(),
            Path::new("elsewhere.txt")
        );

        let third = engine.reconcile(&t.source, &t.replica, &NoopReporter).await.unwrap();
        assert_eq!(third.mutations().count(), 0);
    }
}
