//! Tree snapshots using walkdir

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::path::TreeRoot;
use crate::report::{OutcomeReporter, SyncEvent};

/// Kind of a scanned filesystem object, fixed at scan time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    /// A symbolic link, never followed
    Symlink,
    /// FIFO, socket or device node. Never created or copied into a replica.
    Other,
}

impl EntryKind {
    /// Kind of an on-disk object, as seen without following links
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Directory => write!(f, "directory"),
            EntryKind::Symlink => write!(f, "symlink"),
            EntryKind::Other => write!(f, "special file"),
        }
    }
}

/// One object discovered in a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Absolute path to the object
    pub path: PathBuf,
    /// Path relative to the scan root
    pub relative_path: PathBuf,
    pub kind: EntryKind,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Every entry found by one traversal of one root
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub root: TreeRoot,
    pub entries: Vec<FileEntry>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::File)
    }

    pub fn get(&self, relative_path: impl AsRef<Path>) -> Option<&FileEntry> {
        let relative_path = relative_path.as_ref();
        self.entries.iter().find(|e| e.relative_path == relative_path)
    }
}

/// Recursive tree walker producing [`Snapshot`]s
#[derive(Debug, Default, Clone)]
pub struct DirectoryScanner;

impl DirectoryScanner {
    pub fn new() -> Self {
        Self
    }

    /// Snapshot everything below `root`.
    ///
    /// Fails only when `root` itself is missing or not a directory. Subtrees
    /// that cannot be read are reported as [`SyncEvent::ScanFailed`] and left
    /// out of the snapshot. Special files are listed as [`EntryKind::Other`].
    pub async fn scan(&self, root: &TreeRoot, reporter: &dyn OutcomeReporter) -> Result<Snapshot> {
        let metadata = tokio::fs::metadata(root.as_path()).await.map_err(|e| {
            SyncError::path_error(root.as_path(), format!("Failed to read root: {}", e))
        })?;

        if !metadata.is_dir() {
            return Err(SyncError::path_error(root.as_path(), "Path is not a directory"));
        }

        let walk_root = root.clone();
        let (entries, failures) = tokio::task::spawn_blocking(move || walk(&walk_root))
            .await
            .map_err(|e| SyncError::scan_error(root.as_path(), format!("Scan task failed: {}", e)))?;

        for failure in &failures {
            reporter.record(failure);
        }

        tracing::debug!(
            root = %root,
            entries = entries.len(),
            unreadable = failures.len(),
            "Scanned tree"
        );

        Ok(Snapshot {
            root: root.clone(),
            entries,
        })
    }
}

fn walk(root: &TreeRoot) -> (Vec<FileEntry>, Vec<SyncEvent>) {
    let mut entries = Vec::new();
    let mut failures = Vec::new();

    let walker = WalkDir::new(root.as_path())
        .min_depth(1)
        .follow_links(false);

    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                // walkdir skips the unreadable directory and carries on
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.as_path().to_path_buf());
                failures.push(SyncEvent::ScanFailed {
                    path,
                    error: e.to_string(),
                });
                continue;
            }
        };

        let kind = EntryKind::from_file_type(entry.file_type());

        let relative_path = match root.relative_of(entry.path()) {
            Ok(relative) => relative.to_path_buf(),
            Err(e) => {
                failures.push(SyncEvent::ScanFailed {
                    path: entry.path().to_path_buf(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        entries.push(FileEntry {
            path: entry.into_path(),
            relative_path,
            kind,
        });
    }

    (entries, failures)
}
