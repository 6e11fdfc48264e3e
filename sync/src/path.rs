//! Mapping paths between the source tree and the replica tree
//!
//! Snapshot entries carry their root-relative path, so the engine maps an
//! entry by joining that relative path under the other root. [`to_other`] is
//! the general form for absolute paths and strips the root component-wise
//! after both sides have been normalized, so `/data/src/` and `/data/src`
//! are the same root.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// A normalized, absolute tree root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeRoot {
    path: PathBuf,
}

impl TreeRoot {
    /// Normalize `path` into a tree root.
    ///
    /// Relative roots are resolved against the current directory. `.` and
    /// `..` components are folded lexically and trailing separators dropped;
    /// symbolic links are not resolved.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            path: normalize(path.as_ref())?,
        })
    }

    /// The normalized root path
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Location of a root-relative path inside this tree
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.as_os_str().is_empty() {
            self.path.clone()
        } else {
            self.path.join(relative)
        }
    }

    /// Path of `path` relative to this root
    pub fn relative_of<'a>(&self, path: &'a Path) -> Result<&'a Path> {
        path.strip_prefix(&self.path).map_err(|_| {
            SyncError::path_error(
                path,
                format!("path is not inside root '{}'", self.path.display()),
            )
        })
    }

    /// Whether one root lies inside the other (or they are the same)
    pub fn overlaps(&self, other: &TreeRoot) -> bool {
        self.path.starts_with(&other.path) || other.path.starts_with(&self.path)
    }
}

impl fmt::Display for TreeRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for TreeRoot {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Translate `path`, located under `from_root`, into the matching location
/// under `to_root`.
pub fn to_other(path: &Path, from_root: &Path, to_root: &Path) -> Result<PathBuf> {
    let path = normalize(path)?;
    let from = TreeRoot::new(from_root)?;
    let to = TreeRoot::new(to_root)?;

    let relative = from.relative_of(&path)?;
    Ok(to.resolve(relative))
}

/// Make `path` absolute and fold `.`/`..` without touching the filesystem
pub(crate) fn normalize(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(SyncError::path_error(path, "empty path"));
    }

    let absolute = std::path::absolute(path)
        .map_err(|e| SyncError::path_error(path, format!("Failed to make path absolute: {}", e)))?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // ".." at the root stays at the root
                if normalized.parent().is_some() {
                    normalized.pop();
                }
            }
            Component::Normal(name) => normalized.push(name),
        }
    }

    Ok(normalized)
}
