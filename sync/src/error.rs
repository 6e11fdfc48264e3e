//! Error types for the replica sync library

use std::path::PathBuf;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type for scanning, mapping and comparing replica trees.
///
/// Failures of individual mutations are not errors of this type: they are
/// reported as outcome events and the cycle carries on.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Path-related errors
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// Directory scanning errors
    #[error("Directory scan error at '{path}': {message}")]
    DirectoryScan { path: PathBuf, message: String },

    /// Hash computation errors
    #[error("Hash computation error for '{path}': {message}")]
    Hash { path: PathBuf, message: String },
}

impl SyncError {
    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new directory scan error
    pub fn scan_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DirectoryScan {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new hash error
    pub fn hash_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Hash {
            path: path.into(),
            message: message.into(),
        }
    }
}
