//! Deciding whether a replica file is stale

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::error::{Result, SyncError};

/// Methods for deciding staleness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonMethod {
    /// Copy when the source is newer or the sizes differ
    #[default]
    SizeMtime,
    /// Copy when the sizes or the Blake3 digests differ
    Blake3,
    /// Copy when the sizes or the SHA-256 digests differ
    Sha256,
}

impl FromStr for ComparisonMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "size-mtime" => Ok(Self::SizeMtime),
            "blake3" => Ok(Self::Blake3),
            "sha256" => Ok(Self::Sha256),
            other => Err(format!(
                "unknown comparison method '{}' (expected size-mtime, blake3 or sha256)",
                other
            )),
        }
    }
}

impl fmt::Display for ComparisonMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonMethod::SizeMtime => write!(f, "size-mtime"),
            ComparisonMethod::Blake3 => write!(f, "blake3"),
            ComparisonMethod::Sha256 => write!(f, "sha256"),
        }
    }
}

/// Result of comparing a source file with its replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonResult {
    /// No copy needed
    UpToDate,
    /// Source modified more recently than the replica
    SourceNewer,
    DifferentSize,
    DifferentContent,
    /// Replica missing or unreadable
    ReplicaMissing,
}

impl ComparisonResult {
    pub fn needs_copy(&self) -> bool {
        !matches!(self, ComparisonResult::UpToDate)
    }
}

/// Size and modification time of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub modified: SystemTime,
}

impl FileStamp {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// The size+mtime staleness rule.
///
/// A same-size replica with an equal or newer mtime is considered current
/// even when its bytes differ.
pub fn quick_compare(source: &FileStamp, replica: &FileStamp) -> ComparisonResult {
    if source.modified > replica.modified {
        ComparisonResult::SourceNewer
    } else if source.size != replica.size {
        ComparisonResult::DifferentSize
    } else {
        ComparisonResult::UpToDate
    }
}

/// File comparator for the configured method
pub struct FileComparator {
    method: ComparisonMethod,
    buffer_size: usize,
}

impl FileComparator {
    pub fn new(method: ComparisonMethod) -> Self {
        Self {
            method,
            buffer_size: 64 * 1024,
        }
    }

    pub fn method(&self) -> ComparisonMethod {
        self.method
    }

    /// Compare a source file with its replica counterpart.
    ///
    /// Errors when the source cannot be read or when either side exists but
    /// is not a regular file. A missing or unreadable replica is reported as
    /// [`ComparisonResult::ReplicaMissing`].
    pub async fn compare(&self, source: &Path, replica: &Path) -> Result<ComparisonResult> {
        let source_metadata = fs::metadata(source).await.map_err(|e| {
            SyncError::path_error(source, format!("Failed to read source metadata: {}", e))
        })?;
        if !source_metadata.is_file() {
            return Err(SyncError::path_error(source, "source is not a regular file"));
        }

        let replica_metadata = match fs::symlink_metadata(replica).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                return Err(SyncError::path_error(
                    replica,
                    "replica exists but is not a regular file",
                ))
            }
            Err(_) => return Ok(ComparisonResult::ReplicaMissing),
        };

        let source_stamp = FileStamp::from_metadata(&source_metadata);
        let replica_stamp = FileStamp::from_metadata(&replica_metadata);

        match self.method {
            ComparisonMethod::SizeMtime => Ok(quick_compare(&source_stamp, &replica_stamp)),
            ComparisonMethod::Blake3 | ComparisonMethod::Sha256 => {
                if source_stamp.size != replica_stamp.size {
                    return Ok(ComparisonResult::DifferentSize);
                }
                let source_digest = self.digest(source).await?;
                let replica_digest = match self.digest(replica).await {
                    Ok(digest) => digest,
                    Err(_) => return Ok(ComparisonResult::ReplicaMissing),
                };
                if source_digest == replica_digest {
                    Ok(ComparisonResult::UpToDate)
                } else {
                    Ok(ComparisonResult::DifferentContent)
                }
            }
        }
    }

    /// Hex digest of a file with the configured algorithm
    pub async fn digest(&self, path: &Path) -> Result<String> {
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| SyncError::hash_error(path, format!("Failed to open file: {}", e)))?;

        let mut buffer = vec![0u8; self.buffer_size];

        match self.method {
            ComparisonMethod::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let bytes_read = file.read(&mut buffer).await.map_err(|e| {
                        SyncError::hash_error(path, format!("Failed to read file: {}", e))
                    })?;
                    if bytes_read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..bytes_read]);
                }
                Ok(format!("{:x}", hasher.finalize()))
            }
            ComparisonMethod::Blake3 | ComparisonMethod::SizeMtime => {
                let mut hasher = blake3::Hasher::new();
                loop {
                    let bytes_read = file.read(&mut buffer).await.map_err(|e| {
                        SyncError::hash_error(path, format!("Failed to read file: {}", e))
                    })?;
                    if bytes_read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..bytes_read]);
                }
                Ok(hasher.finalize().to_hex().to_string())
            }
        }
    }
}
