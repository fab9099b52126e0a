//! Error types for lake ingestion.

use std::path::PathBuf;

use kara_core::error::KaraError;

/// Errors from walking the raw data lake.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Cannot read {}: {source}", .path.display())]
    IoAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A raw record file that could not be turned into a normalized record.
///
/// Never fatal to a batch: the caller counts it as failed and moves on.
#[derive(Debug, thiserror::Error)]
#[error("Cannot normalize {}: {reason}", .file_path.display())]
pub struct NormalizationError {
    pub reason: String,
    pub file_path: PathBuf,
}

impl NormalizationError {
    pub fn new(file_path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            file_path: file_path.into(),
        }
    }
}

/// Errors that stop a load as a whole rather than a single record.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Load cancelled")]
    Cancelled,
    #[error("Load worker failed: {0}")]
    Worker(String),
    #[error("Storage error: {0}")]
    Storage(#[from] KaraError),
}
