//! Error types for enrichment.

use std::time::Duration;

use kara_core::error::KaraError;

/// A single classifier invocation failed. Counted, never fatal to a pass.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Failed to start classifier: {0}")]
    Spawn(String),
    #[error("Classifier exited with {0}")]
    Exit(String),
    #[error("Malformed classifier output: {0}")]
    Output(String),
    #[error("Classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("Media file missing: {0}")]
    MissingMedia(String),
}

/// Errors that end an enrichment pass.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("Enrichment cancelled")]
    Cancelled,
    #[error("Storage error: {0}")]
    Storage(#[from] KaraError),
}
