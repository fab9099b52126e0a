use thiserror::Error;

/// Top-level error type for the Kara pipeline.
///
/// Subsystem crates define their own error types for record- and stage-level
/// failures and wrap `KaraError` where they touch configuration or storage,
/// so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KaraError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl From<toml::de::Error> for KaraError {
    fn from(err: toml::de::Error) -> Self {
        KaraError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for KaraError {
    fn from(err: serde_json::Error) -> Self {
        KaraError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Kara operations.
pub type Result<T> = std::result::Result<T, KaraError>;
