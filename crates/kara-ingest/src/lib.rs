//! Raw data lake ingestion: partition scanning, record normalization and
//! idempotent loading into per-source tables.

pub mod error;
pub mod lake;
pub mod loader;
pub mod normalizer;
pub mod scanner;

pub use error::{LoadError, NormalizationError, ScanError};
pub use lake::{LakeLoadSummary, LakeLoader};
pub use loader::IdempotentLoader;
pub use normalizer::RecordNormalizer;
pub use scanner::{FileKind, PartitionScanner, ScannedFile};
