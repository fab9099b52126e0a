//! Image enrichment: classify media referenced by loaded records and store
//! one deduplicated detection row per detected class.

pub mod classifier;
pub mod enrichment;
pub mod error;

pub use classifier::{Classifier, CommandClassifier};
pub use enrichment::{confidence_bucket, EnrichmentLoader};
pub use error::{ClassifierError, EnrichError};
