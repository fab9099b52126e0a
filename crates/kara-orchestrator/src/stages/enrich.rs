//! The enrich stage: classify media of loaded records.

use async_trait::async_trait;

use kara_core::types::StageName;
use kara_enrich::{EnrichError, EnrichmentLoader};

use crate::error::StageError;
use crate::stage::{Stage, StageContext, StageOutcome};

/// Fails only when loaded records cannot be read. Per-file classifier
/// failures are counted in the report.
pub struct EnrichStage {
    loader: EnrichmentLoader,
}

impl EnrichStage {
    pub fn new(loader: EnrichmentLoader) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl Stage for EnrichStage {
    fn name(&self) -> StageName {
        StageName::Enrich
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let refs = self.loader.loaded_media_refs()?;
        match self.loader.enrich(refs, &ctx.cancel).await {
            Ok(report) => Ok(StageOutcome::new(report.to_string())),
            Err(EnrichError::Cancelled) => Err(StageError::Cancelled),
            Err(EnrichError::Storage(e)) => Err(StageError::Storage(e)),
        }
    }
}
