//! The load stage: the whole raw lake into per-source tables.

use async_trait::async_trait;
use tracing::info;

use kara_core::types::StageName;
use kara_ingest::{LakeLoader, LoadError};

use crate::error::StageError;
use crate::stage::{Stage, StageContext, StageOutcome};

/// Fails when the raw root is unreadable or a source could not be loaded
/// at all. Record-level failures only show up in the report.
pub struct LoadStage {
    lake: LakeLoader,
}

impl LoadStage {
    pub fn new(lake: LakeLoader) -> Self {
        Self { lake }
    }
}

#[async_trait]
impl Stage for LoadStage {
    fn name(&self) -> StageName {
        StageName::Load
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let summary = match self.lake.load_all(&ctx.cancel).await {
            Ok(summary) => summary,
            Err(LoadError::Cancelled) => return Err(StageError::Cancelled),
            Err(LoadError::Storage(e)) => return Err(StageError::Storage(e)),
            Err(e) => return Err(StageError::Failed(e.to_string())),
        };

        info!(run_id = %ctx.run_id, report = %summary.report, "Lake loaded");

        if !summary.is_clean() {
            let failed: Vec<String> = summary
                .source_errors
                .iter()
                .map(|(source, reason)| format!("{}: {}", source, reason))
                .collect();
            return Err(StageError::Failed(format!(
                "{} source(s) not loaded ({}); {}",
                failed.len(),
                failed.join("; "),
                summary.report
            )));
        }
        Ok(StageOutcome::new(summary.report.to_string()))
    }
}
