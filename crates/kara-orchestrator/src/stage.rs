//! The uniform stage boundary and the stage registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kara_core::types::StageName;

use crate::error::StageError;

/// What a stage sees of the run it belongs to.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: Uuid,
    /// Run-level cancellation; stages check it between records or files.
    pub cancel: CancellationToken,
}

impl StageContext {
    pub fn new(run_id: Uuid, cancel: CancellationToken) -> Self {
        Self { run_id, cancel }
    }
}

/// Successful result of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    /// Human-readable summary, e.g. a load report.
    pub summary: String,
}

impl StageOutcome {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
        }
    }
}

/// One unit of the pipeline.
///
/// The orchestrator never looks inside a stage: it only sees the outcome or
/// the error.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError>;
}

/// Registry mapping each stage name to its implementation.
#[derive(Default)]
pub struct StageRegistry {
    stages: HashMap<StageName, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage, replacing any previous stage with the same name.
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.name(), stage);
    }

    pub fn get(&self, name: StageName) -> Option<Arc<dyn Stage>> {
        self.stages.get(&name).cloned()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
