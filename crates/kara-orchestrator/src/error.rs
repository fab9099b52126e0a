//! Error types for stage orchestration.

use kara_core::error::KaraError;
use kara_core::types::{StageName, StageState};

/// Aggregate failure of one stage. Halts downstream stages only.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Stage failed: {0}")]
    Failed(String),
    #[error("Stage cancelled")]
    Cancelled,
    #[error("Stage timed out after {0} seconds")]
    Timeout(u64),
    #[error("Storage error: {0}")]
    Storage(#[from] KaraError),
}

/// Errors in the orchestrator's own bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid stage transition: {0} -> {1}")]
    InvalidTransition(StageState, StageState),
    #[error("Stage not registered: {0}")]
    UnregisteredStage(StageName),
}
