//! Stage orchestration for the Kara pipeline.
//!
//! Runs the fixed scrape -> load -> transform -> enrich chain, isolates each
//! stage's failure, skips everything downstream of a failure and records the
//! status of every stage.

pub mod error;
pub mod orchestrator;
pub mod stage;
pub mod stages;
pub mod state_machine;

pub use error::{OrchestratorError, StageError};
pub use orchestrator::Orchestrator;
pub use stage::{Stage, StageContext, StageOutcome, StageRegistry};
pub use stages::{default_registry, CommandStage, EnrichStage, LoadStage};
