//! Stage orchestrator.
//!
//! Executes the fixed stage chain strictly in order. A stage runs only when
//! its dependency succeeded; otherwise it is skipped. The first stage that
//! does not succeed therefore ends the run, which is failed (or cancelled).
//! Stages that already succeeded keep their status; nothing is rolled back.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use kara_core::types::{PipelineRun, RunState, StageName, StageResult, StageState, Timestamp};
use kara_storage::RunRepository;

use crate::error::{OrchestratorError, StageError};
use crate::stage::{StageContext, StageOutcome, StageRegistry};
use crate::state_machine::transition;

/// Runs the pipeline and owns its [`PipelineRun`] for one invocation.
pub struct Orchestrator {
    registry: StageRegistry,
    recorder: Option<Arc<RunRepository>>,
}

impl Orchestrator {
    pub fn new(registry: StageRegistry) -> Self {
        Self {
            registry,
            recorder: None,
        }
    }

    /// Persist the run after every stage transition.
    pub fn with_recorder(mut self, recorder: Arc<RunRepository>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Run scrape -> load -> transform -> enrich.
    pub async fn run_pipeline(&self, cancel: &CancellationToken) -> PipelineRun {
        let mut run = PipelineRun::new();
        info!(run_id = %run.run_id, "Pipeline run started");
        self.record(&run);

        let mut halted: Option<RunState> = None;
        for name in StageName::ALL {
            if let Some(upstream) = name.dependency() {
                let upstream_state = run.state_of(upstream);
                if upstream_state != Some(StageState::Succeeded) {
                    info!(
                        run_id = %run.run_id,
                        stage = %name,
                        upstream = %upstream,
                        upstream_state = ?upstream_state,
                        "Stage skipped"
                    );
                    self.set_state(&mut run, name, StageState::Skipped);
                    continue;
                }
            }

            self.set_state(&mut run, name, StageState::Running);
            info!(run_id = %run.run_id, stage = %name, "Stage started");

            let result = if cancel.is_cancelled() {
                Err(StageError::Cancelled)
            } else {
                self.run_stage(name, StageContext::new(run.run_id, cancel.clone()))
                    .await
            };

            match result {
                Ok(outcome) => {
                    info!(run_id = %run.run_id, stage = %name, summary = %outcome.summary, "Stage succeeded");
                    if let Some(status) = run.stage_mut(name) {
                        status.summary = Some(outcome.summary);
                    }
                    self.set_state(&mut run, name, StageState::Succeeded);
                }
                Err(StageError::Cancelled) => {
                    warn!(run_id = %run.run_id, stage = %name, "Stage cancelled");
                    if let Some(status) = run.stage_mut(name) {
                        status.error = Some(StageError::Cancelled.to_string());
                    }
                    self.set_state(&mut run, name, StageState::Cancelled);
                    halted = Some(RunState::Cancelled);
                }
                Err(e) => {
                    error!(run_id = %run.run_id, stage = %name, error = %e, "Stage failed");
                    if let Some(status) = run.stage_mut(name) {
                        status.error = Some(e.to_string());
                    }
                    self.set_state(&mut run, name, StageState::Failed);
                    halted = Some(RunState::Failed);
                }
            }
        }

        run.state = halted.unwrap_or(RunState::Succeeded);
        run.ended_at = Some(Timestamp::now());
        self.record(&run);
        info!(run_id = %run.run_id, state = %run.state, "Pipeline run finished");
        run
    }

    /// Run a single stage outside of a pipeline run.
    pub async fn execute_stage(&self, name: StageName, cancel: &CancellationToken) -> StageResult {
        let ctx = StageContext::new(Uuid::new_v4(), cancel.clone());
        info!(run_id = %ctx.run_id, stage = %name, "Executing single stage");
        match self.run_stage(name, ctx).await {
            Ok(outcome) => {
                info!(stage = %name, summary = %outcome.summary, "Stage succeeded");
                StageResult {
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                error!(stage = %name, error = %e, "Stage failed");
                StageResult {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Execute a stage on its own task so a panic is contained as a
    /// failure of that stage.
    async fn run_stage(&self, name: StageName, ctx: StageContext) -> Result<StageOutcome, StageError> {
        let stage = self
            .registry
            .get(name)
            .ok_or_else(|| StageError::Failed(OrchestratorError::UnregisteredStage(name).to_string()))?;

        tokio::spawn(async move { stage.execute(&ctx).await })
            .await
            .map_err(|e| StageError::Failed(format!("stage task aborted: {}", e)))?
    }

    fn set_state(&self, run: &mut PipelineRun, name: StageName, to: StageState) {
        match run.stage_mut(name) {
            Some(status) => {
                if let Err(e) = transition(status, to) {
                    error!(run_id = %run.run_id, stage = %name, error = %e, "Rejected stage transition");
                    return;
                }
            }
            None => return,
        }
        self.record(run);
    }

    fn record(&self, run: &PipelineRun) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.save(run) {
                warn!(run_id = %run.run_id, error = %e, "Failed to record pipeline run");
            }
        }
    }
}
