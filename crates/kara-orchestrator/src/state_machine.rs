//! Stage state machine with validated transitions.
//!
//! Pending -> Running -> Succeeded/Failed/Cancelled
//! Pending -> Skipped

use kara_core::types::{StageState, StageStatus, Timestamp};

use crate::error::OrchestratorError;

/// Validate that a stage state transition is allowed.
///
/// Valid transitions:
/// - Pending -> Running
/// - Pending -> Skipped (an upstream stage did not succeed)
/// - Running -> Succeeded
/// - Running -> Failed
/// - Running -> Cancelled
pub fn validate_transition(from: StageState, to: StageState) -> Result<(), OrchestratorError> {
    let valid = matches!(
        (from, to),
        (StageState::Pending, StageState::Running)
            | (StageState::Pending, StageState::Skipped)
            | (StageState::Running, StageState::Succeeded)
            | (StageState::Running, StageState::Failed)
            | (StageState::Running, StageState::Cancelled)
    );

    if valid {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidTransition(from, to))
    }
}

/// Move a stage to `to`, stamping `started_at` on entering `Running` and
/// `ended_at` on entering a terminal state.
pub fn transition(status: &mut StageStatus, to: StageState) -> Result<(), OrchestratorError> {
    validate_transition(status.state, to)?;
    let now = Timestamp::now();
    if to == StageState::Running {
        status.started_at = Some(now);
    }
    if to.is_terminal() {
        status.ended_at = Some(now);
    }
    status.state = to;
    Ok(())
}
