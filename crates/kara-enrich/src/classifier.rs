//! Classifier boundary.
//!
//! The object-detection model is a black box: given a media file it returns
//! a list of `{class_label, confidence}`. [`CommandClassifier`] runs it as an
//! external program.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use kara_core::config::ClassifierConfig;
use kara_core::types::Detection;

use crate::error::ClassifierError;

/// Side-effect-free media classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, media: &Path) -> Result<Vec<Detection>, ClassifierError>;
}

/// Runs a command with the media path appended as its last argument and
/// reads a JSON array of detections from its stdout.
///
/// The whole invocation, including draining stdout, is bounded by the
/// timeout. The process is killed when the timeout fires.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandClassifier {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.endpoint.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    async fn classify(&self, media: &Path) -> Result<Vec<Detection>, ClassifierError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ClassifierError::Spawn("empty classifier command".into()))?;

        let child = Command::new(program)
            .args(args)
            .arg(media)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClassifierError::Spawn(format!("{}: {}", program, e)))?;

        // Dropping the pending future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ClassifierError::Timeout(self.timeout))?
            .map_err(|e| ClassifierError::Output(e.to_string()))?;

        if !output.status.success() {
            return Err(ClassifierError::Exit(output.status.to_string()));
        }

        let detections: Vec<Detection> = serde_json::from_slice(&output.stdout)
            .map_err(|e| ClassifierError::Output(e.to_string()))?;
        debug!(media = %media.display(), count = detections.len(), "Classifier returned");
        Ok(detections)
    }
}
