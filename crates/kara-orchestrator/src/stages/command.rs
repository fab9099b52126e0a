//! Stages backed by external commands: scrape and transform.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use kara_core::config::StagesConfig;
use kara_core::types::StageName;

use crate::error::StageError;
use crate::stage::{Stage, StageContext, StageOutcome};

/// Runs a list of commands in order; the first failure fails the stage.
///
/// An empty list succeeds without doing anything.
#[derive(Debug, Clone)]
pub struct CommandStage {
    name: StageName,
    commands: Vec<Vec<String>>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandStage {
    pub fn new(name: StageName, commands: Vec<Vec<String>>, timeout: Duration) -> Self {
        Self {
            name,
            commands,
            working_dir: None,
            timeout,
        }
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// The scrape stage: the configured scraper, if any.
    pub fn scrape(config: &StagesConfig) -> Self {
        Self::new(
            StageName::Scrape,
            config.scrape_command.iter().cloned().collect(),
            Duration::from_secs(config.command_timeout_secs),
        )
        .with_working_dir(config.working_dir.clone())
    }

    /// The transform stage: every transformation command in order.
    pub fn transform(config: &StagesConfig) -> Self {
        Self::new(
            StageName::Transform,
            config.transform_commands.clone(),
            Duration::from_secs(config.command_timeout_secs),
        )
        .with_working_dir(config.working_dir.clone())
    }

    async fn run_command(&self, argv: &[String], ctx: &StageContext) -> Result<(), StageError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| StageError::Failed("empty command".to_string()))?;

        let mut command = tokio::process::Command::new(program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| StageError::Failed(format!("failed to start {}: {}", program, e)))?;

        // Dropping `child` on cancel or timeout kills the process.
        let status = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(StageError::Cancelled),
            waited = tokio::time::timeout(self.timeout, child.wait()) => match waited {
                Ok(status) => status.map_err(|e| StageError::Failed(e.to_string()))?,
                Err(_) => return Err(StageError::Timeout(self.timeout.as_secs())),
            },
        };

        if status.success() {
            Ok(())
        } else {
            Err(StageError::Failed(format!("`{}` exited with {}", argv.join(" "), status)))
        }
    }
}

#[async_trait]
impl Stage for CommandStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        if self.commands.is_empty() {
            info!(stage = %self.name, "No command configured, nothing to run");
            return Ok(StageOutcome::new("no command configured"));
        }

        for argv in &self.commands {
            if ctx.cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            info!(stage = %self.name, run_id = %ctx.run_id, command = %argv.join(" "), "Running command");
            self.run_command(argv, ctx).await?;
        }
        Ok(StageOutcome::new(format!("{} command(s) succeeded", self.commands.len())))
    }
}
