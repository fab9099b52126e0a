//! Kara application binary - composition root.
//!
//! Ties the Kara crates into a single executable:
//! 1. Resolve configuration (flags > env > TOML file > defaults)
//! 2. Initialise logging
//! 3. Open the SQLite store
//! 4. Dispatch the subcommand: a pipeline run, a single stage, run status,
//!    or a read-only query

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use kara_core::config::KaraConfig;
use kara_core::error::KaraError;
use kara_core::types::RunState;
use kara_orchestrator::{default_registry, Orchestrator};
use kara_storage::{Database, QueryService, RunRepository};

use cli::{CliArgs, Command, QueryCommand};

/// Cancel the token on Ctrl-C so the running stage can stop cleanly.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), KaraError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn dispatch(command: Command, config: &KaraConfig, db: Arc<Database>) -> Result<bool, KaraError> {
    match command {
        Command::Run => {
            let runs = Arc::new(RunRepository::new(Arc::clone(&db)));
            let orchestrator =
                Orchestrator::new(default_registry(config, Arc::clone(&db))).with_recorder(runs);
            let run = orchestrator.run_pipeline(&cancel_on_ctrl_c()).await;

            println!("run {} {}", run.run_id, run.state);
            for stage in &run.stages {
                let detail = stage
                    .error
                    .as_deref()
                    .or(stage.summary.as_deref())
                    .unwrap_or("");
                println!(
                    "  {:<10} {:<10} {}",
                    stage.stage_name.to_string(),
                    stage.state.to_string(),
                    detail
                );
            }
            Ok(run.state == RunState::Succeeded)
        }
        Command::Stage { name } => {
            let orchestrator = Orchestrator::new(default_registry(config, db));
            let result = orchestrator.execute_stage(name, &cancel_on_ctrl_c()).await;
            print_json(&result)?;
            Ok(result.success)
        }
        Command::Status { limit } => {
            let runs = RunRepository::new(db).recent(limit)?;
            if runs.is_empty() {
                println!("no pipeline runs recorded");
            }
            for run in &runs {
                let stages: Vec<String> = run
                    .stages
                    .iter()
                    .map(|s| format!("{}={}", s.stage_name, s.state))
                    .collect();
                println!(
                    "{} {} {:<10} {}",
                    run.started_at.to_datetime().format("%Y-%m-%d %H:%M:%S"),
                    run.run_id,
                    run.state.to_string(),
                    stages.join(" ")
                );
            }
            Ok(true)
        }
        Command::Query { query } => {
            let queries = QueryService::new(db);
            match query {
                QueryCommand::TopTerms { limit } => print_json(&queries.top_terms(limit)?)?,
                QueryCommand::Activity { source } => match queries.source_activity(&source)? {
                    Some(activity) => print_json(&activity)?,
                    None => {
                        println!("no records loaded for source {}", source);
                        return Ok(false);
                    }
                },
                QueryCommand::Search { text, limit } => print_json(&queries.search(&text, limit)?)?,
            }
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = match KaraConfig::load_optional(&config_file) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("kara: {}: {}", config_file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    args.apply_overrides(&mut config);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Kara v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    // Storage.
    let db = match Database::from_config(&config.storage) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!(path = %config.storage.endpoint.display(), error = %e, "Failed to open database");
            return ExitCode::FAILURE;
        }
    };

    match dispatch(args.command, &config, db).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}
