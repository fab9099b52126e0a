//! CLI argument definitions for the Kara pipeline.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kara_core::config::KaraConfig;
use kara_core::types::StageName;

/// Kara: scrape, load, transform and enrich a partitioned raw data lake.
#[derive(Parser, Debug)]
#[command(name = "kara", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file.
    #[arg(long = "db", global = true)]
    pub db: Option<PathBuf>,

    /// Root of the raw data lake.
    #[arg(long = "raw-root", global = true)]
    pub raw_root: Option<PathBuf>,

    /// Source to load (repeatable). Replaces the configured source list.
    #[arg(long = "source", global = true)]
    pub sources: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run scrape -> load -> transform -> enrich.
    Run,
    /// Run a single stage.
    Stage {
        /// scrape, load, transform or enrich.
        name: StageName,
    },
    /// Show recent pipeline runs.
    Status {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Read-only queries over loaded records.
    Query {
        #[command(subcommand)]
        query: QueryCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum QueryCommand {
    /// Most frequent words longer than three characters.
    TopTerms {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Total and per-day record counts of one source.
    Activity { source: String },
    /// Case-insensitive substring search, newest first.
    Search {
        text: String,
        #[arg(long, default_value_t = kara_storage::queries::MAX_SEARCH_RESULTS)]
        limit: usize,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > KARA_CONFIG env var > ./kara.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.resolve_config_path_with(|k| std::env::var(k).ok())
    }

    fn resolve_config_path_with(&self, env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = env("KARA_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("kara.toml")
    }

    /// Apply flag and environment overrides on top of the loaded config.
    pub fn apply_overrides(&self, config: &mut KaraConfig) {
        self.apply_overrides_with(config, |k| std::env::var(k).ok());
    }

    fn apply_overrides_with(&self, config: &mut KaraConfig, env: impl Fn(&str) -> Option<String>) {
        if let Some(db) = self.db.clone().or_else(|| env("KARA_DB").map(PathBuf::from)) {
            config.storage.endpoint = db;
        }
        if let Some(root) = self
            .raw_root
            .clone()
            .or_else(|| env("KARA_RAW_ROOT").map(PathBuf::from))
        {
            config.lake.raw_root = root;
        }
        if !self.sources.is_empty() {
            config.lake.sources = self.sources.clone();
        }
        if let Some(level) = self.log_level.clone().or_else(|| env("KARA_LOG")) {
            config.general.log_level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("kara").chain(args.iter().copied())).unwrap()
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn test_parse_subcommands() {
        assert!(matches!(parse(&["run"]).command, Command::Run));
        assert!(matches!(
            parse(&["stage", "transform"]).command,
            Command::Stage { name: StageName::Transform }
        ));
        assert!(matches!(parse(&["status"]).command, Command::Status { limit: 10 }));
        assert!(matches!(
            parse(&["query", "search", "Dog"]).command,
            Command::Query { query: QueryCommand::Search { ref text, limit: 50 } } if text == "Dog"
        ));
    }

    #[test]
    fn test_unknown_stage_rejected() {
        assert!(CliArgs::try_parse_from(["kara", "stage", "deploy"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&["run", "--source", "chemed", "--source", "lobelia", "--db", "/tmp/k.db"]);
        assert_eq!(args.sources, vec!["chemed", "lobelia"]);
        assert_eq!(args.db, Some(PathBuf::from("/tmp/k.db")));
    }

    #[test]
    fn test_config_path_priority() {
        let args = parse(&["--config", "/etc/kara.toml", "run"]);
        let env = env_of(&[("KARA_CONFIG", "/env/kara.toml")]);
        assert_eq!(args.resolve_config_path_with(&env), PathBuf::from("/etc/kara.toml"));

        let args = parse(&["run"]);
        assert_eq!(args.resolve_config_path_with(&env), PathBuf::from("/env/kara.toml"));
        assert_eq!(args.resolve_config_path_with(env_of(&[])), PathBuf::from("kara.toml"));
    }

    #[test]
    fn test_flag_beats_env_beats_file() {
        let mut config = KaraConfig::default();
        config.storage.endpoint = PathBuf::from("/file/kara.db");
        config.lake.raw_root = PathBuf::from("/file/raw");
        config.lake.sources = vec!["from_file".into()];

        let env = env_of(&[
            ("KARA_DB", "/env/kara.db"),
            ("KARA_RAW_ROOT", "/env/raw"),
            ("KARA_LOG", "debug"),
        ]);
        let args = parse(&["--db", "/flag/kara.db", "run"]);
        args.apply_overrides_with(&mut config, &env);

        assert_eq!(config.storage.endpoint, PathBuf::from("/flag/kara.db"));
        assert_eq!(config.lake.raw_root, PathBuf::from("/env/raw"));
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.lake.sources, vec!["from_file"]);
    }

    #[test]
    fn test_no_overrides_keeps_file_values() {
        let mut config = KaraConfig::default();
        config.general.log_level = "warn".into();
        parse(&["status"]).apply_overrides_with(&mut config, env_of(&[]));
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.storage.endpoint, KaraConfig::default().storage.endpoint);
    }
}
