use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{KaraError, Result};

/// Top-level configuration for the Kara pipeline.
///
/// Loaded from `kara.toml` by default and passed explicitly to every
/// component at construction. Each section corresponds to one component
/// boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KaraConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub lake: LakeConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl KaraConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KaraConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file if it exists.
    ///
    /// A missing file yields defaults. A file that exists but cannot be
    /// read or parsed is an error, never a silent fallback.
    pub fn load_optional(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No configuration file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.endpoint.as_os_str().is_empty() {
            return Err(KaraError::Config("storage.endpoint must not be empty".into()));
        }
        if self.runtime.workers == 0 {
            return Err(KaraError::Config("runtime.workers must be at least 1".into()));
        }
        if self.runtime.read_timeout_secs == 0
            || self.classifier.timeout_secs == 0
            || self.stages.command_timeout_secs == 0
        {
            return Err(KaraError::Config("timeouts must be greater than zero".into()));
        }
        let g = self.classifier.confidence_granularity;
        if !(g > 0.0 && g <= 1.0) {
            return Err(KaraError::Config(format!(
                "classifier.confidence_granularity must be in (0, 1], got {}",
                g
            )));
        }
        if self.classifier.endpoint.is_empty() {
            return Err(KaraError::Config("classifier.endpoint must not be empty".into()));
        }
        if matches!(&self.stages.scrape_command, Some(cmd) if cmd.is_empty())
            || self.stages.transform_commands.iter().any(|c| c.is_empty())
        {
            return Err(KaraError::Config("stage commands must not be empty".into()));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub endpoint: PathBuf,
    /// How long a write waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: PathBuf::from("data/kara.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Partitioned raw data lake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LakeConfig {
    /// Root of `<partition_key>/<source_id>/<file>`.
    pub raw_root: PathBuf,
    /// Sources to load. Empty means every source found on disk.
    pub sources: Vec<String>,
    /// Extensions of structured record files (case-insensitive).
    pub record_extensions: Vec<String>,
    /// Extensions of media files (case-insensitive).
    pub media_extensions: Vec<String>,
}

impl Default for LakeConfig {
    fn default() -> Self {
        Self {
            raw_root: PathBuf::from("data/raw"),
            sources: Vec::new(),
            record_extensions: vec!["json".to_string()],
            media_extensions: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "webp".to_string(),
            ],
        }
    }
}

/// External image classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Command vector; the media path is appended as the last argument.
    pub endpoint: Vec<String>,
    /// Upper bound on a single classification.
    pub timeout_secs: u64,
    /// Width of a confidence bucket in the detection uniqueness key.
    pub confidence_granularity: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: vec!["kara-detect".to_string()],
            timeout_secs: 60,
            confidence_granularity: 0.01,
        }
    }
}

/// External scrape and transform stage commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    /// Scraper command. When unset the scrape stage succeeds without work.
    pub scrape_command: Option<Vec<String>>,
    /// Transformation commands, run in order; the first failure stops the stage.
    pub transform_commands: Vec<Vec<String>>,
    /// Working directory for stage commands.
    pub working_dir: Option<PathBuf>,
    /// Upper bound on each stage command.
    pub command_timeout_secs: u64,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            scrape_command: None,
            transform_commands: vec![
                vec!["dbt".to_string(), "run".to_string()],
                vec!["dbt".to_string(), "test".to_string()],
            ],
            working_dir: None,
            command_timeout_secs: 1_800,
        }
    }
}

/// Worker pool and I/O bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Concurrent file reads / classifier calls.
    pub workers: usize,
    /// Upper bound on reading and parsing one raw file.
    pub read_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            read_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = KaraConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.storage.endpoint, PathBuf::from("data/kara.db"));
        assert_eq!(config.lake.raw_root, PathBuf::from("data/raw"));
        assert!(config.lake.sources.is_empty());
        assert_eq!(config.classifier.confidence_granularity, 0.01);
        assert_eq!(config.stages.transform_commands.len(), 2);
        assert!(config.stages.scrape_command.is_none());
        assert_eq!(config.runtime.workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(
            r#"
            [storage]
            endpoint = "/tmp/lake.db"

            [lake]
            raw_root = "/srv/raw"
            sources = ["chemed", "lobelia"]

            [classifier]
            endpoint = ["python", "detect.py"]
            confidence_granularity = 0.05

            [stages]
            scrape_command = ["python", "scrape.py"]
            transform_commands = [["dbt", "build"]]
            "#,
        );

        let config = KaraConfig::load(file.path()).unwrap();
        assert_eq!(config.storage.endpoint, PathBuf::from("/tmp/lake.db"));
        assert_eq!(config.lake.raw_root, PathBuf::from("/srv/raw"));
        assert_eq!(config.lake.sources, vec!["chemed", "lobelia"]);
        assert_eq!(config.classifier.endpoint, vec!["python", "detect.py"]);
        assert_eq!(config.classifier.confidence_granularity, 0.05);
        assert_eq!(
            config.stages.scrape_command,
            Some(vec!["python".to_string(), "scrape.py".to_string()])
        );
        assert_eq!(config.stages.transform_commands, vec![vec!["dbt", "build"]]);
        // Untouched sections keep their defaults.
        assert_eq!(config.runtime.workers, 4);
        assert_eq!(config.lake.record_extensions, vec!["json"]);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = KaraConfig::load(file.path()).unwrap();
        assert_eq!(config.storage.busy_timeout_ms, 5_000);
        assert_eq!(config.stages.command_timeout_secs, 1_800);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is not [valid toml");
        let err = KaraConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, KaraError::Config(_)));
    }

    #[test]
    fn test_load_optional_missing_file_uses_defaults() {
        let config = KaraConfig::load_optional(Path::new("/nonexistent/kara.toml")).unwrap();
        assert_eq!(config.runtime.read_timeout_secs, 30);
    }

    #[test]
    fn test_load_optional_broken_file_is_an_error() {
        let file = create_temp_config("[runtime]\nworkers = \"many\"");
        let err = KaraConfig::load_optional(file.path()).unwrap_err();
        assert!(matches!(err, KaraError::Config(_)));
    }

    #[test]
    fn test_load_optional_existing_file() {
        let file = create_temp_config("[runtime]\nworkers = 8");
        let config = KaraConfig::load_optional(file.path()).unwrap();
        assert_eq!(config.runtime.workers, 8);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = KaraConfig::default();
        config.runtime.workers = 0;
        assert!(matches!(config.validate(), Err(KaraError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_granularity() {
        let mut config = KaraConfig::default();
        config.classifier.confidence_granularity = 0.0;
        assert!(config.validate().is_err());
        config.classifier.confidence_granularity = 1.5;
        assert!(config.validate().is_err());
        config.classifier.confidence_granularity = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_commands() {
        let mut config = KaraConfig::default();
        config.stages.scrape_command = Some(vec![]);
        assert!(config.validate().is_err());

        let mut config = KaraConfig::default();
        config.stages.transform_commands.push(vec![]);
        assert!(config.validate().is_err());

        let mut config = KaraConfig::default();
        config.classifier.endpoint.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = KaraConfig::default();
        config.classifier.timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
