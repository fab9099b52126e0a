//! Whole-lake load: scan, normalize on a bounded worker pool, then insert.
//!
//! Sources are processed one after another. A failure that stops one source
//! (for example an invalid source id) is recorded and the next source still
//! loads.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kara_core::config::KaraConfig;
use kara_core::types::{LoadReport, NormalizedRecord};
use kara_storage::Database;

use crate::error::{LoadError, NormalizationError};
use crate::loader::IdempotentLoader;
use crate::normalizer::RecordNormalizer;
use crate::scanner::{FileKind, PartitionScanner};

/// Result of loading the whole lake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LakeLoadSummary {
    /// Totals over every source.
    pub report: LoadReport,
    pub per_source: BTreeMap<String, LoadReport>,
    /// Sources that could not be loaded at all, with the reason.
    pub source_errors: Vec<(String, String)>,
}

impl LakeLoadSummary {
    pub fn is_clean(&self) -> bool {
        self.source_errors.is_empty()
    }
}

/// Loads every selected source found under the raw root.
pub struct LakeLoader {
    scanner: PartitionScanner,
    normalizer: Arc<RecordNormalizer>,
    loader: IdempotentLoader,
    workers: usize,
    read_timeout: Duration,
}

impl LakeLoader {
    pub fn new(config: &KaraConfig, db: Arc<Database>) -> Self {
        Self {
            scanner: PartitionScanner::from_config(&config.lake),
            normalizer: Arc::new(RecordNormalizer::from_config(&config.lake)),
            loader: IdempotentLoader::new(db),
            workers: config.runtime.workers.max(1),
            read_timeout: Duration::from_secs(config.runtime.read_timeout_secs),
        }
    }

    /// Scan the lake and load every record file.
    ///
    /// Cancellation is checked between records; a cancelled load returns
    /// [`LoadError::Cancelled`] and leaves already inserted rows in place.
    pub async fn load_all(&self, cancel: &CancellationToken) -> Result<LakeLoadSummary, LoadError> {
        let by_source = self.discover().await?;
        info!(
            root = %self.scanner.root().display(),
            sources = by_source.len(),
            "Lake scan complete"
        );

        let mut summary = LakeLoadSummary::default();
        for (source_id, files) in by_source {
            if cancel.is_cancelled() {
                return Err(LoadError::Cancelled);
            }

            if let Err(e) = self.loader.ensure_schema(&source_id) {
                warn!(source = %source_id, error = %e, "Source skipped");
                summary.source_errors.push((source_id, e.to_string()));
                continue;
            }

            let report = self.load_source(&source_id, files, cancel).await?;
            info!(source = %source_id, %report, "Source loaded");
            summary.report.merge(&report);
            summary.per_source.insert(source_id, report);
        }
        Ok(summary)
    }

    /// Record files grouped by source, each group in scan order.
    async fn discover(&self) -> Result<BTreeMap<String, Vec<PathBuf>>, LoadError> {
        let scanner = self.scanner.clone();
        let files = tokio::task::spawn_blocking(move || {
            scanner
                .scan()
                .map(|files| files.filter(|f| f.kind == FileKind::Record).collect::<Vec<_>>())
        })
        .await
        .map_err(|e| LoadError::Worker(e.to_string()))??;

        let mut by_source: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for file in files {
            by_source.entry(file.source_id).or_default().push(file.path);
        }
        Ok(by_source)
    }

    async fn load_source(
        &self,
        source_id: &str,
        files: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<LoadReport, LoadError> {
        let mut report = LoadReport::default();

        let mut normalized = stream::iter(files)
            .map(|path| self.read_record(path))
            .buffered(self.workers);

        while let Some(result) = normalized.next().await {
            if cancel.is_cancelled() {
                return Err(LoadError::Cancelled);
            }
            match result {
                Ok(record) => self.loader.load_one(source_id, &record, &mut report),
                Err(e) => {
                    warn!(
                        source = source_id,
                        file = %e.file_path.display(),
                        reason = %e.reason,
                        "Record file skipped"
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Read and normalize one file off the async runtime, bounded by the
    /// read timeout.
    async fn read_record(&self, path: PathBuf) -> Result<NormalizedRecord, NormalizationError> {
        let normalizer = self.normalizer.clone();
        let task_path = path.clone();
        let task = tokio::task::spawn_blocking(move || normalizer.normalize(&task_path));

        match tokio::time::timeout(self.read_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(NormalizationError::new(path, format!("reader task failed: {}", e))),
            Err(_) => Err(NormalizationError::new(
                path,
                format!("read timed out after {}s", self.read_timeout.as_secs()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use kara_storage::RecordRepository;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn setup(raw_root: &Path) -> (Arc<Database>, LakeLoader) {
        let db = Arc::new(Database::in_memory().unwrap());
        let mut config = KaraConfig::default();
        config.lake.raw_root = raw_root.to_path_buf();
        let lake = LakeLoader::new(&config, db.clone());
        (db, lake)
    }

    #[tokio::test]
    async fn test_load_all_sources() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "2024-01-01/chemed/1.json", r#"{"id": 1, "text": "a"}"#);
        write(dir.path(), "2024-01-01/lobelia/1.json", r#"{"id": 1, "text": "b"}"#);
        write(dir.path(), "2024-01-01/lobelia/2.json", r#"{"id": 2}"#);

        let (db, lake) = setup(dir.path());
        let summary = lake.load_all(&CancellationToken::new()).await.unwrap();

        assert!(summary.is_clean());
        assert_eq!(summary.report, LoadReport { inserted: 3, skipped_duplicate: 0, failed: 0 });
        assert_eq!(summary.per_source["lobelia"].inserted, 2);

        let repo = RecordRepository::new(db);
        assert_eq!(repo.count("chemed").unwrap(), 1);
        assert_eq!(repo.count("lobelia").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bad_source_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "2024-01-01/bad source/1.json", r#"{"id": 1}"#);
        write(dir.path(), "2024-01-01/chemed/1.json", r#"{"id": 1}"#);

        let (_db, lake) = setup(dir.path());
        let summary = lake.load_all(&CancellationToken::new()).await.unwrap();

        assert!(!summary.is_clean());
        assert_eq!(summary.source_errors[0].0, "bad source");
        assert_eq!(summary.report.inserted, 1);
    }

    #[tokio::test]
    async fn test_unreadable_root() {
        let (_db, lake) = setup(Path::new("/nonexistent/kara/raw"));
        let err = lake.load_all(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LoadError::Scan(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "2024-01-01/chemed/1.json", r#"{"id": 1}"#);

        let (db, lake) = setup(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = lake.load_all(&cancel).await.unwrap_err();
        assert!(matches!(err, LoadError::Cancelled));
        assert_eq!(RecordRepository::new(db).count("chemed").unwrap(), 0);
    }
}
