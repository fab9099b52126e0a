//! Enrichment loader.
//!
//! Classifies each referenced media file on a bounded worker pool and writes
//! detections with conflict-tolerant inserts. Detections are keyed by
//! `(source_id, record_id, media_ref, detected_class, confidence_bucket)`,
//! where `confidence_bucket = round(confidence / granularity)`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kara_core::config::KaraConfig;
use kara_core::error::KaraError;
use kara_core::types::{Detection, DetectionRow, EnrichReport, MediaRef, Timestamp};
use kara_storage::{Database, DetectionRepository, InsertOutcome, RecordRepository};

use crate::classifier::Classifier;
use crate::error::{ClassifierError, EnrichError};

/// Bucket a confidence score at the given granularity.
pub fn confidence_bucket(confidence: f64, granularity: f64) -> i64 {
    (confidence / granularity).round() as i64
}

/// Keep one detection per class, the most confident one. Invalid entries
/// are dropped.
fn collapse(media: &MediaRef, detections: Vec<Detection>) -> BTreeMap<String, f64> {
    let mut best: BTreeMap<String, f64> = BTreeMap::new();
    for d in detections {
        let label = d.class_label.trim();
        if label.is_empty() || !d.confidence.is_finite() || !(0.0..=1.0).contains(&d.confidence) {
            warn!(
                media = %media.media_ref.display(),
                class = %d.class_label,
                confidence = d.confidence,
                "Discarding invalid detection"
            );
            continue;
        }
        let entry = best.entry(label.to_string()).or_insert(d.confidence);
        if d.confidence > *entry {
            *entry = d.confidence;
        }
    }
    best
}

/// Writes classifier output for media referenced by loaded records.
pub struct EnrichmentLoader {
    classifier: Arc<dyn Classifier>,
    db: Arc<Database>,
    detections: DetectionRepository,
    granularity: f64,
    workers: usize,
    timeout: Duration,
}

impl EnrichmentLoader {
    pub fn new(classifier: Arc<dyn Classifier>, db: Arc<Database>, config: &KaraConfig) -> Self {
        Self {
            classifier,
            detections: DetectionRepository::new(db.clone()),
            db,
            granularity: config.classifier.confidence_granularity,
            workers: config.runtime.workers.max(1),
            timeout: Duration::from_secs(config.classifier.timeout_secs),
        }
    }

    /// Media references of every loaded record, across all sources.
    pub fn loaded_media_refs(&self) -> Result<Vec<MediaRef>, KaraError> {
        let records = RecordRepository::new(self.db.clone());
        let mut refs = Vec::new();
        for (source_id, _) in records.sources()? {
            refs.extend(records.media_refs(&source_id)?);
        }
        Ok(refs)
    }

    /// Classify every media file and persist its detections.
    ///
    /// Per-file failures (missing file, classifier error, timeout, write
    /// error) are counted in `failed`. Cancellation is checked between files.
    pub async fn enrich(
        &self,
        media_refs: Vec<MediaRef>,
        cancel: &CancellationToken,
    ) -> Result<EnrichReport, EnrichError> {
        if cancel.is_cancelled() {
            return Err(EnrichError::Cancelled);
        }
        let mut report = EnrichReport::default();
        let total = media_refs.len();

        let mut classified = stream::iter(media_refs)
            .map(|media| async move {
                let result = self.classify(&media).await;
                (media, result)
            })
            .buffered(self.workers);

        while let Some((media, result)) = classified.next().await {
            if cancel.is_cancelled() {
                return Err(EnrichError::Cancelled);
            }
            match result {
                Ok(detections) => self.persist(&media, detections, &mut report),
                Err(e) => {
                    warn!(
                        source = %media.source_id,
                        record_id = media.record_id,
                        media = %media.media_ref.display(),
                        error = %e,
                        "Media file not enriched"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(media_files = total, %report, "Enrichment pass complete");
        Ok(report)
    }

    async fn classify(&self, media: &MediaRef) -> Result<Vec<Detection>, ClassifierError> {
        if !media.media_ref.is_file() {
            return Err(ClassifierError::MissingMedia(
                media.media_ref.display().to_string(),
            ));
        }

        let classifier = self.classifier.clone();
        let path = media.media_ref.clone();
        let task = tokio::spawn(async move { classifier.classify(&path).await });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ClassifierError::Spawn(format!("classifier task failed: {}", e))),
            Err(_) => Err(ClassifierError::Timeout(self.timeout)),
        }
    }

    fn persist(&self, media: &MediaRef, detections: Vec<Detection>, report: &mut EnrichReport) {
        let detected_at = Timestamp::now();
        let mut write_failed = false;

        for (class, confidence) in collapse(media, detections) {
            let row = DetectionRow {
                source_id: media.source_id.clone(),
                record_id: media.record_id,
                media_ref: media.media_ref.clone(),
                confidence_bucket: confidence_bucket(confidence, self.granularity),
                detected_class: class,
                confidence_score: confidence,
                detected_at,
            };
            match self.detections.insert(&row) {
                Ok(InsertOutcome::Inserted) => report.detections_written += 1,
                Ok(InsertOutcome::Duplicate) => {
                    debug!(record_id = row.record_id, class = %row.detected_class, "Detection already stored");
                    report.duplicates += 1;
                }
                Err(e) => {
                    warn!(
                        record_id = row.record_id,
                        media = %row.media_ref.display(),
                        error = %e,
                        "Failed to store detection"
                    );
                    write_failed = true;
                }
            }
        }

        if write_failed {
            report.failed += 1;
        } else {
            report.processed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier {
        detections: Vec<Detection>,
        calls: AtomicUsize,
    }

    impl FixedClassifier {
        fn new(detections: &[(&str, f64)]) -> Arc<Self> {
            Arc::new(Self {
                detections: detections
                    .iter()
                    .map(|(l, c)| Detection { class_label: l.to_string(), confidence: *c })
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _media: &Path) -> Result<Vec<Detection>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detections.clone())
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        async fn classify(&self, media: &Path) -> Result<Vec<Detection>, ClassifierError> {
            if media.to_string_lossy().contains("bad") {
                Err(ClassifierError::Exit("exit status: 1".into()))
            } else {
                Ok(vec![Detection { class_label: "bottle".into(), confidence: 0.8 }])
            }
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl Classifier for SlowClassifier {
        async fn classify(&self, _media: &Path) -> Result<Vec<Detection>, ClassifierError> {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            Ok(Vec::new())
        }
    }

    fn media_file(dir: &Path, name: &str, record_id: i64) -> MediaRef {
        let path = dir.join(name);
        std::fs::write(&path, b"\xff\xd8").unwrap();
        MediaRef {
            source_id: "chemed".to_string(),
            record_id,
            media_ref: path,
        }
    }

    fn loader(classifier: Arc<dyn Classifier>) -> (Arc<Database>, EnrichmentLoader) {
        let db = Arc::new(Database::in_memory().unwrap());
        let loader = EnrichmentLoader::new(classifier, db.clone(), &KaraConfig::default());
        (db, loader)
    }

    #[test]
    fn test_confidence_bucket() {
        assert_eq!(confidence_bucket(0.874, 0.01), 87);
        assert_eq!(confidence_bucket(0.876, 0.01), 88);
        assert_eq!(confidence_bucket(0.874, 0.05), 17);
        assert_eq!(confidence_bucket(1.0, 0.01), 100);
        assert_eq!(confidence_bucket(0.0, 0.01), 0);
    }

    #[test]
    fn test_collapse_keeps_best_per_class() {
        let media = MediaRef {
            source_id: "s".into(),
            record_id: 1,
            media_ref: PathBuf::from("1.jpg"),
        };
        let collapsed = collapse(
            &media,
            vec![
                Detection { class_label: "bottle".into(), confidence: 0.5 },
                Detection { class_label: "bottle".into(), confidence: 0.9 },
                Detection { class_label: "person".into(), confidence: 0.7 },
                Detection { class_label: "".into(), confidence: 0.9 },
                Detection { class_label: "cat".into(), confidence: 1.2 },
                Detection { class_label: "dog".into(), confidence: f64::NAN },
            ],
        );
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed["bottle"], 0.9);
        assert_eq!(collapsed["person"], 0.7);
    }

    #[tokio::test]
    async fn test_enrich_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = FixedClassifier::new(&[("bottle", 0.87), ("person", 0.55), ("bottle", 0.6)]);
        let (_db, loader) = loader(classifier.clone());
        let refs = vec![media_file(dir.path(), "1.jpg", 1)];
        let cancel = CancellationToken::new();

        let first = loader.enrich(refs.clone(), &cancel).await.unwrap();
        assert_eq!(
            first,
            EnrichReport { processed: 1, detections_written: 2, duplicates: 0, failed: 0 }
        );
        let count_after_first = loader.detections.count().unwrap();

        let second = loader.enrich(refs, &cancel).await.unwrap();
        assert_eq!(
            second,
            EnrichReport { processed: 1, detections_written: 0, duplicates: 2, failed: 0 }
        );
        assert_eq!(loader.detections.count().unwrap(), count_after_first);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_classifier_failure_does_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, loader) = loader(Arc::new(FailingClassifier));
        let refs = vec![
            media_file(dir.path(), "1.jpg", 1),
            media_file(dir.path(), "bad.jpg", 2),
            media_file(dir.path(), "3.jpg", 3),
        ];

        let report = loader.enrich(refs, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.detections_written, 2);
    }

    #[tokio::test]
    async fn test_missing_media_counts_failed() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = FixedClassifier::new(&[("bottle", 0.9)]);
        let (_db, loader) = loader(classifier.clone());
        let refs = vec![MediaRef {
            source_id: "chemed".into(),
            record_id: 9,
            media_ref: dir.path().join("gone.jpg"),
        }];

        let report = loader.enrich(refs, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_classifier_timeout_counts_failed() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::in_memory().unwrap());
        let mut config = KaraConfig::default();
        config.classifier.timeout_secs = 1;
        let loader = EnrichmentLoader::new(Arc::new(SlowClassifier), db, &config);

        let report = loader
            .enrich(vec![media_file(dir.path(), "1.jpg", 1)], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, loader) = loader(FixedClassifier::new(&[("bottle", 0.9)]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = loader
            .enrich(vec![media_file(dir.path(), "1.jpg", 1)], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::Cancelled));
        assert_eq!(loader.detections.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_loaded_media_refs_reads_all_sources() {
        use chrono::Utc;
        use kara_core::types::NormalizedRecord;

        let (db, loader) = loader(FixedClassifier::new(&[]));
        let records = RecordRepository::new(db);
        for (source, id, media) in [("a", 1, Some("1.jpg")), ("a", 2, None), ("b", 3, Some("3.png"))] {
            records.ensure_schema(source).unwrap();
            records
                .insert(&NormalizedRecord {
                    record_id: id,
                    occurred_at: Utc::now(),
                    text: None,
                    media_ref: media.map(PathBuf::from),
                    raw_payload: serde_json::json!({ "id": id }),
                    source_id: source.to_string(),
                    partition_key: "2024-01-01".into(),
                    source_file: PathBuf::from("x.json"),
                })
                .unwrap();
        }

        let refs = loader.loaded_media_refs().unwrap();
        let ids: Vec<_> = refs.iter().map(|r| (r.source_id.as_str(), r.record_id)).collect();
        assert_eq!(ids, vec![("a", 1), ("b", 3)]);
    }
}
