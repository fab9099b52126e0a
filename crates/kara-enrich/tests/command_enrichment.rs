//! Enrichment through an external classifier command over loaded records.
#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use kara_core::config::KaraConfig;
use kara_core::types::NormalizedRecord;
use kara_enrich::{CommandClassifier, EnrichmentLoader};
use kara_storage::{Database, DetectionRepository, RecordRepository};

fn record(id: i64, media: Option<PathBuf>) -> NormalizedRecord {
    NormalizedRecord {
        record_id: id,
        occurred_at: Utc::now(),
        text: Some("photo".into()),
        media_ref: media,
        raw_payload: serde_json::json!({ "id": id }),
        source_id: "chemed".into(),
        partition_key: "2024-01-01".into(),
        source_file: PathBuf::from(format!("{}.json", id)),
    }
}

#[tokio::test]
async fn enrich_same_media_twice_keeps_row_count() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::in_memory().unwrap());

    let records = RecordRepository::new(db.clone());
    records.ensure_schema("chemed").unwrap();
    for id in 1..=2 {
        let media = dir.path().join(format!("{}.jpg", id));
        std::fs::write(&media, b"\xff\xd8").unwrap();
        records.insert(&record(id, Some(media))).unwrap();
    }
    records.insert(&record(3, None)).unwrap();

    let mut config = KaraConfig::default();
    config.classifier.endpoint = vec![
        "sh".into(),
        "-c".into(),
        r#"echo '[{"class_label": "bottle", "confidence": 0.874}, {"class_label": "person", "confidence": 0.41}]'"#.into(),
    ];
    config.classifier.timeout_secs = 10;

    let classifier = Arc::new(CommandClassifier::from_config(&config.classifier));
    let loader = EnrichmentLoader::new(classifier, db.clone(), &config);
    let cancel = CancellationToken::new();

    let refs = loader.loaded_media_refs().unwrap();
    assert_eq!(refs.len(), 2);

    let first = loader.enrich(refs.clone(), &cancel).await.unwrap();
    assert_eq!(first.processed, 2);
    assert_eq!(first.detections_written, 4);

    let detections = DetectionRepository::new(db.clone());
    let after_first = detections.count().unwrap();

    let second = loader.enrich(refs, &cancel).await.unwrap();
    assert_eq!(second.detections_written, 0);
    assert_eq!(second.duplicates, 4);
    assert_eq!(detections.count().unwrap(), after_first);

    let rows = detections.for_record("chemed", 1).unwrap();
    assert_eq!(rows[0].detected_class, "bottle");
    assert_eq!(rows[0].confidence_bucket, 87);
}
