//! End-to-end load behaviour over a real on-disk lake.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use kara_core::config::KaraConfig;
use kara_core::types::LoadReport;
use kara_ingest::{IdempotentLoader, LakeLoader, PartitionScanner, RecordNormalizer};
use kara_storage::{Database, RecordRepository};

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

/// Two partitions of `source_a` with three record files each; one file has
/// no identifier.
fn two_partition_lake(root: &Path) {
    write(root, "2024-01-01/source_a/1.json", r#"{"message_id": 1, "date": "2024-01-01 08:00:00+00:00", "text": "first"}"#);
    write(root, "2024-01-01/source_a/2.json", r#"{"message_id": 2, "date": "2024-01-01 09:00:00+00:00", "text": "second"}"#);
    write(root, "2024-01-01/source_a/3.json", r#"{"date": "2024-01-01 10:00:00+00:00", "text": "no id"}"#);
    write(root, "2024-01-02/source_a/4.json", r#"{"id": 4, "text": "fourth"}"#);
    write(root, "2024-01-02/source_a/5.json", r#"{"id": "5", "image": "5.jpg"}"#);
    write(root, "2024-01-02/source_a/6.json", r#"{"internal_id": 6, "timestamp": 1704186000}"#);
}

fn lake_loader(root: &Path, db: Arc<Database>) -> LakeLoader {
    let mut config = KaraConfig::default();
    config.lake.raw_root = root.to_path_buf();
    config.runtime.workers = 3;
    LakeLoader::new(&config, db)
}

#[tokio::test]
async fn two_partitions_load_then_reload() {
    let dir = tempfile::tempdir().unwrap();
    two_partition_lake(dir.path());
    let db = Arc::new(Database::in_memory().unwrap());
    let lake = lake_loader(dir.path(), db.clone());
    let cancel = CancellationToken::new();

    let first = lake.load_all(&cancel).await.unwrap();
    assert_eq!(first.report, LoadReport { inserted: 5, skipped_duplicate: 0, failed: 1 });

    let second = lake.load_all(&cancel).await.unwrap();
    assert_eq!(second.report, LoadReport { inserted: 0, skipped_duplicate: 5, failed: 1 });

    assert_eq!(RecordRepository::new(db).count("source_a").unwrap(), 5);
}

#[tokio::test]
async fn repeated_and_overlapping_loads_leave_identical_tables() {
    let dir = tempfile::tempdir().unwrap();
    two_partition_lake(dir.path());
    let db = Arc::new(Database::in_memory().unwrap());
    let repo = RecordRepository::new(db.clone());
    let cancel = CancellationToken::new();

    lake_loader(dir.path(), db.clone()).load_all(&cancel).await.unwrap();
    let after_first = repo.list("source_a").unwrap();

    // A later scrape adds a partition that overlaps the first one.
    write(dir.path(), "2024-01-03/source_a/2.json", r#"{"message_id": 2, "text": "rescraped"}"#);
    let again = lake_loader(dir.path(), db.clone()).load_all(&cancel).await.unwrap();
    assert_eq!(again.report.inserted, 0);
    assert_eq!(again.report.skipped_duplicate, 6);

    let after_second = repo.list("source_a").unwrap();
    assert_eq!(after_first, after_second);
    assert_eq!(after_second[1].text.as_deref(), Some("second"));
}

#[tokio::test]
async fn one_malformed_file_among_many() {
    let dir = tempfile::tempdir().unwrap();
    for id in 1..=8 {
        write(dir.path(), &format!("2024-02-01/chemed/{}.json", id), &format!(r#"{{"id": {}}}"#, id));
    }
    write(dir.path(), "2024-02-01/chemed/broken.json", "{ this is not json");

    let db = Arc::new(Database::in_memory().unwrap());
    let summary = lake_loader(dir.path(), db.clone())
        .load_all(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.report, LoadReport { inserted: 8, skipped_duplicate: 0, failed: 1 });
    assert!(summary.is_clean());
    assert_eq!(RecordRepository::new(db).count("chemed").unwrap(), 8);
}

#[test]
fn scanner_normalizer_loader_compose() {
    let dir = tempfile::tempdir().unwrap();
    two_partition_lake(dir.path());
    let db = Arc::new(Database::in_memory().unwrap());

    let scanner = PartitionScanner::new(dir.path(), vec!["source_a".to_string()]);
    let normalizer = RecordNormalizer::default();
    let loader = IdempotentLoader::new(db);
    loader.ensure_schema("source_a").unwrap();

    let mut failed = 0;
    let records: Vec<_> = scanner
        .scan()
        .unwrap()
        .filter_map(|f| match normalizer.normalize(&f.path) {
            Ok(r) => Some(r),
            Err(_) => {
                failed += 1;
                None
            }
        })
        .collect();

    let report = loader.load("source_a", records);
    assert_eq!(failed, 1);
    assert_eq!(report.inserted, 5);
}
