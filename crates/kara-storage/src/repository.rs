//! Repository implementations for SQLite-backed persistence.
//!
//! `RecordRepository` owns the per-source record tables and
//! `DetectionRepository` owns the shared detections table. Both write with
//! conflict-tolerant inserts: a uniqueness conflict is reported as
//! [`InsertOutcome::Duplicate`], never as an error.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tracing::debug;

use kara_core::error::KaraError;
use kara_core::types::{DetectionRow, MediaRef, NormalizedRecord};

use crate::db::Database;

/// Result of a conflict-tolerant insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted,
    /// A row with the same uniqueness key already existed; nothing changed.
    Duplicate,
}

/// Table name for a source's loaded records.
///
/// Source ids must be non-empty and consist of ASCII letters, digits, `_`
/// or `-`. The result is lowercased with `-` mapped to `_`, so it is always
/// safe to interpolate into SQL.
pub fn table_name_for(source_id: &str) -> Result<String, KaraError> {
    let valid = !source_id.is_empty()
        && source_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(KaraError::InvalidIdentifier(format!(
            "source id {:?} must match [A-Za-z0-9_-]+",
            source_id
        )));
    }
    Ok(format!("raw_{}", source_id.to_ascii_lowercase().replace('-', "_")))
}

/// Map a rusqlite error from an insert, folding UNIQUE violations into
/// `Duplicate`.
fn classify_insert_error(err: rusqlite::Error, what: &str) -> Result<InsertOutcome, KaraError> {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Ok(InsertOutcome::Duplicate)
        }
        _ => Err(KaraError::Storage(format!("Failed to insert {}: {}", what, err))),
    }
}

/// A persisted record as read back from a source table.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedRow {
    pub id: i64,
    pub record_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub text: Option<String>,
    pub media_ref: Option<PathBuf>,
    pub raw_payload: serde_json::Value,
    pub partition_key: String,
    pub source_file: PathBuf,
}

/// Repository for per-source loaded records.
pub struct RecordRepository {
    db: Arc<Database>,
}

impl RecordRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create the source's record table if absent and register it.
    ///
    /// Idempotent; safe to call on every run. Returns the table name.
    pub fn ensure_schema(&self, source_id: &str) -> Result<String, KaraError> {
        let table = table_name_for(source_id)?;
        self.db.with_conn(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id              INTEGER PRIMARY KEY AUTOINCREMENT,
                    record_id       INTEGER NOT NULL UNIQUE,
                    occurred_at     INTEGER NOT NULL,
                    text            TEXT,
                    media_ref       TEXT,
                    raw_payload     TEXT NOT NULL,
                    partition_key   TEXT NOT NULL,
                    source_file     TEXT NOT NULL,
                    loaded_at       INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_occurred_at
                    ON {table} (occurred_at DESC);",
            ))
            .map_err(|e| KaraError::Storage(format!("Failed to create {}: {}", table, e)))?;

            conn.execute(
                "INSERT INTO sources (source_id, table_name) VALUES (?1, ?2)
                 ON CONFLICT(source_id) DO NOTHING",
                rusqlite::params![source_id, table],
            )
            .map_err(|e| KaraError::Storage(format!("Failed to register source: {}", e)))?;

            let registered: Option<String> = conn
                .query_row(
                    "SELECT table_name FROM sources WHERE source_id = ?1",
                    rusqlite::params![source_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| KaraError::Storage(e.to_string()))?;
            if registered.as_deref() != Some(table.as_str()) {
                return Err(KaraError::Storage(format!(
                    "source {} is registered to a different table",
                    source_id
                )));
            }
            Ok(())
        })?;
        debug!(source = source_id, table = %table, "Source schema ready");
        Ok(table)
    }

    /// Insert a record unless one with the same `record_id` already exists.
    ///
    /// The source table must exist (see [`Self::ensure_schema`]).
    pub fn insert(&self, record: &NormalizedRecord) -> Result<InsertOutcome, KaraError> {
        let table = table_name_for(&record.source_id)?;
        let payload = serde_json::to_string(&record.raw_payload)?;
        self.db.with_conn(|conn| {
            let result = conn.execute(
                &format!(
                    "INSERT INTO {table}
                        (record_id, occurred_at, text, media_ref, raw_payload,
                         partition_key, source_file)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(record_id) DO NOTHING"
                ),
                rusqlite::params![
                    record.record_id,
                    record.occurred_at.timestamp(),
                    record.text,
                    record
                        .media_ref
                        .as_ref()
                        .map(|p| p.to_string_lossy().to_string()),
                    payload,
                    record.partition_key,
                    record.source_file.to_string_lossy().to_string(),
                ],
            );
            match result {
                Ok(0) => Ok(InsertOutcome::Duplicate),
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(e) => classify_insert_error(e, "record"),
            }
        })
    }

    /// Find a loaded record by its natural id.
    pub fn find(&self, source_id: &str, record_id: i64) -> Result<Option<LoadedRow>, KaraError> {
        let table = table_name_for(source_id)?;
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id, record_id, occurred_at, text, media_ref, raw_payload,
                            partition_key, source_file
                     FROM {table} WHERE record_id = ?1"
                ))
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![record_id], |row| Ok(row_to_loaded(row)))
                .optional()
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            match result {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
    }

    /// All loaded records of a source, ordered by `record_id`.
    pub fn list(&self, source_id: &str) -> Result<Vec<LoadedRow>, KaraError> {
        let table = table_name_for(source_id)?;
        self.db.with_conn(|conn| {
            if !table_exists(conn, &table)? {
                return Ok(Vec::new());
            }
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id, record_id, occurred_at, text, media_ref, raw_payload,
                            partition_key, source_file
                     FROM {table} ORDER BY record_id ASC"
                ))
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| Ok(row_to_loaded(row)))
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            let mut loaded = Vec::new();
            for row in rows {
                loaded.push(row.map_err(|e| KaraError::Storage(e.to_string()))??);
            }
            Ok(loaded)
        })
    }

    /// Count loaded records of a source. Zero if the source has no table.
    pub fn count(&self, source_id: &str) -> Result<u64, KaraError> {
        let table = table_name_for(source_id)?;
        self.db.with_conn(|conn| {
            if !table_exists(conn, &table)? {
                return Ok(0);
            }
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(|e| KaraError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Registered sources as `(source_id, table_name)`, ordered by source id.
    pub fn sources(&self) -> Result<Vec<(String, String)>, KaraError> {
        self.db.with_conn(list_sources)
    }

    /// Records of a source that reference a media file, ordered by `record_id`.
    pub fn media_refs(&self, source_id: &str) -> Result<Vec<MediaRef>, KaraError> {
        let table = table_name_for(source_id)?;
        self.db.with_conn(|conn| {
            if !table_exists(conn, &table)? {
                return Ok(Vec::new());
            }
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT record_id, media_ref FROM {table}
                     WHERE media_ref IS NOT NULL
                     ORDER BY record_id ASC"
                ))
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(MediaRef {
                        source_id: source_id.to_string(),
                        record_id: row.get(0)?,
                        media_ref: PathBuf::from(row.get::<_, String>(1)?),
                    })
                })
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| KaraError::Storage(e.to_string()))
        })
    }
}

/// Registered sources, shared with the query service.
pub(crate) fn list_sources(conn: &Connection) -> Result<Vec<(String, String)>, KaraError> {
    let mut stmt = conn
        .prepare("SELECT source_id, table_name FROM sources ORDER BY source_id ASC")
        .map_err(|e| KaraError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| KaraError::Storage(e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| KaraError::Storage(e.to_string()))
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, KaraError> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        rusqlite::params![table],
        |row| row.get(0),
    )
    .map_err(|e| KaraError::Storage(e.to_string()))
}

fn row_to_loaded(row: &rusqlite::Row) -> Result<LoadedRow, KaraError> {
    let occurred_at: i64 = row.get(2).map_err(|e| KaraError::Storage(e.to_string()))?;
    let media_ref: Option<String> = row.get(4).map_err(|e| KaraError::Storage(e.to_string()))?;
    let payload: String = row.get(5).map_err(|e| KaraError::Storage(e.to_string()))?;
    let source_file: String = row.get(7).map_err(|e| KaraError::Storage(e.to_string()))?;

    Ok(LoadedRow {
        id: row.get(0).map_err(|e| KaraError::Storage(e.to_string()))?,
        record_id: row.get(1).map_err(|e| KaraError::Storage(e.to_string()))?,
        occurred_at: DateTime::from_timestamp(occurred_at, 0).unwrap_or_default(),
        text: row.get(3).map_err(|e| KaraError::Storage(e.to_string()))?,
        media_ref: media_ref.map(PathBuf::from),
        raw_payload: serde_json::from_str(&payload)?,
        partition_key: row.get(6).map_err(|e| KaraError::Storage(e.to_string()))?,
        source_file: PathBuf::from(source_file),
    })
}

/// Repository for classifier detections.
pub struct DetectionRepository {
    db: Arc<Database>,
}

impl DetectionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a detection unless the same
    /// `(source_id, record_id, media_ref, detected_class, confidence_bucket)`
    /// is already stored.
    pub fn insert(&self, row: &DetectionRow) -> Result<InsertOutcome, KaraError> {
        self.db.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO image_detections
                    (source_id, record_id, media_ref, detected_class, confidence_bucket,
                     confidence_score, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(source_id, record_id, media_ref, detected_class, confidence_bucket)
                 DO NOTHING",
                rusqlite::params![
                    row.source_id,
                    row.record_id,
                    row.media_ref.to_string_lossy().to_string(),
                    row.detected_class,
                    row.confidence_bucket,
                    row.confidence_score,
                    row.detected_at.0,
                ],
            );
            match result {
                Ok(0) => Ok(InsertOutcome::Duplicate),
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(e) => classify_insert_error(e, "detection"),
            }
        })
    }

    /// Detections for one record, ordered by class then confidence.
    pub fn for_record(&self, source_id: &str, record_id: i64) -> Result<Vec<DetectionRow>, KaraError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT source_id, record_id, media_ref, detected_class, confidence_score,
                            confidence_bucket, detected_at
                     FROM image_detections
                     WHERE source_id = ?1 AND record_id = ?2
                     ORDER BY detected_class ASC, confidence_score DESC",
                )
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![source_id, record_id], |row| {
                    Ok(DetectionRow {
                        source_id: row.get(0)?,
                        record_id: row.get(1)?,
                        media_ref: PathBuf::from(row.get::<_, String>(2)?),
                        detected_class: row.get(3)?,
                        confidence_score: row.get(4)?,
                        confidence_bucket: row.get(5)?,
                        detected_at: kara_core::types::Timestamp(row.get(6)?),
                    })
                })
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| KaraError::Storage(e.to_string()))
        })
    }

    /// Count all stored detections.
    pub fn count(&self) -> Result<u64, KaraError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM image_detections", [], |row| row.get(0))
                .map_err(|e| KaraError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}
