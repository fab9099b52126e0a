//! Database schema migrations.
//!
//! Applies the shared schema: the source registry, the detections table and
//! the pipeline run tables. Per-source record tables are created on demand by
//! [`crate::RecordRepository::ensure_schema`].

use rusqlite::Connection;
use tracing::info;

use kara_core::error::KaraError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), KaraError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| KaraError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| KaraError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), KaraError> {
    conn.execute_batch(
        "
        -- One row per source that has a record table.
        CREATE TABLE IF NOT EXISTS sources (
            source_id       TEXT PRIMARY KEY NOT NULL,
            table_name      TEXT NOT NULL UNIQUE,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- Classifier output, one row per detected class per media file.
        CREATE TABLE IF NOT EXISTS image_detections (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id           TEXT NOT NULL,
            record_id           INTEGER NOT NULL,
            media_ref           TEXT NOT NULL,
            detected_class      TEXT NOT NULL,
            confidence_bucket   INTEGER NOT NULL,
            confidence_score    REAL NOT NULL,
            detected_at         INTEGER NOT NULL,
            UNIQUE (source_id, record_id, media_ref, detected_class, confidence_bucket)
        );

        CREATE INDEX IF NOT EXISTS idx_detections_record
            ON image_detections (source_id, record_id);

        CREATE INDEX IF NOT EXISTS idx_detections_class
            ON image_detections (detected_class);

        -- Pipeline runs and their stages.
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id          TEXT PRIMARY KEY NOT NULL,
            state           TEXT NOT NULL
                            CHECK (state IN ('running', 'succeeded', 'failed', 'cancelled')),
            started_at      INTEGER NOT NULL,
            ended_at        INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_pipeline_runs_started
            ON pipeline_runs (started_at DESC);

        CREATE TABLE IF NOT EXISTS stage_runs (
            run_id          TEXT NOT NULL,
            position        INTEGER NOT NULL,
            stage_name      TEXT NOT NULL,
            state           TEXT NOT NULL
                            CHECK (state IN ('pending', 'running', 'succeeded', 'failed',
                                             'skipped', 'cancelled')),
            started_at      INTEGER,
            ended_at        INTEGER,
            error           TEXT,
            summary         TEXT,
            PRIMARY KEY (run_id, stage_name),
            FOREIGN KEY (run_id) REFERENCES pipeline_runs(run_id) ON DELETE CASCADE
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| KaraError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
