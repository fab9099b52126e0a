//! Persistence for pipeline runs and their stage statuses.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use kara_core::error::KaraError;
use kara_core::types::{PipelineRun, RunState, StageStatus, Timestamp};

use crate::db::Database;

/// Repository for [`PipelineRun`] history.
pub struct RunRepository {
    db: Arc<Database>,
}

impl RunRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a run and all of its stage rows.
    ///
    /// Called after every stage transition, so a crash leaves the last
    /// observed state on disk.
    pub fn save(&self, run: &PipelineRun) -> Result<(), KaraError> {
        let run_id = run.run_id.to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pipeline_runs (run_id, state, started_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(run_id) DO UPDATE SET
                    state = excluded.state,
                    ended_at = excluded.ended_at",
                rusqlite::params![
                    run_id,
                    run.state.to_string(),
                    run.started_at.0,
                    run.ended_at.map(|t| t.0),
                ],
            )
            .map_err(|e| KaraError::Storage(format!("Failed to save run: {}", e)))?;

            for (position, stage) in run.stages.iter().enumerate() {
                conn.execute(
                    "INSERT INTO stage_runs
                        (run_id, position, stage_name, state, started_at, ended_at, error, summary)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(run_id, stage_name) DO UPDATE SET
                        state = excluded.state,
                        started_at = excluded.started_at,
                        ended_at = excluded.ended_at,
                        error = excluded.error,
                        summary = excluded.summary",
                    rusqlite::params![
                        run_id,
                        position as i64,
                        stage.stage_name.to_string(),
                        stage.state.to_string(),
                        stage.started_at.map(|t| t.0),
                        stage.ended_at.map(|t| t.0),
                        stage.error,
                        stage.summary,
                    ],
                )
                .map_err(|e| KaraError::Storage(format!("Failed to save stage: {}", e)))?;
            }
            Ok(())
        })
    }

    /// Load a run by id.
    pub fn get(&self, run_id: Uuid) -> Result<Option<PipelineRun>, KaraError> {
        self.db.with_conn(|conn| {
            let header = conn
                .query_row(
                    "SELECT run_id, state, started_at, ended_at FROM pipeline_runs
                     WHERE run_id = ?1",
                    rusqlite::params![run_id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, Option<i64>>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            match header {
                Some(header) => Ok(Some(assemble(conn, header)?)),
                None => Ok(None),
            }
        })
    }

    /// Most recent runs first.
    pub fn recent(&self, limit: usize) -> Result<Vec<PipelineRun>, KaraError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT run_id, state, started_at, ended_at FROM pipeline_runs
                     ORDER BY started_at DESC, rowid DESC LIMIT ?1",
                )
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            let headers = stmt
                .query_map(rusqlite::params![limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                })
                .map_err(|e| KaraError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            headers
                .into_iter()
                .map(|header| assemble(conn, header))
                .collect()
        })
    }
}

type RunHeader = (String, String, i64, Option<i64>);

fn assemble(conn: &Connection, header: RunHeader) -> Result<PipelineRun, KaraError> {
    let (run_id, state, started_at, ended_at) = header;

    let mut stmt = conn
        .prepare(
            "SELECT stage_name, state, started_at, ended_at, error, summary
             FROM stage_runs WHERE run_id = ?1 ORDER BY position ASC",
        )
        .map_err(|e| KaraError::Storage(e.to_string()))?;

    let rows = stmt
        .query_map(rusqlite::params![run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })
        .map_err(|e| KaraError::Storage(e.to_string()))?;

    let mut stages = Vec::new();
    for row in rows {
        let (name, stage_state, s_started, s_ended, error, summary) =
            row.map_err(|e| KaraError::Storage(e.to_string()))?;
        stages.push(StageStatus {
            stage_name: name.parse().map_err(KaraError::Storage)?,
            state: stage_state.parse().map_err(KaraError::Storage)?,
            started_at: s_started.map(Timestamp),
            ended_at: s_ended.map(Timestamp),
            error,
            summary,
        });
    }

    Ok(PipelineRun {
        run_id: Uuid::parse_str(&run_id)
            .map_err(|e| KaraError::Storage(format!("Invalid run id {}: {}", run_id, e)))?,
        state: state.parse::<RunState>().map_err(KaraError::Storage)?,
        started_at: Timestamp(started_at),
        ended_at: ended_at.map(Timestamp),
        stages,
    })
}
