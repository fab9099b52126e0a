//! Kara Storage crate - SQLite persistence for loaded records, detections,
//! and pipeline runs.
//!
//! Provides a WAL-mode SQLite database with migrations, the conflict-tolerant
//! write paths used by the loader and the enrichment loader, run bookkeeping,
//! and read-only analytical queries over loaded records.

pub mod db;
pub mod migrations;
pub mod queries;
pub mod repository;
pub mod runs;

pub use db::Database;
pub use queries::{DailyCount, QueryService, SearchHit, SourceActivity, TermCount};
pub use repository::{
    table_name_for, DetectionRepository, InsertOutcome, LoadedRow, RecordRepository,
};
pub use runs::RunRepository;
