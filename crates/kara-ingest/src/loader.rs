//! Idempotent loader.
//!
//! Writes normalized records into their source table. Duplicates are
//! skipped silently; any other per-record failure is counted and logged and
//! the batch carries on.

use std::sync::Arc;

use tracing::{debug, warn};

use kara_core::error::KaraError;
use kara_core::types::{LoadReport, NormalizedRecord};
use kara_storage::{Database, InsertOutcome, RecordRepository};

/// Per-source record writer.
pub struct IdempotentLoader {
    records: RecordRepository,
}

impl IdempotentLoader {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            records: RecordRepository::new(db),
        }
    }

    /// Create the source table if it does not exist yet. Safe to call on
    /// every run.
    pub fn ensure_schema(&self, source_id: &str) -> Result<String, KaraError> {
        self.records.ensure_schema(source_id)
    }

    /// Insert every record of one source.
    ///
    /// Never fails as a whole: records from another source or records the
    /// store rejects are counted as `failed`.
    pub fn load<I>(&self, source_id: &str, records: I) -> LoadReport
    where
        I: IntoIterator<Item = NormalizedRecord>,
    {
        let mut report = LoadReport::default();
        for record in records {
            self.load_one(source_id, &record, &mut report);
        }
        debug!(source = source_id, %report, "Source batch loaded");
        report
    }

    /// Insert a single record and account for the outcome in `report`.
    pub fn load_one(&self, source_id: &str, record: &NormalizedRecord, report: &mut LoadReport) {
        if record.source_id != source_id {
            warn!(
                source = source_id,
                record_source = %record.source_id,
                file = %record.source_file.display(),
                "Record belongs to another source"
            );
            report.failed += 1;
            return;
        }

        match self.records.insert(record) {
            Ok(InsertOutcome::Inserted) => report.inserted += 1,
            Ok(InsertOutcome::Duplicate) => {
                debug!(source = source_id, record_id = record.record_id, "Duplicate record skipped");
                report.skipped_duplicate += 1;
            }
            Err(e) => {
                warn!(
                    source = source_id,
                    record_id = record.record_id,
                    file = %record.source_file.display(),
                    error = %e,
                    "Failed to store record"
                );
                report.failed += 1;
            }
        }
    }
}
