//! Read-only analytics over loaded records.
//!
//! Spans every registered source table: term frequency, per-source daily
//! activity and substring search.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;

use kara_core::error::KaraError;

use crate::db::Database;
use crate::repository::{list_sources, table_name_for};

/// Hard cap on search results.
pub const MAX_SEARCH_RESULTS: usize = 50;

/// Minimum character count a term must exceed to be counted.
const MIN_TERM_CHARS: usize = 3;

/// A term and how often it appears across loaded text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermCount {
    pub term: String,
    pub count: u64,
}

/// Records loaded for one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u64,
}

/// Activity summary of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceActivity {
    pub source_id: String,
    pub total: u64,
    /// Ascending by date.
    pub per_day: Vec<DailyCount>,
}

/// A record whose text matched a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub source_id: String,
    pub record_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub text: String,
}

static TERM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("Invalid term regex"));

/// Query service over all source tables.
pub struct QueryService {
    db: Arc<Database>,
}

impl QueryService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Most frequent lowercase terms longer than three characters.
    ///
    /// Ties are broken alphabetically so the result is stable.
    pub fn top_terms(&self, limit: usize) -> Result<Vec<TermCount>, KaraError> {
        let texts = self.db.with_conn(|conn| {
            let mut texts = Vec::new();
            for (_, table) in list_sources(conn)? {
                let mut stmt = conn
                    .prepare(&format!("SELECT text FROM {table} WHERE text IS NOT NULL"))
                    .map_err(|e| KaraError::Storage(e.to_string()))?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(|e| KaraError::Storage(e.to_string()))?;
                for row in rows {
                    texts.push(row.map_err(|e| KaraError::Storage(e.to_string()))?);
                }
            }
            Ok(texts)
        })?;

        let mut counts: HashMap<String, u64> = HashMap::new();
        for text in &texts {
            let lowered = text.to_lowercase();
            for term in TERM_RE.find_iter(&lowered) {
                let term = term.as_str();
                if term.chars().count() > MIN_TERM_CHARS {
                    *counts.entry(term.to_string()).or_default() += 1;
                }
            }
        }

        let mut terms: Vec<TermCount> = counts
            .into_iter()
            .map(|(term, count)| TermCount { term, count })
            .collect();
        terms.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
        terms.truncate(limit);
        Ok(terms)
    }

    /// Total and per-day record counts for a source.
    ///
    /// Returns `None` when the source is unknown or has no records.
    pub fn source_activity(&self, source_id: &str) -> Result<Option<SourceActivity>, KaraError> {
        let table = table_name_for(source_id)?;
        self.db.with_conn(|conn| {
            let registered = list_sources(conn)?
                .into_iter()
                .any(|(id, t)| id == source_id && t == table);
            if !registered {
                return Ok(None);
            }

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT date(occurred_at, 'unixepoch') AS day, COUNT(*)
                     FROM {table} GROUP BY day ORDER BY day ASC"
                ))
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            let mut per_day = Vec::new();
            for row in rows {
                let (day, count) = row.map_err(|e| KaraError::Storage(e.to_string()))?;
                let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .map_err(|e| KaraError::Storage(format!("Invalid day {}: {}", day, e)))?;
                per_day.push(DailyCount {
                    date,
                    count: count as u64,
                });
            }

            let total: u64 = per_day.iter().map(|d| d.count).sum();
            if total == 0 {
                return Ok(None);
            }
            Ok(Some(SourceActivity {
                source_id: source_id.to_string(),
                total,
                per_day,
            }))
        })
    }

    /// Records whose text contains `query` (ASCII case-insensitive),
    /// newest first, at most [`MAX_SEARCH_RESULTS`].
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, KaraError> {
        let limit = limit.min(MAX_SEARCH_RESULTS);
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        self.db.with_conn(|conn| {
            let sources = list_sources(conn)?;
            if sources.is_empty() {
                return Ok(Vec::new());
            }

            // Table names come from the registry and were validated on insert.
            let union = sources
                .iter()
                .map(|(id, table)| {
                    format!(
                        "SELECT '{id}' AS source_id, record_id, occurred_at, text FROM {table}
                         WHERE text IS NOT NULL AND instr(lower(text), lower(?1)) > 0"
                    )
                })
                .collect::<Vec<_>>()
                .join(" UNION ALL ");

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT source_id, record_id, occurred_at, text FROM ({union})
                     ORDER BY occurred_at DESC, source_id ASC, record_id DESC
                     LIMIT ?2"
                ))
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![query, limit as i64], |row| {
                    Ok(SearchHit {
                        source_id: row.get(0)?,
                        record_id: row.get(1)?,
                        occurred_at: DateTime::from_timestamp(row.get::<_, i64>(2)?, 0)
                            .unwrap_or_default(),
                        text: row.get(3)?,
                    })
                })
                .map_err(|e| KaraError::Storage(e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| KaraError::Storage(e.to_string()))
        })
    }
}
