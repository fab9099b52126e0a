//! Record normalizer.
//!
//! Turns one raw record file into a [`NormalizedRecord`]. Each logical field
//! has an ordered list of candidate keys; the first key present with a
//! non-null value wins.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use kara_core::config::LakeConfig;
use kara_core::types::NormalizedRecord;

use crate::error::NormalizationError;

/// External identifier keys, in precedence order.
pub const RECORD_ID_KEYS: &[&str] = &["message_id", "id"];
/// Internal identifier keys, consulted only when no external id is present.
pub const INTERNAL_ID_KEYS: &[&str] = &["internal_id"];
pub const OCCURRED_AT_KEYS: &[&str] = &["date", "timestamp", "occurred_at"];
pub const TEXT_KEYS: &[&str] = &["text", "message", "content"];
pub const MEDIA_KEYS: &[&str] = &["image_path", "image", "media_path"];

/// Stateless parser for raw record files.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    media_extensions: Vec<String>,
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::from_config(&LakeConfig::default())
    }
}

impl RecordNormalizer {
    pub fn from_config(config: &LakeConfig) -> Self {
        Self {
            media_extensions: config
                .media_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Read and normalize the record file at `path`.
    ///
    /// The source id and partition key are taken from the two directories
    /// above the file (`<partition_key>/<source_id>/<file>`).
    pub fn normalize(&self, path: &Path) -> Result<NormalizedRecord, NormalizationError> {
        let bytes = std::fs::read(path)
            .map_err(|e| NormalizationError::new(path, format!("unreadable: {}", e)))?;
        let payload: Value = serde_json::from_slice(&bytes)
            .map_err(|e| NormalizationError::new(path, format!("invalid JSON: {}", e)))?;
        self.normalize_value(path, payload)
    }

    /// Normalize an already-parsed document that was read from `path`.
    pub fn normalize_value(
        &self,
        path: &Path,
        payload: Value,
    ) -> Result<NormalizedRecord, NormalizationError> {
        let fail = |reason: String| NormalizationError::new(path, reason);

        let source_dir = path.parent();
        let source_id = dir_name(source_dir).ok_or_else(|| fail("no source directory".into()))?;
        let partition_key = dir_name(source_dir.and_then(Path::parent))
            .ok_or_else(|| fail("no partition directory".into()))?;

        let doc = payload
            .as_object()
            .ok_or_else(|| fail("expected a JSON object".into()))?;

        let record_id = match first_present(doc, RECORD_ID_KEYS)
            .or_else(|| first_present(doc, INTERNAL_ID_KEYS))
        {
            Some((key, value)) => parse_record_id(value)
                .ok_or_else(|| fail(format!("field {:?} is not an integer id", key)))?,
            None => return Err(fail("no record identifier field".into())),
        };

        let occurred_at = match first_present(doc, OCCURRED_AT_KEYS) {
            Some((key, value)) => parse_timestamp(value)
                .ok_or_else(|| fail(format!("field {:?} is not a recognized timestamp", key)))?,
            None => parse_date(&partition_key).ok_or_else(|| {
                fail(format!(
                    "no timestamp field and partition {:?} is not a date",
                    partition_key
                ))
            })?,
        };

        let text = first_present(doc, TEXT_KEYS)
            .and_then(|(_, v)| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let record_dir = source_dir.unwrap_or_else(|| Path::new(""));
        let media_ref = match first_present(doc, MEDIA_KEYS).and_then(|(_, v)| v.as_str()) {
            Some(s) if !s.is_empty() => {
                let p = PathBuf::from(s);
                Some(if p.is_relative() { record_dir.join(p) } else { p })
            }
            _ => self.sibling_media(record_dir, record_id),
        };

        Ok(NormalizedRecord {
            record_id,
            occurred_at,
            text,
            media_ref,
            raw_payload: payload,
            source_id,
            partition_key,
            source_file: path.to_path_buf(),
        })
    }

    /// A media file next to the record whose stem is the record id.
    fn sibling_media(&self, dir: &Path, record_id: i64) -> Option<PathBuf> {
        self.media_extensions.iter().find_map(|ext| {
            [ext.clone(), ext.to_uppercase()]
                .into_iter()
                .map(|e| dir.join(format!("{}.{}", record_id, e)))
                .find(|p| p.is_file())
        })
    }
}

fn dir_name(dir: Option<&Path>) -> Option<String> {
    dir.and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
}

fn first_present<'a>(doc: &'a Map<String, Value>, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
    keys.iter()
        .find_map(|k| doc.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
}

fn parse_record_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` with or without an offset,
/// `YYYY-MM-DD`, and epoch seconds as a number or string. Fractional
/// seconds are truncated.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            if let Some(dt) = parse_date(s) {
                return Some(dt);
            }
            s.parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
        }
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}
