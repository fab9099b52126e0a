use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Newtype Wrappers
// =============================================================================

/// Seconds since the Unix epoch, UTC.
///
/// Compared by value. Two Timestamps with the same inner value are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }
}

// =============================================================================
// Ingestion
// =============================================================================

/// One raw record after alias resolution.
///
/// Built from exactly one record file and never mutated afterwards.
/// `record_id` is the idempotency key within its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub record_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub text: Option<String>,
    pub media_ref: Option<PathBuf>,
    /// The full parsed document, stored verbatim.
    pub raw_payload: serde_json::Value,
    pub source_id: String,
    pub partition_key: String,
    pub source_file: PathBuf,
}

/// Outcome counts of one load over one or more sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub inserted: u64,
    pub skipped_duplicate: u64,
    pub failed: u64,
}

impl LoadReport {
    pub fn merge(&mut self, other: &LoadReport) {
        self.inserted += other.inserted;
        self.skipped_duplicate += other.skipped_duplicate;
        self.failed += other.failed;
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted={} skipped_duplicate={} failed={}",
            self.inserted, self.skipped_duplicate, self.failed
        )
    }
}

// =============================================================================
// Enrichment
// =============================================================================

/// A loaded record that references a media file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaRef {
    pub source_id: String,
    pub record_id: i64,
    pub media_ref: PathBuf,
}

/// One object reported by the classifier for one media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_label: String,
    pub confidence: f64,
}

/// A detection as persisted, scoped to the record that referenced the media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRow {
    pub source_id: String,
    pub record_id: i64,
    pub media_ref: PathBuf,
    pub detected_class: String,
    pub confidence_score: f64,
    /// `round(confidence_score / granularity)`; part of the uniqueness key.
    pub confidence_bucket: i64,
    pub detected_at: Timestamp,
}

/// Outcome counts of one enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichReport {
    /// Media files successfully classified.
    pub processed: u64,
    pub detections_written: u64,
    /// Detections already persisted by an earlier run.
    pub duplicates: u64,
    pub failed: u64,
}

impl fmt::Display for EnrichReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} detections_written={} duplicates={} failed={}",
            self.processed, self.detections_written, self.duplicates, self.failed
        )
    }
}

// =============================================================================
// Orchestration
// =============================================================================

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Scrape,
    Load,
    Transform,
    Enrich,
}

impl StageName {
    /// Fixed execution order: scrape -> load -> transform -> enrich.
    pub const ALL: [StageName; 4] = [
        StageName::Scrape,
        StageName::Load,
        StageName::Transform,
        StageName::Enrich,
    ];

    /// The single upstream dependency of this stage.
    pub fn dependency(&self) -> Option<StageName> {
        match self {
            StageName::Scrape => None,
            StageName::Load => Some(StageName::Scrape),
            StageName::Transform => Some(StageName::Load),
            StageName::Enrich => Some(StageName::Transform),
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageName::Scrape => write!(f, "scrape"),
            StageName::Load => write!(f, "load"),
            StageName::Transform => write!(f, "transform"),
            StageName::Enrich => write!(f, "enrich"),
        }
    }
}

impl std::str::FromStr for StageName {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrape" => Ok(StageName::Scrape),
            "load" => Ok(StageName::Load),
            "transform" => Ok(StageName::Transform),
            "enrich" => Ok(StageName::Enrich),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// Lifecycle of one stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Failed | StageState::Skipped | StageState::Cancelled
        )
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageState::Pending => write!(f, "pending"),
            StageState::Running => write!(f, "running"),
            StageState::Succeeded => write!(f, "succeeded"),
            StageState::Failed => write!(f, "failed"),
            StageState::Skipped => write!(f, "skipped"),
            StageState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for StageState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageState::Pending),
            "running" => Ok(StageState::Running),
            "succeeded" => Ok(StageState::Succeeded),
            "failed" => Ok(StageState::Failed),
            "skipped" => Ok(StageState::Skipped),
            "cancelled" => Ok(StageState::Cancelled),
            _ => Err(format!("Unknown stage state: {}", s)),
        }
    }
}

/// Overall state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed => write!(f, "failed"),
            RunState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunState::Running),
            "succeeded" => Ok(RunState::Succeeded),
            "failed" => Ok(RunState::Failed),
            "cancelled" => Ok(RunState::Cancelled),
            _ => Err(format!("Unknown run state: {}", s)),
        }
    }
}

/// Status of one stage inside a [`PipelineRun`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    pub stage_name: StageName,
    pub state: StageState,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub error: Option<String>,
    /// Human-readable outcome of a succeeded stage (e.g. a load report).
    pub summary: Option<String>,
}

impl StageStatus {
    pub fn pending(stage_name: StageName) -> Self {
        Self {
            stage_name,
            state: StageState::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            summary: None,
        }
    }
}

/// One invocation of the pipeline and the status of each of its stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub state: RunState,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    /// Ordered as [`StageName::ALL`].
    pub stages: Vec<StageStatus>,
}

impl PipelineRun {
    /// A fresh run with every stage pending.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Running,
            started_at: Timestamp::now(),
            ended_at: None,
            stages: StageName::ALL.iter().copied().map(StageStatus::pending).collect(),
        }
    }

    pub fn stage(&self, name: StageName) -> Option<&StageStatus> {
        self.stages.iter().find(|s| s.stage_name == name)
    }

    pub fn stage_mut(&mut self, name: StageName) -> Option<&mut StageStatus> {
        self.stages.iter_mut().find(|s| s.stage_name == name)
    }

    pub fn state_of(&self, name: StageName) -> Option<StageState> {
        self.stage(name).map(|s| s.state)
    }
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Uniform result of executing a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub success: bool,
    pub error: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
