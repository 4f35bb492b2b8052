//! Core entities for the supplier import pipeline
//!
//! Enum-to-text conversions are explicit (`as_str`/`FromStr`) because the
//! repositories persist these values as TEXT columns and the wire payloads
//! reuse the same stable spellings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Rod building component categories handled by the normalizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PartType {
    Blank,
    TipTop,
    Guide,
    ReelSeat,
    Grip,
    Trim,
    EndCap,
}

impl PartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartType::Blank => "blank",
            PartType::TipTop => "tip_top",
            PartType::Guide => "guide",
            PartType::ReelSeat => "reel_seat",
            PartType::Grip => "grip",
            PartType::Trim => "trim",
            PartType::EndCap => "end_cap",
        }
    }

    pub const ALL: [PartType; 7] = [
        PartType::Blank,
        PartType::TipTop,
        PartType::Guide,
        PartType::ReelSeat,
        PartType::Grip,
        PartType::Trim,
        PartType::EndCap,
    ];
}

impl fmt::Display for PartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blank" => Ok(PartType::Blank),
            "tip_top" => Ok(PartType::TipTop),
            "guide" => Ok(PartType::Guide),
            "reel_seat" => Ok(PartType::ReelSeat),
            "grip" => Ok(PartType::Grip),
            "trim" => Ok(PartType::Trim),
            "end_cap" => Ok(PartType::EndCap),
            other => Err(format!("Invalid part type: {other}")),
        }
    }
}

/// Lifecycle status of an import run.
///
/// `Stuck` is a sentinel set by out-of-band tooling when a run stopped
/// reporting; the stream surfaces it as a non-fatal error event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Preparing,
    Started,
    Staged,
    ReadyToPublish,
    Publishing,
    Published,
    Failed,
    Cancelled,
    Stuck,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Preparing => "preparing",
            RunStatus::Started => "started",
            RunStatus::Staged => "staged",
            RunStatus::ReadyToPublish => "ready_to_publish",
            RunStatus::Publishing => "publishing",
            RunStatus::Published => "published",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Stuck => "stuck",
        }
    }

    /// Terminal states release the template lock and close any streams.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Published | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparing" => Ok(RunStatus::Preparing),
            "started" => Ok(RunStatus::Started),
            "staged" => Ok(RunStatus::Staged),
            "ready_to_publish" => Ok(RunStatus::ReadyToPublish),
            "publishing" => Ok(RunStatus::Publishing),
            "published" => Ok(RunStatus::Published),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            "stuck" => Ok(RunStatus::Stuck),
            other => Err(format!("Invalid run status: {other}")),
        }
    }
}

/// Classification assigned by the diff engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    Add,
    Change,
    Delete,
    Conflict,
}

impl DiffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffType::Add => "add",
            DiffType::Change => "change",
            DiffType::Delete => "delete",
            DiffType::Conflict => "conflict",
        }
    }
}

impl FromStr for DiffType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(DiffType::Add),
            "change" => Ok(DiffType::Change),
            "delete" => Ok(DiffType::Delete),
            "conflict" => Ok(DiffType::Conflict),
            other => Err(format!("Invalid diff type: {other}")),
        }
    }
}

/// Reviewer decision attached to a diff record after staging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approve,
    Reject,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Approve => "approve",
            Resolution::Reject => "reject",
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Resolution::Approve),
            "reject" => Ok(Resolution::Reject),
            other => Err(format!("Invalid resolution: {other}")),
        }
    }
}

/// How a supplier source URL entered the system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    /// Manually seeded by an operator.
    Forced,
    /// Harvested by the discovery crawler.
    Discovered,
}

impl SourceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceOrigin::Forced => "forced",
            SourceOrigin::Discovered => "discovered",
        }
    }
}

impl FromStr for SourceOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forced" => Ok(SourceOrigin::Forced),
            "discovered" => Ok(SourceOrigin::Discovered),
            other => Err(format!("Invalid source origin: {other}")),
        }
    }
}

/// A supplier detail-page URL known to the system.
///
/// Refreshed on every rediscovery; never hard-deleted except by explicit
/// purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierSource {
    pub supplier_id: String,
    pub url: String,
    pub external_id: Option<String>,
    pub origin: SourceOrigin,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Raw product data extracted by a site adapter from one detail page.
///
/// Everything here is untyped supplier text; the normalizer owns turning
/// it into comparable fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProduct {
    pub supplier_id: String,
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    /// Label/value pairs scraped from the spec table, insertion order kept.
    pub spec_pairs: Vec<(String, String)>,
    pub sku: Option<String>,
    pub images: Vec<String>,
    pub price_msrp: Option<f64>,
    pub price_wholesale: Option<f64>,
    pub availability: Option<String>,
}

impl RawProduct {
    /// Case-insensitive lookup into the scraped spec table.
    pub fn spec_value(&self, label: &str) -> Option<&str> {
        self.spec_pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(label))
            .map(|(_, v)| v.as_str())
    }
}

/// One row per (supplier, external id), overwritten on every
/// normalization pass. `content_hash` is the only equality signal the
/// diff engine trusts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedRecord {
    pub supplier_id: String,
    pub external_id: String,
    pub title: String,
    pub part_type: PartType,
    pub raw_specs: serde_json::Value,
    pub norm_specs: BTreeMap<String, serde_json::Value>,
    pub images: Vec<String>,
    pub price_msrp: Option<f64>,
    pub price_wholesale: Option<f64>,
    pub availability: Option<String>,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

/// Durable product representation behind the canonical store.
///
/// Records imported before hash tracking carry `content_hash = None`; the
/// diff engine recomputes a hash from the comparable tuple in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub supplier_id: String,
    pub external_id: String,
    pub title: String,
    pub part_type: PartType,
    pub norm_specs: BTreeMap<String, serde_json::Value>,
    pub images: Vec<String>,
    pub content_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Diff-type frequencies for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffCounts {
    pub adds: u32,
    pub changes: u32,
    pub deletes: u32,
    pub unchanged: u32,
}

/// Data-quality counters surfaced alongside the diff counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightCounts {
    pub missing_images: u32,
    pub missing_wholesale: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub counts: DiffCounts,
    pub preflight: PreflightCounts,
}

/// Incrementally updated progress written by the background pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunProgress {
    pub percent: f64,
    pub phase: String,
    pub details: Option<String>,
}

/// One crawl/stage/approve/publish cycle. Immutable once `finished_at`
/// is set, except for post-hoc verification metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: String,
    pub supplier_id: String,
    pub template_id: String,
    pub status: RunStatus,
    pub summary: RunSummary,
    pub progress: RunProgress,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A single classified delta between staged and canonical data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDiffRecord {
    pub id: String,
    pub import_run_id: String,
    pub external_id: String,
    pub diff_type: DiffType,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub resolution: Option<Resolution>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Audit log entry kinds. Guard decisions query these by their stable
/// string form, so the spellings must not change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    RecrawlStarted,
    PublishInProgress,
    PublishFinished,
    PipelineError,
    RunFailed,
    RunCancelled,
    DiffStaged,
    Info,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::RecrawlStarted => "recrawl_started",
            LogType::PublishInProgress => "publish_in_progress",
            LogType::PublishFinished => "publish_finished",
            LogType::PipelineError => "pipeline_error",
            LogType::RunFailed => "run_failed",
            LogType::RunCancelled => "run_cancelled",
            LogType::DiffStaged => "diff_staged",
            LogType::Info => "info",
        }
    }
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recrawl_started" => Ok(LogType::RecrawlStarted),
            "publish_in_progress" => Ok(LogType::PublishInProgress),
            "publish_finished" => Ok(LogType::PublishFinished),
            "pipeline_error" => Ok(LogType::PipelineError),
            "run_failed" => Ok(LogType::RunFailed),
            "run_cancelled" => Ok(LogType::RunCancelled),
            "diff_staged" => Ok(LogType::DiffStaged),
            "info" => Ok(LogType::Info),
            other => Err(format!("Invalid log type: {other}")),
        }
    }
}

/// Append-only audit trail entry; also the substrate for the stream's
/// log tail and the recrawl/publish guard windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportLog {
    pub id: i64,
    pub template_id: String,
    pub run_id: Option<String>,
    pub log_type: LogType,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Per-template crawl configuration.
///
/// `preparing_run_id` doubles as the mutual-exclusion lock for the whole
/// crawl/stage cycle: at most one non-null value per template, cleared on
/// every terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub supplier_id: String,
    pub name: String,
    pub start_url: String,
    pub part_type: PartType,
    pub auto_approve: bool,
    pub preparing_run_id: Option<String>,
}
