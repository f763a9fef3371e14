//! Avatar identity and policy.
//!
//! An [`AvatarProfile`] is loaded once at startup and never changes. The
//! [`AvatarRunner`] trait is the seam between the scheduler, which only
//! knows ids, and the runtime, which knows how to run a cycle.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ModelOptions;

/// Avatars are addressed by the stem of their profile file.
pub type AvatarId = String;

/// Upper bound for interval periods and jitter: ten years.
pub const MAX_SCHEDULE_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// When an avatar's recurring work fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Fixed period plus a uniform random delay in `[0, jitter_secs]`.
    Interval { every_secs: u64, jitter_secs: u64 },
    /// Five-field cron expression, evaluated in UTC.
    Cron { expression: String },
}

/// Weekdays (0 = Monday) and a `[start_hour, end_hour)` UTC range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub days: Vec<u8>,
    #[serde(default)]
    pub start_hour: u8,
    #[serde(default = "default_end_hour")]
    pub end_hour: u8,
}

fn default_end_hour() -> u8 {
    24
}

impl ActiveWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let day = now.weekday().num_days_from_monday() as u8;
        let hour = now.hour() as u8;
        self.days.contains(&day) && self.start_hour <= hour && hour < self.end_hour
    }
}

/// No windows means always active.
pub fn is_active(windows: &[ActiveWindow], now: DateTime<Utc>) -> bool {
    windows.is_empty() || windows.iter().any(|w| w.contains(now))
}

/// A connector declared in a profile: its kind plus free-form settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    pub kind: String,
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

/// Immutable identity and policy of one avatar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarProfile {
    pub id: AvatarId,
    pub name: String,
    pub personality: String,
    pub skills: Vec<String>,

    /// Enabled tool names; always a subset of the registry
    pub tools: Vec<String>,

    /// Model backend name (key into the gateway)
    pub backend: String,
    pub model: String,
    pub options: ModelOptions,

    /// Maximum turns kept per conversation
    pub history_limit: usize,

    /// Whether the pipeline consults the retrieval client
    pub rag: bool,

    pub schedule: ScheduleSpec,
    pub active_windows: Vec<ActiveWindow>,
    pub connectors: Vec<ConnectorSpec>,

    /// Bus topics this avatar subscribes to
    pub topics: Vec<String>,

    /// Avatar that receives hand-offs of ignored items
    pub escalate_to: Option<AvatarId>,
}

impl AvatarProfile {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        is_active(&self.active_windows, now)
    }
}

/// What one run over an avatar's connectors did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub replied: usize,
    pub ignored: usize,
    /// Items the pipeline could not produce a reply for
    pub failed: usize,
    pub send_failures: usize,
    pub fetch_failures: usize,
}

impl CycleReport {
    pub fn merge(&mut self, other: &CycleReport) {
        self.fetched += other.fetched;
        self.replied += other.replied;
        self.ignored += other.ignored;
        self.failed += other.failed;
        self.send_failures += other.send_failures;
        self.fetch_failures += other.fetch_failures;
    }
}

/// Runs one scheduled cycle for an avatar.
#[async_trait]
pub trait AvatarRunner: Send + Sync {
    async fn run_avatar(&self, id: &str) -> CycleReport;
}
