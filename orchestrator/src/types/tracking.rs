use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one (target, action) pair in the tracking ledger.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrackingStatus {
    /// Materialized before execution, never attempted in this ledger
    Pending,
    /// An attempt was started and has not been recorded as finished
    InProgress,
    Success,
    Failed,
    Skipped,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEntry {
    pub status: TrackingStatus,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl TrackingEntry {
    pub fn pending() -> Self {
        Self { status: TrackingStatus::Pending, attempts: 0, last_attempt: None, last_error: None }
    }
}

impl Default for TrackingEntry {
    fn default() -> Self {
        Self::pending()
    }
}
