use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::resilience::ResultSource;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn starting_at(start: DateTime<Utc>, length: Duration) -> Self {
        Self { start, end: start + length }
    }

    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: Option<String>,
}

/// Answer to "is this window free?" plus where the answer came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvailabilityCheck {
    pub window: TimeWindow,
    pub conflicts: Vec<Conflict>,
    pub source: ResultSource,
}

impl AvailabilityCheck {
    pub fn is_free(&self) -> bool {
        self.conflicts.is_empty()
    }
}
