//! Macro calendar events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Importance level that participates in trade gating.
pub const HIGH_IMPORTANCE: u8 = 1;

/// Economic calendar entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsEvent {
    pub id: String,
    pub title: String,
    pub country: String,
    /// 1 = high importance; larger numbers are less important.
    pub importance: u8,
    pub event_time_utc: DateTime<Utc>,
}

impl NewsEvent {
    pub fn is_high_importance(&self) -> bool {
        self.importance == HIGH_IMPORTANCE
    }
}
