//! Trading session classification on the New York clock.
//!
//! Sessions are half-open `[start, end)` windows of New York civil time, so
//! the schedule follows US daylight-saving shifts automatically. A window may
//! wrap past midnight (e.g. Asia 19:00 - 03:00).
//!
//! Classification order:
//! 1. Weekend (Friday close .. Sunday open) or configured holiday -> `Weekend`
//! 2. US, London, Asia, DeadZone windows, first match wins
//! 3. Anything else -> `Default`
//!
//! `NoTrade` is never produced here; it is the sizing engine's verdict for a
//! disabled session or a zero multiplier.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

use crate::error::{RiskError, RiskResult};

/// Risk session tag used to scale position size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskSession {
    Asia,
    London,
    US,
    Weekend,
    /// Thin-liquidity gap after the US close.
    DeadZone,
    Default,
    /// Sizing resolved to zero; flatten and skip.
    NoTrade,
}

impl std::fmt::Display for RiskSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asia => write!(f, "Asia"),
            Self::London => write!(f, "London"),
            Self::US => write!(f, "US"),
            Self::Weekend => write!(f, "Weekend"),
            Self::DeadZone => write!(f, "DeadZone"),
            Self::Default => write!(f, "Default"),
            Self::NoTrade => write!(f, "NoTrade"),
        }
    }
}

/// Session window in New York civil time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    /// Start time in HH:MM format (New York).
    pub start: String,
    /// End time in HH:MM format (New York), exclusive.
    pub end: String,
}

impl SessionWindow {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    /// Parse start time as NaiveTime.
    pub fn start_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.start, "%H:%M").ok()
    }

    /// Parse end time as NaiveTime.
    pub fn end_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.end, "%H:%M").ok()
    }

    /// Check if a New York time of day is within this window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let (start, end) = match (self.start_time(), self.end_time()) {
            (Some(s), Some(e)) => (s, e),
            _ => return false,
        };

        if start <= end {
            time >= start && time < end
        } else {
            // Wraps midnight
            time >= start || time < end
        }
    }

    fn validate(&self, name: &str) -> RiskResult<()> {
        if self.start_time().is_none() || self.end_time().is_none() {
            return Err(RiskError::ConfigError(format!(
                "session {name} has malformed window {}-{}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// Session boundaries and market holidays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSchedule {
    #[serde(default = "default_us")]
    pub us: SessionWindow,
    #[serde(default = "default_london")]
    pub london: SessionWindow,
    #[serde(default = "default_asia")]
    pub asia: SessionWindow,
    #[serde(default = "default_dead_zone")]
    pub dead_zone: SessionWindow,
    /// Friday time (New York) at which the weekend begins.
    #[serde(default = "default_friday_close")]
    pub friday_close: String,
    /// Sunday time (New York) at which the weekend ends.
    #[serde(default = "default_sunday_open")]
    pub sunday_open: String,
    /// New York calendar dates treated as weekend.
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

fn default_us() -> SessionWindow {
    SessionWindow::new("08:00", "16:00")
}

fn default_london() -> SessionWindow {
    SessionWindow::new("03:00", "08:00")
}

fn default_asia() -> SessionWindow {
    SessionWindow::new("19:00", "03:00")
}

fn default_dead_zone() -> SessionWindow {
    SessionWindow::new("16:00", "18:00")
}

fn default_friday_close() -> String {
    "17:00".to_string()
}

fn default_sunday_open() -> String {
    "18:00".to_string()
}

impl Default for SessionSchedule {
    fn default() -> Self {
        Self {
            us: default_us(),
            london: default_london(),
            asia: default_asia(),
            dead_zone: default_dead_zone(),
            friday_close: default_friday_close(),
            sunday_open: default_sunday_open(),
            holidays: Vec::new(),
        }
    }
}

impl SessionSchedule {
    /// Reject malformed HH:MM strings up front so classification never
    /// silently skips a window.
    pub fn validate(&self) -> RiskResult<()> {
        self.us.validate("us")?;
        self.london.validate("london")?;
        self.asia.validate("asia")?;
        self.dead_zone.validate("dead_zone")?;
        for (name, value) in [
            ("friday_close", &self.friday_close),
            ("sunday_open", &self.sunday_open),
        ] {
            if NaiveTime::parse_from_str(value, "%H:%M").is_err() {
                return Err(RiskError::ConfigError(format!(
                    "{name} is not HH:MM: {value}"
                )));
            }
        }
        Ok(())
    }

    /// Classify a UTC instant.
    #[must_use]
    pub fn classify(&self, now: DateTime<Utc>) -> RiskSession {
        let ny = now.with_timezone(&New_York);
        let date = ny.date_naive();
        let time = ny.time();

        if self.holidays.contains(&date) || self.is_weekend(ny.weekday(), time) {
            return RiskSession::Weekend;
        }

        if self.us.contains(time) {
            return RiskSession::US;
        }
        if self.london.contains(time) {
            return RiskSession::London;
        }
        if self.asia.contains(time) {
            return RiskSession::Asia;
        }
        if self.dead_zone.contains(time) {
            return RiskSession::DeadZone;
        }

        RiskSession::Default
    }

    fn is_weekend(&self, weekday: Weekday, time: NaiveTime) -> bool {
        let friday_close = NaiveTime::parse_from_str(&self.friday_close, "%H:%M").ok();
        let sunday_open = NaiveTime::parse_from_str(&self.sunday_open, "%H:%M").ok();

        match weekday {
            Weekday::Sat => true,
            Weekday::Fri => friday_close.is_some_and(|close| time >= close),
            Weekday::Sun => sunday_open.map_or(true, |open| time < open),
            _ => false,
        }
    }
}
