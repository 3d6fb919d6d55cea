//! News-event trade gate.
//!
//! Every high-importance event blocks new entries for
//! `[event - block_before, event + block_after]`, both ends inclusive.
//! When several windows are active the decision reports the one ending last,
//! and `next_allowed_utc` follows overlapping windows until none remain.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sigexec_core::NewsEvent;
use std::path::PathBuf;

use crate::error::{RiskError, RiskResult};

/// News gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsGateConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_block_minutes")]
    pub block_before_minutes: i64,
    #[serde(default = "default_block_minutes")]
    pub block_after_minutes: i64,
    /// Country codes to fetch events for. Empty means all countries.
    #[serde(default = "default_countries")]
    pub countries: Vec<String>,
    /// Allow entries when the news source cannot be reached.
    #[serde(default)]
    pub fail_open: bool,
    /// JSON calendar file; when unset no events are known.
    #[serde(default)]
    pub calendar_file: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

fn default_block_minutes() -> i64 {
    15
}

fn default_countries() -> Vec<String> {
    vec!["US".to_string()]
}

impl Default for NewsGateConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            block_before_minutes: default_block_minutes(),
            block_after_minutes: default_block_minutes(),
            countries: default_countries(),
            fail_open: false,
            calendar_file: None,
        }
    }
}

impl NewsGateConfig {
    pub fn validate(&self) -> RiskResult<()> {
        if self.block_before_minutes < 0 || self.block_after_minutes < 0 {
            return Err(RiskError::ConfigError(
                "news block windows must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn block_before(&self) -> Duration {
        Duration::minutes(self.block_before_minutes)
    }

    pub fn block_after(&self) -> Duration {
        Duration::minutes(self.block_after_minutes)
    }

    /// Range of event times that can block an entry at `now`.
    pub fn fetch_range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.block_after(), now + self.block_before())
    }

    /// Gate decision with this config's windows.
    pub fn decide(&self, now: DateTime<Utc>, events: &[NewsEvent]) -> TradeGateDecision {
        if !self.enabled {
            return TradeGateDecision::allow(now);
        }
        can_enter_trade_at(now, events, self.block_before(), self.block_after())
    }
}

/// Outcome of the news gate. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeGateDecision {
    pub allowed: bool,
    pub blocking_event: Option<NewsEvent>,
    pub block_window_from: Option<DateTime<Utc>>,
    pub block_window_to: Option<DateTime<Utc>>,
    /// Earliest instant after which no known window blocks; `now` if allowed.
    pub next_allowed_utc: DateTime<Utc>,
}

impl TradeGateDecision {
    fn allow(now: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            blocking_event: None,
            block_window_from: None,
            block_window_to: None,
            next_allowed_utc: now,
        }
    }
}

struct BlockWindow<'a> {
    event: &'a NewsEvent,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

/// Decide whether a new entry may be opened at `now`.
#[must_use]
pub fn can_enter_trade_at(
    now: DateTime<Utc>,
    events: &[NewsEvent],
    block_before: Duration,
    block_after: Duration,
) -> TradeGateDecision {
    let windows: Vec<BlockWindow<'_>> = events
        .iter()
        .filter(|e| e.is_high_importance())
        .map(|event| BlockWindow {
            event,
            from: event.event_time_utc - block_before,
            to: event.event_time_utc + block_after,
        })
        .collect();

    // Latest-ending active window; first one wins a tie.
    let mut blocking: Option<&BlockWindow<'_>> = None;
    for window in windows.iter().filter(|w| w.from <= now && now <= w.to) {
        if blocking.map_or(true, |b| window.to > b.to) {
            blocking = Some(window);
        }
    }

    let Some(blocking) = blocking else {
        return TradeGateDecision::allow(now);
    };

    let mut next_allowed = blocking.to;
    loop {
        let extended = windows
            .iter()
            .filter(|w| w.from <= next_allowed && w.to > next_allowed)
            .map(|w| w.to)
            .max();
        match extended {
            Some(to) => next_allowed = to,
            None => break,
        }
    }

    TradeGateDecision {
        allowed: false,
        blocking_event: Some(blocking.event.clone()),
        block_window_from: Some(blocking.from),
        block_window_to: Some(blocking.to),
        next_allowed_utc: next_allowed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str, at: DateTime<Utc>, importance: u8) -> NewsEvent {
        NewsEvent {
            id: id.to_string(),
            title: format!("event {id}"),
            country: "US".to_string(),
            importance,
            event_time_utc: at,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 13, 30, 0).unwrap()
    }

    fn gate(now: DateTime<Utc>, events: &[NewsEvent]) -> TradeGateDecision {
        can_enter_trade_at(now, events, Duration::minutes(15), Duration::minutes(15))
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let events = vec![event("nfp", t0(), 1)];

        assert!(!gate(t0() - Duration::minutes(15), &events).allowed);
        assert!(!gate(t0(), &events).allowed);
        assert!(!gate(t0() + Duration::minutes(15), &events).allowed);

        let before = t0() - Duration::minutes(15) - Duration::nanoseconds(1);
        assert!(gate(before, &events).allowed);
        let after = t0() + Duration::minutes(15) + Duration::nanoseconds(1);
        assert!(gate(after, &events).allowed);
    }

    #[test]
    fn test_blocked_decision_reports_window() {
        let events = vec![event("cpi", t0(), 1)];
        let decision = gate(t0() - Duration::minutes(5), &events);

        assert!(!decision.allowed);
        assert_eq!(decision.blocking_event.as_ref().map(|e| e.id.as_str()), Some("cpi"));
        assert_eq!(decision.block_window_from, Some(t0() - Duration::minutes(15)));
        assert_eq!(decision.block_window_to, Some(t0() + Duration::minutes(15)));
        assert_eq!(decision.next_allowed_utc, t0() + Duration::minutes(15));
    }

    #[test]
    fn test_low_importance_events_ignored() {
        let events = vec![event("pmi", t0(), 2), event("claims", t0(), 3)];
        let decision = gate(t0(), &events);
        assert!(decision.allowed);
        assert!(decision.blocking_event.is_none());
        assert_eq!(decision.next_allowed_utc, t0());
    }

    #[test]
    fn test_overlapping_windows_report_latest_end() {
        // Windows [13:15, 13:45] and [13:25, 13:55]
        let events = vec![
            event("early", t0(), 1),
            event("late", t0() + Duration::minutes(10), 1),
        ];
        let decision = gate(t0() + Duration::minutes(1), &events);

        assert!(!decision.allowed);
        assert_eq!(decision.blocking_event.unwrap().id, "late");
        assert_eq!(decision.next_allowed_utc, t0() + Duration::minutes(25));
    }

    #[test]
    fn test_next_allowed_chains_future_windows() {
        // Only "first" is active at 13:20; "second" starts at 13:40, before
        // "first" ends at 13:45, so entries stay blocked until 14:10.
        let events = vec![
            event("first", t0(), 1),
            event("second", t0() + Duration::minutes(25), 1),
        ];
        let decision = gate(t0() - Duration::minutes(10), &events);

        assert!(!decision.allowed);
        assert_eq!(decision.blocking_event.unwrap().id, "first");
        assert_eq!(decision.block_window_to, Some(t0() + Duration::minutes(15)));
        assert_eq!(decision.next_allowed_utc, t0() + Duration::minutes(40));
    }

    #[test]
    fn test_disjoint_future_window_not_chained() {
        let events = vec![
            event("first", t0(), 1),
            event("later", t0() + Duration::hours(2), 1),
        ];
        let decision = gate(t0(), &events);
        assert_eq!(decision.next_allowed_utc, t0() + Duration::minutes(15));
    }

    #[test]
    fn test_disabled_gate_allows() {
        let config = NewsGateConfig {
            enabled: false,
            ..Default::default()
        };
        let events = vec![event("fomc", t0(), 1)];
        assert!(config.decide(t0(), &events).allowed);
        assert!(!NewsGateConfig::default().decide(t0(), &events).allowed);
    }

    #[test]
    fn test_fetch_range() {
        let config = NewsGateConfig {
            block_before_minutes: 30,
            block_after_minutes: 10,
            ..Default::default()
        };
        let (from, to) = config.fetch_range(t0());
        assert_eq!(from, t0() - Duration::minutes(10));
        assert_eq!(to, t0() + Duration::minutes(30));
    }

    #[test]
    fn test_config_validation() {
        assert!(NewsGateConfig::default().validate().is_ok());
        let config = NewsGateConfig {
            block_after_minutes: -1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
