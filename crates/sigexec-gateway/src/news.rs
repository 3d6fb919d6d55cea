//! Macro calendar sources for the news gate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sigexec_core::NewsEvent;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::BoxFuture;

/// Source of high-importance macro events.
pub trait NewsSource: Send + Sync {
    /// Events with `importance == 1` whose time falls in `[from, to]`.
    /// An empty `countries` list matches every country.
    fn fetch_important_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        countries: &[String],
    ) -> BoxFuture<'_, GatewayResult<Vec<NewsEvent>>>;
}

/// Arc wrapper for news source trait objects.
pub type DynNewsSource = Arc<dyn NewsSource>;

fn select(
    events: impl IntoIterator<Item = NewsEvent>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    countries: &[String],
) -> Vec<NewsEvent> {
    events
        .into_iter()
        .filter(|e| e.is_high_importance())
        .filter(|e| e.event_time_utc >= from && e.event_time_utc <= to)
        .filter(|e| countries.is_empty() || countries.iter().any(|c| c.eq_ignore_ascii_case(&e.country)))
        .collect()
}

/// Fixed in-memory event list.
#[derive(Debug, Default)]
pub struct StaticNewsSource {
    events: Mutex<Vec<NewsEvent>>,
    failing: AtomicBool,
}

impl StaticNewsSource {
    pub fn new(events: Vec<NewsEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            failing: AtomicBool::new(false),
        }
    }

    pub fn push(&self, event: NewsEvent) {
        self.events.lock().push(event);
    }

    /// Make every fetch fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl NewsSource for StaticNewsSource {
    fn fetch_important_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        countries: &[String],
    ) -> BoxFuture<'_, GatewayResult<Vec<NewsEvent>>> {
        let countries = countries.to_vec();
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(GatewayError::Source("calendar unavailable".to_string()));
            }
            let events = self.events.lock().clone();
            Ok(select(events, from, to, &countries))
        })
    }
}

/// JSON calendar file (array of events), re-read on every fetch so an
/// external job can refresh it in place.
#[derive(Debug, Clone)]
pub struct CalendarFileSource {
    path: PathBuf,
}

impl CalendarFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NewsSource for CalendarFileSource {
    fn fetch_important_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        countries: &[String],
    ) -> BoxFuture<'_, GatewayResult<Vec<NewsEvent>>> {
        let countries = countries.to_vec();
        Box::pin(async move {
            let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
                GatewayError::Source(format!("failed to read {}: {e}", self.path.display()))
            })?;
            let events: Vec<NewsEvent> = serde_json::from_str(&content).map_err(|e| {
                GatewayError::Source(format!("failed to parse {}: {e}", self.path.display()))
            })?;
            let selected = select(events, from, to, &countries);
            debug!(
                path = %self.path.display(),
                count = selected.len(),
                "Loaded calendar events"
            );
            Ok(selected)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::io::Write;

    fn event(id: &str, country: &str, importance: u8, at: DateTime<Utc>) -> NewsEvent {
        NewsEvent {
            id: id.to_string(),
            title: id.to_uppercase(),
            country: country.to_string(),
            importance,
            event_time_utc: at,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 6, 13, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_static_source_filters() {
        let source = StaticNewsSource::new(vec![
            event("nfp", "US", 1, t0()),
            event("pmi", "US", 2, t0()),
            event("ecb", "EU", 1, t0()),
            event("late", "US", 1, t0() + Duration::hours(5)),
        ]);
        let events = source
            .fetch_important_events(t0() - Duration::hours(1), t0() + Duration::hours(1), &["us".to_string()])
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "nfp");

        let all = source
            .fetch_important_events(t0(), t0(), &[])
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_static_source_failure() {
        let source = StaticNewsSource::default();
        source.set_failing(true);
        let result = source.fetch_important_events(t0(), t0(), &[]).await;
        assert!(matches!(result, Err(GatewayError::Source(_))));
    }

    #[tokio::test]
    async fn test_calendar_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let events = vec![event("cpi", "US", 1, t0()), event("claims", "US", 3, t0())];
        write!(file, "{}", serde_json::to_string(&events).unwrap()).unwrap();

        let source = CalendarFileSource::new(file.path());
        let fetched = source
            .fetch_important_events(t0() - Duration::minutes(15), t0() + Duration::minutes(15), &["US".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, "cpi");
    }

    #[tokio::test]
    async fn test_calendar_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let source = CalendarFileSource::new(dir.path().join("missing.json"));
        let result = source.fetch_important_events(t0(), t0(), &[]).await;
        assert!(matches!(result, Err(GatewayError::Source(_))));
    }
}
