//! At most one running tick per account.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Registry of accounts with a tick in progress, keyed by
/// `(user_id, exchange)`.
#[derive(Debug, Default)]
pub struct SingleFlight {
    active: DashMap<(String, String), ()>,
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the key. `None` if a tick for it is already running.
    pub fn try_acquire(self: &Arc<Self>, user_id: &str, exchange: &str) -> Option<FlightGuard> {
        let key = (user_id.to_string(), exchange.to_string());
        match self.active.entry(key.clone()) {
            Entry::Occupied(_) => {
                debug!(user_id, exchange, "Tick already in flight");
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(FlightGuard {
                    owner: Arc::clone(self),
                    key,
                })
            }
        }
    }

    pub fn is_active(&self, user_id: &str, exchange: &str) -> bool {
        self.active
            .contains_key(&(user_id.to_string(), exchange.to_string()))
    }
}

/// Releases the claim on drop.
#[derive(Debug)]
pub struct FlightGuard {
    owner: Arc<SingleFlight>,
    key: (String, String),
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.owner.active.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_rejected_until_release() {
        let flights = SingleFlight::new();
        let guard = flights.try_acquire("u1", "bybit").unwrap();
        assert!(flights.try_acquire("u1", "bybit").is_none());
        assert!(flights.is_active("u1", "bybit"));

        // Other accounts are independent.
        let other = flights.try_acquire("u2", "bybit");
        assert!(other.is_some());

        drop(guard);
        assert!(!flights.is_active("u1", "bybit"));
        assert!(flights.try_acquire("u1", "bybit").is_some());
    }
}
