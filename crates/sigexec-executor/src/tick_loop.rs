//! Periodic tick driver for one controller.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::OrderController;
use crate::error::ControllerError;

/// Runs [`OrderController::run_tick`] on a fixed interval until shutdown.
///
/// Ticks that overrun the interval are skipped rather than bunched, and the
/// shutdown token is handed to each tick so an in-flight call is cancelled
/// promptly.
pub struct TickLoop {
    controller: Arc<OrderController>,
    shutdown: CancellationToken,
    interval: Duration,
}

impl TickLoop {
    #[must_use]
    pub fn new(controller: Arc<OrderController>, shutdown: CancellationToken) -> Self {
        let interval = controller.config().tick_interval();
        Self {
            controller,
            shutdown,
            interval,
        }
    }

    /// Override the configured tick interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until the shutdown token fires. Returns the number of ticks run.
    pub async fn run(self) -> u64 {
        let account = self.controller.account();
        info!(
            user_id = %account.user_id,
            symbol = %account.symbol,
            exchange = %self.controller.exchange(),
            interval_ms = self.interval.as_millis() as u64,
            "Tick loop started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    ticks += 1;
                    match self.controller.run_tick(&self.shutdown).await {
                        Ok(outcome) => debug!(tick = ticks, outcome = outcome.label(), "Tick complete"),
                        Err(ControllerError::Cancelled) => break,
                        // Already logged and audited inside the tick.
                        Err(e) => debug!(tick = ticks, kind = e.kind(), "Tick ended with error"),
                    }
                }
            }
        }

        if ticks == 0 {
            warn!(user_id = %account.user_id, "Tick loop stopped before first tick");
        }
        info!(user_id = %account.user_id, ticks, "Tick loop stopped");
        ticks
    }
}
