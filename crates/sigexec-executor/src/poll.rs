//! Bounded position polling.
//!
//! Used to confirm an entry fill and to confirm a symbol is flat before the
//! entry is placed. Polls at a fixed interval until the check yields a value
//! or the wall-clock deadline passes; never retries past the deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use sigexec_telemetry::Metrics;

use crate::bounded::CallGuard;
use crate::error::{ControllerError, ControllerResult};

/// Poll cadence and deadline for one verification.
#[derive(Debug, Clone, Copy)]
pub struct PollSpec {
    /// Label for logs and metrics (`entry`, `flatten`).
    pub purpose: &'static str,
    pub interval: Duration,
    pub deadline: Duration,
}

/// Run `check` until it returns `Some`, the deadline passes, or the tick is
/// cancelled. Returns the value and the number of polls made.
///
/// A failed check is logged and polled again; only cancellation aborts
/// early.
pub async fn poll_until<T, F, Fut>(guard: &CallGuard, spec: PollSpec, mut check: F) -> ControllerResult<(T, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControllerResult<Option<T>>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match check().await {
            Ok(Some(value)) => {
                debug!(purpose = spec.purpose, attempts, "Verification confirmed");
                Metrics::verify_polls(spec.purpose, true, attempts);
                return Ok((value, attempts));
            }
            Ok(None) => {}
            Err(ControllerError::Cancelled) => return Err(ControllerError::Cancelled),
            Err(e) => warn!(purpose = spec.purpose, attempts, error = %e, "Verification poll failed"),
        }

        let elapsed = started.elapsed();
        if elapsed >= spec.deadline {
            Metrics::verify_polls(spec.purpose, false, attempts);
            return Err(ControllerError::VerificationTimeout {
                purpose: spec.purpose,
                attempts,
            });
        }
        guard.sleep(spec.interval.min(spec.deadline - elapsed)).await?;
    }
}
