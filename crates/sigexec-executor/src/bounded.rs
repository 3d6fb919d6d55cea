//! Deadline- and cancellation-bounded calls.
//!
//! Every gateway and store call in a tick runs through [`CallGuard::run`]:
//! the tick's cancellation token wins over the call, and each call gets
//! its own deadline. Cancellation surfaces as [`ControllerError::Cancelled`]
//! and a missed deadline as [`ControllerError::CallTimeout`], never as a
//! stale value.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sigexec_telemetry::Metrics;

use crate::error::{ControllerError, ControllerResult};

#[derive(Debug, Clone)]
pub struct CallGuard {
    cancel: CancellationToken,
    timeout: Duration,
}

impl CallGuard {
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Await `fut` under the tick's token and the per-call deadline.
    pub async fn run<T, F>(&self, op: &'static str, fut: F) -> ControllerResult<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ControllerError::Cancelled),
            result = tokio::time::timeout(self.timeout, fut) => {
                result.map_err(|_| ControllerError::CallTimeout {
                    op,
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// [`run`](Self::run) for a gateway call, recording its latency.
    pub async fn gateway<T, E, F>(
        &self,
        exchange: &str,
        op: &'static str,
        fut: F,
    ) -> ControllerResult<Result<T, E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = self.run(op, fut).await;
        let ok = matches!(result, Ok(Ok(_)));
        Metrics::gateway_latency(exchange, op, ok, started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Sleep that wakes early with [`ControllerError::Cancelled`].
    pub async fn sleep(&self, duration: Duration) -> ControllerResult<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ControllerError::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_call_completes_within_deadline() {
        let guard = CallGuard::new(CancellationToken::new(), Duration::from_secs(1));
        let value = guard
            .run("fast", async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                7
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_deadline() {
        let guard = CallGuard::new(CancellationToken::new(), Duration::from_millis(250));
        let result = guard
            .run("slow", tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(matches!(
            result,
            Err(ControllerError::CallTimeout {
                op: "slow",
                timeout_ms: 250
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wins_over_call() {
        let token = CancellationToken::new();
        token.cancel();
        let guard = CallGuard::new(token, Duration::from_secs(1));
        let result = guard.run("any", async { 1 }).await;
        assert!(matches!(result, Err(ControllerError::Cancelled)));
        assert!(guard.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let token = CancellationToken::new();
        let guard = CallGuard::new(token.clone(), Duration::from_secs(1));
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let result = guard.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(ControllerError::Cancelled)));
        canceller.await.unwrap();
    }
}
