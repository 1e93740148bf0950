//! Per-request deadlines and the best-effort step runner.
//!
//! Hard steps of a turn (session resolution, history, embedding, retrieval)
//! run through [`Deadline::run`], which aborts the in-flight call when the
//! request timeout expires or the caller cancels, and reports which step was
//! interrupted. Best-effort steps run through [`best_effort`], which gives
//! each step its own time box and turns every failure into a logged `None`.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};

/// Request-scoped timeout plus cancellation signal.
#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    expires_at: Option<Instant>,
    cancel: CancellationToken,
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Deadline {
    pub fn new(timeout: Option<Duration>, cancel: Option<CancellationToken>) -> Self {
        let started = Instant::now();
        Self {
            started,
            expires_at: timeout.map(|t| started + t),
            cancel: cancel.unwrap_or_default(),
        }
    }

    /// No timeout and a token nobody else holds.
    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before expiry, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` to completion unless the deadline expires or the request
    /// is cancelled first. The future is dropped on abort.
    pub async fn run<T, F>(&self, step: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(CoreError::Cancelled { step });
        }
        if self.is_expired() {
            return Err(self.timeout_error(step));
        }

        let bounded = async {
            match self.remaining() {
                Some(remaining) => match tokio::time::timeout(remaining, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(self.timeout_error(step)),
                },
                None => fut.await,
            }
        };

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CoreError::Cancelled { step }),
            result = bounded => result,
        };
        tracing::debug!(
            step,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "step finished"
        );
        result
    }

    fn timeout_error(&self, step: &'static str) -> CoreError {
        CoreError::Timeout {
            step,
            elapsed: self.elapsed(),
        }
    }
}

/// Run a step whose failure must not fail the enclosing request.
///
/// Errors and time-outs are logged at `warn` and turned into `None`.
pub async fn best_effort<T, F>(step: &'static str, limit: Duration, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(step, error = %e, "best-effort step failed; continuing");
            None
        }
        Err(_) => {
            tracing::warn!(
                step,
                limit_ms = limit.as_millis() as u64,
                "best-effort step timed out; skipped"
            );
            None
        }
    }
}
