//! Category-keyed retry policies with exponential backoff and jitter
//! (spec.md §4.6).
//!
//! The teacher's `tower-resilience-retry` crate is a generic `tower::Layer`
//! with a pluggable `IntervalFunction` and an optional token-bucket budget.
//! The spec doesn't call for a retry budget or a generic backoff trait —
//! it calls for one fixed policy table, one row per [`ErrorCategory`], so
//! this module keeps the teacher's event system and its
//! success/retry/exhausted/ignored event shape but drops the budget and
//! the `tower::Service` wrapping in favor of a plain async `execute`
//! function the orchestrator and client call directly.

use ingest_core::{EngineEvent, ErrorCategory, ErrorRecord, EventListener, EventListeners};
use parking_lot::Mutex;
use rand::Rng;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub use_circuit_breaker: bool,
}

impl RetryPolicy {
    /// The interval before attempt `attempt` (0-indexed, so `attempt=0` is
    /// the delay before the first retry), before jitter is applied.
    fn base_interval(&self, attempt: u32) -> Duration {
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_interval.as_secs_f64()))
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_interval(attempt);
        if !self.jitter {
            return base;
        }
        let factor = rand::rng().random_range(0.5..=1.5);
        Duration::from_secs_f64((base.as_secs_f64() * factor).min(self.max_interval.as_secs_f64()))
    }
}

/// The policy table from spec.md §4.6. Authentication errors retry less
/// aggressively and never touch the circuit breaker (a 401 is usually a
/// single-shot refresh-and-retry, not sustained upstream unavailability).
/// Client and filesystem/parse errors are not retried at all.
pub fn policy_for(category: ErrorCategory) -> Option<RetryPolicy> {
    match category {
        ErrorCategory::Network => Some(RetryPolicy {
            max_attempts: 5,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
            use_circuit_breaker: true,
        }),
        ErrorCategory::Authentication => Some(RetryPolicy {
            max_attempts: 2,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            multiplier: 1.5,
            jitter: false,
            use_circuit_breaker: false,
        }),
        // HTTP 5xx retries under the operation policy, per spec (§7
        // "ServerError: HTTP 5xx — retryable under operation policy").
        ErrorCategory::Server | ErrorCategory::Operation => Some(RetryPolicy {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(15),
            multiplier: 2.0,
            jitter: true,
            use_circuit_breaker: true,
        }),
        ErrorCategory::RateLimit => Some(RetryPolicy {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            multiplier: 1.0,
            jitter: false,
            use_circuit_breaker: false,
        }),
        ErrorCategory::Client
        | ErrorCategory::Filesystem
        | ErrorCategory::Parse
        | ErrorCategory::Cancelled
        | ErrorCategory::CircuitOpen => None,
    }
}

#[derive(Debug, Clone)]
pub enum RetryEvent {
    Retry {
        operation: String,
        attempt: u32,
        delay: Duration,
        timestamp: Instant,
    },
    Success {
        operation: String,
        attempts: u32,
        timestamp: Instant,
    },
    Exhausted {
        operation: String,
        attempts: u32,
        timestamp: Instant,
    },
    IgnoredError {
        operation: String,
        timestamp: Instant,
    },
}

impl RetryEvent {
    fn operation(&self) -> &str {
        match self {
            RetryEvent::Retry { operation, .. }
            | RetryEvent::Success { operation, .. }
            | RetryEvent::Exhausted { operation, .. }
            | RetryEvent::IgnoredError { operation, .. } => operation,
        }
    }

    fn ts(&self) -> Instant {
        match self {
            RetryEvent::Retry { timestamp, .. }
            | RetryEvent::Success { timestamp, .. }
            | RetryEvent::Exhausted { timestamp, .. }
            | RetryEvent::IgnoredError { timestamp, .. } => *timestamp,
        }
    }
}

impl EngineEvent for RetryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RetryEvent::Retry { .. } => "retry_attempt",
            RetryEvent::Success { .. } => "retry_success",
            RetryEvent::Exhausted { .. } => "retry_exhausted",
            RetryEvent::IgnoredError { .. } => "retry_ignored_error",
        }
    }
    fn timestamp(&self) -> Instant {
        self.ts()
    }
    fn source(&self) -> &str {
        self.operation()
    }
}

/// A cancellation-aware executor for the category-keyed retry table.
/// Holds no per-operation state — only the event sink every call reports
/// through.
pub struct RetryExecutor {
    listeners: Mutex<EventListeners<RetryEvent>>,
    /// Caps every category's `max_attempts` (spec.md §6
    /// `upstream.max_retries`, "hard cap on retries across all
    /// categories"). `None` leaves each category's own table value alone.
    max_attempts_cap: Option<u32>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(EventListeners::new()),
            max_attempts_cap: None,
        }
    }

    pub fn with_max_retries_cap(cap: u32) -> Self {
        Self {
            listeners: Mutex::new(EventListeners::new()),
            max_attempts_cap: Some(cap),
        }
    }

    pub fn add_listener<L>(&self, listener: L)
    where
        L: EventListener<RetryEvent> + 'static,
    {
        self.listeners.lock().add(listener);
    }

    /// Runs `op` until it succeeds, its error category has no retry policy,
    /// the policy's attempt budget is exhausted, or `cancel` fires.
    ///
    /// `op` receives the 0-indexed attempt number. A [`RateLimit`]-category
    /// error whose [`ErrorRecord::context`] carries a `retry_after_secs`
    /// entry uses that value as the delay instead of the policy's backoff,
    /// per spec's `X-Ratelimit` handling.
    ///
    /// [`RateLimit`]: ingest_core::ErrorCategory::RateLimit
    pub async fn execute<F, Fut, T>(
        &self,
        operation: &str,
        cancel: &tokio_util::sync::CancellationToken,
        mut op: F,
    ) -> Result<T, ErrorRecord>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, ErrorRecord>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ErrorRecord::cancelled(operation));
            }

            let result = op(attempt).await;
            let error = match result {
                Ok(value) => {
                    self.listeners.lock().emit(&RetryEvent::Success {
                        operation: operation.to_string(),
                        attempts: attempt + 1,
                        timestamp: Instant::now(),
                    });
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable_category() {
                self.listeners.lock().emit(&RetryEvent::IgnoredError {
                    operation: operation.to_string(),
                    timestamp: Instant::now(),
                });
                return Err(error);
            }

            let Some(policy) = policy_for(error.category) else {
                self.listeners.lock().emit(&RetryEvent::IgnoredError {
                    operation: operation.to_string(),
                    timestamp: Instant::now(),
                });
                return Err(error);
            };

            let max_attempts = self
                .max_attempts_cap
                .map(|cap| policy.max_attempts.min(cap))
                .unwrap_or(policy.max_attempts);

            if attempt + 1 >= max_attempts {
                self.listeners.lock().emit(&RetryEvent::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt + 1,
                    timestamp: Instant::now(),
                });
                return Err(error);
            }

            let delay = error
                .context
                .get("retry_after_secs")
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| policy.next_delay(attempt));

            self.listeners.lock().emit(&RetryEvent::Retry {
                operation: operation.to_string(),
                attempt: attempt + 1,
                delay,
                timestamp: Instant::now(),
            });

            #[cfg(feature = "tracing")]
            tracing::debug!(operation, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "retrying");

            #[cfg(feature = "metrics")]
            metrics::counter!("ingest_retry_attempts_total", "operation" => operation.to_string())
                .increment(1);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ErrorRecord::cancelled(operation)),
            }

            attempt += 1;
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}
