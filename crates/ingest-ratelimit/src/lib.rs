//! Per-service token-bucket admission control (spec.md §4.3).
//!
//! The teacher's `tower-resilience-ratelimiter` crate only implements
//! fixed-window, sliding-log and sliding-counter strategies — no token
//! bucket. The enrichment repo's `middleware/governor.rs` shows the
//! idiomatic way to get one in this ecosystem: a keyed map of
//! `governor::RateLimiter` instances behind a `DashMap`, one limiter per
//! key, created lazily on first use. This module lifts that shape and
//! keys it by service name (spec's "RateGovernor enforces limits keyed
//! by the Trakt API service/endpoint category") rather than by route/user.

use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use ingest_core::ErrorCategory;
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type Limiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit wait was cancelled")]
    Cancelled,
}

impl From<RateLimitError> for ErrorCategory {
    fn from(_: RateLimitError) -> Self {
        ErrorCategory::Cancelled
    }
}

fn build_limiter(rate_per_second: f64, burst: u32) -> Limiter {
    let burst = NonZeroU32::new(burst.max(1)).unwrap_or(nonzero!(1u32));
    let quota = if rate_per_second <= 0.0 {
        Quota::per_second(nonzero!(1u32)).allow_burst(burst)
    } else if rate_per_second >= 1.0 {
        Quota::per_second(NonZeroU32::new(rate_per_second.round() as u32).unwrap_or(nonzero!(1u32)))
            .allow_burst(burst)
    } else {
        // sub-1/s rates are expressed as a replenishment period
        let period_ms = (1000.0 / rate_per_second).round().max(1.0) as u64;
        Quota::with_period(Duration::from_millis(period_ms))
            .unwrap_or_else(|| Quota::per_second(nonzero!(1u32)))
            .allow_burst(burst)
    };
    RateLimiter::direct(quota)
}

/// Per-service token-bucket admission. Never retries, never decodes a
/// response, never touches credentials — spec §4.3 keeps RateGovernor
/// strictly to the question "may this request proceed right now".
pub struct RateGovernor {
    limiters: DashMap<String, Arc<Limiter>>,
    default_rate_per_second: f64,
    default_burst: u32,
}

impl RateGovernor {
    pub fn new(default_rate_per_second: f64, default_burst: u32) -> Self {
        Self {
            limiters: DashMap::new(),
            default_rate_per_second,
            default_burst,
        }
    }

    /// Registers (or replaces) an explicit quota for `service`. Calls to
    /// `acquire` made after this takes effect immediately; in-flight waits
    /// started under the previous limiter are unaffected.
    pub fn configure(&self, service: impl Into<String>, rate_per_second: f64, burst: u32) {
        self.limiters.insert(
            service.into(),
            Arc::new(build_limiter(rate_per_second, burst)),
        );
    }

    fn limiter_for(&self, service: &str) -> Arc<Limiter> {
        if let Some(existing) = self.limiters.get(service) {
            return existing.clone();
        }
        let built = Arc::new(build_limiter(self.default_rate_per_second, self.default_burst));
        self.limiters
            .entry(service.to_string())
            .or_insert(built)
            .clone()
    }

    /// Blocks the caller until a token for `service` is available, or
    /// returns [`RateLimitError::Cancelled`] if `cancel` fires first.
    pub async fn acquire(
        &self,
        service: &str,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<(), RateLimitError> {
        let limiter = self.limiter_for(service);
        loop {
            match limiter.check() {
                Ok(()) => return Ok(()),
                Err(not_until) => {
                    let wait = not_until.wait_time_from(governor::clock::Clock::now(
                        &governor::clock::DefaultClock::default(),
                    ));
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => continue,
                        _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                    }
                }
            }
        }
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(1.0, 1)
    }
}
