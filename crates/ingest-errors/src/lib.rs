//! Error classification, recovery dispatch, and the metrics snapshot
//! (spec.md §4.6). Retry backoff policy lives in `ingest-retry`; circuit
//! breaker state lives in `ingest-circuitbreaker`. This crate is the
//! record-keeper and the recovery dispatcher the other two report into.
//!
//! Recovery is the one part of §4.6 that needs a capability the rest of
//! the error pipeline doesn't have — for authentication errors, "recover"
//! means driving a token refresh, which only `ingest-client` can do. The
//! [`RecoveryStrategy`] trait is generic over that capability (`Context`)
//! so `ErrorManager<C>` stays decoupled from what recovering actually
//! involves, the same way the teacher keeps its audit alert hooks generic
//! over the event type rather than hardcoding one sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingest_core::error::{ErrorCategory, ErrorRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A pluggable, category-scoped repair attempt. `can_recover` is checked
/// before `recover` is invoked; a strategy that declines is never charged
/// against the failed-recovery counter.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    type Context: Send + Sync;

    async fn can_recover(&self, error: &ErrorRecord) -> bool;
    async fn recover(&self, ctx: &Self::Context, error: &ErrorRecord) -> Result<(), ErrorRecord>;
    fn recommended_backoff(&self) -> Option<Duration> {
        None
    }
}

/// Read-only counters snapshot (spec §4.6: "total errors, errors by
/// category, errors by code, breaker trips, successful/failed
/// recoveries, timestamp of last error").
#[derive(Debug, Clone, Default)]
pub struct ErrorMetricsSnapshot {
    pub total_errors: u64,
    pub errors_by_category: HashMap<ErrorCategory, u64>,
    pub errors_by_code: HashMap<String, u64>,
    pub breaker_trips: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    total_errors: u64,
    errors_by_category: HashMap<ErrorCategory, u64>,
    errors_by_code: HashMap<String, u64>,
    breaker_trips: u64,
    successful_recoveries: u64,
    failed_recoveries: u64,
    last_error_at: Option<DateTime<Utc>>,
}

/// Classifies nothing by itself — every `ErrorRecord` handed to
/// `record()` already carries its category, assigned at the point of
/// origin (`ErrorCategory::classify_message` for raw errors, or an
/// explicit `From` conversion for typed ones). `ErrorManager` only keeps
/// the books and dispatches recovery.
pub struct ErrorManager<C: Send + Sync> {
    counters: Mutex<Counters>,
    strategies: Mutex<HashMap<ErrorCategory, Arc<dyn RecoveryStrategy<Context = C>>>>,
}

impl<C: Send + Sync> ErrorManager<C> {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            strategies: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_recovery(
        &self,
        category: ErrorCategory,
        strategy: Arc<dyn RecoveryStrategy<Context = C>>,
    ) {
        self.strategies.lock().insert(category, strategy);
    }

    /// Records an error for metrics purposes. Called once per failure
    /// observed at a component boundary, regardless of whether it will
    /// later be retried or recovered.
    pub fn record(&self, error: &ErrorRecord) {
        let mut counters = self.counters.lock();
        counters.total_errors += 1;
        *counters.errors_by_category.entry(error.category).or_insert(0) += 1;
        *counters
            .errors_by_code
            .entry(error.code.clone())
            .or_insert(0) += 1;
        counters.last_error_at = Some(error.timestamp);
    }

    /// Called by whatever owns circuit breaker transitions when a
    /// breaker opens, so the trip shows up in this manager's snapshot
    /// alongside every other error metric.
    pub fn record_breaker_trip(&self) {
        self.counters.lock().breaker_trips += 1;
    }

    /// Attempts recovery for `error`'s category. Returns `None` if no
    /// strategy is registered for the category or the strategy declines;
    /// the caller should treat `None` the same as a failed recovery
    /// attempt and let the original error surface.
    pub async fn attempt_recovery(
        &self,
        ctx: &C,
        error: &ErrorRecord,
    ) -> Option<Result<(), ErrorRecord>> {
        let strategy = self.strategies.lock().get(&error.category).cloned()?;
        if !strategy.can_recover(error).await {
            return None;
        }

        let result = strategy.recover(ctx, error).await;
        let mut counters = self.counters.lock();
        match &result {
            Ok(()) => counters.successful_recoveries += 1,
            Err(_) => counters.failed_recoveries += 1,
        }
        Some(result)
    }

    pub fn snapshot(&self) -> ErrorMetricsSnapshot {
        let counters = self.counters.lock();
        ErrorMetricsSnapshot {
            total_errors: counters.total_errors,
            errors_by_category: counters.errors_by_category.clone(),
            errors_by_code: counters.errors_by_code.clone(),
            breaker_trips: counters.breaker_trips,
            successful_recoveries: counters.successful_recoveries,
            failed_recoveries: counters.failed_recoveries,
            last_error_at: counters.last_error_at,
        }
    }
}

impl<C: Send + Sync> Default for ErrorManager<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_error() -> ErrorRecord {
        ErrorRecord::new(ErrorCategory::Network, "econnrefused", "connection refused", "get_watched_movies")
    }

    fn auth_error() -> ErrorRecord {
        ErrorRecord::new(ErrorCategory::Authentication, "401", "unauthorized", "get_ratings")
    }

    #[test]
    fn record_tallies_totals_category_and_code() {
        let manager: ErrorManager<()> = ErrorManager::new();
        manager.record(&network_error());
        manager.record(&network_error());
        manager.record(&auth_error());

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.total_errors, 3);
        assert_eq!(snapshot.errors_by_category[&ErrorCategory::Network], 2);
        assert_eq!(snapshot.errors_by_category[&ErrorCategory::Authentication], 1);
        assert_eq!(snapshot.errors_by_code["econnrefused"], 2);
        assert!(snapshot.last_error_at.is_some());
    }

    #[test]
    fn breaker_trips_are_counted_independently_of_errors() {
        let manager: ErrorManager<()> = ErrorManager::new();
        manager.record_breaker_trip();
        manager.record_breaker_trip();
        assert_eq!(manager.snapshot().breaker_trips, 2);
    }

    struct AlwaysRecovers;
    #[async_trait]
    impl RecoveryStrategy for AlwaysRecovers {
        type Context = ();
        async fn can_recover(&self, _error: &ErrorRecord) -> bool {
            true
        }
        async fn recover(&self, _ctx: &(), _error: &ErrorRecord) -> Result<(), ErrorRecord> {
            Ok(())
        }
    }

    struct NeverApplies;
    #[async_trait]
    impl RecoveryStrategy for NeverApplies {
        type Context = ();
        async fn can_recover(&self, _error: &ErrorRecord) -> bool {
            false
        }
        async fn recover(&self, _ctx: &(), error: &ErrorRecord) -> Result<(), ErrorRecord> {
            Err(error.clone())
        }
    }

    #[tokio::test]
    async fn successful_recovery_increments_the_success_counter() {
        let manager: ErrorManager<()> = ErrorManager::new();
        manager.register_recovery(ErrorCategory::Authentication, Arc::new(AlwaysRecovers));

        let result = manager.attempt_recovery(&(), &auth_error()).await;
        assert!(matches!(result, Some(Ok(()))));
        assert_eq!(manager.snapshot().successful_recoveries, 1);
    }

    #[tokio::test]
    async fn a_strategy_that_declines_is_not_counted_as_a_failure() {
        let manager: ErrorManager<()> = ErrorManager::new();
        manager.register_recovery(ErrorCategory::Authentication, Arc::new(NeverApplies));

        let result = manager.attempt_recovery(&(), &auth_error()).await;
        assert!(result.is_none());
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.successful_recoveries, 0);
        assert_eq!(snapshot.failed_recoveries, 0);
    }

    #[tokio::test]
    async fn no_registered_strategy_returns_none() {
        let manager: ErrorManager<()> = ErrorManager::new();
        let result = manager.attempt_recovery(&(), &network_error()).await;
        assert!(result.is_none());
    }
}
