//! The authenticated, cached, rate-limited, circuit-broken API client
//! (spec.md §4.5).
//!
//! The per-endpoint pipeline composes four already-built components in a
//! fixed order — cache, rate limiter, circuit breaker, retry — wrapping
//! one inner auth-and-send step, the same stack the teacher assembles
//! with `tower::ServiceBuilder` but expressed as a plain `async fn`
//! chain since this client has a fixed, small surface (eight endpoints)
//! rather than an arbitrary `tower::Service`.

pub mod fingerprint;
mod refresh;
mod wire;

pub use refresh::{AuthRecoveryStrategy, TokenRefreshHandle};

use http::{HeaderName, HeaderValue};
use ingest_cache::ResponseCache;
use ingest_circuitbreaker::{Admission, CircuitBreaker};
use ingest_core::domain::ExportRecord;
use ingest_core::error::{ErrorCategory, ErrorRecord};
use ingest_ratelimit::RateGovernor;
use ingest_retry::RetryExecutor;
use ingest_tokenstore::TokenStore;
use ingest_transport::{EndpointRequest, HTTPTransport, TransportError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The service name this client acquires rate-governor tokens under.
/// Exposed so a caller building the shared [`RateGovernor`] can
/// configure a quota for the same key this client uses internally.
pub const UPSTREAM_SERVICE: &str = "trakt";
const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RATE_LIMIT_WARNING_THRESHOLD: i64 = 100;
const API_VERSION: &str = "2";

type Decoder = fn(&[u8], &str) -> Result<Vec<ExportRecord>, ErrorRecord>;

/// One of the eight supported sync endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    WatchedMovies,
    CollectionMovies,
    WatchedShows,
    Ratings,
    ShowRatings,
    EpisodeRatings,
    Watchlist,
    MovieHistory,
}

impl Endpoint {
    fn operation(&self) -> &'static str {
        match self {
            Endpoint::WatchedMovies => "get_watched_movies",
            Endpoint::CollectionMovies => "get_collection_movies",
            Endpoint::WatchedShows => "get_watched_shows",
            Endpoint::Ratings => "get_ratings",
            Endpoint::ShowRatings => "get_show_ratings",
            Endpoint::EpisodeRatings => "get_episode_ratings",
            Endpoint::Watchlist => "get_watchlist",
            Endpoint::MovieHistory => "get_movie_history",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Endpoint::WatchedMovies => "sync/watched/movies",
            Endpoint::CollectionMovies => "sync/collection/movies",
            Endpoint::WatchedShows => "sync/watched/shows",
            Endpoint::Ratings => "sync/ratings/movies",
            Endpoint::ShowRatings => "sync/ratings/shows",
            Endpoint::EpisodeRatings => "sync/ratings/episodes",
            Endpoint::Watchlist => "sync/watchlist/movies",
            Endpoint::MovieHistory => "sync/history/movies",
        }
    }

    fn decoder(&self) -> Decoder {
        match self {
            Endpoint::WatchedMovies => wire::decode_watched_movies,
            Endpoint::CollectionMovies => wire::decode_collection_movies,
            Endpoint::WatchedShows => wire::decode_watched_shows,
            Endpoint::Ratings => wire::decode_ratings,
            Endpoint::ShowRatings => wire::decode_show_ratings,
            Endpoint::EpisodeRatings => wire::decode_episode_ratings,
            Endpoint::Watchlist => wire::decode_watchlist,
            Endpoint::MovieHistory => wire::decode_movie_history,
        }
    }
}

/// One endpoint's result within a [`ApiClient::get_batch`] call, in the
/// same order as the input descriptors (spec §4.5: "returns results in
/// input order, each annotated with duration and error").
pub struct BatchResult {
    pub endpoint: Endpoint,
    pub records: Vec<ExportRecord>,
    pub duration: Duration,
    pub error: Option<ErrorRecord>,
}

pub struct ApiClientConfig {
    pub base_url: String,
    pub client_id: String,
    pub token_endpoint: String,
    pub extended_info: Option<String>,
}

/// The one concrete client, capability-configured rather than subclassed
/// (spec §9 redesign note: "one concrete client parameterized by three
/// policy objects ... each injectable with a no-op variant" — here the
/// cache, rate governor, and circuit breaker are always present but can
/// be configured to behave as no-ops: zero capacity, an effectively
/// infinite rate, a disabled breaker threshold).
pub struct ApiClient {
    config: ApiClientConfig,
    cache: Arc<ResponseCache>,
    rate_governor: Arc<RateGovernor>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryExecutor>,
    transport: Arc<HTTPTransport>,
    token_store: Arc<dyn TokenStore>,
    token_refresh: Arc<TokenRefreshHandle>,
}

impl ApiClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ApiClientConfig,
        cache: Arc<ResponseCache>,
        rate_governor: Arc<RateGovernor>,
        circuit_breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryExecutor>,
        transport: Arc<HTTPTransport>,
        token_store: Arc<dyn TokenStore>,
        token_refresh: Arc<TokenRefreshHandle>,
    ) -> Self {
        Self {
            config,
            cache,
            rate_governor,
            circuit_breaker,
            retry,
            transport,
            token_store,
            token_refresh,
        }
    }

    pub async fn get_watched_movies(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExportRecord>, ErrorRecord> {
        self.fetch(Endpoint::WatchedMovies, cancel).await
    }

    pub async fn get_collection_movies(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExportRecord>, ErrorRecord> {
        self.fetch(Endpoint::CollectionMovies, cancel).await
    }

    pub async fn get_watched_shows(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExportRecord>, ErrorRecord> {
        self.fetch(Endpoint::WatchedShows, cancel).await
    }

    pub async fn get_ratings(&self, cancel: &CancellationToken) -> Result<Vec<ExportRecord>, ErrorRecord> {
        self.fetch(Endpoint::Ratings, cancel).await
    }

    pub async fn get_show_ratings(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExportRecord>, ErrorRecord> {
        self.fetch(Endpoint::ShowRatings, cancel).await
    }

    pub async fn get_episode_ratings(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExportRecord>, ErrorRecord> {
        self.fetch(Endpoint::EpisodeRatings, cancel).await
    }

    pub async fn get_watchlist(&self, cancel: &CancellationToken) -> Result<Vec<ExportRecord>, ErrorRecord> {
        self.fetch(Endpoint::Watchlist, cancel).await
    }

    pub async fn get_movie_history(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExportRecord>, ErrorRecord> {
        self.fetch(Endpoint::MovieHistory, cancel).await
    }

    /// Runs every requested endpoint concurrently, preserving input
    /// order in the returned `Vec` (spec §4.5 concurrent-batch form).
    pub async fn get_batch(
        &self,
        endpoints: &[Endpoint],
        cancel: &CancellationToken,
    ) -> Vec<BatchResult> {
        let futures = endpoints.iter().map(|endpoint| async move {
            let started = Instant::now();
            let result = self.fetch(*endpoint, cancel).await;
            let duration = started.elapsed();
            match result {
                Ok(records) => BatchResult {
                    endpoint: *endpoint,
                    records,
                    duration,
                    error: None,
                },
                Err(error) => BatchResult {
                    endpoint: *endpoint,
                    records: Vec::new(),
                    duration,
                    error: Some(error),
                },
            }
        });
        futures::future::join_all(futures).await
    }

    /// Releases pooled connections and background workers. `ApiClient`
    /// holds no background tasks of its own; this exists so the facade
    /// crate has one symmetric lifecycle method regardless of which
    /// components happen to own real resources underneath.
    pub async fn close(&self) {
        self.cache.invalidate();
    }

    async fn fetch(
        &self,
        endpoint: Endpoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExportRecord>, ErrorRecord> {
        let operation = endpoint.operation();
        let url = fingerprint::canonical_url(
            &self.config.base_url,
            endpoint.path(),
            &[],
            self.config.extended_info.as_deref(),
        )
        .map_err(|e| ErrorRecord::new(ErrorCategory::Client, "bad_url", e.to_string(), operation))?;
        let key = fingerprint::fingerprint(&url);

        if let Some(entry) = self.cache.get(&key) {
            return (endpoint.decoder())(&entry.bytes, operation);
        }

        if matches!(self.circuit_breaker.try_acquire(operation), Admission::Rejected) {
            return Err(ErrorRecord::circuit_open(operation));
        }

        let decoder = endpoint.decoder();
        let result = self
            .retry
            .execute(operation, cancel, |_attempt| {
                let url = url.clone();
                async move {
                    self.rate_governor
                        .acquire(UPSTREAM_SERVICE, cancel)
                        .await
                        .map_err(|e| {
                            ErrorRecord::new(ErrorCategory::Cancelled, "rate_limit_wait", e.to_string(), operation)
                        })?;

                    self.send_authenticated(url, cancel, operation).await
                }
            })
            .await;

        // One admission check and one success/failure record per endpoint
        // call, not per retry attempt — the breaker counts calls that
        // exhaust their retries, not individual attempts within a call
        // (spec §8 scenario D: five separate failed calls trip it, not
        // five retries inside one).
        match &result {
            Ok(_) => self.circuit_breaker.record_success(operation),
            Err(error) => {
                if !matches!(error.category, ErrorCategory::Authentication | ErrorCategory::Cancelled) {
                    self.circuit_breaker.record_failure(operation);
                }
            }
        }

        let bytes = result?;
        let records = decoder(&bytes, operation)?;
        self.cache.put(key, bytes, "application/json".to_string());
        Ok(records)
    }

    /// Attaches auth headers and sends the request, handling the single
    /// 401-refresh-and-retry dance (spec §4.5 step 8) and classifying
    /// 5xx/429 as retryable categories (step 9). Returns the raw response
    /// bytes on a 2xx (step 10's decode happens one level up, after the
    /// cache write).
    async fn send_authenticated(
        &self,
        url: url::Url,
        cancel: &CancellationToken,
        operation: &str,
    ) -> Result<Vec<u8>, ErrorRecord> {
        let mut credentials = self
            .token_store
            .load()
            .await
            .map_err(|e| ErrorRecord::new(ErrorCategory::Operation, "token_store", e.to_string(), operation))?
            .ok_or_else(|| ErrorRecord::new(ErrorCategory::Authentication, "unauthenticated", "no credentials present", operation))?;

        if credentials.is_expired() && credentials.refresh_token.is_some() {
            credentials = self.token_refresh.refresh().await?;
        }

        let response = self
            .send_once(&url, &credentials.access_token, cancel, operation)
            .await?;

        if response.status().as_u16() != 401 {
            return self.handle_response(response, operation).await;
        }

        if credentials.refresh_token.is_none() {
            return Err(ErrorRecord::new(
                ErrorCategory::Authentication,
                "401",
                "unauthorized and no refresh token available",
                operation,
            ));
        }

        let refreshed = self.token_refresh.refresh().await?;
        let retry_response = self
            .send_once(&url, &refreshed.access_token, cancel, operation)
            .await?;

        if retry_response.status().as_u16() == 401 {
            return Err(ErrorRecord::new(
                ErrorCategory::Authentication,
                "401",
                "unauthorized after token refresh",
                operation,
            ));
        }

        self.handle_response(retry_response, operation).await
    }

    async fn send_once(
        &self,
        url: &url::Url,
        access_token: &str,
        cancel: &CancellationToken,
        operation: &str,
    ) -> Result<reqwest::Response, ErrorRecord> {
        let request = EndpointRequest::get(url.clone())
            .header(
                HeaderName::from_static("authorization"),
                HeaderValue::from_str(&format!("Bearer {access_token}"))
                    .map_err(|e| ErrorRecord::new(ErrorCategory::Client, "bad_header", e.to_string(), operation))?,
            )
            .header(
                HeaderName::from_static("trakt-api-key"),
                HeaderValue::from_str(&self.config.client_id)
                    .map_err(|e| ErrorRecord::new(ErrorCategory::Client, "bad_header", e.to_string(), operation))?,
            )
            .header(
                HeaderName::from_static("trakt-api-version"),
                HeaderValue::from_static(API_VERSION),
            )
            .header(HeaderName::from_static("accept"), HeaderValue::from_static("application/json"));

        self.transport
            .do_request(request, cancel)
            .await
            .map_err(|e| classify_transport_error(e, operation))
    }

    async fn handle_response(
        &self,
        response: reqwest::Response,
        operation: &str,
    ) -> Result<Vec<u8>, ErrorRecord> {
        let status = response.status();
        let remaining = response
            .headers()
            .get(RATE_LIMIT_REMAINING_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        if let Some(remaining) = remaining {
            if remaining < RATE_LIMIT_WARNING_THRESHOLD {
                #[cfg(feature = "tracing")]
                tracing::warn!(operation, remaining, "approaching upstream rate limit");
            }
        }

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let mut error = ErrorRecord::new(ErrorCategory::RateLimit, "429", "rate limited", operation);
            if let Some(retry_after) = retry_after {
                error = error.with_context("retry_after_secs", retry_after);
            }
            return Err(error);
        }

        if status.is_server_error() {
            return Err(ErrorRecord::new(
                ErrorCategory::Server,
                status.as_str().to_string(),
                format!("server error {status}"),
                operation,
            ));
        }

        if !status.is_success() {
            return Err(ErrorRecord::new(
                ErrorCategory::Client,
                status.as_str().to_string(),
                format!("client error {status}"),
                operation,
            ));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| classify_transport_error(TransportError::Http(e), operation))
    }
}

fn classify_transport_error(error: TransportError, operation: &str) -> ErrorRecord {
    let message = error.to_string();
    let category: ErrorCategory = error.into();
    ErrorRecord::new(category, "transport", message, operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths_are_distinct() {
        let paths: std::collections::HashSet<&str> = [
            Endpoint::WatchedMovies,
            Endpoint::CollectionMovies,
            Endpoint::WatchedShows,
            Endpoint::Ratings,
            Endpoint::ShowRatings,
            Endpoint::EpisodeRatings,
            Endpoint::Watchlist,
            Endpoint::MovieHistory,
        ]
        .iter()
        .map(|e| e.path())
        .collect();
        assert_eq!(paths.len(), 8);
    }
}
