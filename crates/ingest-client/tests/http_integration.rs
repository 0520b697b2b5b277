//! HTTP-level integration tests against a mock upstream (spec.md §4.5,
//! §8 scenario D "sustained 5xx trips the breaker"), in the style of the
//! retrieval pack's `wiremock`-backed reliability suites: a real
//! `ApiClient` wired to every one of its real dependencies, pointed at a
//! `wiremock::MockServer` instead of `api.trakt.tv`.

use chrono::Utc;
use ingest_cache::ResponseCache;
use ingest_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
use ingest_client::{ApiClient, ApiClientConfig, TokenRefreshHandle};
use ingest_core::domain::Credentials;
use ingest_ratelimit::RateGovernor;
use ingest_retry::RetryExecutor;
use ingest_tokenstore::{RefreshCoalescer, TokenStore, TokenStoreError};
use ingest_transport::{HTTPTransport, TransportConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A fixed, never-expiring, non-refreshable credential set, for the
/// tests that exercise the request pipeline rather than the refresh
/// dance.
struct StaticTokenStore;

#[async_trait::async_trait]
impl TokenStore for StaticTokenStore {
    async fn load(&self) -> Result<Option<Credentials>, TokenStoreError> {
        Ok(Some(Credentials {
            access_token: "test-access-token".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
        }))
    }

    async fn store(&self, _credentials: &Credentials) -> Result<(), TokenStoreError> {
        Err(TokenStoreError::ReadOnly("static"))
    }

    async fn clear(&self) -> Result<(), TokenStoreError> {
        Err(TokenStoreError::ReadOnly("static"))
    }
}

fn build_client(base_url: String, retry_cap: Option<u32>) -> ApiClient {
    build_client_with_store(
        base_url,
        "https://api.trakt.tv/oauth/token".to_string(),
        Arc::new(StaticTokenStore),
        retry_cap,
    )
}

fn build_client_with_store(
    base_url: String,
    token_url: String,
    token_store: Arc<dyn TokenStore>,
    retry_cap: Option<u32>,
) -> ApiClient {
    let token_refresh = Arc::new(
        TokenRefreshHandle::new(
            token_store.clone(),
            Arc::new(RefreshCoalescer::new()),
            &token_url,
            "test-client".to_string(),
            "test-secret".to_string(),
        )
        .unwrap(),
    );
    let retry = match retry_cap {
        Some(cap) => RetryExecutor::with_max_retries_cap(cap),
        None => RetryExecutor::new(),
    };

    ApiClient::new(
        ApiClientConfig {
            base_url,
            client_id: "test-client".to_string(),
            token_endpoint: token_url,
            extended_info: None,
        },
        Arc::new(ResponseCache::new(64, Duration::from_secs(60))),
        Arc::new(RateGovernor::new(100.0, 100)),
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        Arc::new(retry),
        Arc::new(HTTPTransport::new(TransportConfig::default()).unwrap()),
        token_store,
        token_refresh,
    )
}

/// A mutable, in-memory credential store: seeded with an already-expired
/// access token and a refresh token, so [`ApiClient::fetch`]'s proactive
/// refresh-before-send check (spec.md §4.5 step 7) fires before the
/// first request goes out, and persists whatever
/// [`TokenRefreshHandle::refresh`] exchanges it for.
struct InMemoryTokenStore {
    credentials: tokio::sync::Mutex<Credentials>,
}

impl InMemoryTokenStore {
    fn new(credentials: Credentials) -> Self {
        Self {
            credentials: tokio::sync::Mutex::new(credentials),
        }
    }
}

#[async_trait::async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self) -> Result<Option<Credentials>, TokenStoreError> {
        Ok(Some(self.credentials.lock().await.clone()))
    }

    async fn store(&self, credentials: &Credentials) -> Result<(), TokenStoreError> {
        *self.credentials.lock().await = credentials.clone();
        Ok(())
    }

    async fn clear(&self) -> Result<(), TokenStoreError> {
        Err(TokenStoreError::ReadOnly("in-memory"))
    }
}

fn watched_movies_fixture() -> serde_json::Value {
    serde_json::json!([
        {
            "movie": {
                "title": "The Matrix",
                "year": 1999,
                "ids": { "trakt": 1, "tmdb": 603, "imdb": "tt0133093", "slug": "the-matrix-1999", "tvdb": null },
                "released": "1999-03-31"
            },
            "last_watched_at": "2024-01-15T20:00:00Z",
            "plays": 3
        }
    ])
}

#[tokio::test]
async fn fetches_and_decodes_watched_movies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sync/watched/movies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(watched_movies_fixture()))
        .expect(1)
        .mount(&server)
        .await;

    let client = build_client(server.uri(), None);
    let cancel = CancellationToken::new();

    let records = client.get_watched_movies(&cancel).await.unwrap();
    assert_eq!(records.len(), 1);

    // A second call is served from the response cache, so the mock's
    // expected hit count of 1 still holds on drop.
    let cached = client.get_watched_movies(&cancel).await.unwrap();
    assert_eq!(cached.len(), 1);
}

#[tokio::test]
async fn rate_limit_response_is_classified_and_not_retried_past_the_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sync/watched/movies"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .mount(&server)
        .await;

    // Capping retries at 1 means the policy's own 5-attempt table for
    // rate limits never gets a chance to run out the clock here.
    let client = build_client(server.uri(), Some(1));
    let cancel = CancellationToken::new();

    let err = client.get_watched_movies(&cancel).await.unwrap_err();
    assert_eq!(err.category, ingest_core::error::ErrorCategory::RateLimit);
}

#[tokio::test]
async fn sustained_server_errors_trip_the_circuit_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sync/watched/movies"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    // The retry cap only keeps this test from sitting through the
    // operation policy's real backoff delays; the breaker records one
    // failure per endpoint call regardless of how many attempts that
    // call took internally, so the cap has no bearing on the assertion
    // below.
    let client = build_client(server.uri(), Some(1));
    let cancel = CancellationToken::new();

    // consecutive_fail_threshold defaults to 5; five failed endpoint
    // calls is enough to open the breaker on the sixth.
    for _ in 0..5 {
        let err = client.get_watched_movies(&cancel).await.unwrap_err();
        assert_eq!(err.category, ingest_core::error::ErrorCategory::Server);
    }

    let err = client.get_watched_movies(&cancel).await.unwrap_err();
    assert_eq!(err.category, ingest_core::error::ErrorCategory::CircuitOpen);
}

#[tokio::test]
async fn an_expired_token_is_refreshed_once_before_the_request_goes_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "refreshed-access-token",
            "token_type": "bearer",
            "expires_in": 7200,
            "refresh_token": "still-the-same-refresh-token"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sync/watched/movies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(watched_movies_fixture()))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::new(Credentials {
        access_token: "stale-access-token".to_string(),
        refresh_token: Some("original-refresh-token".to_string()),
        expires_at: Utc::now() - chrono::Duration::minutes(5),
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
    }));

    let client = build_client_with_store(
        server.uri(),
        format!("{}/oauth/token", server.uri()),
        store.clone(),
        None,
    );
    let cancel = CancellationToken::new();

    let records = client.get_watched_movies(&cancel).await.unwrap();
    assert_eq!(records.len(), 1);

    let persisted = store.load().await.unwrap().unwrap();
    assert_eq!(persisted.access_token, "refreshed-access-token");
}
