//! The catalog sync ingestion engine, composed from its seven
//! cooperating components (spec.md §2) into one importable facade.
//!
//! This is the crate a CLI, scheduler, or web handler depends on: it
//! owns construction of every component crate, wires the narrow
//! interfaces between them the spec calls out (token refresh feeding the
//! circuit breaker's admission check, breaker trips feeding the error
//! manager's metrics, endpoint selection feeding the orchestrator), and
//! exposes the read-only snapshots (cache stats, token status, error
//! metrics) that the CLI/web/cron layers outside this workspace read
//! through rather than reaching into any one component directly.

pub mod config;

use ingest_cache::ResponseCache;
use ingest_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerEvent, CircuitState};
use ingest_client::{AuthRecoveryStrategy, ApiClient, ApiClientConfig, TokenRefreshHandle, UPSTREAM_SERVICE};
use ingest_core::config::TokenStoreBackend;
use ingest_core::domain::{ExportRun, TokenStatus};
use ingest_core::error::{ErrorCategory, ErrorRecord};
use ingest_core::events::FnListener;
use ingest_errors::{ErrorManager, ErrorMetricsSnapshot};
use ingest_orchestrator::{Orchestrator, OrchestratorConfig, ALL_ENDPOINTS};
use ingest_ratelimit::RateGovernor;
use ingest_retry::RetryExecutor;
use ingest_tokenstore::{EnvTokenStore, FileTokenStore, RefreshCoalescer, TokenStore};
use ingest_transport::{HTTPTransport, TransportConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use config::EngineConfig;
pub use ingest_client::Endpoint;

#[derive(Debug, thiserror::Error)]
pub enum EngineBuildError {
    #[error("file token store backend requires a 32-byte master key")]
    MissingMasterKey,
    #[error("vault token store backend requires the `vault` feature")]
    VaultFeatureDisabled,
    #[error("failed to construct the engine: {0}")]
    Component(#[from] ErrorRecord),
}

/// Owns every component instance for one configured upstream/destination
/// pair and composes them into export runs.
///
/// Holding this is equivalent to the spec's "process-wide singletons per
/// Orchestrator" (§5): the cache, rate governor, and transport connection
/// pool are constructed once here and shared by every call.
pub struct Engine {
    client: Arc<ApiClient>,
    orchestrator: Orchestrator,
    cache: Arc<ResponseCache>,
    circuit_breaker: Arc<CircuitBreaker>,
    token_store: Arc<dyn TokenStore>,
    error_manager: Arc<ErrorManager<TokenRefreshHandle>>,
    include_endpoints: Vec<Endpoint>,
}

impl Engine {
    /// Builds every component from `config` and wires them into one
    /// engine. No network I/O happens here beyond `reqwest::Client`
    /// construction (connection pool setup, no requests).
    pub fn build(config: EngineConfig) -> Result<Self, EngineBuildError> {
        let token_store: Arc<dyn TokenStore> = match config.token_store.backend {
            TokenStoreBackend::File => {
                let key = config.token_master_key.ok_or(EngineBuildError::MissingMasterKey)?;
                Arc::new(FileTokenStore::new(config.token_store.file_path.clone(), &key))
            }
            TokenStoreBackend::Env => Arc::new(EnvTokenStore::new()),
            TokenStoreBackend::Vault => {
                #[cfg(feature = "vault")]
                {
                    Arc::new(ingest_tokenstore::VaultTokenStore::new(
                        "catalog-sync-ingest",
                        config.upstream.client_id.clone(),
                    ))
                }
                #[cfg(not(feature = "vault"))]
                {
                    return Err(EngineBuildError::VaultFeatureDisabled);
                }
            }
        };

        let cache = if config.cache.enabled {
            Arc::new(ResponseCache::new(config.cache.capacity, config.cache.ttl))
        } else {
            // No-op variant (spec §9 redesign note: every policy object is
            // "injectable with a no-op variant"): a single-entry cache with
            // a zero TTL treats every entry as already expired, so every
            // lookup is a miss without a special-cased code path elsewhere.
            Arc::new(ResponseCache::new(1, Duration::ZERO))
        };

        let rate_governor = Arc::new(RateGovernor::new(config.upstream.rate_limit_per_second, default_burst(config.upstream.rate_limit_per_second)));
        rate_governor.configure(
            UPSTREAM_SERVICE,
            config.upstream.rate_limit_per_second,
            default_burst(config.upstream.rate_limit_per_second),
        );

        let circuit_breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            consecutive_fail_threshold: if config.error_policy.circuit_breaker_enabled {
                config.error_policy.consecutive_fail_threshold
            } else {
                // No-op variant: a threshold no real failure run will ever
                // reach in one process lifetime disables tripping without
                // special-casing the breaker's admission check.
                u32::MAX
            },
            cooldown: config.error_policy.cooldown,
        }));

        let error_manager: Arc<ErrorManager<TokenRefreshHandle>> = Arc::new(ErrorManager::new());
        {
            let error_manager = error_manager.clone();
            circuit_breaker.add_listener(FnListener::new(move |event: &CircuitBreakerEvent| {
                if event.to == CircuitState::Open {
                    error_manager.record_breaker_trip();
                }
            }));
        }

        let retry = Arc::new(RetryExecutor::with_max_retries_cap(config.upstream.max_retries));
        let transport = Arc::new(
            HTTPTransport::new(TransportConfig {
                pool_max_idle: config.concurrency.connection_pool,
                pool_idle_timeout: Duration::from_secs(90),
                request_timeout: config.upstream.api_timeout,
                user_agent: format!("ingest/{}", env!("CARGO_PKG_VERSION")),
            })
            .map_err(|e| {
                EngineBuildError::Component(ErrorRecord::new(
                    ErrorCategory::Operation,
                    "transport_init",
                    e.to_string(),
                    "engine_build",
                ))
            })?,
        );

        let coalescer = Arc::new(RefreshCoalescer::new());
        let token_refresh = Arc::new(
            TokenRefreshHandle::new(
                token_store.clone(),
                coalescer,
                &config.token_refresh_url,
                config.upstream.client_id.clone(),
                config.upstream.client_secret.clone(),
            )
            .map_err(EngineBuildError::Component)?,
        );
        error_manager.register_recovery(ErrorCategory::Authentication, Arc::new(AuthRecoveryStrategy));

        let client = Arc::new(ApiClient::new(
            ApiClientConfig {
                base_url: config.upstream.base_url.clone(),
                client_id: config.upstream.client_id.clone(),
                token_endpoint: config.token_refresh_url.clone(),
                extended_info: config.upstream.extended_info.clone(),
            },
            cache.clone(),
            rate_governor,
            circuit_breaker.clone(),
            retry,
            transport,
            token_store.clone(),
            token_refresh,
        ));

        let orchestrator = Orchestrator::new(
            client.clone(),
            OrchestratorConfig {
                export_root: config.export.output_root.clone(),
                timezone: config.export.timezone.clone(),
                mode: match config.export.mode {
                    ingest_core::config::ExportModeConfig::Aggregated => ingest_core::domain::ExportMode::Aggregated,
                    ingest_core::config::ExportModeConfig::Historical => ingest_core::domain::ExportMode::Historical,
                },
                batch_size: config.export.batch_size,
                max_concurrency: config.concurrency.worker_pool_size,
                fail_fast: config.fail_fast,
                min_rating: config.export.min_rating,
            },
        );

        let include_endpoints = selected_endpoints(&config.export);

        Ok(Self {
            client,
            orchestrator,
            cache,
            circuit_breaker,
            token_store,
            error_manager,
            include_endpoints,
        })
    }

    /// Runs every enabled endpoint sequentially (spec §4.8 `runExport`).
    pub async fn run_export(&self, cancel: &CancellationToken) -> Result<ExportRun, ErrorRecord> {
        let run = self.orchestrator.run_export(&self.include_endpoints, cancel).await?;
        self.record_run_errors(&run);
        Ok(run)
    }

    /// Runs every enabled endpoint with bounded fan-out (spec §4.8
    /// `runExportConcurrent`).
    pub async fn run_export_concurrent(&self, cancel: &CancellationToken) -> Result<ExportRun, ErrorRecord> {
        let run = self.orchestrator.run_export_concurrent(&self.include_endpoints, cancel).await?;
        self.record_run_errors(&run);
        Ok(run)
    }

    /// Releases the client's pooled connections and invalidates the
    /// response cache.
    pub async fn close(&self) {
        self.client.close().await;
    }

    /// Read-only cache statistics (spec §4.2 `stats()`), one of the
    /// narrow interfaces the outer CLI/web layers read through.
    pub fn cache_stats(&self) -> ingest_cache::CacheStats {
        self.cache.stats()
    }

    /// Read-only credential status (spec §4.1 `status()`).
    pub async fn token_status(&self) -> Result<TokenStatus, ErrorRecord> {
        self.token_store
            .status()
            .await
            .map_err(|e| ErrorRecord::new(ErrorCategory::Operation, "token_status", e.to_string(), "token_status"))
    }

    /// Read-only circuit breaker state for one operation name.
    pub fn circuit_state(&self, operation: &str) -> CircuitState {
        self.circuit_breaker.state(operation)
    }

    /// Read-only error metrics snapshot (spec §4.6 "Metrics exposed").
    pub fn error_metrics(&self) -> ErrorMetricsSnapshot {
        self.error_manager.snapshot()
    }

    /// Feeds an [`ExportRun`]'s per-endpoint failures into the error
    /// manager's bookkeeping so the read-only metrics snapshot reflects
    /// every endpoint failure, not only the ones intercepted mid-pipeline
    /// by the client's own retry/breaker wiring.
    fn record_run_errors(&self, run: &ExportRun) {
        for (endpoint, outcome) in &run.endpoint_results {
            if let Some(message) = &outcome.error {
                let category = outcome.error_category.unwrap_or_else(|| {
                    if outcome.cancelled {
                        ErrorCategory::Cancelled
                    } else {
                        ErrorCategory::classify_message(message)
                    }
                });
                self.error_manager
                    .record(&ErrorRecord::new(category, "endpoint_failure", message.clone(), endpoint.clone()));
            }
        }
    }
}

/// A token bucket sized at twice the steady-state rate, rounded up to at
/// least one token, when the caller configures no explicit burst value.
fn default_burst(rate_per_second: f64) -> u32 {
    ((rate_per_second * 2.0).ceil() as u32).max(1)
}

/// Builds the endpoint list `run_export`/`run_export_concurrent` request,
/// honoring `export.include_{ratings,watchlist,collections}` (spec §6).
/// `WatchedMovies` and `WatchedShows` are always requested — neither is
/// gated by an include flag in the spec's configuration surface.
fn selected_endpoints(export: &ingest_core::config::ExportConfig) -> Vec<Endpoint> {
    ALL_ENDPOINTS
        .iter()
        .copied()
        .filter(|endpoint| match endpoint {
            Endpoint::Ratings | Endpoint::ShowRatings | Endpoint::EpisodeRatings => export.include_ratings,
            Endpoint::Watchlist => export.include_watchlist,
            Endpoint::CollectionMovies => export.include_collections,
            _ => true,
        })
        .collect()
}
