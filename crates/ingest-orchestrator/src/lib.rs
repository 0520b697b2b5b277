//! Composes the API client and export writer into full export runs
//! (spec.md §4.8).
//!
//! `run_export` is a straight sequential loop over the requested
//! endpoints. `run_export_concurrent` bounds fan-out with a
//! `tokio::sync::Semaphore` sized to `max_concurrency` — the same
//! "acquire a permit before doing the unit of work" shape the teacher's
//! bulkhead crate uses, simplified here to one semaphore since the
//! Orchestrator's unit of work is "one named endpoint call," not a
//! generic `tower::Service` request. A `CancellationToken` is threaded
//! through every suspension point the client and writer expose.

use chrono::Utc;
use ingest_client::{ApiClient, Endpoint};
use ingest_core::domain::{EndpointOutcome, ExportMode, ExportRecord, ExportRun};
use ingest_core::error::{ErrorCategory, ErrorRecord};
use ingest_export::row::ExportVariant;
use ingest_export::transform::{dedup_aggregated, filter_min_rating, flag_rewatches};
use ingest_export::{ExportWriter, ExportWriterConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// The eight endpoints this engine knows how to sync, in the order
/// they're usually requested.
pub const ALL_ENDPOINTS: &[Endpoint] = &[
    Endpoint::WatchedMovies,
    Endpoint::CollectionMovies,
    Endpoint::WatchedShows,
    Endpoint::Ratings,
    Endpoint::ShowRatings,
    Endpoint::EpisodeRatings,
    Endpoint::Watchlist,
    Endpoint::MovieHistory,
];

fn endpoint_kind(endpoint: Endpoint) -> &'static str {
    match endpoint {
        Endpoint::WatchedMovies => "watched_movies",
        Endpoint::CollectionMovies => "collection_movies",
        Endpoint::WatchedShows => "watched_shows",
        Endpoint::Ratings => "ratings_movies",
        Endpoint::ShowRatings => "ratings_shows",
        Endpoint::EpisodeRatings => "ratings_episodes",
        Endpoint::Watchlist => "watchlist_movies",
        Endpoint::MovieHistory => "history_movies",
    }
}

fn endpoint_variant(endpoint: Endpoint) -> ExportVariant {
    match endpoint {
        Endpoint::Watchlist => ExportVariant::Watchlist,
        _ => ExportVariant::Watched,
    }
}

async fn fetch_endpoint(
    client: &ApiClient,
    endpoint: Endpoint,
    cancel: &CancellationToken,
) -> Result<Vec<ExportRecord>, ErrorRecord> {
    match endpoint {
        Endpoint::WatchedMovies => client.get_watched_movies(cancel).await,
        Endpoint::CollectionMovies => client.get_collection_movies(cancel).await,
        Endpoint::WatchedShows => client.get_watched_shows(cancel).await,
        Endpoint::Ratings => client.get_ratings(cancel).await,
        Endpoint::ShowRatings => client.get_show_ratings(cancel).await,
        Endpoint::EpisodeRatings => client.get_episode_ratings(cancel).await,
        Endpoint::Watchlist => client.get_watchlist(cancel).await,
        Endpoint::MovieHistory => client.get_movie_history(cancel).await,
    }
}

/// Applies the ExportWriter transforms appropriate to this endpoint and
/// the run's export mode, then streams the result to `path`.
///
/// `MovieHistory` is always treated as an event stream: every record is
/// kept and rewatches are flagged against each other, regardless of the
/// run's aggregated/historical mode (the history endpoint's entire
/// purpose is one row per viewing event). Every other endpoint is
/// deduplicated to one row per identifier when the run mode is
/// `Aggregated` (spec §4.7's "latest `last_watched_at` wins" rule);
/// in `Historical` mode they're written as the API already returned them.
fn write_endpoint_csv(
    path: &std::path::Path,
    endpoint: Endpoint,
    mut records: Vec<ExportRecord>,
    mode: ExportMode,
    timezone: &str,
    batch_size: usize,
    min_rating: u8,
) -> Result<usize, ErrorRecord> {
    let file = std::fs::File::create(path).map_err(|e| {
        ErrorRecord::new(ErrorCategory::Filesystem, "create_export_file", e.to_string(), endpoint_kind(endpoint))
            .with_cause(e)
    })?;
    let writer = std::io::BufWriter::new(file);

    records = filter_min_rating(records, min_rating);

    let rewatch_flags = if matches!(endpoint, Endpoint::MovieHistory) {
        Some(flag_rewatches(&records))
    } else {
        if mode == ExportMode::Aggregated {
            records = dedup_aggregated(records);
        }
        None
    };

    let mut export_writer = ExportWriter::new(
        writer,
        endpoint_variant(endpoint),
        timezone,
        ExportWriterConfig { batch_size },
    )
    .map_err(|e| {
        ErrorRecord::new(ErrorCategory::Operation, "export_writer_init", e.to_string(), endpoint_kind(endpoint))
    })?;

    let count = records.len();
    for (i, record) in records.iter().enumerate() {
        let rewatch = rewatch_flags.as_ref().map(|flags| flags[i]).unwrap_or(false);
        export_writer.write_record(record, rewatch).map_err(|e| {
            ErrorRecord::new(ErrorCategory::Filesystem, "write_row", e.to_string(), endpoint_kind(endpoint))
        })?;
    }
    export_writer
        .finish()
        .map_err(|e| ErrorRecord::new(ErrorCategory::Filesystem, "flush", e.to_string(), endpoint_kind(endpoint)))?;

    Ok(count)
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub export_root: PathBuf,
    pub timezone: String,
    pub mode: ExportMode,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub fail_fast: bool,
    pub min_rating: u8,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            export_root: PathBuf::from("./exports"),
            timezone: "UTC".to_string(),
            mode: ExportMode::Aggregated,
            batch_size: 100,
            max_concurrency: 4,
            fail_fast: false,
            min_rating: 0,
        }
    }
}

/// Composes an [`ApiClient`] and the ExportWriter transforms into full
/// export runs, owning the [`ExportRun`] bookkeeping record (spec §3:
/// "Orchestrator owns ExportRun").
pub struct Orchestrator {
    client: Arc<ApiClient>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(client: Arc<ApiClient>, config: OrchestratorConfig) -> Self {
        Self { client, config }
    }

    fn new_run(&self, endpoints: &[Endpoint]) -> ExportRun {
        ExportRun::new(
            uuid::Uuid::new_v4().to_string(),
            endpoints.iter().map(|e| endpoint_kind(*e).to_string()).collect(),
            self.config.mode,
        )
    }

    fn run_directory(&self, run: &ExportRun) -> PathBuf {
        ingest_export::paths::run_directory(&self.config.export_root, run.started_at)
    }

    async fn run_one_endpoint(&self, endpoint: Endpoint, run_dir: &std::path::Path, cancel: &CancellationToken) -> EndpointOutcome {
        let started = Instant::now();
        let result = fetch_endpoint(&self.client, endpoint, cancel).await;
        match result {
            Ok(records) => {
                let path = run_dir.join(ingest_export::paths::endpoint_file_name(endpoint_kind(endpoint)));
                match write_endpoint_csv(&path, endpoint, records, self.config.mode, &self.config.timezone, self.config.batch_size, self.config.min_rating) {
                    Ok(count) => EndpointOutcome {
                        success: true,
                        record_count: count,
                        duration: started.elapsed(),
                        error: None,
                        error_category: None,
                        cancelled: false,
                    },
                    Err(error) => EndpointOutcome {
                        success: false,
                        record_count: 0,
                        duration: started.elapsed(),
                        error_category: Some(error.category),
                        error: Some(error.to_string()),
                        cancelled: false,
                    },
                }
            }
            Err(error) => EndpointOutcome {
                success: false,
                record_count: 0,
                duration: started.elapsed(),
                cancelled: error.category == ErrorCategory::Cancelled,
                error_category: Some(error.category),
                error: Some(error.to_string()),
            },
        }
    }

    /// Runs every requested endpoint one at a time.
    pub async fn run_export(&self, endpoints: &[Endpoint], cancel: &CancellationToken) -> Result<ExportRun, ErrorRecord> {
        let mut run = self.new_run(endpoints);
        let run_dir = self.run_directory(&run);
        std::fs::create_dir_all(&run_dir).map_err(|e| {
            ErrorRecord::new(ErrorCategory::Filesystem, "create_run_dir", e.to_string(), "run_export").with_cause(e)
        })?;
        run.output_paths.push(run_dir.clone());

        for endpoint in endpoints {
            if cancel.is_cancelled() {
                run.endpoint_results.insert(
                    endpoint_kind(*endpoint).to_string(),
                    EndpointOutcome {
                        success: false,
                        record_count: 0,
                        duration: std::time::Duration::ZERO,
                        error: Some("cancelled before this endpoint started".to_string()),
                        error_category: Some(ErrorCategory::Cancelled),
                        cancelled: true,
                    },
                );
                continue;
            }
            let outcome = self.run_one_endpoint(*endpoint, &run_dir, cancel).await;
            run.endpoint_results.insert(endpoint_kind(*endpoint).to_string(), outcome);
        }

        run.finish();
        Ok(run)
    }

    /// Runs every requested endpoint with up to `max_concurrency` calls
    /// in flight. When `fail_fast` is set, the first endpoint error
    /// cancels the rest via `cancel`; otherwise every endpoint is
    /// attempted and every error is reported in the returned run (spec
    /// §4.8, fail_fast resolved to default `false`).
    pub async fn run_export_concurrent(
        &self,
        endpoints: &[Endpoint],
        cancel: &CancellationToken,
    ) -> Result<ExportRun, ErrorRecord> {
        let mut run = self.new_run(endpoints);
        let run_dir = self.run_directory(&run);
        std::fs::create_dir_all(&run_dir).map_err(|e| {
            ErrorRecord::new(ErrorCategory::Filesystem, "create_run_dir", e.to_string(), "run_export_concurrent")
                .with_cause(e)
        })?;
        run.output_paths.push(run_dir.clone());

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let fail_fast = self.config.fail_fast;

        let tasks = endpoints.iter().map(|endpoint| {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let endpoint = *endpoint;
            let run_dir = run_dir.clone();
            async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return (endpoint, EndpointOutcome {
                            success: false,
                            record_count: 0,
                            duration: std::time::Duration::ZERO,
                            error: Some("semaphore closed".to_string()),
                            error_category: Some(ErrorCategory::Cancelled),
                            cancelled: true,
                        }),
                    },
                    _ = cancel.cancelled() => {
                        return (endpoint, EndpointOutcome {
                            success: false,
                            record_count: 0,
                            duration: std::time::Duration::ZERO,
                            error: Some("cancelled while waiting for a concurrency permit".to_string()),
                            error_category: Some(ErrorCategory::Cancelled),
                            cancelled: true,
                        });
                    }
                };

                let outcome = self.run_one_endpoint(endpoint, &run_dir, &cancel).await;
                if fail_fast && !outcome.success {
                    cancel.cancel();
                }
                (endpoint, outcome)
            }
        });

        let results = futures::future::join_all(tasks).await;
        for (endpoint, outcome) in results {
            run.endpoint_results.insert(endpoint_kind(endpoint).to_string(), outcome);
        }

        run.finish();
        Ok(run)
    }
}
