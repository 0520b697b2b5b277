//! Domain types shared across the engine: credentials, export records, and
//! export run bookkeeping (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An opaque OAuth credential bundle. If `access_token` is present,
/// `expires_at` is always set; if `refresh_token` is present, a `TokenStore`
/// must preserve it across every `load()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Point-in-time status of a `TokenStore`, returned by `status()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenStatus {
    pub present: bool,
    pub valid_until: Option<DateTime<Utc>>,
    pub refreshable: bool,
}

impl TokenStatus {
    pub fn absent() -> Self {
        Self {
            present: false,
            valid_until: None,
            refreshable: false,
        }
    }
}

/// Stable external identifiers carried by every export record. Every record
/// has at least one usable identifier (spec invariant, §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ExternalIds {
    pub trakt: Option<i64>,
    pub tmdb: Option<i64>,
    pub imdb: Option<String>,
    pub slug: Option<String>,
    pub tvdb: Option<i64>,
}

impl ExternalIds {
    pub fn is_usable(&self) -> bool {
        self.trakt.is_some()
            || self.tmdb.is_some()
            || self.imdb.is_some()
            || self.slug.is_some()
            || self.tvdb.is_some()
    }

    /// Destination-matching priority from spec §4.7: tmdb, else imdb, else
    /// a title+year fallback key computed by the caller.
    pub fn match_key(&self, title: &str, year: Option<i32>) -> String {
        if let Some(tmdb) = self.tmdb {
            format!("tmdb:{tmdb}")
        } else if let Some(imdb) = &self.imdb {
            format!("imdb:{imdb}")
        } else {
            format!("title:{title}:{}", year.map(|y| y.to_string()).unwrap_or_default())
        }
    }
}

/// A movie or show as returned by the upstream, with a title, optional
/// release year, and the identifier set above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub title: String,
    pub year: Option<i32>,
    pub ids: ExternalIds,
    /// ISO release date, used to back-fill `year` when it is absent.
    pub released: Option<String>,
}

/// One domain entity produced by the APIClient and consumed read-only by
/// the ExportWriter (spec §3). Each variant carries payload-specific
/// fields; unknown upstream fields are preserved in `extra` for forward
/// compatibility but are never emitted to CSV (spec §9 design notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExportRecord {
    WatchedMovie {
        movie: MediaRef,
        last_watched_at: DateTime<Utc>,
        plays: u32,
    },
    CollectionMovie {
        movie: MediaRef,
        collected_at: DateTime<Utc>,
    },
    WatchedShow {
        show: MediaRef,
        last_watched_at: DateTime<Utc>,
        plays: u32,
    },
    Rating {
        movie: MediaRef,
        rating: u8,
        rated_at: DateTime<Utc>,
    },
    ShowRating {
        show: MediaRef,
        rating: u8,
        rated_at: DateTime<Utc>,
    },
    EpisodeRating {
        show: MediaRef,
        season: u32,
        episode: u32,
        rating: u8,
        rated_at: DateTime<Utc>,
    },
    WatchlistEntry {
        movie: MediaRef,
        listed_at: DateTime<Utc>,
    },
    HistoryEvent {
        movie: MediaRef,
        watched_at: DateTime<Utc>,
        action: String,
    },
}

impl ExportRecord {
    pub fn media(&self) -> &MediaRef {
        match self {
            ExportRecord::WatchedMovie { movie, .. }
            | ExportRecord::CollectionMovie { movie, .. }
            | ExportRecord::Rating { movie, .. }
            | ExportRecord::WatchlistEntry { movie, .. }
            | ExportRecord::HistoryEvent { movie, .. } => movie,
            ExportRecord::WatchedShow { show, .. }
            | ExportRecord::ShowRating { show, .. }
            | ExportRecord::EpisodeRating { show, .. } => show,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExportRecord::WatchedMovie { .. } => "watched_movies",
            ExportRecord::CollectionMovie { .. } => "collection_movies",
            ExportRecord::WatchedShow { .. } => "watched_shows",
            ExportRecord::Rating { .. } => "ratings_movies",
            ExportRecord::ShowRating { .. } => "ratings_shows",
            ExportRecord::EpisodeRating { .. } => "ratings_episodes",
            ExportRecord::WatchlistEntry { .. } => "watchlist_movies",
            ExportRecord::HistoryEvent { .. } => "history_movies",
        }
    }
}

/// Export mode selection (spec §4.5): one row per movie vs. one row per
/// viewing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportMode {
    Aggregated,
    Historical,
}

/// Lifecycle record for a single export run, owned exclusively by the
/// Orchestrator (spec §3).
#[derive(Debug, Clone)]
pub struct ExportRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub requested_endpoints: Vec<String>,
    pub mode: ExportMode,
    pub endpoint_results: BTreeMap<String, EndpointOutcome>,
    pub output_paths: Vec<std::path::PathBuf>,
}

#[derive(Debug, Clone)]
pub struct EndpointOutcome {
    pub success: bool,
    pub record_count: usize,
    pub duration: std::time::Duration,
    pub error: Option<String>,
    /// The originating [`crate::error::ErrorCategory`], carried alongside
    /// the rendered `error` message so callers don't have to reclassify a
    /// string to tell a 5xx from a circuit-open rejection.
    pub error_category: Option<crate::error::ErrorCategory>,
    pub cancelled: bool,
}

impl ExportRun {
    pub fn new(id: impl Into<String>, requested_endpoints: Vec<String>, mode: ExportMode) -> Self {
        Self {
            id: id.into(),
            started_at: Utc::now(),
            ended_at: None,
            requested_endpoints,
            mode,
            endpoint_results: BTreeMap::new(),
            output_paths: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn succeeded_endpoints(&self) -> usize {
        self.endpoint_results.values().filter(|o| o.success).count()
    }

    pub fn failed_endpoints(&self) -> usize {
        self.endpoint_results.values().filter(|o| !o.success).count()
    }
}
