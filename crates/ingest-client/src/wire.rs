//! Upstream JSON shapes and the functions that decode them into
//! [`ExportRecord`]s (spec.md §4.5 step 10).

use chrono::{DateTime, Utc};
use ingest_core::domain::{ExportRecord, ExternalIds, MediaRef};
use ingest_core::error::{ErrorCategory, ErrorRecord};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct WireIds {
    trakt: Option<i64>,
    tmdb: Option<i64>,
    imdb: Option<String>,
    slug: Option<String>,
    tvdb: Option<i64>,
}

impl From<WireIds> for ExternalIds {
    fn from(ids: WireIds) -> Self {
        ExternalIds {
            trakt: ids.trakt,
            tmdb: ids.tmdb,
            imdb: ids.imdb,
            slug: ids.slug,
            tvdb: ids.tvdb,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMedia {
    title: String,
    year: Option<i32>,
    ids: WireIds,
    released: Option<String>,
}

impl From<WireMedia> for MediaRef {
    fn from(media: WireMedia) -> Self {
        MediaRef {
            title: media.title,
            year: media.year,
            ids: media.ids.into(),
            released: media.released,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WatchedMovieWire {
    movie: WireMedia,
    last_watched_at: DateTime<Utc>,
    plays: u32,
}

#[derive(Debug, Deserialize)]
struct CollectionMovieWire {
    movie: WireMedia,
    collected_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WatchedShowWire {
    show: WireMedia,
    last_watched_at: DateTime<Utc>,
    plays: u32,
}

#[derive(Debug, Deserialize)]
struct RatingWire {
    movie: WireMedia,
    rating: u8,
    rated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ShowRatingWire {
    show: WireMedia,
    rating: u8,
    rated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct EpisodeWire {
    season: u32,
    number: u32,
}

#[derive(Debug, Deserialize)]
struct EpisodeRatingWire {
    show: WireMedia,
    episode: EpisodeWire,
    rating: u8,
    rated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WatchlistWire {
    movie: WireMedia,
    listed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct HistoryWire {
    movie: WireMedia,
    watched_at: DateTime<Utc>,
    action: String,
}

fn parse_error(operation: &str, err: serde_json::Error) -> ErrorRecord {
    ErrorRecord::new(ErrorCategory::Parse, "decode_failed", err.to_string(), operation).with_cause(err)
}

pub fn decode_watched_movies(bytes: &[u8], operation: &str) -> Result<Vec<ExportRecord>, ErrorRecord> {
    let wire: Vec<WatchedMovieWire> =
        serde_json::from_slice(bytes).map_err(|e| parse_error(operation, e))?;
    Ok(wire
        .into_iter()
        .map(|w| ExportRecord::WatchedMovie {
            movie: w.movie.into(),
            last_watched_at: w.last_watched_at,
            plays: w.plays,
        })
        .collect())
}

pub fn decode_collection_movies(
    bytes: &[u8],
    operation: &str,
) -> Result<Vec<ExportRecord>, ErrorRecord> {
    let wire: Vec<CollectionMovieWire> =
        serde_json::from_slice(bytes).map_err(|e| parse_error(operation, e))?;
    Ok(wire
        .into_iter()
        .map(|w| ExportRecord::CollectionMovie {
            movie: w.movie.into(),
            collected_at: w.collected_at,
        })
        .collect())
}

pub fn decode_watched_shows(bytes: &[u8], operation: &str) -> Result<Vec<ExportRecord>, ErrorRecord> {
    let wire: Vec<WatchedShowWire> =
        serde_json::from_slice(bytes).map_err(|e| parse_error(operation, e))?;
    Ok(wire
        .into_iter()
        .map(|w| ExportRecord::WatchedShow {
            show: w.show.into(),
            last_watched_at: w.last_watched_at,
            plays: w.plays,
        })
        .collect())
}

pub fn decode_ratings(bytes: &[u8], operation: &str) -> Result<Vec<ExportRecord>, ErrorRecord> {
    let wire: Vec<RatingWire> =
        serde_json::from_slice(bytes).map_err(|e| parse_error(operation, e))?;
    Ok(wire
        .into_iter()
        .map(|w| ExportRecord::Rating {
            movie: w.movie.into(),
            rating: w.rating,
            rated_at: w.rated_at,
        })
        .collect())
}

pub fn decode_show_ratings(bytes: &[u8], operation: &str) -> Result<Vec<ExportRecord>, ErrorRecord> {
    let wire: Vec<ShowRatingWire> =
        serde_json::from_slice(bytes).map_err(|e| parse_error(operation, e))?;
    Ok(wire
        .into_iter()
        .map(|w| ExportRecord::ShowRating {
            show: w.show.into(),
            rating: w.rating,
            rated_at: w.rated_at,
        })
        .collect())
}

pub fn decode_episode_ratings(
    bytes: &[u8],
    operation: &str,
) -> Result<Vec<ExportRecord>, ErrorRecord> {
    let wire: Vec<EpisodeRatingWire> =
        serde_json::from_slice(bytes).map_err(|e| parse_error(operation, e))?;
    Ok(wire
        .into_iter()
        .map(|w| ExportRecord::EpisodeRating {
            show: w.show.into(),
            season: w.episode.season,
            episode: w.episode.number,
            rating: w.rating,
            rated_at: w.rated_at,
        })
        .collect())
}

pub fn decode_watchlist(bytes: &[u8], operation: &str) -> Result<Vec<ExportRecord>, ErrorRecord> {
    let wire: Vec<WatchlistWire> =
        serde_json::from_slice(bytes).map_err(|e| parse_error(operation, e))?;
    Ok(wire
        .into_iter()
        .map(|w| ExportRecord::WatchlistEntry {
            movie: w.movie.into(),
            listed_at: w.listed_at,
        })
        .collect())
}

pub fn decode_movie_history(bytes: &[u8], operation: &str) -> Result<Vec<ExportRecord>, ErrorRecord> {
    let wire: Vec<HistoryWire> =
        serde_json::from_slice(bytes).map_err(|e| parse_error(operation, e))?;
    Ok(wire
        .into_iter()
        .map(|w| ExportRecord::HistoryEvent {
            movie: w.movie.into(),
            watched_at: w.watched_at,
            action: w.action,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_watched_movies_from_upstream_json() {
        let json = br#"[{
            "last_watched_at": "2024-01-02T03:04:05Z",
            "plays": 3,
            "movie": {
                "title": "Arrival",
                "year": 2016,
                "ids": {"trakt": 1, "tmdb": 329865, "imdb": "tt2543164", "slug": "arrival-2016", "tvdb": null}
            }
        }]"#;

        let records = decode_watched_movies(json, "get_watched_movies").unwrap();
        assert_eq!(records.len(), 1);
        match &records[0] {
            ExportRecord::WatchedMovie { movie, plays, .. } => {
                assert_eq!(movie.title, "Arrival");
                assert_eq!(movie.ids.tmdb, Some(329865));
                assert_eq!(*plays, 3);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn decodes_episode_ratings_with_nested_season_and_number() {
        let json = br#"[{
            "rating": 9,
            "rated_at": "2024-01-02T03:04:05Z",
            "show": {"title": "The Wire", "year": 2002, "ids": {"trakt": 2, "tmdb": null, "imdb": null, "slug": null, "tvdb": null}},
            "episode": {"season": 1, "number": 4}
        }]"#;

        let records = decode_episode_ratings(json, "get_episode_ratings").unwrap();
        match &records[0] {
            ExportRecord::EpisodeRating { season, episode, rating, .. } => {
                assert_eq!(*season, 1);
                assert_eq!(*episode, 4);
                assert_eq!(*rating, 9);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn malformed_json_yields_a_parse_category_error() {
        let err = decode_watched_movies(b"not json", "get_watched_movies").unwrap_err();
        assert_eq!(err.category, ErrorCategory::Parse);
    }
}
