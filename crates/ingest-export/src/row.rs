//! Maps an [`ExportRecord`] onto the flat CSV row shape, independent of
//! which variant's header the caller ultimately writes (spec.md §4.7).

use crate::transform::{convert_rating, extract_year};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use ingest_core::domain::ExportRecord;

/// Which CSV shape a file uses. The watched variant carries a watch date
/// and rating column; the watchlist variant drops both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportVariant {
    Watched,
    Watchlist,
}

impl ExportVariant {
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            ExportVariant::Watched => {
                &["Title", "Year", "WatchedDate", "Rating10", "imdbID", "tmdbID", "Rewatch"]
            }
            ExportVariant::Watchlist => &["Title", "Year", "imdbID", "tmdbID", "Rewatch"],
        }
    }
}

/// A fully-transformed row, ready to be rendered as CSV fields.
#[derive(Debug, Clone)]
pub struct Row {
    pub title: String,
    pub year: Option<i32>,
    pub date: Option<DateTime<Utc>>,
    pub rating: Option<f32>,
    pub imdb: Option<String>,
    pub tmdb: Option<i64>,
    pub rewatch: bool,
}

impl Row {
    pub fn from_record(record: &ExportRecord, rewatch: bool) -> Self {
        let media = record.media();
        let (date, rating) = match record {
            ExportRecord::WatchedMovie { last_watched_at, .. }
            | ExportRecord::WatchedShow { last_watched_at, .. } => (Some(*last_watched_at), None),
            ExportRecord::CollectionMovie { collected_at, .. } => (Some(*collected_at), None),
            ExportRecord::Rating { rated_at, rating, .. }
            | ExportRecord::ShowRating { rated_at, rating, .. }
            | ExportRecord::EpisodeRating { rated_at, rating, .. } => {
                (Some(*rated_at), convert_rating(*rating))
            }
            ExportRecord::WatchlistEntry { listed_at, .. } => (Some(*listed_at), None),
            ExportRecord::HistoryEvent { watched_at, .. } => (Some(*watched_at), None),
        };

        Row {
            title: media.title.clone(),
            year: extract_year(media),
            date,
            rating,
            imdb: media.ids.imdb.clone(),
            tmdb: media.ids.tmdb,
            rewatch,
        }
    }

    /// Renders this row's fields in the order `variant`'s header expects,
    /// with dates converted into `tz` and formatted `YYYY-MM-DD`.
    pub fn fields(&self, variant: ExportVariant, tz: &Tz) -> Vec<String> {
        let year = self.year.map(|y| y.to_string()).unwrap_or_default();
        let imdb = self.imdb.clone().unwrap_or_default();
        let tmdb = self.tmdb.map(|t| t.to_string()).unwrap_or_default();
        let rewatch = self.rewatch.to_string();

        match variant {
            ExportVariant::Watched => {
                let date = self
                    .date
                    .map(|d| d.with_timezone(tz).format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                let rating = self.rating.map(|r| r.to_string()).unwrap_or_default();
                vec![self.title.clone(), year, date, rating, imdb, tmdb, rewatch]
            }
            ExportVariant::Watchlist => vec![self.title.clone(), year, imdb, tmdb, rewatch],
        }
    }
}
