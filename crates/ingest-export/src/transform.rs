//! Pure functions over [`ExportRecord`] implementing the ExportWriter
//! transformations (spec.md §4.7): rating conversion, year extraction,
//! identifier priority, rewatch flagging, and aggregated-mode dedup. None
//! of these touch I/O, so they're tested directly against the source
//! data rather than through a written file.

use chrono::{DateTime, Utc};
use ingest_core::domain::{ExportRecord, ExternalIds, MediaRef};
use std::collections::{BTreeMap, HashSet};

/// Converts a source 1-10 integer rating to the destination's half-star
/// 0.5-5.0 scale. A `None` or zero source rating has nothing to convert.
pub fn convert_rating(rating: u8) -> Option<f32> {
    if rating == 0 {
        None
    } else {
        Some(rating as f32 / 2.0)
    }
}

/// Falls back to parsing the leading four digits of a release-date
/// string when a record carries no explicit year.
pub fn extract_year(media: &MediaRef) -> Option<i32> {
    media.year.or_else(|| {
        media
            .released
            .as_deref()
            .and_then(|date| date.get(0..4))
            .and_then(|prefix| prefix.parse().ok())
    })
}

fn match_key(ids: &ExternalIds, title: &str, year: Option<i32>) -> String {
    ids.match_key(title, year)
}

/// The matching key the ExportWriter uses to identify "the same title"
/// across records: tmdb, else imdb, else title+year (spec §4.7).
pub fn identifier_key(record: &ExportRecord) -> String {
    let media = record.media();
    match_key(&media.ids, &media.title, extract_year(media))
}

fn watched_at(record: &ExportRecord) -> Option<DateTime<Utc>> {
    match record {
        ExportRecord::HistoryEvent { watched_at, .. } => Some(*watched_at),
        _ => None,
    }
}

/// Flags every event after the first chronological occurrence of the
/// same identifier as a rewatch. The input order need not already be
/// chronological; flags are returned aligned to the input slice so a
/// caller can stream records out in their original order while still
/// knowing which ones are rewatches.
///
/// Panics if `events` contains anything other than [`ExportRecord::HistoryEvent`]
/// — this transform only applies to the historical viewing stream.
pub fn flag_rewatches(events: &[ExportRecord]) -> Vec<bool> {
    let mut order: Vec<usize> = (0..events.len()).collect();
    order.sort_by_key(|&i| watched_at(&events[i]).expect("flag_rewatches expects HistoryEvent records"));

    let mut seen = HashSet::new();
    let mut rewatch = vec![false; events.len()];
    for i in order {
        let key = identifier_key(&events[i]);
        rewatch[i] = !seen.insert(key);
    }
    rewatch
}

fn aggregation_timestamp(record: &ExportRecord) -> DateTime<Utc> {
    match record {
        ExportRecord::WatchedMovie { last_watched_at, .. }
        | ExportRecord::WatchedShow { last_watched_at, .. } => *last_watched_at,
        ExportRecord::CollectionMovie { collected_at, .. } => *collected_at,
        ExportRecord::Rating { rated_at, .. }
        | ExportRecord::ShowRating { rated_at, .. }
        | ExportRecord::EpisodeRating { rated_at, .. } => *rated_at,
        ExportRecord::WatchlistEntry { listed_at, .. } => *listed_at,
        ExportRecord::HistoryEvent { watched_at, .. } => *watched_at,
    }
}

/// The 1-10 source rating carried by a record, if the variant has one.
/// Non-rating variants (watched/collection/watchlist/history) have
/// nothing to filter on and always pass a `min_rating` check.
pub fn rating_of(record: &ExportRecord) -> Option<u8> {
    match record {
        ExportRecord::Rating { rating, .. }
        | ExportRecord::ShowRating { rating, .. }
        | ExportRecord::EpisodeRating { rating, .. } => Some(*rating),
        _ => None,
    }
}

/// Drops rating records below `min_rating` (spec.md §6:
/// `export.min_rating` — "records below are dropped"). Records with no
/// rating field are never filtered by this rule.
pub fn filter_min_rating(records: Vec<ExportRecord>, min_rating: u8) -> Vec<ExportRecord> {
    if min_rating == 0 {
        return records;
    }
    records
        .into_iter()
        .filter(|r| rating_of(r).map(|rating| rating >= min_rating).unwrap_or(true))
        .collect()
}

fn plays(record: &ExportRecord) -> u32 {
    match record {
        ExportRecord::WatchedMovie { plays, .. } | ExportRecord::WatchedShow { plays, .. } => *plays,
        _ => 0,
    }
}

/// Collapses a batch down to one record per identifier for aggregated
/// mode: the record with the latest timestamp wins, ties broken by the
/// higher play count (spec §4.7). Keyed by a `BTreeMap` rather than a
/// `HashMap` so the survivors come out in a stable, identifier-sorted
/// order — the spec calls for deterministic flat-file output, and a
/// randomized hasher seed would make row order vary run-to-run.
pub fn dedup_aggregated(records: Vec<ExportRecord>) -> Vec<ExportRecord> {
    let mut best: BTreeMap<String, ExportRecord> = BTreeMap::new();
    for record in records {
        let key = identifier_key(&record);
        match best.get(&key) {
            None => {
                best.insert(key, record);
            }
            Some(current) => {
                let replace = match aggregation_timestamp(&record).cmp(&aggregation_timestamp(current)) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Equal => plays(&record) > plays(current),
                    std::cmp::Ordering::Less => false,
                };
                if replace {
                    best.insert(key, record);
                }
            }
        }
    }
    best.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn media(title: &str, year: Option<i32>, tmdb: Option<i64>) -> MediaRef {
        MediaRef {
            title: title.to_string(),
            year,
            ids: ExternalIds {
                tmdb,
                ..Default::default()
            },
            released: None,
        }
    }

    fn dt(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn rating_conversion_halves_the_source_scale() {
        assert_eq!(convert_rating(10), Some(5.0));
        assert_eq!(convert_rating(7), Some(3.5));
        assert_eq!(convert_rating(1), Some(0.5));
    }

    #[test]
    fn zero_rating_converts_to_empty() {
        assert_eq!(convert_rating(0), None);
    }

    #[test]
    fn year_falls_back_to_release_date_prefix() {
        let m = MediaRef {
            title: "Arrival".into(),
            year: None,
            ids: ExternalIds::default(),
            released: Some("2016-11-10".into()),
        };
        assert_eq!(extract_year(&m), Some(2016));
    }

    #[test]
    fn year_is_empty_when_neither_field_is_usable() {
        let m = MediaRef {
            title: "Unknown".into(),
            year: None,
            ids: ExternalIds::default(),
            released: None,
        };
        assert_eq!(extract_year(&m), None);
    }

    #[test]
    fn identifier_key_prefers_tmdb_over_title_year() {
        let record = ExportRecord::WatchlistEntry {
            movie: media("Arrival", Some(2016), Some(329865)),
            listed_at: dt(0),
        };
        assert_eq!(identifier_key(&record), "tmdb:329865");
    }

    #[test]
    fn rewatches_are_flagged_after_the_first_chronological_occurrence() {
        let events = vec![
            ExportRecord::HistoryEvent {
                movie: media("Arrival", Some(2016), Some(1)),
                watched_at: dt(200),
                action: "watch".into(),
            },
            ExportRecord::HistoryEvent {
                movie: media("Arrival", Some(2016), Some(1)),
                watched_at: dt(100),
                action: "watch".into(),
            },
            ExportRecord::HistoryEvent {
                movie: media("Other", Some(2020), Some(2)),
                watched_at: dt(150),
                action: "watch".into(),
            },
        ];

        let flags = flag_rewatches(&events);
        // input[1] is chronologically first for tmdb:1, so it's not a rewatch
        // even though it appears second in input order.
        assert_eq!(flags, vec![true, false, false]);
    }

    #[test]
    fn aggregated_dedup_keeps_latest_watch_per_identifier() {
        let records = vec![
            ExportRecord::WatchedMovie {
                movie: media("Arrival", Some(2016), Some(1)),
                last_watched_at: dt(100),
                plays: 1,
            },
            ExportRecord::WatchedMovie {
                movie: media("Arrival", Some(2016), Some(1)),
                last_watched_at: dt(200),
                plays: 2,
            },
        ];

        let deduped = dedup_aggregated(records);
        assert_eq!(deduped.len(), 1);
        match &deduped[0] {
            ExportRecord::WatchedMovie { last_watched_at, plays, .. } => {
                assert_eq!(*last_watched_at, dt(200));
                assert_eq!(*plays, 2);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn min_rating_of_zero_is_a_no_op() {
        let records = vec![ExportRecord::Rating {
            movie: media("Arrival", Some(2016), Some(1)),
            rating: 3,
            rated_at: dt(0),
        }];
        assert_eq!(filter_min_rating(records.clone(), 0).len(), records.len());
    }

    #[test]
    fn min_rating_drops_low_ratings_but_keeps_non_rating_records() {
        let records = vec![
            ExportRecord::Rating {
                movie: media("Low", Some(2016), Some(1)),
                rating: 3,
                rated_at: dt(0),
            },
            ExportRecord::Rating {
                movie: media("High", Some(2016), Some(2)),
                rating: 8,
                rated_at: dt(0),
            },
            ExportRecord::WatchlistEntry {
                movie: media("Watchlisted", Some(2016), Some(3)),
                listed_at: dt(0),
            },
        ];

        let filtered = filter_min_rating(records, 7);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().any(|r| matches!(r, ExportRecord::WatchlistEntry { .. })));
        assert!(filtered
            .iter()
            .any(|r| matches!(r, ExportRecord::Rating { rating: 8, .. })));
    }

    #[test]
    fn aggregated_dedup_breaks_ties_on_higher_play_count() {
        let records = vec![
            ExportRecord::WatchedMovie {
                movie: media("Arrival", Some(2016), Some(1)),
                last_watched_at: dt(100),
                plays: 5,
            },
            ExportRecord::WatchedMovie {
                movie: media("Arrival", Some(2016), Some(1)),
                last_watched_at: dt(100),
                plays: 1,
            },
        ];

        let deduped = dedup_aggregated(records);
        assert_eq!(deduped.len(), 1);
        match &deduped[0] {
            ExportRecord::WatchedMovie { plays, .. } => assert_eq!(*plays, 5),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn aggregated_dedup_output_order_is_stable_across_runs() {
        let records = vec![
            ExportRecord::WatchedMovie {
                movie: media("Zodiac", Some(2007), Some(3)),
                last_watched_at: dt(100),
                plays: 1,
            },
            ExportRecord::WatchedMovie {
                movie: media("Arrival", Some(2016), Some(1)),
                last_watched_at: dt(100),
                plays: 1,
            },
            ExportRecord::WatchedMovie {
                movie: media("Her", Some(2013), Some(2)),
                last_watched_at: dt(100),
                plays: 1,
            },
        ];

        let first = dedup_aggregated(records.clone());
        let second = dedup_aggregated(records);
        let keys = |rows: &[ExportRecord]| rows.iter().map(identifier_key).collect::<Vec<_>>();
        assert_eq!(keys(&first), keys(&second));
    }
}
