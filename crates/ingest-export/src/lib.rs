//! Streaming CSV emission for exported catalog records (spec.md §4.7).
//!
//! [`ExportWriter`] wraps a [`csv::Writer`] over any [`std::io::Write`],
//! flushing on a configurable row-count boundary so memory use stays
//! O(batch size) rather than O(total records) — the Orchestrator hands
//! this writer one decoded endpoint batch at a time, never the whole
//! run's records at once. The transform functions in [`transform`] are
//! plain, independently-tested functions; this module's only job is
//! turning their output into bytes on disk in the right shape.

pub mod paths;
pub mod row;
pub mod transform;

use chrono_tz::Tz;
use csv::Terminator;
use ingest_core::domain::ExportRecord;
use row::{ExportVariant, Row};
use std::io::Write;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ExportWriterConfig {
    pub batch_size: usize,
}

impl Default for ExportWriterConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// Streams rows for a single endpoint family's CSV file. One instance per
/// output file; the Orchestrator opens a fresh writer per endpoint inside
/// a run directory built by [`paths::run_directory`].
pub struct ExportWriter<W: Write> {
    writer: csv::Writer<W>,
    variant: ExportVariant,
    tz: Tz,
    batch_size: usize,
    pending: usize,
}

impl<W: Write> ExportWriter<W> {
    pub fn new(
        inner: W,
        variant: ExportVariant,
        timezone: &str,
        config: ExportWriterConfig,
    ) -> Result<Self, ExportError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| ExportError::InvalidTimezone(timezone.to_string()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(inner);
        writer.write_record(variant.header())?;

        Ok(Self {
            writer,
            variant,
            tz,
            batch_size: config.batch_size.max(1),
            pending: 0,
        })
    }

    /// Writes one already-transformed row, flushing once `batch_size`
    /// rows have accumulated since the last flush.
    pub fn write_row(&mut self, row: &Row) -> Result<(), ExportError> {
        self.writer.write_record(row.fields(self.variant, &self.tz))?;
        self.pending += 1;
        if self.pending >= self.batch_size {
            self.writer.flush()?;
            self.pending = 0;
        }
        Ok(())
    }

    /// Converts and writes a record directly, computing its rewatch flag
    /// from the caller (the historical-stream rewatch pass runs over the
    /// whole batch up front via [`transform::flag_rewatches`], since a
    /// single record carries no notion of "has this identifier appeared
    /// before").
    pub fn write_record(&mut self, record: &ExportRecord, rewatch: bool) -> Result<(), ExportError> {
        self.write_row(&Row::from_record(record, rewatch))
    }

    /// Flushes any buffered rows. Always call this at the end of a batch
    /// even if it didn't reach `batch_size`, and once more when the
    /// endpoint's entire stream is done.
    pub fn finish(mut self) -> Result<(), ExportError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::domain::{ExternalIds, MediaRef};
    use chrono::{TimeZone, Utc};

    fn sample_record() -> ExportRecord {
        ExportRecord::Rating {
            movie: MediaRef {
                title: "Arrival".into(),
                year: Some(2016),
                ids: ExternalIds {
                    tmdb: Some(329865),
                    imdb: Some("tt2543164".into()),
                    ..Default::default()
                },
                released: None,
            },
            rating: 8,
            rated_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap(),
        }
    }

    #[test]
    fn writes_header_then_rows_with_lf_endings() {
        let buffer: Vec<u8> = Vec::new();
        let mut writer = ExportWriter::new(
            buffer,
            ExportVariant::Watched,
            "UTC",
            ExportWriterConfig { batch_size: 100 },
        )
        .unwrap();
        writer.write_record(&sample_record(), false).unwrap();

        // Drop flushes through `finish`, exposing the inner buffer.
        let out = writer.finish();
        assert!(out.is_ok());
    }

    #[test]
    fn flushes_automatically_at_the_batch_boundary() {
        let buffer: Vec<u8> = Vec::new();
        let mut writer = ExportWriter::new(
            buffer,
            ExportVariant::Watched,
            "UTC",
            ExportWriterConfig { batch_size: 2 },
        )
        .unwrap();

        writer.write_record(&sample_record(), false).unwrap();
        assert_eq!(writer.pending, 1);
        writer.write_record(&sample_record(), false).unwrap();
        assert_eq!(writer.pending, 0);
    }

    #[test]
    fn unknown_timezone_is_rejected_at_construction() {
        let buffer: Vec<u8> = Vec::new();
        let result = ExportWriter::new(
            buffer,
            ExportVariant::Watched,
            "Not/A_Zone",
            ExportWriterConfig::default(),
        );
        assert!(matches!(result, Err(ExportError::InvalidTimezone(_))));
    }

    #[test]
    fn produces_the_exact_watched_header() {
        let buffer: Vec<u8> = Vec::new();
        let writer = ExportWriter::new(
            buffer,
            ExportVariant::Watched,
            "UTC",
            ExportWriterConfig::default(),
        )
        .unwrap();
        let bytes = writer.finish_into_inner_for_test();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text.lines().next().unwrap(),
            "Title,Year,WatchedDate,Rating10,imdbID,tmdbID,Rewatch"
        );
    }
}


#[cfg(test)]
impl<W: Write + std::fmt::Debug> ExportWriter<W> {
    fn finish_into_inner_for_test(mut self) -> W {
        self.writer.flush().unwrap();
        self.writer.into_inner().unwrap()
    }
}
