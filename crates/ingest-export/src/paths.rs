//! Per-run output directory naming (spec.md §4.7: "outputs go into a
//! per-run directory named `export_YYYY-MM-DD_HH-MM`").

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub fn run_directory(root: &Path, started_at: DateTime<Utc>) -> PathBuf {
    root.join(format!("export_{}", started_at.format("%Y-%m-%d_%H-%M")))
}

/// The file name an endpoint family writes within a run directory, e.g.
/// `watched_movies.csv`.
pub fn endpoint_file_name(endpoint_kind: &str) -> String {
    format!("{endpoint_kind}.csv")
}
