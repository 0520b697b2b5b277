//! Canonical URL construction and fingerprinting (spec.md §4.5 step 1–2,
//! §9 design notes).
//!
//! Grounded in the teacher pack's general preference for content hashing
//! over string keys (`blake3` is already a teacher-adjacent dependency);
//! generalized here to hash a canonicalized URL rather than an arbitrary
//! byte buffer. Canonicalization sorts query parameters by name then
//! value and drops empty values so that parameter reordering never
//! produces a different cache key (the "fingerprint stability" testable
//! property).

use url::Url;

/// Builds `base_url` + `path` with query parameters sorted by name then
/// value, empty values dropped. `extended`, when non-empty, is folded in
/// as an ordinary parameter so the basic and extended variants of the
/// same endpoint never collide (spec: "guarantees cached responses of
/// the basic and extended variants never collide").
pub fn canonical_url(
    base_url: &str,
    path: &str,
    params: &[(&str, &str)],
    extended: Option<&str>,
) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(base_url)?;
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    let mut url = base.join(path.trim_start_matches('/'))?;

    let mut pairs: Vec<(String, String)> = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if let Some(extended) = extended.filter(|e| !e.is_empty()) {
        pairs.push(("extended".to_string(), extended.to_string()));
    }
    pairs.sort();

    url.query_pairs_mut().clear();
    if !pairs.is_empty() {
        let mut query = url.query_pairs_mut();
        for (k, v) in &pairs {
            query.append_pair(k, v);
        }
    } else {
        url.set_query(None);
    }

    Ok(url)
}

/// Hashes the canonical URL's string form with blake3, cheaper and more
/// collision-resistant than using the string itself as the cache key.
pub fn fingerprint(url: &Url) -> String {
    blake3::hash(url.as_str().as_bytes()).to_hex().to_string()
}
