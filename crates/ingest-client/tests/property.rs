//! Property test for fingerprint permutation invariance (spec.md §8,
//! SPEC_FULL.md §8), in the style of the pack's `tests/property/*.rs`
//! proptest suites.

use ingest_client::fingerprint::{canonical_url, fingerprint};
use proptest::prelude::*;

fn param_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(
        ("[a-z]{1,5}".prop_map(String::from), "[a-z0-9]{1,5}".prop_map(String::from)),
        0..5,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: shuffling the order query parameters are passed in never
    /// changes the resulting fingerprint, since canonicalization sorts
    /// them before hashing.
    #[test]
    fn fingerprint_is_invariant_to_parameter_order(mut params in param_strategy()) {
        let original: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let original_url = canonical_url("https://api.trakt.tv", "sync/watched/movies", &original, None).unwrap();
        let original_fp = fingerprint(&original_url);

        // Reverse is a permutation distinct from the original whenever
        // there's more than one parameter.
        params.reverse();
        let shuffled: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let shuffled_url = canonical_url("https://api.trakt.tv", "sync/watched/movies", &shuffled, None).unwrap();
        let shuffled_fp = fingerprint(&shuffled_url);

        prop_assert_eq!(original_fp, shuffled_fp);
    }
}
