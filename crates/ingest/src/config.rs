//! Aggregates the plain config value types from `ingest-core::config`
//! (spec.md §6) into the one struct [`Engine::build`](crate::Engine::build)
//! consumes. Parsing these out of a TOML file or environment variables is
//! a job for the CLI layer outside this workspace — this struct is
//! assembled, not deserialized, here.

use ingest_core::config::{CacheConfig, ConcurrencyConfig, ErrorPolicyConfig, ExportConfig, TokenStoreConfig, UpstreamConfig};

/// Everything [`crate::Engine::build`] needs to construct the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub concurrency: ConcurrencyConfig,
    pub export: ExportConfig,
    pub error_policy: ErrorPolicyConfig,
    pub token_store: TokenStoreConfig,

    /// OAuth token refresh endpoint (spec.md §6 "OAuth endpoints").
    pub token_refresh_url: String,

    /// 32-byte AES-256-GCM key for the `file` token store backend. Required
    /// when `token_store.backend == TokenStoreBackend::File`; ignored by
    /// the other two backends. Deriving this from a passphrase or an
    /// OS-level machine secret is the caller's concern, not this crate's.
    pub token_master_key: Option<[u8; 32]>,

    /// Whether `run_export_concurrent` cancels the remaining endpoints on
    /// the first failure (spec.md §9 open question, resolved to `false`
    /// as the default in `ingest-orchestrator`).
    pub fail_fast: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            export: ExportConfig::default(),
            error_policy: ErrorPolicyConfig::default(),
            token_store: TokenStoreConfig::default(),
            token_refresh_url: "https://api.trakt.tv/oauth/token".to_string(),
            token_master_key: None,
            fail_fast: false,
        }
    }
}
