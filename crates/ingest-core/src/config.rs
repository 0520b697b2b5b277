//! Configuration value types (spec.md §6). These are plain structs with
//! `Default` impls matching the spec's defaults; parsing them out of a TOML
//! file or environment variables is a job for the CLI layer outside this
//! workspace, not for the engine.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub extended_info: Option<String>,
    pub api_timeout: Duration,
    pub max_retries: u32,
    pub rate_limit_per_second: f64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.trakt.tv".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            extended_info: None,
            api_timeout: Duration::from_secs(30),
            max_retries: 5,
            rate_limit_per_second: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(24 * 3600),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyConfig {
    pub worker_pool_size: usize,
    pub connection_pool: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            connection_pool: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportModeConfig {
    Aggregated,
    Historical,
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub output_root: std::path::PathBuf,
    pub timezone: String,
    pub mode: ExportModeConfig,
    pub include_ratings: bool,
    pub include_watchlist: bool,
    pub include_collections: bool,
    pub min_rating: u8,
    pub batch_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_root: std::path::PathBuf::from("./exports"),
            timezone: "UTC".to_string(),
            mode: ExportModeConfig::Aggregated,
            include_ratings: true,
            include_watchlist: true,
            include_collections: true,
            min_rating: 0,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorPolicyConfig {
    pub circuit_breaker_enabled: bool,
    pub consecutive_fail_threshold: u32,
    pub cooldown: Duration,
}

impl Default for ErrorPolicyConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_enabled: true,
            consecutive_fail_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStoreBackend {
    File,
    Env,
    Vault,
}

#[derive(Debug, Clone)]
pub struct TokenStoreConfig {
    pub backend: TokenStoreBackend,
    pub file_path: std::path::PathBuf,
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            backend: TokenStoreBackend::File,
            file_path: std::path::PathBuf::from("./credentials.enc"),
        }
    }
}
