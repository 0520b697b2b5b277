//! OAuth credential persistence and single-flight refresh coalescing
//! (spec.md §4.1).
//!
//! Three backends share one [`TokenStore`] contract, the way the
//! enrichment repo's `RefreshTokenStorage` trait lets Redis/Postgres/Turso
//! stand in for each other behind a single async interface. The
//! single-flight refresh coalescing is lifted from the teacher's
//! `tower-resilience-coalesce` crate: a `Mutex`-guarded map from key to a
//! `broadcast::Sender`, first caller becomes the leader and runs the
//! refresh, everyone else subscribes to its result.

pub mod env;
pub mod file;
pub mod refresh;
#[cfg(feature = "vault")]
pub mod vault;

pub use env::EnvTokenStore;
pub use file::FileTokenStore;
pub use refresh::{RefreshCoalescer, RefreshError};
#[cfg(feature = "vault")]
pub use vault::VaultTokenStore;

use async_trait::async_trait;
use ingest_core::domain::{Credentials, TokenStatus};

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("credential file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encryption error: {0}")]
    Crypto(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no credentials present")]
    Absent,
    #[error("backend does not support writes: {0}")]
    ReadOnly(&'static str),
    #[cfg(feature = "vault")]
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl From<TokenStoreError> for ingest_core::ErrorCategory {
    fn from(err: TokenStoreError) -> Self {
        match err {
            TokenStoreError::Io(_) => ingest_core::ErrorCategory::Filesystem,
            TokenStoreError::Serde(_) => ingest_core::ErrorCategory::Parse,
            _ => ingest_core::ErrorCategory::Operation,
        }
    }
}

/// Persists and retrieves the credentials used for API authentication.
/// Every backend (file, environment, vault) implements this same contract
/// (spec §4.1: "TokenStore abstracts over the storage backend").
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credentials>, TokenStoreError>;
    async fn store(&self, credentials: &Credentials) -> Result<(), TokenStoreError>;
    async fn clear(&self) -> Result<(), TokenStoreError>;

    async fn status(&self) -> Result<TokenStatus, TokenStoreError> {
        match self.load().await? {
            Some(creds) => Ok(TokenStatus {
                present: true,
                valid_until: Some(creds.expires_at),
                refreshable: creds.refresh_token.is_some(),
            }),
            None => Ok(TokenStatus::absent()),
        }
    }
}
