//! Read-only credentials sourced from environment variables (spec.md
//! §4.1: "suitable for CI and container deployments where tokens are
//! injected, never written back").

use crate::{TokenStore, TokenStoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingest_core::domain::Credentials;

pub struct EnvTokenStore {
    access_token_var: String,
    refresh_token_var: String,
    expires_at_var: String,
    client_id_var: String,
    client_secret_var: String,
}

impl EnvTokenStore {
    pub fn new() -> Self {
        Self {
            access_token_var: "TRAKT_ACCESS_TOKEN".into(),
            refresh_token_var: "TRAKT_REFRESH_TOKEN".into(),
            expires_at_var: "TRAKT_TOKEN_EXPIRES_AT".into(),
            client_id_var: "TRAKT_CLIENT_ID".into(),
            client_secret_var: "TRAKT_CLIENT_SECRET".into(),
        }
    }
}

impl Default for EnvTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for EnvTokenStore {
    async fn load(&self) -> Result<Option<Credentials>, TokenStoreError> {
        let Ok(access_token) = std::env::var(&self.access_token_var) else {
            return Ok(None);
        };
        let refresh_token = std::env::var(&self.refresh_token_var).ok();
        let expires_at = std::env::var(&self.expires_at_var)
            .ok()
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let client_id = std::env::var(&self.client_id_var).unwrap_or_default();
        let client_secret = std::env::var(&self.client_secret_var).unwrap_or_default();

        Ok(Some(Credentials {
            access_token,
            refresh_token,
            expires_at,
            client_id,
            client_secret,
        }))
    }

    async fn store(&self, _credentials: &Credentials) -> Result<(), TokenStoreError> {
        Err(TokenStoreError::ReadOnly("env"))
    }

    async fn clear(&self) -> Result<(), TokenStoreError> {
        Err(TokenStoreError::ReadOnly("env"))
    }
}
