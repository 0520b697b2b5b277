//! Token refresh: the OAuth exchange itself, coalesced so that concurrent
//! 401s on different endpoints trigger exactly one refresh call (spec.md
//! §4.5 step 8, §5 "token-refresh single-flight barrier").
//!
//! The OAuth client construction mirrors the teacher pack's
//! `auth/oauth/providers/google.rs`: a typestate `oauth2::Client` built up
//! with `set_client_secret`/`set_token_uri`, refreshed via
//! `exchange_refresh_token(...).request_async(&http_client)`. Only the
//! token endpoint is configured — this client never drives an
//! authorization-code exchange, so no auth/redirect URL is set.

use async_trait::async_trait;
use chrono::Utc;
use ingest_core::domain::Credentials;
use ingest_core::error::{ErrorCategory, ErrorRecord};
use ingest_errors::RecoveryStrategy;
use ingest_tokenstore::{RefreshCoalescer, RefreshError, TokenStore, TokenStoreError};
use oauth2::basic::{BasicErrorResponse, BasicTokenType};
use oauth2::{
    ClientId, ClientSecret, EmptyExtraTokenFields, EndpointNotSet, EndpointSet,
    StandardRevocableToken, StandardTokenIntrospectionResponse, StandardTokenResponse, TokenResponse,
    TokenUrl,
};
use std::sync::Arc;

type RefreshClient = oauth2::Client<
    BasicErrorResponse,
    StandardTokenResponse<EmptyExtraTokenFields, BasicTokenType>,
    StandardTokenIntrospectionResponse<EmptyExtraTokenFields, BasicTokenType>,
    StandardRevocableToken,
    BasicErrorResponse,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

fn refresh_error(message: impl Into<String>) -> ErrorRecord {
    ErrorRecord::new(ErrorCategory::Authentication, "refresh_failed", message, "token_refresh")
}

/// The narrow capability an auth recovery strategy needs: refresh the
/// stored credentials and persist the result. Nothing about caching,
/// rate limiting, or the endpoint that triggered the 401 is visible here
/// (spec §7 propagation policy: "the APIClient recovers token refresh").
pub struct TokenRefreshHandle {
    token_store: Arc<dyn TokenStore>,
    coalescer: Arc<RefreshCoalescer>,
    oauth_client: RefreshClient,
    http_client: reqwest::Client,
}

impl TokenRefreshHandle {
    pub fn new(
        token_store: Arc<dyn TokenStore>,
        coalescer: Arc<RefreshCoalescer>,
        token_url: &str,
        client_id: String,
        client_secret: String,
    ) -> Result<Self, ErrorRecord> {
        let oauth_client = oauth2::Client::new(ClientId::new(client_id))
            .set_client_secret(ClientSecret::new(client_secret))
            .set_token_uri(
                TokenUrl::new(token_url.to_string())
                    .map_err(|e| refresh_error(format!("invalid token url: {e}")))?,
            );

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| refresh_error(format!("failed to build oauth http client: {e}")))?;

        Ok(Self {
            token_store,
            coalescer,
            oauth_client,
            http_client,
        })
    }

    /// Refreshes and persists new credentials, coalescing concurrent
    /// callers onto one in-flight exchange.
    pub async fn refresh(&self) -> Result<Credentials, ErrorRecord> {
        let current = self
            .token_store
            .load()
            .await
            .map_err(|e| refresh_error(e.to_string()))?
            .ok_or_else(|| refresh_error("no credentials to refresh"))?;

        let Some(refresh_token) = current.refresh_token.clone() else {
            return Err(refresh_error("credentials have no refresh token"));
        };

        let key = current.client_id.clone();
        let oauth_client = &self.oauth_client;
        let http_client = &self.http_client;
        let client_id = current.client_id.clone();
        let client_secret = current.client_secret.clone();

        let result = self
            .coalescer
            .refresh_once::<_, _, ErrorRecord>(&key, || async move {
                let token_result = oauth_client
                    .exchange_refresh_token(&oauth2::RefreshToken::new(refresh_token))
                    .request_async(http_client)
                    .await
                    .map_err(|e| refresh_error(format!("token refresh request failed: {e}")))?;

                Ok(Credentials {
                    access_token: token_result.access_token().secret().clone(),
                    refresh_token: token_result
                        .refresh_token()
                        .map(|t| t.secret().clone())
                        .or(Some(current.refresh_token.clone().unwrap())),
                    expires_at: token_result
                        .expires_in()
                        .map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default())
                        .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1)),
                    client_id,
                    client_secret,
                })
            })
            .await;

        let credentials = match result {
            Ok(creds) => creds,
            Err(RefreshError::Inner(e)) => return Err(e),
            Err(RefreshError::LeaderDropped) => {
                return Err(refresh_error("the leading refresh was dropped before completing"))
            }
        };

        // A read-only backend (EnvTokenStore, CI-injected tokens) can still
        // hand out a refresh token even though it can't persist the result;
        // the freshly exchanged credentials are good for this process either
        // way, so only a genuine write failure aborts the refresh.
        match self.token_store.store(&credentials).await {
            Ok(()) => {}
            Err(TokenStoreError::ReadOnly(backend)) => {
                tracing::warn!(backend, "refreshed credentials could not be persisted to a read-only token store");
            }
            Err(e) => return Err(refresh_error(e.to_string())),
        }

        Ok(credentials)
    }
}

/// Registers with an [`ingest_errors::ErrorManager<TokenRefreshHandle>`]
/// so authentication failures recover the same way whether they're
/// observed by the APIClient directly or surfaced to a caller that only
/// holds an `ErrorManager` handle.
pub struct AuthRecoveryStrategy;

#[async_trait]
impl RecoveryStrategy for AuthRecoveryStrategy {
    type Context = TokenRefreshHandle;

    async fn can_recover(&self, error: &ErrorRecord) -> bool {
        error.category == ErrorCategory::Authentication
    }

    async fn recover(&self, ctx: &TokenRefreshHandle, _error: &ErrorRecord) -> Result<(), ErrorRecord> {
        ctx.refresh().await.map(|_| ())
    }
}
