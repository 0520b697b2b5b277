//! Pooled HTTPS transport (spec.md §4.4).
//!
//! Grounded in the teacher pack's `acton-service::audit::alert_webhook`,
//! which builds one `reqwest::Client` up front and reuses it for every
//! send rather than constructing a client per call. Generalized here with
//! explicit pool sizing, gzip negotiation, and a TLS floor, and widened
//! from "one fixed destination" to an arbitrary [`EndpointRequest`].
//!
//! This crate is deliberately thin: no retry, no cache, no auth. It
//! exposes exactly one operation, [`HTTPTransport::do_request`], so every
//! other concern stays in the component that owns it.

use http::{HeaderMap, Method};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
}

impl From<TransportError> for ingest_core::ErrorCategory {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => ingest_core::ErrorCategory::Cancelled,
            TransportError::Timeout => ingest_core::ErrorCategory::Network,
            TransportError::Http(e) if e.is_timeout() || e.is_connect() => {
                ingest_core::ErrorCategory::Network
            }
            TransportError::Http(e) => e
                .status()
                .map(|status| {
                    if status.as_u16() == 429 {
                        ingest_core::ErrorCategory::RateLimit
                    } else if status.is_client_error() {
                        ingest_core::ErrorCategory::Client
                    } else if status.is_server_error() {
                        ingest_core::ErrorCategory::Server
                    } else {
                        ingest_core::ErrorCategory::Network
                    }
                })
                .unwrap_or(ingest_core::ErrorCategory::Network),
        }
    }
}

/// A single outbound request. The transport neither inspects nor retains
/// anything about it beyond what's needed to send it.
#[derive(Debug, Clone)]
pub struct EndpointRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl EndpointRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Total pool size across all hosts; reqwest only exposes a per-host
    /// idle cap, so this is halved into `pool_max_idle_per_host` per
    /// spec.md's "default 20, half that per host."
    pub pool_max_idle: usize,
    pub pool_idle_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pool_max_idle: 20,
            pool_idle_timeout: Duration::from_secs(90),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("ingest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// A single shared, connection-pooled `reqwest::Client`. Stateless beyond
/// the pool itself: every call is independent, and the client is safe to
/// clone and share across tasks (`reqwest::Client` is internally an
/// `Arc`).
pub struct HTTPTransport {
    client: reqwest::Client,
}

impl HTTPTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle / 2)
            .pool_idle_timeout(config.pool_idle_timeout)
            .timeout(config.request_timeout)
            .gzip(true)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .user_agent(config.user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Sends `request`, racing the send against `cancel`. No retry, no
    /// status-code interpretation beyond surfacing the response as-is;
    /// callers decide what a 4xx/5xx means.
    pub async fn do_request(
        &self,
        request: EndpointRequest,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, TransportError> {
        let mut builder = self.client.request(request.method, request.url);
        builder = builder.headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        tokio::select! {
            result = builder.send() => result.map_err(TransportError::from),
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_halves_the_pool_for_per_host_idle_cap() {
        let config = TransportConfig::default();
        assert_eq!(config.pool_max_idle, 20);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn builds_a_client_from_default_config() {
        let transport = HTTPTransport::new(TransportConfig::default());
        assert!(transport.is_ok());
    }

    #[tokio::test]
    async fn cancellation_preempts_a_pending_send() {
        let transport = HTTPTransport::new(TransportConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = EndpointRequest::get(Url::parse("https://example.invalid/").unwrap());
        let result = transport.do_request(request, &cancel).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
