//! The error taxonomy every component in the engine surfaces.
//!
//! No raw transport or parse error ever escapes a component boundary —
//! everything is classified into an [`ErrorRecord`] before it is returned
//! to a caller, so that the [`ErrorManager`](https://docs.rs/ingest-errors)
//! can apply a uniform retry/circuit-breaker/recovery pipeline regardless
//! of which component originated the failure.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Classification used to select a retry policy and to report metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    Network,
    Authentication,
    RateLimit,
    Client,
    Server,
    Operation,
    Filesystem,
    Parse,
    Cancelled,
    CircuitOpen,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::RateLimit => "rate-limit",
            ErrorCategory::Client => "client",
            ErrorCategory::Server => "server",
            ErrorCategory::Operation => "operation",
            ErrorCategory::Filesystem => "filesystem",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::CircuitOpen => "circuit-open",
        }
    }

    /// Best-effort classification of a raw error message, used when a
    /// lower layer did not already carry a category (spec §4.6: substring
    /// heuristics on timeout/connection/unauthorized/rate limit/file).
    pub fn classify_message(message: &str) -> ErrorCategory {
        let lower = message.to_ascii_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            ErrorCategory::Network
        } else if lower.contains("connection") {
            ErrorCategory::Network
        } else if lower.contains("unauthorized") || lower.contains("unauthenticated") {
            ErrorCategory::Authentication
        } else if lower.contains("rate limit") {
            ErrorCategory::RateLimit
        } else if lower.contains("file") || lower.contains("directory") {
            ErrorCategory::Filesystem
        } else {
            ErrorCategory::Operation
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, context-carrying error. This is the *only* error shape
/// that crosses a component boundary in the engine.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    pub context: BTreeMap<String, String>,
}

impl ErrorRecord {
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            cause: None,
            operation: operation.into(),
            timestamp: Utc::now(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Walks the cause chain, as required by the "original cause is
    /// reachable" testable property (spec §8, invariant 5).
    pub fn cause_chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.cause.as_ref().map(|c| c.as_ref() as &(dyn StdError));
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        chain
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Cancelled,
            "cancelled",
            "operation cancelled",
            operation,
        )
    }

    pub fn circuit_open(operation: impl Into<String>) -> Self {
        let op = operation.into();
        Self::new(
            ErrorCategory::CircuitOpen,
            "circuit_open",
            format!("circuit breaker open for operation {op}"),
            op,
        )
    }

    pub fn is_retryable_category(&self) -> bool {
        !matches!(
            self.category,
            ErrorCategory::Cancelled
                | ErrorCategory::CircuitOpen
                | ErrorCategory::Client
                | ErrorCategory::Authentication
                | ErrorCategory::Parse
                | ErrorCategory::Filesystem
        )
    }
}

/// Lets generic call sites that only know an error as a rendered string
/// (e.g. a single-flight coalescer's follower branch) still produce an
/// `ErrorRecord`, classified by the same substring heuristics as any
/// other raw error.
impl From<String> for ErrorRecord {
    fn from(message: String) -> Self {
        let category = ErrorCategory::classify_message(&message);
        ErrorRecord::new(category, "classified", message, "unknown")
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}] {} (operation={})",
            self.category, self.code, self.message, self.operation
        )
    }
}

impl StdError for ErrorRecord {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn classifies_common_substrings() {
        assert_eq!(
            ErrorCategory::classify_message("connection refused"),
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorCategory::classify_message("request timed out"),
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorCategory::classify_message("401 unauthorized"),
            ErrorCategory::Authentication
        );
        assert_eq!(
            ErrorCategory::classify_message("rate limit exceeded"),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ErrorCategory::classify_message("no such file or directory"),
            ErrorCategory::Filesystem
        );
        assert_eq!(
            ErrorCategory::classify_message("something weird"),
            ErrorCategory::Operation
        );
    }

    #[test]
    fn cause_chain_is_reachable() {
        let io_err = io::Error::new(io::ErrorKind::Other, "disk full");
        let record = ErrorRecord::new(ErrorCategory::Filesystem, "write_failed", "write failed", "export")
            .with_cause(io_err);

        let chain = record.cause_chain();
        assert_eq!(chain, vec!["disk full".to_string()]);
    }

    #[test]
    fn cancelled_errors_are_not_retryable() {
        let record = ErrorRecord::cancelled("sync_watched_movies");
        assert!(!record.is_retryable_category());
    }
}
