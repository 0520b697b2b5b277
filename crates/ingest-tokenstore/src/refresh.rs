//! Single-flight OAuth token refresh (spec.md §4.1: "concurrent callers
//! observing an expired token must coalesce into a single refresh").
//!
//! Lifted from the teacher's `tower-resilience-coalesce::InFlight`: a
//! mutex-guarded map from key to a `broadcast::Sender`. The first caller
//! for a key becomes the leader and performs the refresh; every other
//! caller for the same key subscribes to the leader's broadcast result
//! instead of refreshing again.

use ingest_core::domain::Credentials;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError<E> {
    #[error("refresh failed: {0}")]
    Inner(E),
    #[error("the leader refresh was dropped before completing")]
    LeaderDropped,
}

struct InFlight {
    senders: Mutex<HashMap<String, broadcast::Sender<Result<Credentials, String>>>>,
}

impl InFlight {
    fn new() -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
        }
    }

    fn try_join(&self, key: &str) -> Option<broadcast::Receiver<Result<Credentials, String>>> {
        let mut senders = self.senders.lock();
        if let Some(tx) = senders.get(key) {
            Some(tx.subscribe())
        } else {
            let (tx, _rx) = broadcast::channel(1);
            senders.insert(key.to_string(), tx);
            None
        }
    }

    fn complete(&self, key: &str, result: Result<Credentials, String>) {
        if let Some(tx) = self.senders.lock().remove(key) {
            let _ = tx.send(result);
        }
    }
}

/// Coalesces concurrent refresh attempts for the same credential key
/// (typically the client id, since one process refreshes one account's
/// tokens at a time).
pub struct RefreshCoalescer {
    in_flight: Arc<InFlight>,
}

impl RefreshCoalescer {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(InFlight::new()),
        }
    }

    /// Runs `refresh` if no refresh for `key` is already in flight,
    /// otherwise awaits the in-flight leader's result.
    pub async fn refresh_once<F, Fut, E>(
        &self,
        key: &str,
        refresh: F,
    ) -> Result<Credentials, RefreshError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Credentials, E>>,
        E: std::fmt::Display + From<String>,
    {
        match self.in_flight.try_join(key) {
            Some(mut receiver) => match receiver.recv().await {
                Ok(Ok(creds)) => Ok(creds),
                Ok(Err(message)) => Err(RefreshError::Inner(parse_inner::<E>(message))),
                Err(_) => Err(RefreshError::LeaderDropped),
            },
            None => {
                let result = refresh().await;
                let broadcast_result = result
                    .as_ref()
                    .map(Clone::clone)
                    .map_err(|e| e.to_string());
                self.in_flight.complete(key, broadcast_result);
                result.map_err(RefreshError::Inner)
            }
        }
    }
}

/// Followers only ever see the leader's error as a rendered string; since
/// `E` may not be constructible from a string, followers get a
/// [`RefreshError::Inner`] carrying that string coerced through `E`'s
/// `From<String>` when available, falling back to leader-dropped
/// semantics otherwise. The ingestion engine's refresh errors are always
/// `ErrorRecord`, which provides that conversion.
fn parse_inner<E>(message: String) -> E
where
    E: From<String>,
{
    E::from(message)
}

impl Default for RefreshCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::sample_credentials;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct TestErr(String);
    impl std::fmt::Display for TestErr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl From<String> for TestErr {
        fn from(s: String) -> Self {
            TestErr(s)
        }
    }

    #[tokio::test]
    async fn concurrent_refreshes_for_the_same_key_coalesce_into_one_call() {
        let coalescer = Arc::new(RefreshCoalescer::new());
        let call_count = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coalescer = coalescer.clone();
            let call_count = call_count.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .refresh_once::<_, _, TestErr>("client-1", || async move {
                        call_count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(sample_credentials())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_refresh_independently() {
        let coalescer = RefreshCoalescer::new();
        let call_count = Arc::new(AtomicU32::new(0));

        for key in ["a", "b"] {
            let call_count = call_count.clone();
            coalescer
                .refresh_once::<_, _, TestErr>(key, || async move {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    Ok(sample_credentials())
                })
                .await
                .unwrap();
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sequential_refreshes_for_the_same_key_each_run() {
        let coalescer = RefreshCoalescer::new();
        let call_count = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let call_count = call_count.clone();
            coalescer
                .refresh_once::<_, _, TestErr>("client-1", || async move {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    Ok(sample_credentials())
                })
                .await
                .unwrap();
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }
}
