//! TTL cache for provider catalog data
//!
//! Pricing and catalog endpoints are rate-limited on the provider side, so
//! adapters keep the last response around and refetch only when it expires.
//! Concurrent misses are serialized behind the write lock, which keeps a
//! burst of callers down to a single upstream request.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct Cached<T> {
    ttl: Option<Duration>,
    slot: RwLock<Option<(Instant, T)>>,
}

impl<T: Clone> Cached<T> {
    /// Entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            slot: RwLock::new(None),
        }
    }

    /// Entries live for the lifetime of the process.
    pub fn forever() -> Self {
        Self {
            ttl: None,
            slot: RwLock::new(None),
        }
    }

    fn is_fresh(&self, stored_at: Instant) -> bool {
        self.ttl.is_none_or(|ttl| stored_at.elapsed() < ttl)
    }

    pub async fn get_or_try_fetch<F, Fut, E>(&self, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let guard = self.slot.read().await;
            if let Some((stored_at, value)) = guard.as_ref()
                && self.is_fresh(*stored_at)
            {
                return Ok(value.clone());
            }
        }

        let mut guard = self.slot.write().await;
        if let Some((stored_at, value)) = guard.as_ref()
            && self.is_fresh(*stored_at)
        {
            return Ok(value.clone());
        }

        let value = fetch().await?;
        *guard = Some((Instant::now(), value.clone()));
        tracing::debug!("Cache refreshed");
        Ok(value)
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_fetches_once_while_fresh() {
        let cache = Cached::forever();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value: Result<u32, ()> = cache
                .get_or_try_fetch(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await;
            assert_eq!(value, Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache: Cached<u32> = Cached::new(Duration::from_secs(60));

        let first: Result<u32, &str> = cache.get_or_try_fetch(|| async { Err("down") }).await;
        assert_eq!(first, Err("down"));

        let second: Result<u32, &str> = cache.get_or_try_fetch(|| async { Ok(7) }).await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let cache = Cached::new(Duration::ZERO);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _: Result<u32, ()> = cache
                .get_or_try_fetch(|| async {
                    Ok(calls.fetch_add(1, Ordering::SeqCst))
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
