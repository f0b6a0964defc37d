use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Cache, effective_ttl};
use crate::Result;

const EVICTION_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct MemItem {
    data: Vec<u8>,
    expires_at: Instant,
}

/// In-process cache with per-entry TTL.
///
/// A background task sweeps expired entries every five minutes; lazy expiry
/// on read covers correctness between sweeps. Safe for concurrent use.
pub struct MemoryCache {
    items: RwLock<HashMap<String, MemItem>>,
    shutdown: CancellationToken,
}

impl MemoryCache {
    /// Creates the cache and starts the background sweeper. Must be called
    /// from within a tokio runtime.
    pub fn new() -> Arc<Self> {
        let cache = Arc::new(Self {
            items: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        });

        let sweeper = Arc::clone(&cache);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EVICTION_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => sweeper.evict_expired(),
                    _ = sweeper.shutdown.cancelled() => return,
                }
            }
        });

        cache
    }

    /// Number of entries currently held, including expired ones the
    /// sweeper has not reached yet.
    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the background sweeper.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn evict_expired(&self) {
        let now = Instant::now();
        if let Ok(mut items) = self.items.write() {
            items.retain(|_, item| item.expires_at > now);
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let expired = {
            let items = self.items.read().ok()?;
            let item = items.get(key)?;
            if item.expires_at > Instant::now() {
                return Some(item.data.clone());
            }
            true
        };

        // Lazy expiry: drop the stale entry outside the read lock.
        if expired {
            if let Ok(mut items) = self.items.write() {
                items.remove(key);
            }
        }
        None
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let item = MemItem {
            data: value,
            expires_at: Instant::now() + effective_ttl(ttl),
        };
        if let Ok(mut items) = self.items.write() {
            items.insert(key.to_string(), item);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if let Ok(mut items) = self.items.write() {
            items.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_after_set_within_ttl_hits() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"value".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await, Some(b"value".to_vec()));
        cache.close();
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned_and_removed_on_read() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"value".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.len(), 0);
        cache.close();
    }

    #[tokio::test]
    async fn zero_ttl_is_coerced_to_one_hour() {
        let cache = MemoryCache::new();
        cache.set("k", b"value".to_vec(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await, Some(b"value".to_vec()));
        cache.close();
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"value".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await, None);
        cache.close();
    }

    #[tokio::test]
    async fn sweeper_evicts_expired_entries() {
        let cache = MemoryCache::new();
        cache
            .set("old", b"value".to_vec(), Duration::from_millis(5))
            .await
            .unwrap();
        cache
            .set("fresh", b"value".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.evict_expired();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh").await, Some(b"value".to_vec()));
        cache.close();
    }
}
