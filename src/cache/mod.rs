//! Exact-match response caching.
//!
//! Two interchangeable backends: [`RedisCache`] for shared caches across
//! replicas, [`MemoryCache`] for single-instance deployments with zero
//! external dependencies. Both degrade gracefully: a broken backend turns
//! every `get` into a miss and every `set` into a logged no-op, so the
//! proxy path never fails because the cache layer is down.

mod exclusions;
mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

pub use exclusions::ExclusionList;
pub use memory::MemoryCache;
pub use self::redis::RedisCache;

/// Key→bytes store with per-entry TTL.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the stored value when the key exists and has not expired.
    /// Backend faults are reported as a miss, never as an error.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` under `key` for `ttl`. A zero TTL is coerced to one
    /// hour. Backend faults are swallowed (logged) by the implementation.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Removes `key`. Unlike `get`/`set` this is an administrative
    /// operation, so backend errors are propagated.
    async fn delete(&self, key: &str) -> Result<()>;
}

pub(crate) fn effective_ttl(ttl: Duration) -> Duration {
    if ttl.is_zero() {
        Duration::from_secs(3600)
    } else {
        ttl
    }
}
