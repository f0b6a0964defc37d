use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::{Cache, effective_ttl};
use crate::{ConduitError, Result};

const OP_TIMEOUT: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed cache, shared across gateway replicas.
///
/// Every operation is bounded by a 500 ms timeout. On timeout or transport
/// error `get` reports a miss and `set` swallows the failure, keeping the
/// proxy path alive while the backend is unreachable.
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    /// Parses `url`, verifies connectivity with a bounded PING, and returns
    /// the cache. Startup fails when the backend is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|err| ConduitError::Cache(format!("parse url: {err}")))?;

        let mut conn = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| ConduitError::Cache("connect timed out".to_string()))?
        .map_err(|err| ConduitError::Cache(format!("connect: {err}")))?;

        tokio::time::timeout(CONNECT_TIMEOUT, ping_connection(&mut conn))
            .await
            .map_err(|_| ConduitError::Cache("ping timed out".to_string()))?
            .map_err(|err| ConduitError::Cache(format!("ping: {err}")))?;

        Ok(Self { client })
    }

    /// Reports whether the backend currently answers a bounded PING.
    /// Used by the health checker's cache readiness probe.
    pub async fn ping(&self) -> bool {
        let Ok(Ok(mut conn)) = tokio::time::timeout(
            OP_TIMEOUT,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        else {
            return false;
        };
        matches!(
            tokio::time::timeout(OP_TIMEOUT, ping_connection(&mut conn)).await,
            Ok(Ok(()))
        )
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        tokio::time::timeout(OP_TIMEOUT, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| ConduitError::Cache("connect timed out".to_string()))?
            .map_err(|err| ConduitError::Cache(format!("connect: {err}")))
    }
}

async fn ping_connection(
    conn: &mut redis::aio::MultiplexedConnection,
) -> std::result::Result<(), redis::RedisError> {
    let pong: String = redis::cmd("PING").query_async(conn).await?;
    let _ = pong;
    Ok(())
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache get unavailable");
                return None;
            }
        };

        match tokio::time::timeout(OP_TIMEOUT, conn.get::<_, Option<Vec<u8>>>(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                tracing::warn!(key, error = %err, "cache get error");
                None
            }
            Err(_) => {
                tracing::warn!(key, "cache get timed out");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let ttl_secs = effective_ttl(ttl).as_secs();
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache set unavailable");
                return Ok(());
            }
        };

        match tokio::time::timeout(OP_TIMEOUT, conn.set_ex::<_, _, ()>(key, value, ttl_secs)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(key, error = %err, "cache set error"),
            Err(_) => tracing::warn!(key, "cache set timed out"),
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        tokio::time::timeout(OP_TIMEOUT, conn.del::<_, ()>(key))
            .await
            .map_err(|_| ConduitError::Cache(format!("DEL {key}: timed out")))?
            .map_err(|err| ConduitError::Cache(format!("DEL {key}: {err}")))
    }
}
