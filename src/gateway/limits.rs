//! Global requests-per-minute rate limiting over a redis sliding window.

use std::time::{SystemTime, UNIX_EPOCH};

// Atomic sliding-window limiter over a sorted set.
// KEYS[1] = window key
// ARGV[1] = current timestamp (ms)
// ARGV[2] = window size (ms)
// ARGV[3] = max requests per window
// Returns 1 when admitted, 0 when rate limited.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key    = KEYS[1]
local now    = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit  = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, 0, now - window)

local count = redis.call('ZCARD', key)
if count >= limit then
  return 0
end

local member = tostring(now) .. '-' .. tostring(math.random(1, 1000000))
redis.call('ZADD', key, now, member)
redis.call('PEXPIRE', key, window)
return 1
"#;

const RATE_LIMIT_KEY: &str = "ratelimit:ws:rpm";
const WINDOW_MS: i64 = 60_000;

/// Checks a global RPM limit against shared redis state.
///
/// The limiter is advisory: the dispatcher fails open when redis is
/// unreachable, so an outage never blocks traffic.
pub struct RpmLimiter {
    client: redis::Client,
    script: redis::Script,
    limit: i64,
}

impl RpmLimiter {
    /// `rpm_limit` must be > 0; a zero limit would block every request.
    pub fn new(client: redis::Client, rpm_limit: u32) -> Self {
        Self {
            client,
            script: redis::Script::new(SLIDING_WINDOW_SCRIPT),
            limit: i64::from(rpm_limit),
        }
    }

    /// Returns whether the current request is within the limit. Errors are
    /// surfaced so the caller can record them and fail open.
    pub async fn allow(&self) -> Result<bool, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);

        let admitted: i64 = self
            .script
            .key(RATE_LIMIT_KEY)
            .arg(now_ms)
            .arg(WINDOW_MS)
            .arg(self.limit)
            .invoke_async(&mut conn)
            .await?;

        Ok(admitted == 1)
    }
}
