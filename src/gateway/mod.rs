//! The request dispatch engine.
//!
//! [`Gateway`] receives an incoming OpenAI-compatible request, resolves the
//! target provider, checks the cache, applies rate limiting, and forwards
//! the request to the selected provider, falling back to alternatives when
//! the primary is unavailable.
//!
//! Design constraints:
//!   - No blocking I/O on the hot path; logging is fire-and-forget.
//!   - Cache, rate limiter, request logger, and exclusions are optional.
//!   - Streaming responses are SSE pass-through and never cached.

pub mod apierr;
mod breaker;
mod dispatch;
mod embeddings;
mod failover;
mod health;
mod limits;
mod metrics;
mod middleware;
mod reqlog;

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::cache::{Cache, ExclusionList};
use crate::provider::{EmbeddingProvider, Provider};
use crate::routing::{DEFAULT_FALLBACK_ORDER, MAX_RETRIES, PROVIDER_TIMEOUT};

pub use breaker::{CbConfig, CbState, CircuitBreaker};
pub use dispatch::build_cache_key;
pub use health::{HealthChecker, HealthSnapshot, ReadinessProbe};
pub use limits::RpmLimiter;
pub use metrics::Metrics;
pub use reqlog::{RequestLogEntry, RequestLogger, clamp_latency_ms};

/// Optional tuning parameters for a [`Gateway`]. All fields have working
/// defaults.
#[derive(Clone, Debug)]
pub struct GatewayOptions {
    /// Maximum provider attempts per request, including the first.
    pub max_retries: u32,
    /// Per-provider upstream deadline.
    pub provider_timeout: Duration,
    /// Default TTL for cached responses.
    pub cache_ttl: Duration,
    /// Circuit breaker thresholds.
    pub cb_config: CbConfig,
    /// Forward client `Authorization` headers to upstream providers. When
    /// false, inbound bearer tokens are discarded.
    pub allow_client_api_keys: bool,
    /// Prometheus metrics registry; `None` disables collection.
    pub metrics: Option<Metrics>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            provider_timeout: PROVIDER_TIMEOUT,
            cache_ttl: Duration::from_secs(3600),
            cb_config: CbConfig::default(),
            allow_client_api_keys: false,
            metrics: None,
        }
    }
}

/// The main proxy. All dependencies are injected so they can be replaced
/// with doubles in tests.
pub struct Gateway {
    pub(crate) providers: HashMap<String, Arc<dyn Provider>>,
    pub(crate) embedders: HashMap<String, Arc<dyn EmbeddingProvider>>,
    pub(crate) cache: Option<Arc<dyn Cache>>,
    pub(crate) exclusions: Option<ExclusionList>,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) limiter: Option<RpmLimiter>,
    pub(crate) reqlog: Option<RequestLogger>,
    pub(crate) health: Option<Arc<HealthChecker>>,
    pub(crate) metrics: Option<Metrics>,

    pub(crate) max_retries: u32,
    pub(crate) provider_timeout: Duration,
    pub(crate) cache_ttl: Duration,
    pub(crate) allow_client_api_keys: bool,
    pub(crate) cors_origins: Vec<String>,
}

impl Gateway {
    pub fn new(options: GatewayOptions) -> Self {
        let breaker = CircuitBreaker::new(options.cb_config);

        // Initialise breaker gauges (closed) for known providers.
        if let Some(metrics) = &options.metrics {
            for name in DEFAULT_FALLBACK_ORDER {
                metrics.set_circuit_breaker(name, breaker.state(name) as i64);
            }
        }

        Self {
            providers: HashMap::new(),
            embedders: HashMap::new(),
            cache: None,
            exclusions: None,
            breaker,
            limiter: None,
            reqlog: None,
            health: None,
            metrics: options.metrics,
            max_retries: options.max_retries.max(1),
            provider_timeout: options.provider_timeout,
            cache_ttl: options.cache_ttl,
            allow_client_api_keys: options.allow_client_api_keys,
            cors_origins: Vec::new(),
        }
    }

    /// Registers a chat-capable provider under its own name.
    pub fn register_provider(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Registers a provider that additionally supports embeddings.
    pub fn register_embedding_provider<P>(&mut self, provider: Arc<P>)
    where
        P: EmbeddingProvider + 'static,
    {
        self.providers
            .insert(provider.name().to_string(), provider.clone());
        self.embedders
            .insert(provider.name().to_string(), provider);
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Requests whose model matches the list skip both cache GET and SET.
    pub fn with_cache_exclusions(mut self, exclusions: ExclusionList) -> Self {
        self.exclusions = Some(exclusions);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RpmLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_request_logger(mut self, logger: RequestLogger) -> Self {
        self.reqlog = Some(logger);
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Starts the background health checker. The first probe completes
    /// before this returns.
    pub async fn start_health_checker(
        &mut self,
        cache_ready: Option<ReadinessProbe>,
        db_ready: Option<ReadinessProbe>,
    ) {
        if self.providers.is_empty() {
            return;
        }
        self.health = Some(
            HealthChecker::start(
                self.providers.clone(),
                cache_ready,
                db_ready,
                self.metrics.clone(),
            )
            .await,
        );
    }

    /// Releases long-lived resources in reverse-init order. Safe to call
    /// multiple times.
    pub async fn close(&self) {
        if let Some(health) = &self.health {
            health.close();
        }
        if let Some(reqlog) = &self.reqlog {
            reqlog.close().await;
        }
    }

    /// Returns the client bearer token (when forwarding is enabled and the
    /// header is present) and its SHA-256 hex fingerprint for cache
    /// partitioning.
    pub(crate) fn extract_client_api_key(
        &self,
        headers: &axum::http::HeaderMap,
    ) -> (String, String) {
        if !self.allow_client_api_keys {
            return (String::new(), String::new());
        }
        let Some(raw) = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        else {
            return (String::new(), String::new());
        };
        let Some(token) = parse_bearer_token(raw) else {
            return (String::new(), String::new());
        };
        let fingerprint = sha256_hex(token.as_bytes());
        (token.to_string(), fingerprint)
    }
}

pub(crate) fn parse_bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_tokens_are_parsed_case_insensitively() {
        assert_eq!(parse_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer_token("bearer abc"), Some("abc"));
        assert_eq!(parse_bearer_token("BEARER  abc "), Some("abc"));
        assert_eq!(parse_bearer_token("Basic abc"), None);
        assert_eq!(parse_bearer_token("Bearer "), None);
        assert_eq!(parse_bearer_token(""), None);
    }

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex(b"abc"), sha256_hex(b"abc"));
        assert_eq!(sha256_hex(b"abc").len(), 64);
        assert_ne!(sha256_hex(b"abc"), sha256_hex(b"abd"));
    }
}
