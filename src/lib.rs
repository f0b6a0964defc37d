//! An HTTP reverse proxy for OpenAI-compatible LLM traffic.
//!
//! The gateway accepts chat-completions, completions, and embeddings
//! requests and dispatches them to upstream providers with exact-match
//! response caching, automatic multi-provider failover, per-provider
//! circuit breaking, SSE streaming pass-through, rate limiting,
//! Prometheus metrics, and an asynchronous batched request log.

pub mod cache;
pub mod config;
mod error;
pub mod gateway;
pub mod provider;
pub mod providers;
pub mod routing;
pub mod types;
pub mod utils;

pub use error::{ConduitError, Result};
pub use gateway::{
    CbConfig, CbState, CircuitBreaker, Gateway, GatewayOptions, HealthChecker, HealthSnapshot,
    Metrics, ReadinessProbe, RequestLogEntry, RequestLogger, RpmLimiter,
};
pub use provider::{EmbeddingProvider, Provider};
pub use types::{
    EmbeddingData, EmbeddingRequest, EmbeddingResponse, Message, ProxyRequest, ProxyResponse,
    StreamChunk, Usage,
};
