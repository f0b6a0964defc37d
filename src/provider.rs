use async_trait::async_trait;

use crate::Result;
use crate::types::{EmbeddingRequest, EmbeddingResponse, ProxyRequest, ProxyResponse};

/// Capability contract every upstream LLM provider adapter satisfies,
/// regardless of its wire protocol.
///
/// Streaming requests must return a `ProxyResponse` whose `stream` channel
/// is fed by a task that eventually closes it exactly once; errors after the
/// stream has started are delivered as a terminal chunk with
/// `finish_reason = "error"`. Errors that carry an upstream HTTP status
/// expose it via [`crate::ConduitError::http_status`] so the dispatcher can
/// map the client response and the failover loop can classify retryability.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn request(&self, req: &ProxyRequest) -> Result<ProxyResponse>;

    async fn health_check(&self) -> Result<()>;
}

/// Optional additional capability for providers that support the
/// embeddings API. Registered separately from the chat capability.
#[async_trait]
pub trait EmbeddingProvider: Provider {
    async fn embed(&self, req: &EmbeddingRequest) -> Result<EmbeddingResponse>;
}
