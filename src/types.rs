//! Normalized request/response types shared by the dispatcher and every
//! provider adapter.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Suggested capacity for provider stream channels. Producers block on a
/// full channel, which applies natural backpressure to fast upstreams.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// A single turn in a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Token usage reported by an upstream provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One token chunk delivered during a streaming response. `finish_reason`
/// is set on the terminal chunk only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamChunk {
    pub content: String,
    pub finish_reason: Option<String>,
}

/// Normalized client request, immutable once built by the dispatcher.
#[derive(Clone, Debug, Default)]
pub struct ProxyRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub temperature: f64,
    pub max_tokens: u32,
    pub workspace_id: String,
    /// Client-supplied bearer token, forwarded upstream when enabled.
    pub api_key: String,
    /// SHA-256 hex fingerprint of `api_key`, used for cache partitioning.
    pub api_key_id: String,
    pub request_id: String,
}

/// Normalized provider response. `stream` is set for streaming requests;
/// the producing task closes the channel exactly once on every exit path.
#[derive(Debug)]
pub struct ProxyResponse {
    pub id: String,
    pub model: String,
    pub content: String,
    pub usage: Usage,
    pub stream: Option<mpsc::Receiver<StreamChunk>>,
}

/// Normalized embedding request. `input` always has at least one element.
#[derive(Clone, Debug, Default)]
pub struct EmbeddingRequest {
    pub input: Vec<String>,
    pub model: String,
    pub workspace_id: String,
    pub api_key: String,
    pub api_key_id: String,
    pub request_id: String,
}

/// A single embedding vector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub index: usize,
    pub embedding: Vec<f32>,
}

/// Normalized embedding response.
#[derive(Clone, Debug)]
pub struct EmbeddingResponse {
    pub model: String,
    pub data: Vec<EmbeddingData>,
    pub usage: Usage,
}
