//! Shared wire plumbing for OpenAI-style chat-completions APIs, used by the
//! OpenAI, Azure OpenAI, and generic OpenAI-compatible adapters.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::types::{
    EmbeddingData, ProxyRequest, ProxyResponse, STREAM_CHANNEL_CAPACITY, StreamChunk, Usage,
};
use crate::utils::sse::sse_data_stream;
use crate::{ConduitError, Result};

pub(crate) fn chat_body(req: &ProxyRequest) -> Value {
    let mut body = json!({
        "model": req.model,
        "messages": req.messages,
    });
    if req.stream {
        body["stream"] = json!(true);
    }
    if req.temperature != 0.0 {
        body["temperature"] = json!(req.temperature);
    }
    if req.max_tokens > 0 {
        body["max_tokens"] = json!(req.max_tokens);
    }
    body
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    #[serde(default)]
    pub message: ChatMessage,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChunkEnvelope {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Raises non-2xx responses as status-bearing errors so the failover loop
/// can classify retryability.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ConduitError::Api {
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn proxy_response_from(model: &str, parsed: ChatCompletionResponse) -> ProxyResponse {
    let content = parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .unwrap_or_default();
    ProxyResponse {
        id: parsed.id,
        model: if parsed.model.is_empty() {
            model.to_string()
        } else {
            parsed.model
        },
        content,
        usage: Usage {
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
        },
        stream: None,
    }
}

/// Spawns the producer task for an OpenAI-style SSE stream. The returned
/// channel is closed exactly once; mid-stream errors surface as a terminal
/// chunk with `finish_reason = "error"`.
pub(crate) fn spawn_chunk_producer(
    mut events: BoxStream<'static, Result<String>>,
) -> mpsc::Receiver<StreamChunk> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let data = match event {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!(error = %err, "stream read error");
                    let _ = tx
                        .send(StreamChunk {
                            content: String::new(),
                            finish_reason: Some("error".to_string()),
                        })
                        .await;
                    return;
                }
            };

            let parsed: ChunkEnvelope = match serde_json::from_str(&data) {
                Ok(parsed) => parsed,
                Err(_) => continue, // tolerate unknown event shapes
            };
            let Some(choice) = parsed.choices.into_iter().next() else {
                continue;
            };

            let chunk = StreamChunk {
                content: choice.delta.content.unwrap_or_default(),
                finish_reason: choice.finish_reason,
            };
            if chunk.content.is_empty() && chunk.finish_reason.is_none() {
                continue;
            }
            if tx.send(chunk).await.is_err() {
                return; // consumer went away
            }
        }
    });

    rx
}

/// Issues the request and wires the streaming or non-streaming response.
pub(crate) async fn execute_chat(
    request: reqwest::RequestBuilder,
    req: &ProxyRequest,
) -> Result<ProxyResponse> {
    let response = check_status(request.json(&chat_body(req)).send().await?).await?;

    if req.stream {
        let rx = spawn_chunk_producer(sse_data_stream(response));
        return Ok(ProxyResponse {
            id: String::new(),
            model: req.model.clone(),
            content: String::new(),
            usage: Usage::default(),
            stream: Some(rx),
        });
    }

    let parsed: ChatCompletionResponse = response.json().await?;
    Ok(proxy_response_from(&req.model, parsed))
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingApiResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub data: Vec<EmbeddingApiData>,
    #[serde(default)]
    pub usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingApiData {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl EmbeddingApiResponse {
    pub(crate) fn into_normalized(self, fallback_model: &str) -> crate::types::EmbeddingResponse {
        crate::types::EmbeddingResponse {
            model: if self.model.is_empty() {
                fallback_model.to_string()
            } else {
                self.model
            },
            data: self
                .data
                .into_iter()
                .map(|data| EmbeddingData {
                    index: data.index,
                    embedding: data.embedding,
                })
                .collect(),
            usage: Usage {
                input_tokens: self.usage.prompt_tokens,
                output_tokens: 0,
            },
        }
    }
}
