use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::openai_like::check_status;
use crate::provider::Provider;
use crate::types::{
    Message, ProxyRequest, ProxyResponse, STREAM_CHANNEL_CAPACITY, StreamChunk, Usage,
};
use crate::utils::sse::sse_data_stream;
use crate::{ConduitError, Result};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
// The messages API requires max_tokens; applied when the client omits it.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic messages-API adapter with SSE streaming.
pub struct Anthropic {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl Anthropic {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn auth_key<'a>(&'a self, client_key: &'a str) -> &'a str {
        if client_key.is_empty() {
            &self.api_key
        } else {
            client_key
        }
    }

    fn request_body(req: &ProxyRequest) -> serde_json::Value {
        // System turns move into the top-level system field; the messages
        // array only accepts user/assistant roles.
        let (system, turns): (Vec<&Message>, Vec<&Message>) = req
            .messages
            .iter()
            .partition(|message| message.role == "system" || message.role == "developer");

        let system_text = system
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let messages: Vec<serde_json::Value> = turns
            .iter()
            .map(|message| {
                let role = if message.role == "model" {
                    "assistant"
                } else {
                    message.role.as_str()
                };
                json!({"role": role, "content": message.content})
            })
            .collect();

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": if req.max_tokens > 0 { req.max_tokens } else { DEFAULT_MAX_TOKENS },
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if req.temperature != 0.0 {
            body["temperature"] = json!(req.temperature);
        }
        if req.stream {
            body["stream"] = json!(true);
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

fn spawn_producer(response: reqwest::Response) -> mpsc::Receiver<StreamChunk> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let mut events = sse_data_stream(response);

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

            let parsed: StreamEvent = match serde_json::from_str(&data) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };

            let chunk = match parsed.kind.as_str() {
                "content_block_delta" => StreamChunk {
                    content: parsed
                        .delta
                        .and_then(|delta| delta.text)
                        .unwrap_or_default(),
                    finish_reason: None,
                },
                "message_delta" => {
                    let stop = parsed.delta.and_then(|delta| delta.stop_reason);
                    if stop.is_none() {
                        continue;
                    }
                    StreamChunk {
                        content: String::new(),
                        finish_reason: Some("stop".to_string()),
                    }
                }
                _ => continue,
            };

            if chunk.content.is_empty() && chunk.finish_reason.is_none() {
                continue;
            }
            if tx.send(chunk).await.is_err() {
                return;
            }
        }
    });

    rx
}

#[async_trait]
impl Provider for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn request(&self, req: &ProxyRequest) -> Result<ProxyResponse> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.auth_key(&req.api_key))
            .header("anthropic-version", API_VERSION)
            .json(&Self::request_body(req))
            .send()
            .await?;
        let response = check_status(response).await?;

        if req.stream {
            return Ok(ProxyResponse {
                id: String::new(),
                model: req.model.clone(),
                content: String::new(),
                usage: Usage::default(),
                stream: Some(spawn_producer(response)),
            });
        }

        let parsed: MessagesResponse = response.json().await?;
        let content = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<String>();

        Ok(ProxyResponse {
            id: parsed.id,
            model: if parsed.model.is_empty() {
                req.model.clone()
            } else {
                parsed.model
            },
            content,
            usage: Usage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
            stream: None,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ConduitError::Api {
                status: status.as_u16(),
                body: "health check failed".to_string(),
            })
        }
    }
}
