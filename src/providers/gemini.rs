use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::openai_like::check_status;
use crate::provider::{EmbeddingProvider, Provider};
use crate::types::{
    EmbeddingData, EmbeddingRequest, EmbeddingResponse, ProxyRequest, ProxyResponse,
    STREAM_CHANNEL_CAPACITY, StreamChunk, Usage,
};
use crate::utils::sse::sse_data_stream;
use crate::{ConduitError, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google AI Studio (Gemini) adapter: generateContent, streaming via
/// `streamGenerateContent?alt=sse`, and embedContent.
pub struct Gemini {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl Gemini {
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
        let contents: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|message| {
                // Gemini only knows user/model; assistant maps to model and
                // system turns are folded in as user text.
                let role = if message.role == "assistant" || message.role == "model" {
                    "model"
                } else {
                    "user"
                };
                json!({"role": role, "parts": [{"text": message.content}]})
            })
            .collect();

        let mut generation_config = json!({});
        if req.temperature != 0.0 {
            generation_config["temperature"] = json!(req.temperature);
        }
        if req.max_tokens > 0 {
            generation_config["maxOutputTokens"] = json!(req.max_tokens);
        }

        json!({
            "contents": contents,
            "generationConfig": generation_config,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata")]
    usage: UsageMetadata,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct UsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    prompt_tokens: u32,
    #[serde(default, rename = "candidatesTokenCount")]
    candidate_tokens: u32,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .iter()
                    .map(|part| part.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
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

            let parsed: GenerateResponse = match serde_json::from_str(&data) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };

            let chunk = StreamChunk {
                content: parsed.text(),
                finish_reason: parsed
                    .candidates
                    .first()
                    .and_then(|candidate| candidate.finish_reason.clone())
                    .map(|_| "stop".to_string()),
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
impl Provider for Gemini {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn request(&self, req: &ProxyRequest) -> Result<ProxyResponse> {
        let method = if req.stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let mut url = format!(
            "{}/models/{}:{method}?key={}",
            self.base_url,
            req.model,
            self.auth_key(&req.api_key)
        );
        if req.stream {
            url.push_str("&alt=sse");
        }

        let response = self
            .client
            .post(url)
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

        let parsed: GenerateResponse = response.json().await?;
        Ok(ProxyResponse {
            id: String::new(),
            model: req.model.clone(),
            content: parsed.text(),
            usage: Usage {
                input_tokens: parsed.usage.prompt_tokens,
                output_tokens: parsed.usage.candidate_tokens,
            },
            stream: None,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/models?key={}", self.base_url, self.api_key))
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

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    #[serde(default)]
    embedding: EmbeddingValues,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for Gemini {
    async fn embed(&self, req: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url,
            req.model,
            self.auth_key(&req.api_key)
        );

        let mut data = Vec::with_capacity(req.input.len());
        for (index, text) in req.input.iter().enumerate() {
            let response = self
                .client
                .post(&url)
                .json(&json!({"content": {"parts": [{"text": text}]}}))
                .send()
                .await?;
            let response = check_status(response).await?;
            let parsed: EmbedContentResponse = response.json().await?;
            data.push(EmbeddingData {
                index,
                embedding: parsed.embedding.values,
            });
        }

        Ok(EmbeddingResponse {
            model: req.model.clone(),
            data,
            // The embedContent API does not report token usage.
            usage: Usage::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn roles_map_to_user_and_model() {
        let req = ProxyRequest {
            model: "gemini-2.0-flash".to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "rules".to_string(),
                },
                Message {
                    role: "assistant".to_string(),
                    content: "sure".to_string(),
                },
            ],
            temperature: 0.2,
            max_tokens: 10,
            ..ProxyRequest::default()
        };

        let body = Gemini::request_body(&req);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["generationConfig"]["temperature"], 0.2);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 10);
    }
}
