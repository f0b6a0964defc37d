use async_trait::async_trait;

use super::openai_like;
use crate::provider::{EmbeddingProvider, Provider};
use crate::types::{EmbeddingRequest, EmbeddingResponse, ProxyRequest, ProxyResponse};
use crate::{ConduitError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI adapter: chat completions (with SSE streaming) and embeddings.
pub struct OpenAi {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Overrides the API endpoint, e.g. for local mocks.
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
}

#[async_trait]
impl Provider for OpenAi {
    fn name(&self) -> &str {
        "openai"
    }

    async fn request(&self, req: &ProxyRequest) -> Result<ProxyResponse> {
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.auth_key(&req.api_key));
        openai_like::execute_chat(request, req).await
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
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

#[async_trait]
impl EmbeddingProvider for OpenAi {
    async fn embed(&self, req: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(self.auth_key(&req.api_key))
            .json(&serde_json::json!({
                "model": req.model,
                "input": req.input,
            }))
            .send()
            .await?;
        let response = openai_like::check_status(response).await?;
        let parsed: openai_like::EmbeddingApiResponse = response.json().await?;
        Ok(parsed.into_normalized(&req.model))
    }
}
