use async_trait::async_trait;

use super::openai_like;
use crate::provider::{EmbeddingProvider, Provider};
use crate::types::{EmbeddingRequest, EmbeddingResponse, ProxyRequest, ProxyResponse};
use crate::{ConduitError, Result};

/// Generic adapter for providers that speak the OpenAI chat-completions
/// wire format under a different name and base URL (Mistral, xAI, Groq,
/// Together, and the rest of the compatible family).
pub struct OpenAiCompatible {
    name: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatible {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
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
impl Provider for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
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
impl EmbeddingProvider for OpenAiCompatible {
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
