use async_trait::async_trait;

use super::openai_like;
use crate::provider::Provider;
use crate::types::{ProxyRequest, ProxyResponse};
use crate::{ConduitError, Result};

const DEFAULT_API_VERSION: &str = "2024-12-01-preview";

/// Azure OpenAI adapter. Deployment names derive from the model by
/// stripping the `azure-` routing prefix.
pub struct AzureOpenAi {
    endpoint: String,
    api_key: String,
    api_version: String,
    client: reqwest::Client,
}

impl AzureOpenAi {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        let api_version = api_version.into();
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: if api_version.is_empty() {
                DEFAULT_API_VERSION.to_string()
            } else {
                api_version
            },
            client: reqwest::Client::new(),
        }
    }

    fn deployment(model: &str) -> &str {
        model.strip_prefix("azure-").unwrap_or(model)
    }
}

#[async_trait]
impl Provider for AzureOpenAi {
    fn name(&self) -> &str {
        "azure"
    }

    async fn request(&self, req: &ProxyRequest) -> Result<ProxyResponse> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint,
            Self::deployment(&req.model),
            self.api_version
        );
        let request = self.client.post(url).header("api-key", &self.api_key);
        openai_like::execute_chat(request, req).await
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!(
            "{}/openai/deployments?api-version={}",
            self.endpoint, self.api_version
        );
        let response = self
            .client
            .get(url)
            .header("api-key", &self.api_key)
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
