//! Shared doubles for gateway integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use serde_json::json;

use conduit_llm::gateway::http::router;
use conduit_llm::types::{ProxyRequest, ProxyResponse, StreamChunk, Usage};
use conduit_llm::{ConduitError, Gateway, GatewayOptions, Provider, Result};

/// Provider that always answers with fixed content.
pub struct StaticProvider {
    pub name: &'static str,
    pub content: &'static str,
    pub calls: Arc<AtomicU32>,
}

impl StaticProvider {
    pub fn new(name: &'static str, content: &'static str) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                name,
                content,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn request(&self, req: &ProxyRequest) -> Result<ProxyResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProxyResponse {
            id: format!("resp-{}", self.name),
            model: req.model.clone(),
            content: self.content.to_string(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 20,
            },
            stream: None,
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider that always fails with the given upstream status.
pub struct FailingProvider {
    pub name: &'static str,
    pub status: u16,
    pub calls: Arc<AtomicU32>,
}

impl FailingProvider {
    pub fn new(name: &'static str, status: u16) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                name,
                status,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn request(&self, _req: &ProxyRequest) -> Result<ProxyResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ConduitError::Api {
            status: self.status,
            body: "upstream unhappy".to_string(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider that streams a fixed chunk sequence.
pub struct StreamingProvider {
    pub name: &'static str,
    pub chunks: Vec<&'static str>,
}

#[async_trait]
impl Provider for StreamingProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn request(&self, req: &ProxyRequest) -> Result<ProxyResponse> {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let chunks = self.chunks.clone();
        tokio::spawn(async move {
            for content in chunks {
                if tx
                    .send(StreamChunk {
                        content: content.to_string(),
                        finish_reason: None,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx
                .send(StreamChunk {
                    content: String::new(),
                    finish_reason: Some("stop".to_string()),
                })
                .await;
        });
        Ok(ProxyResponse {
            id: String::new(),
            model: req.model.clone(),
            content: String::new(),
            usage: Usage::default(),
            stream: Some(rx),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider whose request handler panics, for recovery-middleware tests.
pub struct PanickingProvider;

#[async_trait]
impl Provider for PanickingProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn request(&self, _req: &ProxyRequest) -> Result<ProxyResponse> {
        panic!("synthetic handler panic");
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

pub fn options_with_metrics() -> GatewayOptions {
    GatewayOptions {
        metrics: Some(conduit_llm::Metrics::new()),
        provider_timeout: Duration::from_secs(5),
        ..GatewayOptions::default()
    }
}

pub fn app(gateway: Gateway) -> Router {
    router(Arc::new(gateway))
}

pub fn chat_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn chat_body(model: &str, content: &str) -> serde_json::Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": content}],
    })
}
