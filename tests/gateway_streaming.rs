mod support;

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::util::ServiceExt;

use conduit_llm::cache::MemoryCache;
use conduit_llm::{Gateway, GatewayOptions};

use support::{StreamingProvider, app};

fn streaming_request() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "stream it"}],
                "stream": true,
            })
            .to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn streaming_response_is_sse_with_terminal_done() {
    let mut gateway = Gateway::new(GatewayOptions::default());
    gateway.register_provider(Arc::new(StreamingProvider {
        name: "openai",
        chunks: vec!["Hel", "lo"],
    }));
    let app = app(gateway);

    let response = app.oneshot(streaming_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .map(|v| v.to_str().unwrap()),
        Some("text/event-stream")
    );
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .map(|v| v.to_str().unwrap()),
        Some("no-cache")
    );
    assert!(
        response.headers().get("x-cache").is_none(),
        "X-Cache must be absent on SSE responses"
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let mut contents = Vec::new();
    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        if payload == "[DONE]" {
            contents.push("[DONE]".to_string());
            continue;
        }
        let event: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(event["object"], "chat.completion.chunk");
        assert_eq!(event["choices"][0]["index"], 0);
        if let Some(content) = event["choices"][0]["delta"]["content"].as_str() {
            contents.push(content.to_string());
        }
    }

    assert_eq!(contents.first().map(String::as_str), Some("Hel"));
    assert!(contents.contains(&"lo".to_string()));
    assert_eq!(contents.last().map(String::as_str), Some("[DONE]"));
    assert_eq!(text.matches("data: [DONE]").count(), 1);
    assert!(text.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn streaming_responses_are_never_cached() {
    let cache = MemoryCache::new();
    let mut gateway = Gateway::new(GatewayOptions::default());
    gateway.register_provider(Arc::new(StreamingProvider {
        name: "openai",
        chunks: vec!["once"],
    }));
    let gateway = gateway.with_cache(cache.clone());
    let app = app(gateway);

    let response = app.oneshot(streaming_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let _ = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    assert_eq!(cache.len(), 0, "stream must not populate the cache");
    cache.close();
}

#[tokio::test]
async fn stream_error_surfaces_as_terminal_error_chunk() {
    struct ErroringStream;

    #[async_trait::async_trait]
    impl conduit_llm::Provider for ErroringStream {
        fn name(&self) -> &str {
            "openai"
        }

        async fn request(
            &self,
            req: &conduit_llm::ProxyRequest,
        ) -> conduit_llm::Result<conduit_llm::ProxyResponse> {
            let (tx, rx) = tokio::sync::mpsc::channel(8);
            tokio::spawn(async move {
                let _ = tx
                    .send(conduit_llm::StreamChunk {
                        content: "partial".to_string(),
                        finish_reason: None,
                    })
                    .await;
                let _ = tx
                    .send(conduit_llm::StreamChunk {
                        content: String::new(),
                        finish_reason: Some("error".to_string()),
                    })
                    .await;
            });
            Ok(conduit_llm::ProxyResponse {
                id: String::new(),
                model: req.model.clone(),
                content: String::new(),
                usage: conduit_llm::Usage::default(),
                stream: Some(rx),
            })
        }

        async fn health_check(&self) -> conduit_llm::Result<()> {
            Ok(())
        }
    }

    let mut gateway = Gateway::new(GatewayOptions::default());
    gateway.register_provider(Arc::new(ErroringStream));
    let app = app(gateway);

    let response = app.oneshot(streaming_request()).await.unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains(r#""finish_reason":"error""#));
    assert!(text.ends_with("data: [DONE]\n\n"));
}
