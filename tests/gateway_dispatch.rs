mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::util::ServiceExt;

use conduit_llm::cache::MemoryCache;
use conduit_llm::cache::ExclusionList;
use conduit_llm::{CbConfig, Gateway, GatewayOptions, Metrics};

use support::{FailingProvider, PanickingProvider, StaticProvider, app, chat_body, chat_request, options_with_metrics};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn invalid_json_and_missing_model_are_400() {
    let mut gateway = Gateway::new(GatewayOptions::default());
    let (provider, _) = StaticProvider::new("openai", "hi");
    gateway.register_provider(Arc::new(provider));
    let app = app(gateway);

    let bad = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(bad).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed = body_json(response).await;
    assert_eq!(parsed["error"]["type"], "invalid_request_error");

    let missing = chat_request(serde_json::json!({"messages": []}));
    let response = app.clone().oneshot(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed = body_json(response).await;
    assert_eq!(parsed["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn empty_registry_is_502() {
    let gateway = Gateway::new(GatewayOptions::default());
    let app = app(gateway);

    let response = app
        .oneshot(chat_request(chat_body("gpt-4o", "hi")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let parsed = body_json(response).await;
    assert_eq!(parsed["error"]["message"], "no providers configured");
}

#[tokio::test]
async fn completed_request_wears_the_openai_envelope() {
    let mut gateway = Gateway::new(GatewayOptions::default());
    let (provider, calls) = StaticProvider::new("openai", "hello there");
    gateway.register_provider(Arc::new(provider));
    let app = app(gateway);

    let response = app
        .oneshot(chat_request(chat_body("gpt-4o", "hi")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-cache").map(|v| v.to_str().unwrap()),
        Some("MISS")
    );
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("x-response-time"));
    assert_eq!(
        response.headers().get("x-content-type-options").map(|v| v.to_str().unwrap()),
        Some("nosniff")
    );

    let parsed = body_json(response).await;
    assert_eq!(parsed["object"], "chat.completion");
    assert_eq!(parsed["choices"][0]["message"]["content"], "hello there");
    assert_eq!(parsed["choices"][0]["finish_reason"], "stop");
    assert_eq!(parsed["usage"]["prompt_tokens"], 10);
    assert_eq!(parsed["usage"]["completion_tokens"], 20);
    assert_eq!(parsed["usage"]["total_tokens"], 30);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_request_id_is_preserved() {
    let mut gateway = Gateway::new(GatewayOptions::default());
    let (provider, _) = StaticProvider::new("openai", "hi");
    gateway.register_provider(Arc::new(provider));
    let app = app(gateway);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("x-request-id", "req-fixed-1")
        .body(Body::from(chat_body("gpt-4o", "hi").to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get("x-request-id").map(|v| v.to_str().unwrap()),
        Some("req-fixed-1")
    );
}

#[tokio::test]
async fn second_identical_request_hits_the_cache_byte_identically() {
    let cache = MemoryCache::new();
    let mut gateway = Gateway::new(GatewayOptions::default());
    let (provider, calls) = StaticProvider::new("openai", "cached answer");
    gateway.register_provider(Arc::new(provider));
    let gateway = gateway.with_cache(cache.clone());
    let app = app(gateway);

    let first = app
        .clone()
        .oneshot(chat_request(chat_body("gpt-4o", "cached")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(
        first.headers().get("x-cache").map(|v| v.to_str().unwrap()),
        Some("MISS")
    );
    let first_bytes = to_bytes(first.into_body(), usize::MAX).await.unwrap();

    let second = app
        .clone()
        .oneshot(chat_request(chat_body("gpt-4o", "cached")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        second.headers().get("x-cache").map(|v| v.to_str().unwrap()),
        Some("HIT")
    );
    let second_bytes = to_bytes(second.into_body(), usize::MAX).await.unwrap();

    assert_eq!(first_bytes, second_bytes);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second request must not reach the provider");
    cache.close();
}

#[tokio::test]
async fn excluded_models_never_hit_the_cache() {
    let cache = MemoryCache::new();
    let mut gateway = Gateway::new(GatewayOptions::default());
    let (provider, calls) = StaticProvider::new("openai", "fresh");
    gateway.register_provider(Arc::new(provider));
    let gateway = gateway
        .with_cache(cache.clone())
        .with_cache_exclusions(ExclusionList::new(&["gpt-4o"], &[]).unwrap());
    let app = app(gateway);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(chat_request(chat_body("gpt-4o", "same")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_ne!(
            response.headers().get("x-cache").map(|v| v.to_str().unwrap()),
            Some("HIT")
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    cache.close();
}

#[tokio::test]
async fn failover_on_5xx_lands_on_the_fallback() {
    let metrics = Metrics::new();
    let mut gateway = Gateway::new(GatewayOptions {
        metrics: Some(metrics.clone()),
        ..GatewayOptions::default()
    });
    let (openai, openai_calls) = FailingProvider::new("openai", 503);
    let (anthropic, anthropic_calls) = StaticProvider::new("anthropic", "rescued");
    gateway.register_provider(Arc::new(openai));
    gateway.register_provider(Arc::new(anthropic));
    let app = app(gateway);

    let response = app
        .oneshot(chat_request(chat_body("gpt-4o", "hi")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;
    assert_eq!(parsed["object"], "chat.completion");
    assert_eq!(parsed["choices"][0]["message"]["content"], "rescued");

    assert_eq!(openai_calls.load(Ordering::SeqCst), 1);
    assert_eq!(anthropic_calls.load(Ordering::SeqCst), 1);

    let rendered = metrics.render();
    assert!(
        rendered.contains("gateway_failover_success_total{primary=\"openai\",to=\"anthropic\"} 1"),
        "missing failover success series in:\n{rendered}"
    );
    assert!(rendered.contains("gateway_failover_events_total{primary=\"openai\",from=\"openai\",to=\"anthropic\",reason=\"http_503\"} 1"));
}

#[tokio::test]
async fn non_retryable_4xx_aborts_without_touching_the_fallback() {
    let mut gateway = Gateway::new(GatewayOptions::default());
    let (openai, openai_calls) = FailingProvider::new("openai", 401);
    let (anthropic, anthropic_calls) = StaticProvider::new("anthropic", "never");
    gateway.register_provider(Arc::new(openai));
    gateway.register_provider(Arc::new(anthropic));
    let app = app(gateway);

    let response = app
        .oneshot(chat_request(chat_body("gpt-4o", "hi")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let parsed = body_json(response).await;
    assert_eq!(parsed["error"]["type"], "provider_error");

    assert_eq!(openai_calls.load(Ordering::SeqCst), 1);
    assert_eq!(anthropic_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_budget_caps_attempts() {
    let mut gateway = Gateway::new(GatewayOptions {
        max_retries: 2,
        ..GatewayOptions::default()
    });
    let (openai, openai_calls) = FailingProvider::new("openai", 500);
    let (anthropic, anthropic_calls) = FailingProvider::new("anthropic", 500);
    let (gemini, gemini_calls) = FailingProvider::new("gemini", 500);
    gateway.register_provider(Arc::new(openai));
    gateway.register_provider(Arc::new(anthropic));
    gateway.register_provider(Arc::new(gemini));
    let app = app(gateway);

    let response = app
        .oneshot(chat_request(chat_body("gpt-4o", "hi")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    assert_eq!(openai_calls.load(Ordering::SeqCst), 1);
    assert_eq!(anthropic_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gemini_calls.load(Ordering::SeqCst), 0, "budget of 2 exhausted");
}

#[tokio::test]
async fn open_breaker_skips_the_provider_without_spending_budget() {
    let metrics = Metrics::new();
    let mut gateway = Gateway::new(GatewayOptions {
        cb_config: CbConfig {
            error_threshold: 2,
            time_window: Duration::from_secs(60),
            half_open_timeout: Duration::from_secs(60),
        },
        metrics: Some(metrics.clone()),
        ..GatewayOptions::default()
    });
    let (openai, openai_calls) = FailingProvider::new("openai", 500);
    let (anthropic, anthropic_calls) = StaticProvider::new("anthropic", "standby");
    gateway.register_provider(Arc::new(openai));
    gateway.register_provider(Arc::new(anthropic));
    let app = app(gateway);

    // Two failing requests trip the openai breaker (each request records
    // one openai failure before failing over).
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(chat_request(chat_body("gpt-4o", "hi")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(openai_calls.load(Ordering::SeqCst), 2);

    // Third request: openai is skipped entirely, anthropic serves.
    let response = app
        .clone()
        .oneshot(chat_request(chat_body("gpt-4o", "hi")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(openai_calls.load(Ordering::SeqCst), 2, "breaker must skip openai");
    assert_eq!(anthropic_calls.load(Ordering::SeqCst), 3);

    let rendered = metrics.render();
    assert!(rendered.contains("circuit_breaker_state{provider=\"openai\"} 1"));
    assert!(rendered.contains("gateway_circuit_breaker_rejections_total{provider=\"openai\",state=\"open\"} 1"));
}

#[tokio::test]
async fn handler_panic_is_recovered_and_next_request_succeeds() {
    let mut gateway = Gateway::new(GatewayOptions::default());
    gateway.register_provider(Arc::new(PanickingProvider));
    let app = app(gateway);

    let response = app
        .clone()
        .oneshot(chat_request(chat_body("gpt-4o", "boom")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let parsed = body_json(response).await;
    assert_eq!(parsed["error"]["code"], "internal_error");

    // The process (and router) survives; health still answers.
    let health = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(health).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_and_readiness_endpoints_answer() {
    let mut gateway = Gateway::new(options_with_metrics());
    let (provider, _) = StaticProvider::new("openai", "hi");
    gateway.register_provider(Arc::new(provider));
    gateway.start_health_checker(None, None).await;
    let app = app(gateway);

    let health = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(health).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["providers"]["openai"], "ok");
    assert_eq!(parsed["cache"], "ok");
    assert_eq!(parsed["database"], "ok");

    let readiness = Request::builder()
        .method("GET")
        .uri("/readiness")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(readiness).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;
    assert_eq!(parsed["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_renders_exposition_text() {
    let mut gateway = Gateway::new(options_with_metrics());
    let (provider, _) = StaticProvider::new("openai", "hi");
    gateway.register_provider(Arc::new(provider));
    let app = app(gateway);

    let _ = app
        .clone()
        .oneshot(chat_request(chat_body("gpt-4o", "hi")))
        .await
        .unwrap();

    let metrics = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(metrics).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("gateway_requests_total{provider=\"openai\",status=\"200\"} 1"));
    assert!(text.contains("gateway_http_requests_total{route=\"chat_completions\",status=\"200\"} 1"));
}

#[tokio::test]
async fn preflight_requests_get_cors_headers_and_204() {
    let mut gateway = Gateway::new(GatewayOptions::default());
    let (provider, _) = StaticProvider::new("openai", "hi");
    gateway.register_provider(Arc::new(provider));
    let gateway = gateway.with_cors_origins(vec!["https://app.example".to_string()]);
    let app = app(gateway);

    let preflight = Request::builder()
        .method("OPTIONS")
        .uri("/v1/chat/completions")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(preflight).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap()),
        Some("https://app.example")
    );
}
