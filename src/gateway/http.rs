//! HTTP surface: route table and the small management handlers.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;

use super::dispatch::{handle_chat_completions, handle_completions};
use super::embeddings::handle_embeddings;
use super::middleware::{cors, recovery, request_id, security_headers, timing};
use super::Gateway;

/// Builds the axum router over a shared gateway. Middleware order
/// (outermost first): recovery, request ID, timing, CORS, security
/// headers.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/completions", post(handle_completions))
        .route("/v1/embeddings", post(handle_embeddings))
        .route("/health", get(handle_health))
        .route("/readiness", get(handle_readiness))
        .route("/metrics", get(handle_metrics))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn_with_state(gateway.clone(), cors))
        .layer(middleware::from_fn(timing))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(recovery))
        .with_state(gateway)
}

async fn handle_health(State(gateway): State<Arc<Gateway>>) -> Response {
    match &gateway.health {
        Some(health) => Json(health.snapshot()).into_response(),
        None => Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")})).into_response(),
    }
}

async fn handle_readiness(State(gateway): State<Arc<Gateway>>) -> Response {
    let ready = gateway
        .health
        .as_ref()
        .map(|health| health.readiness_ok())
        .unwrap_or(true);
    if ready {
        Json(json!({"status": "ok"})).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable"})),
        )
            .into_response()
    }
}

async fn handle_metrics(State(gateway): State<Arc<Gateway>>) -> Response {
    let Some(metrics) = &gateway.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    (StatusCode::OK, headers, metrics.render()).into_response()
}
