//! Embeddings dispatch. No cache and no failover on this route; errors map
//! straight through the provider error handler.

use std::sync::Arc;
use std::time::Instant;

use axum::Extension;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::middleware::RequestId;
use super::{Gateway, apierr};
use crate::routing::resolve_embedding_provider;
use crate::types::EmbeddingRequest;

#[derive(Debug, Deserialize)]
struct InboundEmbeddingRequest {
    #[serde(default)]
    model: String,
    #[serde(default)]
    input: Option<EmbeddingInput>,
}

/// The OpenAI `input` field accepts a bare string or an array of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingInput {
    Single(String),
    Many(Vec<String>),
}

fn normalize_input(input: Option<EmbeddingInput>) -> Result<Vec<String>, &'static str> {
    match input {
        None => Err("'input' is required"),
        Some(EmbeddingInput::Single(text)) => {
            if text.is_empty() {
                Err("'input' must not be empty")
            } else {
                Ok(vec![text])
            }
        }
        Some(EmbeddingInput::Many(texts)) => {
            if texts.is_empty() {
                Err("'input' must not be empty")
            } else {
                Ok(texts)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct OutboundEmbeddingData {
    object: &'static str,
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OutboundEmbeddingUsage {
    prompt_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OutboundEmbeddingResponse {
    object: &'static str,
    data: Vec<OutboundEmbeddingData>,
    model: String,
    usage: OutboundEmbeddingUsage,
}

pub(crate) async fn handle_embeddings(
    State(gateway): State<Arc<Gateway>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let route = "embeddings";
    let start = Instant::now();
    let req_bytes = body.len();

    if let Some(metrics) = &gateway.metrics {
        metrics.inc_in_flight();
    }

    let (response, provider, input_tokens) =
        dispatch_embeddings(&gateway, &request_id.0, &headers, &body).await;

    if let Some(metrics) = &gateway.metrics {
        metrics.dec_in_flight();
        let status = response.status().as_u16();
        let elapsed = start.elapsed();
        metrics.observe_http(route, status, elapsed, req_bytes, None);
        metrics.record_request(&provider, status, elapsed.as_millis() as u64);
        metrics.observe_gateway_request(&provider, route, "bypass", elapsed);
        metrics.add_tokens(&provider, route, input_tokens, 0, false);
    }

    response
}

async fn dispatch_embeddings(
    gateway: &Arc<Gateway>,
    request_id: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> (Response, String, u32) {
    let start = Instant::now();
    let route = "embeddings";
    let (client_key, client_key_id) = gateway.extract_client_api_key(headers);

    let req: InboundEmbeddingRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(err) => {
            let response = apierr::write(
                StatusCode::BAD_REQUEST,
                format!("invalid JSON: {err}"),
                apierr::TYPE_INVALID_REQUEST,
                apierr::CODE_INVALID_REQUEST,
            );
            return (response, "unknown".to_string(), 0);
        }
    };

    if req.model.is_empty() {
        let response = apierr::write(
            StatusCode::BAD_REQUEST,
            "field 'model' is required",
            apierr::TYPE_INVALID_REQUEST,
            apierr::CODE_INVALID_REQUEST,
        );
        return (response, "unknown".to_string(), 0);
    }

    let inputs = match normalize_input(req.input) {
        Ok(inputs) => inputs,
        Err(message) => {
            let response = apierr::write(
                StatusCode::BAD_REQUEST,
                message,
                apierr::TYPE_INVALID_REQUEST,
                apierr::CODE_INVALID_REQUEST,
            );
            return (response, "unknown".to_string(), 0);
        }
    };

    let provider_name = resolve_embedding_provider(&req.model);

    tracing::info!(
        request_id = %request_id,
        model = %req.model,
        provider = %provider_name,
        inputs = inputs.len(),
        "embedding request"
    );

    if gateway.providers.is_empty() {
        let response = apierr::write(
            StatusCode::BAD_GATEWAY,
            "no providers configured",
            apierr::TYPE_PROVIDER_ERROR,
            apierr::CODE_PROVIDER_ERROR,
        );
        return (response, provider_name.to_string(), 0);
    }

    let Some(embedder) = gateway.embedders.get(provider_name) else {
        let response = apierr::write(
            StatusCode::BAD_REQUEST,
            format!("provider {provider_name:?} does not support embeddings"),
            apierr::TYPE_INVALID_REQUEST,
            apierr::CODE_INVALID_REQUEST,
        );
        return (response, provider_name.to_string(), 0);
    };

    let emb_req = EmbeddingRequest {
        input: inputs,
        model: req.model.clone(),
        workspace_id: String::new(),
        api_key: client_key,
        api_key_id: client_key_id,
        request_id: request_id.to_string(),
    };

    let attempt_start = Instant::now();
    let attempt = tokio::time::timeout(gateway.provider_timeout, embedder.embed(&emb_req)).await;
    let result = match attempt {
        Ok(result) => result,
        Err(_) => Err(crate::ConduitError::Timeout),
    };
    let attempt_elapsed = attempt_start.elapsed();

    let emb_resp = match result {
        Ok(resp) => resp,
        Err(err) => {
            if let Some(metrics) = &gateway.metrics {
                let reason = super::failover::classify_error(&err);
                metrics.observe_upstream_attempt(provider_name, route, &reason, attempt_elapsed);
                metrics.record_error(provider_name, &reason);
            }
            tracing::error!(
                request_id = %request_id,
                provider = %provider_name,
                error = %err,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "embedding error"
            );
            return (
                apierr::write_provider_error(&err),
                provider_name.to_string(),
                0,
            );
        }
    };

    if let Some(metrics) = &gateway.metrics {
        metrics.observe_upstream_attempt(provider_name, route, "success", attempt_elapsed);
    }

    let out = OutboundEmbeddingResponse {
        object: "list",
        data: emb_resp
            .data
            .into_iter()
            .map(|data| OutboundEmbeddingData {
                object: "embedding",
                index: data.index,
                embedding: data.embedding,
            })
            .collect(),
        model: emb_resp.model.clone(),
        usage: OutboundEmbeddingUsage {
            prompt_tokens: emb_resp.usage.input_tokens,
            total_tokens: emb_resp.usage.input_tokens,
        },
    };
    let input_tokens = emb_resp.usage.input_tokens;

    let body = match serde_json::to_vec(&out) {
        Ok(body) => body,
        Err(_) => {
            let response = apierr::write(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to serialize response",
                apierr::TYPE_SERVER_ERROR,
                apierr::CODE_INTERNAL_ERROR,
            );
            return (response, provider_name.to_string(), 0);
        }
    };

    tracing::debug!(
        request_id = %request_id,
        provider = %provider_name,
        model = %out.model,
        vectors = out.data.len(),
        input_tokens,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "embedding ok"
    );

    let response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response();
    (response, provider_name.to_string(), input_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_accepts_string_or_array() {
        let single: InboundEmbeddingRequest =
            serde_json::from_str(r#"{"model":"m","input":"hello"}"#).unwrap();
        assert_eq!(normalize_input(single.input).unwrap(), vec!["hello".to_string()]);

        let many: InboundEmbeddingRequest =
            serde_json::from_str(r#"{"model":"m","input":["a","b"]}"#).unwrap();
        assert_eq!(
            normalize_input(many.input).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn input_rejects_missing_and_empty() {
        assert!(normalize_input(None).is_err());
        assert!(normalize_input(Some(EmbeddingInput::Single(String::new()))).is_err());
        assert!(normalize_input(Some(EmbeddingInput::Many(Vec::new()))).is_err());
    }

    #[test]
    fn input_rejects_other_shapes_at_parse_time() {
        assert!(serde_json::from_str::<InboundEmbeddingRequest>(r#"{"model":"m","input":42}"#).is_err());
        assert!(
            serde_json::from_str::<InboundEmbeddingRequest>(r#"{"model":"m","input":[1,2]}"#).is_err()
        );
    }
}
