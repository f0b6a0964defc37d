//! Chat/completions dispatch pipeline: parse → route → rate-limit → cache
//! → failover → respond → log.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::Extension;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::middleware::RequestId;
use super::{Gateway, apierr, clamp_latency_ms, sha256_hex};
use crate::routing::resolve_provider;
use crate::types::{Message, ProxyRequest, StreamChunk};

const X_CACHE_HIT: &str = "HIT";
const X_CACHE_MISS: &str = "MISS";

#[derive(Debug, Deserialize)]
struct InboundRequest {
    #[serde(default)]
    model: String,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    temperature: f64,
    #[serde(default)]
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OutboundUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OutboundMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OutboundChoice {
    index: u32,
    message: OutboundMessage,
    finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
struct OutboundResponse {
    id: String,
    object: &'static str,
    created: u64,
    model: String,
    choices: Vec<OutboundChoice>,
    usage: OutboundUsage,
}

pub(crate) async fn handle_chat_completions(
    State(gateway): State<Arc<Gateway>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch_chat(gateway, "chat_completions", request_id.0, &headers, &body).await
}

pub(crate) async fn handle_completions(
    State(gateway): State<Arc<Gateway>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch_chat(gateway, "completions", request_id.0, &headers, &body).await
}

/// What a finished (non-streaming) dispatch reports for observation.
struct Observation {
    response: Response,
    provider: String,
    cache_label: &'static str,
    input_tokens: u32,
    output_tokens: u32,
    cached: bool,
    resp_bytes: Option<usize>,
}

impl Observation {
    fn error(response: Response) -> Self {
        Self {
            response,
            provider: "unknown".to_string(),
            cache_label: "bypass",
            input_tokens: 0,
            output_tokens: 0,
            cached: false,
            resp_bytes: None,
        }
    }
}

enum DispatchOutcome {
    Complete(Observation),
    /// Metrics and the async log entry are finalised by the stream writer
    /// once the SSE channel drains.
    Streaming(Response),
}

async fn dispatch_chat(
    gateway: Arc<Gateway>,
    route: &'static str,
    request_id: String,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response {
    let start = Instant::now();
    let req_bytes = body.len();

    if let Some(metrics) = &gateway.metrics {
        metrics.inc_in_flight();
    }

    match dispatch_chat_inner(&gateway, route, &request_id, headers, body, start).await {
        DispatchOutcome::Streaming(response) => response,
        DispatchOutcome::Complete(observation) => {
            if let Some(metrics) = &gateway.metrics {
                metrics.dec_in_flight();
                let status = observation.response.status().as_u16();
                let elapsed = start.elapsed();
                metrics.observe_http(route, status, elapsed, req_bytes, observation.resp_bytes);
                metrics.record_request(&observation.provider, status, elapsed.as_millis() as u64);
                metrics.observe_gateway_request(
                    &observation.provider,
                    route,
                    observation.cache_label,
                    elapsed,
                );
                metrics.add_tokens(
                    &observation.provider,
                    route,
                    observation.input_tokens,
                    observation.output_tokens,
                    observation.cached,
                );
            }
            observation.response
        }
    }
}

async fn dispatch_chat_inner(
    gateway: &Arc<Gateway>,
    route: &'static str,
    request_id: &str,
    headers: &HeaderMap,
    body: &Bytes,
    start: Instant,
) -> DispatchOutcome {
    let (client_key, client_key_id) = gateway.extract_client_api_key(headers);

    // 1. Parse request body.
    let req: InboundRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(err) => {
            return DispatchOutcome::Complete(Observation::error(apierr::write(
                StatusCode::BAD_REQUEST,
                format!("invalid JSON: {err}"),
                apierr::TYPE_INVALID_REQUEST,
                apierr::CODE_INVALID_REQUEST,
            )));
        }
    };

    if req.model.is_empty() {
        return DispatchOutcome::Complete(Observation::error(apierr::write(
            StatusCode::BAD_REQUEST,
            "field 'model' is required",
            apierr::TYPE_INVALID_REQUEST,
            apierr::CODE_INVALID_REQUEST,
        )));
    }

    // 2. Route to a provider based on the model name.
    let provider_name = resolve_provider(&req.model);

    tracing::info!(
        request_id = %request_id,
        model = %req.model,
        provider = %provider_name,
        stream = req.stream,
        "request"
    );

    if gateway.providers.is_empty() {
        return DispatchOutcome::Complete(Observation::error(apierr::write(
            StatusCode::BAD_GATEWAY,
            "no providers configured",
            apierr::TYPE_PROVIDER_ERROR,
            apierr::CODE_PROVIDER_ERROR,
        )));
    }

    // 3. Rate limit check (global RPM).
    if let Some(limiter) = &gateway.limiter {
        match limiter.allow().await {
            Ok(false) => {
                if let Some(metrics) = &gateway.metrics {
                    metrics.record_rate_limit("blocked");
                }
                tracing::warn!(
                    request_id = %request_id,
                    provider = %provider_name,
                    "rate limit exceeded"
                );
                let mut observation = Observation::error(apierr::write_rate_limit());
                observation.provider = provider_name.to_string();
                return DispatchOutcome::Complete(observation);
            }
            Ok(true) => {
                if let Some(metrics) = &gateway.metrics {
                    metrics.record_rate_limit("allowed");
                }
            }
            Err(err) => {
                // Shared state outage: the limiter is advisory, admit.
                if let Some(metrics) = &gateway.metrics {
                    metrics.record_rate_limit("error");
                }
                tracing::warn!(request_id = %request_id, error = %err, "rate limiter unavailable");
            }
        }
    }

    // 4. Build the normalized request.
    let proxy_req = ProxyRequest {
        model: req.model.clone(),
        messages: req.messages,
        stream: req.stream,
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        workspace_id: String::new(),
        api_key: client_key,
        api_key_id: client_key_id,
        request_id: request_id.to_string(),
    };

    // 5. Cache lookup. Non-streaming only; excluded models are bypassed.
    let cache_eligible = !proxy_req.stream
        && gateway.cache.is_some()
        && !gateway
            .exclusions
            .as_ref()
            .is_some_and(|exclusions| exclusions.matches(&proxy_req.model));

    let cache = gateway.cache.as_ref().filter(|_| cache_eligible);

    let mut cache_label = "bypass";
    if cache.is_none() {
        if let Some(metrics) = &gateway.metrics {
            metrics.cache_get_bypass();
        }
    }

    if let Some(cache) = cache {
        let cache_key = build_cache_key(&proxy_req);
        if let Some(cached_body) = cache.get(&cache_key).await {
            if let Some(metrics) = &gateway.metrics {
                metrics.cache_get_hit();
            }
            tracing::debug!(request_id = %request_id, model = %proxy_req.model, "cache hit");

            // Best-effort token extraction from the stored payload.
            let (input_tokens, output_tokens) = parse_cached_usage(&cached_body);

            gateway.log_request(
                request_id,
                provider_name,
                &proxy_req.model,
                input_tokens,
                output_tokens,
                start.elapsed(),
                StatusCode::OK.as_u16(),
                true,
            );

            let resp_bytes = cached_body.len();
            let response = (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/json"),
                    (header::HeaderName::from_static("x-cache"), X_CACHE_HIT),
                ],
                cached_body,
            )
                .into_response();

            return DispatchOutcome::Complete(Observation {
                response,
                provider: provider_name.to_string(),
                cache_label: "hit",
                input_tokens,
                output_tokens,
                cached: true,
                resp_bytes: Some(resp_bytes),
            });
        }
        cache_label = "miss";
        if let Some(metrics) = &gateway.metrics {
            metrics.cache_get_miss();
        }
    }

    // 6. Call the provider with automatic failover.
    let (resp, used_provider) = match gateway
        .request_with_failover(&proxy_req, provider_name, route)
        .await
    {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(
                request_id = %request_id,
                primary_provider = %provider_name,
                error = %err,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "provider error"
            );
            let response = apierr::write_provider_error(&err);
            gateway.log_request(
                request_id,
                provider_name,
                &proxy_req.model,
                0,
                0,
                start.elapsed(),
                response.status().as_u16(),
                false,
            );
            let mut observation = Observation::error(response);
            observation.provider = provider_name.to_string();
            return DispatchOutcome::Complete(observation);
        }
    };

    // 7a. Streaming: SSE pass-through, never cached.
    if proxy_req.stream {
        if let Some(rx) = resp.stream {
            let gateway = Arc::clone(gateway);
            let request_id = request_id.to_string();
            let model = resp.model.clone();
            let provider = used_provider.clone();
            let req_bytes = body.len();
            let on_complete = move |output_tokens: u32| {
                gateway.log_request(
                    &request_id,
                    &provider,
                    &model,
                    0,
                    output_tokens,
                    start.elapsed(),
                    StatusCode::OK.as_u16(),
                    false,
                );
                if let Some(metrics) = &gateway.metrics {
                    // End-to-end duration is measured until stream drain.
                    let elapsed = start.elapsed();
                    metrics.observe_http(route, StatusCode::OK.as_u16(), elapsed, req_bytes, None);
                    metrics.record_request(&provider, StatusCode::OK.as_u16(), elapsed.as_millis() as u64);
                    metrics.observe_gateway_request(&provider, route, "bypass", elapsed);
                    metrics.add_tokens(&provider, route, 0, output_tokens, false);
                    metrics.dec_in_flight();
                }
            };
            return DispatchOutcome::Streaming(sse_response(rx, on_complete));
        }
    }

    // 7b. Non-streaming: wrap in the OpenAI chat.completion envelope.
    let out = OutboundResponse {
        id: resp.id,
        object: "chat.completion",
        created: unix_now(),
        model: resp.model.clone(),
        choices: vec![OutboundChoice {
            index: 0,
            message: OutboundMessage {
                role: "assistant",
                content: resp.content,
            },
            finish_reason: "stop",
        }],
        usage: OutboundUsage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        },
    };

    let body = match serde_json::to_vec(&out) {
        Ok(body) => body,
        Err(_) => {
            let mut observation = Observation::error(apierr::write(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to serialize response",
                apierr::TYPE_SERVER_ERROR,
                apierr::CODE_INTERNAL_ERROR,
            ));
            observation.provider = used_provider;
            return DispatchOutcome::Complete(observation);
        }
    };

    // 8. Populate the cache for future identical requests. A set failure
    // never delays or fails the response.
    if let Some(cache) = cache {
        let cache_key = build_cache_key(&proxy_req);
        match cache.set(&cache_key, body.clone(), gateway.cache_ttl).await {
            Ok(()) => {
                if let Some(metrics) = &gateway.metrics {
                    metrics.cache_set_ok();
                }
            }
            Err(err) => {
                tracing::warn!(request_id = %request_id, error = %err, "cache set failed");
                if let Some(metrics) = &gateway.metrics {
                    metrics.cache_set_error();
                }
            }
        }
    }

    // 9. Emit the async log entry.
    gateway.log_request(
        request_id,
        &used_provider,
        &out.model,
        out.usage.prompt_tokens,
        out.usage.completion_tokens,
        start.elapsed(),
        StatusCode::OK.as_u16(),
        false,
    );

    tracing::debug!(
        request_id = %request_id,
        used_provider = %used_provider,
        model = %out.model,
        input_tokens = out.usage.prompt_tokens,
        output_tokens = out.usage.completion_tokens,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "response ok"
    );

    let resp_bytes = body.len();
    let response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::HeaderName::from_static("x-cache"), X_CACHE_MISS),
        ],
        body,
    )
        .into_response();

    DispatchOutcome::Complete(Observation {
        response,
        provider: used_provider,
        cache_label,
        input_tokens: out.usage.prompt_tokens,
        output_tokens: out.usage.completion_tokens,
        cached: false,
        resp_bytes: Some(resp_bytes),
    })
}

impl Gateway {
    /// Enqueues a request-log entry. Never blocks; a missing logger is a
    /// no-op.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn log_request(
        &self,
        request_id: &str,
        provider: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        latency: Duration,
        status: u16,
        cached: bool,
    ) {
        let Some(reqlog) = &self.reqlog else {
            return;
        };
        reqlog.log(super::RequestLogEntry {
            id: Uuid::parse_str(request_id).unwrap_or_default(),
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            latency_ms: clamp_latency_ms(latency),
            status,
            cached,
            created_at: OffsetDateTime::now_utc(),
        });
    }
}

/// Deterministic SHA-256 cache key for the request. The provider name is
/// included to prevent cross-provider collisions when two providers share
/// a model name.
pub fn build_cache_key(req: &ProxyRequest) -> String {
    #[derive(Serialize)]
    struct KeyMessage<'a> {
        role: &'a str,
        content: &'a str,
    }

    #[derive(Serialize)]
    struct KeyParts<'a> {
        w: &'a str,
        k: &'a str,
        p: &'a str,
        m: &'a str,
        t: String,
        mt: u32,
        msgs: Vec<KeyMessage<'a>>,
    }

    let parts = KeyParts {
        w: &req.workspace_id,
        k: &req.api_key_id,
        p: resolve_provider(&req.model),
        m: &req.model,
        t: format!("{:.2}", req.temperature),
        mt: req.max_tokens,
        msgs: req
            .messages
            .iter()
            .map(|message| KeyMessage {
                role: &message.role,
                content: &message.content,
            })
            .collect(),
    };

    let data = serde_json::to_vec(&parts).unwrap_or_default();
    format!("cache:{}", sha256_hex(&data))
}

fn parse_cached_usage(body: &[u8]) -> (u32, u32) {
    #[derive(Default, Deserialize)]
    struct StoredUsage {
        #[serde(default)]
        prompt_tokens: u32,
        #[serde(default)]
        completion_tokens: u32,
    }
    #[derive(Default, Deserialize)]
    struct StoredBody {
        #[serde(default)]
        usage: StoredUsage,
    }

    let stored: StoredBody = serde_json::from_slice(body).unwrap_or_default();
    (stored.usage.prompt_tokens, stored.usage.completion_tokens)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Streams provider chunks to the client as OpenAI-compatible SSE deltas.
///
/// A relay task drains the provider channel even after the client
/// disconnects, so producers never leak, and `on_complete` always fires
/// with the estimated output token count (~4 chars per token).
fn sse_response(
    mut rx: mpsc::Receiver<StreamChunk>,
    on_complete: impl FnOnce(u32) + Send + 'static,
) -> Response {
    let (tx, body_rx) = mpsc::channel::<Bytes>(crate::types::STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut content_len: usize = 0;
        while let Some(chunk) = rx.recv().await {
            content_len += chunk.content.len();
            let event = serde_json::json!({
                "id": "chatcmpl-stream",
                "object": "chat.completion.chunk",
                "created": unix_now(),
                "choices": [{
                    "index": 0,
                    "delta": { "content": chunk.content },
                    "finish_reason": chunk.finish_reason,
                }],
            });
            // A send error means the client went away; keep draining so the
            // producer can finish and close its channel.
            let _ = tx.send(Bytes::from(format!("data: {event}\n\n"))).await;
        }
        let _ = tx.send(Bytes::from_static(b"data: [DONE]\n\n")).await;

        let estimated = (content_len / 4).max(1) as u32;
        on_complete(estimated);
    });

    let body = Body::from_stream(stream::unfold(body_rx, |mut body_rx| async move {
        body_rx
            .recv()
            .await
            .map(|frame| (Ok::<_, Infallible>(frame), body_rx))
    }));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> ProxyRequest {
        ProxyRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: "hello".to_string(),
            }],
            temperature: 0.7,
            max_tokens: 128,
            workspace_id: "ws-1".to_string(),
            api_key_id: "key-1".to_string(),
            ..ProxyRequest::default()
        }
    }

    #[test]
    fn cache_key_is_deterministic() {
        assert_eq!(build_cache_key(&base_request()), build_cache_key(&base_request()));
        assert!(build_cache_key(&base_request()).starts_with("cache:"));
    }

    #[test]
    fn cache_key_varies_with_every_partition_field() {
        let base = build_cache_key(&base_request());

        let mut req = base_request();
        req.model = "gpt-4o-mini".to_string();
        assert_ne!(build_cache_key(&req), base);

        let mut req = base_request();
        req.temperature = 0.71;
        assert_ne!(build_cache_key(&req), base);

        let mut req = base_request();
        req.max_tokens = 129;
        assert_ne!(build_cache_key(&req), base);

        let mut req = base_request();
        req.workspace_id = "ws-2".to_string();
        assert_ne!(build_cache_key(&req), base);

        let mut req = base_request();
        req.api_key_id = "key-2".to_string();
        assert_ne!(build_cache_key(&req), base);

        let mut req = base_request();
        req.messages[0].content = "hello!".to_string();
        assert_ne!(build_cache_key(&req), base);
    }

    #[test]
    fn temperature_uses_two_decimal_places() {
        let mut a = base_request();
        a.temperature = 0.700;
        let mut b = base_request();
        b.temperature = 0.7001;
        // Both format to "0.70".
        assert_eq!(build_cache_key(&a), build_cache_key(&b));
    }

    #[test]
    fn cached_usage_parse_is_best_effort() {
        let body = br#"{"usage":{"prompt_tokens":7,"completion_tokens":9}}"#;
        assert_eq!(parse_cached_usage(body), (7, 9));
        assert_eq!(parse_cached_usage(b"{}"), (0, 0));
        assert_eq!(parse_cached_usage(b"not json"), (0, 0));
    }

    #[tokio::test]
    async fn sse_response_emits_chunks_then_done_and_completes() {
        let (tx, rx) = mpsc::channel(8);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        tx.send(StreamChunk {
            content: "hello world!".to_string(),
            finish_reason: None,
        })
        .await
        .unwrap();
        tx.send(StreamChunk {
            content: String::new(),
            finish_reason: Some("stop".to_string()),
        })
        .await
        .unwrap();
        drop(tx);

        let response = sse_response(rx, move |tokens| {
            let _ = done_tx.send(tokens);
        });
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("chat.completion.chunk"));
        assert!(text.contains("hello world!"));
        assert!(text.ends_with("data: [DONE]\n\n"));
        assert_eq!(text.matches("data: [DONE]").count(), 1);

        // 12 content bytes → 3 estimated tokens.
        assert_eq!(done_rx.await.unwrap(), 3);
    }
}
