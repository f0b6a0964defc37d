//! HTTP middleware: panic recovery, request IDs, timing, CORS, and
//! security headers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use uuid::Uuid;

use super::Gateway;
use super::apierr::INTERNAL_ERROR_BODY;

/// Request ID made available to handlers through request extensions.
#[derive(Clone, Debug)]
pub(crate) struct RequestId(pub String);

/// Catches panics in any handler and returns a 500 without crashing the
/// process. The panic payload is logged at error level.
pub(crate) async fn recovery(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            tracing::error!(
                method = %method,
                path = %path,
                panic = %panic_message(payload.as_ref()),
                "handler panic"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/json")],
                INTERNAL_ERROR_BODY,
            )
                .into_response()
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Ensures every request carries an `X-Request-ID`: the client value is
/// preserved, otherwise a UUID v4 is generated. The ID is stored in the
/// request extensions for handlers and echoed on the response.
pub(crate) async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Records the total handler duration in `X-Response-Time`.
pub(crate) async fn timing(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&format!("{:?}", start.elapsed())) {
        response.headers_mut().insert("x-response-time", value);
    }
    response
}

/// CORS middleware over the configured allowed origins.
///
///   - empty or `["*"]` → `Access-Control-Allow-Origin: *`
///   - specific origins → joined with ", "
///
/// OPTIONS preflight requests are answered with 204 and no body.
pub(crate) async fn cors(
    State(gateway): State<Arc<Gateway>>,
    req: Request,
    next: Next,
) -> Response {
    let origins = &gateway.cors_origins;
    let origin = if origins.is_empty() || (origins.len() == 1 && origins[0] == "*") {
        "*".to_string()
    } else {
        origins.join(", ")
    };

    let preflight = req.method() == Method::OPTIONS;
    let mut response = if preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&origin) {
        headers.insert("access-control-allow-origin", value);
    }
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Authorization, Content-Type, X-Request-ID"),
    );
    response
}

/// OWASP-recommended security headers on every response. API-only CSP:
/// no HTML is served, so everything is denied.
pub(crate) async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    // X-XSS-Protection is deprecated; set to 0 and rely on CSP.
    headers.insert("x-xss-protection", HeaderValue::from_static("0"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("geolocation=(), camera=(), microphone=()"),
    );
    response
}
