//! Structured API errors in the OpenAI envelope format, plus the mapping
//! from provider errors to client responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::ConduitError;

pub const TYPE_PROVIDER_ERROR: &str = "provider_error";
pub const TYPE_RATE_LIMIT_ERROR: &str = "rate_limit_error";
pub const TYPE_INVALID_REQUEST: &str = "invalid_request_error";
pub const TYPE_AUTHENTICATION_ERROR: &str = "authentication_error";
pub const TYPE_SERVER_ERROR: &str = "server_error";

pub const CODE_RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
pub const CODE_INVALID_API_KEY: &str = "invalid_api_key";
pub const CODE_INTERNAL_ERROR: &str = "internal_error";
pub const CODE_PROVIDER_ERROR: &str = "provider_error";
pub const CODE_REQUEST_TIMEOUT: &str = "request_timeout";
pub const CODE_NOT_IMPLEMENTED: &str = "not_implemented";
pub const CODE_INVALID_REQUEST: &str = "invalid_request";

#[derive(Debug, Serialize)]
struct ApiError {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'static str,
}

#[derive(Debug, Serialize)]
struct Envelope {
    error: ApiError,
}

/// Fixed body returned by the panic-recovery middleware. Kept as a literal
/// so it cannot itself fail to serialize.
pub const INTERNAL_ERROR_BODY: &str =
    r#"{"error":{"message":"internal server error","type":"server_error","code":"internal_error"}}"#;

pub fn write(status: StatusCode, message: impl Into<String>, kind: &'static str, code: &'static str) -> Response {
    (
        status,
        Json(Envelope {
            error: ApiError {
                message: message.into(),
                kind,
                code,
            },
        }),
    )
        .into_response()
}

pub fn write_rate_limit() -> Response {
    let mut response = write(
        StatusCode::TOO_MANY_REQUESTS,
        "rate limit exceeded",
        TYPE_RATE_LIMIT_ERROR,
        CODE_RATE_LIMIT_EXCEEDED,
    );
    insert_retry_after(&mut response);
    response
}

pub fn write_timeout() -> Response {
    write(
        StatusCode::GATEWAY_TIMEOUT,
        "provider request timed out",
        TYPE_PROVIDER_ERROR,
        CODE_REQUEST_TIMEOUT,
    )
}

/// Maps a provider error to the client response:
///
///   upstream 429       → 429 + Retry-After: 60
///   upstream 5xx / 4xx → 502 (body carries the upstream message)
///   timeout            → 504
///   anything else      → 502
pub fn write_provider_error(err: &ConduitError) -> Response {
    if let Some(status) = err.http_status() {
        if status == StatusCode::TOO_MANY_REQUESTS.as_u16() {
            let mut response = write(
                StatusCode::TOO_MANY_REQUESTS,
                err.to_string(),
                TYPE_RATE_LIMIT_ERROR,
                CODE_RATE_LIMIT_EXCEEDED,
            );
            insert_retry_after(&mut response);
            return response;
        }
        return write(
            StatusCode::BAD_GATEWAY,
            err.to_string(),
            TYPE_PROVIDER_ERROR,
            CODE_PROVIDER_ERROR,
        );
    }

    if err.is_timeout() {
        return write_timeout();
    }

    write(
        StatusCode::BAD_GATEWAY,
        err.to_string(),
        TYPE_PROVIDER_ERROR,
        CODE_PROVIDER_ERROR,
    )
}

fn insert_retry_after(response: &mut Response) {
    response
        .headers_mut()
        .insert("Retry-After", axum::http::HeaderValue::from_static("60"));
}
