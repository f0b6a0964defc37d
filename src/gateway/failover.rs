//! Ordered multi-provider failover.

use std::time::Instant;

use super::Gateway;
use crate::routing::DEFAULT_FALLBACK_ORDER;
use crate::types::{ProxyRequest, ProxyResponse};
use crate::{ConduitError, Result};

impl Gateway {
    /// Tries the primary provider and, on retryable errors, walks through
    /// the default fallback order until one succeeds or the retry budget is
    /// exhausted.
    ///
    /// Providers whose circuit breaker is open are skipped without
    /// consuming the budget. Returns the response and the name of the
    /// provider that served it.
    pub(crate) async fn request_with_failover(
        &self,
        req: &ProxyRequest,
        primary: &str,
        route: &str,
    ) -> Result<(ProxyResponse, String)> {
        let candidates = build_candidate_list(primary);

        let mut last_err: Option<ConduitError> = None;
        let mut prev_provider: Option<String> = None;
        let mut prev_reason = String::new();
        let mut attempts: u32 = 0;

        for name in &candidates {
            if attempts >= self.max_retries {
                break;
            }

            let Some(provider) = self.providers.get(name.as_str()) else {
                continue; // not configured
            };

            if !self.breaker.allow(name) {
                tracing::warn!(
                    request_id = %req.request_id,
                    provider = %name,
                    "circuit breaker open"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_circuit_breaker_rejection(name, self.breaker.state_label(name));
                    metrics.set_circuit_breaker(name, self.breaker.state(name) as i64);
                    metrics.observe_upstream_attempt(
                        name,
                        route,
                        "circuit_reject",
                        std::time::Duration::ZERO,
                    );
                }
                continue;
            }

            // Switching to a different provider after a failure. A breaker
            // skip in between does not reset the failure marker.
            if let Some(prev) = prev_provider.as_deref() {
                if prev != name.as_str() {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_failover(primary, prev, name, &prev_reason);
                    }
                }
            }

            let start = Instant::now();
            let attempt = tokio::time::timeout(self.provider_timeout, provider.request(req)).await;
            let result = match attempt {
                Ok(result) => result,
                Err(_) => Err(ConduitError::Timeout),
            };
            let elapsed = start.elapsed();
            attempts += 1;

            match result {
                Ok(response) => {
                    self.breaker.record_success(name);
                    if let Some(metrics) = &self.metrics {
                        metrics.observe_upstream_attempt(name, route, "success", elapsed);
                        metrics.set_circuit_breaker(name, self.breaker.state(name) as i64);
                    }
                    if name != primary {
                        tracing::info!(
                            request_id = %req.request_id,
                            from = %primary,
                            to = %name,
                            latency_ms = elapsed.as_millis() as u64,
                            "failover success"
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics.record_failover_success(primary, name);
                        }
                    }
                    return Ok((response, name.clone()));
                }
                Err(err) => {
                    self.breaker.record_failure(name);

                    let reason = classify_error(&err);
                    if let Some(metrics) = &self.metrics {
                        metrics.set_circuit_breaker(name, self.breaker.state(name) as i64);
                        metrics.observe_upstream_attempt(name, route, &reason, elapsed);
                        metrics.record_error(name, &reason);
                    }
                    tracing::warn!(
                        request_id = %req.request_id,
                        from = %primary,
                        to = %name,
                        reason = %reason,
                        latency_ms = elapsed.as_millis() as u64,
                        error = %err,
                        "provider attempt failed"
                    );

                    let retryable = is_retryable(&err);
                    last_err = Some(err);
                    prev_provider = Some(name.clone());
                    prev_reason = reason;

                    // Non-retryable errors (4xx) abort immediately: other
                    // providers will not answer differently for the same
                    // request parameters.
                    if !retryable {
                        break;
                    }
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_failover_exhausted(primary);
        }
        Err(ConduitError::FailoverExhausted {
            attempts,
            source: Box::new(
                last_err.unwrap_or_else(|| ConduitError::Other("no providers available".to_string())),
            ),
        })
    }
}

/// Ordered candidate slice: primary first, then the remaining providers in
/// the default fallback order.
fn build_candidate_list(primary: &str) -> Vec<String> {
    let mut out = vec![primary.to_string()];
    for name in DEFAULT_FALLBACK_ORDER {
        if name != primary {
            out.push(name.to_string());
        }
    }
    out
}

/// Whether the error should trigger provider failover.
///
///   - timeout → retryable (a different provider may be faster)
///   - 5xx → retryable (infrastructure failure)
///   - 4xx, including 429 → not retryable (authoritative client-level signal)
///   - unknown → retryable (conservative default)
pub(crate) fn is_retryable(err: &ConduitError) -> bool {
    if err.is_timeout() {
        return true;
    }
    match err.http_status() {
        Some(status) => (500..600).contains(&status),
        None => true,
    }
}

/// Short category used as a metrics label and log field.
pub(crate) fn classify_error(err: &ConduitError) -> String {
    if err.is_timeout() {
        return "timeout".to_string();
    }
    match err.http_status() {
        Some(status) => format!("http_{status}"),
        None => "unknown".to_string(),
    }
}
