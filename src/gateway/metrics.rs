//! Prometheus metrics registry.
//!
//! Counters, gauges, and histograms are plain maps keyed by a rendered
//! label set, exported in text exposition format by [`Metrics::render`].
//! All recording methods take `&self` and lock internally; critical
//! sections are short and never held across I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DURATION_BUCKETS: [f64; 16] = [
    0.001, 0.002, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0,
];

#[derive(Clone, Debug)]
struct Histogram {
    buckets: &'static [f64],
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new(buckets: &'static [f64]) -> Self {
        Self {
            buckets,
            counts: vec![0; buckets.len()],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count = self.count.saturating_add(1);
        for (idx, bound) in self.buckets.iter().enumerate() {
            if value <= *bound {
                self.counts[idx] = self.counts[idx].saturating_add(1);
            }
        }
    }
}

fn size_buckets() -> &'static [f64] {
    // 256B .. ~2MB, exponential.
    static BUCKETS: std::sync::OnceLock<Vec<f64>> = std::sync::OnceLock::new();
    BUCKETS.get_or_init(|| (0..14).map(|i| 256.0 * f64::powi(2.0, i)).collect())
}

#[derive(Debug, Default)]
struct Registry {
    in_flight: i64,

    // gateway_http_requests_total{route,status}
    http_requests: HashMap<String, u64>,
    // gateway_http_request_duration_seconds{route}
    http_duration: HashMap<String, Histogram>,
    // gateway_http_request_size_bytes{route}
    http_req_size: HashMap<String, Histogram>,
    // gateway_http_response_size_bytes{route,status}
    http_resp_size: HashMap<String, Histogram>,

    // gateway_requests_total{provider,status}
    requests: HashMap<String, u64>,
    // gateway_latency_ms_total{provider}
    latency_ms: HashMap<String, f64>,
    // gateway_request_duration_seconds{provider,route,cache}
    request_duration: HashMap<String, Histogram>,

    // gateway_upstream_attempts_total{provider,route,outcome}
    upstream_attempts: HashMap<String, u64>,
    // gateway_upstream_attempt_duration_seconds{provider,route,outcome}
    upstream_duration: HashMap<String, Histogram>,

    cache_hits: u64,
    cache_misses: u64,
    // gateway_cache_operations_total{op,result}
    cache_ops: HashMap<String, u64>,

    // provider_errors_total{provider,error_type}
    provider_errors: HashMap<String, u64>,

    // circuit_breaker_state{provider}
    cb_state: HashMap<String, i64>,
    // gateway_circuit_breaker_transitions_total{provider,to_state}
    cb_transitions: HashMap<String, u64>,
    // gateway_circuit_breaker_rejections_total{provider,state}
    cb_rejections: HashMap<String, u64>,
    last_cb_state: HashMap<String, i64>,

    // gateway_failover_events_total{primary,from,to,reason}
    failover_events: HashMap<String, u64>,
    // gateway_failover_success_total{primary,to}
    failover_success: HashMap<String, u64>,
    // gateway_failover_exhausted_total{primary}
    failover_exhausted: HashMap<String, u64>,

    // gateway_ratelimit_total{result}
    ratelimit: HashMap<String, u64>,

    // gateway_tokens_total{provider,route,direction,cache}
    tokens: HashMap<String, u64>,

    // gateway_provider_health{provider}
    provider_health: HashMap<String, i64>,

    // gateway_build_info{version}
    build_info: HashMap<String, i64>,
}

/// Shared handle to the metrics registry. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    inner: Arc<Mutex<Registry>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Registry) -> T) -> Option<T> {
        self.inner.lock().ok().map(|mut registry| f(&mut registry))
    }

    pub fn inc_in_flight(&self) {
        self.with(|r| r.in_flight += 1);
    }

    pub fn dec_in_flight(&self) {
        self.with(|r| r.in_flight -= 1);
    }

    /// Records end-to-end HTTP metrics for one handled request. Pass `None`
    /// for `resp_bytes` when the size is unknown (streaming responses).
    pub fn observe_http(
        &self,
        route: &str,
        status: u16,
        duration: Duration,
        req_bytes: usize,
        resp_bytes: Option<usize>,
    ) {
        self.with(|r| {
            bump(&mut r.http_requests, &labels(&[("route", route), ("status", &status.to_string())]), 1);
            observe(
                &mut r.http_duration,
                &labels(&[("route", route)]),
                &DURATION_BUCKETS,
                duration.as_secs_f64(),
            );
            observe(
                &mut r.http_req_size,
                &labels(&[("route", route)]),
                size_buckets(),
                req_bytes as f64,
            );
            if let Some(resp_bytes) = resp_bytes {
                observe(
                    &mut r.http_resp_size,
                    &labels(&[("route", route), ("status", &status.to_string())]),
                    size_buckets(),
                    resp_bytes as f64,
                );
            }
        });
    }

    pub fn record_request(&self, provider: &str, status: u16, latency_ms: u64) {
        self.with(|r| {
            bump(
                &mut r.requests,
                &labels(&[("provider", provider), ("status", &status.to_string())]),
                1,
            );
            *r.latency_ms.entry(labels(&[("provider", provider)])).or_default() += latency_ms as f64;
        });
    }

    /// Per-provider request latency with the cache outcome label
    /// (hit | miss | bypass).
    pub fn observe_gateway_request(&self, provider: &str, route: &str, cache: &str, duration: Duration) {
        self.with(|r| {
            observe(
                &mut r.request_duration,
                &labels(&[("provider", provider), ("route", route), ("cache", cache)]),
                &DURATION_BUCKETS,
                duration.as_secs_f64(),
            );
        });
    }

    /// One upstream provider attempt; `outcome` is `success`, `timeout`,
    /// `http_<code>`, `circuit_reject`, or `unknown`.
    pub fn observe_upstream_attempt(&self, provider: &str, route: &str, outcome: &str, duration: Duration) {
        self.with(|r| {
            let key = labels(&[("provider", provider), ("route", route), ("outcome", outcome)]);
            bump(&mut r.upstream_attempts, &key, 1);
            observe(&mut r.upstream_duration, &key, &DURATION_BUCKETS, duration.as_secs_f64());
        });
    }

    pub fn record_failover(&self, primary: &str, from: &str, to: &str, reason: &str) {
        self.with(|r| {
            bump(
                &mut r.failover_events,
                &labels(&[("primary", primary), ("from", from), ("to", to), ("reason", reason)]),
                1,
            );
        });
    }

    pub fn record_failover_success(&self, primary: &str, to: &str) {
        self.with(|r| {
            bump(&mut r.failover_success, &labels(&[("primary", primary), ("to", to)]), 1);
        });
    }

    pub fn record_failover_exhausted(&self, primary: &str) {
        self.with(|r| {
            bump(&mut r.failover_exhausted, &labels(&[("primary", primary)]), 1);
        });
    }

    pub fn record_rate_limit(&self, result: &str) {
        self.with(|r| {
            bump(&mut r.ratelimit, &labels(&[("result", result)]), 1);
        });
    }

    pub fn cache_get_hit(&self) {
        self.with(|r| {
            r.cache_hits = r.cache_hits.saturating_add(1);
            bump(&mut r.cache_ops, &labels(&[("op", "get"), ("result", "hit")]), 1);
        });
    }

    pub fn cache_get_miss(&self) {
        self.with(|r| {
            r.cache_misses = r.cache_misses.saturating_add(1);
            bump(&mut r.cache_ops, &labels(&[("op", "get"), ("result", "miss")]), 1);
        });
    }

    pub fn cache_get_bypass(&self) {
        self.with(|r| {
            bump(&mut r.cache_ops, &labels(&[("op", "get"), ("result", "bypass")]), 1);
        });
    }

    pub fn cache_set_ok(&self) {
        self.with(|r| {
            bump(&mut r.cache_ops, &labels(&[("op", "set"), ("result", "ok")]), 1);
        });
    }

    pub fn cache_set_error(&self) {
        self.with(|r| {
            bump(&mut r.cache_ops, &labels(&[("op", "set"), ("result", "error")]), 1);
        });
    }

    pub fn add_tokens(&self, provider: &str, route: &str, input: u32, output: u32, cached: bool) {
        let cache = if cached { "hit" } else { "miss" };
        self.with(|r| {
            if input > 0 {
                bump(
                    &mut r.tokens,
                    &labels(&[("provider", provider), ("route", route), ("direction", "input"), ("cache", cache)]),
                    u64::from(input),
                );
            }
            if output > 0 {
                bump(
                    &mut r.tokens,
                    &labels(&[("provider", provider), ("route", route), ("direction", "output"), ("cache", cache)]),
                    u64::from(output),
                );
            }
            if input + output > 0 {
                bump(
                    &mut r.tokens,
                    &labels(&[("provider", provider), ("route", route), ("direction", "total"), ("cache", cache)]),
                    u64::from(input) + u64::from(output),
                );
            }
        });
    }

    pub fn record_error(&self, provider: &str, error_type: &str) {
        self.with(|r| {
            bump(
                &mut r.provider_errors,
                &labels(&[("provider", provider), ("error_type", error_type)]),
                1,
            );
        });
    }

    pub fn set_provider_health(&self, provider: &str, ok: bool) {
        self.with(|r| {
            r.provider_health
                .insert(labels(&[("provider", provider)]), i64::from(ok));
        });
    }

    pub fn set_build_info(&self, version: &str) {
        self.with(|r| {
            r.build_info.insert(labels(&[("version", version)]), 1);
        });
    }

    /// Sets the breaker state gauge (0=closed, 1=open, 2=half-open) and
    /// bumps a transition counter when the state changed.
    pub fn set_circuit_breaker(&self, provider: &str, state: i64) {
        self.with(|r| {
            r.cb_state.insert(labels(&[("provider", provider)]), state);

            let prev = r.last_cb_state.get(provider).copied();
            if prev != Some(state) {
                r.last_cb_state.insert(provider.to_string(), state);
                bump(
                    &mut r.cb_transitions,
                    &labels(&[("provider", provider), ("to_state", &state.to_string())]),
                    1,
                );
            }
        });
    }

    pub fn record_circuit_breaker_rejection(&self, provider: &str, state: &str) {
        self.with(|r| {
            bump(
                &mut r.cb_rejections,
                &labels(&[("provider", provider), ("state", state)]),
                1,
            );
        });
    }

    /// Renders every metric in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.with(|r| {
            let mut out = String::new();

            out.push_str("# HELP gateway_inflight_requests Current number of in-flight HTTP requests.\n");
            out.push_str("# TYPE gateway_inflight_requests gauge\n");
            out.push_str(&format!("gateway_inflight_requests {}\n", r.in_flight));

            write_counters(&mut out, "gateway_http_requests_total", "Total HTTP requests handled.", &r.http_requests);
            write_histograms(&mut out, "gateway_http_request_duration_seconds", "End-to-end HTTP request duration in seconds.", &r.http_duration);
            write_histograms(&mut out, "gateway_http_request_size_bytes", "HTTP request body size in bytes.", &r.http_req_size);
            write_histograms(&mut out, "gateway_http_response_size_bytes", "HTTP response body size in bytes.", &r.http_resp_size);

            write_counters(&mut out, "gateway_requests_total", "Total proxy requests.", &r.requests);
            write_float_counters(&mut out, "gateway_latency_ms_total", "Sum of latency in ms (compute avg externally).", &r.latency_ms);
            write_histograms(&mut out, "gateway_request_duration_seconds", "End-to-end request duration from the gateway perspective.", &r.request_duration);

            write_counters(&mut out, "gateway_upstream_attempts_total", "Upstream provider attempts, including failovers.", &r.upstream_attempts);
            write_histograms(&mut out, "gateway_upstream_attempt_duration_seconds", "Upstream provider attempt duration in seconds.", &r.upstream_duration);

            out.push_str("# HELP cache_hits_total Total cache hits.\n# TYPE cache_hits_total counter\n");
            out.push_str(&format!("cache_hits_total {}\n", r.cache_hits));
            out.push_str("# HELP cache_misses_total Total cache misses.\n# TYPE cache_misses_total counter\n");
            out.push_str(&format!("cache_misses_total {}\n", r.cache_misses));
            write_counters(&mut out, "gateway_cache_operations_total", "Cache operations by type and result.", &r.cache_ops);

            write_counters(&mut out, "provider_errors_total", "Provider errors by type.", &r.provider_errors);

            write_gauges(&mut out, "circuit_breaker_state", "Circuit breaker state (0=closed, 1=open, 2=half-open).", &r.cb_state);
            write_counters(&mut out, "gateway_circuit_breaker_transitions_total", "Circuit breaker transitions to a new state.", &r.cb_transitions);
            write_counters(&mut out, "gateway_circuit_breaker_rejections_total", "Requests rejected due to circuit breaker state.", &r.cb_rejections);

            write_counters(&mut out, "gateway_failover_events_total", "Failover events between providers.", &r.failover_events);
            write_counters(&mut out, "gateway_failover_success_total", "Requests served by a non-primary provider.", &r.failover_success);
            write_counters(&mut out, "gateway_failover_exhausted_total", "Requests that exhausted failover attempts.", &r.failover_exhausted);

            write_counters(&mut out, "gateway_ratelimit_total", "Rate limit decisions.", &r.ratelimit);
            write_counters(&mut out, "gateway_tokens_total", "Token usage derived from upstream usage fields.", &r.tokens);

            write_gauges(&mut out, "gateway_provider_health", "Provider health (1=ok, 0=degraded).", &r.provider_health);
            write_gauges(&mut out, "gateway_build_info", "Build information.", &r.build_info);

            out
        })
        .unwrap_or_default()
    }
}

/// Renders a label set into the canonical `k="v",...` form used as map key
/// and exposition output.
fn labels(pairs: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (idx, (name, value)) in pairs.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(name);
        out.push_str("=\"");
        for c in value.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '"' => out.push_str("\\\""),
                _ => out.push(c),
            }
        }
        out.push('"');
    }
    out
}

fn bump(map: &mut HashMap<String, u64>, key: &str, by: u64) {
    let entry = map.entry(key.to_string()).or_default();
    *entry = entry.saturating_add(by);
}

fn observe(map: &mut HashMap<String, Histogram>, key: &str, buckets: &'static [f64], value: f64) {
    map.entry(key.to_string())
        .or_insert_with(|| Histogram::new(buckets))
        .observe(value);
}

fn write_counters(out: &mut String, metric: &str, help: &str, map: &HashMap<String, u64>) {
    out.push_str(&format!("# HELP {metric} {help}\n# TYPE {metric} counter\n"));
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (label_set, value) in entries {
        out.push_str(&format!("{metric}{{{label_set}}} {value}\n"));
    }
}

fn write_float_counters(out: &mut String, metric: &str, help: &str, map: &HashMap<String, f64>) {
    out.push_str(&format!("# HELP {metric} {help}\n# TYPE {metric} counter\n"));
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (label_set, value) in entries {
        out.push_str(&format!("{metric}{{{label_set}}} {value}\n"));
    }
}

fn write_gauges(out: &mut String, metric: &str, help: &str, map: &HashMap<String, i64>) {
    out.push_str(&format!("# HELP {metric} {help}\n# TYPE {metric} gauge\n"));
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (label_set, value) in entries {
        out.push_str(&format!("{metric}{{{label_set}}} {value}\n"));
    }
}

fn write_histograms(out: &mut String, metric: &str, help: &str, map: &HashMap<String, Histogram>) {
    out.push_str(&format!("# HELP {metric} {help}\n# TYPE {metric} histogram\n"));
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (label_set, hist) in entries {
        for (idx, bound) in hist.buckets.iter().enumerate() {
            out.push_str(&format!(
                "{metric}_bucket{{{label_set},le=\"{bound}\"}} {}\n",
                hist.counts[idx]
            ));
        }
        out.push_str(&format!(
            "{metric}_bucket{{{label_set},le=\"+Inf\"}} {}\n",
            hist.count
        ));
        out.push_str(&format!("{metric}_sum{{{label_set}}} {}\n", hist.sum));
        out.push_str(&format!("{metric}_count{{{label_set}}} {}\n", hist.count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_failover_success_with_label_set() {
        let metrics = Metrics::new();
        metrics.record_failover_success("openai", "anthropic");
        let rendered = metrics.render();
        assert!(
            rendered.contains("gateway_failover_success_total{primary=\"openai\",to=\"anthropic\"} 1"),
            "missing series in:\n{rendered}"
        );
    }

    #[test]
    fn circuit_breaker_transitions_count_only_changes() {
        let metrics = Metrics::new();
        metrics.set_circuit_breaker("openai", 0);
        metrics.set_circuit_breaker("openai", 0);
        metrics.set_circuit_breaker("openai", 1);
        let rendered = metrics.render();
        assert!(rendered.contains("gateway_circuit_breaker_transitions_total{provider=\"openai\",to_state=\"0\"} 1"));
        assert!(rendered.contains("gateway_circuit_breaker_transitions_total{provider=\"openai\",to_state=\"1\"} 1"));
        assert!(rendered.contains("circuit_breaker_state{provider=\"openai\"} 1"));
    }

    #[test]
    fn token_totals_split_by_direction() {
        let metrics = Metrics::new();
        metrics.add_tokens("openai", "chat_completions", 10, 5, false);
        let rendered = metrics.render();
        assert!(rendered.contains("direction=\"input\",cache=\"miss\"} 10"));
        assert!(rendered.contains("direction=\"output\",cache=\"miss\"} 5"));
        assert!(rendered.contains("direction=\"total\",cache=\"miss\"} 15"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(labels(&[("a", "x\"y")]), "a=\"x\\\"y\"");
        assert_eq!(labels(&[("a", "x\\y")]), "a=\"x\\\\y\"");
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let mut hist = Histogram::new(&DURATION_BUCKETS);
        hist.observe(0.003);
        hist.observe(0.3);
        assert_eq!(hist.count, 2);
        // 0.003 falls into every bucket from 0.005 up; 0.3 from 0.5 up.
        let idx_05 = DURATION_BUCKETS.iter().position(|b| *b == 0.5).unwrap();
        assert_eq!(hist.counts[idx_05], 2);
        let idx_005 = DURATION_BUCKETS.iter().position(|b| *b == 0.005).unwrap();
        assert_eq!(hist.counts[idx_005], 1);
    }
}
