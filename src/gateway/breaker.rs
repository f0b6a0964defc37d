//! Per-provider circuit breaking.
//!
//! Each provider gets an independent Closed / Open / HalfOpen state
//! machine. Failures inside a rolling window trip the breaker; after a
//! cooldown a single probe request tests recovery.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::routing::{
    CB_ERROR_THRESHOLD, CB_HALF_OPEN_TIMEOUT, CB_TIME_WINDOW, DEFAULT_FALLBACK_ORDER,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CbState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CbState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Breaker tuning parameters. Defaults match the package-level constants.
#[derive(Clone, Copy, Debug)]
pub struct CbConfig {
    /// Failures within `time_window` that trip the breaker.
    pub error_threshold: u32,
    /// Rolling window for counting errors.
    pub time_window: Duration,
    /// How long the breaker stays open before admitting a single probe.
    pub half_open_timeout: Duration,
}

impl Default for CbConfig {
    fn default() -> Self {
        Self {
            error_threshold: CB_ERROR_THRESHOLD,
            time_window: CB_TIME_WINDOW,
            half_open_timeout: CB_HALF_OPEN_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct ProviderBreaker {
    state: CbState,
    error_count: u32,
    window_start: Instant,
    opened_at: Instant,
    probe_in_flight: bool,
}

impl ProviderBreaker {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            state: CbState::Closed,
            error_count: 0,
            window_start: now,
            opened_at: now,
            probe_in_flight: false,
        }
    }
}

/// Independent circuit breakers for each provider. Safe for concurrent use;
/// the registry map is read-mostly, state updates take a per-provider lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    breakers: RwLock<HashMap<String, Mutex<ProviderBreaker>>>,
    cfg: CbConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CbConfig::default())
    }
}

impl CircuitBreaker {
    /// Creates breakers for every provider in the default fallback order.
    pub fn new(cfg: CbConfig) -> Self {
        let breakers = DEFAULT_FALLBACK_ORDER
            .iter()
            .map(|name| (name.to_string(), Mutex::new(ProviderBreaker::new())))
            .collect();
        Self {
            breakers: RwLock::new(breakers),
            cfg,
        }
    }

    /// Reports whether the named provider should receive the next request.
    ///
    /// - Closed: always true.
    /// - Open: false, unless the half-open timeout has elapsed, in which
    ///   case the breaker transitions to HalfOpen and the caller becomes
    ///   the probe.
    /// - HalfOpen: true only when no probe is currently in flight.
    ///
    /// Unknown providers are admitted optimistically.
    pub fn allow(&self, provider: &str) -> bool {
        self.with_breaker(provider, |pcb| match pcb.state {
            CbState::Closed => true,
            CbState::Open => {
                if pcb.opened_at.elapsed() >= self.cfg.half_open_timeout {
                    pcb.state = CbState::HalfOpen;
                    pcb.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CbState::HalfOpen => {
                if pcb.probe_in_flight {
                    false
                } else {
                    pcb.probe_in_flight = true;
                    true
                }
            }
        })
        .unwrap_or(true)
    }

    /// Resets the provider's breaker to Closed regardless of prior state.
    pub fn record_success(&self, provider: &str) {
        self.with_breaker(provider, |pcb| {
            pcb.state = CbState::Closed;
            pcb.error_count = 0;
            pcb.probe_in_flight = false;
            pcb.window_start = Instant::now();
        });
    }

    /// Counts a failure; trips the breaker once `error_threshold` failures
    /// accumulate within the rolling window. A HalfOpen probe failure
    /// re-opens immediately.
    pub fn record_failure(&self, provider: &str) {
        self.with_breaker(provider, |pcb| {
            let now = Instant::now();

            if now.duration_since(pcb.window_start) > self.cfg.time_window {
                pcb.error_count = 0;
                pcb.window_start = now;
            }

            pcb.error_count += 1;
            pcb.probe_in_flight = false;

            if pcb.state == CbState::HalfOpen || pcb.error_count >= self.cfg.error_threshold {
                pcb.state = CbState::Open;
                pcb.opened_at = now;
            }
        });
    }

    /// Current state, for metrics export. Unknown providers read Closed.
    pub fn state(&self, provider: &str) -> CbState {
        self.with_breaker(provider, |pcb| pcb.state)
            .unwrap_or(CbState::Closed)
    }

    pub fn state_label(&self, provider: &str) -> &'static str {
        self.state(provider).label()
    }

    fn with_breaker<T>(&self, provider: &str, f: impl FnOnce(&mut ProviderBreaker) -> T) -> Option<T> {
        let breakers = self.breakers.read().ok()?;
        let pcb = breakers.get(provider)?;
        let mut pcb = pcb.lock().ok()?;
        Some(f(&mut pcb))
    }
}
