//! Background health probing for providers and auxiliary backends.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, join_all};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::metrics::Metrics;
use crate::provider::Provider;

const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Zero-argument readiness probe for the cache or database backend.
/// Absent probes count as "ok" by convention.
pub type ReadinessProbe = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Debug, Default)]
struct ComponentStatus(RwLock<&'static str>);

impl ComponentStatus {
    fn new() -> Self {
        Self(RwLock::new("unknown"))
    }

    fn set(&self, value: &'static str) {
        if let Ok(mut status) = self.0.write() {
            *status = value;
        }
    }

    fn get(&self) -> &'static str {
        self.0.read().map(|status| *status).unwrap_or("unknown")
    }
}

/// Latest health state for all components.
#[derive(Clone, Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub providers: BTreeMap<String, &'static str>,
    pub cache: &'static str,
    pub database: &'static str,
}

/// Runs background probes and exposes the latest results.
///
/// The first probe runs before the constructor returns so that snapshots
/// never read "unknown" in steady state.
pub struct HealthChecker {
    providers: HashMap<String, Arc<dyn Provider>>,
    cache_ready: Option<ReadinessProbe>,
    db_ready: Option<ReadinessProbe>,
    metrics: Option<Metrics>,

    provider_statuses: HashMap<String, ComponentStatus>,
    cache_status: ComponentStatus,
    db_status: ComponentStatus,

    started_at: Instant,
    shutdown: CancellationToken,
}

impl HealthChecker {
    pub async fn start(
        providers: HashMap<String, Arc<dyn Provider>>,
        cache_ready: Option<ReadinessProbe>,
        db_ready: Option<ReadinessProbe>,
        metrics: Option<Metrics>,
    ) -> Arc<Self> {
        let provider_statuses = providers
            .keys()
            .map(|name| (name.clone(), ComponentStatus::new()))
            .collect();

        let checker = Arc::new(Self {
            providers,
            cache_ready,
            db_ready,
            metrics,
            provider_statuses,
            cache_status: ComponentStatus::new(),
            db_status: ComponentStatus::new(),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        });

        checker.probe().await;

        let looper = Arc::clone(&checker);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROBE_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => looper.probe().await,
                    _ = looper.shutdown.cancelled() => return,
                }
            }
        });

        checker
    }

    /// Aggregated view of the latest probe results. Overall status is
    /// "degraded" when any provider is unhealthy or the database is down;
    /// the cache follows its own probe without affecting the overall bit.
    pub fn snapshot(&self) -> HealthSnapshot {
        let mut overall = "ok";

        let mut providers = BTreeMap::new();
        for (name, status) in &self.provider_statuses {
            let value = status.get();
            if value != "ok" {
                overall = "degraded";
            }
            providers.insert(name.clone(), value);
        }

        let database = self.db_status.get();
        if database == "down" {
            overall = "degraded";
        }

        HealthSnapshot {
            status: overall,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            providers,
            cache: self.cache_status.get(),
            database,
        }
    }

    /// Readiness gate: true only when the database probe reports ok.
    pub fn readiness_ok(&self) -> bool {
        self.db_status.get() == "ok"
    }

    /// Stops the probe loop.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    async fn probe(&self) {
        let mut futures: Vec<BoxFuture<'_, ()>> = Vec::with_capacity(self.providers.len() + 2);

        for (name, provider) in &self.providers {
            let status = &self.provider_statuses[name];
            let metrics = self.metrics.as_ref();
            let provider = Arc::clone(provider);
            let name = name.clone();
            futures.push(Box::pin(async move {
                let healthy = matches!(
                    tokio::time::timeout(PROBE_TIMEOUT, provider.health_check()).await,
                    Ok(Ok(()))
                );
                status.set(if healthy { "ok" } else { "degraded" });
                if let Some(metrics) = metrics {
                    metrics.set_provider_health(&name, healthy);
                }
            }));
        }

        futures.push(Box::pin(async {
            let ready = match &self.cache_ready {
                Some(probe) => tokio::time::timeout(PROBE_TIMEOUT, probe())
                    .await
                    .unwrap_or(false),
                None => true,
            };
            self.cache_status.set(if ready { "ok" } else { "degraded" });
        }));

        futures.push(Box::pin(async {
            let ready = match &self.db_ready {
                Some(probe) => tokio::time::timeout(PROBE_TIMEOUT, probe())
                    .await
                    .unwrap_or(false),
                None => true,
            };
            self.db_status.set(if ready { "ok" } else { "down" });
        }));

        join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::types::{ProxyRequest, ProxyResponse};
    use crate::{ConduitError, Result};

    struct ProbeProvider {
        name: &'static str,
        healthy: AtomicBool,
    }

    #[async_trait]
    impl Provider for ProbeProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn request(&self, _req: &ProxyRequest) -> Result<ProxyResponse> {
            Err(ConduitError::Other("not under test".to_string()))
        }

        async fn health_check(&self) -> Result<()> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(())
            } else {
                Err(ConduitError::Other("unhealthy".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn first_probe_runs_before_start_returns() {
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        providers.insert(
            "openai".to_string(),
            Arc::new(ProbeProvider {
                name: "openai",
                healthy: AtomicBool::new(true),
            }),
        );

        let checker = HealthChecker::start(providers, None, None, None).await;
        let snapshot = checker.snapshot();
        assert_eq!(snapshot.status, "ok");
        assert_eq!(snapshot.providers.get("openai"), Some(&"ok"));
        assert_eq!(snapshot.cache, "ok");
        assert_eq!(snapshot.database, "ok");
        assert!(checker.readiness_ok());
        checker.close();
    }

    #[tokio::test]
    async fn unhealthy_provider_degrades_overall_status() {
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        providers.insert(
            "openai".to_string(),
            Arc::new(ProbeProvider {
                name: "openai",
                healthy: AtomicBool::new(false),
            }),
        );

        let checker = HealthChecker::start(providers, None, None, None).await;
        let snapshot = checker.snapshot();
        assert_eq!(snapshot.status, "degraded");
        assert_eq!(snapshot.providers.get("openai"), Some(&"degraded"));
        checker.close();
    }

    #[tokio::test]
    async fn down_database_fails_readiness() {
        let db_probe: ReadinessProbe = Arc::new(|| Box::pin(async { false }));
        let checker = HealthChecker::start(HashMap::new(), None, Some(db_probe), None).await;
        assert!(!checker.readiness_ok());
        assert_eq!(checker.snapshot().database, "down");
        assert_eq!(checker.snapshot().status, "degraded");
        checker.close();
    }
}
