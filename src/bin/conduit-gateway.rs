//! Gateway entry point: wires configuration, providers, cache, and the
//! HTTP server, then serves until interrupted.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use conduit_llm::cache::{Cache, ExclusionList, MemoryCache, RedisCache};
use conduit_llm::config::Config;
use conduit_llm::gateway::http::router;
use conduit_llm::providers::{Anthropic, AzureOpenAi, Gemini, OpenAi, OpenAiCompatible};
use conduit_llm::{
    CbConfig, Gateway, GatewayOptions, Metrics, ReadinessProbe, RequestLogger, RpmLimiter,
};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("conduit-gateway: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_tracing(&config.log_level);

    let metrics = Metrics::new();
    metrics.set_build_info(env!("CARGO_PKG_VERSION"));

    // Cache backend per CACHE_MODE. Startup fails when redis is selected
    // but unreachable.
    let mut cache: Option<Arc<dyn Cache>> = None;
    let mut cache_ready: Option<ReadinessProbe> = None;
    let mut memory_cache: Option<Arc<MemoryCache>> = None;
    match config.cache.mode.as_str() {
        "redis" => {
            let redis_cache = Arc::new(RedisCache::connect(&config.redis_url).await?);
            let probe_target = Arc::clone(&redis_cache);
            cache_ready = Some(Arc::new(move || {
                let target = Arc::clone(&probe_target);
                Box::pin(async move { target.ping().await })
            }));
            cache = Some(redis_cache);
        }
        "memory" => {
            let mem = MemoryCache::new();
            memory_cache = Some(Arc::clone(&mem));
            cache = Some(mem);
        }
        _ => {}
    }

    let mut gateway = Gateway::new(GatewayOptions {
        max_retries: config.max_retries,
        provider_timeout: config.provider_timeout,
        cache_ttl: config.cache.ttl,
        cb_config: CbConfig {
            error_threshold: config.circuit_breaker.error_threshold,
            time_window: config.circuit_breaker.time_window,
            half_open_timeout: config.circuit_breaker.half_open_timeout,
        },
        allow_client_api_keys: config.allow_client_api_keys,
        metrics: Some(metrics),
    });

    register_providers(&mut gateway, &config);

    if let Some(cache) = cache {
        gateway = gateway.with_cache(cache);
    }
    let exclusions = ExclusionList::new(&config.cache.exclude_exact, &config.cache.exclude_patterns)?;
    if !exclusions.is_empty() {
        gateway = gateway.with_cache_exclusions(exclusions);
    }

    if config.rpm_limit > 0 {
        if config.redis_url.is_empty() {
            tracing::warn!("RPM_LIMIT set but REDIS_URL missing; rate limiting disabled");
        } else {
            let client = redis::Client::open(config.redis_url.as_str())?;
            gateway = gateway.with_rate_limiter(RpmLimiter::new(client, config.rpm_limit));
        }
    }

    gateway = gateway
        .with_request_logger(RequestLogger::new())
        .with_cors_origins(config.cors_origins.clone());

    gateway.start_health_checker(cache_ready, None).await;

    let gateway = Arc::new(gateway);
    let app = router(Arc::clone(&gateway));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        cache_mode = %config.cache.mode,
        providers = gateway.provider_count(),
        "starting gateway"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release in reverse-init order.
    gateway.close().await;
    if let Some(mem) = memory_cache {
        mem.close();
    }
    tracing::info!("gateway stopped");
    Ok(())
}

fn register_providers(gateway: &mut Gateway, config: &Config) {
    let mut registered = 0usize;

    if !config.openai.api_key.is_empty() {
        let mut provider = OpenAi::new(config.openai.api_key.clone());
        if !config.openai.base_url.is_empty() {
            provider = provider.with_base_url(config.openai.base_url.clone());
        }
        gateway.register_embedding_provider(Arc::new(provider));
        registered += 1;
    }

    if !config.anthropic.api_key.is_empty() {
        let mut provider = Anthropic::new(config.anthropic.api_key.clone());
        if !config.anthropic.base_url.is_empty() {
            provider = provider.with_base_url(config.anthropic.base_url.clone());
        }
        gateway.register_provider(Arc::new(provider));
        registered += 1;
    }

    if !config.gemini.api_key.is_empty() {
        let mut provider = Gemini::new(config.gemini.api_key.clone());
        if !config.gemini.base_url.is_empty() {
            provider = provider.with_base_url(config.gemini.base_url.clone());
        }
        gateway.register_embedding_provider(Arc::new(provider));
        registered += 1;
    }

    if !config.azure.api_key.is_empty() && !config.azure.endpoint.is_empty() {
        gateway.register_provider(Arc::new(AzureOpenAi::new(
            config.azure.endpoint.clone(),
            config.azure.api_key.clone(),
            config.azure.api_version.clone(),
        )));
        registered += 1;
    }

    for (name, credentials) in &config.compatible {
        gateway.register_embedding_provider(Arc::new(OpenAiCompatible::new(
            name.clone(),
            credentials.api_key.clone(),
            credentials.base_url.clone(),
        )));
        registered += 1;
    }

    tracing::info!(providers = registered, "provider registry built");
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
