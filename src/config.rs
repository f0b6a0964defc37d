//! Runtime configuration, read from environment variables with an optional
//! `.env` file. Env vars take precedence over `.env` contents.
//!
//! At least one provider credential must be configured unless
//! `ALLOW_CLIENT_API_KEYS=true`; `REDIS_URL` is required only when
//! `CACHE_MODE=redis`.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config: {0}")]
    Invalid(String),
    #[error("config: failed to read {path}: {source}")]
    DotEnv {
        path: String,
        source: std::io::Error,
    },
}

/// Credentials for one provider. An empty key disables the provider.
#[derive(Clone, Debug, Default)]
pub struct ProviderCredentials {
    pub api_key: String,
    /// Overrides the provider's default endpoint; useful for local mocks.
    pub base_url: String,
}

/// Azure OpenAI resource configuration.
#[derive(Clone, Debug, Default)]
pub struct AzureCredentials {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
}

#[derive(Clone, Debug)]
pub struct CacheSettings {
    /// "redis" | "memory" | "none".
    pub mode: String,
    pub ttl: Duration,
    pub exclude_exact: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerSettings {
    pub error_threshold: u32,
    pub time_window: Duration,
    pub half_open_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub log_level: String,

    pub openai: ProviderCredentials,
    pub anthropic: ProviderCredentials,
    pub gemini: ProviderCredentials,
    /// OpenAI-compatible providers, keyed by provider name.
    pub compatible: BTreeMap<String, ProviderCredentials>,
    pub azure: AzureCredentials,

    pub redis_url: String,
    pub cache: CacheSettings,
    pub circuit_breaker: CircuitBreakerSettings,

    pub rpm_limit: u32,
    pub max_retries: u32,
    pub provider_timeout: Duration,

    pub cors_origins: Vec<String>,
    pub allow_client_api_keys: bool,
}

/// The OpenAI-compatible provider family: name, key env var, default
/// base URL.
pub const COMPATIBLE_PROVIDERS: &[(&str, &str, &str)] = &[
    ("mistral", "MISTRAL_API_KEY", "https://api.mistral.ai/v1"),
    ("xai", "XAI_API_KEY", "https://api.x.ai/v1"),
    ("deepseek", "DEEPSEEK_API_KEY", "https://api.deepseek.com/v1"),
    ("groq", "GROQ_API_KEY", "https://api.groq.com/openai/v1"),
    ("together", "TOGETHER_API_KEY", "https://api.together.xyz/v1"),
    ("perplexity", "PERPLEXITY_API_KEY", "https://api.perplexity.ai"),
    ("cerebras", "CEREBRAS_API_KEY", "https://api.cerebras.ai/v1"),
    ("moonshot", "MOONSHOT_API_KEY", "https://api.moonshot.cn/v1"),
    ("minimax", "MINIMAX_API_KEY", "https://api.minimax.chat/v1"),
    (
        "qwen",
        "QWEN_API_KEY",
        "https://dashscope-intl.aliyuncs.com/compatible-mode/v1",
    ),
    ("nebius", "NEBIUS_API_KEY", "https://api.studio.nebius.ai/v1"),
    ("novita", "NOVITA_API_KEY", "https://api.novita.ai/v3/openai"),
    (
        "bytedance",
        "BYTEDANCE_API_KEY",
        "https://ark.cn-beijing.volces.com/api/v3",
    ),
    ("zai", "ZAI_API_KEY", "https://api.z.ai/api/openai/v1"),
    (
        "canopywave",
        "CANOPYWAVE_API_KEY",
        "https://api.canopywave.com/v1",
    ),
    ("inference", "INFERENCE_API_KEY", "https://api.inference.net/v1"),
    ("nanogpt", "NANOGPT_API_KEY", "https://nano-gpt.com/api/v1"),
];

impl Config {
    /// Loads configuration from the process environment, after applying a
    /// `.env` file in the working directory when one exists.
    pub fn load() -> Result<Self, ConfigError> {
        load_dotenv(".env")?;
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut compatible = BTreeMap::new();
        for (name, key_var, default_base) in COMPATIBLE_PROVIDERS {
            let api_key = env_string(key_var, "");
            if api_key.is_empty() {
                continue;
            }
            let base_url = env_string(&format!("{}_BASE_URL", name.to_uppercase()), default_base);
            compatible.insert(name.to_string(), ProviderCredentials { api_key, base_url });
        }

        let config = Self {
            port: env_parse("PORT", 8080_u16)?,
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),

            openai: ProviderCredentials {
                api_key: env_string("OPENAI_API_KEY", ""),
                base_url: env_string("OPENAI_BASE_URL", ""),
            },
            anthropic: ProviderCredentials {
                api_key: env_string("ANTHROPIC_API_KEY", ""),
                base_url: env_string("ANTHROPIC_BASE_URL", ""),
            },
            gemini: ProviderCredentials {
                api_key: env_string("GOOGLE_API_KEY", ""),
                base_url: env_string("GEMINI_BASE_URL", ""),
            },
            compatible,
            azure: AzureCredentials {
                endpoint: env_string("AZURE_OPENAI_ENDPOINT", ""),
                api_key: env_string("AZURE_OPENAI_API_KEY", ""),
                api_version: env_string("AZURE_OPENAI_API_VERSION", ""),
            },

            redis_url: env_string("REDIS_URL", ""),
            cache: CacheSettings {
                mode: env_string("CACHE_MODE", "memory").to_lowercase(),
                ttl: env_duration("CACHE_TTL", Duration::from_secs(3600))?,
                exclude_exact: env_list("CACHE_EXCLUDE_EXACT"),
                exclude_patterns: env_list("CACHE_EXCLUDE_PATTERNS"),
            },
            circuit_breaker: CircuitBreakerSettings {
                error_threshold: env_parse("CB_ERROR_THRESHOLD", 5_u32)?,
                time_window: env_duration("CB_TIME_WINDOW", Duration::from_secs(60))?,
                half_open_timeout: env_duration("CB_HALF_OPEN_TIMEOUT", Duration::from_secs(30))?,
            },

            rpm_limit: env_parse("RPM_LIMIT", 0_u32)?,
            max_retries: env_parse("MAX_RETRIES", 3_u32)?,
            provider_timeout: env_duration("PROVIDER_TIMEOUT", Duration::from_secs(30))?,

            cors_origins: {
                let origins = env_list("CORS_ORIGINS");
                if origins.is_empty() {
                    vec!["*".to_string()]
                } else {
                    origins
                }
            },
            allow_client_api_keys: env_bool("ALLOW_CLIENT_API_KEYS", false),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.allow_client_api_keys && !self.at_least_one_provider_key() {
            return Err(ConfigError::Invalid(
                "at least one provider API key is required (OPENAI_API_KEY, ANTHROPIC_API_KEY, \
                 GOOGLE_API_KEY, AZURE_OPENAI_API_KEY, or one of the OpenAI-compatible keys); \
                 set ALLOW_CLIENT_API_KEYS=true to require clients to supply their own keys"
                    .to_string(),
            ));
        }

        if self.cache.mode == "redis" && self.redis_url.is_empty() {
            return Err(ConfigError::Invalid(
                "REDIS_URL is required when CACHE_MODE=redis; set CACHE_MODE=memory to use the \
                 built-in in-process cache"
                    .to_string(),
            ));
        }

        match self.cache.mode.as_str() {
            "redis" | "memory" | "none" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "invalid CACHE_MODE {other:?}; must be one of: redis, memory, none"
                )));
            }
        }

        match self.log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "invalid LOG_LEVEL {other:?}; must be one of: debug, info, warn, error"
                )));
            }
        }

        if self.circuit_breaker.error_threshold < 1 {
            return Err(ConfigError::Invalid(
                "CB_ERROR_THRESHOLD must be >= 1".to_string(),
            ));
        }
        if self.circuit_breaker.time_window.is_zero() {
            return Err(ConfigError::Invalid(
                "CB_TIME_WINDOW must be a positive duration".to_string(),
            ));
        }
        if self.circuit_breaker.half_open_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "CB_HALF_OPEN_TIMEOUT must be a positive duration".to_string(),
            ));
        }
        if self.max_retries < 1 {
            return Err(ConfigError::Invalid("MAX_RETRIES must be >= 1".to_string()));
        }

        Ok(())
    }

    pub fn at_least_one_provider_key(&self) -> bool {
        !self.openai.api_key.is_empty()
            || !self.anthropic.api_key.is_empty()
            || !self.gemini.api_key.is_empty()
            || !self.azure.api_key.is_empty()
            || !self.compatible.is_empty()
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{key} has invalid value {raw:?}"))),
        _ => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn env_duration(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_duration(raw.trim())
            .ok_or_else(|| ConfigError::Invalid(format!("{key} has invalid duration {raw:?}"))),
        _ => Ok(default),
    }
}

/// Parses durations like "500ms", "30s", "2m", "1h". A bare number is
/// taken as seconds.
fn parse_duration(raw: &str) -> Option<Duration> {
    let (value, unit) = match raw.find(|c: char| c.is_ascii_alphabetic()) {
        Some(split) => raw.split_at(split),
        None => (raw, "s"),
    };
    let value: u64 = value.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

/// Populates missing process env vars from a dotenv file when present.
/// Lines are KEY=VALUE with optional `export` prefix, quotes, and
/// `#` comments.
fn load_dotenv(path: &str) -> Result<(), ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(ConfigError::DotEnv {
                path: path.to_string(),
                source: err,
            });
        }
    };

    for (key, value) in parse_dotenv(&contents) {
        if std::env::var(&key).is_err() {
            std::env::set_var(&key, &value);
        }
    }
    Ok(())
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim();
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = raw_key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = raw_value.trim().to_string();
        if let Some(stripped) = value
            .strip_prefix('"')
            .and_then(|inner| inner.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|inner| inner.strip_suffix('\'')))
        {
            value = stripped.to_string();
        }
        out.push((key.to_string(), value));
    }
    out
}
