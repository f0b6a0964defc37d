//! Model → provider routing tables and failover defaults.
//!
//! The alias tables are immutable data initialized once at first lookup;
//! the hot path is a single `HashMap` probe.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

/// Default provider failover sequence. When the primary provider fails the
/// dispatcher walks this list (minus the primary) until one succeeds or the
/// retry budget is exhausted.
pub const DEFAULT_FALLBACK_ORDER: [&str; 9] = [
    "openai",
    "anthropic",
    "gemini",
    "mistral",
    "xai",
    "groq",
    "azure",
    "vertexai",
    "bedrock",
];

pub const CB_ERROR_THRESHOLD: u32 = 5;
pub const CB_TIME_WINDOW: Duration = Duration::from_secs(60);
pub const CB_HALF_OPEN_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_RETRIES: u32 = 3;
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider name for the given chat/completion model. Falls back to
/// "openai" when the model is unknown.
pub fn resolve_provider(model: &str) -> &'static str {
    model_aliases().get(model).copied().unwrap_or("openai")
}

/// Provider name for the given embedding model. Checks the embedding
/// table first, then the chat table (a user may pass a chat model name;
/// the provider API will return a clear error), then "openai".
pub fn resolve_embedding_provider(model: &str) -> &'static str {
    if let Some(name) = embedding_model_aliases().get(model) {
        return name;
    }
    model_aliases().get(model).copied().unwrap_or("openai")
}

fn embedding_model_aliases() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            // OpenAI
            ("text-embedding-3-small", "openai"),
            ("text-embedding-3-large", "openai"),
            ("text-embedding-ada-002", "openai"),
            // Mistral
            ("mistral-embed", "mistral"),
            // Google Gemini
            ("text-embedding-004", "gemini"),
            ("embedding-001", "gemini"),
        ])
    })
}

fn model_aliases() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = HashMap::new();
        for (models, provider) in [
            (OPENAI_MODELS, "openai"),
            (ANTHROPIC_MODELS, "anthropic"),
            (GEMINI_MODELS, "gemini"),
            (MISTRAL_MODELS, "mistral"),
            (XAI_MODELS, "xai"),
            (DEEPSEEK_MODELS, "deepseek"),
            (GROQ_MODELS, "groq"),
            (TOGETHER_MODELS, "together"),
            (CEREBRAS_MODELS, "cerebras"),
            (MOONSHOT_MODELS, "moonshot"),
            (MINIMAX_MODELS, "minimax"),
            (PERPLEXITY_MODELS, "perplexity"),
            (QWEN_MODELS, "qwen"),
            (NEBIUS_MODELS, "nebius"),
            (NOVITA_MODELS, "novita"),
            (BYTEDANCE_MODELS, "bytedance"),
            (ZAI_MODELS, "zai"),
            (INFERENCE_MODELS, "inference"),
            (NANOGPT_MODELS, "nanogpt"),
            (BEDROCK_MODELS, "bedrock"),
            (AZURE_MODELS, "azure"),
            (VERTEXAI_MODELS, "vertexai"),
        ] {
            for model in models {
                table.insert(*model, provider);
            }
        }
        table
    })
}

const OPENAI_MODELS: &[&str] = &[
    "gpt-4",
    "gpt-4-0613",
    "gpt-4o",
    "gpt-4o-2024-11-20",
    "gpt-4o-2024-08-06",
    "gpt-4o-2024-05-13",
    "gpt-4o-mini",
    "gpt-4o-mini-2024-07-18",
    "gpt-4-turbo",
    "gpt-4-turbo-2024-04-09",
    "gpt-4-turbo-preview",
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-0125",
    "gpt-3.5-turbo-1106",
    "o1",
    "o1-mini",
    "o1-preview",
    "o1-2024-12-17",
    "o3",
    "o3-mini",
    "o3-mini-2025-01-31",
    "o4-mini",
    "gpt-4.1",
    "gpt-4.1-mini",
    "gpt-4.1-nano",
];

const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-5-sonnet",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku",
    "claude-3-5-haiku-20241022",
    "claude-3-opus",
    "claude-3-opus-20240229",
    "claude-3-haiku",
    "claude-3-haiku-20240307",
    "claude-3-sonnet-20240229",
    "claude-3-7-sonnet-20250219",
    "claude-3-7-sonnet",
    "claude-opus-4",
    "claude-sonnet-4",
    "claude-haiku-4",
    "claude-opus-4-5",
    "claude-sonnet-4-5",
    "claude-haiku-4-5",
    "claude-opus-4-6",
    "claude-sonnet-4-6",
    "claude-haiku-4-6",
];

const GEMINI_MODELS: &[&str] = &[
    "gemini-pro",
    "gemini-1.0-pro",
    "gemini-1.5-pro",
    "gemini-1.5-pro-002",
    "gemini-1.5-flash",
    "gemini-1.5-flash-002",
    "gemini-1.5-flash-8b",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-2.0-flash-exp",
    "gemini-2.0-pro-exp",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-exp-1206",
    "gemini-2.0-flash-thinking-exp",
    "gemma-3-27b-it",
    "gemma-3-12b-it",
    "gemma-3-4b-it",
    "gemma-2-27b-it",
    "gemma-2-9b-it",
    "gemma-2-2b-it",
    "learnlm-1.5-pro-experimental",
];

const MISTRAL_MODELS: &[&str] = &[
    "mistral-large-latest",
    "mistral-small-latest",
    "mistral-large",
    "mistral-large-2411",
    "mistral-medium",
    "mistral-small-2501",
    "mistral-small-2412",
    "mistral-nemo",
    "open-mistral-nemo",
    "mixtral-8x7b",
    "open-mixtral-8x22b",
    "pixtral-large-2411",
    "pixtral-12b-2409",
    "codestral-2501",
    "codestral-latest",
    "ministral-3b-latest",
    "ministral-8b-latest",
];

const XAI_MODELS: &[&str] = &[
    "grok-3",
    "grok-3-fast",
    "grok-3-mini",
    "grok-3-mini-fast",
    "grok-3-latest",
    "grok-2",
    "grok-2-mini",
    "grok-2-1212",
    "grok-2-vision",
    "grok-2-vision-1212",
    "grok-2-image-1212",
    "grok-beta",
    "grok-vision-beta",
];

const DEEPSEEK_MODELS: &[&str] = &["deepseek-chat", "deepseek-reasoner"];

// Groq uses its own model naming distinct from HuggingFace IDs.
const GROQ_MODELS: &[&str] = &[
    "llama-3.3-70b-versatile",
    "llama-3.1-70b-versatile",
    "llama-3.1-8b-instant",
    "llama3-70b-8192",
    "llama3-8b-8192",
    "gemma2-9b-it",
];

// HuggingFace-style names with provider/model format.
const TOGETHER_MODELS: &[&str] = &[
    "meta-llama/Llama-3.3-70B-Instruct-Turbo",
    "meta-llama/Meta-Llama-3.1-405B-Instruct-Turbo",
    "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo",
    "meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo",
    "mistralai/Mixtral-8x7B-Instruct-v0.1",
    "mistralai/Mixtral-8x22B-Instruct-v0.1",
    "Qwen/Qwen2.5-72B-Instruct-Turbo",
    "deepseek-ai/DeepSeek-R1",
    "google/gemma-2-27b-it",
];

// Cerebras uses short model names (llama3.1, not llama-3.1).
const CEREBRAS_MODELS: &[&str] = &[
    "llama3.1-8b",
    "llama3.1-70b",
    "llama3.3-70b",
    "qwen-3-32b",
    "deepseek-r1-distill-llama-70b",
    "qwen-3-235b",
    "llama4-scout-17b-16e",
];

const MOONSHOT_MODELS: &[&str] = &[
    "moonshot-v1-8k",
    "moonshot-v1-32k",
    "moonshot-v1-128k",
    "moonshot-v1-auto",
    "kimi-latest",
];

const MINIMAX_MODELS: &[&str] = &[
    "MiniMax-Text-01",
    "MiniMax-VL-01",
    "abab6.5s-chat",
    "abab6.5-chat",
    "abab5.5-chat",
];

const PERPLEXITY_MODELS: &[&str] = &["sonar", "sonar-pro", "sonar-reasoning"];

const QWEN_MODELS: &[&str] = &[
    "qwen-turbo",
    "qwen-plus",
    "qwen-max",
    "qwen-max-2025-01-25",
    "qwen-long",
    "qwen-vl-plus",
    "qwen-vl-max",
    "qwq-plus",
    "qwq-32b",
    "qwen2.5-72b-instruct",
    "qwen2.5-32b-instruct",
    "qwen2.5-7b-instruct",
];

// HuggingFace IDs, different variant names from Together AI.
const NEBIUS_MODELS: &[&str] = &[
    "meta-llama/Meta-Llama-3.1-70B-Instruct",
    "meta-llama/Meta-Llama-3.1-8B-Instruct",
    "meta-llama/Meta-Llama-3.3-70B-Instruct",
    "Qwen/Qwen2.5-72B-Instruct",
    "mistralai/Mistral-7B-Instruct-v0.3",
    "mistralai/Mistral-Nemo-Instruct-2407",
    "deepseek-ai/DeepSeek-V3",
    "deepseek-ai/DeepSeek-R1-Nebius",
];

// Lowercase HuggingFace IDs.
const NOVITA_MODELS: &[&str] = &[
    "meta-llama/llama-3.1-8b-instruct",
    "meta-llama/llama-3.1-70b-instruct",
    "meta-llama/llama-3.1-405b-instruct",
    "meta-llama/llama-3.3-70b-instruct",
    "deepseek/deepseek-v3",
    "deepseek/deepseek-r1",
    "mistralai/mistral-7b-instruct-v0.3",
    "qwen/qwen2.5-72b-instruct",
];

const BYTEDANCE_MODELS: &[&str] = &[
    "doubao-1.5-pro-32k",
    "doubao-1.5-lite-32k",
    "doubao-pro-32k",
    "doubao-lite-32k",
    "doubao-pro-4k",
    "doubao-pro-128k",
];

const ZAI_MODELS: &[&str] = &[
    "glm-4-plus",
    "glm-4-air",
    "glm-4-flash",
    "glm-4-0520",
    "glm-4",
    "glm-3-turbo",
];

const INFERENCE_MODELS: &[&str] = &["inference-llama-3.1-8b", "inference-llama-3.1-70b"];

// NanoGPT aggregates many models; the nanogpt- prefix routes explicitly.
const NANOGPT_MODELS: &[&str] = &["nanogpt-gpt-4o", "nanogpt-claude-3"];

// Bedrock uses provider-namespaced model IDs.
const BEDROCK_MODELS: &[&str] = &[
    "anthropic.claude-3-5-sonnet-20241022-v2:0",
    "anthropic.claude-3-opus-20240229-v1:0",
    "anthropic.claude-3-haiku-20240307-v1:0",
    "anthropic.claude-3-sonnet-20240229-v1:0",
    "meta.llama3-70b-instruct-v1:0",
    "meta.llama3-8b-instruct-v1:0",
    "meta.llama3-1-70b-instruct-v1:0",
    "amazon.titan-text-express-v1",
    "amazon.titan-text-lite-v1",
    "amazon.nova-pro-v1:0",
    "amazon.nova-lite-v1:0",
    "amazon.nova-micro-v1:0",
    "mistral.mistral-large-2402-v1:0",
    "ai21.jamba-1-5-large-v1:0",
];

// The azure- prefix routes explicitly to Azure; it is stripped to derive
// the deployment name.
const AZURE_MODELS: &[&str] = &[
    "azure-gpt-4",
    "azure-gpt-4o",
    "azure-gpt-4-turbo",
    "azure-gpt-4o-mini",
    "azure-o1",
    "azure-o3-mini",
    "azure-gpt-4.1",
    "azure-gpt-4.1-mini",
];

// The vertexai- prefix routes explicitly to Vertex AI; without it Gemini
// models default to Google AI Studio.
const VERTEXAI_MODELS: &[&str] = &[
    "vertexai-gemini-2.0-flash",
    "vertexai-gemini-2.0-flash-lite",
    "vertexai-gemini-1.5-pro",
    "vertexai-gemini-1.5-flash",
    "vertexai-gemini-2.5-pro",
    "vertexai-gemini-2.5-flash",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_resolve_to_their_provider() {
        assert_eq!(resolve_provider("gpt-4o"), "openai");
        assert_eq!(resolve_provider("claude-3-5-sonnet"), "anthropic");
        assert_eq!(resolve_provider("gemini-2.0-flash"), "gemini");
        assert_eq!(resolve_provider("mistral-large-latest"), "mistral");
        assert_eq!(resolve_provider("grok-3"), "xai");
        assert_eq!(resolve_provider("azure-gpt-4o"), "azure");
    }

    #[test]
    fn unknown_model_defaults_to_openai() {
        assert_eq!(resolve_provider("some-custom-model"), "openai");
    }

    #[test]
    fn embedding_models_resolve_with_chat_fallback() {
        assert_eq!(resolve_embedding_provider("text-embedding-3-small"), "openai");
        assert_eq!(resolve_embedding_provider("mistral-embed"), "mistral");
        assert_eq!(resolve_embedding_provider("text-embedding-004"), "gemini");
        // Chat model names fall through to the chat table.
        assert_eq!(resolve_embedding_provider("claude-3-opus"), "anthropic");
        assert_eq!(resolve_embedding_provider("never-heard-of-it"), "openai");
    }

    #[test]
    fn fallback_order_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for name in DEFAULT_FALLBACK_ORDER {
            assert!(seen.insert(name), "duplicate provider {name}");
        }
    }
}
