use config::Config;
use lazy_static::lazy_static;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub endpoint: String,
    pub model_id: String,
    pub api_key: String,
    pub temperature: f32,
    pub tokens_per_minute: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model_id: String,
    pub api_key: String,
    pub dimension: usize,
    pub max_batch: usize,
    pub per_second: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorStoreConfig {
    pub url: String,
    pub collection: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailOauthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
}

/// Runtime configuration. Every knob can be overridden from `config.toml`
/// or the environment (flat keys map 1:1, nested ones use `__`, e.g.
/// `AI__API_KEY`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub polling_interval_seconds: u64,
    pub poll_max_results: u32,
    pub max_context_tokens: usize,
    pub thread_history_limit: usize,
    pub short_thread_k: usize,
    pub standard_k: usize,
    pub long_thread_k: usize,
    pub indexing_batch_size: usize,
    pub indexing_rate_limit_delay_seconds: u64,
    pub indexing_days_back: i64,
    pub indexing_max_retries: i32,
    pub priority_threshold: i32,
    pub max_node_retries: u32,
    pub backoff_base_seconds: u64,
    pub draft_min_len: usize,
    pub draft_max_len: usize,
    pub response_generation_target_seconds: u64,
    pub context_retrieval_target_seconds: u64,
    pub workflow_step_timeout_seconds: u64,
    pub backfill_timeout_minutes: u64,
    pub indexing_batch_timeout_seconds: u64,
    pub max_concurrent_workflows: usize,
    pub ai: AiConfig,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub telegram: TelegramConfig,
    pub gmail: GmailOauthConfig,
}

impl ServerConfig {
    fn load() -> Result<Self, config::ConfigError> {
        let builder = Config::builder()
            .set_default("polling_interval_seconds", 120)?
            .set_default("poll_max_results", 50)?
            .set_default("max_context_tokens", 6500)?
            .set_default("thread_history_limit", 5)?
            .set_default("short_thread_k", 7)?
            .set_default("standard_k", 3)?
            .set_default("long_thread_k", 0)?
            .set_default("indexing_batch_size", 50)?
            .set_default("indexing_rate_limit_delay_seconds", 60)?
            .set_default("indexing_days_back", 90)?
            .set_default("indexing_max_retries", 3)?
            .set_default("priority_threshold", 70)?
            .set_default("max_node_retries", 3)?
            .set_default("backoff_base_seconds", 2)?
            .set_default("draft_min_len", 50)?
            .set_default("draft_max_len", 2000)?
            .set_default("response_generation_target_seconds", 8)?
            .set_default("context_retrieval_target_seconds", 3)?
            .set_default("workflow_step_timeout_seconds", 300)?
            .set_default("backfill_timeout_minutes", 60)?
            .set_default("indexing_batch_timeout_seconds", 120)?
            .set_default("max_concurrent_workflows", 8)?
            .set_default("ai.endpoint", "https://api.mistral.ai/v1/chat/completions")?
            .set_default("ai.model_id", "mistral-small-latest")?
            .set_default("ai.api_key", "")?
            .set_default("ai.temperature", 0.2)?
            .set_default("ai.tokens_per_minute", 1_000_000)?
            .set_default("embedding.endpoint", "https://api.mistral.ai/v1/embeddings")?
            .set_default("embedding.model_id", "mistral-embed")?
            .set_default("embedding.api_key", "")?
            .set_default("embedding.dimension", 1024)?
            .set_default("embedding.max_batch", 50)?
            .set_default("embedding.per_second", 50)?
            .set_default("vector_store.url", "http://127.0.0.1:6333")?
            .set_default("vector_store.collection", "mail_context")?
            .set_default("telegram.bot_token", "")?
            .set_default("gmail.client_id", "")?
            .set_default("gmail.client_secret", "")?
            .set_default("gmail.token_uri", "https://oauth2.googleapis.com/token")?
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        builder.try_deserialize()
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "polling: every {}s (max {}), context budget: {} tokens, indexing: {}d back in batches of {}, workers: {}",
            self.polling_interval_seconds,
            self.poll_max_results,
            self.max_context_tokens,
            self.indexing_days_back,
            self.indexing_batch_size,
            self.max_concurrent_workflows,
        )
    }
}

lazy_static! {
    #[allow(non_upper_case_globals)]
    pub static ref cfg: ServerConfig = ServerConfig::load().expect("Invalid server configuration");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::load().unwrap();
        assert_eq!(config.polling_interval_seconds, 120);
        assert_eq!(config.poll_max_results, 50);
        assert_eq!(config.max_context_tokens, 6500);
        assert_eq!(config.short_thread_k, 7);
        assert_eq!(config.standard_k, 3);
        assert_eq!(config.long_thread_k, 0);
        assert_eq!(config.priority_threshold, 70);
        assert_eq!(config.draft_min_len, 50);
        assert_eq!(config.draft_max_len, 2000);
        assert_eq!(config.indexing_days_back, 90);
    }
}
