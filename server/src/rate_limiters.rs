use std::sync::atomic::Ordering::Relaxed;
use std::sync::{atomic::AtomicBool, Arc};
use tokio::time::Duration;

use leaky_bucket::RateLimiter;

use crate::server_config::cfg;

/// Process-wide limiters shared by every worker: one token-per-minute bucket
/// for the chat-completions API, one requests-per-second bucket for the
/// embedding API. Callers queue on acquire; a 429 from the provider triggers
/// a global backoff window on top of the bucket.
#[derive(Clone)]
pub struct RateLimiters {
    prompt_tokens: Arc<RateLimiter>,
    embeddings: Arc<RateLimiter>,
    backoff: Arc<AtomicBool>,
    backoff_duration: Duration,
}

impl RateLimiters {
    pub fn from_config() -> Self {
        let per_minute = cfg.ai.tokens_per_minute;
        let prompt_tokens = RateLimiter::builder()
            .initial(per_minute)
            .interval(Duration::from_secs(60))
            .max(per_minute)
            .refill(per_minute)
            .build();

        let embeddings = RateLimiter::builder()
            .initial(cfg.embedding.per_second)
            .interval(Duration::from_secs(1))
            .max(cfg.embedding.per_second)
            .refill(cfg.embedding.per_second)
            .build();

        Self {
            prompt_tokens: Arc::new(prompt_tokens),
            embeddings: Arc::new(embeddings),
            backoff: Arc::new(AtomicBool::new(false)),
            backoff_duration: Duration::from_secs(60),
        }
    }

    pub async fn acquire_prompt_tokens(&self, estimated_tokens: usize) {
        if self.backoff.load(Relaxed) {
            tokio::time::sleep(self.backoff_duration).await;
        }
        self.prompt_tokens.acquire(estimated_tokens).await;
    }

    pub async fn acquire_embeddings(&self, count: usize) {
        if self.backoff.load(Relaxed) {
            tokio::time::sleep(self.backoff_duration).await;
        }
        self.embeddings.acquire(count).await;
    }

    pub fn trigger_backoff(&self) {
        tracing::info!("Triggering backoff...");
        self.backoff.store(true, Relaxed);
        let self_ = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(self_.backoff_duration).await;
            tracing::info!("Backoff expired");
            self_.backoff.store(false, Relaxed);
        });
    }

    pub fn get_status(&self) -> String {
        format!(
            "prompt: {}/{}, embeddings: {}/{}",
            self.prompt_tokens.balance(),
            self.prompt_tokens.max(),
            self.embeddings.balance(),
            self.embeddings.max(),
        )
    }
}
