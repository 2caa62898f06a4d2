use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::{
    rag::vector::VectorStoreError, rate_limiters::RateLimiters, server_config::cfg, HttpClient,
};

/// Batched text → fixed-dim vector client. Batches are capped at the
/// provider maximum and admitted through the embeddings-per-second bucket.
pub struct EmbeddingClient {
    http_client: HttpClient,
    rate_limiters: RateLimiters,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

impl EmbeddingClient {
    pub fn new(http_client: HttpClient, rate_limiters: RateLimiters) -> Self {
        EmbeddingClient {
            http_client,
            rate_limiters,
        }
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, VectorStoreError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| VectorStoreError::Embedding("Empty embedding response".to_string()))
    }

    /// Embeds the given texts, preserving order. Input longer than the
    /// provider batch limit is chunked transparently.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VectorStoreError> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(cfg.embedding.max_batch.max(1)) {
            self.rate_limiters.acquire_embeddings(chunk.len()).await;
            all.extend(self.embed_chunk(chunk).await?);
        }
        Ok(all)
    }

    async fn embed_chunk(&self, chunk: &[String]) -> Result<Vec<Vec<f32>>, VectorStoreError> {
        let body = json!({
            "model": cfg.embedding.model_id,
            "input": chunk,
        });

        let mut attempt: u32 = 0;
        loop {
            let result = self
                .http_client
                .post(&cfg.embedding.endpoint)
                .bearer_auth(&cfg.embedding.api_key)
                .json(&body)
                .send()
                .await;

            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    if attempt + 1 < cfg.max_node_retries {
                        backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(VectorStoreError::Network(e));
                }
            };

            match resp.status() {
                s if s.is_success() => {
                    let mut parsed = resp.json::<EmbeddingResponse>().await?;
                    parsed.data.sort_by_key(|item| item.index);
                    let vectors: Vec<Vec<f32>> =
                        parsed.data.into_iter().map(|item| item.embedding).collect();
                    if vectors.len() != chunk.len() {
                        return Err(VectorStoreError::Embedding(format!(
                            "Expected {} embeddings, got {}",
                            chunk.len(),
                            vectors.len()
                        )));
                    }
                    if let Some(bad) = vectors.iter().find(|v| v.len() != cfg.embedding.dimension) {
                        return Err(VectorStoreError::Embedding(format!(
                            "Embedding dimension {} does not match configured {}",
                            bad.len(),
                            cfg.embedding.dimension
                        )));
                    }
                    return Ok(vectors);
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt + 1 < cfg.max_node_retries {
                        backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(VectorStoreError::Embedding("rate limited".to_string()));
                }
                s if s.is_server_error() => {
                    if attempt + 1 < cfg.max_node_retries {
                        backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    let text = resp.text().await.unwrap_or_default();
                    return Err(VectorStoreError::Embedding(format!("{s}: {text}")));
                }
                s => {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(VectorStoreError::Embedding(format!("{s}: {text}")));
                }
            }
        }
    }
}

async fn backoff(attempt: u32) {
    let delay = cfg.backoff_base_seconds * (1 << attempt);
    tokio::time::sleep(Duration::from_secs(delay)).await;
}
