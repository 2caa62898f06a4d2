use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;
use uuid::Uuid;

use crate::{server_config::cfg, HttpClient};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("vector store network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("vector store error: {0}")]
    Api(String),
    #[error("embedding api error: {0}")]
    Embedding(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Metadata stored next to every embedding. `doc_id` carries the Gmail
/// message id (or the synthetic sent_{id}_{epoch} key); the point id itself
/// is a UUIDv5 of it, which is what the store accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub user_id: String,
    pub doc_id: String,
    pub thread_id: String,
    pub sender: String,
    pub subject: String,
    pub date: String,
    pub timestamp: i64,
    pub language: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_sent_response: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct PointStruct {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

#[derive(Debug, Deserialize)]
pub struct ScoredPoint {
    pub score: f32,
    pub payload: VectorPayload,
}

pub fn point_id(doc_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, doc_id.as_bytes()).to_string()
}

/// Typed wrapper over the vector store's REST API (Qdrant wire format):
/// upsert, top-k search with conjunctive equality filters, filtered delete.
#[derive(Clone)]
pub struct VectorStoreClient {
    http_client: HttpClient,
    base: Url,
    collection: String,
}

impl VectorStoreClient {
    pub fn new(http_client: HttpClient) -> anyhow::Result<Self> {
        let base = Url::parse(&cfg.vector_store.url)?;
        Ok(VectorStoreClient {
            http_client,
            base,
            collection: cfg.vector_store.collection.clone(),
        })
    }

    fn collection_url(&self, suffix: &str) -> Result<Url, VectorStoreError> {
        self.base
            .join(&format!("collections/{}{}", self.collection, suffix))
            .map_err(|e| VectorStoreError::Other(anyhow!("Invalid vector store url: {e}")))
    }

    pub async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        let url = self.collection_url("")?;
        let resp = self.http_client.get(url.clone()).send().await?;
        if resp.status().is_success() {
            return Ok(());
        }

        let resp = self
            .http_client
            .put(url)
            .json(&json!({
                "vectors": { "size": cfg.embedding.dimension, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            // A concurrent creator is fine
            if body.contains("already exists") {
                Ok(())
            } else {
                Err(VectorStoreError::Api(body))
            }
        }
    }

    pub async fn upsert(&self, points: Vec<PointStruct>) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let url = self.collection_url("/points?wait=true")?;
        let resp = self
            .http_client
            .put(url)
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(VectorStoreError::Api(resp.text().await.unwrap_or_default()))
        }
    }

    /// Top-k cosine search constrained by a conjunction of equality
    /// conditions. Scores come back similarity-ordered (higher = closer).
    pub async fn search(
        &self,
        vector: Vec<f32>,
        equals: &[(&str, serde_json::Value)],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let must = equals
            .iter()
            .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
            .collect::<Vec<_>>();

        let url = self.collection_url("/points/search")?;
        let resp = self
            .http_client
            .post(url)
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "filter": { "must": must },
                "with_payload": true,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(VectorStoreError::Api(resp.text().await.unwrap_or_default()));
        }

        #[derive(Deserialize)]
        struct SearchResponse {
            result: Vec<ScoredPoint>,
        }

        let parsed = resp.json::<SearchResponse>().await?;
        Ok(parsed.result)
    }

    /// Retention cleanup: removes every record of the user older than the
    /// cutoff. Returns the number of matching records before deletion.
    pub async fn delete_older_than(
        &self,
        user_id: i32,
        cutoff_epoch: i64,
    ) -> Result<u64, VectorStoreError> {
        let filter = json!({
            "must": [
                { "key": "user_id", "match": { "value": user_id.to_string() } },
                { "key": "timestamp", "range": { "lt": cutoff_epoch } }
            ]
        });

        #[derive(Deserialize)]
        struct CountResult {
            count: u64,
        }
        #[derive(Deserialize)]
        struct CountResponse {
            result: CountResult,
        }

        let count_url = self.collection_url("/points/count")?;
        let resp = self
            .http_client
            .post(count_url)
            .json(&json!({ "filter": filter, "exact": true }))
            .send()
            .await?;
        let count = if resp.status().is_success() {
            resp.json::<CountResponse>().await.map(|c| c.result.count).unwrap_or(0)
        } else {
            0
        };

        let url = self.collection_url("/points/delete?wait=true")?;
        let resp = self
            .http_client
            .post(url)
            .json(&json!({ "filter": filter }))
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(count)
        } else {
            Err(VectorStoreError::Api(resp.text().await.unwrap_or_default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_deterministic() {
        let a = point_id("18f2b3c4d5e6");
        let b = point_id("18f2b3c4d5e6");
        assert_eq!(a, b);
        assert_ne!(a, point_id("other"));
        // Valid UUID shape
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_payload_skips_absent_sent_flag() {
        let payload = VectorPayload {
            user_id: "1".to_string(),
            doc_id: "abc".to_string(),
            thread_id: "t".to_string(),
            sender: "a@b.c".to_string(),
            subject: "s".to_string(),
            date: "2025-03-01".to_string(),
            timestamp: 1740000000,
            language: "en".to_string(),
            snippet: "hello".to_string(),
            is_sent_response: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("is_sent_response").is_none());
    }
}
