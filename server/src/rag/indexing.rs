use std::time::Duration;

use chrono::Utc;
use sea_orm::DatabaseConnection;

use crate::{
    chat::{client::ChatClient, render},
    db_core::prelude::*,
    error::{AppError, AppResult},
    llm::response::detect_language,
    mail::{client::GmailClient, message, SanitizedEmail},
    model::{indexing::IndexingProgressCtrl, user::UserCtrl},
    rag::{
        embed::EmbeddingClient,
        vector::{point_id, PointStruct, VectorPayload, VectorStoreClient},
    },
    rate_limiters::RateLimiters,
    server_config::cfg,
    HttpClient,
};

const PAGE_SIZE: u32 = 100;
const BODY_TOKEN_LIMIT: usize = 2048;

/// Maintains the per-user vector index: 90-day backfill in checkpointed
/// batches, incremental single-mail indexing, and retention cleanup.
pub struct IndexingService {
    conn: DatabaseConnection,
    http_client: HttpClient,
    rate_limiters: RateLimiters,
    chat: ChatClient,
}

impl IndexingService {
    pub fn new(
        conn: DatabaseConnection,
        http_client: HttpClient,
        rate_limiters: RateLimiters,
        chat: ChatClient,
    ) -> Self {
        IndexingService {
            conn,
            http_client,
            rate_limiters,
            chat,
        }
    }

    /// Kicks off a fresh backfill. Refuses while a job is in progress or
    /// paused; a finished or failed job is replaced.
    pub async fn start_indexing(&self, user_id: i32, days_back: i64) -> AppResult<()> {
        if let Some(existing) = IndexingProgressCtrl::for_user(&self.conn, user_id).await? {
            match existing.status {
                IndexingStatus::InProgress | IndexingStatus::Paused => {
                    return Err(AppError::Conflict(format!(
                        "Indexing already running for user {user_id}"
                    )));
                }
                IndexingStatus::Completed | IndexingStatus::Failed => {
                    IndexingProgress::delete_many()
                        .filter(indexing_progress::Column::UserId.eq(user_id))
                        .exec(&self.conn)
                        .await?;
                }
            }
        }

        IndexingProgressCtrl::create(&self.conn, user_id).await?;
        self.run_backfill(user_id, days_back, 0).await
    }

    /// Continues a paused/interrupted backfill. The full range is fetched
    /// again and the first processed_count entries skipped; the checkpoint
    /// is informational, not a cursor.
    pub async fn resume_indexing(&self, user_id: i32) -> AppResult<()> {
        let progress = IndexingProgressCtrl::for_user(&self.conn, user_id)
            .await?
            .ok_or(AppError::NotFound(format!(
                "No indexing job for user {user_id}"
            )))?;

        match progress.status {
            IndexingStatus::InProgress | IndexingStatus::Paused => {}
            _ => {
                return Err(AppError::Conflict(format!(
                    "Indexing job for user {user_id} is not resumable"
                )))
            }
        }

        if let Some(retry_after) = progress.retry_after {
            if retry_after.with_timezone(&Utc) > Utc::now() {
                return Err(AppError::Conflict(format!(
                    "Indexing job for user {user_id} is cooling down until {retry_after}"
                )));
            }
        }

        IndexingProgressCtrl::set_status(&self.conn, user_id, IndexingStatus::InProgress).await?;
        self.run_backfill(user_id, cfg.indexing_days_back, progress.processed_count as usize)
            .await
    }

    async fn run_backfill(&self, user_id: i32, days_back: i64, skip: usize) -> AppResult<()> {
        match self.backfill_inner(user_id, days_back, skip).await {
            Ok(total) => {
                IndexingProgressCtrl::mark_complete(&self.conn, user_id).await?;
                self.notify(user_id, &render::indexing_complete_message(total))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.handle_backfill_error(user_id, &e).await?;
                Err(e)
            }
        }
    }

    async fn backfill_inner(
        &self,
        user_id: i32,
        days_back: i64,
        skip: usize,
    ) -> AppResult<i32> {
        let client = GmailClient::new(self.http_client.clone(), self.conn.clone(), user_id);
        let store = VectorStoreClient::new(self.http_client.clone())?;
        store.ensure_collection().await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Vector store unavailable: {e}"))
        })?;

        let cutoff = Utc::now() - chrono::Duration::days(days_back);
        let query = format!("after:{}", cutoff.timestamp());

        // Page through the id listing, growing total_emails as pages arrive
        let mut message_ids: Vec<String> = Vec::new();
        let mut page_token = None;
        loop {
            let page = client
                .list_messages(&query, PAGE_SIZE, page_token.clone())
                .await?;
            message_ids.extend(
                page.messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );
            IndexingProgressCtrl::set_total(&self.conn, user_id, message_ids.len() as i32).await?;

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(cfg.backfill_timeout_minutes * 60);

        let mut processed = skip.min(message_ids.len());
        let remaining: Vec<String> = message_ids.iter().skip(processed).cloned().collect();

        for batch in remaining.chunks(cfg.indexing_batch_size.max(1)) {
            if tokio::time::Instant::now() > deadline {
                return Err(AppError::RequestTimeout);
            }

            let indexed = self.process_batch(&client, &store, user_id, batch).await?;
            processed += batch.len();
            IndexingProgressCtrl::checkpoint(
                &self.conn,
                user_id,
                processed as i32,
                batch.last().map(|s| s.as_str()),
            )
            .await?;

            tracing::info!(
                "Indexed batch for user {}: {}/{} ({} embedded)",
                user_id,
                processed,
                message_ids.len(),
                indexed
            );

            if processed < message_ids.len() {
                // Embedding-provider rate hygiene between batches
                tokio::time::sleep(Duration::from_secs(cfg.indexing_rate_limit_delay_seconds))
                    .await;
            }
        }

        Ok(message_ids.len() as i32)
    }

    /// Fetches, preprocesses and embeds one batch, then upserts it.
    async fn process_batch(
        &self,
        client: &GmailClient,
        store: &VectorStoreClient,
        user_id: i32,
        batch: &[String],
    ) -> AppResult<usize> {
        let mut emails: Vec<SanitizedEmail> = Vec::with_capacity(batch.len());
        for message_id in batch {
            match client.get_sanitized_message(message_id).await {
                Ok(email) => emails.push(email),
                Err(e) if e.is_transient() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("Skipping unindexable message {}: {:?}", message_id, e);
                }
            }
        }

        if emails.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = emails
            .iter()
            .map(|email| {
                let body = email.body.clone().unwrap_or_else(|| email.snippet.clone());
                crate::rag::context::truncate_to_tokens(&body, BODY_TOKEN_LIMIT)
            })
            .collect();

        let embedder = EmbeddingClient::new(self.http_client.clone(), self.rate_limiters.clone());
        let vectors = embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Embedding failed: {e}")))?;

        let points = emails
            .iter()
            .zip(vectors)
            .zip(texts.iter())
            .map(|((email, vector), text)| {
                let received = email.received_at();
                PointStruct {
                    id: point_id(&email.id),
                    vector,
                    payload: VectorPayload {
                        user_id: user_id.to_string(),
                        doc_id: email.id.clone(),
                        thread_id: email.thread_id.clone(),
                        sender: email.sender.clone().unwrap_or_default(),
                        subject: email.subject.clone().unwrap_or_default(),
                        date: received.format("%Y-%m-%d").to_string(),
                        timestamp: received.timestamp(),
                        language: detect_language(text),
                        snippet: email.snippet.clone(),
                        is_sent_response: None,
                    },
                }
            })
            .collect::<Vec<_>>();

        let count = points.len();
        store
            .upsert(points)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Vector upsert failed: {e}")))?;

        Ok(count)
    }

    /// Single-mail incremental indexing, only once the initial backfill is
    /// complete. Never batched, never delayed.
    pub async fn index_new_email(&self, user_id: i32, message_id: &str) -> AppResult<bool> {
        let progress = IndexingProgressCtrl::for_user(&self.conn, user_id).await?;
        if progress.map(|p| p.status) != Some(IndexingStatus::Completed) {
            tracing::debug!(
                "Skipping incremental indexing for user {}: backfill not complete",
                user_id
            );
            return Ok(false);
        }

        let client = GmailClient::new(self.http_client.clone(), self.conn.clone(), user_id);
        let store = VectorStoreClient::new(self.http_client.clone())?;

        let email = client.get_sanitized_message(message_id).await?;
        let body = email.body.clone().unwrap_or_else(|| email.snippet.clone());
        let text = crate::rag::context::truncate_to_tokens(&body, BODY_TOKEN_LIMIT);

        let embedder = EmbeddingClient::new(self.http_client.clone(), self.rate_limiters.clone());
        let vector = embedder
            .embed_one(&text)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Embedding failed: {e}")))?;

        let received = email.received_at();
        store
            .upsert(vec![PointStruct {
                id: point_id(&email.id),
                vector,
                payload: VectorPayload {
                    user_id: user_id.to_string(),
                    doc_id: email.id.clone(),
                    thread_id: email.thread_id.clone(),
                    sender: email.sender.clone().unwrap_or_default(),
                    subject: email.subject.clone().unwrap_or_default(),
                    date: received.format("%Y-%m-%d").to_string(),
                    timestamp: received.timestamp(),
                    language: detect_language(&text),
                    snippet: email.snippet.clone(),
                    is_sent_response: None,
                },
            }])
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Vector upsert failed: {e}")))?;

        Ok(true)
    }

    /// Indexes an outgoing reply under a synthetic key so future retrieval
    /// for this correspondent sees it. The payload's `sender` is the
    /// original correspondent by design.
    pub async fn index_sent_response(
        &self,
        email: &email_processing_queue::Model,
        draft: &str,
    ) -> AppResult<()> {
        let store = VectorStoreClient::new(self.http_client.clone())?;
        let embedder = EmbeddingClient::new(self.http_client.clone(), self.rate_limiters.clone());

        let text = crate::rag::context::truncate_to_tokens(draft, BODY_TOKEN_LIMIT);
        let vector = embedder
            .embed_one(&text)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Embedding failed: {e}")))?;

        let now = Utc::now();
        let doc_id = format!("sent_{}_{}", email.id, now.timestamp());
        store
            .upsert(vec![PointStruct {
                id: point_id(&doc_id),
                vector,
                payload: VectorPayload {
                    user_id: email.user_id.to_string(),
                    doc_id,
                    thread_id: email.gmail_thread_id.clone(),
                    sender: email.sender.clone(),
                    subject: format!("Re: {}", email.subject),
                    date: now.format("%Y-%m-%d").to_string(),
                    timestamp: now.timestamp(),
                    language: detect_language(draft),
                    snippet: message::truncate_on_word(draft, 200),
                    is_sent_response: Some(true),
                },
            }])
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Vector upsert failed: {e}")))?;

        Ok(())
    }

    /// Retention: drop the user's records older than the window.
    pub async fn cleanup_old(&self, user_id: i32, days: i64) -> AppResult<u64> {
        let store = VectorStoreClient::new(self.http_client.clone())?;
        let cutoff = (Utc::now() - chrono::Duration::days(days)).timestamp();
        let removed = store
            .delete_older_than(user_id, cutoff)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Vector cleanup failed: {e}")))?;

        if removed > 0 {
            tracing::info!("Removed {} expired vectors for user {}", removed, user_id);
        }
        Ok(removed)
    }

    async fn handle_backfill_error(&self, user_id: i32, error: &AppError) -> AppResult<()> {
        let progress = IndexingProgressCtrl::for_user(&self.conn, user_id).await?;
        let retry_count = progress.map(|p| p.retry_count).unwrap_or(0) + 1;

        if retry_count >= cfg.indexing_max_retries {
            let message = format!("{error:?}");
            IndexingProgressCtrl::mark_failed(&self.conn, user_id, &message).await?;
            self.notify(user_id, &render::indexing_failed_message(&message))
                .await;
        } else {
            IndexingProgressCtrl::pause_with_retry(
                &self.conn,
                user_id,
                retry_count,
                &format!("{error:?}"),
            )
            .await?;
        }
        Ok(())
    }

    async fn notify(&self, user_id: i32, text: &str) {
        let Ok(user) = UserCtrl::get_by_id(&self.conn, user_id).await else {
            return;
        };
        if let Some(chat_id) = user.telegram_chat_id {
            if let Err(e) = self.chat.send_message(chat_id, text, None).await {
                tracing::warn!("Could not send indexing notification: {e}");
            }
        }
    }
}
