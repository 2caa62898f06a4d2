use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    db_core::prelude::*,
    error::{is_unique_violation, AppError, AppResult},
    mail::client::MessageMeta,
};

pub enum InsertOutcome {
    Inserted(email_processing_queue::Model),
    Duplicate,
}

/// Classification fields persisted after the LLM call.
pub struct ClassificationUpdate {
    pub classification: EmailClassification,
    pub proposed_folder_id: i32,
    pub reasoning: String,
    pub priority_score: i32,
    pub detected_language: String,
    pub tone: Tone,
    pub draft_response: Option<String>,
}

pub struct EmailQueueCtrl;

impl EmailQueueCtrl {
    pub async fn exists(
        conn: &DatabaseConnection,
        user_id: i32,
        gmail_message_id: &str,
    ) -> AppResult<bool> {
        let count = EmailProcessingQueue::find()
            .filter(email_processing_queue::Column::UserId.eq(user_id))
            .filter(email_processing_queue::Column::GmailMessageId.eq(gmail_message_id))
            .count(conn)
            .await
            .context("Error checking queue for message")?;

        Ok(count > 0)
    }

    /// Inserts a pending row; a unique violation on
    /// (user_id, gmail_message_id) is reported as [`InsertOutcome::Duplicate`]
    /// so concurrent pollers stay safe.
    pub async fn insert_pending(
        conn: &DatabaseConnection,
        user_id: i32,
        meta: &MessageMeta,
    ) -> AppResult<InsertOutcome> {
        let received_at = Utc
            .timestamp_millis_opt(meta.internal_date)
            .single()
            .unwrap_or_else(Utc::now);

        let insert = EmailProcessingQueue::insert(email_processing_queue::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            gmail_message_id: ActiveValue::Set(meta.id.clone()),
            gmail_thread_id: ActiveValue::Set(meta.thread_id.clone()),
            sender: ActiveValue::Set(meta.sender.clone()),
            subject: ActiveValue::Set(meta.subject.clone()),
            received_at: ActiveValue::Set(received_at.into()),
            status: ActiveValue::Set(EmailStatus::Pending),
            priority_score: ActiveValue::Set(0),
            is_priority: ActiveValue::Set(false),
            retry_count: ActiveValue::Set(0),
            ..Default::default()
        })
        .exec(conn)
        .await;

        match insert {
            Ok(res) => {
                let model = Self::get(conn, res.last_insert_id).await?;
                Ok(InsertOutcome::Inserted(model))
            }
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Duplicate),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get(
        conn: &DatabaseConnection,
        email_id: i32,
    ) -> AppResult<email_processing_queue::Model> {
        let email = EmailProcessingQueue::find_by_id(email_id)
            .one(conn)
            .await
            .context("Error fetching queue row")?
            .ok_or(AppError::NotFound(format!("Email {email_id} not found")))?;

        Ok(email)
    }

    pub async fn get_for_user(
        conn: &DatabaseConnection,
        email_id: i32,
        user_id: i32,
    ) -> AppResult<email_processing_queue::Model> {
        let email = EmailProcessingQueue::find_by_id(email_id)
            .filter(email_processing_queue::Column::UserId.eq(user_id))
            .one(conn)
            .await
            .context("Error fetching queue row")?
            .ok_or(AppError::NotFound(format!("Email {email_id} not found")))?;

        Ok(email)
    }

    pub async fn set_status(
        conn: &DatabaseConnection,
        email_id: i32,
        status: EmailStatus,
    ) -> AppResult<()> {
        EmailProcessingQueue::update_many()
            .col_expr(email_processing_queue::Column::Status, Expr::value(status))
            .col_expr(
                email_processing_queue::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(email_processing_queue::Column::Id.eq(email_id))
            .exec(conn)
            .await
            .context("Error updating queue status")?;

        Ok(())
    }

    pub async fn store_classification(
        conn: &DatabaseConnection,
        email_id: i32,
        update: &ClassificationUpdate,
    ) -> AppResult<()> {
        EmailProcessingQueue::update(email_processing_queue::ActiveModel {
            id: ActiveValue::Set(email_id),
            classification: ActiveValue::Set(Some(update.classification)),
            proposed_folder_id: ActiveValue::Set(Some(update.proposed_folder_id)),
            classification_reasoning: ActiveValue::Set(Some(update.reasoning.clone())),
            priority_score: ActiveValue::Set(update.priority_score),
            detected_language: ActiveValue::Set(Some(update.detected_language.clone())),
            tone: ActiveValue::Set(Some(update.tone)),
            draft_response: ActiveValue::Set(update.draft_response.clone()),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error storing classification")?;

        Ok(())
    }

    pub async fn set_priority(
        conn: &DatabaseConnection,
        email_id: i32,
        priority_score: i32,
        is_priority: bool,
    ) -> AppResult<()> {
        EmailProcessingQueue::update(email_processing_queue::ActiveModel {
            id: ActiveValue::Set(email_id),
            priority_score: ActiveValue::Set(priority_score),
            is_priority: ActiveValue::Set(is_priority),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error storing priority")?;

        Ok(())
    }

    pub async fn set_draft(
        conn: &DatabaseConnection,
        email_id: i32,
        draft: &str,
    ) -> AppResult<()> {
        EmailProcessingQueue::update(email_processing_queue::ActiveModel {
            id: ActiveValue::Set(email_id),
            draft_response: ActiveValue::Set(Some(draft.to_string())),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error storing draft")?;

        Ok(())
    }

    /// Stamps email_sent_at exactly once. Returns false when another pass
    /// already recorded a send, which callers treat as "skip the send".
    pub async fn mark_email_sent_once(
        conn: &DatabaseConnection,
        email_id: i32,
    ) -> AppResult<bool> {
        let result = EmailProcessingQueue::update_many()
            .col_expr(
                email_processing_queue::Column::EmailSentAt,
                Expr::value(Utc::now()),
            )
            .col_expr(
                email_processing_queue::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(email_processing_queue::Column::Id.eq(email_id))
            .filter(email_processing_queue::Column::EmailSentAt.is_null())
            .exec(conn)
            .await
            .context("Error stamping email_sent_at")?;

        Ok(result.rows_affected > 0)
    }

    pub async fn mark_error(
        conn: &DatabaseConnection,
        email_id: i32,
        error_type: &str,
        error_message: &str,
        dlq_reason: &str,
        retry_count: i32,
    ) -> AppResult<()> {
        EmailProcessingQueue::update(email_processing_queue::ActiveModel {
            id: ActiveValue::Set(email_id),
            status: ActiveValue::Set(EmailStatus::Error),
            error_type: ActiveValue::Set(Some(error_type.to_string())),
            error_message: ActiveValue::Set(Some(error_message.to_string())),
            error_timestamp: ActiveValue::Set(Some(Utc::now().into())),
            dlq_reason: ActiveValue::Set(Some(dlq_reason.to_string())),
            retry_count: ActiveValue::Set(retry_count),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error marking queue row failed")?;

        Ok(())
    }

    /// `/retry {id}`: back to pending with every error field cleared. The
    /// DLQ row stays for audit.
    pub async fn reset_for_retry(conn: &DatabaseConnection, email_id: i32) -> AppResult<()> {
        EmailProcessingQueue::update(email_processing_queue::ActiveModel {
            id: ActiveValue::Set(email_id),
            status: ActiveValue::Set(EmailStatus::Pending),
            error_type: ActiveValue::Set(None),
            error_message: ActiveValue::Set(None),
            error_timestamp: ActiveValue::Set(None),
            dlq_reason: ActiveValue::Set(None),
            retry_count: ActiveValue::Set(0),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error resetting queue row for retry")?;

        Ok(())
    }

    pub async fn find_pending(
        conn: &DatabaseConnection,
        limit: u64,
    ) -> AppResult<Vec<email_processing_queue::Model>> {
        let rows = EmailProcessingQueue::find()
            .filter(email_processing_queue::Column::Status.eq(EmailStatus::Pending))
            .order_by_asc(email_processing_queue::Column::ReceivedAt)
            .limit(limit)
            .all(conn)
            .await
            .context("Error fetching pending queue rows")?;

        Ok(rows)
    }

    /// Rows stuck in `processing` longer than the step wall-clock limit:
    /// the worker died between checkpoints and the row needs a re-dispatch.
    pub async fn find_stuck_processing(
        conn: &DatabaseConnection,
        older_than: DateTime<Utc>,
    ) -> AppResult<Vec<email_processing_queue::Model>> {
        let rows = EmailProcessingQueue::find()
            .filter(email_processing_queue::Column::Status.eq(EmailStatus::Processing))
            .filter(email_processing_queue::Column::UpdatedAt.lt(older_than))
            .all(conn)
            .await
            .context("Error fetching stuck queue rows")?;

        Ok(rows)
    }

    pub async fn find_errored(
        conn: &DatabaseConnection,
    ) -> AppResult<Vec<email_processing_queue::Model>> {
        let rows = EmailProcessingQueue::find()
            .filter(email_processing_queue::Column::Status.eq(EmailStatus::Error))
            .order_by_desc(email_processing_queue::Column::ErrorTimestamp)
            .all(conn)
            .await
            .context("Error fetching errored queue rows")?;

        Ok(rows)
    }

    pub async fn status_counts(conn: &DatabaseConnection) -> AppResult<Vec<(String, i64)>> {
        #[derive(FromQueryResult)]
        struct StatusCount {
            status: String,
            count: i64,
        }

        let counts = EmailProcessingQueue::find()
            .select_only()
            .column(email_processing_queue::Column::Status)
            .column_as(email_processing_queue::Column::Id.count(), "count")
            .group_by(email_processing_queue::Column::Status)
            .into_model::<StatusCount>()
            .all(conn)
            .await
            .context("Error counting queue rows")?;

        Ok(counts.into_iter().map(|c| (c.status, c.count)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_core::test::setup_conn;

    #[tokio::test]
    #[ignore]
    async fn test_insert_pending_dedups_on_conflict() {
        let conn = setup_conn().await;
        let meta = MessageMeta {
            id: format!("itest-{}", chrono::Utc::now().timestamp_micros()),
            thread_id: "itest-thread".to_string(),
            sender: "someone@example.com".to_string(),
            subject: "integration dedup check".to_string(),
            internal_date: 1_740_000_000_000,
        };

        let first = EmailQueueCtrl::insert_pending(&conn, 1, &meta).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = EmailQueueCtrl::insert_pending(&conn, 1, &meta).await.unwrap();
        assert!(matches!(second, InsertOutcome::Duplicate));
    }
}
