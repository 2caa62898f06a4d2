use anyhow::Context;
use chrono::{DateTime, Duration, Utc};

use crate::{db_core::prelude::*, error::AppResult, server_config::cfg};

pub struct IndexingProgressCtrl;

impl IndexingProgressCtrl {
    pub async fn for_user(
        conn: &DatabaseConnection,
        user_id: i32,
    ) -> AppResult<Option<indexing_progress::Model>> {
        let row = IndexingProgress::find()
            .filter(indexing_progress::Column::UserId.eq(user_id))
            .one(conn)
            .await
            .context("Error fetching indexing progress")?;

        Ok(row)
    }

    pub async fn create(
        conn: &DatabaseConnection,
        user_id: i32,
    ) -> AppResult<indexing_progress::Model> {
        let insert = IndexingProgress::insert(indexing_progress::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            total_emails: ActiveValue::Set(0),
            processed_count: ActiveValue::Set(0),
            status: ActiveValue::Set(IndexingStatus::InProgress),
            retry_count: ActiveValue::Set(0),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error creating indexing progress")?;

        let row = IndexingProgress::find_by_id(insert.last_insert_id)
            .one(conn)
            .await
            .context("Error reloading indexing progress")?
            .context("Indexing progress vanished after insert")?;

        Ok(row)
    }

    pub async fn set_total(
        conn: &DatabaseConnection,
        user_id: i32,
        total_emails: i32,
    ) -> AppResult<()> {
        IndexingProgress::update_many()
            .col_expr(
                indexing_progress::Column::TotalEmails,
                Expr::value(total_emails),
            )
            .col_expr(indexing_progress::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(indexing_progress::Column::UserId.eq(user_id))
            .exec(conn)
            .await
            .context("Error updating indexing total")?;

        Ok(())
    }

    /// Batch checkpoint. processed_count only ever grows (I2).
    pub async fn checkpoint(
        conn: &DatabaseConnection,
        user_id: i32,
        processed_count: i32,
        last_message_id: Option<&str>,
    ) -> AppResult<()> {
        IndexingProgress::update_many()
            .col_expr(
                indexing_progress::Column::ProcessedCount,
                Expr::value(processed_count),
            )
            .col_expr(
                indexing_progress::Column::LastProcessedMessageId,
                Expr::value(last_message_id.map(|s| s.to_string())),
            )
            .col_expr(indexing_progress::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(indexing_progress::Column::UserId.eq(user_id))
            .filter(indexing_progress::Column::ProcessedCount.lte(processed_count))
            .exec(conn)
            .await
            .context("Error checkpointing indexing progress")?;

        Ok(())
    }

    pub async fn set_status(
        conn: &DatabaseConnection,
        user_id: i32,
        status: IndexingStatus,
    ) -> AppResult<()> {
        IndexingProgress::update_many()
            .col_expr(indexing_progress::Column::Status, Expr::value(status))
            .col_expr(indexing_progress::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(indexing_progress::Column::UserId.eq(user_id))
            .exec(conn)
            .await
            .context("Error updating indexing status")?;

        Ok(())
    }

    /// Transient failure: park the job with exponential retry_after
    /// (2^retry_count minutes); the supervisor picks it back up.
    pub async fn pause_with_retry(
        conn: &DatabaseConnection,
        user_id: i32,
        retry_count: i32,
        error_message: &str,
    ) -> AppResult<()> {
        let retry_after = Utc::now() + Duration::minutes(1i64 << retry_count.clamp(0, 10));
        IndexingProgress::update_many()
            .col_expr(
                indexing_progress::Column::Status,
                Expr::value(IndexingStatus::Paused),
            )
            .col_expr(
                indexing_progress::Column::RetryCount,
                Expr::value(retry_count),
            )
            .col_expr(
                indexing_progress::Column::RetryAfter,
                Expr::value(retry_after),
            )
            .col_expr(
                indexing_progress::Column::ErrorMessage,
                Expr::value(error_message.to_string()),
            )
            .col_expr(indexing_progress::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(indexing_progress::Column::UserId.eq(user_id))
            .exec(conn)
            .await
            .context("Error pausing indexing")?;

        Ok(())
    }

    pub async fn mark_failed(
        conn: &DatabaseConnection,
        user_id: i32,
        error_message: &str,
    ) -> AppResult<()> {
        IndexingProgress::update_many()
            .col_expr(
                indexing_progress::Column::Status,
                Expr::value(IndexingStatus::Failed),
            )
            .col_expr(
                indexing_progress::Column::ErrorMessage,
                Expr::value(error_message.to_string()),
            )
            .col_expr(indexing_progress::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(indexing_progress::Column::UserId.eq(user_id))
            .exec(conn)
            .await
            .context("Error failing indexing")?;

        Ok(())
    }

    pub async fn mark_complete(conn: &DatabaseConnection, user_id: i32) -> AppResult<()> {
        IndexingProgress::update_many()
            .col_expr(
                indexing_progress::Column::Status,
                Expr::value(IndexingStatus::Completed),
            )
            .col_expr(
                indexing_progress::Column::CompletedAt,
                Expr::value(Utc::now()),
            )
            .col_expr(indexing_progress::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(indexing_progress::Column::UserId.eq(user_id))
            .exec(conn)
            .await
            .context("Error completing indexing")?;

        Ok(())
    }

    /// Paused jobs whose retry_after elapsed, skipping rows the supervisor
    /// touched within the cooldown window (storm guard).
    pub async fn find_resumable(
        conn: &DatabaseConnection,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<indexing_progress::Model>> {
        let cooldown = now - Duration::seconds(30);
        let rows = IndexingProgress::find()
            .filter(indexing_progress::Column::Status.eq(IndexingStatus::Paused))
            .filter(indexing_progress::Column::RetryCount.lt(cfg.indexing_max_retries))
            .filter(
                Condition::any()
                    .add(indexing_progress::Column::RetryAfter.is_null())
                    .add(indexing_progress::Column::RetryAfter.lte(now)),
            )
            .filter(indexing_progress::Column::UpdatedAt.lte(cooldown))
            .all(conn)
            .await
            .context("Error fetching resumable indexing jobs")?;

        Ok(rows)
    }
}
