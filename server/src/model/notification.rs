use anyhow::Context;
use chrono::Utc;

use crate::{db_core::prelude::*, error::AppResult};

pub struct ManualNotificationCtrl;

impl ManualNotificationCtrl {
    /// Tier-3 delivery: chat retries exhausted, persist for replay.
    pub async fn enqueue(
        conn: &DatabaseConnection,
        email_id: i32,
        telegram_id: i64,
        message_text: &str,
        buttons_json: Option<serde_json::Value>,
        error_type: &str,
        retry_count: i32,
    ) -> AppResult<()> {
        ManualNotification::insert(manual_notification::ActiveModel {
            id: ActiveValue::NotSet,
            email_id: ActiveValue::Set(email_id),
            telegram_id: ActiveValue::Set(telegram_id),
            message_text: ActiveValue::Set(message_text.to_string()),
            buttons_json: ActiveValue::Set(buttons_json),
            error_type: ActiveValue::Set(error_type.to_string()),
            retry_count: ActiveValue::Set(retry_count),
            status: ActiveValue::Set(NotificationStatus::Pending),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error enqueuing manual notification")?;

        Ok(())
    }

    pub async fn pending(
        conn: &DatabaseConnection,
        limit: u64,
    ) -> AppResult<Vec<manual_notification::Model>> {
        let rows = ManualNotification::find()
            .filter(manual_notification::Column::Status.eq(NotificationStatus::Pending))
            .order_by_asc(manual_notification::Column::CreatedAt)
            .limit(limit)
            .all(conn)
            .await
            .context("Error fetching pending notifications")?;

        Ok(rows)
    }

    pub async fn set_status(
        conn: &DatabaseConnection,
        id: i32,
        status: NotificationStatus,
    ) -> AppResult<()> {
        ManualNotification::update_many()
            .col_expr(manual_notification::Column::Status, Expr::value(status))
            .col_expr(
                manual_notification::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(manual_notification::Column::Id.eq(id))
            .exec(conn)
            .await
            .context("Error updating manual notification")?;

        Ok(())
    }
}
