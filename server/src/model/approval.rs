use anyhow::Context;

use crate::{db_core::prelude::*, error::AppResult};

pub struct ApprovalHistoryCtrl;

impl ApprovalHistoryCtrl {
    /// Appends one audit row per executed decision. `execute_action` gates
    /// on queue status before calling, so re-runs never double-record.
    pub async fn record(
        conn: &DatabaseConnection,
        user_id: i32,
        email_queue_id: i32,
        action_type: ApprovalActionType,
        ai_suggested_folder_id: Option<i32>,
        user_selected_folder_id: Option<i32>,
        approved: bool,
    ) -> AppResult<()> {
        ApprovalHistory::insert(approval_history::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            email_queue_id: ActiveValue::Set(email_queue_id),
            action_type: ActiveValue::Set(action_type),
            ai_suggested_folder_id: ActiveValue::Set(ai_suggested_folder_id),
            user_selected_folder_id: ActiveValue::Set(user_selected_folder_id),
            approved: ActiveValue::Set(approved),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error recording approval history")?;

        Ok(())
    }

    pub async fn exists_for_email(
        conn: &DatabaseConnection,
        email_queue_id: i32,
    ) -> AppResult<bool> {
        let count = ApprovalHistory::find()
            .filter(approval_history::Column::EmailQueueId.eq(email_queue_id))
            .count(conn)
            .await
            .context("Error counting approval history")?;

        Ok(count > 0)
    }
}
