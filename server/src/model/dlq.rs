use anyhow::Context;
use chrono::Utc;
use serde_json::json;

use crate::{db_core::prelude::*, error::AppResult, server_config::cfg};

pub struct DeadLetterCtrl;

impl DeadLetterCtrl {
    /// Records a permanently failed provider operation with a frozen
    /// snapshot of the queue row for manual investigation.
    pub async fn insert(
        conn: &DatabaseConnection,
        email: &email_processing_queue::Model,
        operation_type: &str,
        label_id: Option<&str>,
        error_type: &str,
        error_message: &str,
    ) -> AppResult<()> {
        let context = json!({
            "email_id": email.id,
            "user_id": email.user_id,
            "sender": email.sender,
            "subject": email.subject,
            "received_at": email.received_at.to_rfc3339(),
            "classification": email.classification,
            "proposed_folder_id": email.proposed_folder_id,
            "status": email.status,
            "error_timestamp": email.error_timestamp.map(|t| t.to_rfc3339()),
        });

        DeadLetterQueue::insert(dead_letter_queue::ActiveModel {
            id: ActiveValue::NotSet,
            email_queue_id: ActiveValue::Set(email.id),
            operation_type: ActiveValue::Set(operation_type.to_string()),
            gmail_message_id: ActiveValue::Set(email.gmail_message_id.clone()),
            label_id: ActiveValue::Set(label_id.map(|l| l.to_string())),
            error_type: ActiveValue::Set(error_type.to_string()),
            error_message: ActiveValue::Set(error_message.to_string()),
            retry_count: ActiveValue::Set(cfg.max_node_retries as i32),
            last_retry_at: ActiveValue::Set(Utc::now().into()),
            context_json: ActiveValue::Set(context),
            resolved: ActiveValue::Set(false),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error inserting dead letter entry")?;

        tracing::info!(
            "DLQ entry created for email {} ({}): {}",
            email.id,
            operation_type,
            error_type
        );

        Ok(())
    }

    pub async fn for_email(
        conn: &DatabaseConnection,
        email_queue_id: i32,
    ) -> AppResult<Vec<dead_letter_queue::Model>> {
        let rows = DeadLetterQueue::find()
            .filter(dead_letter_queue::Column::EmailQueueId.eq(email_queue_id))
            .all(conn)
            .await
            .context("Error fetching dead letter entries")?;

        Ok(rows)
    }
}

/// Standardized DLQ reason string carrying every id a human needs to chase
/// the failure down.
#[allow(clippy::too_many_arguments)]
pub fn format_dlq_reason(
    action: &str,
    retry_count: u32,
    error_type: &str,
    error_msg: &str,
    email_id: i32,
    gmail_message_id: &str,
    folder_name: &str,
    label_id: &str,
) -> String {
    format!(
        "Failed to {action} after {retry_count} retries. \
         Error: {error_type} - {error_msg}. \
         Email ID: {email_id}, Gmail Message ID: {gmail_message_id}, \
         Target Folder: {folder_name} (Label ID: {label_id})"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_dlq_reason() {
        let reason = format_dlq_reason(
            "apply Gmail label",
            3,
            "gmail_api_failure",
            "503 Service Unavailable",
            123,
            "msg_456",
            "Work",
            "Label_789",
        );
        assert_eq!(
            reason,
            "Failed to apply Gmail label after 3 retries. \
             Error: gmail_api_failure - 503 Service Unavailable. \
             Email ID: 123, Gmail Message ID: msg_456, \
             Target Folder: Work (Label ID: Label_789)"
        );
    }
}
