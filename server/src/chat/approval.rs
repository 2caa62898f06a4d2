use sea_orm::DatabaseConnection;
use teloxide::types::InlineKeyboardMarkup;

use crate::{
    chat::client::ChatClient,
    error::AppResult,
    model::notification::ManualNotificationCtrl,
    server_config::cfg,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent(i32),
    QueuedManual,
}

/// Approval-channel delivery with the third reliability tier: when retries
/// inside [`ChatClient`] are exhausted, the message is parked in the
/// manual-notification queue and the caller proceeds without raising, so
/// the user's mail still gets actioned later.
#[derive(Clone)]
pub struct ApprovalChannel {
    conn: DatabaseConnection,
    chat: ChatClient,
}

impl ApprovalChannel {
    pub fn new(conn: DatabaseConnection, chat: ChatClient) -> Self {
        ApprovalChannel { conn, chat }
    }

    pub fn chat(&self) -> &ChatClient {
        &self.chat
    }

    pub async fn deliver(
        &self,
        chat_id: i64,
        email_id: i32,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> AppResult<DeliveryOutcome> {
        match self.chat.send_message(chat_id, text, keyboard.clone()).await {
            Ok(message_id) => Ok(DeliveryOutcome::Sent(message_id)),
            Err(e) => {
                tracing::error!(
                    "Chat delivery exhausted for email {email_id}, queueing manual notification: {e}"
                );
                let buttons_json = keyboard
                    .as_ref()
                    .and_then(|kb| serde_json::to_value(kb).ok());
                ManualNotificationCtrl::enqueue(
                    &self.conn,
                    email_id,
                    chat_id,
                    text,
                    buttons_json,
                    e.error_type(),
                    cfg.max_node_retries as i32,
                )
                .await?;
                Ok(DeliveryOutcome::QueuedManual)
            }
        }
    }

    /// Edits an existing message in place; falls back to a fresh delivery
    /// when the original message is gone.
    pub async fn deliver_edit(
        &self,
        chat_id: i64,
        email_id: i32,
        message_id: i32,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> AppResult<DeliveryOutcome> {
        match self
            .chat
            .edit_message(chat_id, message_id, text, keyboard.clone())
            .await
        {
            Ok(()) => Ok(DeliveryOutcome::Sent(message_id)),
            Err(e) => {
                tracing::warn!("Edit of message {message_id} failed ({e}), sending fresh message");
                self.deliver(chat_id, email_id, text, keyboard).await
            }
        }
    }

    /// Best-effort delete used by the confirmation step to clean up earlier
    /// proposal/draft messages.
    pub async fn delete_quiet(&self, chat_id: i64, message_id: i32) {
        if let Err(e) = self.chat.delete_message(chat_id, message_id).await {
            tracing::warn!("Could not delete chat message {message_id}: {e}");
        }
    }

    /// Non-critical sends (confirmations, notifications): failures are
    /// logged and swallowed.
    pub async fn send_quiet(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.chat.send_message(chat_id, text, None).await {
            tracing::warn!("Could not send chat message: {e}");
        }
    }
}
