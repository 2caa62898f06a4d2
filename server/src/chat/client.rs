use std::time::Duration;

use teloxide::payloads::{
    EditMessageReplyMarkupSetters, EditMessageTextSetters, SendMessageSetters,
};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, MessageId};
use teloxide::ApiError;

use crate::server_config::cfg;

/// Message text cap applied before the wire limit (4096) can reject us.
pub const MESSAGE_TEXT_LIMIT: usize = 4000;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat blocked by user")]
    Blocked,
    #[error("chat rate limited, retry after {0}s")]
    RetryAfter(u64),
    #[error("chat network error: {0}")]
    Network(String),
    #[error("chat api error: {0}")]
    Api(String),
}

impl ChatError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::RetryAfter(_) | ChatError::Network(_))
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ChatError::Blocked => "chat_blocked",
            ChatError::RetryAfter(_) => "chat_rate_limited",
            ChatError::Network(_) => "chat_network_error",
            ChatError::Api(_) => "chat_api_error",
        }
    }
}

fn classify_error(error: teloxide::RequestError) -> ChatError {
    match error {
        teloxide::RequestError::Api(ApiError::BotBlocked)
        | teloxide::RequestError::Api(ApiError::UserDeactivated) => ChatError::Blocked,
        teloxide::RequestError::RetryAfter(duration) => {
            ChatError::RetryAfter(duration.seconds() as u64)
        }
        teloxide::RequestError::Network(e) => ChatError::Network(e.to_string()),
        other => ChatError::Api(other.to_string()),
    }
}

/// Tier 2 of delivery reliability: over-long messages are truncated with an
/// ellipsis, never split.
pub fn truncate_message(text: &str) -> String {
    if text.chars().count() <= MESSAGE_TEXT_LIMIT {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MESSAGE_TEXT_LIMIT).collect();
    truncated.push('…');
    truncated
}

/// Thin teloxide wrapper adding the retry tier (tier 1) of the delivery
/// policy. Tier 3 (the manual-notification queue) lives in
/// [`crate::chat::approval`] because it needs database access.
#[derive(Clone)]
pub struct ChatClient {
    bot: Bot,
}

impl ChatClient {
    pub fn new(bot: Bot) -> Self {
        ChatClient { bot }
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<i32, ChatError> {
        let text = truncate_message(text);
        self.with_retries(|| async {
            let mut request = self.bot.send_message(ChatId(chat_id), text.clone());
            if let Some(kb) = keyboard.clone() {
                request = request.reply_markup(kb);
            }
            request.await.map(|msg| msg.id.0).map_err(classify_error)
        })
        .await
    }

    pub async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<(), ChatError> {
        let text = truncate_message(text);
        self.with_retries(|| async {
            let mut request =
                self.bot
                    .edit_message_text(ChatId(chat_id), MessageId(message_id), text.clone());
            if let Some(kb) = keyboard.clone() {
                request = request.reply_markup(kb);
            }
            request.await.map(|_| ()).map_err(classify_error)
        })
        .await
    }

    pub async fn edit_message_keyboard(
        &self,
        chat_id: i64,
        message_id: i32,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<(), ChatError> {
        self.with_retries(|| async {
            self.bot
                .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id))
                .reply_markup(keyboard.clone())
                .await
                .map(|_| ())
                .map_err(classify_error)
        })
        .await
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), ChatError> {
        self.with_retries(|| async {
            self.bot
                .delete_message(ChatId(chat_id), MessageId(message_id))
                .await
                .map(|_| ())
                .map_err(classify_error)
        })
        .await
    }

    pub async fn answer_callback(&self, callback_id: &str) -> Result<(), ChatError> {
        self.bot
            .answer_callback_query(callback_id.to_string())
            .await
            .map(|_| ())
            .map_err(classify_error)
    }

    async fn with_retries<T, F, Fut>(&self, send: F) -> Result<T, ChatError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ChatError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match send().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < cfg.max_node_retries => {
                    let delay = cfg.backoff_base_seconds * (1 << attempt);
                    tracing::warn!("Chat send failed ({e}), retrying in {delay}s");
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_message_caps_length() {
        let long = "x".repeat(5000);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.chars().count(), MESSAGE_TEXT_LIMIT + 1);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn test_truncate_message_leaves_short_text() {
        assert_eq!(truncate_message("hello"), "hello");
    }
}
