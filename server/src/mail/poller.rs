use std::time::Duration;

use crate::{
    error::{AppError, AppResult},
    mail::{client::GmailClient, error::MailApiError},
    model::{
        email_queue::{EmailQueueCtrl, InsertOutcome},
        user::UserCtrl,
    },
    server_config::cfg,
    ServerState,
};

// Small gap between users so a burst of mailboxes does not hit the
// provider at the same instant.
const INTER_USER_DELAY: Duration = Duration::from_secs(2);

/// Enumerates active users with mailbox tokens and polls each one. A single
/// user failing never aborts the sweep.
pub async fn poll_all_users(state: &ServerState) -> AppResult<()> {
    let users = UserCtrl::all_active(&state.conn).await?;

    let mut has_failure = false;
    for user in users {
        match poll_user_mails(state, user.id).await {
            Ok((new_count, skipped_count)) => {
                if new_count > 0 {
                    tracing::info!(
                        "Polled {}: {} new, {} already queued",
                        user.email,
                        new_count,
                        skipped_count
                    );
                }
            }
            Err(e) => {
                has_failure = true;
                tracing::error!("Polling failed for {}: {:?}", user.email, e);
            }
        }
        tokio::time::sleep(INTER_USER_DELAY).await;
    }

    if has_failure {
        Err(AppError::Internal(anyhow::anyhow!(
            "Polling failed for some users"
        )))
    } else {
        Ok(())
    }
}

/// Fetches unread messages for one user and enqueues the ones not yet seen.
/// The unique (user_id, gmail_message_id) constraint is the dedup source of
/// truth; a conflicting insert is counted as skipped.
pub async fn poll_user_mails(state: &ServerState, user_id: i32) -> AppResult<(u32, u32)> {
    let client = GmailClient::new(state.http_client.clone(), state.conn.clone(), user_id);

    let list = client
        .list_messages("is:unread", cfg.poll_max_results, None)
        .await
        .map_err(map_poll_error)?;

    let mut new_count = 0u32;
    let mut skipped_count = 0u32;

    for entry in list.messages.unwrap_or_default() {
        let Some(message_id) = entry.id else { continue };

        if EmailQueueCtrl::exists(&state.conn, user_id, &message_id).await? {
            skipped_count += 1;
            continue;
        }

        let meta = match client.get_message_metadata(&message_id).await {
            Ok(meta) => meta,
            Err(e) if e.is_transient() => return Err(map_poll_error(e)),
            Err(e) => {
                // Permanent per-message failure must not sink the cycle
                tracing::error!("Skipping message {}: {:?}", message_id, e);
                continue;
            }
        };

        match EmailQueueCtrl::insert_pending(&state.conn, user_id, &meta).await {
            Ok(InsertOutcome::Inserted(_)) => new_count += 1,
            Ok(InsertOutcome::Duplicate) => skipped_count += 1,
            Err(e) => {
                tracing::error!("Could not enqueue message {}: {:?}", message_id, e);
            }
        }
    }

    Ok((new_count, skipped_count))
}

fn map_poll_error(e: MailApiError) -> AppError {
    if e.is_transient() {
        // Surfaces as retryable to the scheduled task
        AppError::TooManyRequests
    } else {
        e.into()
    }
}
