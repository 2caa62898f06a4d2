//! Scheduled entry points wired into the job scheduler: polling, workflow
//! dispatch, indexing supervision, notification replay and retention.

use chrono::{Duration, Utc};
use teloxide::types::InlineKeyboardMarkup;

use crate::{
    chat::client::ChatClient,
    db_core::prelude::*,
    error::AppResult,
    mail::poller,
    model::{
        email_queue::EmailQueueCtrl, indexing::IndexingProgressCtrl,
        notification::ManualNotificationCtrl, user::UserCtrl,
    },
    rag::indexing::IndexingService,
    server_config::cfg,
    workflow::WorkflowEngine,
    ServerState,
};

/// Poll tick: sweep every mailbox, then hand new pending rows to the
/// workflow engine.
pub async fn poll_and_dispatch(
    state: ServerState,
    engine: WorkflowEngine,
) -> AppResult<()> {
    if let Err(e) = poller::poll_all_users(&state).await {
        tracing::error!("Polling sweep reported failures: {:?}", e);
    }
    dispatch_pending_workflows(state, engine).await
}

/// Starts a workflow for every pending queue row (bounded batch; the
/// engine's semaphore bounds actual parallelism).
pub async fn dispatch_pending_workflows(
    state: ServerState,
    engine: WorkflowEngine,
) -> AppResult<()> {
    let batch = (cfg.max_concurrent_workflows * 4) as u64;
    let pending = EmailQueueCtrl::find_pending(&state.conn, batch).await?;

    for email in pending {
        if let Err(e) = engine.start_email(&email).await {
            tracing::error!("Could not start workflow for email {}: {:?}", email.id, e);
        }
    }
    Ok(())
}

/// Crash recovery: rows parked in `processing` past the step wall-clock
/// limit get re-dispatched; the engine resumes from the last checkpoint.
pub async fn requeue_stale_processing(
    state: ServerState,
    engine: WorkflowEngine,
) -> AppResult<()> {
    let cutoff = Utc::now() - Duration::seconds(2 * cfg.workflow_step_timeout_seconds as i64);
    let stuck = EmailQueueCtrl::find_stuck_processing(&state.conn, cutoff).await?;

    for email in stuck {
        tracing::warn!("Re-dispatching stale workflow for email {}", email.id);
        if let Err(e) = engine.start_email(&email).await {
            tracing::error!("Could not re-dispatch email {}: {:?}", email.id, e);
        }
    }
    Ok(())
}

/// Scans for paused indexing jobs whose retry_after elapsed and resumes
/// them. The 30s updated_at cooldown in the query prevents storms.
pub async fn indexing_supervisor(state: ServerState) -> AppResult<()> {
    let resumable = IndexingProgressCtrl::find_resumable(&state.conn, Utc::now()).await?;

    for job in resumable {
        let service = IndexingService::new(
            state.conn.clone(),
            state.http_client.clone(),
            state.rate_limiters.clone(),
            ChatClient::new(state.bot.clone()),
        );
        let user_id = job.user_id;
        tokio::spawn(async move {
            if let Err(e) = service.resume_indexing(user_id).await {
                tracing::error!("Indexing resume failed for user {}: {:?}", user_id, e);
            }
        });
    }
    Ok(())
}

/// Retention pass: drop vectors older than the indexing window for every
/// active user.
pub async fn retention_cleanup(state: ServerState) -> AppResult<()> {
    let users = UserCtrl::all_active(&state.conn).await?;
    let service = IndexingService::new(
        state.conn.clone(),
        state.http_client.clone(),
        state.rate_limiters.clone(),
        ChatClient::new(state.bot.clone()),
    );

    for user in users {
        if let Err(e) = service.cleanup_old(user.id, cfg.indexing_days_back).await {
            tracing::error!("Retention cleanup failed for user {}: {:?}", user.id, e);
        }
    }
    Ok(())
}

/// Tier-3 replay: re-attempts chat messages parked in the manual queue.
pub async fn replay_manual_notifications(state: ServerState) -> AppResult<()> {
    let chat = ChatClient::new(state.bot.clone());
    let pending = ManualNotificationCtrl::pending(&state.conn, 50).await?;

    for row in pending {
        let keyboard = row
            .buttons_json
            .clone()
            .and_then(|v| serde_json::from_value::<InlineKeyboardMarkup>(v).ok());

        match chat
            .send_message(row.telegram_id, &row.message_text, keyboard)
            .await
        {
            Ok(_) => {
                ManualNotificationCtrl::set_status(&state.conn, row.id, NotificationStatus::Sent)
                    .await?;
            }
            Err(e) if e.is_transient() => {
                tracing::warn!("Manual notification {} still undeliverable: {e}", row.id);
            }
            Err(e) => {
                tracing::error!("Manual notification {} permanently failed: {e}", row.id);
                ManualNotificationCtrl::set_status(
                    &state.conn,
                    row.id,
                    NotificationStatus::Failed,
                )
                .await?;
            }
        }
    }
    Ok(())
}
