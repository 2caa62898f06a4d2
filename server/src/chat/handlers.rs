//! Telegram update handling: inline-keyboard callbacks resolve the paused
//! workflow through WorkflowMapping and resume it; text messages feed the
//! edit flow and the /retry command.

use std::sync::Arc;

use dashmap::DashMap;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::dptree;
use teloxide::prelude::*;

use crate::{
    chat::{client::ChatClient, render, render::CallbackAction},
    model::{email_queue::EmailQueueCtrl, folder::FolderCategoryCtrl, user::UserCtrl, workflow::WorkflowMappingCtrl},
    workflow::{DraftDecision, ResumePayload, UserDecision, WorkflowEngine},
    ServerState,
};

pub struct ChatRuntime {
    pub state: ServerState,
    pub engine: WorkflowEngine,
    // chat id → email id awaiting replacement draft text
    pending_edits: DashMap<i64, i32>,
}

impl ChatRuntime {
    pub fn new(state: ServerState, engine: WorkflowEngine) -> Arc<Self> {
        Arc::new(ChatRuntime {
            state,
            engine,
            pending_edits: DashMap::new(),
        })
    }
}

pub fn spawn_dispatcher(rt: Arc<ChatRuntime>) -> tokio::task::JoinHandle<()> {
    let bot = rt.state.bot.clone();
    tokio::spawn(async move {
        let handler = dptree::entry()
            .branch(Update::filter_callback_query().endpoint(handle_callback))
            .branch(Update::filter_message().endpoint(handle_message));

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![rt])
            .default_handler(|_| async {})
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    })
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    rt: Arc<ChatRuntime>,
) -> ResponseResult<()> {
    let chat = ChatClient::new(bot);

    // Acknowledge first so the chat client never times out waiting on the
    // workflow resume
    if let Err(e) = chat.answer_callback(&q.id).await {
        tracing::warn!("Could not acknowledge callback: {e}");
    }

    let Some(action) = q.data.as_deref().and_then(render::parse_callback) else {
        tracing::warn!("Unparseable callback data: {:?}", q.data);
        return Ok(());
    };

    if let Err(e) = dispatch_callback(&chat, &q, &rt, action).await {
        tracing::error!("Callback handling failed for {:?}: {:?}", action, e);
    }

    Ok(())
}

async fn dispatch_callback(
    chat: &ChatClient,
    q: &CallbackQuery,
    rt: &Arc<ChatRuntime>,
    action: CallbackAction,
) -> crate::error::AppResult<()> {
    let conn = &rt.state.conn;
    let chat_id = q.from.id.0 as i64;

    let email_id = match action {
        CallbackAction::Approve(id)
        | CallbackAction::Reject(id)
        | CallbackAction::ChangeFolder(id)
        | CallbackAction::SendResponse(id)
        | CallbackAction::EditResponse(id)
        | CallbackAction::RejectResponse(id) => id,
        CallbackAction::SelectFolder { email_id, .. } => email_id,
    };

    let email = EmailQueueCtrl::get(conn, email_id).await?;
    let user = UserCtrl::get_by_id(conn, email.user_id).await?;
    if user.telegram_chat_id != Some(chat_id) {
        tracing::warn!(
            "Callback for email {} from unexpected chat {}, ignoring",
            email_id,
            chat_id
        );
        return Ok(());
    }

    match action {
        CallbackAction::ChangeFolder(_) => {
            // Swap the proposal keyboard for the folder picker; the actual
            // resume happens on folder selection
            let folders = FolderCategoryCtrl::all_for_user(conn, email.user_id).await?;
            let options = folders
                .iter()
                .map(|f| (f.id, f.name.clone()))
                .collect::<Vec<_>>();
            if let Some(message) = &q.message {
                if let Err(e) = chat
                    .edit_message_keyboard(
                        message.chat().id.0,
                        message.id().0,
                        render::folder_keyboard(email_id, &options),
                    )
                    .await
                {
                    tracing::warn!("Could not show folder picker: {e}");
                }
            }
            return Ok(());
        }
        CallbackAction::EditResponse(_) => {
            // Next plain-text message from this chat becomes the new draft
            rt.pending_edits.insert(chat_id, email_id);
            if let Err(e) = chat
                .send_message(chat_id, "✏️ Send me the new reply text.", None)
                .await
            {
                tracing::warn!("Could not prompt for edited draft: {e}");
            }
            return Ok(());
        }
        _ => {}
    }

    let payload = match action {
        CallbackAction::Approve(_) => ResumePayload {
            user_decision: Some(UserDecision::Approve),
            ..Default::default()
        },
        CallbackAction::Reject(_) => ResumePayload {
            user_decision: Some(UserDecision::Reject),
            ..Default::default()
        },
        CallbackAction::SelectFolder { folder_id, .. } => ResumePayload {
            user_decision: Some(UserDecision::ChangeFolder),
            selected_folder_id: Some(folder_id),
            ..Default::default()
        },
        CallbackAction::SendResponse(_) => ResumePayload {
            draft_decision: Some(DraftDecision::SendResponse),
            ..Default::default()
        },
        CallbackAction::RejectResponse(_) => ResumePayload {
            draft_decision: Some(DraftDecision::RejectResponse),
            ..Default::default()
        },
        CallbackAction::ChangeFolder(_) | CallbackAction::EditResponse(_) => unreachable!(),
    };

    let mapping = WorkflowMappingCtrl::by_email_id(conn, email_id)
        .await?
        .ok_or(crate::error::AppError::NotFound(format!(
            "No workflow mapping for email {email_id}"
        )))?;

    rt.engine.resume(&mapping.thread_id, payload).await?;
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, rt: Arc<ChatRuntime>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat = ChatClient::new(bot);
    let chat_id = msg.chat.id.0;

    if let Some(rest) = text.trim().strip_prefix("/retry") {
        match rest.trim().parse::<i32>() {
            Ok(email_id) => {
                let reply = match rt.engine.retry_email(email_id).await {
                    Ok(()) => format!("🔄 Retrying email {email_id}."),
                    Err(e) => {
                        tracing::error!("Manual retry of {} failed: {:?}", email_id, e);
                        format!("Could not retry email {email_id}.")
                    }
                };
                if let Err(e) = chat.send_message(chat_id, &reply, None).await {
                    tracing::warn!("Could not answer /retry: {e}");
                }
            }
            Err(_) => {
                let _ = chat
                    .send_message(chat_id, "Usage: /retry {email_id}", None)
                    .await;
            }
        }
        return Ok(());
    }

    if let Some((_, email_id)) = rt.pending_edits.remove(&chat_id) {
        if let Err(e) = apply_edited_draft(&rt, email_id, text).await {
            tracing::error!("Could not apply edited draft for {}: {:?}", email_id, e);
            let _ = chat
                .send_message(chat_id, "Could not update the draft, please try again.", None)
                .await;
        }
    }

    Ok(())
}

async fn apply_edited_draft(
    rt: &Arc<ChatRuntime>,
    email_id: i32,
    text: &str,
) -> crate::error::AppResult<()> {
    let mapping = WorkflowMappingCtrl::by_email_id(&rt.state.conn, email_id)
        .await?
        .ok_or(crate::error::AppError::NotFound(format!(
            "No workflow mapping for email {email_id}"
        )))?;

    rt.engine
        .resume(
            &mapping.thread_id,
            ResumePayload {
                edited_draft: Some(text.to_string()),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}
