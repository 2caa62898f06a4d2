//! Node implementations of the per-mail state machine. Every node opens
//! fresh database work, commits its side effects, and is safe to re-execute
//! after a crash between checkpoints.

use anyhow::anyhow;
use entity::sea_orm_active_enums::WorkflowState as MappingState;
use metrics::{counter, gauge, histogram};

use crate::{
    chat::{
        approval::{ApprovalChannel, DeliveryOutcome},
        client::ChatClient,
        render,
    },
    db_core::prelude::*,
    llm::{classification::ClassificationService, priority, response::ResponseGenerationService},
    mail::{client::GmailClient, BodyType, SendEmailOptions},
    model::{
        approval::ApprovalHistoryCtrl,
        dlq::{format_dlq_reason, DeadLetterCtrl},
        email_queue::EmailQueueCtrl,
        folder::FolderCategoryCtrl,
        user::UserCtrl,
        workflow::WorkflowMappingCtrl,
    },
    rag::{context::ContextRetrievalService, indexing::IndexingService},
    workflow::{
        engine::NodeError,
        state::{DraftDecision, NodeOutcome, UserDecision, WorkflowState, WorkflowStep},
    },
    ServerState,
};

pub async fn execute(
    ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    match st.step {
        WorkflowStep::ExtractContext => extract_context(ctx, st).await,
        WorkflowStep::Classify => classify(ctx, st).await,
        WorkflowStep::DetectPriority => detect_priority(ctx, st).await,
        WorkflowStep::DraftResponse => draft_response(ctx, st).await,
        WorkflowStep::SendProposal => send_proposal(ctx, st).await,
        WorkflowStep::AwaitApproval => await_approval(ctx, st).await,
        WorkflowStep::SendDraftNotification => send_draft_notification(ctx, st).await,
        WorkflowStep::AwaitDraftDecision => await_draft_decision(ctx, st).await,
        WorkflowStep::SendEmailResponse => send_email_response(ctx, st).await,
        WorkflowStep::ExecuteAction => execute_action(ctx, st).await,
        WorkflowStep::SendConfirmation => send_confirmation(ctx, st).await,
        WorkflowStep::Done => Ok(NodeOutcome::Done),
    }
}

fn gmail_client(ctx: &ServerState, user_id: i32) -> GmailClient {
    GmailClient::new(ctx.http_client.clone(), ctx.conn.clone(), user_id)
}

fn approval_channel(ctx: &ServerState) -> ApprovalChannel {
    ApprovalChannel::new(ctx.conn.clone(), ChatClient::new(ctx.bot.clone()))
}

async fn chat_id_for(ctx: &ServerState, user_id: i32) -> Result<i64, NodeError> {
    let user = UserCtrl::get_by_id(&ctx.conn, user_id).await?;
    user.telegram_chat_id.ok_or_else(|| {
        NodeError::permanent(
            "no_chat_channel",
            anyhow!("User {user_id} has no chat channel connected"),
        )
    })
}

/// Node 1: load the queue row, fetch the full body, flip to processing.
async fn extract_context(
    ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    let email = EmailQueueCtrl::get(&ctx.conn, st.email_id).await?;
    EmailQueueCtrl::set_status(&ctx.conn, st.email_id, EmailStatus::Processing).await?;

    let client = gmail_client(ctx, st.user_id);
    let message = client.get_sanitized_message(&email.gmail_message_id).await?;

    st.email_content = message.body.unwrap_or_else(|| message.snippet.clone());
    if let Some(sender) = message.sender {
        st.sender = sender;
    }
    if let Some(subject) = message.subject {
        st.subject = subject;
    }

    Ok(NodeOutcome::Next(WorkflowStep::Classify))
}

/// Node 2: RAG context + LLM classification, persisted into the queue row.
async fn classify(ctx: &ServerState, st: &mut WorkflowState) -> Result<NodeOutcome, NodeError> {
    let email = EmailQueueCtrl::get(&ctx.conn, st.email_id).await?;

    let context_service = ContextRetrievalService::new(
        ctx.conn.clone(),
        ctx.http_client.clone(),
        ctx.rate_limiters.clone(),
    );
    let rag = context_service.retrieve(&email, &st.email_content).await?;

    let service = ClassificationService::new(
        ctx.conn.clone(),
        ctx.http_client.clone(),
        ctx.rate_limiters.clone(),
    );
    let outcome = service.classify(&email, &st.email_content, &rag).await?;

    st.classification = Some(outcome.classification);
    st.proposed_folder_id = Some(outcome.folder_id);
    st.proposed_folder_name = Some(outcome.folder_name);
    st.reasoning = Some(outcome.reasoning);
    st.priority_score = outcome.priority_score;
    st.detected_language = Some(outcome.detected_language);
    st.tone = Some(outcome.tone);
    st.has_draft = outcome.response_draft.is_some();

    Ok(NodeOutcome::Next(WorkflowStep::DetectPriority))
}

/// Node 3: deterministic priority rules on top of the model's score.
async fn detect_priority(
    ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    let user = UserCtrl::get_by_id(&ctx.conn, st.user_id).await?;
    let priority_senders = UserCtrl::priority_senders(&user);

    let body_preview: String = st.email_content.chars().take(200).collect();
    let assessment = priority::assess(&st.sender, &st.subject, &body_preview, &priority_senders);

    st.priority_score = priority::combine(st.priority_score, assessment.score_delta);
    st.is_priority = priority::is_priority(st.priority_score);
    if !assessment.reasons.is_empty() {
        tracing::info!(
            "Email {} priority {} ({:?})",
            st.email_id,
            st.priority_score,
            assessment.reasons
        );
    }

    EmailQueueCtrl::set_priority(&ctx.conn, st.email_id, st.priority_score, st.is_priority)
        .await?;

    let next = if st.classification == Some(EmailClassification::NeedsResponse) && !st.has_draft {
        WorkflowStep::DraftResponse
    } else {
        WorkflowStep::SendProposal
    };
    Ok(NodeOutcome::Next(next))
}

/// Node 3.5: draft generation for needs_response mail that got no draft from
/// the classification call. A failure here degrades to proposal-without-
/// draft; the notification node can re-invoke generation later.
async fn draft_response(
    ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    let email = EmailQueueCtrl::get(&ctx.conn, st.email_id).await?;
    if email.draft_response.is_some() {
        st.has_draft = true;
        return Ok(NodeOutcome::Next(WorkflowStep::SendProposal));
    }

    let context_service = ContextRetrievalService::new(
        ctx.conn.clone(),
        ctx.http_client.clone(),
        ctx.rate_limiters.clone(),
    );
    let rag = context_service.retrieve(&email, &st.email_content).await?;

    let service = ResponseGenerationService::new(
        ctx.conn.clone(),
        ctx.http_client.clone(),
        ctx.rate_limiters.clone(),
    );
    match service.generate(&email, &st.email_content, &rag).await {
        Ok(_) => st.has_draft = true,
        Err(e) => {
            tracing::error!(
                "Draft generation failed for email {}, continuing without draft: {:?}",
                st.email_id,
                e
            );
        }
    }

    Ok(NodeOutcome::Next(WorkflowStep::SendProposal))
}

/// Node 4: render and deliver the sorting proposal, then park for approval.
/// The mapping row carries the chat message id before the interrupt commits.
async fn send_proposal(
    ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    // Crash-resume guard: an already-delivered proposal is reused, not
    // re-sent
    if st.proposal_message_id.is_some() {
        EmailQueueCtrl::set_status(&ctx.conn, st.email_id, EmailStatus::AwaitingApproval).await?;
        return Ok(NodeOutcome::Next(WorkflowStep::AwaitApproval));
    }

    let chat_id = chat_id_for(ctx, st.user_id).await?;
    let view = render::ProposalView {
        sender: &st.sender,
        subject: &st.subject,
        body_preview: &st.email_content,
        folder_name: st.proposed_folder_name.as_deref().unwrap_or("Important"),
        reasoning: st.reasoning.as_deref().unwrap_or(""),
        is_priority: st.is_priority,
        needs_response: st.classification == Some(EmailClassification::NeedsResponse),
        has_draft: st.has_draft,
    };
    let text = render::proposal_message(&view);
    let keyboard = render::proposal_keyboard(st.email_id);

    let channel = approval_channel(ctx);
    match channel
        .deliver(chat_id, st.email_id, &text, Some(keyboard))
        .await?
    {
        DeliveryOutcome::Sent(message_id) => {
            st.proposal_message_id = Some(message_id);
            WorkflowMappingCtrl::set_message_id(&ctx.conn, st.email_id, Some(message_id)).await?;
        }
        DeliveryOutcome::QueuedManual => {
            st.telegram_notification_failed = true;
        }
    }

    EmailQueueCtrl::set_status(&ctx.conn, st.email_id, EmailStatus::AwaitingApproval).await?;
    WorkflowMappingCtrl::set_state(&ctx.conn, st.email_id, MappingState::AwaitingApproval)
        .await?;

    Ok(NodeOutcome::Next(WorkflowStep::AwaitApproval))
}

/// Conditional edge after the sorting decision: rejects and sort-only mail
/// go straight to the action, approved needs_response mail detours through
/// draft review.
pub fn route_after_approval(
    decision: UserDecision,
    classification: Option<EmailClassification>,
) -> WorkflowStep {
    match decision {
        UserDecision::Reject => WorkflowStep::ExecuteAction,
        UserDecision::Approve | UserDecision::ChangeFolder => {
            if classification == Some(EmailClassification::NeedsResponse) {
                WorkflowStep::SendDraftNotification
            } else {
                WorkflowStep::ExecuteAction
            }
        }
    }
}

/// Interrupt point: waits for the sorting decision, then routes.
async fn await_approval(
    _ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    let Some(decision) = st.user_decision else {
        return Ok(NodeOutcome::Interrupt);
    };

    Ok(NodeOutcome::Next(route_after_approval(
        decision,
        st.classification,
    )))
}

/// Node 7: deliver (or in-place update) the draft review message.
async fn send_draft_notification(
    ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    let email = EmailQueueCtrl::get(&ctx.conn, st.email_id).await?;

    let draft = match email.draft_response.clone() {
        Some(draft) => draft,
        None => {
            // Classification promised needs_response but produced no draft;
            // generation is re-invokable here
            let context_service = ContextRetrievalService::new(
                ctx.conn.clone(),
                ctx.http_client.clone(),
                ctx.rate_limiters.clone(),
            );
            let rag = context_service.retrieve(&email, &st.email_content).await?;
            let service = ResponseGenerationService::new(
                ctx.conn.clone(),
                ctx.http_client.clone(),
                ctx.rate_limiters.clone(),
            );
            service.generate(&email, &st.email_content, &rag).await?
        }
    };
    st.has_draft = true;

    let chat_id = chat_id_for(ctx, st.user_id).await?;
    let view = render::DraftView {
        sender: &st.sender,
        subject: &st.subject,
        language: st.detected_language.as_deref().unwrap_or("en"),
        tone: st.tone,
        draft: &draft,
    };
    let text = render::draft_message(&view);
    let keyboard = render::draft_keyboard(st.email_id);

    let channel = approval_channel(ctx);
    let outcome = match (st.draft_notified, st.draft_message_id) {
        // Edit-flow re-entry: refresh the existing message, no second send
        (true, Some(message_id)) => {
            channel
                .deliver_edit(chat_id, st.email_id, message_id, &text, Some(keyboard))
                .await?
        }
        _ => {
            channel
                .deliver(chat_id, st.email_id, &text, Some(keyboard))
                .await?
        }
    };

    match outcome {
        DeliveryOutcome::Sent(message_id) => {
            st.draft_message_id = Some(message_id);
            st.draft_notified = true;
            // The draft message replaces the proposal as the live message
            WorkflowMappingCtrl::set_message_id(&ctx.conn, st.email_id, Some(message_id)).await?;
        }
        DeliveryOutcome::QueuedManual => {
            st.telegram_notification_failed = true;
        }
    }

    EmailQueueCtrl::set_status(&ctx.conn, st.email_id, EmailStatus::AwaitingDraftApproval)
        .await?;
    WorkflowMappingCtrl::set_state(
        &ctx.conn,
        st.email_id,
        MappingState::AwaitingDraftApproval,
    )
    .await?;

    Ok(NodeOutcome::Next(WorkflowStep::AwaitDraftDecision))
}

/// Second interrupt point: waits for send/edit/reject on the draft.
async fn await_draft_decision(
    _ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    match st.draft_decision {
        None => Ok(NodeOutcome::Interrupt),
        Some(DraftDecision::SendResponse) => {
            Ok(NodeOutcome::Next(WorkflowStep::SendEmailResponse))
        }
        Some(DraftDecision::RejectResponse) => Ok(NodeOutcome::Next(WorkflowStep::ExecuteAction)),
        // Edit is handled out-of-band: the callback stores a pending-reply
        // hook and the resume carrying the new text re-enters the
        // notification node; a bare edit decision keeps waiting
        Some(DraftDecision::EditResponse) => Ok(NodeOutcome::Interrupt),
    }
}

/// Node 9: send the reply. email_sent_at is the idempotency gate (I3).
async fn send_email_response(
    ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    let email = EmailQueueCtrl::get(&ctx.conn, st.email_id).await?;

    if email.email_sent_at.is_some() {
        tracing::info!("Email {} already sent a response, skipping send", st.email_id);
        return Ok(NodeOutcome::Next(WorkflowStep::ExecuteAction));
    }

    let draft = email.draft_response.clone().ok_or_else(|| {
        NodeError::permanent(
            "missing_draft",
            anyhow!("Email {} reached send_email_response without a draft", st.email_id),
        )
    })?;

    let subject = if email.subject.to_lowercase().starts_with("re:") {
        email.subject.clone()
    } else {
        format!("Re: {}", email.subject)
    };

    let client = gmail_client(ctx, st.user_id);
    client
        .send_email(SendEmailOptions {
            to: email.sender.clone(),
            subject,
            body: draft.clone(),
            body_type: BodyType::Plain,
            in_reply_to: None,
            references: None,
            thread_id: Some(email.gmail_thread_id.clone()),
        })
        .await?;

    if !EmailQueueCtrl::mark_email_sent_once(&ctx.conn, st.email_id).await? {
        tracing::warn!(
            "Email {} send raced another pass; sent-at already stamped",
            st.email_id
        );
    }

    // The sent reply becomes future context for this correspondent;
    // indexing failure never blocks the pipeline
    let indexing = IndexingService::new(
        ctx.conn.clone(),
        ctx.http_client.clone(),
        ctx.rate_limiters.clone(),
        ChatClient::new(ctx.bot.clone()),
    );
    if let Err(e) = indexing.index_sent_response(&email, &draft).await {
        tracing::warn!("Could not index sent response for {}: {:?}", st.email_id, e);
    }

    Ok(NodeOutcome::Next(WorkflowStep::ExecuteAction))
}

/// Node 10: apply the chosen folder's label (or record the rejection) and
/// append the audit row. Gated on terminal status for idempotency.
async fn execute_action(
    ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    let email = EmailQueueCtrl::get(&ctx.conn, st.email_id).await?;

    if matches!(
        email.status,
        EmailStatus::Completed | EmailStatus::Rejected | EmailStatus::ResponseSent
    ) {
        return Ok(NodeOutcome::Next(WorkflowStep::SendConfirmation));
    }

    if st.user_decision == Some(UserDecision::Reject) {
        EmailQueueCtrl::set_status(&ctx.conn, st.email_id, EmailStatus::Rejected).await?;
        ApprovalHistoryCtrl::record(
            &ctx.conn,
            st.user_id,
            st.email_id,
            ApprovalActionType::Reject,
            st.proposed_folder_id,
            None,
            false,
        )
        .await?;
        WorkflowMappingCtrl::set_state(&ctx.conn, st.email_id, MappingState::Rejected).await?;
        return Ok(NodeOutcome::Next(WorkflowStep::SendConfirmation));
    }

    let folder_id = st.effective_folder_id().ok_or_else(|| {
        NodeError::permanent(
            "missing_folder",
            anyhow!("Email {} has no folder to apply", st.email_id),
        )
    })?;
    // Ownership check: the folder must belong to this user (I4)
    let mut folder = FolderCategoryCtrl::get_for_user(&ctx.conn, st.user_id, folder_id).await?;

    let client = gmail_client(ctx, st.user_id);

    // First use of a folder: provision its Gmail label. create_label
    // resolves a name conflict to the existing label's id
    if folder.label_id.is_empty() {
        let label_id = client.create_label(&folder.name, None, "labelShow").await?;
        FolderCategoryCtrl::set_label_id(&ctx.conn, folder.id, &label_id).await?;
        folder.label_id = label_id;
    }

    client
        .apply_label(&email.gmail_message_id, &folder.label_id)
        .await?;

    let final_status = if email.email_sent_at.is_some() {
        EmailStatus::ResponseSent
    } else {
        EmailStatus::Completed
    };
    EmailQueueCtrl::set_status(&ctx.conn, st.email_id, final_status).await?;

    let action_type = match st.user_decision {
        Some(UserDecision::ChangeFolder) => ApprovalActionType::ChangeFolder,
        _ => ApprovalActionType::Approve,
    };
    ApprovalHistoryCtrl::record(
        &ctx.conn,
        st.user_id,
        st.email_id,
        action_type,
        st.proposed_folder_id,
        Some(folder.id),
        true,
    )
    .await?;
    WorkflowMappingCtrl::set_state(&ctx.conn, st.email_id, MappingState::Sent).await?;

    // The sorted mail itself becomes retrieval context once the user's
    // backfill is complete; failures never block the pipeline
    let indexing = IndexingService::new(
        ctx.conn.clone(),
        ctx.http_client.clone(),
        ctx.rate_limiters.clone(),
        ChatClient::new(ctx.bot.clone()),
    );
    if let Err(e) = indexing
        .index_new_email(st.user_id, &email.gmail_message_id)
        .await
    {
        tracing::warn!("Could not index processed mail {}: {:?}", st.email_id, e);
    }

    Ok(NodeOutcome::Next(WorkflowStep::SendConfirmation))
}

/// Node 11: clean up the proposal/draft messages and leave one summary.
/// Confirmation failures are silent (logged only).
async fn send_confirmation(
    ctx: &ServerState,
    st: &mut WorkflowState,
) -> Result<NodeOutcome, NodeError> {
    let email = EmailQueueCtrl::get(&ctx.conn, st.email_id).await?;
    let chat_id = match chat_id_for(ctx, st.user_id).await {
        Ok(chat_id) => chat_id,
        Err(_) => return Ok(NodeOutcome::Done),
    };

    let channel = approval_channel(ctx);
    if let Some(message_id) = st.proposal_message_id {
        channel.delete_quiet(chat_id, message_id).await;
    }
    if let Some(message_id) = st.draft_message_id {
        channel.delete_quiet(chat_id, message_id).await;
    }

    let folder_name = st.proposed_folder_name.clone();
    let selected_name = match st.selected_folder_id {
        Some(folder_id) => FolderCategoryCtrl::get_for_user(&ctx.conn, st.user_id, folder_id)
            .await
            .ok()
            .map(|f| f.name),
        None => None,
    };

    let text = render::confirmation_message(
        &st.subject,
        selected_name.as_deref().or(folder_name.as_deref()),
        email.status == EmailStatus::Rejected,
        email.status == EmailStatus::ResponseSent,
    );
    channel.send_quiet(chat_id, &text).await;

    WorkflowMappingCtrl::set_message_id(&ctx.conn, st.email_id, None).await?;

    Ok(NodeOutcome::Done)
}

/// Exhaustion path shared by every node: queue row to error, DLQ entry,
/// metrics, and a user-visible failure message with the manual retry hint.
pub async fn fail_workflow(
    ctx: &ServerState,
    st: &mut WorkflowState,
    step: WorkflowStep,
    node_error: &NodeError,
) -> crate::error::AppResult<()> {
    let email = EmailQueueCtrl::get(&ctx.conn, st.email_id).await?;

    let (action, operation_type) = match step {
        WorkflowStep::ExecuteAction => ("apply Gmail label", "apply_label"),
        WorkflowStep::SendEmailResponse => ("send email response", "send_email"),
        WorkflowStep::ExtractContext => ("fetch email content", "fetch_message"),
        WorkflowStep::Classify => ("classify email", "classify"),
        WorkflowStep::DraftResponse | WorkflowStep::SendDraftNotification => {
            ("generate response draft", "draft_response")
        }
        _ => ("process email", "process_email"),
    };

    let (folder_name, label_id) = match st.effective_folder_id() {
        Some(folder_id) => {
            match FolderCategoryCtrl::get_for_user(&ctx.conn, st.user_id, folder_id).await {
                Ok(folder) => (folder.name, folder.label_id),
                Err(_) => ("unknown".to_string(), "unknown".to_string()),
            }
        }
        None => ("unknown".to_string(), "unknown".to_string()),
    };

    let error_message = node_error.error.to_string();
    let dlq_reason = format_dlq_reason(
        action,
        cfg_retries(),
        node_error.error_type,
        &error_message,
        st.email_id,
        &email.gmail_message_id,
        &folder_name,
        &label_id,
    );

    EmailQueueCtrl::mark_error(
        &ctx.conn,
        st.email_id,
        node_error.error_type,
        &error_message,
        &dlq_reason,
        cfg_retries() as i32,
    )
    .await?;

    let label_for_dlq = match step {
        WorkflowStep::ExecuteAction => Some(label_id.as_str()),
        _ => None,
    };
    DeadLetterCtrl::insert(
        &ctx.conn,
        &email,
        operation_type,
        label_for_dlq,
        node_error.error_type,
        &error_message,
    )
    .await?;

    let user_label = st.user_id.to_string();
    counter!(
        "email_processing_errors_total",
        "error_type" => node_error.error_type,
        "user_id" => user_label.clone()
    )
    .increment(1);
    counter!(
        "email_dlq_total",
        "error_type" => node_error.error_type,
        "user_id" => user_label
    )
    .increment(1);
    histogram!("email_retry_count").record(st.retries_for(step) as f64);
    gauge!(
        "emails_in_error_state",
        "error_type" => node_error.error_type
    )
    .increment(1.0);

    if let Ok(chat_id) = chat_id_for(ctx, st.user_id).await {
        let channel = approval_channel(ctx);
        channel
            .send_quiet(chat_id, &render::error_message(st.email_id, &st.subject))
            .await;
    }

    Ok(())
}

fn cfg_retries() -> u32 {
    crate::server_config::cfg.max_node_retries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_only_approval_skips_draft_review() {
        // Government mail approved as-is: straight to execute_action, no
        // draft step involved
        let next = route_after_approval(
            UserDecision::Approve,
            Some(EmailClassification::SortOnly),
        );
        assert_eq!(next, WorkflowStep::ExecuteAction);
    }

    #[test]
    fn test_needs_response_approval_detours_through_draft() {
        for decision in [UserDecision::Approve, UserDecision::ChangeFolder] {
            let next =
                route_after_approval(decision, Some(EmailClassification::NeedsResponse));
            assert_eq!(next, WorkflowStep::SendDraftNotification);
        }
    }

    #[test]
    fn test_reject_never_reaches_draft_review() {
        for classification in [
            Some(EmailClassification::SortOnly),
            Some(EmailClassification::NeedsResponse),
            None,
        ] {
            let next = route_after_approval(UserDecision::Reject, classification);
            assert_eq!(next, WorkflowStep::ExecuteAction);
        }
    }
}
