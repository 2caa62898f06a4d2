use std::time::Duration;

use anyhow::anyhow;
use derive_more::Display;
use uuid::Uuid;

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
    llm::LlmError,
    mail::MailApiError,
    model::{
        email_queue::EmailQueueCtrl,
        workflow::{CheckpointCtrl, WorkflowMappingCtrl},
    },
    server_config::cfg,
    workflow::{
        active::ActiveWorkflows,
        nodes,
        state::{NodeOutcome, ResumePayload, WorkflowState, WorkflowStep},
    },
    ServerState,
};

/// Typed node failure. `transient` failures re-enter the node up to
/// MAX_NODE_RETRIES (tallied across resumes); the rest go straight to the
/// dead-letter path.
#[derive(Debug)]
pub struct NodeError {
    pub transient: bool,
    pub error_type: &'static str,
    pub error: anyhow::Error,
}

impl NodeError {
    pub fn transient(error_type: &'static str, error: anyhow::Error) -> Self {
        NodeError {
            transient: true,
            error_type,
            error,
        }
    }

    pub fn permanent(error_type: &'static str, error: anyhow::Error) -> Self {
        NodeError {
            transient: false,
            error_type,
            error,
        }
    }
}

impl From<MailApiError> for NodeError {
    fn from(e: MailApiError) -> Self {
        // The Gmail client already ran its own backoff ladder; re-entering
        // the node would compound retry budgets, so surviving provider
        // errors go straight to the exhaustion path
        NodeError {
            transient: false,
            error_type: e.error_type(),
            error: e.into(),
        }
    }
}

impl From<LlmError> for NodeError {
    fn from(e: LlmError) -> Self {
        NodeError {
            transient: e.is_transient(),
            error_type: "llm_api_failure",
            error: e.into(),
        }
    }
}

impl From<AppError> for NodeError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::NotFound(msg) => NodeError::permanent("not_found", anyhow!(msg)),
            AppError::BadRequest(msg) => NodeError::permanent("invalid_request", anyhow!(msg)),
            AppError::Unauthorized(msg) => NodeError::permanent("auth_expired", anyhow!(msg)),
            AppError::Conflict(msg) => NodeError::permanent("conflict", anyhow!(msg)),
            AppError::EncryptToken | AppError::DecryptToken => {
                NodeError::permanent("token_crypt_error", anyhow!("token encryption failed"))
            }
            AppError::TooManyRequests => {
                NodeError::transient("rate_limited", anyhow!("rate limited"))
            }
            AppError::RequestTimeout => NodeError::transient("timeout", anyhow!("request timeout")),
            AppError::DbError(err) => NodeError::transient("database_error", err.into()),
            AppError::Internal(err) => NodeError::transient("internal_error", err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ResumeOutcome {
    Resumed,
    /// The decision was already recorded; duplicate callback delivery.
    Duplicate,
}

/// Durable, resumable state machine driver. Nodes run single-threaded per
/// thread id; state lives in the checkpoint row between nodes. Cheap to
/// clone: both fields are handles.
#[derive(Clone)]
pub struct WorkflowEngine {
    state: ServerState,
    active: ActiveWorkflows,
}

impl WorkflowEngine {
    pub fn new(state: ServerState) -> Self {
        WorkflowEngine {
            state,
            active: ActiveWorkflows::new(cfg.max_concurrent_workflows),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Registers a workflow for a queue row (idempotent) and schedules a
    /// run from its latest checkpoint.
    pub async fn start_email(&self, email: &email_processing_queue::Model) -> AppResult<()> {
        let thread_id = format!("email-{}-{}", email.id, Uuid::new_v4());
        let mapping = WorkflowMappingCtrl::create_or_get(
            &self.state.conn,
            email.id,
            email.user_id,
            &thread_id,
        )
        .await?;

        if CheckpointCtrl::load(&self.state.conn, &mapping.thread_id)
            .await?
            .is_none()
        {
            let fresh = WorkflowState::new(mapping.thread_id.clone(), email);
            self.save_checkpoint(&fresh).await?;
        }

        self.schedule(mapping.thread_id);
        Ok(())
    }

    /// `/retry {id}`: reset the queue row, discard the old checkpoint and
    /// start over from extract_context. The DLQ entry stays for audit.
    pub async fn retry_email(&self, email_id: i32) -> AppResult<()> {
        let mapping = WorkflowMappingCtrl::by_email_id(&self.state.conn, email_id)
            .await?
            .ok_or(AppError::NotFound(format!(
                "No workflow for email {email_id}"
            )))?;

        EmailQueueCtrl::reset_for_retry(&self.state.conn, email_id).await?;
        CheckpointCtrl::delete(&self.state.conn, &mapping.thread_id).await?;

        let email = EmailQueueCtrl::get(&self.state.conn, email_id).await?;
        let fresh = WorkflowState::new(mapping.thread_id.clone(), &email);
        self.save_checkpoint(&fresh).await?;

        self.schedule(mapping.thread_id);
        Ok(())
    }

    /// External continuation from a chat callback. Merges the payload into
    /// the checkpointed state; an already-set decision short-circuits so
    /// duplicate callback delivery is safe.
    pub async fn resume(
        &self,
        thread_id: &str,
        payload: ResumePayload,
    ) -> AppResult<ResumeOutcome> {
        let checkpoint = CheckpointCtrl::load(&self.state.conn, thread_id)
            .await?
            .ok_or(AppError::NotFound(format!(
                "No checkpoint for thread {thread_id}"
            )))?;
        let mut st: WorkflowState = serde_json::from_value(checkpoint.state)
            .map_err(|e| anyhow!("Corrupt checkpoint for {thread_id}: {e}"))?;

        if let Some(edited) = payload.edited_draft {
            // Edit flow: replace the draft and re-enter the notification
            // node; the message is edited in place, not re-sent
            EmailQueueCtrl::set_draft(&self.state.conn, st.email_id, &edited).await?;
            st.draft_decision = None;
            st.step = WorkflowStep::SendDraftNotification;
        } else if let Some(decision) = payload.draft_decision {
            if st.draft_decision.is_some() {
                tracing::info!("Duplicate draft decision for {thread_id}, ignoring");
                return Ok(ResumeOutcome::Duplicate);
            }
            st.draft_decision = Some(decision);
        } else if let Some(decision) = payload.user_decision {
            if st.user_decision.is_some() {
                tracing::info!("Duplicate user decision for {thread_id}, ignoring");
                return Ok(ResumeOutcome::Duplicate);
            }
            st.user_decision = Some(decision);
            st.selected_folder_id = payload.selected_folder_id;
        }

        self.save_checkpoint(&st).await?;
        self.schedule(thread_id.to_string());
        Ok(ResumeOutcome::Resumed)
    }

    pub fn schedule(&self, thread_id: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            let tid = thread_id.clone();
            engine
                .active
                .clone()
                .run_serialized(&tid, || async {
                    if let Err(e) = engine.run_loop(&tid).await {
                        tracing::error!("Workflow {} failed: {:?}", tid, e);
                    }
                })
                .await;
        });
    }

    async fn save_checkpoint(&self, st: &WorkflowState) -> AppResult<()> {
        let value = serde_json::to_value(st)
            .map_err(|e| anyhow!("Could not serialize workflow state: {e}"))?;
        CheckpointCtrl::save(&self.state.conn, &st.thread_id, &st.step.to_string(), value).await
    }

    /// Executes nodes from the latest checkpoint until the workflow parks
    /// at an interrupt, finishes, or exhausts the retry budget.
    async fn run_loop(&self, thread_id: &str) -> AppResult<()> {
        loop {
            let checkpoint = CheckpointCtrl::load(&self.state.conn, thread_id)
                .await?
                .ok_or(AppError::NotFound(format!(
                    "No checkpoint for thread {thread_id}"
                )))?;
            let mut st: WorkflowState = serde_json::from_value(checkpoint.state)
                .map_err(|e| anyhow!("Corrupt checkpoint for {thread_id}: {e}"))?;

            match st.step {
                WorkflowStep::Done => {
                    self.active.forget(thread_id);
                    return Ok(());
                }
                WorkflowStep::AwaitApproval if st.user_decision.is_none() => return Ok(()),
                WorkflowStep::AwaitDraftDecision if st.draft_decision.is_none() => return Ok(()),
                _ => {}
            }

            let step = st.step;
            let timeout = Duration::from_secs(cfg.workflow_step_timeout_seconds);
            let outcome = match tokio::time::timeout(
                timeout,
                nodes::execute(&self.state, &mut st),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(NodeError::transient(
                    "timeout",
                    anyhow!("node {step} exceeded wall-clock limit"),
                )),
            };

            match outcome {
                Ok(NodeOutcome::Next(next)) => {
                    st.step = next;
                    self.save_checkpoint(&st).await?;
                }
                Ok(NodeOutcome::Interrupt) => {
                    self.save_checkpoint(&st).await?;
                    return Ok(());
                }
                Ok(NodeOutcome::Done) => {
                    st.step = WorkflowStep::Done;
                    self.save_checkpoint(&st).await?;
                    self.active.forget(thread_id);
                    return Ok(());
                }
                Err(e) if e.transient => {
                    let retries = st.bump_retries(step);
                    self.save_checkpoint(&st).await?;
                    if retries >= cfg.max_node_retries {
                        tracing::error!(
                            "Node {} exhausted {} retries for {}: {:?}",
                            step,
                            retries,
                            thread_id,
                            e.error
                        );
                        nodes::fail_workflow(&self.state, &mut st, step, &e).await?;
                        st.step = WorkflowStep::Done;
                        self.save_checkpoint(&st).await?;
                        self.active.forget(thread_id);
                        return Ok(());
                    }
                    let delay = cfg.backoff_base_seconds * (1 << (retries - 1));
                    tracing::warn!(
                        "Node {} failed transiently for {} (attempt {}), backing off {}s: {:?}",
                        step,
                        thread_id,
                        retries,
                        delay,
                        e.error
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
                Err(e) => {
                    tracing::error!(
                        "Node {} failed permanently for {}: {:?}",
                        step,
                        thread_id,
                        e.error
                    );
                    nodes::fail_workflow(&self.state, &mut st, step, &e).await?;
                    st.step = WorkflowStep::Done;
                    self.save_checkpoint(&st).await?;
                    self.active.forget(thread_id);
                    return Ok(());
                }
            }
        }
    }
}
