use std::collections::HashMap;

use entity::sea_orm_active_enums::{EmailClassification, Tone};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Named nodes of the per-mail state machine. The engine persists the step
/// with the state after every transition; a restart resumes at `step`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    ExtractContext,
    Classify,
    DetectPriority,
    DraftResponse,
    SendProposal,
    AwaitApproval,
    SendDraftNotification,
    AwaitDraftDecision,
    SendEmailResponse,
    ExecuteAction,
    SendConfirmation,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserDecision {
    Approve,
    Reject,
    ChangeFolder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftDecision {
    SendResponse,
    EditResponse,
    RejectResponse,
}

/// Checkpoint payload: everything a fresh call stack needs to continue.
/// Carried in the checkpoint row, never in session-attached objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub thread_id: String,
    pub email_id: i32,
    pub user_id: i32,
    pub step: WorkflowStep,

    pub gmail_message_id: String,
    pub gmail_thread_id: String,
    pub sender: String,
    pub subject: String,
    #[serde(default)]
    pub email_content: String,

    #[serde(default)]
    pub classification: Option<EmailClassification>,
    #[serde(default)]
    pub proposed_folder_id: Option<i32>,
    #[serde(default)]
    pub proposed_folder_name: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub priority_score: i32,
    #[serde(default)]
    pub is_priority: bool,
    #[serde(default)]
    pub detected_language: Option<String>,
    #[serde(default)]
    pub tone: Option<Tone>,
    #[serde(default)]
    pub has_draft: bool,

    #[serde(default)]
    pub user_decision: Option<UserDecision>,
    #[serde(default)]
    pub selected_folder_id: Option<i32>,
    #[serde(default)]
    pub draft_decision: Option<DraftDecision>,

    #[serde(default)]
    pub proposal_message_id: Option<i32>,
    #[serde(default)]
    pub draft_message_id: Option<i32>,
    #[serde(default)]
    pub draft_notified: bool,
    #[serde(default)]
    pub telegram_notification_failed: bool,

    // Per-node retry tally, carried across resumes so node-internal retries
    // and workflow-level restarts never compound past the cap
    #[serde(default)]
    pub node_retries: HashMap<String, u32>,
}

impl WorkflowState {
    pub fn new(
        thread_id: String,
        email: &entity::email_processing_queue::Model,
    ) -> Self {
        WorkflowState {
            thread_id,
            email_id: email.id,
            user_id: email.user_id,
            step: WorkflowStep::ExtractContext,
            gmail_message_id: email.gmail_message_id.clone(),
            gmail_thread_id: email.gmail_thread_id.clone(),
            sender: email.sender.clone(),
            subject: email.subject.clone(),
            email_content: String::new(),
            classification: None,
            proposed_folder_id: None,
            proposed_folder_name: None,
            reasoning: None,
            priority_score: 0,
            is_priority: false,
            detected_language: None,
            tone: None,
            has_draft: false,
            user_decision: None,
            selected_folder_id: None,
            draft_decision: None,
            proposal_message_id: None,
            draft_message_id: None,
            draft_notified: false,
            telegram_notification_failed: false,
            node_retries: HashMap::new(),
        }
    }

    pub fn retries_for(&self, step: WorkflowStep) -> u32 {
        self.node_retries.get(&step.to_string()).copied().unwrap_or(0)
    }

    pub fn bump_retries(&mut self, step: WorkflowStep) -> u32 {
        let counter = self.node_retries.entry(step.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Folder the action will apply: the user's pick when they changed it,
    /// otherwise the proposal.
    pub fn effective_folder_id(&self) -> Option<i32> {
        self.selected_folder_id.or(self.proposed_folder_id)
    }
}

/// What a node tells the engine to do next. `Interrupt` is the durable
/// sentinel: persist and unwind; an external resume continues later.
#[derive(Debug)]
pub enum NodeOutcome {
    Next(WorkflowStep),
    Interrupt,
    Done,
}

/// Payload merged into state by an external resume call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResumePayload {
    pub user_decision: Option<UserDecision>,
    pub selected_folder_id: Option<i32>,
    pub draft_decision: Option<DraftDecision>,
    pub edited_draft: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> WorkflowState {
        WorkflowState {
            thread_id: "email-1-abc".to_string(),
            email_id: 1,
            user_id: 2,
            step: WorkflowStep::AwaitApproval,
            gmail_message_id: "m1".to_string(),
            gmail_thread_id: "t1".to_string(),
            sender: "a@b.c".to_string(),
            subject: "s".to_string(),
            email_content: "body".to_string(),
            classification: Some(EmailClassification::NeedsResponse),
            proposed_folder_id: Some(10),
            proposed_folder_name: Some("Work".to_string()),
            reasoning: Some("r".to_string()),
            priority_score: 85,
            is_priority: true,
            detected_language: Some("en".to_string()),
            tone: Some(Tone::Professional),
            has_draft: true,
            user_decision: None,
            selected_folder_id: None,
            draft_decision: None,
            proposal_message_id: Some(42),
            draft_message_id: None,
            draft_notified: false,
            telegram_notification_failed: false,
            node_retries: HashMap::new(),
        }
    }

    #[test]
    fn test_state_survives_checkpoint_roundtrip() {
        let state = sample_state();
        let json = serde_json::to_value(&state).unwrap();
        let restored: WorkflowState = serde_json::from_value(json).unwrap();
        assert_eq!(restored.step, WorkflowStep::AwaitApproval);
        assert_eq!(restored.proposal_message_id, Some(42));
        assert_eq!(restored.classification, Some(EmailClassification::NeedsResponse));
    }

    #[test]
    fn test_step_names_are_snake_case() {
        assert_eq!(WorkflowStep::ExtractContext.to_string(), "extract_context");
        assert_eq!(
            WorkflowStep::SendDraftNotification.to_string(),
            "send_draft_notification"
        );
    }

    #[test]
    fn test_retry_tally_accumulates() {
        let mut state = sample_state();
        assert_eq!(state.retries_for(WorkflowStep::ExecuteAction), 0);
        assert_eq!(state.bump_retries(WorkflowStep::ExecuteAction), 1);
        assert_eq!(state.bump_retries(WorkflowStep::ExecuteAction), 2);
        assert_eq!(state.retries_for(WorkflowStep::ExecuteAction), 2);
    }

    #[test]
    fn test_effective_folder_prefers_user_selection() {
        let mut state = sample_state();
        assert_eq!(state.effective_folder_id(), Some(10));
        state.selected_folder_id = Some(11);
        assert_eq!(state.effective_folder_id(), Some(11));
    }

    #[test]
    fn test_old_checkpoint_without_new_fields_still_loads() {
        // Minimal payload as an older engine version would have written it
        let json = serde_json::json!({
            "thread_id": "email-1-x",
            "email_id": 1,
            "user_id": 2,
            "step": "classify",
            "gmail_message_id": "m",
            "gmail_thread_id": "t",
            "sender": "a@b.c",
            "subject": "s"
        });
        let state: WorkflowState = serde_json::from_value(json).unwrap();
        assert_eq!(state.step, WorkflowStep::Classify);
        assert!(!state.telegram_notification_failed);
    }
}
