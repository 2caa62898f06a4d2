pub use super::approval_history::Entity as ApprovalHistory;
pub use super::dead_letter_queue::Entity as DeadLetterQueue;
pub use super::email_processing_queue::Entity as EmailProcessingQueue;
pub use super::folder_category::Entity as FolderCategory;
pub use super::indexing_progress::Entity as IndexingProgress;
pub use super::manual_notification::Entity as ManualNotification;
pub use super::user::Entity as User;
pub use super::workflow_checkpoint::Entity as WorkflowCheckpoint;
pub use super::workflow_mapping::Entity as WorkflowMapping;
