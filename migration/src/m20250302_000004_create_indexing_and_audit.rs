use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IndexingProgress::Table)
                    .if_not_exists()
                    .col(pk_auto(IndexingProgress::Id))
                    .col(integer(IndexingProgress::UserId))
                    .col(integer(IndexingProgress::TotalEmails).default(0))
                    .col(integer(IndexingProgress::ProcessedCount).default(0))
                    .col(string_null(IndexingProgress::LastProcessedMessageId))
                    .col(string_len(IndexingProgress::Status, 32).default("in_progress"))
                    .col(integer(IndexingProgress::RetryCount).default(0))
                    .col(timestamp_with_time_zone_null(IndexingProgress::RetryAfter))
                    .col(text_null(IndexingProgress::ErrorMessage))
                    .col(
                        timestamp_with_time_zone(IndexingProgress::StartedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(timestamp_with_time_zone_null(IndexingProgress::CompletedAt))
                    .col(
                        timestamp_with_time_zone(IndexingProgress::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-indexing_progress-user_id")
                            .from(IndexingProgress::Table, IndexingProgress::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-indexing_progress_user_id")
                    .unique()
                    .table(IndexingProgress::Table)
                    .col(IndexingProgress::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ApprovalHistory::Table)
                    .if_not_exists()
                    .col(pk_auto(ApprovalHistory::Id))
                    .col(integer(ApprovalHistory::UserId))
                    .col(integer(ApprovalHistory::EmailQueueId))
                    .col(string_len(ApprovalHistory::ActionType, 32))
                    .col(integer_null(ApprovalHistory::AiSuggestedFolderId))
                    .col(integer_null(ApprovalHistory::UserSelectedFolderId))
                    .col(boolean(ApprovalHistory::Approved))
                    .col(
                        timestamp_with_time_zone(ApprovalHistory::Timestamp)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-approval_history-email_queue_id")
                            .from(ApprovalHistory::Table, ApprovalHistory::EmailQueueId)
                            .to(EmailProcessingQueue::Table, EmailProcessingQueue::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-approval_history_user_timestamp")
                    .table(ApprovalHistory::Table)
                    .col(ApprovalHistory::UserId)
                    .col((ApprovalHistory::Timestamp, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-approval_history_action_type")
                    .table(ApprovalHistory::Table)
                    .col(ApprovalHistory::ActionType)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DeadLetterQueue::Table)
                    .if_not_exists()
                    .col(pk_auto(DeadLetterQueue::Id))
                    .col(integer(DeadLetterQueue::EmailQueueId))
                    .col(string_len(DeadLetterQueue::OperationType, 64))
                    .col(string(DeadLetterQueue::GmailMessageId))
                    .col(string_null(DeadLetterQueue::LabelId))
                    .col(string(DeadLetterQueue::ErrorType))
                    .col(text(DeadLetterQueue::ErrorMessage))
                    .col(integer(DeadLetterQueue::RetryCount))
                    .col(timestamp_with_time_zone(DeadLetterQueue::LastRetryAt))
                    .col(json(DeadLetterQueue::ContextJson))
                    .col(boolean(DeadLetterQueue::Resolved).default(false))
                    .col(
                        timestamp_with_time_zone(DeadLetterQueue::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-dlq-email_queue_id")
                            .from(DeadLetterQueue::Table, DeadLetterQueue::EmailQueueId)
                            .to(EmailProcessingQueue::Table, EmailProcessingQueue::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-dlq_email_queue_id")
                    .table(DeadLetterQueue::Table)
                    .col(DeadLetterQueue::EmailQueueId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ManualNotifications::Table)
                    .if_not_exists()
                    .col(pk_auto(ManualNotifications::Id))
                    .col(integer(ManualNotifications::EmailId))
                    .col(big_integer(ManualNotifications::TelegramId))
                    .col(text(ManualNotifications::MessageText))
                    .col(json_null(ManualNotifications::ButtonsJson))
                    .col(string(ManualNotifications::ErrorType))
                    .col(integer(ManualNotifications::RetryCount).default(0))
                    .col(string_len(ManualNotifications::Status, 32).default("pending"))
                    .col(
                        timestamp_with_time_zone(ManualNotifications::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(ManualNotifications::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-manual_notifications-email_id")
                            .from(ManualNotifications::Table, ManualNotifications::EmailId)
                            .to(EmailProcessingQueue::Table, EmailProcessingQueue::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ManualNotifications::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DeadLetterQueue::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ApprovalHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(IndexingProgress::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum IndexingProgress {
    Table,
    Id,
    UserId,
    TotalEmails,
    ProcessedCount,
    LastProcessedMessageId,
    Status,
    RetryCount,
    RetryAfter,
    ErrorMessage,
    StartedAt,
    CompletedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ApprovalHistory {
    Table,
    Id,
    UserId,
    EmailQueueId,
    ActionType,
    AiSuggestedFolderId,
    UserSelectedFolderId,
    Approved,
    Timestamp,
}

#[derive(DeriveIden)]
enum DeadLetterQueue {
    Table,
    Id,
    EmailQueueId,
    OperationType,
    GmailMessageId,
    LabelId,
    ErrorType,
    ErrorMessage,
    RetryCount,
    LastRetryAt,
    ContextJson,
    Resolved,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ManualNotifications {
    Table,
    Id,
    EmailId,
    TelegramId,
    MessageText,
    ButtonsJson,
    ErrorType,
    RetryCount,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum EmailProcessingQueue {
    Table,
    Id,
}
