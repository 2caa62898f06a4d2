use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailProcessingQueue::Table)
                    .if_not_exists()
                    .col(pk_auto(EmailProcessingQueue::Id))
                    .col(integer(EmailProcessingQueue::UserId))
                    .col(string(EmailProcessingQueue::GmailMessageId))
                    .col(string(EmailProcessingQueue::GmailThreadId))
                    .col(string(EmailProcessingQueue::Sender))
                    .col(string(EmailProcessingQueue::Subject))
                    .col(timestamp_with_time_zone(EmailProcessingQueue::ReceivedAt))
                    .col(string_len(EmailProcessingQueue::Status, 32).default("pending"))
                    .col(string_len_null(EmailProcessingQueue::Classification, 32))
                    .col(integer_null(EmailProcessingQueue::ProposedFolderId))
                    .col(text_null(EmailProcessingQueue::ClassificationReasoning))
                    .col(integer(EmailProcessingQueue::PriorityScore).default(0))
                    .col(boolean(EmailProcessingQueue::IsPriority).default(false))
                    .col(string_null(EmailProcessingQueue::DetectedLanguage))
                    .col(string_len_null(EmailProcessingQueue::Tone, 32))
                    .col(text_null(EmailProcessingQueue::DraftResponse))
                    .col(integer(EmailProcessingQueue::RetryCount).default(0))
                    .col(string_null(EmailProcessingQueue::ErrorType))
                    .col(text_null(EmailProcessingQueue::ErrorMessage))
                    .col(timestamp_with_time_zone_null(
                        EmailProcessingQueue::ErrorTimestamp,
                    ))
                    .col(text_null(EmailProcessingQueue::DlqReason))
                    .col(timestamp_with_time_zone_null(
                        EmailProcessingQueue::EmailSentAt,
                    ))
                    .col(
                        timestamp_with_time_zone(EmailProcessingQueue::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(EmailProcessingQueue::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-email_queue-user_id")
                            .from(EmailProcessingQueue::Table, EmailProcessingQueue::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-email_queue-proposed_folder_id")
                            .from(
                                EmailProcessingQueue::Table,
                                EmailProcessingQueue::ProposedFolderId,
                            )
                            .to(FolderCategories::Table, FolderCategories::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Dedup invariant: one queue row per (user, gmail message)
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-email_queue_user_message")
                    .unique()
                    .table(EmailProcessingQueue::Table)
                    .col(EmailProcessingQueue::UserId)
                    .col(EmailProcessingQueue::GmailMessageId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-email_queue_user_received")
                    .table(EmailProcessingQueue::Table)
                    .col(EmailProcessingQueue::UserId)
                    .col((EmailProcessingQueue::ReceivedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-email_queue_status_received")
                    .table(EmailProcessingQueue::Table)
                    .col(EmailProcessingQueue::Status)
                    .col(EmailProcessingQueue::ReceivedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailProcessingQueue::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EmailProcessingQueue {
    Table,
    Id,
    UserId,
    GmailMessageId,
    GmailThreadId,
    Sender,
    Subject,
    ReceivedAt,
    Status,
    Classification,
    ProposedFolderId,
    ClassificationReasoning,
    PriorityScore,
    IsPriority,
    DetectedLanguage,
    Tone,
    DraftResponse,
    RetryCount,
    ErrorType,
    ErrorMessage,
    ErrorTimestamp,
    DlqReason,
    EmailSentAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum FolderCategories {
    Table,
    Id,
}
