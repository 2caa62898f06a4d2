use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkflowMappings::Table)
                    .if_not_exists()
                    .col(pk_auto(WorkflowMappings::Id))
                    .col(integer(WorkflowMappings::EmailId))
                    .col(integer(WorkflowMappings::UserId))
                    .col(string(WorkflowMappings::ThreadId))
                    .col(integer_null(WorkflowMappings::TelegramMessageId))
                    .col(string_len(WorkflowMappings::WorkflowState, 32).default("created"))
                    .col(
                        timestamp_with_time_zone(WorkflowMappings::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(WorkflowMappings::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-workflow_mappings-email_id")
                            .from(WorkflowMappings::Table, WorkflowMappings::EmailId)
                            .to(EmailProcessingQueue::Table, EmailProcessingQueue::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One workflow per queue row; callbacks resolve by either key
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-workflow_mappings_email_id")
                    .unique()
                    .table(WorkflowMappings::Table)
                    .col(WorkflowMappings::EmailId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-workflow_mappings_thread_id")
                    .unique()
                    .table(WorkflowMappings::Table)
                    .col(WorkflowMappings::ThreadId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WorkflowCheckpoints::Table)
                    .if_not_exists()
                    .col(pk_auto(WorkflowCheckpoints::Id))
                    .col(string(WorkflowCheckpoints::ThreadId))
                    .col(string_len(WorkflowCheckpoints::Step, 64))
                    .col(json(WorkflowCheckpoints::State))
                    .col(
                        timestamp_with_time_zone(WorkflowCheckpoints::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(WorkflowCheckpoints::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-workflow_checkpoints_thread_id")
                    .unique()
                    .table(WorkflowCheckpoints::Table)
                    .col(WorkflowCheckpoints::ThreadId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkflowCheckpoints::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WorkflowMappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkflowMappings {
    Table,
    Id,
    EmailId,
    UserId,
    ThreadId,
    TelegramMessageId,
    WorkflowState,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WorkflowCheckpoints {
    Table,
    Id,
    ThreadId,
    Step,
    State,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum EmailProcessingQueue {
    Table,
    Id,
}
