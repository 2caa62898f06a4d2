use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(pk_auto(Users::Id))
                    .col(string(Users::Email))
                    .col(text(Users::AccessToken))
                    .col(text(Users::RefreshToken))
                    .col(timestamp_with_time_zone(Users::TokenExpiresAt))
                    .col(big_integer_null(Users::TelegramChatId))
                    .col(boolean(Users::Active).default(true))
                    .col(json(Users::PrioritySenders).default(Expr::value("[]")))
                    .col(
                        timestamp_with_time_zone(Users::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(Users::UpdatedAt)
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
                    .name("idx-users_email")
                    .unique()
                    .table(Users::Table)
                    .col(Users::Email)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FolderCategories::Table)
                    .if_not_exists()
                    .col(pk_auto(FolderCategories::Id))
                    .col(integer(FolderCategories::UserId))
                    .col(string(FolderCategories::Name))
                    .col(string(FolderCategories::LabelId))
                    .col(json(FolderCategories::Keywords).default(Expr::value("[]")))
                    .col(
                        timestamp_with_time_zone(FolderCategories::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-folder_categories-user_id")
                            .from(FolderCategories::Table, FolderCategories::UserId)
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
                    .name("idx-folder_categories_user_name")
                    .unique()
                    .table(FolderCategories::Table)
                    .col(FolderCategories::UserId)
                    .col(FolderCategories::Name)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FolderCategories::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Email,
    AccessToken,
    RefreshToken,
    TokenExpiresAt,
    TelegramChatId,
    Active,
    PrioritySenders,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum FolderCategories {
    Table,
    Id,
    UserId,
    Name,
    LabelId,
    Keywords,
    CreatedAt,
}
