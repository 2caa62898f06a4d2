use anyhow::Context;

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
};

pub struct FolderCategoryCtrl;

impl FolderCategoryCtrl {
    pub async fn all_for_user(
        conn: &DatabaseConnection,
        user_id: i32,
    ) -> AppResult<Vec<folder_category::Model>> {
        let folders = FolderCategory::find()
            .filter(folder_category::Column::UserId.eq(user_id))
            .order_by_asc(folder_category::Column::Id)
            .all(conn)
            .await
            .context("Error fetching folder categories")?;

        Ok(folders)
    }

    pub async fn get_for_user(
        conn: &DatabaseConnection,
        user_id: i32,
        folder_id: i32,
    ) -> AppResult<folder_category::Model> {
        let folder = FolderCategory::find()
            .filter(folder_category::Column::UserId.eq(user_id))
            .filter(folder_category::Column::Id.eq(folder_id))
            .one(conn)
            .await
            .context("Error fetching folder category")?
            .ok_or(AppError::NotFound("Folder not found".to_string()))?;

        Ok(folder)
    }

    pub async fn find_by_name(
        conn: &DatabaseConnection,
        user_id: i32,
        name: &str,
    ) -> AppResult<Option<folder_category::Model>> {
        let folder = FolderCategory::find()
            .filter(folder_category::Column::UserId.eq(user_id))
            .filter(folder_category::Column::Name.eq(name))
            .one(conn)
            .await
            .context("Error fetching folder category by name")?;

        Ok(folder)
    }

    /// Resolution target when the LLM answers with an unknown folder name:
    /// the user's "Important" folder when present, else their first folder.
    pub async fn fallback_for_user(
        conn: &DatabaseConnection,
        user_id: i32,
    ) -> AppResult<folder_category::Model> {
        if let Some(important) = Self::find_by_name(conn, user_id, "Important").await? {
            return Ok(important);
        }

        let folders = Self::all_for_user(conn, user_id).await?;
        folders
            .into_iter()
            .next()
            .ok_or(AppError::NotFound("User has no folders".to_string()))
    }

    pub fn keywords(folder: &folder_category::Model) -> Vec<String> {
        serde_json::from_value::<Vec<String>>(folder.keywords.clone()).unwrap_or_default()
    }

    pub async fn set_label_id(
        conn: &DatabaseConnection,
        folder_id: i32,
        label_id: &str,
    ) -> AppResult<()> {
        FolderCategory::update(folder_category::ActiveModel {
            id: ActiveValue::Set(folder_id),
            label_id: ActiveValue::Set(label_id.to_string()),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error updating folder label id")?;

        Ok(())
    }
}
