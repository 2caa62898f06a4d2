use anyhow::Context;
use chrono::{DateTime, Utc};

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
};

pub struct UserCtrl;

impl UserCtrl {
    pub async fn get_by_id(conn: &DatabaseConnection, user_id: i32) -> AppResult<user::Model> {
        let user = User::find()
            .filter(user::Column::Id.eq(user_id))
            .one(conn)
            .await
            .context("Error fetching user by id")?
            .ok_or(AppError::NotFound("User not found".to_string()))?;

        Ok(user)
    }

    pub async fn get_by_email(conn: &DatabaseConnection, email: &str) -> AppResult<user::Model> {
        let user = User::find()
            .filter(user::Column::Email.eq(email))
            .one(conn)
            .await
            .context("Error fetching user by email")?
            .ok_or(AppError::NotFound("User not found".to_string()))?;

        Ok(user)
    }

    /// Users eligible for polling: active and holding a refresh token.
    pub async fn all_active(conn: &DatabaseConnection) -> AppResult<Vec<user::Model>> {
        let users = User::find()
            .filter(user::Column::Active.eq(true))
            .filter(user::Column::RefreshToken.ne(""))
            .all(conn)
            .await
            .context("Error fetching active users")?;

        Ok(users)
    }

    pub async fn update_access_token(
        conn: &DatabaseConnection,
        user_id: i32,
        encrypted_access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        User::update(user::ActiveModel {
            id: ActiveValue::Set(user_id),
            access_token: ActiveValue::Set(encrypted_access_token.to_string()),
            token_expires_at: ActiveValue::Set(expires_at.into()),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        })
        .exec(conn)
        .await
        .context("Error updating user access token")?;

        Ok(())
    }

    pub fn priority_senders(user: &user::Model) -> Vec<String> {
        serde_json::from_value::<Vec<String>>(user.priority_senders.clone()).unwrap_or_default()
    }

    pub async fn find_by_telegram_chat(
        conn: &DatabaseConnection,
        chat_id: i64,
    ) -> AppResult<Option<user::Model>> {
        let user = User::find()
            .filter(user::Column::TelegramChatId.eq(chat_id))
            .one(conn)
            .await
            .context("Error fetching user by telegram chat")?;

        Ok(user)
    }
}
