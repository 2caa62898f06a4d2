use anyhow::Context;
use chrono::Utc;

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
};

pub struct WorkflowMappingCtrl;

impl WorkflowMappingCtrl {
    /// Creates the mapping for a fresh workflow run. The unique FK on
    /// email_id serializes concurrent starts; an existing row wins.
    pub async fn create_or_get(
        conn: &DatabaseConnection,
        email_id: i32,
        user_id: i32,
        thread_id: &str,
    ) -> AppResult<workflow_mapping::Model> {
        if let Some(existing) = Self::by_email_id(conn, email_id).await? {
            return Ok(existing);
        }

        let insert = WorkflowMapping::insert(workflow_mapping::ActiveModel {
            id: ActiveValue::NotSet,
            email_id: ActiveValue::Set(email_id),
            user_id: ActiveValue::Set(user_id),
            thread_id: ActiveValue::Set(thread_id.to_string()),
            telegram_message_id: ActiveValue::Set(None),
            workflow_state: ActiveValue::Set(WorkflowState::Created),
            ..Default::default()
        })
        .exec(conn)
        .await;

        match insert {
            Ok(_) => {}
            Err(err) if crate::error::is_unique_violation(&err) => {}
            Err(err) => return Err(err.into()),
        }

        Self::by_email_id(conn, email_id)
            .await?
            .ok_or(AppError::NotFound("Workflow mapping vanished".to_string()))
    }

    pub async fn by_email_id(
        conn: &DatabaseConnection,
        email_id: i32,
    ) -> AppResult<Option<workflow_mapping::Model>> {
        let mapping = WorkflowMapping::find()
            .filter(workflow_mapping::Column::EmailId.eq(email_id))
            .one(conn)
            .await
            .context("Error fetching workflow mapping")?;

        Ok(mapping)
    }

    pub async fn by_thread_id(
        conn: &DatabaseConnection,
        thread_id: &str,
    ) -> AppResult<Option<workflow_mapping::Model>> {
        let mapping = WorkflowMapping::find()
            .filter(workflow_mapping::Column::ThreadId.eq(thread_id))
            .one(conn)
            .await
            .context("Error fetching workflow mapping by thread")?;

        Ok(mapping)
    }

    pub async fn set_message_id(
        conn: &DatabaseConnection,
        email_id: i32,
        telegram_message_id: Option<i32>,
    ) -> AppResult<()> {
        WorkflowMapping::update_many()
            .col_expr(
                workflow_mapping::Column::TelegramMessageId,
                Expr::value(telegram_message_id),
            )
            .col_expr(workflow_mapping::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(workflow_mapping::Column::EmailId.eq(email_id))
            .exec(conn)
            .await
            .context("Error updating workflow mapping message id")?;

        Ok(())
    }

    pub async fn set_state(
        conn: &DatabaseConnection,
        email_id: i32,
        state: WorkflowState,
    ) -> AppResult<()> {
        WorkflowMapping::update_many()
            .col_expr(workflow_mapping::Column::WorkflowState, Expr::value(state))
            .col_expr(workflow_mapping::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(workflow_mapping::Column::EmailId.eq(email_id))
            .exec(conn)
            .await
            .context("Error updating workflow mapping state")?;

        Ok(())
    }
}

pub struct CheckpointCtrl;

impl CheckpointCtrl {
    /// Upserts the single checkpoint per thread id; only the latest state
    /// is needed to resume.
    pub async fn save(
        conn: &DatabaseConnection,
        thread_id: &str,
        step: &str,
        state: serde_json::Value,
    ) -> AppResult<()> {
        WorkflowCheckpoint::insert(workflow_checkpoint::ActiveModel {
            id: ActiveValue::NotSet,
            thread_id: ActiveValue::Set(thread_id.to_string()),
            step: ActiveValue::Set(step.to_string()),
            state: ActiveValue::Set(state),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::column(workflow_checkpoint::Column::ThreadId)
                .update_columns([
                    workflow_checkpoint::Column::Step,
                    workflow_checkpoint::Column::State,
                ])
                .value(workflow_checkpoint::Column::UpdatedAt, Expr::value(Utc::now()))
                .to_owned(),
        )
        .exec(conn)
        .await
        .context("Error saving workflow checkpoint")?;

        Ok(())
    }

    pub async fn load(
        conn: &DatabaseConnection,
        thread_id: &str,
    ) -> AppResult<Option<workflow_checkpoint::Model>> {
        let checkpoint = WorkflowCheckpoint::find()
            .filter(workflow_checkpoint::Column::ThreadId.eq(thread_id))
            .one(conn)
            .await
            .context("Error loading workflow checkpoint")?;

        Ok(checkpoint)
    }

    pub async fn delete(conn: &DatabaseConnection, thread_id: &str) -> AppResult<()> {
        WorkflowCheckpoint::delete_many()
            .filter(workflow_checkpoint::Column::ThreadId.eq(thread_id))
            .exec(conn)
            .await
            .context("Error deleting workflow checkpoint")?;

        Ok(())
    }
}
