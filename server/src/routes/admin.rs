//! Admin surface: errored queue rows, processing stats with a health
//! verdict, and manual retry.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use crate::{
    error::AppJsonResult,
    model::email_queue::EmailQueueCtrl,
    routes::AdminState,
};

pub fn router() -> Router<AdminState> {
    Router::new()
        .route("/errors", get(list_errors))
        .route("/stats", get(stats))
        .route("/retry/:email_id", post(retry))
}

#[derive(Debug, Serialize)]
struct ErrorRow {
    id: i32,
    user_id: i32,
    sender: String,
    subject: String,
    error_type: Option<String>,
    error_message: Option<String>,
    error_timestamp: Option<String>,
    retry_count: i32,
    dlq_reason: Option<String>,
}

async fn list_errors(State(admin): State<AdminState>) -> AppJsonResult<Vec<ErrorRow>> {
    let rows = EmailQueueCtrl::find_errored(&admin.state.conn).await?;
    let rows = rows
        .into_iter()
        .map(|email| ErrorRow {
            id: email.id,
            user_id: email.user_id,
            sender: email.sender,
            subject: email.subject,
            error_type: email.error_type,
            error_message: email.error_message,
            error_timestamp: email.error_timestamp.map(|t| t.to_rfc3339()),
            retry_count: email.retry_count,
            dlq_reason: email.dlq_reason,
        })
        .collect();

    Ok(Json(rows))
}

pub fn health_status(error_rate: f64) -> &'static str {
    if error_rate < 0.05 {
        "healthy"
    } else if error_rate < 0.15 {
        "degraded"
    } else {
        "critical"
    }
}

async fn stats(State(admin): State<AdminState>) -> AppJsonResult<serde_json::Value> {
    let counts = EmailQueueCtrl::status_counts(&admin.state.conn).await?;

    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let errors: i64 = counts
        .iter()
        .filter(|(status, _)| status == "error")
        .map(|(_, n)| n)
        .sum();
    let error_rate = if total > 0 {
        errors as f64 / total as f64
    } else {
        0.0
    };

    let by_status: serde_json::Map<String, serde_json::Value> = counts
        .into_iter()
        .map(|(status, n)| (status, json!(n)))
        .collect();

    Ok(Json(json!({
        "total": total,
        "by_status": by_status,
        "error_rate": error_rate,
        "health_status": health_status(error_rate),
        "active_workflows": admin.engine.active_count(),
    })))
}

async fn retry(
    State(admin): State<AdminState>,
    Path(email_id): Path<i32>,
) -> AppJsonResult<serde_json::Value> {
    admin.engine.retry_email(email_id).await?;
    Ok(Json(json!({ "status": "requeued", "email_id": email_id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_thresholds() {
        assert_eq!(health_status(0.0), "healthy");
        assert_eq!(health_status(0.049), "healthy");
        assert_eq!(health_status(0.05), "degraded");
        assert_eq!(health_status(0.149), "degraded");
        assert_eq!(health_status(0.15), "critical");
        assert_eq!(health_status(0.9), "critical");
    }
}
