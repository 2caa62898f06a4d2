use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
    model::user::UserCtrl,
    server_config::cfg,
    HttpClient,
};

#[derive(Debug, Clone)]
struct CachedCredential {
    access_token: String,
    expires_at: chrono::DateTime<Utc>,
}

// The only process-wide mutable state: one credential slot per user, each
// guarded by its own mutex so a refresh never stampedes.
static CREDENTIALS: Lazy<DashMap<i32, Arc<Mutex<Option<CachedCredential>>>>> =
    Lazy::new(DashMap::new);

fn slot(user_id: i32) -> Arc<Mutex<Option<CachedCredential>>> {
    CREDENTIALS
        .entry(user_id)
        .or_insert_with(|| Arc::new(Mutex::new(None)))
        .clone()
}

/// Returns a usable access token for the user, decrypting from the database
/// on first use and refreshing when within a minute of expiry.
pub async fn access_token(
    conn: &DatabaseConnection,
    http_client: &HttpClient,
    user_id: i32,
) -> AppResult<String> {
    let slot = slot(user_id);
    let mut guard = slot.lock().await;

    if let Some(cached) = guard.as_ref() {
        if cached.expires_at > Utc::now() + Duration::seconds(60) {
            return Ok(cached.access_token.clone());
        }
    }

    let user = UserCtrl::get_by_id(conn, user_id).await?;
    let expires_at = user.token_expires_at.with_timezone(&Utc);
    if expires_at > Utc::now() + Duration::seconds(60) {
        let access_token = lib_utils::crypt::decrypt(&user.access_token)?;
        *guard = Some(CachedCredential {
            access_token: access_token.clone(),
            expires_at,
        });
        return Ok(access_token);
    }

    refresh_locked(conn, http_client, &user, &mut guard).await
}

/// Drops the cached credential and exchanges the refresh token for a fresh
/// access token. Called once after a 401; a second 401 is surfaced as
/// `AuthExpired` by the client.
pub async fn force_refresh(
    conn: &DatabaseConnection,
    http_client: &HttpClient,
    user_id: i32,
) -> AppResult<String> {
    let slot = slot(user_id);
    let mut guard = slot.lock().await;
    *guard = None;

    let user = UserCtrl::get_by_id(conn, user_id).await?;
    refresh_locked(conn, http_client, &user, &mut guard).await
}

pub fn invalidate(user_id: i32) {
    CREDENTIALS.remove(&user_id);
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

async fn refresh_locked(
    conn: &DatabaseConnection,
    http_client: &HttpClient,
    user: &user::Model,
    guard: &mut Option<CachedCredential>,
) -> AppResult<String> {
    let refresh_token = lib_utils::crypt::decrypt(&user.refresh_token)?;

    let resp = http_client
        .post(&cfg.gmail.token_uri)
        .form(&[
            ("client_id", cfg.gmail.client_id.as_str()),
            ("client_secret", cfg.gmail.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await
        .context("Token refresh request failed")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(AppError::Unauthorized(format!(
            "Token refresh rejected ({status}): {body}"
        )));
    }

    let token = resp
        .json::<TokenResponse>()
        .await
        .context("Could not parse token refresh response")?;

    let expires_at = Utc::now() + Duration::seconds(token.expires_in.max(0));
    let encrypted = lib_utils::crypt::encrypt(token.access_token.as_bytes())?;
    UserCtrl::update_access_token(conn, user.id, &encrypted, expires_at)
        .await
        .map_err(|e| anyhow!("Could not persist refreshed token: {e:?}"))?;

    *guard = Some(CachedCredential {
        access_token: token.access_token.clone(),
        expires_at,
    });

    tracing::info!("Refreshed mailbox token for user {}", user.id);

    Ok(token.access_token)
}
