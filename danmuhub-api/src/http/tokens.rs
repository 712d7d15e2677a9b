//! Administrative API token and UA-rule endpoints.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use danmuhub_core::models::token::generate_token_value;
use danmuhub_core::models::{ApiToken, UaRule};

use super::{AppError, AppResult, AppState};

/// `GET /api/tokens`
pub async fn list_tokens(State(state): State<AppState>) -> AppResult<Json<Vec<ApiToken>>> {
    Ok(Json(state.token_repo.list().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// -1 = unlimited.
    #[serde(default = "default_daily_limit")]
    pub daily_call_limit: i32,
}

const fn default_daily_limit() -> i32 {
    -1
}

/// `POST /api/tokens`
pub async fn create_token(
    State(state): State<AppState>,
    Json(request): Json<CreateTokenRequest>,
) -> AppResult<Json<ApiToken>> {
    if request.name.trim().is_empty() {
        return Err(AppError::bad_request("token name must not be empty"));
    }
    let value = generate_token_value();
    let token = state
        .token_repo
        .create(
            request.name.trim(),
            &value,
            request.expires_at,
            request.daily_call_limit,
        )
        .await?;
    Ok(Json(token))
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub enabled: bool,
}

/// `POST /api/tokens/{id}/toggle`
pub async fn toggle_token(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ToggleResponse>> {
    let enabled = state.token_repo.toggle(id).await?;
    Ok(Json(ToggleResponse { enabled }))
}

/// `POST /api/tokens/{id}/reset` — zero the daily counter at local today.
pub async fn reset_token(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let today = Local::now().date_naive();
    state.token_repo.reset_counter(id, today).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `DELETE /api/tokens/{id}`
pub async fn delete_token(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.token_repo.delete(id).await? {
        return Err(AppError::not_found(format!("token {id} not found")));
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `GET /api/ua-rules`
pub async fn list_ua_rules(State(state): State<AppState>) -> AppResult<Json<Vec<UaRule>>> {
    Ok(Json(state.token_repo.list_ua_rules().await?))
}

#[derive(Debug, Deserialize)]
pub struct AddUaRuleRequest {
    pub ua_string: String,
}

/// `POST /api/ua-rules`
pub async fn add_ua_rule(
    State(state): State<AppState>,
    Json(request): Json<AddUaRuleRequest>,
) -> AppResult<Json<UaRule>> {
    if request.ua_string.trim().is_empty() {
        return Err(AppError::bad_request("ua_string must not be empty"));
    }
    let rule = state.token_repo.add_ua_rule(request.ua_string.trim()).await?;
    Ok(Json(rule))
}

/// `DELETE /api/ua-rules/{id}`
pub async fn delete_ua_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.token_repo.delete_ua_rule(id).await? {
        return Err(AppError::not_found(format!("UA rule {id} not found")));
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}
