//! Runtime settings surface over the config store.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
}

/// `GET /api/settings`
pub async fn list_settings(State(state): State<AppState>) -> AppResult<Json<Vec<SettingEntry>>> {
    let entries = state
        .config_store
        .get_all()
        .await?
        .into_iter()
        .map(|(key, value)| SettingEntry { key, value })
        .collect();
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub value: String,
}

/// `PUT /api/settings/{key}` — persists and republishes to the in-process
/// cache, so readers see the new value on their next call.
pub async fn update_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<UpdateSettingRequest>,
) -> AppResult<Json<SettingEntry>> {
    state.config_store.set_value(&key, &request.value).await?;
    state.config_store.invalidate(&key).await;
    Ok(Json(SettingEntry {
        key,
        value: request.value,
    }))
}
