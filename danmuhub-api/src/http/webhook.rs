//! Webhook ingress: posts become delayed webhook rows that the pump later
//! moves onto the download queue.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use danmuhub_core::models::MediaType;
use danmuhub_core::task::import::GenericImportParams;

use super::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub provider: String,
    pub media_id: String,
    pub title: String,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub season: Option<i32>,
    #[serde(default)]
    pub episode: Option<i32>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub webhook_id: i64,
    pub execute_time: chrono::DateTime<Utc>,
}

/// `POST /api/webhook/{api_key}`
pub async fn ingest(
    State(state): State<AppState>,
    Path(api_key): Path<String>,
    Json(payload): Json<WebhookPayload>,
) -> AppResult<Json<WebhookResponse>> {
    let config = &state.task_ctx.config;

    if !config.get_bool("webhook_enabled", true).await {
        return Err(AppError::forbidden("webhook ingestion is disabled"));
    }
    let expected_key = config.get("webhook_api_key", "").await;
    if expected_key.is_empty() || api_key != expected_key {
        return Err(AppError::unauthorized("invalid webhook key"));
    }

    // Title filter: blacklist drops matches, whitelist drops non-matches.
    let filter_regex = config.get("webhook_filter_regex", "").await;
    if !filter_regex.is_empty() {
        if let Ok(re) = Regex::new(&filter_regex) {
            let mode = config.get("webhook_filter_mode", "blacklist").await;
            let matched = re.is_match(&payload.title);
            let rejected = match mode.as_str() {
                "whitelist" => !matched,
                _ => matched,
            };
            if rejected {
                return Err(AppError::forbidden(format!(
                    "title '{}' rejected by webhook {mode} filter",
                    payload.title
                )));
            }
        }
    }

    // Unknown providers fail fast instead of producing a dead row.
    state
        .registry
        .get(&payload.provider)
        .map_err(|_| AppError::bad_request(format!("unknown provider '{}'", payload.provider)))?;

    let delay_hours = if config.get_bool("webhook_delayed_import_enabled", false).await {
        config.get_i64("webhook_delayed_import_hours", 24).await.max(0)
    } else {
        0
    };
    let execute_time = Utc::now() + Duration::hours(delay_hours);

    let params = GenericImportParams {
        provider_name: payload.provider.clone(),
        media_id: payload.media_id.clone(),
        title: payload.title.clone(),
        media_type: payload.media_type.unwrap_or(MediaType::TvSeries),
        season: payload.season.unwrap_or(1),
        year: payload.year,
        target_episode_index: payload.episode,
        image_url: payload.image_url.clone(),
        tmdb_id: None,
        imdb_id: None,
        tvdb_id: None,
        douban_id: None,
        bangumi_id: None,
        selected_indices: None,
    };

    let webhook_id = state
        .task_ctx
        .webhook_repo
        .enqueue(&payload.title, &serde_json::to_value(&params)?, execute_time)
        .await?;

    Ok(Json(WebhookResponse {
        webhook_id,
        execute_time,
    }))
}
