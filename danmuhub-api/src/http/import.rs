//! Import endpoint: validates the request and enqueues a generic import on
//! the download queue.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use danmuhub_core::models::MediaType;
use danmuhub_core::models::QueueType;
use danmuhub_core::task::import::{generic_import, GenericImportParams};
use danmuhub_core::task::SubmitOptions;

use super::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub provider: String,
    pub media_id: String,
    pub title: String,
    #[serde(default = "default_media_type")]
    pub media_type: MediaType,
    #[serde(default = "default_season")]
    pub season: i32,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub episode: Option<i32>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tmdb_id: Option<String>,
    #[serde(default)]
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub tvdb_id: Option<String>,
    #[serde(default)]
    pub douban_id: Option<String>,
    #[serde(default)]
    pub bangumi_id: Option<String>,
    /// Edited-list import: restrict the fetch to these episode indices.
    #[serde(default)]
    pub selected_indices: Option<Vec<i32>>,
}

const fn default_season() -> i32 {
    1
}

const fn default_media_type() -> MediaType {
    MediaType::TvSeries
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub task_id: Uuid,
}

/// `POST /api/import`
pub async fn submit_import(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> AppResult<Json<ImportResponse>> {
    // Unknown providers are rejected before anything is enqueued.
    state
        .registry
        .get(&request.provider)
        .map_err(|_| AppError::bad_request(format!("unknown provider '{}'", request.provider)))?;

    if request.season < 1 {
        return Err(AppError::bad_request("season must be >= 1"));
    }

    // A full import of an already-linked source is a conflict; targeting a
    // single episode is always allowed.
    if request.episode.is_none() {
        if let Some(existing) = state
            .task_ctx
            .anime_repo
            .find_source(&request.provider, &request.media_id)
            .await?
        {
            return Err(AppError::conflict(format!(
                "provider media already imported as source {}",
                existing.id
            )));
        }
    }

    let params = GenericImportParams {
        provider_name: request.provider.clone(),
        media_id: request.media_id.clone(),
        title: request.title.clone(),
        media_type: request.media_type,
        season: request.season,
        year: request.year,
        target_episode_index: request.episode,
        image_url: request.image_url,
        tmdb_id: request.tmdb_id,
        imdb_id: request.imdb_id,
        tvdb_id: request.tvdb_id,
        douban_id: request.douban_id,
        bangumi_id: request.bangumi_id,
        selected_indices: request.selected_indices,
    };

    let title = match request.episode {
        Some(episode) => format!(
            "导入: {} ({}) 第{}集",
            request.title, request.provider, episode
        ),
        None => format!("导入: {} ({})", request.title, request.provider),
    };
    let unique_key = params.unique_key();
    let task_parameters = serde_json::to_value(&params).ok();

    let ticket = state
        .task_manager
        .submit(
            generic_import(state.task_ctx.clone(), params),
            &title,
            QueueType::Download,
            SubmitOptions {
                unique_key: Some(unique_key),
                task_type: Some("generic_import".to_string()),
                task_parameters,
                ..SubmitOptions::default()
            },
        )
        .await?;

    Ok(Json(ImportResponse {
        task_id: ticket.task_id,
    }))
}
