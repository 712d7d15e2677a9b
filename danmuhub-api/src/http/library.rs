//! Library CRUD: works, sources, episodes, and the admin tasks that mutate
//! them. All mutations run through the task manager so they are visible,
//! pausable and deduplicated like every other job.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use danmuhub_core::models::{Anime, AnimeSource, Episode, Page, PageParams, QueueType};
use danmuhub_core::task::manual_import::{
    batch_manual_import as batch_manual_import_task, manual_import as manual_import_task,
    ManualImportItem, CUSTOM_PROVIDER,
};
use danmuhub_core::task::{maintenance, refresh, SubmitOptions};

use super::{AppError, AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct TaskSubmitted {
    pub task_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct LibraryQuery {
    pub keyword: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// `GET /api/library`
pub async fn list_library(
    State(state): State<AppState>,
    Query(query): Query<LibraryQuery>,
) -> AppResult<Json<Page<Anime>>> {
    let params = PageParams::new(query.page, query.page_size);
    let page = state
        .task_ctx
        .anime_repo
        .list(query.keyword.as_deref(), params)
        .await?;
    Ok(Json(page))
}

/// `GET /api/library/anime/{id}`
pub async fn get_anime(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Anime>> {
    let anime = state
        .task_ctx
        .anime_repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("work {id} not found")))?;
    Ok(Json(anime))
}

/// `DELETE /api/library/anime/{id}` — enqueued on the management queue.
pub async fn delete_anime(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TaskSubmitted>> {
    let anime = state
        .task_ctx
        .anime_repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("work {id} not found")))?;

    let ticket = state
        .task_manager
        .submit(
            maintenance::delete_anime(state.task_ctx.clone(), id),
            &format!("删除作品: {}", anime.title),
            QueueType::Management,
            SubmitOptions {
                unique_key: Some(format!("delete-anime-{id}")),
                ..SubmitOptions::default()
            },
        )
        .await?;
    Ok(Json(TaskSubmitted {
        task_id: ticket.task_id,
    }))
}

/// `GET /api/library/anime/{id}/sources`
pub async fn list_sources(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<AnimeSource>>> {
    let sources = state.task_ctx.anime_repo.sources_for_anime(id).await?;
    Ok(Json(sources))
}

#[derive(Debug, Deserialize)]
pub struct ReassociateRequest {
    pub target_anime_id: i64,
}

/// `POST /api/library/anime/{id}/reassociate`
pub async fn reassociate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ReassociateRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let moved = state
        .task_ctx
        .anime_repo
        .reassociate_sources(id, request.target_anime_id)
        .await?;
    Ok(Json(serde_json::json!({ "moved_sources": moved })))
}

/// `DELETE /api/library/source/{id}`
pub async fn delete_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TaskSubmitted>> {
    let source = state
        .task_ctx
        .anime_repo
        .get_source(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("source {id} not found")))?;

    let ticket = state
        .task_manager
        .submit(
            maintenance::delete_source(state.task_ctx.clone(), id),
            &format!("删除源: {} ({})", source.provider_name, source.media_id),
            QueueType::Management,
            SubmitOptions {
                unique_key: Some(format!("delete-source-{id}")),
                ..SubmitOptions::default()
            },
        )
        .await?;
    Ok(Json(TaskSubmitted {
        task_id: ticket.task_id,
    }))
}

/// `PUT /api/library/source/{id}/favorite`
pub async fn toggle_favorite(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let new_status = state.task_ctx.anime_repo.toggle_source_favorite(id).await?;
    Ok(Json(serde_json::json!({ "is_favorited": new_status })))
}

/// `PUT /api/library/source/{id}/incremental`
pub async fn toggle_incremental(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let new_status = state
        .task_ctx
        .anime_repo
        .toggle_source_incremental_refresh(id)
        .await?;
    Ok(Json(serde_json::json!({ "incremental_refresh_enabled": new_status })))
}

/// `GET /api/library/source/{id}/episodes`
pub async fn list_episodes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Episode>>> {
    let episodes = state.task_ctx.episode_repo.list_for_source(id).await?;
    Ok(Json(episodes))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub mode: RefreshMode,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    #[default]
    Full,
    Incremental,
}

/// `POST /api/library/source/{id}/refresh`
pub async fn refresh_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RefreshRequest>,
) -> AppResult<Json<TaskSubmitted>> {
    let source = state
        .task_ctx
        .anime_repo
        .get_source(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("source {id} not found")))?;

    let (factory, label) = match request.mode {
        RefreshMode::Full => (refresh::full_refresh(state.task_ctx.clone(), id), "全量刷新"),
        RefreshMode::Incremental => (
            refresh::incremental_refresh(state.task_ctx.clone(), id),
            "增量刷新",
        ),
    };

    let ticket = state
        .task_manager
        .submit(
            factory,
            &format!("{label}: {} ({})", source.provider_name, source.media_id),
            QueueType::Download,
            SubmitOptions {
                unique_key: Some(format!("refresh-source-{id}")),
                ..SubmitOptions::default()
            },
        )
        .await?;
    Ok(Json(TaskSubmitted {
        task_id: ticket.task_id,
    }))
}

/// `POST /api/library/source/{id}/reorder`
pub async fn reorder_episodes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TaskSubmitted>> {
    let ticket = state
        .task_manager
        .submit(
            maintenance::reorder_episodes(state.task_ctx.clone(), id),
            &format!("重整集数: 源 {id}"),
            QueueType::Management,
            SubmitOptions {
                unique_key: Some(format!("reorder-source-{id}")),
                ..SubmitOptions::default()
            },
        )
        .await?;
    Ok(Json(TaskSubmitted {
        task_id: ticket.task_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OffsetRequest {
    pub episode_ids: Vec<i64>,
    pub offset: i32,
}

/// `POST /api/library/episodes/offset` — rejected synchronously when the
/// smallest resulting index would drop below one.
pub async fn offset_episodes(
    State(state): State<AppState>,
    Json(request): Json<OffsetRequest>,
) -> AppResult<Json<TaskSubmitted>> {
    if request.episode_ids.is_empty() {
        return Err(AppError::bad_request("episode_ids must not be empty"));
    }
    maintenance::validate_offset(&state.task_ctx, &request.episode_ids, request.offset).await?;

    let ticket = state
        .task_manager
        .submit(
            maintenance::offset_episodes(
                state.task_ctx.clone(),
                request.episode_ids.clone(),
                request.offset,
            ),
            &format!("集数偏移 ({}个分集, {:+})", request.episode_ids.len(), request.offset),
            QueueType::Management,
            SubmitOptions::default(),
        )
        .await?;
    Ok(Json(TaskSubmitted {
        task_id: ticket.task_id,
    }))
}

/// `DELETE /api/library/episode/{id}`
pub async fn delete_episode(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TaskSubmitted>> {
    let ticket = state
        .task_manager
        .submit(
            maintenance::delete_episode(state.task_ctx.clone(), id),
            &format!("删除分集: {id}"),
            QueueType::Management,
            SubmitOptions {
                unique_key: Some(format!("delete-episode-{id}")),
                ..SubmitOptions::default()
            },
        )
        .await?;
    Ok(Json(TaskSubmitted {
        task_id: ticket.task_id,
    }))
}

/// `POST /api/library/episode/{id}/refresh`
pub async fn refresh_episode(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TaskSubmitted>> {
    let episode = state
        .task_ctx
        .episode_repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("episode {id} not found")))?;

    let ticket = state
        .task_manager
        .submit(
            refresh::refresh_episode(state.task_ctx.clone(), id),
            &format!("刷新分集: {}", episode.title),
            QueueType::Download,
            SubmitOptions {
                unique_key: Some(format!("refresh-episode-{id}")),
                ..SubmitOptions::default()
            },
        )
        .await?;
    Ok(Json(TaskSubmitted {
        task_id: ticket.task_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ManualImportRequest {
    pub provider: String,
    #[serde(default)]
    pub title: Option<String>,
    pub episode_index: i32,
    /// XML document, plain-text danmaku, or a provider URL.
    pub content: String,
}

/// `POST /api/library/source/{id}/manual-import`
pub async fn manual_import(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ManualImportRequest>,
) -> AppResult<Json<TaskSubmitted>> {
    let source = state
        .task_ctx
        .anime_repo
        .get_source(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("source {id} not found")))?;
    if request.episode_index < 1 {
        return Err(AppError::bad_request("episode_index must be >= 1"));
    }
    if request.provider != CUSTOM_PROVIDER {
        state.registry.get(&request.provider).map_err(|_| {
            AppError::bad_request(format!("unknown provider '{}'", request.provider))
        })?;
    }

    let item = ManualImportItem {
        title: request.title,
        episode_index: request.episode_index,
        content: request.content,
    };
    let ticket = state
        .task_manager
        .submit(
            manual_import_task(
                state.task_ctx.clone(),
                id,
                source.anime_id,
                request.provider.clone(),
                item,
            ),
            &format!("手动导入: 源 {id} 第{}集", request.episode_index),
            QueueType::Download,
            SubmitOptions {
                unique_key: Some(format!("manual-import-{id}-ep{}", request.episode_index)),
                ..SubmitOptions::default()
            },
        )
        .await?;
    Ok(Json(TaskSubmitted {
        task_id: ticket.task_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BatchManualImportRequest {
    pub provider: String,
    pub items: Vec<ManualImportItem>,
}

/// `POST /api/library/source/{id}/batch-manual-import`
pub async fn batch_manual_import(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<BatchManualImportRequest>,
) -> AppResult<Json<TaskSubmitted>> {
    let source = state
        .task_ctx
        .anime_repo
        .get_source(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("source {id} not found")))?;
    if request.items.is_empty() {
        return Err(AppError::bad_request("items must not be empty"));
    }
    if request.provider != CUSTOM_PROVIDER {
        state.registry.get(&request.provider).map_err(|_| {
            AppError::bad_request(format!("unknown provider '{}'", request.provider))
        })?;
    }

    let count = request.items.len();
    let ticket = state
        .task_manager
        .submit(
            batch_manual_import_task(
                state.task_ctx.clone(),
                id,
                source.anime_id,
                request.provider.clone(),
                request.items,
            ),
            &format!("批量手动导入: 源 {id} ({count}个条目)"),
            QueueType::Download,
            SubmitOptions {
                unique_key: Some(format!("batch-manual-import-{id}")),
                ..SubmitOptions::default()
            },
        )
        .await?;
    Ok(Json(TaskSubmitted {
        task_id: ticket.task_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_mode_defaults_to_full() {
        let request: RefreshRequest = serde_json::from_str("{}").expect("parses");
        assert!(matches!(request.mode, RefreshMode::Full));
        let request: RefreshRequest =
            serde_json::from_str(r#"{"mode":"incremental"}"#).expect("parses");
        assert!(matches!(request.mode, RefreshMode::Incremental));
    }
}
