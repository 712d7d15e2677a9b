//! Player-facing comment reads

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use danmuhub_core::danmaku;
use danmuhub_core::models::{Comment, PageParams};

use super::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CommentListResponse {
    pub total: u64,
    pub list: Vec<Comment>,
}

/// `GET /api/comments/{episode_id}` — straight read from the repository.
pub async fn get_comments(
    State(state): State<AppState>,
    Path(episode_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<CommentListResponse>> {
    let episode = state.task_ctx.episode_repo.get(episode_id).await?;
    if episode.is_none() {
        return Err(AppError::not_found(format!("episode {episode_id} not found")));
    }

    let params = PageParams::new(query.page, query.page_size);
    let page = state
        .task_ctx
        .comment_repo
        .list_for_episode(episode_id, params)
        .await?;

    let limit = state
        .task_ctx
        .config
        .get_i64("danmaku_output_limit_per_source", -1)
        .await;
    let list = danmaku::sample_comments_evenly(page.items, limit);

    Ok(Json(CommentListResponse {
        total: page.total,
        list,
    }))
}

/// `GET /api/comments/{episode_id}/xml` — dandanplay-style XML export.
pub async fn export_xml(
    State(state): State<AppState>,
    Path(episode_id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let episode = state.task_ctx.episode_repo.get(episode_id).await?;
    if episode.is_none() {
        return Err(AppError::not_found(format!("episode {episode_id} not found")));
    }

    let comments = state.task_ctx.comment_repo.all_for_episode(episode_id).await?;
    let xml = danmaku::xml::generate_xml(&comments);
    Ok((
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        xml,
    ))
}
