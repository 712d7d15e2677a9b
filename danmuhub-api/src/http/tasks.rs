//! Task history and lifecycle endpoints, delegating to the task manager.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use danmuhub_core::models::{Page, PageParams, TaskInfo, TaskStatus};

use super::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// `GET /api/tasks`
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> AppResult<Json<Page<TaskInfo>>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| AppError::bad_request(format!("unknown status '{raw}'")))?,
        ),
    };
    let params = PageParams::new(query.page, query.page_size);
    let page = state.task_history.list(status, params).await?;
    Ok(Json(page))
}

/// `GET /api/tasks/{id}`
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TaskInfo>> {
    let task = state
        .task_history
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;
    Ok(Json(task))
}

#[derive(Debug, Serialize)]
pub struct TaskActionResponse {
    pub ok: bool,
}

/// `POST /api/tasks/{id}/pause`
pub async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TaskActionResponse>> {
    state.task_manager.pause(id).await?;
    Ok(Json(TaskActionResponse { ok: true }))
}

/// `POST /api/tasks/{id}/resume`
pub async fn resume_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TaskActionResponse>> {
    state.task_manager.resume(id).await?;
    Ok(Json(TaskActionResponse { ok: true }))
}

#[derive(Debug, Deserialize, Default)]
pub struct AbortQuery {
    #[serde(default)]
    pub force: bool,
}

/// `POST /api/tasks/{id}/abort`
///
/// Graceful by default: the task observes the cancel at its next progress
/// checkpoint. `?force=true` drops the task future outright.
pub async fn abort_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AbortQuery>,
) -> AppResult<Json<TaskActionResponse>> {
    if state.task_manager.is_running(id) {
        if query.force {
            state.task_manager.force_abort(id)?;
        } else {
            state.task_manager.abort(id)?;
        }
        return Ok(Json(TaskActionResponse { ok: true }));
    }

    // Not running: try to cancel it while still queued.
    let task = state
        .task_history
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;
    if task.status != TaskStatus::Pending {
        return Err(AppError::conflict(format!(
            "task {id} is {} and cannot be aborted",
            task.status
        )));
    }
    state.task_manager.cancel_pending(id, &task.title, None).await?;
    Ok(Json(TaskActionResponse { ok: true }))
}

/// `DELETE /api/tasks/{id}` — removes a finished task's history row.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TaskActionResponse>> {
    if state.task_manager.is_running(id) {
        return Err(AppError::conflict("cannot delete a running task"));
    }
    let deleted = state.task_history.delete(id).await?;
    if !deleted {
        return Err(AppError::not_found(format!("task {id} not found")));
    }
    Ok(Json(TaskActionResponse { ok: true }))
}
