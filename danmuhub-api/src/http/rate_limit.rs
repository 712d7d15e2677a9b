//! Rate limiter status endpoint.

use axum::extract::State;
use axum::Json;

use danmuhub_core::service::RateLimitStatus;

use super::{AppResult, AppState};

/// `GET /api/rate-limit/status`
///
/// Side-effecting read: the limiter rolls its window through the synthetic
/// status-check provider before the snapshot is taken.
pub async fn status(State(state): State<AppState>) -> AppResult<Json<RateLimitStatus>> {
    let status = state.rate_limiter.status().await?;
    Ok(Json(status))
}
