//! Provider search endpoint

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use danmuhub_core::search::SearchResponse;

use super::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub keyword: String,
}

/// `GET /api/search/provider?keyword=...`
pub async fn search_provider(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<SearchResponse>> {
    if query.keyword.trim().is_empty() {
        return Err(AppError::bad_request("keyword must not be empty"));
    }
    let response = state.search.search(&query.keyword).await?;
    Ok(Json(response))
}
