// Module: http
// JSON REST API over the ingestion core.

pub mod comments;
pub mod error;
pub mod import;
pub mod library;
pub mod rate_limit;
pub mod search;
pub mod settings;
pub mod tasks;
pub mod tokens;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::HeaderValue,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use danmuhub_core::provider::ProviderRegistry;
use danmuhub_core::repository::{TaskHistoryRepository, TokenRepository};
use danmuhub_core::search::SearchPipeline;
use danmuhub_core::service::{ConfigStore, RateLimiter};
use danmuhub_core::task::{TaskContext, TaskManager};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<danmuhub_core::Config>,
    pub config_store: Arc<ConfigStore>,
    pub registry: Arc<ProviderRegistry>,
    pub search: Arc<SearchPipeline>,
    pub rate_limiter: Arc<RateLimiter>,
    pub task_manager: Arc<TaskManager>,
    pub task_ctx: TaskContext,
    pub task_history: TaskHistoryRepository,
    pub token_repo: TokenRepository,
}

/// Build the application router with tracing, timeout and CORS layers.
pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.server.cors_allowed_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .server
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };
    let timeout = TimeoutLayer::new(Duration::from_secs(
        state.config.server.request_timeout_seconds,
    ));

    Router::new()
        // Search
        .route("/api/search/provider", get(search::search_provider))
        // Comments
        .route("/api/comments/{episode_id}", get(comments::get_comments))
        .route("/api/comments/{episode_id}/xml", get(comments::export_xml))
        // Import
        .route("/api/import", post(import::submit_import))
        // Library
        .route("/api/library", get(library::list_library))
        .route("/api/library/anime/{id}", get(library::get_anime))
        .route("/api/library/anime/{id}", delete(library::delete_anime))
        .route(
            "/api/library/anime/{id}/sources",
            get(library::list_sources),
        )
        .route(
            "/api/library/anime/{id}/reassociate",
            post(library::reassociate),
        )
        .route("/api/library/source/{id}", delete(library::delete_source))
        .route(
            "/api/library/source/{id}/favorite",
            put(library::toggle_favorite),
        )
        .route(
            "/api/library/source/{id}/incremental",
            put(library::toggle_incremental),
        )
        .route(
            "/api/library/source/{id}/episodes",
            get(library::list_episodes),
        )
        .route(
            "/api/library/source/{id}/refresh",
            post(library::refresh_source),
        )
        .route(
            "/api/library/source/{id}/reorder",
            post(library::reorder_episodes),
        )
        .route(
            "/api/library/source/{id}/manual-import",
            post(library::manual_import),
        )
        .route(
            "/api/library/source/{id}/batch-manual-import",
            post(library::batch_manual_import),
        )
        .route(
            "/api/library/episode/{id}",
            delete(library::delete_episode),
        )
        .route(
            "/api/library/episode/{id}/refresh",
            post(library::refresh_episode),
        )
        .route("/api/library/episodes/offset", post(library::offset_episodes))
        // Tasks
        .route("/api/tasks", get(tasks::list_tasks))
        .route("/api/tasks/{id}", get(tasks::get_task))
        .route("/api/tasks/{id}", delete(tasks::delete_task))
        .route("/api/tasks/{id}/pause", post(tasks::pause_task))
        .route("/api/tasks/{id}/resume", post(tasks::resume_task))
        .route("/api/tasks/{id}/abort", post(tasks::abort_task))
        // Rate limit
        .route("/api/rate-limit/status", get(rate_limit::status))
        // Settings
        .route("/api/settings", get(settings::list_settings))
        .route("/api/settings/{key}", put(settings::update_setting))
        // Tokens & UA rules
        .route("/api/tokens", get(tokens::list_tokens))
        .route("/api/tokens", post(tokens::create_token))
        .route("/api/tokens/{id}", delete(tokens::delete_token))
        .route("/api/tokens/{id}/toggle", post(tokens::toggle_token))
        .route("/api/tokens/{id}/reset", post(tokens::reset_token))
        .route("/api/ua-rules", get(tokens::list_ua_rules))
        .route("/api/ua-rules", post(tokens::add_ua_rule))
        .route("/api/ua-rules/{id}", delete(tokens::delete_ua_rule))
        // Webhook ingress
        .route("/api/webhook/{api_key}", post(webhook::ingest))
        .layer(TraceLayer::new_for_http())
        .layer(timeout)
        .layer(cors)
        .with_state(state)
}
