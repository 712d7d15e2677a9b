//! Service wiring and HTTP server startup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};

use danmuhub_api::{build_router, AppState};
use danmuhub_core::provider::ProviderRegistry;
use danmuhub_core::repository::{
    AnimeRepository, CacheRepository, CommentRepository, ConfigRepository, EpisodeRepository,
    RateLimitRepository, TaskHistoryRepository, TokenRepository, WebhookRepository,
};
use danmuhub_core::search::SearchPipeline;
use danmuhub_core::service::{ConfigStore, RateLimiter};
use danmuhub_core::task::{webhook::spawn_webhook_pump, TaskContext, TaskManager};
use danmuhub_core::Config;
use danmuhub_providers::ProviderDeps;

const CACHE_EVICT_INTERVAL: Duration = Duration::from_secs(600);

pub struct DanmuHubServer {
    config: Arc<Config>,
    state: AppState,
}

impl DanmuHubServer {
    /// Wire every service from the pool and the loaded config.
    pub async fn build(config: Config, pool: PgPool) -> Result<Self> {
        let config = Arc::new(config);

        // Config store, seeded with defaults.
        let config_store = Arc::new(ConfigStore::new(ConfigRepository::new(pool.clone())));
        config_store.initialize().await?;

        // Repositories.
        let anime_repo = AnimeRepository::new(pool.clone());
        let episode_repo = EpisodeRepository::new(pool.clone());
        let comment_repo = CommentRepository::new(pool.clone());
        let cache_repo = CacheRepository::new(pool.clone());
        let webhook_repo = WebhookRepository::new(pool.clone());
        let task_history = TaskHistoryRepository::new(pool.clone());
        let token_repo = TokenRepository::new(pool.clone());

        // Provider registry with all built-in adapters.
        let mut registry = ProviderRegistry::new(config_store.clone());
        let deps = ProviderDeps {
            config: config_store.clone(),
            cache: cache_repo.clone(),
        };
        danmuhub_providers::register_all(&mut registry, &deps);
        let registry = Arc::new(registry);

        // Rate limiter: adapter quotas plus the signed artifact set.
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitRepository::new(pool.clone())));
        let quotas: HashMap<String, Option<u32>> = registry
            .all()
            .iter()
            .map(|p| (p.provider_name().to_string(), p.rate_limit_quota()))
            .collect();
        rate_limiter.set_provider_quotas(quotas).await;
        rate_limiter
            .load_artifacts(Path::new(&config.rate_limit.config_dir))
            .await?;
        if rate_limiter.verification_failed().await {
            warn!("Rate limit artifact verification failed; all provider fetches will be refused");
        }

        // Search pipeline. Metadata sources (TMDB/Bangumi/Douban) plug in
        // here when configured; none ship in-process.
        let search = Arc::new(SearchPipeline::new(
            registry.clone(),
            cache_repo.clone(),
            config_store.clone(),
            Vec::new(),
        ));

        // Task manager and its workers.
        let task_ctx = TaskContext {
            anime_repo,
            episode_repo,
            comment_repo,
            cache_repo: cache_repo.clone(),
            webhook_repo,
            config: config_store.clone(),
            registry: registry.clone(),
            rate_limiter: rate_limiter.clone(),
        };
        let task_manager = TaskManager::new(task_history.clone());
        task_manager.start();

        // Background pumps.
        let _webhook_pump = spawn_webhook_pump(task_ctx.clone(), task_manager.clone());
        spawn_cache_eviction(cache_repo);

        let state = AppState {
            config: config.clone(),
            config_store,
            registry,
            search,
            rate_limiter,
            task_manager,
            task_ctx,
            task_history,
            token_repo,
        };

        Ok(Self { config, state })
    }

    /// Serve HTTP until ctrl-c.
    pub async fn start(self) -> Result<()> {
        let router = build_router(self.state);
        let address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&address).await?;
        info!("HTTP server listening on {address}");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("HTTP server stopped");
        Ok(())
    }
}

fn spawn_cache_eviction(cache_repo: CacheRepository) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CACHE_EVICT_INTERVAL);
        loop {
            ticker.tick().await;
            match cache_repo.evict_expired().await {
                Ok(0) => {}
                Ok(evicted) => info!(evicted, "Evicted expired cache entries"),
                Err(e) => warn!("Cache eviction failed: {e}"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install ctrl-c handler: {e}");
    }
    info!("Shutdown signal received");
}
