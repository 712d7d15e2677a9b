//! Shared services handed to task bodies.

use std::sync::Arc;

use crate::provider::ProviderRegistry;
use crate::repository::{
    AnimeRepository, CacheRepository, CommentRepository, EpisodeRepository, WebhookRepository,
};
use crate::service::{ConfigStore, RateLimiter};

/// Everything an import/refresh/maintenance task body needs. Cloned per task;
/// repositories are pool-backed and cheap to clone.
#[derive(Clone)]
pub struct TaskContext {
    pub anime_repo: AnimeRepository,
    pub episode_repo: EpisodeRepository,
    pub comment_repo: CommentRepository,
    pub cache_repo: CacheRepository,
    pub webhook_repo: WebhookRepository,
    pub config: Arc<ConfigStore>,
    pub registry: Arc<ProviderRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
}
