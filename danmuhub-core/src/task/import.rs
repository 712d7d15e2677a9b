//! Generic import: fetch a provider's episode list and pull comments for
//! every episode, materializing the Work/Source/Episode/Comment graph.

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ProgressReporter, TaskContext, TaskFactory, TaskOutcome};
use crate::danmaku;
use crate::models::{AnimeId, MediaType, ProviderEpisodeInfo, SourceId};
use crate::provider::{DanmakuProvider, ProviderError, RawComment};
use crate::{Error, Result};

/// Retry policy for transient upstream failures: 3 attempts at 1s/2s/4s.
pub(crate) fn retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_factor(2.0)
        .with_max_times(3)
}

/// Fetch comments with transient-error retry and provider-side progress.
pub(crate) async fn fetch_comments_with_retry(
    provider: &Arc<dyn DanmakuProvider>,
    episode_id: &str,
    reporter: &ProgressReporter,
    base_progress: u32,
    span: u32,
) -> std::result::Result<Vec<RawComment>, ProviderError> {
    let sink = reporter.sub_range(base_progress, span);
    (|| async { provider.get_comments(episode_id, &sink).await })
        .retry(retry_policy())
        .when(ProviderError::is_transient)
        .notify(|err: &ProviderError, dur: Duration| {
            warn!(provider = provider.provider_name(), "Retrying comment fetch in {dur:?}: {err}");
        })
        .await
}

/// Parameters of one generic import, also cached for restart recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericImportParams {
    pub provider_name: String,
    pub media_id: String,
    pub title: String,
    pub media_type: MediaType,
    pub season: i32,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub target_episode_index: Option<i32>,
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
    /// Edited-list import: only these (renumbered) indices are fetched.
    #[serde(default)]
    pub selected_indices: Option<Vec<i32>>,
}

impl GenericImportParams {
    /// Dedup key for the task manager.
    #[must_use]
    pub fn unique_key(&self) -> String {
        match self.target_episode_index {
            Some(index) => format!("import-{}-{}-ep{index}", self.provider_name, self.media_id),
            None => format!("import-{}-{}", self.provider_name, self.media_id),
        }
    }
}

#[must_use]
pub fn generic_import(ctx: TaskContext, params: GenericImportParams) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        let params = params.clone();
        Box::pin(async move { run_generic_import(ctx, params, reporter).await })
    })
}

async fn run_generic_import(
    ctx: TaskContext,
    params: GenericImportParams,
    reporter: ProgressReporter,
) -> Result<TaskOutcome> {
    let provider = ctx.registry.get(&params.provider_name)?;
    reporter.update(0, "正在获取分集列表...").await?;

    let episodes = (|| async {
        provider
            .get_episodes(
                &params.media_id,
                params.target_episode_index,
                Some(params.media_type),
            )
            .await
    })
    .retry(retry_policy())
    .when(ProviderError::is_transient)
    .await
    .map_err(Error::from)?;

    let mut episodes: Vec<ProviderEpisodeInfo> = episodes;
    if params.media_type == MediaType::Movie {
        episodes.truncate(1);
    }
    if let Some(target) = params.target_episode_index {
        episodes.retain(|e| e.episode_index == target);
    }
    if let Some(selected) = &params.selected_indices {
        episodes.retain(|e| selected.contains(&e.episode_index));
    }
    if episodes.is_empty() {
        return Ok(TaskOutcome::Completed("未找到任何分集。".to_string()));
    }

    let total = episodes.len();
    let mut ids: Option<(AnimeId, SourceId)> = None;
    let mut total_inserted: u64 = 0;

    for (position, episode) in episodes.iter().enumerate() {
        let base = (position * 90 / total) as u32 + 5;
        reporter
            .update(base, &format!("正在处理: {} ({}/{})", episode.title, position + 1, total))
            .await?;

        // The limiter is the only place this task may pause itself.
        if let Err(Error::RateLimitExceeded { retry_after_seconds }) =
            ctx.rate_limiter.check(&params.provider_name).await
        {
            return Ok(TaskOutcome::RateLimited {
                retry_after: Duration::from_secs(retry_after_seconds),
                message: format!("速率受限，将在 {retry_after_seconds} 秒后自动重试..."),
            });
        }

        let span = (90 / total).max(1) as u32;
        let raw = match fetch_comments_with_retry(&provider, &episode.episode_id, &reporter, base, span)
            .await
        {
            Ok(raw) => raw,
            Err(ProviderError::Cancelled) => return Err(Error::TaskCancelled),
            Err(e @ ProviderError::Schema(_)) => {
                // Keep going; one malformed episode must not sink the import.
                warn!(
                    provider = %params.provider_name,
                    episode = %episode.title,
                    "Skipping episode with unexpected upstream shape: {e}"
                );
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let comments = danmaku::normalize(&params.provider_name, raw);
        if comments.is_empty() {
            continue;
        }

        // First non-empty fetch materializes the work and the source link.
        let (anime_id, source_id) = match ids {
            Some(pair) => pair,
            None => {
                let anime_id = ctx
                    .anime_repo
                    .get_or_create(
                        &params.title,
                        params.media_type,
                        params.season,
                        params.image_url.as_deref(),
                        None,
                        params.year,
                    )
                    .await?;
                ctx.anime_repo
                    .update_metadata_if_empty(
                        anime_id,
                        params.tmdb_id.as_deref(),
                        params.imdb_id.as_deref(),
                        params.tvdb_id.as_deref(),
                        params.douban_id.as_deref(),
                        params.bangumi_id.as_deref(),
                    )
                    .await?;
                let source_id = ctx
                    .anime_repo
                    .link_source(anime_id, &params.provider_name, &params.media_id)
                    .await?;
                ids = Some((anime_id, source_id));
                (anime_id, source_id)
            }
        };

        let episode_db_id = ctx
            .episode_repo
            .create_if_not_exists(
                source_id,
                episode.episode_index,
                &episode.title,
                episode.url.as_deref(),
                &episode.episode_id,
            )
            .await?;
        let inserted = ctx.comment_repo.bulk_insert(episode_db_id, &comments).await?;
        ctx.episode_repo.mark_fetched(episode_db_id).await?;
        total_inserted += inserted;

        ctx.rate_limiter.increment(&params.provider_name).await?;
        maybe_write_danmaku_file(&ctx, anime_id, source_id, episode_db_id, episode.episode_index)
            .await;
        info!(
            anime_id,
            episode_index = episode.episode_index,
            inserted,
            "Episode import committed"
        );
    }

    reporter.update(100, "导入完成").await?;
    if total_inserted == 0 {
        Ok(TaskOutcome::Completed("未找到任何新弹幕。".to_string()))
    } else {
        Ok(TaskOutcome::Completed(format!(
            "导入完成，共新增 {total_inserted} 条弹幕。"
        )))
    }
}

/// File storage backend: mirror the episode's comments to a templated XML
/// path when enabled. Failures only log; the import itself already committed.
async fn maybe_write_danmaku_file(
    ctx: &TaskContext,
    anime_id: AnimeId,
    source_id: SourceId,
    episode_db_id: crate::models::EpisodeId,
    episode_index: i32,
) {
    if !ctx.config.get_bool("custom_danmaku_path_enabled", false).await {
        return;
    }
    let Ok(Some(anime)) = ctx.anime_repo.get(anime_id).await else {
        return;
    };
    let Ok(Some(source)) = ctx.anime_repo.get_source(source_id).await else {
        return;
    };
    let (root_key, template_key) = match anime.media_type {
        MediaType::Movie => ("movie_danmaku_directory_path", "movie_danmaku_filename_template"),
        MediaType::TvSeries => ("tv_danmaku_directory_path", "tv_danmaku_filename_template"),
    };
    let root = ctx.config.get(root_key, "").await;
    let template = ctx.config.get(template_key, "${animeId}/${episodeId}").await;
    if root.is_empty() {
        return;
    }

    let comments = match ctx.comment_repo.all_for_episode(episode_db_id).await {
        Ok(comments) => comments,
        Err(e) => {
            warn!(episode_db_id, "Skipping danmaku file write: {e}");
            return;
        }
    };
    let context = crate::danmaku::path_template::DanmakuPathContext::new(
        &anime,
        &source.provider_name,
        source_id,
        episode_db_id,
        episode_index,
    );
    let path = crate::danmaku::path_template::generate_danmaku_path(&root, &template, &context);
    let xml = crate::danmaku::xml::generate_xml(&comments);

    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!(path = %path.display(), "Failed to create danmaku directory: {e}");
            return;
        }
    }
    if let Err(e) = tokio::fs::write(&path, xml).await {
        warn!(path = %path.display(), "Failed to write danmaku file: {e}");
    } else {
        info!(path = %path.display(), "Danmaku file written");
    }
}
