//! Refresh tasks: full (fetch-then-replace), incremental (new episodes only)
//! and single-episode (new comments only).

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{info, warn};

use super::import::{fetch_comments_with_retry, retry_policy};
use super::{ProgressReporter, TaskContext, TaskFactory, TaskOutcome};
use crate::danmaku;
use crate::models::{Comment, EpisodeId, MediaType, ProviderEpisodeInfo, SourceId};
use crate::provider::ProviderError;
use crate::{Error, Result};

#[must_use]
pub fn full_refresh(ctx: TaskContext, source_id: SourceId) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        Box::pin(async move { run_full_refresh(ctx, source_id, reporter).await })
    })
}

#[must_use]
pub fn incremental_refresh(ctx: TaskContext, source_id: SourceId) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        Box::pin(async move { run_incremental_refresh(ctx, source_id, reporter).await })
    })
}

#[must_use]
pub fn refresh_episode(ctx: TaskContext, episode_id: EpisodeId) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        Box::pin(async move { run_refresh_episode(ctx, episode_id, reporter).await })
    })
}

async fn load_source(
    ctx: &TaskContext,
    source_id: SourceId,
) -> Result<(crate::models::AnimeSource, MediaType)> {
    let source = ctx
        .anime_repo
        .get_source(source_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("source {source_id} not found")))?;
    let anime = ctx
        .anime_repo
        .get(source.anime_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("work {} not found", source.anime_id)))?;
    Ok((source, anime.media_type))
}

async fn list_episodes(
    ctx: &TaskContext,
    source: &crate::models::AnimeSource,
    media_type: MediaType,
) -> Result<Vec<ProviderEpisodeInfo>> {
    let provider = ctx.registry.get(&source.provider_name)?;
    (|| async {
        provider
            .get_episodes(&source.media_id, None, Some(media_type))
            .await
    })
    .retry(retry_policy())
    .when(ProviderError::is_transient)
    .await
    .map_err(Error::from)
}

/// Full refresh is fetch-then-replace: everything is collected in memory
/// first, and the old data is dropped only when at least one comment came
/// back. An upstream outage therefore never wipes a working source.
async fn run_full_refresh(
    ctx: TaskContext,
    source_id: SourceId,
    reporter: ProgressReporter,
) -> Result<TaskOutcome> {
    let (source, media_type) = load_source(&ctx, source_id).await?;
    let provider = ctx.registry.get(&source.provider_name)?;
    reporter.update(0, "正在获取分集列表...").await?;

    let episodes = list_episodes(&ctx, &source, media_type).await?;
    if episodes.is_empty() {
        return Ok(TaskOutcome::Completed("源未返回任何分集，保留原有数据。".to_string()));
    }

    let total = episodes.len();
    let mut collected: Vec<(ProviderEpisodeInfo, Vec<Comment>)> = Vec::with_capacity(total);
    let mut total_comments = 0usize;

    for (position, episode) in episodes.into_iter().enumerate() {
        let base = (position * 85 / total) as u32 + 5;
        reporter
            .update(base, &format!("正在抓取: {} ({}/{})", episode.title, position + 1, total))
            .await?;

        if let Err(Error::RateLimitExceeded { retry_after_seconds }) =
            ctx.rate_limiter.check(&source.provider_name).await
        {
            return Ok(TaskOutcome::RateLimited {
                retry_after: Duration::from_secs(retry_after_seconds),
                message: format!("速率受限，将在 {retry_after_seconds} 秒后自动重试..."),
            });
        }

        match fetch_comments_with_retry(&provider, &episode.episode_id, &reporter, base, 1).await {
            Ok(raw) => {
                let comments = danmaku::normalize(&source.provider_name, raw);
                ctx.rate_limiter.increment(&source.provider_name).await?;
                total_comments += comments.len();
                collected.push((episode, comments));
            }
            Err(ProviderError::Cancelled) => return Err(Error::TaskCancelled),
            Err(e @ ProviderError::Schema(_)) => {
                warn!(episode = %episode.title, "Skipping episode during refresh: {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if total_comments == 0 {
        return Ok(TaskOutcome::Completed(
            "刷新未获取到任何弹幕，已保留原有数据。".to_string(),
        ));
    }

    reporter.update(92, "正在替换旧数据...").await?;
    ctx.episode_repo.clear_source_data(source_id).await?;

    let mut inserted_total = 0u64;
    for (episode, comments) in collected {
        if comments.is_empty() {
            continue;
        }
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
        inserted_total += ctx.comment_repo.bulk_insert(episode_db_id, &comments).await?;
        ctx.episode_repo.mark_fetched(episode_db_id).await?;
    }

    reporter.update(100, "刷新完成").await?;
    info!(source_id, inserted_total, "Full refresh replaced source data");
    Ok(TaskOutcome::Completed(format!(
        "全量刷新完成，共写入 {inserted_total} 条弹幕。"
    )))
}

/// Incremental refresh imports only episodes the library does not have yet.
async fn run_incremental_refresh(
    ctx: TaskContext,
    source_id: SourceId,
    reporter: ProgressReporter,
) -> Result<TaskOutcome> {
    let (source, media_type) = load_source(&ctx, source_id).await?;
    let provider = ctx.registry.get(&source.provider_name)?;
    reporter.update(0, "正在获取分集列表...").await?;

    let episodes = list_episodes(&ctx, &source, media_type).await?;
    let existing = ctx.episode_repo.list_for_source(source_id).await?;
    let known: std::collections::HashSet<i32> =
        existing.iter().map(|e| e.episode_index).collect();

    let fresh: Vec<ProviderEpisodeInfo> = episodes
        .into_iter()
        .filter(|e| !known.contains(&e.episode_index))
        .collect();
    if fresh.is_empty() {
        return Ok(TaskOutcome::Completed("没有发现新分集。".to_string()));
    }

    let total = fresh.len();
    let mut inserted_total = 0u64;
    for (position, episode) in fresh.iter().enumerate() {
        let base = (position * 90 / total) as u32 + 5;
        reporter
            .update(base, &format!("正在导入新分集: {} ({}/{})", episode.title, position + 1, total))
            .await?;

        if let Err(Error::RateLimitExceeded { retry_after_seconds }) =
            ctx.rate_limiter.check(&source.provider_name).await
        {
            return Ok(TaskOutcome::RateLimited {
                retry_after: Duration::from_secs(retry_after_seconds),
                message: format!("速率受限，将在 {retry_after_seconds} 秒后自动重试..."),
            });
        }

        let raw = match fetch_comments_with_retry(&provider, &episode.episode_id, &reporter, base, 1)
            .await
        {
            Ok(raw) => raw,
            Err(ProviderError::Cancelled) => return Err(Error::TaskCancelled),
            Err(e @ ProviderError::Schema(_)) => {
                warn!(episode = %episode.title, "Skipping new episode: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let comments = danmaku::normalize(&source.provider_name, raw);
        if comments.is_empty() {
            continue;
        }

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
        inserted_total += ctx.comment_repo.bulk_insert(episode_db_id, &comments).await?;
        ctx.episode_repo.mark_fetched(episode_db_id).await?;
        ctx.rate_limiter.increment(&source.provider_name).await?;
    }

    reporter.update(100, "增量刷新完成").await?;
    Ok(TaskOutcome::Completed(format!(
        "增量刷新完成，新增 {} 个分集，共 {inserted_total} 条弹幕。",
        total
    )))
}

/// Single-episode refresh: fetch, diff against stored cids, insert only the
/// new ones.
async fn run_refresh_episode(
    ctx: TaskContext,
    episode_id: EpisodeId,
    reporter: ProgressReporter,
) -> Result<TaskOutcome> {
    let episode = ctx
        .episode_repo
        .get(episode_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("episode {episode_id} not found")))?;
    let (source, _) = load_source(&ctx, episode.source_id).await?;
    let provider = ctx.registry.get(&source.provider_name)?;

    reporter.update(5, &format!("正在刷新: {}", episode.title)).await?;

    if let Err(Error::RateLimitExceeded { retry_after_seconds }) =
        ctx.rate_limiter.check(&source.provider_name).await
    {
        return Ok(TaskOutcome::RateLimited {
            retry_after: Duration::from_secs(retry_after_seconds),
            message: format!("速率受限，将在 {retry_after_seconds} 秒后自动重试..."),
        });
    }

    let raw = match fetch_comments_with_retry(
        &provider,
        &episode.provider_episode_id,
        &reporter,
        10,
        80,
    )
    .await
    {
        Ok(raw) => raw,
        Err(ProviderError::Cancelled) => return Err(Error::TaskCancelled),
        Err(e) => return Err(e.into()),
    };
    ctx.rate_limiter.increment(&source.provider_name).await?;

    let comments = danmaku::normalize(&source.provider_name, raw);
    let existing = ctx.comment_repo.existing_cids(episode_id).await?;
    let fresh: Vec<Comment> = comments
        .into_iter()
        .filter(|c| !existing.contains(&c.cid))
        .collect();

    let inserted = ctx.comment_repo.bulk_insert(episode_id, &fresh).await?;
    ctx.episode_repo.mark_fetched(episode_id).await?;

    reporter.update(100, "刷新完成").await?;
    Ok(TaskOutcome::Completed(format!(
        "分集刷新完成，新增 {inserted} 条弹幕。"
    )))
}
