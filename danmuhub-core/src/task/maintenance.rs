//! Management-queue tasks: deletes, reorder and offset. Pure database
//! mutations, never blocked by slow providers.

use std::sync::Arc;

use super::{TaskContext, TaskFactory, TaskOutcome};
use crate::models::{AnimeId, EpisodeId, SourceId};
use crate::{Error, Result};

#[must_use]
pub fn delete_anime(ctx: TaskContext, anime_id: AnimeId) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        Box::pin(async move {
            reporter.update(10, "正在删除作品...").await?;
            let deleted = ctx.anime_repo.delete(anime_id).await?;
            if !deleted {
                return Err(Error::NotFound(format!("作品 {anime_id} 不存在")));
            }
            reporter.update(100, "删除完成").await?;
            Ok(TaskOutcome::Completed("作品及其所有数据源已删除。".to_string()))
        })
    })
}

#[must_use]
pub fn delete_source(ctx: TaskContext, source_id: SourceId) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        Box::pin(async move {
            reporter.update(10, "正在删除数据源...").await?;
            let deleted = ctx.anime_repo.delete_source(source_id).await?;
            if !deleted {
                return Err(Error::NotFound(format!("数据源 {source_id} 不存在")));
            }
            reporter.update(100, "删除完成").await?;
            Ok(TaskOutcome::Completed("数据源及其分集与弹幕已删除。".to_string()))
        })
    })
}

#[must_use]
pub fn delete_episode(ctx: TaskContext, episode_id: EpisodeId) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        Box::pin(async move {
            reporter.update(10, "正在删除分集...").await?;
            let deleted = ctx.episode_repo.delete(episode_id).await?;
            if !deleted {
                return Err(Error::NotFound(format!("分集 {episode_id} 不存在")));
            }
            reporter.update(100, "删除完成").await?;
            Ok(TaskOutcome::Completed("分集及其弹幕已删除。".to_string()))
        })
    })
}

#[must_use]
pub fn delete_bulk_episodes(ctx: TaskContext, episode_ids: Vec<EpisodeId>) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        let episode_ids = episode_ids.clone();
        Box::pin(async move {
            let total = episode_ids.len();
            let mut deleted = 0usize;
            for (position, episode_id) in episode_ids.iter().enumerate() {
                let progress = if total > 0 {
                    ((position + 1) * 100 / total) as u32
                } else {
                    100
                };
                reporter
                    .update(progress, &format!("正在删除分集 ({}/{total})", position + 1))
                    .await?;
                if ctx.episode_repo.delete(*episode_id).await? {
                    deleted += 1;
                }
            }
            Ok(TaskOutcome::Completed(format!("批量删除完成，共删除 {deleted} 个分集。")))
        })
    })
}

#[must_use]
pub fn reorder_episodes(ctx: TaskContext, source_id: SourceId) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        Box::pin(async move {
            reporter.update(10, "正在重整集数...").await?;
            let count = ctx.episode_repo.reorder(source_id).await?;
            reporter.update(100, "重整完成").await?;
            Ok(TaskOutcome::Completed(format!("集数重整完成，共 {count} 个分集。")))
        })
    })
}

/// Pre-validate an offset request before any task is submitted: the smallest
/// resulting index must stay >= 1.
pub async fn validate_offset(
    ctx: &TaskContext,
    episode_ids: &[EpisodeId],
    offset: i32,
) -> Result<()> {
    let Some(min_index) = ctx.episode_repo.min_index(episode_ids).await? else {
        return Err(Error::NotFound("未找到任何分集".to_string()));
    };
    if min_index + offset < 1 {
        return Err(Error::InvalidInput(format!(
            "最小集数将为 {}",
            min_index + offset
        )));
    }
    Ok(())
}

#[must_use]
pub fn offset_episodes(ctx: TaskContext, episode_ids: Vec<EpisodeId>, offset: i32) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        let episode_ids = episode_ids.clone();
        Box::pin(async move {
            reporter.update(10, "正在偏移集数...").await?;
            let changed = ctx.episode_repo.offset_indices(&episode_ids, offset).await?;
            reporter.update(100, "偏移完成").await?;
            Ok(TaskOutcome::Completed(format!(
                "集数偏移完成，共调整 {changed} 个分集。"
            )))
        })
    })
}
