//! Manual import: custom XML / plain-text uploads and direct URL imports,
//! single and batched.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::import::fetch_comments_with_retry;
use super::{ProgressReporter, TaskContext, TaskFactory, TaskOutcome};
use crate::danmaku::xml::{
    clean_xml_string, convert_text_danmaku_to_xml, parse_xml_content, CUSTOM_XML_TAG,
};
use crate::danmaku;
use crate::models::{AnimeId, SourceId, TaskStatus};
use crate::provider::ProviderError;
use crate::{Error, Result};

/// The pseudo-provider accepting uploaded content instead of URLs.
pub const CUSTOM_PROVIDER: &str = "custom";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualImportItem {
    #[serde(default)]
    pub title: Option<String>,
    pub episode_index: i32,
    /// XML document, plain-text danmaku, or a provider URL.
    pub content: String,
}

#[must_use]
pub fn manual_import(
    ctx: TaskContext,
    source_id: SourceId,
    anime_id: AnimeId,
    provider_name: String,
    item: ManualImportItem,
) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        let provider_name = provider_name.clone();
        let item = item.clone();
        Box::pin(async move {
            run_manual_import(ctx, source_id, anime_id, provider_name, item, reporter).await
        })
    })
}

#[must_use]
pub fn batch_manual_import(
    ctx: TaskContext,
    source_id: SourceId,
    anime_id: AnimeId,
    provider_name: String,
    items: Vec<ManualImportItem>,
) -> TaskFactory {
    Arc::new(move |reporter| {
        let ctx = ctx.clone();
        let provider_name = provider_name.clone();
        let items = items.clone();
        Box::pin(async move {
            run_batch_manual_import(ctx, source_id, anime_id, provider_name, items, reporter).await
        })
    })
}

/// Parse uploaded content (auto-detecting the plain-text fallback) into
/// normalized comments.
fn parse_custom_content(content: &str) -> Vec<crate::models::Comment> {
    let trimmed = content.trim();
    let xml = if trimmed.starts_with('<') {
        trimmed.to_string()
    } else {
        info!("Custom content is not XML, converting from plain-text format");
        convert_text_danmaku_to_xml(trimmed)
    };
    let raw = parse_xml_content(&clean_xml_string(&xml));
    danmaku::normalize(CUSTOM_XML_TAG, raw)
}

async fn run_manual_import(
    ctx: TaskContext,
    source_id: SourceId,
    _anime_id: AnimeId,
    provider_name: String,
    item: ManualImportItem,
    reporter: ProgressReporter,
) -> Result<TaskOutcome> {
    reporter.update(10, "正在准备导入...").await?;
    let final_title = item
        .title
        .clone()
        .unwrap_or_else(|| format!("第 {} 集", item.episode_index));

    if provider_name == CUSTOM_PROVIDER {
        reporter.update(20, "正在解析XML文件...").await?;
        let comments = parse_custom_content(&item.content);
        if comments.is_empty() {
            return Ok(TaskOutcome::Completed("未从XML中解析出任何弹幕。".to_string()));
        }

        reporter.update(80, "正在写入数据库...").await?;
        let episode_db_id = ctx
            .episode_repo
            .create_if_not_exists(source_id, item.episode_index, &final_title, None, "custom_xml")
            .await?;
        let added = ctx.comment_repo.bulk_insert(episode_db_id, &comments).await?;
        return Ok(TaskOutcome::Completed(format!(
            "手动导入完成，从XML新增 {added} 条弹幕。"
        )));
    }

    // URL import through the provider adapter.
    let provider = ctx.registry.get(&provider_name)?;
    let raw_id = provider
        .get_id_from_url(&item.content)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| {
            Error::InvalidInput(format!("无法从URL '{}' 中解析出有效的视频ID。", item.content))
        })?;
    let episode_id_for_comments = provider.format_episode_id_for_comments(&raw_id);
    reporter
        .update(20, &format!("已解析视频ID: {episode_id_for_comments}"))
        .await?;

    if let Err(Error::RateLimitExceeded { retry_after_seconds }) =
        ctx.rate_limiter.check(&provider_name).await
    {
        return Ok(TaskOutcome::RateLimited {
            retry_after: Duration::from_secs(retry_after_seconds),
            message: format!("速率受限，将在 {retry_after_seconds} 秒后自动重试..."),
        });
    }

    let raw = match fetch_comments_with_retry(&provider, &episode_id_for_comments, &reporter, 30, 55)
        .await
    {
        Ok(raw) => raw,
        Err(ProviderError::Cancelled) => return Err(Error::TaskCancelled),
        Err(e) => return Err(e.into()),
    };
    if raw.is_empty() {
        return Ok(TaskOutcome::Completed("未找到任何弹幕。".to_string()));
    }
    ctx.rate_limiter.increment(&provider_name).await?;

    let comments = danmaku::normalize(&provider_name, raw);
    reporter.update(90, "正在写入数据库...").await?;
    let episode_db_id = ctx
        .episode_repo
        .create_if_not_exists(
            source_id,
            item.episode_index,
            &final_title,
            Some(&item.content),
            &episode_id_for_comments,
        )
        .await?;
    let added = ctx.comment_repo.bulk_insert(episode_db_id, &comments).await?;
    ctx.episode_repo.mark_fetched(episode_db_id).await?;
    Ok(TaskOutcome::Completed(format!("手动导入完成，新增 {added} 条弹幕。")))
}

/// Batch import: skips `(source, index)` duplicates, self-pauses on rate
/// limit and retries the same item, and isolates per-item failures.
async fn run_batch_manual_import(
    ctx: TaskContext,
    source_id: SourceId,
    _anime_id: AnimeId,
    provider_name: String,
    items: Vec<ManualImportItem>,
    reporter: ProgressReporter,
) -> Result<TaskOutcome> {
    let total = items.len();
    reporter
        .update(5, &format!("准备批量导入 {total} 个条目..."))
        .await?;

    let mut added_total = 0u64;
    let mut failed = 0usize;
    let mut skipped = 0usize;

    let mut index = 0usize;
    while index < total {
        let item = &items[index];
        let progress = if total > 0 {
            5 + ((index + 1) * 90 / total) as u32
        } else {
            95
        };
        let item_desc = item
            .title
            .clone()
            .unwrap_or_else(|| format!("第 {} 集", item.episode_index));
        reporter
            .update(progress, &format!("正在处理: {item_desc} ({}/{total})", index + 1))
            .await?;

        if ctx.episode_repo.exists(source_id, item.episode_index).await? {
            warn!(episode_index = item.episode_index, "批量导入条目已存在，已跳过");
            skipped += 1;
            index += 1;
            continue;
        }

        let result: Result<u64> = async {
            if provider_name == CUSTOM_PROVIDER {
                let comments = parse_custom_content(&item.content);
                if comments.is_empty() {
                    return Ok(0);
                }
                let episode_db_id = ctx
                    .episode_repo
                    .create_if_not_exists(
                        source_id,
                        item.episode_index,
                        &item_desc,
                        None,
                        "custom_xml",
                    )
                    .await?;
                ctx.comment_repo.bulk_insert(episode_db_id, &comments).await
            } else {
                let provider = ctx.registry.get(&provider_name)?;
                let raw_id = provider
                    .get_id_from_url(&item.content)
                    .await?
                    .ok_or_else(|| Error::InvalidInput("无法解析ID".to_string()))?;
                let episode_id = provider.format_episode_id_for_comments(&raw_id);

                ctx.rate_limiter.check(&provider_name).await?;
                let raw = provider
                    .get_comments(&episode_id, &crate::provider::NoopProgress)
                    .await?;
                if raw.is_empty() {
                    return Ok(0);
                }
                ctx.rate_limiter.increment(&provider_name).await?;
                let comments = danmaku::normalize(&provider_name, raw);
                let episode_db_id = ctx
                    .episode_repo
                    .create_if_not_exists(
                        source_id,
                        item.episode_index,
                        &item_desc,
                        Some(&item.content),
                        &episode_id,
                    )
                    .await?;
                ctx.comment_repo.bulk_insert(episode_db_id, &comments).await
            }
        }
        .await;

        match result {
            Ok(0) => {
                warn!("批量导入条目 '{item_desc}' 解析失败或不含弹幕，已跳过");
                failed += 1;
                index += 1;
            }
            Ok(added) => {
                added_total += added;
                index += 1;
            }
            Err(Error::RateLimitExceeded { retry_after_seconds }) => {
                // Self-pause and retry the same item.
                reporter
                    .update_status(
                        progress,
                        &format!("速率受限，将在 {retry_after_seconds} 秒后自动重试..."),
                        TaskStatus::Paused,
                    )
                    .await?;
                reporter.sleep(Duration::from_secs(retry_after_seconds)).await?;
            }
            Err(Error::TaskCancelled) => return Err(Error::TaskCancelled),
            Err(e) => {
                warn!("处理批量导入条目 '{item_desc}' 时失败: {e}");
                failed += 1;
                index += 1;
            }
        }
    }

    let mut message = format!("批量导入完成。共处理 {total} 个条目，新增 {added_total} 条弹幕。");
    if skipped > 0 {
        message.push_str(&format!(" {skipped} 个因已存在而被跳过。"));
    }
    if failed > 0 {
        message.push_str(&format!(" {failed} 个条目处理失败。"));
    }
    Ok(TaskOutcome::Completed(message))
}
