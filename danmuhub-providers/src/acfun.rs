//! AcFun adapter.
//!
//! Serves the external-danmaku path only: search and episode listing are
//! empty, comments are fetched by danmakuId (scraped from the video page).

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use danmuhub_core::models::{EpisodeHint, MediaType, ProviderEpisodeInfo, ProviderSearchInfo};
use danmuhub_core::provider::{
    DanmakuProvider, EpisodeUrlId, HttpClientFactory, ProgressSink, RawComment, RequestPacer,
    Result,
};
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::ProviderDeps;

const PROVIDER_NAME: &str = "acfun";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static DANMAKU_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"danmakuId["']\s*:\s*["'](\d+)["']"#).expect("valid regex"));

#[derive(Debug, Deserialize)]
struct CommentListResponse {
    #[serde(rename = "commentList", default)]
    comment_list: Vec<AcfunComment>,
}

#[derive(Debug, Deserialize)]
struct AcfunComment {
    /// `time,color,mode,...` CSV.
    #[serde(default)]
    c: String,
    #[serde(default)]
    cid: serde_json::Value,
    #[serde(default)]
    m: String,
}

pub struct AcfunProvider {
    http: HttpClientFactory,
    pacer: RequestPacer,
}

impl AcfunProvider {
    #[must_use]
    pub fn new(deps: ProviderDeps) -> Self {
        let http = HttpClientFactory::new(PROVIDER_NAME, deps.config.clone())
            .with_timeout(Duration::from_secs(20))
            .with_user_agent(USER_AGENT);
        Self {
            http,
            pacer: RequestPacer::new(Duration::from_millis(300)),
        }
    }
}

/// AcFun mode field: 1 = scroll, 2 = bottom, 3 = top.
fn comment_to_raw(comment: &AcfunComment) -> Option<RawComment> {
    let parts: Vec<&str> = comment.c.split(',').collect();
    if parts.len() < 4 {
        return None;
    }
    let time_sec: f64 = parts[0].parse().ok()?;
    let color: u32 = parts[1].parse().unwrap_or(16_777_215);
    let mode = match parts[2].parse::<u8>().unwrap_or(1) {
        2 => 4,
        3 => 5,
        _ => 1,
    };
    let cid = match &comment.cid {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => "0".to_string(),
    };
    Some(RawComment {
        id: cid,
        time_sec,
        mode,
        font_size: 25,
        color,
        text: comment.m.clone(),
    })
}

#[async_trait]
impl DanmakuProvider for AcfunProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn handled_domains(&self) -> &'static [&'static str] {
        &["www.acfun.cn"]
    }

    fn test_url(&self) -> Option<&'static str> {
        Some("https://www.acfun.cn")
    }

    async fn search(
        &self,
        _keyword: &str,
        _hint: Option<EpisodeHint>,
    ) -> Result<Vec<ProviderSearchInfo>> {
        Ok(Vec::new())
    }

    async fn get_info_from_url(&self, _url: &str) -> Result<Option<ProviderSearchInfo>> {
        Ok(None)
    }

    /// Scrape the video page for its danmakuId.
    async fn get_id_from_url(&self, url: &str) -> Result<Option<EpisodeUrlId>> {
        self.pacer.pace().await;
        let client = self.http.client().await?;
        let html = client
            .get(url)
            .header("Referer", "https://www.acfun.cn/")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        match DANMAKU_ID_RE.captures(&html) {
            Some(caps) => {
                let danmaku_id = caps[1].to_string();
                info!(url, danmaku_id, "AcFun danmakuId resolved");
                Ok(Some(EpisodeUrlId::Plain(danmaku_id)))
            }
            None => {
                warn!(url, "AcFun page did not expose a danmakuId");
                Ok(None)
            }
        }
    }

    async fn get_episodes(
        &self,
        _media_id: &str,
        _target_index: Option<i32>,
        _db_media_type: Option<MediaType>,
    ) -> Result<Vec<ProviderEpisodeInfo>> {
        Ok(Vec::new())
    }

    async fn get_comments(
        &self,
        episode_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RawComment>> {
        sink.report(10, "正在请求弹幕数据...").await?;
        self.pacer.pace().await;
        let client = self.http.client().await?;
        let url = format!("https://www.acfun.cn/comment_list_json.aspx?contentId={episode_id}");
        let parsed: CommentListResponse = client
            .get(&url)
            .header("Referer", "https://www.acfun.cn/")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        sink.report(
            50,
            &format!("收到 {} 条原始弹幕，正在处理...", parsed.comment_list.len()),
        )
        .await?;
        let comments: Vec<RawComment> = parsed
            .comment_list
            .iter()
            .filter_map(comment_to_raw)
            .collect();
        sink.report(100, "弹幕处理完成").await?;
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_field_parses_time_color_mode() {
        let comment = AcfunComment {
            c: "12.5,16711680,3,25,abc,1700000000".into(),
            cid: serde_json::json!(9981),
            m: "前方高能".into(),
        };
        let raw = comment_to_raw(&comment).expect("parses");
        assert!((raw.time_sec - 12.5).abs() < 1e-9);
        assert_eq!(raw.color, 16_711_680);
        assert_eq!(raw.mode, 5);
        assert_eq!(raw.id, "9981");
    }

    #[test]
    fn short_c_field_is_dropped() {
        let comment = AcfunComment {
            c: "1,2".into(),
            cid: serde_json::Value::Null,
            m: "x".into(),
        };
        assert!(comment_to_raw(&comment).is_none());
    }

    #[test]
    fn danmaku_id_scrapes_from_page_source() {
        let html = r#"window.pageInfo = {"danmakuId":"38492810","title":"x"}"#;
        assert!(DANMAKU_ID_RE
            .captures(html)
            .is_some_and(|c| &c[1] == "38492810"));
    }
}
