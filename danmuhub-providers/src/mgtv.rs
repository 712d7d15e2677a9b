//! Mango TV (mgtv.com) adapter.
//!
//! Episode ids are stored as `cid,vid`. Comments prefer the ctlbarrage CDN
//! segments and fall back to the opbarrage paging API when the control
//! endpoint has no CDN data.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use danmuhub_core::models::{EpisodeHint, MediaType, ProviderEpisodeInfo, ProviderSearchInfo};
use danmuhub_core::provider::filter::{
    filter_and_renumber, is_junk_title, EpisodeCandidate, ListKind,
};
use danmuhub_core::provider::{
    DanmakuProvider, EpisodeUrlId, HttpClientFactory, ProgressSink, ProviderError, RawComment,
    RequestPacer, Result,
};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::ProviderDeps;

const PROVIDER_NAME: &str = "mgtv";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static PLAY_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/b/(\d+)/(\d+)\.html").expect("valid regex"));

// ========== Response shapes ==========

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    contents: Vec<SearchContent>,
}

#[derive(Debug, Deserialize)]
struct SearchContent {
    #[serde(rename = "type", default)]
    content_type: String,
    #[serde(default)]
    data: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    img: Option<String>,
    #[serde(rename = "typeName", default)]
    type_name: Option<String>,
    #[serde(default)]
    desc: Vec<String>,
    #[serde(rename = "sourceList", default)]
    source_list: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ShowListResponse {
    #[serde(default)]
    data: Option<ShowListData>,
}

#[derive(Debug, Deserialize)]
struct ShowListData {
    #[serde(default)]
    list: Vec<ShowListEpisode>,
    #[serde(rename = "tab_m", default)]
    month_tabs: Vec<MonthTab>,
}

#[derive(Debug, Deserialize)]
struct MonthTab {
    #[serde(default)]
    m: String,
}

#[derive(Debug, Deserialize)]
struct ShowListEpisode {
    #[serde(rename = "video_id", default)]
    video_id: serde_json::Value,
    /// Air date, e.g. "2024-01-05".
    #[serde(default)]
    t1: Option<String>,
    /// Episode title.
    #[serde(default)]
    t2: Option<String>,
    #[serde(default)]
    t3: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "isIntact", default)]
    is_intact: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CtlBarrageResponse {
    #[serde(default)]
    data: Option<CtlBarrageData>,
}

#[derive(Debug, Deserialize)]
struct CtlBarrageData {
    #[serde(rename = "cdn_host", default)]
    cdn_host: Option<String>,
    #[serde(rename = "cdn_version", default)]
    cdn_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoInfoResponse {
    #[serde(default)]
    data: Option<VideoInfoData>,
}

#[derive(Debug, Deserialize)]
struct VideoInfoData {
    #[serde(default)]
    info: Option<VideoInfo>,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    /// "01:23:45" or "45:30".
    #[serde(default)]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    #[serde(default)]
    data: Option<SegmentData>,
}

#[derive(Debug, Deserialize)]
struct SegmentData {
    #[serde(default)]
    items: Vec<MgtvComment>,
    #[serde(default)]
    next: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MgtvComment {
    #[serde(default)]
    id: i64,
    /// 0 = scroll, 1 = top, 2 = bottom.
    #[serde(rename = "type", default)]
    comment_type: i32,
    /// Milliseconds.
    #[serde(default)]
    time: i64,
    #[serde(default)]
    content: String,
    #[serde(default)]
    color: Option<CommentColor>,
}

#[derive(Debug, Deserialize)]
struct CommentColor {
    #[serde(rename = "color_left", default)]
    color_left: Option<ColorRgb>,
}

#[derive(Debug, Deserialize)]
struct ColorRgb {
    #[serde(default)]
    r: u32,
    #[serde(default)]
    g: u32,
    #[serde(default)]
    b: u32,
}

// ========== Adapter ==========

pub struct MgtvProvider {
    deps: ProviderDeps,
    http: HttpClientFactory,
    pacer: RequestPacer,
}

impl MgtvProvider {
    #[must_use]
    pub fn new(deps: ProviderDeps) -> Self {
        let http = HttpClientFactory::new(PROVIDER_NAME, deps.config.clone())
            .with_timeout(Duration::from_secs(20))
            .with_user_agent(USER_AGENT);
        Self {
            deps,
            http,
            pacer: RequestPacer::new(Duration::from_millis(500)),
        }
    }

    async fn request(&self) -> Result<reqwest::Client> {
        self.pacer.pace().await;
        self.http.client().await
    }

    async fn show_list(&self, collection_id: &str, month: &str) -> Result<Option<ShowListData>> {
        let client = self.request().await?;
        let url = format!(
            "https://pcweb.api.mgtv.com/variety/showlist?allowedRC=1&collection_id={collection_id}&month={month}&page=1&_support=10000000"
        );
        let parsed: ShowListResponse = client
            .get(&url)
            .header("Referer", "https://www.mgtv.com/")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(parsed.data)
    }

    async fn total_minutes(&self, cid: &str, vid: &str) -> Option<u64> {
        let client = self.request().await.ok()?;
        let url = format!(
            "https://pcweb.api.mgtv.com/video/info?allowedRC=1&cid={cid}&vid={vid}&change=3&datatype=1&type=1&_support=10000000"
        );
        let parsed: VideoInfoResponse = client
            .get(&url)
            .header("Referer", "https://www.mgtv.com/")
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;
        let time = parsed.data?.info?.time?;
        let mut parts: Vec<u64> = time
            .split(':')
            .map(|p| p.parse().unwrap_or(0))
            .collect();
        parts.reverse();
        let seconds = parts.first().copied().unwrap_or(0)
            + parts.get(1).copied().unwrap_or(0) * 60
            + parts.get(2).copied().unwrap_or(0) * 3600;
        Some(seconds / 60 + 1)
    }
}

fn split_episode_id(episode_id: &str) -> Result<(&str, &str)> {
    episode_id
        .split_once(',')
        .filter(|(cid, vid)| !cid.is_empty() && !vid.is_empty())
        .ok_or_else(|| ProviderError::InvalidUrl(format!("expected cid,vid got {episode_id}")))
}

fn comment_to_raw(comment: MgtvComment) -> RawComment {
    let mode = match comment.comment_type {
        1 => 5,
        2 => 4,
        _ => 1,
    };
    let color = comment
        .color
        .and_then(|c| c.color_left)
        .map_or(16_777_215, |rgb| {
            ((rgb.r & 0xFF) << 16) | ((rgb.g & 0xFF) << 8) | (rgb.b & 0xFF)
        });
    RawComment {
        id: comment.id.to_string(),
        time_sec: comment.time as f64 / 1000.0,
        mode,
        font_size: 25,
        color,
        text: comment.content,
    }
}

fn video_id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl DanmakuProvider for MgtvProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn handled_domains(&self) -> &'static [&'static str] {
        &["www.mgtv.com"]
    }

    fn test_url(&self) -> Option<&'static str> {
        Some("https://www.mgtv.com")
    }

    async fn search(
        &self,
        keyword: &str,
        _hint: Option<EpisodeHint>,
    ) -> Result<Vec<ProviderSearchInfo>> {
        let client = self.request().await?;
        let url = format!(
            "https://mobileso.bz.mgtv.com/msite/search/v2?q={}&pc=30&pn=1&sort=-99&ty=0&du=0&pt=0&corr=1&abroad=0&_support=10000000000000000",
            percent_encoding::utf8_percent_encode(keyword, percent_encoding::NON_ALPHANUMERIC)
        );
        let parsed: SearchResponse = client
            .get(&url)
            .header("Referer", "https://www.mgtv.com/")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut results = Vec::new();
        for content in parsed.data.map(|d| d.contents).unwrap_or_default() {
            if content.content_type != "media" {
                continue;
            }
            for item in content.data {
                let title = strip_highlight_tags(&item.title);
                if title.is_empty() || is_junk_title(&title) {
                    continue;
                }
                // External-site aggregator hits have no playable source.
                if item.source_list.is_empty() && item.url.is_none() {
                    continue;
                }
                let Some(collection_id) = item
                    .url
                    .as_deref()
                    .and_then(extract_collection_id)
                else {
                    continue;
                };
                let type_name = item.type_name.unwrap_or_default();
                let media_type = if type_name.contains("电影") {
                    MediaType::Movie
                } else {
                    MediaType::TvSeries
                };
                let year = item
                    .desc
                    .iter()
                    .find_map(|d| {
                        d.split(['/', ' '])
                            .find_map(|part| part.trim().parse::<i32>().ok())
                    })
                    .filter(|y| (1900..=2100).contains(y));
                results.push(ProviderSearchInfo {
                    provider: PROVIDER_NAME.to_string(),
                    media_id: collection_id.clone(),
                    season: danmuhub_core::search::season_from_title(&title) as i32,
                    title,
                    media_type,
                    year,
                    image_url: item.img,
                    episode_count: None,
                    current_episode_index: None,
                    url: Some(format!("https://www.mgtv.com/h/{collection_id}.html")),
                });
            }
        }
        debug!(keyword, count = results.len(), "MGTV search done");
        Ok(results)
    }

    async fn get_info_from_url(&self, url: &str) -> Result<Option<ProviderSearchInfo>> {
        let Some(collection_id) = extract_collection_id(url) else {
            return Ok(None);
        };
        Ok(Some(ProviderSearchInfo {
            provider: PROVIDER_NAME.to_string(),
            media_id: collection_id.clone(),
            title: collection_id,
            media_type: MediaType::TvSeries,
            season: 1,
            year: None,
            image_url: None,
            episode_count: None,
            current_episode_index: None,
            url: Some(url.to_string()),
        }))
    }

    async fn get_id_from_url(&self, url: &str) -> Result<Option<EpisodeUrlId>> {
        Ok(PLAY_URL_RE.captures(url).map(|caps| EpisodeUrlId::Pair {
            first: caps[1].to_string(),
            second: caps[2].to_string(),
        }))
    }

    async fn get_episodes(
        &self,
        media_id: &str,
        target_index: Option<i32>,
        db_media_type: Option<MediaType>,
    ) -> Result<Vec<ProviderEpisodeInfo>> {
        // First call returns the current month plus the month tab list.
        let Some(first) = self.show_list(media_id, "").await? else {
            return Ok(Vec::new());
        };
        let mut raw_episodes = first.list;
        let months: Vec<String> = first
            .month_tabs
            .iter()
            .map(|t| t.m.clone())
            .filter(|m| !m.is_empty())
            .collect();
        for month in months.iter().skip(1) {
            if let Some(data) = self.show_list(media_id, month).await? {
                raw_episodes.extend(data.list);
            }
        }

        let candidates: Vec<EpisodeCandidate> = raw_episodes
            .into_iter()
            .filter(|e| e.is_intact.as_deref() != Some("0"))
            .filter_map(|e| {
                let vid = video_id_string(&e.video_id)?;
                let title = e
                    .t2
                    .or(e.t3)
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| vid.clone());
                let mut candidate =
                    EpisodeCandidate::new(format!("{media_id},{vid}"), title);
                candidate.url = e
                    .url
                    .map(|u| format!("https://www.mgtv.com{u}"))
                    .or_else(|| Some(format!("https://www.mgtv.com/b/{media_id}/{vid}.html")));
                candidate.published_at = e
                    .t1
                    .as_deref()
                    .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
                Some(candidate)
            })
            .collect();

        let has_qi = candidates.iter().any(|c| c.title.contains('期'));
        let kind = match db_media_type {
            Some(MediaType::Movie) => ListKind::Movie,
            _ if has_qi => ListKind::Variety,
            _ => ListKind::TvSeries,
        };
        let blacklist = crate::episode_blacklist(&self.deps.config, PROVIDER_NAME, "").await;
        let mut episodes =
            filter_and_renumber(PROVIDER_NAME, candidates, blacklist.as_ref(), kind);
        if let Some(target) = target_index {
            episodes.retain(|e| e.episode_index == target);
        }
        info!(media_id, count = episodes.len(), "MGTV episode list ready");
        Ok(episodes)
    }

    async fn get_comments(
        &self,
        episode_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RawComment>> {
        let (cid, vid) = split_episode_id(episode_id)?;
        let client = self.request().await?;

        let ctl_url = format!(
            "https://galaxy.bz.mgtv.com/getctlbarrage?version=8.1.39&abroad=0&uuid=&os=10.15.7&platform=0&mac=&vid={vid}&pid=&cid={cid}&ticket="
        );
        let ctl: CtlBarrageResponse = client
            .get(&ctl_url)
            .header("Referer", "https://www.mgtv.com/")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let minutes = self.total_minutes(cid, vid).await.unwrap_or(0);
        let mut comments = Vec::new();

        let cdn = ctl
            .data
            .and_then(|d| match (d.cdn_host, d.cdn_version) {
                (Some(host), Some(version)) if !host.is_empty() => Some((host, version)),
                _ => None,
            });

        if let Some((host, version)) = cdn {
            let total = minutes.max(1);
            for minute in 0..total {
                let progress = ((minute + 1) * 95 / total) as u32;
                sink.report(progress, &format!("正在下载分段 {}/{total}", minute + 1))
                    .await?;
                self.pacer.pace().await;
                let segment_url = format!("https://{host}/{version}/{minute}.json");
                match client.get(&segment_url).send().await {
                    Ok(response) if response.status().is_success() => {
                        let segment: SegmentResponse =
                            response.json().await.unwrap_or(SegmentResponse { data: None });
                        if let Some(data) = segment.data {
                            comments.extend(data.items.into_iter().map(comment_to_raw));
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(vid, minute, "MGTV CDN segment failed: {e}"),
                }
            }
        } else {
            // Fallback: page through opbarrage by time offset.
            let mut time_offset: i64 = 0;
            loop {
                sink.report(50, &format!("正在下载弹幕 (offset={time_offset}ms)"))
                    .await?;
                self.pacer.pace().await;
                let fallback_url = format!(
                    "https://galaxy.bz.mgtv.com/cdn/opbarrage?vid={vid}&pid=&cid={cid}&ticket=&time={time_offset}&allowedRC=1"
                );
                let segment: SegmentResponse = client
                    .get(&fallback_url)
                    .header("Referer", "https://www.mgtv.com/")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                let Some(data) = segment.data else { break };
                if data.items.is_empty() {
                    break;
                }
                comments.extend(data.items.into_iter().map(comment_to_raw));
                match data.next {
                    Some(next) if next > 0 => time_offset = next,
                    _ => break,
                }
            }
        }

        sink.report(100, "弹幕处理完成").await?;
        info!(vid, count = comments.len(), "MGTV danmaku fetched");
        Ok(comments)
    }
}

fn strip_highlight_tags(title: &str) -> String {
    title
        .replace("<B>", "")
        .replace("</B>", "")
        .replace("<b>", "")
        .replace("</b>", "")
        .trim()
        .to_string()
}

fn extract_collection_id(url: &str) -> Option<String> {
    static COLLECTION_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"/(?:h|b)/(\d+)").expect("valid regex"));
    COLLECTION_RE.captures(url).map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_url_parses_cid_and_vid() {
        let id = PLAY_URL_RE
            .captures("https://www.mgtv.com/b/334727/7452123.html")
            .expect("matches");
        assert_eq!(&id[1], "334727");
        assert_eq!(&id[2], "7452123");
    }

    #[test]
    fn episode_id_splits_into_cid_vid() {
        assert_eq!(split_episode_id("334727,7452123").expect("ok"), ("334727", "7452123"));
        assert!(split_episode_id("7452123").is_err());
    }

    #[test]
    fn rgb_color_packs_into_24_bits() {
        let comment = MgtvComment {
            id: 1,
            comment_type: 2,
            time: 90_500,
            content: "好看".into(),
            color: Some(CommentColor {
                color_left: Some(ColorRgb { r: 255, g: 128, b: 0 }),
            }),
        };
        let raw = comment_to_raw(comment);
        assert_eq!(raw.mode, 4);
        assert_eq!(raw.color, 0x00FF_8000);
        assert!((raw.time_sec - 90.5).abs() < 1e-9);
    }

    #[test]
    fn collection_id_extracts_from_urls() {
        assert_eq!(extract_collection_id("https://www.mgtv.com/h/334727.html").as_deref(), Some("334727"));
        assert_eq!(extract_collection_id("https://www.mgtv.com/b/334727/7452123.html").as_deref(), Some("334727"));
        assert!(extract_collection_id("https://example.com/x").is_none());
    }
}
