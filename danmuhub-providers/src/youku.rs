//! Youku adapter.
//!
//! The danmaku API sits behind the mtop gateway: a `_m_h5_tk` token cookie
//! is acquired first, then every request is double-signed (the mtop
//! `t/token/appKey/data` digest plus the inner msg signature).

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
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
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ProviderDeps;

const PROVIDER_NAME: &str = "youku";
const APP_KEY: &str = "24679788";
const MSG_SECRET: &str = "MkmC9SoIw6xCkSKHhJ7b5D2r51kBiREr";
const OPENAPI_CLIENT_ID: &str = "53e6cc67237fc59a";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static VID_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"id_([A-Za-z0-9+/=]+)\.html").expect("valid regex"));
static SHOW_ID_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"youku\.com/show/id_([A-Za-z0-9=]+)").expect("valid regex"));

// ========== Response shapes ==========

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "pageComponentList", default)]
    components: Vec<SearchComponent>,
}

#[derive(Debug, Deserialize)]
struct SearchComponent {
    #[serde(rename = "commonData", default)]
    common: Option<SearchCommonData>,
}

#[derive(Debug, Deserialize)]
struct SearchCommonData {
    #[serde(rename = "showId", default)]
    show_id: Option<String>,
    #[serde(rename = "titleDTO", default)]
    title: Option<SearchTitle>,
    #[serde(default)]
    feature: Option<String>,
    #[serde(rename = "isYouku", default)]
    is_youku: Option<i32>,
    #[serde(rename = "posterDTO", default)]
    poster: Option<SearchPoster>,
    #[serde(rename = "episodeTotal", default)]
    episode_total: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct SearchTitle {
    #[serde(rename = "displayName", default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchPoster {
    #[serde(rename = "vThumbUrl", default)]
    v_thumb_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    videos: Vec<VideoItem>,
    #[serde(default)]
    total: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MtopEnvelope {
    #[serde(default)]
    data: MtopData,
}

#[derive(Debug, Default, Deserialize)]
struct MtopData {
    /// JSON-encoded payload: `{"result": [...]}`.
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DanmakuResult {
    #[serde(default)]
    data: Option<DanmakuResultData>,
}

#[derive(Debug, Deserialize)]
struct DanmakuResultData {
    #[serde(default)]
    result: Vec<YoukuComment>,
}

#[derive(Debug, Deserialize)]
struct YoukuComment {
    #[serde(default)]
    id: i64,
    /// Milliseconds into the video.
    #[serde(default)]
    playat: i64,
    #[serde(default)]
    content: String,
    /// JSON-encoded style string: `{"color":16777215,"pos":1}`.
    #[serde(default)]
    propertis: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CommentProperties {
    #[serde(default)]
    color: Option<u32>,
    #[serde(default)]
    pos: Option<u8>,
}

// ========== Adapter ==========

pub struct YoukuProvider {
    deps: ProviderDeps,
    http: HttpClientFactory,
    pacer: RequestPacer,
    /// `_m_h5_tk` token half, refreshed when the gateway rotates it.
    token: Mutex<Option<String>>,
}

impl YoukuProvider {
    #[must_use]
    pub fn new(deps: ProviderDeps) -> Self {
        let http = HttpClientFactory::new(PROVIDER_NAME, deps.config.clone())
            .with_timeout(Duration::from_secs(20))
            .with_user_agent(USER_AGENT);
        Self {
            deps,
            http,
            pacer: RequestPacer::new(Duration::from_millis(400)),
            token: Mutex::new(None),
        }
    }

    async fn request(&self) -> Result<reqwest::Client> {
        self.pacer.pace().await;
        self.http.client().await
    }

    /// Acquire the mtop token cookie. The first gateway call always fails
    /// with `FAIL_SYS_TOKEN_EMPTY` but sets `_m_h5_tk`; the cookie store
    /// keeps it for the signed calls that follow.
    async fn ensure_token(&self) -> Result<String> {
        {
            let token = self.token.lock().await;
            if let Some(token) = token.as_ref() {
                return Ok(token.clone());
            }
        }
        let client = self.request().await?;
        let response = client
            .get("https://acs.youku.com/h5/mtop.com.youku.aplatform.weakget/1.0/?jsv=2.5.1&appKey=24679788")
            .header("Referer", "https://v.youku.com")
            .send()
            .await?;
        let token_half = response
            .cookies()
            .find(|c| c.name() == "_m_h5_tk")
            .and_then(|c| c.value().split('_').next().map(ToString::to_string))
            .ok_or_else(|| ProviderError::Schema("mtop gateway did not set _m_h5_tk".into()))?;
        *self.token.lock().await = Some(token_half.clone());
        Ok(token_half)
    }

    async fn fetch_danmaku_segment(&self, vid: &str, minute: u64) -> Result<Vec<YoukuComment>> {
        let token = self.ensure_token().await?;
        let ctime = chrono::Utc::now().timestamp_millis();

        let mut msg = json!({
            "ctime": ctime,
            "ctype": 10004,
            "cver": "v1.0",
            "guid": format!("{:032x}", md5::compute(vid.as_bytes())),
            "mat": minute,
            "mcount": 1,
            "pid": 0,
            "sver": "3.1.0",
            "type": 1,
            "vid": vid,
        });
        let msg_b64 = base64::engine::general_purpose::STANDARD
            .encode(serde_json::to_vec(&msg)?);
        let msg_sign = format!("{:x}", md5::compute(format!("{msg_b64}{MSG_SECRET}")));
        msg["msg"] = json!(msg_b64);
        msg["sign"] = json!(msg_sign);

        let data = serde_json::to_string(&msg)?;
        let t = chrono::Utc::now().timestamp_millis().to_string();
        let sign = format!("{:x}", md5::compute(format!("{token}&{t}&{APP_KEY}&{data}")));

        let client = self.request().await?;
        let response = client
            .post(format!(
                "https://acs.youku.com/h5/mopen.youku.danmu.list/1.0/?jsv=2.5.1&appKey={APP_KEY}&t={t}&sign={sign}&api=mopen.youku.danmu.list&v=1.0&type=originaljson&dataType=jsonp&timeout=20000&jsonpIncPrefix=utility"
            ))
            .header("Referer", "https://v.youku.com")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&[("data", data.as_str())])
            .send()
            .await?
            .error_for_status()?;

        let envelope: MtopEnvelope = response.json().await?;
        let Some(result) = envelope.data.result else {
            // Token expired: clear it so the next call re-acquires.
            *self.token.lock().await = None;
            return Ok(Vec::new());
        };
        let parsed: DanmakuResult = serde_json::from_str(&result)?;
        Ok(parsed.data.map(|d| d.result).unwrap_or_default())
    }
}

fn comment_to_raw(comment: YoukuComment) -> RawComment {
    let style: CommentProperties = comment
        .propertis
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let mode = match style.pos {
        Some(1) => 5,
        Some(2) => 4,
        _ => 1,
    };
    RawComment {
        id: comment.id.to_string(),
        time_sec: comment.playat as f64 / 1000.0,
        mode,
        font_size: 25,
        color: style.color.unwrap_or(16_777_215) & 0x00FF_FFFF,
        text: comment.content,
    }
}

/// Parse `mm:ss` or plain-second duration strings from the openapi.
fn duration_minutes(duration: Option<&str>) -> Option<u64> {
    let duration = duration?;
    let seconds = if let Some((m, s)) = duration.split_once(':') {
        m.parse::<f64>().ok()? * 60.0 + s.parse::<f64>().ok()?
    } else {
        duration.parse::<f64>().ok()?
    };
    Some((seconds / 60.0).floor() as u64 + 1)
}

#[async_trait]
impl DanmakuProvider for YoukuProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn handled_domains(&self) -> &'static [&'static str] {
        &["v.youku.com", "www.youku.com"]
    }

    fn test_url(&self) -> Option<&'static str> {
        Some("https://www.youku.com")
    }

    async fn search(
        &self,
        keyword: &str,
        _hint: Option<EpisodeHint>,
    ) -> Result<Vec<ProviderSearchInfo>> {
        let client = self.request().await?;
        let url = format!(
            "https://search.youku.com/api/search?keyword={}&userAgent={}&site=1&categories=0&ftype=0&ob=0&pg=1",
            percent_encoding::utf8_percent_encode(keyword, percent_encoding::NON_ALPHANUMERIC),
            percent_encoding::utf8_percent_encode(USER_AGENT, percent_encoding::NON_ALPHANUMERIC),
        );
        let parsed: SearchResponse = client
            .get(&url)
            .header("Referer", "https://www.youku.com/")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let results = parsed
            .components
            .into_iter()
            .filter_map(|component| {
                let common = component.common?;
                let show_id = common.show_id?;
                let title = common.title.map(|t| t.display_name).unwrap_or_default();
                if title.is_empty() || is_junk_title(&title) {
                    return None;
                }
                if common.is_youku == Some(0) {
                    return None;
                }
                let feature = common.feature.unwrap_or_default();
                let media_type = if feature.contains("电影") {
                    MediaType::Movie
                } else {
                    MediaType::TvSeries
                };
                // Feature strings read like "2021 · 电视剧 · 爱情".
                let year = feature
                    .split(['·', ' '])
                    .find_map(|part| part.trim().parse::<i32>().ok())
                    .filter(|y| (1900..=2100).contains(y));
                Some(ProviderSearchInfo {
                    provider: PROVIDER_NAME.to_string(),
                    media_id: show_id.clone(),
                    season: danmuhub_core::search::season_from_title(&title) as i32,
                    title,
                    media_type,
                    year,
                    image_url: common.poster.and_then(|p| p.v_thumb_url),
                    episode_count: common.episode_total,
                    current_episode_index: None,
                    url: Some(format!("https://www.youku.com/show/id_{show_id}")),
                })
            })
            .collect::<Vec<_>>();
        debug!(keyword, count = results.len(), "Youku search done");
        Ok(results)
    }

    async fn get_info_from_url(&self, url: &str) -> Result<Option<ProviderSearchInfo>> {
        let Some(caps) = SHOW_ID_URL_RE.captures(url) else {
            return Ok(None);
        };
        let show_id = caps[1].to_string();
        Ok(Some(ProviderSearchInfo {
            provider: PROVIDER_NAME.to_string(),
            media_id: show_id.clone(),
            title: show_id,
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
        Ok(VID_URL_RE
            .captures(url)
            .map(|caps| EpisodeUrlId::Plain(caps[1].to_string())))
    }

    async fn get_episodes(
        &self,
        media_id: &str,
        target_index: Option<i32>,
        db_media_type: Option<MediaType>,
    ) -> Result<Vec<ProviderEpisodeInfo>> {
        let client = self.request().await?;
        let mut candidates = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "https://openapi.youku.com/v2/shows/videos.json?client_id={OPENAPI_CLIENT_ID}&package=com.huawei.hwvplayer.youku&ext=show&show_id={media_id}&page={page}&count=50"
            );
            let parsed: VideosResponse = client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            if parsed.videos.is_empty() {
                break;
            }
            let total = parsed.total.unwrap_or(0);
            for video in parsed.videos {
                let mut candidate = EpisodeCandidate::new(video.id.clone(), video.title);
                candidate.url = video
                    .link
                    .or_else(|| Some(format!("https://v.youku.com/v_show/id_{}.html", video.id)));
                candidates.push(candidate);
            }
            if candidates.len() as i64 >= total || page > 20 {
                break;
            }
            page += 1;
            self.pacer.pace().await;
        }

        let kind = match db_media_type {
            Some(MediaType::Movie) => ListKind::Movie,
            _ => ListKind::TvSeries,
        };
        let blacklist = crate::episode_blacklist(&self.deps.config, PROVIDER_NAME, "").await;
        let mut episodes =
            filter_and_renumber(PROVIDER_NAME, candidates, blacklist.as_ref(), kind);
        if let Some(target) = target_index {
            episodes.retain(|e| e.episode_index == target);
        }
        info!(media_id, count = episodes.len(), "Youku episode list ready");
        Ok(episodes)
    }

    async fn get_comments(
        &self,
        episode_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RawComment>> {
        // Minute-indexed segments; probe duration via the openapi first.
        let client = self.request().await?;
        let duration = client
            .get(format!(
                "https://openapi.youku.com/v2/videos/show_basic.json?client_id={OPENAPI_CLIENT_ID}&package=com.huawei.hwvplayer.youku&video_id={episode_id}"
            ))
            .send()
            .await
            .ok()
            .and_then(|r| r.error_for_status().ok());
        let minutes = match duration {
            Some(response) => response
                .json::<VideoItem>()
                .await
                .ok()
                .and_then(|video| duration_minutes(video.duration.as_deref())),
            None => None,
        };
        let max_segments = self
            .deps
            .config
            .get_i64("danmaku_max_segments", 100)
            .await
            .max(1) as u64;
        let total = minutes.unwrap_or(max_segments).min(max_segments);

        let mut comments = Vec::new();
        let mut empty_streak = 0u32;
        for minute in 0..total {
            let progress = ((minute + 1) * 95 / total) as u32;
            sink.report(progress, &format!("正在下载分段 {}/{total}", minute + 1))
                .await?;
            match self.fetch_danmaku_segment(episode_id, minute).await {
                Ok(batch) => {
                    if batch.is_empty() {
                        empty_streak += 1;
                        // Without a known duration, stop after a quiet stretch.
                        if minutes.is_none() && empty_streak >= 5 {
                            break;
                        }
                    } else {
                        empty_streak = 0;
                        comments.extend(batch.into_iter().map(comment_to_raw));
                    }
                }
                Err(e) => {
                    warn!(vid = episode_id, minute, "Youku segment fetch failed: {e}");
                }
            }
        }

        sink.report(100, "弹幕处理完成").await?;
        info!(vid = episode_id, count = comments.len(), "Youku danmaku fetched");
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vid_extracts_from_play_url() {
        assert!(VID_URL_RE
            .captures("https://v.youku.com/v_show/id_XNDM0NzE5MzY0NA==.html")
            .is_some_and(|c| &c[1] == "XNDM0NzE5MzY0NA=="));
    }

    #[test]
    fn duration_parses_both_formats() {
        assert_eq!(duration_minutes(Some("1452.52")), Some(25));
        assert_eq!(duration_minutes(Some("45:30")), Some(46));
        assert_eq!(duration_minutes(None), None);
    }

    #[test]
    fn comment_styles_map_to_modes() {
        let comment = YoukuComment {
            id: 7,
            playat: 61_000,
            content: "弹幕".into(),
            propertis: Some(r#"{"color":255,"pos":2}"#.into()),
        };
        let raw = comment_to_raw(comment);
        assert_eq!(raw.mode, 4);
        assert_eq!(raw.color, 255);
        assert!((raw.time_sec - 61.0).abs() < 1e-9);
    }

    #[test]
    fn missing_properties_default_to_white_scroll() {
        let comment = YoukuComment {
            id: 8,
            playat: 0,
            content: "x".into(),
            propertis: None,
        };
        let raw = comment_to_raw(comment);
        assert_eq!(raw.mode, 1);
        assert_eq!(raw.color, 16_777_215);
    }
}
