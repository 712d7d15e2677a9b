//! Tencent Video (v.qq.com) adapter.
//!
//! Search goes through the MultiTerminalSearch endpoint, episode listings
//! through the PageServer detail operation, and comments through the
//! two-step barrage index + segment API.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use danmuhub_core::models::{EpisodeHint, MediaType, ProviderEpisodeInfo, ProviderSearchInfo};
use danmuhub_core::provider::filter::{
    filter_and_renumber, is_junk_title, EpisodeCandidate, ListKind,
};
use danmuhub_core::provider::{
    ConfigurableField, DanmakuProvider, EpisodeUrlId, FieldType, HttpClientFactory, ProgressSink,
    ProviderError, RawComment, RequestPacer, Result,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::ProviderDeps;

const PROVIDER_NAME: &str = "tencent";
const SEARCH_URL: &str =
    "https://pbaccess.video.qq.com/trpc.videosearch.mobile_search.MultiTerminalSearch/MbSearch?vplatform=2";
const EPISODES_URL: &str =
    "https://pbaccess.video.qq.com/trpc.universal_backend_service.page_server_rpc.PageServer/GetPageData?video_appid=3000010&vversion_name=8.2.96&vversion_platform=2";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static COVER_VID_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/x/cover/[^/]+/([a-zA-Z0-9]+)\.html").expect("valid regex")
});
static PAGE_VID_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/x/page/([a-zA-Z0-9]+)\.html").expect("valid regex"));
static COVER_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/x/cover/([a-zA-Z0-9]+)").expect("valid regex"));

// ========== Response shapes ==========

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(rename = "normalList", default)]
    normal_list: Option<SearchItemList>,
}

#[derive(Debug, Deserialize)]
struct SearchItemList {
    #[serde(rename = "itemList", default)]
    item_list: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    doc: Option<SearchDoc>,
    #[serde(rename = "videoInfo", default)]
    video_info: Option<SearchVideoInfo>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchVideoInfo {
    #[serde(default)]
    title: String,
    #[serde(rename = "typeName", default)]
    type_name: String,
    #[serde(default)]
    year: Option<i32>,
    #[serde(rename = "imgUrl", default)]
    img_url: Option<String>,
    #[serde(rename = "subjectDoc", default)]
    subject_doc: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    data: Option<PageData>,
}

#[derive(Debug, Deserialize)]
struct PageData {
    #[serde(rename = "module_list_datas", default)]
    module_list_datas: Vec<ModuleListData>,
}

#[derive(Debug, Deserialize)]
struct ModuleListData {
    #[serde(rename = "module_datas", default)]
    module_datas: Vec<ModuleData>,
}

#[derive(Debug, Deserialize)]
struct ModuleData {
    #[serde(rename = "item_data_lists", default)]
    item_data_lists: Option<ItemDataLists>,
}

#[derive(Debug, Deserialize)]
struct ItemDataLists {
    #[serde(rename = "item_datas", default)]
    item_datas: Vec<ItemData>,
}

#[derive(Debug, Deserialize)]
struct ItemData {
    #[serde(rename = "item_params", default)]
    item_params: Option<EpisodeParams>,
}

#[derive(Debug, Deserialize)]
struct EpisodeParams {
    #[serde(default)]
    vid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    union_title: Option<String>,
    #[serde(default)]
    is_trailer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BarrageIndex {
    #[serde(default)]
    segment_index: std::collections::HashMap<String, BarrageSegmentRef>,
}

#[derive(Debug, Deserialize)]
struct BarrageSegmentRef {
    #[serde(default)]
    segment_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BarrageSegment {
    #[serde(default)]
    barrage_list: Vec<BarrageItem>,
}

#[derive(Debug, Deserialize)]
struct BarrageItem {
    #[serde(default)]
    id: String,
    /// Milliseconds, as a string.
    #[serde(default)]
    time_offset: String,
    #[serde(default)]
    content: String,
    /// Either a JSON object or a JSON-encoded string; parsed leniently.
    #[serde(default)]
    content_style: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct ContentStyle {
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    gradient_colors: Vec<String>,
    #[serde(default)]
    position: Option<i32>,
}

// ========== Adapter ==========

pub struct TencentProvider {
    deps: ProviderDeps,
    http: HttpClientFactory,
    pacer: RequestPacer,
}

impl TencentProvider {
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

    fn item_to_search_info(item: &SearchItem) -> Option<ProviderSearchInfo> {
        let doc = item.doc.as_ref()?;
        let info = item.video_info.as_ref()?;
        if doc.id.is_empty() || info.title.is_empty() {
            return None;
        }
        // Only real cover pages carry a subject doc.
        if info.subject_doc.is_none() && info.type_name.is_empty() {
            return None;
        }
        let title = strip_em_tags(&info.title);
        if is_junk_title(&title) {
            return None;
        }
        let media_type = if info.type_name.contains("电影") {
            MediaType::Movie
        } else {
            MediaType::TvSeries
        };
        Some(ProviderSearchInfo {
            provider: PROVIDER_NAME.to_string(),
            media_id: doc.id.clone(),
            season: danmuhub_core::search::season_from_title(&title) as i32,
            title,
            media_type,
            year: info.year,
            image_url: info.img_url.clone(),
            episode_count: None,
            current_episode_index: None,
            url: Some(format!("https://v.qq.com/x/cover/{}.html", doc.id)),
        })
    }

    async fn fetch_episode_page(
        &self,
        cid: &str,
        page_context: Option<&str>,
    ) -> Result<Vec<EpisodeParams>> {
        let client = self.request().await?;
        let body = json!({
            "page_params": {
                "req_from": "web_vsite",
                "page_id": "vsite_episode_list",
                "page_type": "detail_operation",
                "id_type": "1",
                "cid": cid,
                "page_context": page_context.unwrap_or(""),
            },
            "has_cache": 1,
        });
        let response = client
            .post(EPISODES_URL)
            .header("Origin", "https://v.qq.com")
            .header("Referer", format!("https://v.qq.com/x/cover/{cid}.html"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let page: PageResponse = response.json().await?;

        let mut out = Vec::new();
        for module_list in page.data.map(|d| d.module_list_datas).unwrap_or_default() {
            for module in module_list.module_datas {
                if let Some(lists) = module.item_data_lists {
                    for item in lists.item_datas {
                        if let Some(params) = item.item_params {
                            if !params.vid.is_empty() {
                                out.push(params);
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn strip_em_tags(title: &str) -> String {
    title.replace("<em>", "").replace("</em>", "").trim().to_string()
}

fn parse_content_style(value: &serde_json::Value) -> ContentStyle {
    match value {
        serde_json::Value::String(raw) => serde_json::from_str(raw).unwrap_or_default(),
        serde_json::Value::Object(_) => {
            serde_json::from_value(value.clone()).unwrap_or_default()
        }
        _ => ContentStyle::default(),
    }
}

fn barrage_to_raw(item: BarrageItem) -> Option<RawComment> {
    let time_ms: f64 = item.time_offset.trim().parse().ok()?;
    let style = parse_content_style(&item.content_style);
    let mode = match style.position {
        Some(2) => 5,
        Some(3) => 4,
        _ => 1,
    };
    let color = style
        .gradient_colors
        .first()
        .or(style.color.as_ref())
        .and_then(|hex| u32::from_str_radix(hex.trim_start_matches('#'), 16).ok())
        .unwrap_or(16_777_215);
    Some(RawComment {
        id: item.id,
        time_sec: time_ms / 1000.0,
        mode,
        font_size: 25,
        color,
        text: item.content,
    })
}

#[async_trait]
impl DanmakuProvider for TencentProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn handled_domains(&self) -> &'static [&'static str] {
        &["v.qq.com", "m.v.qq.com"]
    }

    fn rate_limit_quota(&self) -> Option<u32> {
        Some(120)
    }

    fn test_url(&self) -> Option<&'static str> {
        Some("https://v.qq.com")
    }

    fn configurable_fields(&self) -> Vec<ConfigurableField> {
        vec![ConfigurableField {
            key: "tencent_cookie".to_string(),
            label: "腾讯视频 Cookie".to_string(),
            field_type: FieldType::Password,
        }]
    }

    async fn search(
        &self,
        keyword: &str,
        _hint: Option<EpisodeHint>,
    ) -> Result<Vec<ProviderSearchInfo>> {
        let client = self.request().await?;
        let body = json!({
            "version": "",
            "clientType": 1,
            "filterValue": "firstTabid=150",
            "retry": 0,
            "query": keyword,
            "pagenum": 0,
            "pagesize": 30,
            "queryFrom": 4,
            "isneedQc": true,
            "preQid": "",
            "adClientInfo": "",
            "extraInfo": {"isNewMarkLabel": "1"},
        });
        let response = client
            .post(SEARCH_URL)
            .header("Origin", "https://v.qq.com")
            .header("Referer", "https://v.qq.com/")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: SearchResponse = response.json().await?;

        let results: Vec<ProviderSearchInfo> = parsed
            .data
            .and_then(|d| d.normal_list)
            .map(|l| l.item_list)
            .unwrap_or_default()
            .iter()
            .filter_map(Self::item_to_search_info)
            .collect();
        debug!(keyword, count = results.len(), "Tencent search done");
        Ok(results)
    }

    async fn get_info_from_url(&self, url: &str) -> Result<Option<ProviderSearchInfo>> {
        let Some(caps) = COVER_URL_RE.captures(url) else {
            return Ok(None);
        };
        let cid = caps[1].to_string();
        Ok(Some(ProviderSearchInfo {
            provider: PROVIDER_NAME.to_string(),
            media_id: cid.clone(),
            title: cid.clone(),
            media_type: MediaType::TvSeries,
            season: 1,
            year: None,
            image_url: None,
            episode_count: None,
            current_episode_index: None,
            url: Some(format!("https://v.qq.com/x/cover/{cid}.html")),
        }))
    }

    async fn get_id_from_url(&self, url: &str) -> Result<Option<EpisodeUrlId>> {
        if let Some(caps) = COVER_VID_URL_RE.captures(url) {
            return Ok(Some(EpisodeUrlId::Plain(caps[1].to_string())));
        }
        if let Some(caps) = PAGE_VID_URL_RE.captures(url) {
            return Ok(Some(EpisodeUrlId::Plain(caps[1].to_string())));
        }
        Ok(None)
    }

    async fn get_episodes(
        &self,
        media_id: &str,
        target_index: Option<i32>,
        db_media_type: Option<MediaType>,
    ) -> Result<Vec<ProviderEpisodeInfo>> {
        let cache_key = format!("episodes_{PROVIDER_NAME}_{media_id}");
        if target_index.is_none() {
            if let Ok(Some(cached)) = self.deps.cache.get(&cache_key).await {
                if let Ok(episodes) =
                    serde_json::from_value::<Vec<ProviderEpisodeInfo>>(cached)
                {
                    debug!(media_id, "Tencent episode list served from cache");
                    return Ok(episodes);
                }
            }
        }

        let params = self.fetch_episode_page(media_id, None).await?;

        let candidates: Vec<EpisodeCandidate> = params
            .into_iter()
            .filter(|p| p.is_trailer.as_deref() != Some("1"))
            .map(|p| {
                let title = p.union_title.unwrap_or(p.title);
                let mut candidate = EpisodeCandidate::new(p.vid.clone(), title);
                candidate.url = Some(format!(
                    "https://v.qq.com/x/cover/{media_id}/{}.html",
                    p.vid
                ));
                candidate
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

        if target_index.is_none() {
            let ttl = self.deps.config.get_i64("episodes_ttl_seconds", 10_800).await;
            if let Ok(value) = serde_json::to_value(&episodes) {
                let _ = self
                    .deps
                    .cache
                    .set(&cache_key, &value, ttl, Some(PROVIDER_NAME))
                    .await;
            }
        }

        if let Some(target) = target_index {
            episodes.retain(|e| e.episode_index == target);
        }
        info!(media_id, count = episodes.len(), "Tencent episode list ready");
        Ok(episodes)
    }

    async fn get_comments(
        &self,
        episode_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RawComment>> {
        let client = self.request().await?;
        let index_url = format!("https://dm.video.qq.com/barrage/base/{episode_id}");
        let index_body = client
            .get(&index_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        if crate::should_log_responses(&self.deps.config, PROVIDER_NAME, self.is_loggable()).await
        {
            debug!(vid = episode_id, raw = %index_body, "Tencent danmaku index response");
        }
        let index: BarrageIndex = serde_json::from_str(&index_body)
            .map_err(|e| ProviderError::Schema(format!("barrage index: {e}")))?;
        if index.segment_index.is_empty() {
            info!(vid = episode_id, "Tencent video has no danmaku segments");
            return Ok(Vec::new());
        }

        let mut keys: Vec<&String> = index.segment_index.keys().collect();
        keys.sort_by_key(|k| k.parse::<u64>().unwrap_or(u64::MAX));
        let total = keys.len();
        sink.report(5, &format!("找到 {total} 个弹幕分段")).await?;

        let mut comments = Vec::new();
        for (position, key) in keys.iter().enumerate() {
            let Some(name) = index.segment_index[*key].segment_name.as_deref() else {
                continue;
            };
            let progress = 5 + ((position + 1) * 90 / total) as u32;
            sink.report(progress, &format!("正在下载分段 {}/{total}", position + 1))
                .await?;

            self.pacer.pace().await;
            let segment_url =
                format!("https://dm.video.qq.com/barrage/segment/{episode_id}/{name}");
            let segment: BarrageSegment = match client
                .get(&segment_url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
            {
                Ok(response) => response.json().await?,
                Err(e) => {
                    warn!(vid = episode_id, segment = name, "Segment fetch failed: {e}");
                    continue;
                }
            };
            comments.extend(segment.barrage_list.into_iter().filter_map(barrage_to_raw));
        }

        sink.report(100, "弹幕整合完成").await?;
        info!(vid = episode_id, count = comments.len(), "Tencent danmaku fetched");
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vid_parses_from_cover_and_page_urls() {
        assert!(COVER_VID_URL_RE
            .captures("https://v.qq.com/x/cover/mzc00200vmqwq1u/d41005gi1oz.html")
            .is_some_and(|c| &c[1] == "d41005gi1oz"));
        assert!(PAGE_VID_URL_RE
            .captures("https://v.qq.com/x/page/x00354wpkso.html")
            .is_some_and(|c| &c[1] == "x00354wpkso"));
    }

    #[test]
    fn barrage_item_with_string_style_parses() {
        let item = BarrageItem {
            id: "7234".into(),
            time_offset: "15000".into(),
            content: "前方高能".into(),
            content_style: serde_json::Value::String(
                r#"{"color":"ff0000","position":2}"#.into(),
            ),
        };
        let raw = barrage_to_raw(item).expect("parses");
        assert!((raw.time_sec - 15.0).abs() < 1e-9);
        assert_eq!(raw.mode, 5);
        assert_eq!(raw.color, 0x00FF_0000);
    }

    #[test]
    fn barrage_item_without_style_defaults() {
        let item = BarrageItem {
            id: "1".into(),
            time_offset: "500".into(),
            content: "hi".into(),
            content_style: serde_json::Value::Null,
        };
        let raw = barrage_to_raw(item).expect("parses");
        assert_eq!(raw.mode, 1);
        assert_eq!(raw.color, 16_777_215);
    }

    #[test]
    fn bogus_time_offset_is_dropped() {
        let item = BarrageItem {
            id: "1".into(),
            time_offset: "abc".into(),
            content: "hi".into(),
            content_style: serde_json::Value::Null,
        };
        assert!(barrage_to_raw(item).is_none());
    }

    #[test]
    fn em_tags_are_stripped_from_titles() {
        assert_eq!(strip_em_tags("<em>进击</em>的巨人"), "进击的巨人");
    }
}
