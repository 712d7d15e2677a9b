//! Bilibili adapter.
//!
//! Search uses the WBI-signed web search API (the mixin key is derived from
//! the nav endpoint and cached for an hour). Episode listings distinguish
//! PGC seasons (`ss` media ids) from UGC multi-page videos (`BV` ids), and
//! comments come from the legacy per-cid XML endpoint, inflating the raw
//! deflate stream when the CDN serves one.

use std::io::Read;
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
use moka::future::Cache;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::ProviderDeps;

const PROVIDER_NAME: &str = "bilibili";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static BANGUMI_EP_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bangumi/play/ep(\d+)").expect("valid regex"));
static BANGUMI_SS_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bangumi/play/ss(\d+)").expect("valid regex"));
static VIDEO_BV_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"video/(BV[0-9A-Za-z]+)").expect("valid regex"));
static PAGE_QUERY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]p=(\d+)").expect("valid regex"));

/// WBI mixin-key reorder table.
const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22,
    25, 54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

// ========== Response shapes ==========

#[derive(Debug, Deserialize)]
struct NavResponse {
    #[serde(default)]
    data: Option<NavData>,
}

#[derive(Debug, Deserialize)]
struct NavData {
    #[serde(default)]
    wbi_img: Option<WbiImg>,
}

#[derive(Debug, Deserialize)]
struct WbiImg {
    #[serde(default)]
    img_url: String,
    #[serde(default)]
    sub_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    result: Vec<SearchMedia>,
}

#[derive(Debug, Deserialize)]
struct SearchMedia {
    #[serde(default)]
    media_id: Option<i64>,
    #[serde(default)]
    season_id: Option<i64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    season_type_name: String,
    #[serde(default)]
    cover: Option<String>,
    #[serde(default)]
    ep_size: Option<i32>,
    #[serde(default)]
    pubtime: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SeasonResponse {
    #[serde(default)]
    result: Option<SeasonResult>,
}

#[derive(Debug, Deserialize)]
struct SeasonResult {
    #[serde(default)]
    episodes: Vec<SeasonEpisode>,
}

#[derive(Debug, Deserialize)]
struct SeasonEpisode {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    aid: i64,
    #[serde(default)]
    cid: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    long_title: Option<String>,
    #[serde(default)]
    badge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ViewResponse {
    #[serde(default)]
    data: Option<ViewData>,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    #[serde(default)]
    aid: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    pic: Option<String>,
    #[serde(default)]
    pages: Vec<ViewPage>,
}

#[derive(Debug, Deserialize)]
struct ViewPage {
    #[serde(default)]
    cid: i64,
    #[serde(default)]
    page: i32,
    #[serde(default)]
    part: String,
}

// ========== Adapter ==========

pub struct BilibiliProvider {
    deps: ProviderDeps,
    http: HttpClientFactory,
    pacer: RequestPacer,
    /// WBI mixin key, refreshed hourly.
    mixin_key: Cache<(), String>,
}

impl BilibiliProvider {
    #[must_use]
    pub fn new(deps: ProviderDeps) -> Self {
        let http = HttpClientFactory::new(PROVIDER_NAME, deps.config.clone())
            .with_timeout(Duration::from_secs(20))
            .with_user_agent(USER_AGENT);
        Self {
            deps,
            http,
            pacer: RequestPacer::new(Duration::from_millis(400)),
            mixin_key: Cache::builder()
                .max_capacity(1)
                .time_to_live(Duration::from_secs(3600))
                .build(),
        }
    }

    async fn request(&self) -> Result<reqwest::Client> {
        self.pacer.pace().await;
        self.http.client().await
    }

    /// Session cookie header from config (buvid3 et al).
    async fn cookie_header(&self) -> String {
        self.deps.config.get("bilibili_cookie", "").await
    }

    async fn wbi_mixin_key(&self) -> Result<String> {
        if let Some(key) = self.mixin_key.get(&()).await {
            return Ok(key);
        }
        let client = self.request().await?;
        let nav: NavResponse = client
            .get("https://api.bilibili.com/x/web-interface/nav")
            .header("Referer", "https://www.bilibili.com/")
            .send()
            .await?
            .json()
            .await?;
        let wbi = nav
            .data
            .and_then(|d| d.wbi_img)
            .ok_or_else(|| ProviderError::Schema("nav response missing wbi keys".into()))?;
        let raw = format!("{}{}", key_from_url(&wbi.img_url), key_from_url(&wbi.sub_url));
        let key = mixin_key(&raw);
        self.mixin_key.insert((), key.clone()).await;
        Ok(key)
    }

    async fn search_one_type(
        &self,
        keyword: &str,
        search_type: &str,
    ) -> Result<Vec<ProviderSearchInfo>> {
        let mixin = self.wbi_mixin_key().await?;
        let mut params = vec![
            ("search_type".to_string(), search_type.to_string()),
            ("keyword".to_string(), keyword.to_string()),
        ];
        sign_wbi(&mut params, &mixin);
        let query: Vec<(&str, &str)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let client = self.request().await?;
        let response: SearchResponse = client
            .get("https://api.bilibili.com/x/web-interface/wbi/search/type")
            .query(&query)
            .header("Referer", "https://www.bilibili.com/")
            .header("Cookie", self.cookie_header().await)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if response.code != 0 {
            return Err(ProviderError::Schema(format!(
                "bilibili search returned code {}",
                response.code
            )));
        }

        let results = response
            .data
            .map(|d| d.result)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|media| {
                let season_id = media.season_id?;
                let title = strip_em_tags(&media.title);
                if title.is_empty() || is_junk_title(&title) {
                    return None;
                }
                let media_type = if media.season_type_name.contains("电影") {
                    MediaType::Movie
                } else {
                    MediaType::TvSeries
                };
                let year = media
                    .pubtime
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                    .map(|dt| chrono::Datelike::year(&dt));
                let _ = media.media_id;
                Some(ProviderSearchInfo {
                    provider: PROVIDER_NAME.to_string(),
                    media_id: format!("ss{season_id}"),
                    season: danmuhub_core::search::season_from_title(&title) as i32,
                    title,
                    media_type,
                    year,
                    image_url: media.cover.map(|c| {
                        if c.starts_with("//") {
                            format!("https:{c}")
                        } else {
                            c
                        }
                    }),
                    episode_count: media.ep_size,
                    current_episode_index: None,
                    url: Some(format!("https://www.bilibili.com/bangumi/play/ss{season_id}")),
                })
            })
            .collect();
        Ok(results)
    }

    async fn pgc_episodes(&self, season_id: &str) -> Result<Vec<EpisodeCandidate>> {
        let client = self.request().await?;
        let url = format!("https://api.bilibili.com/pgc/view/web/season?season_id={season_id}");
        let season: SeasonResponse = client
            .get(&url)
            .header("Referer", "https://www.bilibili.com/")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let episodes = season
            .result
            .map(|r| r.episodes)
            .unwrap_or_default()
            .into_iter()
            .filter(|ep| ep.badge.as_deref() != Some("预告"))
            .map(|ep| {
                let title = match &ep.long_title {
                    Some(long) if !long.is_empty() => format!("{} {}", ep.title, long),
                    _ => ep.title.clone(),
                };
                let mut candidate =
                    EpisodeCandidate::new(format!("{},{}", ep.aid, ep.cid), title);
                candidate.url =
                    Some(format!("https://www.bilibili.com/bangumi/play/ep{}", ep.id));
                candidate
            })
            .collect();
        Ok(episodes)
    }

    async fn ugc_episodes(&self, bvid: &str) -> Result<Vec<EpisodeCandidate>> {
        let client = self.request().await?;
        let url = format!("https://api.bilibili.com/x/web-interface/view?bvid={bvid}");
        let view: ViewResponse = client
            .get(&url)
            .header("Referer", "https://www.bilibili.com/")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let Some(data) = view.data else {
            return Err(ProviderError::NotFound);
        };

        let aid = data.aid;
        let episodes = data
            .pages
            .into_iter()
            .map(|page| {
                let title = if page.part.is_empty() {
                    format!("P{}", page.page)
                } else {
                    page.part
                };
                let mut candidate = EpisodeCandidate::new(format!("{aid},{}", page.cid), title);
                candidate.url = Some(format!(
                    "https://www.bilibili.com/video/{bvid}?p={}",
                    page.page
                ));
                candidate
            })
            .collect();
        Ok(episodes)
    }
}

fn strip_em_tags(title: &str) -> String {
    title
        .replace("<em class=\"keyword\">", "")
        .replace("</em>", "")
        .trim()
        .to_string()
}

fn key_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|name| name.split('.').next())
        .unwrap_or_default()
        .to_string()
}

/// Derive the 32-char mixin key from the concatenated img+sub keys.
fn mixin_key(raw: &str) -> String {
    let bytes = raw.as_bytes();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&i| bytes.get(i).map(|&b| b as char))
        .take(32)
        .collect()
}

/// Sign query params in place: appends `wts` and `w_rid`.
fn sign_wbi(params: &mut Vec<(String, String)>, mixin: &str) {
    let wts = chrono::Utc::now().timestamp().to_string();
    params.push(("wts".to_string(), wts));
    params.sort_by(|a, b| a.0.cmp(&b.0));

    let query = params
        .iter()
        .map(|(k, v)| {
            let cleaned: String = v.chars().filter(|c| !"!'()*".contains(*c)).collect();
            format!(
                "{}={}",
                k,
                utf8_percent_encode(&cleaned, NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    let digest = md5::compute(format!("{query}{mixin}"));
    params.push(("w_rid".to_string(), format!("{digest:x}")));
}

/// Parse the legacy comment XML; each `<d>` carries
/// `p="time,mode,size,color,ctime,pool,uid_hash,dmid"`.
fn parse_comment_xml(xml: &str) -> Vec<RawComment> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut comments = Vec::new();
    let mut pending_p: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"d" => {
                pending_p = e
                    .try_get_attribute("p")
                    .ok()
                    .flatten()
                    .and_then(|attr| attr.unescape_value().ok())
                    .map(|v| v.into_owned());
            }
            Ok(Event::Text(text)) => {
                if let (Some(p), Ok(content)) = (pending_p.take(), text.unescape()) {
                    let fields: Vec<&str> = p.split(',').collect();
                    if fields.len() < 8 {
                        continue;
                    }
                    let Ok(time_sec) = fields[0].parse::<f64>() else {
                        continue;
                    };
                    let mode = match fields[1].parse::<u8>().unwrap_or(1) {
                        4 => 4,
                        5 => 5,
                        _ => 1,
                    };
                    comments.push(RawComment {
                        id: fields[7].to_string(),
                        time_sec,
                        mode,
                        font_size: fields[2].parse().unwrap_or(25),
                        color: fields[3].parse().unwrap_or(16_777_215),
                        text: content.into_owned(),
                    });
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Bilibili comment XML parse error: {e}");
                break;
            }
        }
    }
    comments
}

/// The comment CDN sometimes hands back a raw deflate stream regardless of
/// request headers; recover the XML either way.
fn decode_comment_body(body: &[u8]) -> Result<String> {
    if let Ok(text) = std::str::from_utf8(body) {
        if text.trim_start().starts_with('<') {
            return Ok(text.to_string());
        }
    }
    let mut inflater = flate2::read::DeflateDecoder::new(body);
    let mut out = String::new();
    inflater
        .read_to_string(&mut out)
        .map_err(|e| ProviderError::Schema(format!("comment body is neither XML nor deflate: {e}")))?;
    Ok(out)
}

#[async_trait]
impl DanmakuProvider for BilibiliProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn handled_domains(&self) -> &'static [&'static str] {
        &["www.bilibili.com", "b23.tv"]
    }

    fn test_url(&self) -> Option<&'static str> {
        Some("https://api.bilibili.com")
    }

    fn configurable_fields(&self) -> Vec<ConfigurableField> {
        vec![ConfigurableField {
            key: "bilibili_cookie".to_string(),
            label: "B站 Cookie (含 buvid3)".to_string(),
            field_type: FieldType::Password,
        }]
    }

    async fn search(
        &self,
        keyword: &str,
        _hint: Option<EpisodeHint>,
    ) -> Result<Vec<ProviderSearchInfo>> {
        // Bangumi and film-television are separate search verticals.
        let mut results = self.search_one_type(keyword, "media_bangumi").await?;
        match self.search_one_type(keyword, "media_ft").await {
            Ok(more) => results.extend(more),
            Err(e) => warn!("Bilibili media_ft search failed: {e}"),
        }
        debug!(keyword, count = results.len(), "Bilibili search done");
        Ok(results)
    }

    async fn get_info_from_url(&self, url: &str) -> Result<Option<ProviderSearchInfo>> {
        if let Some(caps) = BANGUMI_SS_URL_RE.captures(url) {
            let season_id = &caps[1];
            return Ok(Some(ProviderSearchInfo {
                provider: PROVIDER_NAME.to_string(),
                media_id: format!("ss{season_id}"),
                title: format!("ss{season_id}"),
                media_type: MediaType::TvSeries,
                season: 1,
                year: None,
                image_url: None,
                episode_count: None,
                current_episode_index: None,
                url: Some(url.to_string()),
            }));
        }
        if let Some(caps) = VIDEO_BV_URL_RE.captures(url) {
            let bvid = caps[1].to_string();
            let client = self.request().await?;
            let view: ViewResponse = client
                .get(format!(
                    "https://api.bilibili.com/x/web-interface/view?bvid={bvid}"
                ))
                .header("Referer", "https://www.bilibili.com/")
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let Some(data) = view.data else {
                return Ok(None);
            };
            return Ok(Some(ProviderSearchInfo {
                provider: PROVIDER_NAME.to_string(),
                media_id: bvid,
                title: data.title,
                media_type: MediaType::TvSeries,
                season: 1,
                year: None,
                image_url: data.pic,
                episode_count: Some(data.pages.len() as i32),
                current_episode_index: None,
                url: Some(url.to_string()),
            }));
        }
        Ok(None)
    }

    async fn get_id_from_url(&self, url: &str) -> Result<Option<EpisodeUrlId>> {
        if let Some(caps) = BANGUMI_EP_URL_RE.captures(url) {
            let epid: i64 = caps[1].parse().unwrap_or(0);
            // Resolve the epid to (aid, cid) through the season listing.
            let client = self.request().await?;
            let season: SeasonResponse = client
                .get(format!(
                    "https://api.bilibili.com/pgc/view/web/season?ep_id={epid}"
                ))
                .header("Referer", "https://www.bilibili.com/")
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let episode = season
                .result
                .map(|r| r.episodes)
                .unwrap_or_default()
                .into_iter()
                .find(|ep| ep.id == epid);
            return Ok(episode.map(|ep| EpisodeUrlId::Pair {
                first: ep.aid.to_string(),
                second: ep.cid.to_string(),
            }));
        }
        if let Some(caps) = VIDEO_BV_URL_RE.captures(url) {
            let bvid = caps[1].to_string();
            let page_number: i32 = PAGE_QUERY_RE
                .captures(url)
                .and_then(|c| c[1].parse().ok())
                .unwrap_or(1);
            let client = self.request().await?;
            let view: ViewResponse = client
                .get(format!(
                    "https://api.bilibili.com/x/web-interface/view?bvid={bvid}"
                ))
                .header("Referer", "https://www.bilibili.com/")
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let Some(data) = view.data else {
                return Ok(None);
            };
            let page = data.pages.iter().find(|p| p.page == page_number);
            return Ok(page.map(|p| EpisodeUrlId::Pair {
                first: data.aid.to_string(),
                second: p.cid.to_string(),
            }));
        }
        Ok(None)
    }

    async fn get_episodes(
        &self,
        media_id: &str,
        target_index: Option<i32>,
        db_media_type: Option<MediaType>,
    ) -> Result<Vec<ProviderEpisodeInfo>> {
        let candidates = if let Some(season_id) = media_id.strip_prefix("ss") {
            self.pgc_episodes(season_id).await?
        } else {
            self.ugc_episodes(media_id).await?
        };

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
        info!(media_id, count = episodes.len(), "Bilibili episode list ready");
        Ok(episodes)
    }

    async fn get_comments(
        &self,
        episode_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RawComment>> {
        // Stored form is "aid,cid"; only the cid addresses the comment pool.
        let cid = episode_id
            .rsplit(',')
            .next()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| ProviderError::InvalidUrl(episode_id.to_string()))?;

        sink.report(10, "正在请求弹幕数据...").await?;
        let client = self.request().await?;
        let response = client
            .get(format!("https://comment.bilibili.com/{cid}.xml"))
            .header("Referer", "https://www.bilibili.com/")
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        let xml = decode_comment_body(&body)?;

        sink.report(60, "正在解析弹幕...").await?;
        let comments = parse_comment_xml(&xml);
        sink.report(100, "弹幕处理完成").await?;
        info!(cid, count = comments.len(), "Bilibili danmaku fetched");
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixin_key_reorders_and_truncates() {
        let raw = "7cd084941338484aae1ad9425b84077c4932caff0ff746eab6f01bf08b70ac45";
        let key = mixin_key(raw);
        assert_eq!(key.len(), 32);
        assert_eq!(&key[..8], "ea1db124");
    }

    #[test]
    fn wbi_signature_is_stable_shape() {
        let mut params = vec![
            ("keyword".to_string(), "test".to_string()),
            ("search_type".to_string(), "media_bangumi".to_string()),
        ];
        sign_wbi(&mut params, "abcdef0123456789abcdef0123456789");
        let w_rid = params.iter().find(|(k, _)| k == "w_rid").expect("signed");
        assert_eq!(w_rid.1.len(), 32);
        assert!(params.iter().any(|(k, _)| k == "wts"));
    }

    #[test]
    fn comment_xml_parses_eight_field_p() {
        let xml = r#"<i><d p="23.826,1,25,16777215,1703123456,0,abc123,144611952371201">前方高能</d></i>"#;
        let comments = parse_comment_xml(xml);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].id, "144611952371201");
        assert!((comments[0].time_sec - 23.826).abs() < 1e-9);
        assert_eq!(comments[0].mode, 1);
    }

    #[test]
    fn url_regexes_extract_ids() {
        assert!(BANGUMI_EP_URL_RE
            .captures("https://www.bilibili.com/bangumi/play/ep374717")
            .is_some_and(|c| &c[1] == "374717"));
        assert!(VIDEO_BV_URL_RE
            .captures("https://www.bilibili.com/video/BV1xx411c7mD?p=3")
            .is_some_and(|c| &c[1] == "BV1xx411c7mD"));
    }

    #[test]
    fn deflate_bodies_are_inflated() {
        use flate2::write::DeflateEncoder;
        use flate2::Compression;
        use std::io::Write;

        let xml = "<i><d p=\"1,1,25,255,0,0,a,b\">x</d></i>";
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(xml.as_bytes()).expect("compress");
        let compressed = encoder.finish().expect("finish");

        let decoded = decode_comment_body(&compressed).expect("inflate");
        assert_eq!(decoded, xml);
    }
}
