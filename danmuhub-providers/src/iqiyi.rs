//! iQiyi adapter.
//!
//! Search uses the html5 search endpoint, episodes the album avlistinfo API,
//! and comments the 300-second zlib-compressed bullet segments.

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
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::ProviderDeps;

const PROVIDER_NAME: &str = "iqiyi";
const SEGMENT_SECONDS: u64 = 300;
const USER_AGENT: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

static LINK_ID_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"iqiyi\.com/v_([a-z0-9]+)\.html").expect("valid regex"));

// ========== Response shapes ==========

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    docinfos: Vec<DocInfo>,
}

#[derive(Debug, Deserialize)]
struct DocInfo {
    #[serde(rename = "albumDocInfo", default)]
    album: Option<AlbumDocInfo>,
}

#[derive(Debug, Deserialize)]
struct AlbumDocInfo {
    #[serde(rename = "albumId", default)]
    album_id: i64,
    #[serde(rename = "albumTitle", default)]
    album_title: String,
    #[serde(default)]
    channel: String,
    #[serde(rename = "albumImg", default)]
    album_img: Option<String>,
    #[serde(rename = "albumLink", default)]
    album_link: Option<String>,
    #[serde(rename = "releaseDate", default)]
    release_date: Option<String>,
    #[serde(rename = "itemTotalNumber", default)]
    item_total_number: Option<i32>,
    #[serde(rename = "siteId", default)]
    site_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvListResponse {
    #[serde(default)]
    data: Option<AvListData>,
}

#[derive(Debug, Deserialize)]
struct AvListData {
    // The upstream field name really is spelled this way.
    #[serde(rename = "epsodelist", default)]
    episode_list: Vec<AvListEpisode>,
    #[serde(default)]
    total: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct AvListEpisode {
    #[serde(rename = "tvId", default)]
    tv_id: i64,
    #[serde(default)]
    name: String,
    #[serde(rename = "playUrl", default)]
    play_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DecodeResponse {
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BaseInfoResponse {
    #[serde(default)]
    data: Option<BaseInfoData>,
}

#[derive(Debug, Deserialize)]
struct BaseInfoData {
    #[serde(rename = "durationSec", default)]
    duration_sec: Option<u64>,
}

// ========== Adapter ==========

pub struct IqiyiProvider {
    deps: ProviderDeps,
    http: HttpClientFactory,
    pacer: RequestPacer,
}

impl IqiyiProvider {
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

    async fn resolve_tvid(&self, link_id: &str) -> Result<Option<String>> {
        let client = self.request().await?;
        let url = format!(
            "https://pcw-api.iqiyi.com/api/decode/{link_id}?platformId=3&modeCode=intl&langCode=sg"
        );
        let decoded: DecodeResponse = client
            .get(&url)
            .header("Referer", "https://www.iqiyi.com/")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let tvid = match &decoded.data {
            serde_json::Value::Number(n) => n.as_i64().map(|v| v.to_string()),
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        Ok(tvid)
    }

    async fn video_duration(&self, tvid: &str) -> Option<u64> {
        let client = self.request().await.ok()?;
        let url = format!("https://pcw-api.iqiyi.com/video/video/baseinfo/{tvid}");
        let info: BaseInfoResponse = client
            .get(&url)
            .header("Referer", "https://www.iqiyi.com/")
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;
        info.data.and_then(|d| d.duration_sec)
    }
}

/// Bullet segment path: `/bullet/{tvid[-4..-2]}/{tvid[-2..]}/{tvid}_300_{n}.z`.
fn segment_path(tvid: &str, segment: u64) -> Option<String> {
    if tvid.len() < 4 {
        return None;
    }
    let s1 = &tvid[tvid.len() - 4..tvid.len() - 2];
    let s2 = &tvid[tvid.len() - 2..];
    Some(format!("/bullet/{s1}/{s2}/{tvid}_300_{segment}.z"))
}

/// Parse the `<bulletInfo>` entries of one inflated segment document.
fn parse_bullet_xml(xml: &str) -> Vec<RawComment> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut comments = Vec::new();
    let mut current_field: Option<String> = None;
    let mut entry: Option<BulletEntry> = None;

    #[derive(Default)]
    struct BulletEntry {
        content_id: String,
        content: String,
        show_time: f64,
        color: u32,
        font: u32,
        position: u8,
    }

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "bulletInfo" {
                    entry = Some(BulletEntry {
                        color: 16_777_215,
                        font: 25,
                        ..BulletEntry::default()
                    });
                } else {
                    current_field = Some(name);
                }
            }
            Ok(Event::Text(text)) => {
                if let (Some(field), Some(current)) = (&current_field, entry.as_mut()) {
                    let value = text.unescape().map(|v| v.into_owned()).unwrap_or_default();
                    match field.as_str() {
                        "contentId" => current.content_id = value,
                        "content" => current.content = value,
                        "showTime" => current.show_time = value.parse().unwrap_or(0.0),
                        "color" => {
                            current.color = u32::from_str_radix(
                                value.trim_start_matches('#'),
                                16,
                            )
                            .unwrap_or(16_777_215);
                        }
                        "font" => current.font = value.parse().unwrap_or(25),
                        "position" => current.position = value.parse().unwrap_or(0),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"bulletInfo" {
                    if let Some(done) = entry.take() {
                        if !done.content_id.is_empty() {
                            let mode = match done.position {
                                1 => 5,
                                2 => 4,
                                _ => 1,
                            };
                            comments.push(RawComment {
                                id: done.content_id,
                                time_sec: done.show_time,
                                mode,
                                font_size: done.font,
                                color: done.color,
                                text: done.content,
                            });
                        }
                    }
                }
                current_field = None;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("iQiyi bullet XML parse error: {e}");
                break;
            }
        }
    }
    comments
}

fn inflate_zlib(body: &[u8]) -> Result<String> {
    let mut decoder = flate2::read::ZlibDecoder::new(body);
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| ProviderError::Schema(format!("bullet segment is not zlib: {e}")))?;
    Ok(out)
}

#[async_trait]
impl DanmakuProvider for IqiyiProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn handled_domains(&self) -> &'static [&'static str] {
        &["www.iqiyi.com", "m.iqiyi.com", "www.iq.com"]
    }

    fn rate_limit_quota(&self) -> Option<u32> {
        Some(100)
    }

    fn test_url(&self) -> Option<&'static str> {
        Some("https://www.iqiyi.com")
    }

    fn configurable_fields(&self) -> Vec<ConfigurableField> {
        vec![ConfigurableField {
            key: "iqiyi_use_protobuf".to_string(),
            label: "（爱奇艺）使用新的Protobuf弹幕接口（实验性）".to_string(),
            field_type: FieldType::Boolean,
        }]
    }

    async fn search(
        &self,
        keyword: &str,
        _hint: Option<EpisodeHint>,
    ) -> Result<Vec<ProviderSearchInfo>> {
        let client = self.request().await?;
        let url = format!(
            "https://search.video.iqiyi.com/o?if=html5&key={}&pageNum=1&pageSize=20",
            percent_encoding::utf8_percent_encode(keyword, percent_encoding::NON_ALPHANUMERIC)
        );
        let parsed: SearchResponse = client
            .get(&url)
            .header("Referer", "https://www.iqiyi.com/")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let results = parsed
            .data
            .map(|d| d.docinfos)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|doc| {
                let album = doc.album?;
                if album.album_id == 0 || album.album_title.is_empty() {
                    return None;
                }
                // Foreign-site aggregator hits carry a site id.
                if album.site_id.as_deref().is_some_and(|s| s != "iqiyi") {
                    return None;
                }
                if is_junk_title(&album.album_title) {
                    return None;
                }
                let media_type = if album.channel.contains("电影") {
                    MediaType::Movie
                } else {
                    MediaType::TvSeries
                };
                let year = album
                    .release_date
                    .as_deref()
                    .and_then(|d| d.get(..4))
                    .and_then(|y| y.parse().ok());
                Some(ProviderSearchInfo {
                    provider: PROVIDER_NAME.to_string(),
                    media_id: album.album_id.to_string(),
                    season: danmuhub_core::search::season_from_title(&album.album_title) as i32,
                    title: album.album_title,
                    media_type,
                    year,
                    image_url: album.album_img.map(|img| {
                        if img.starts_with("//") {
                            format!("https:{img}")
                        } else {
                            img
                        }
                    }),
                    episode_count: album.item_total_number,
                    current_episode_index: None,
                    url: album.album_link,
                })
            })
            .collect::<Vec<_>>();
        debug!(keyword, count = results.len(), "iQiyi search done");
        Ok(results)
    }

    async fn get_info_from_url(&self, url: &str) -> Result<Option<ProviderSearchInfo>> {
        let Some(caps) = LINK_ID_URL_RE.captures(url) else {
            return Ok(None);
        };
        let Some(tvid) = self.resolve_tvid(&caps[1]).await? else {
            return Ok(None);
        };
        Ok(Some(ProviderSearchInfo {
            provider: PROVIDER_NAME.to_string(),
            media_id: tvid.clone(),
            title: tvid,
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
        let Some(caps) = LINK_ID_URL_RE.captures(url) else {
            return Ok(None);
        };
        Ok(self.resolve_tvid(&caps[1]).await?.map(EpisodeUrlId::Plain))
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
                "https://pcw-api.iqiyi.com/albums/album/avlistinfo?aid={media_id}&page={page}&size=50"
            );
            let parsed: AvListResponse = client
                .get(&url)
                .header("Referer", "https://www.iqiyi.com/")
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let Some(data) = parsed.data else { break };
            if data.episode_list.is_empty() {
                break;
            }
            let total = data.total.unwrap_or(0);
            for episode in data.episode_list {
                let mut candidate =
                    EpisodeCandidate::new(episode.tv_id.to_string(), episode.name.clone());
                candidate.url = episode.play_url.clone();
                candidates.push(candidate);
            }
            if candidates.len() as i32 >= total || page > 20 {
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
        info!(media_id, count = episodes.len(), "iQiyi episode list ready");
        Ok(episodes)
    }

    async fn get_comments(
        &self,
        episode_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RawComment>> {
        let max_segments = self
            .deps
            .config
            .get_i64("danmaku_max_segments", 100)
            .await
            .max(1) as u64;
        let total_segments = match self.video_duration(episode_id).await {
            Some(duration) => (duration / SEGMENT_SECONDS + 1).min(max_segments),
            None => max_segments,
        };

        let client = self.request().await?;
        let mut comments = Vec::new();
        for segment in 1..=total_segments {
            let Some(path) = segment_path(episode_id, segment) else {
                return Err(ProviderError::InvalidUrl(episode_id.to_string()));
            };
            let progress = (segment * 95 / total_segments) as u32;
            sink.report(progress, &format!("正在下载分段 {segment}/{total_segments}"))
                .await?;

            self.pacer.pace().await;
            let response = client
                .get(format!("https://cmts.iqiyi.com{path}"))
                .header("Referer", "https://www.iqiyi.com/")
                .send()
                .await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                // Past the end of the video.
                break;
            }
            let body = response.error_for_status()?.bytes().await?;
            match inflate_zlib(&body) {
                Ok(xml) => comments.extend(parse_bullet_xml(&xml)),
                Err(e) => {
                    warn!(tvid = episode_id, segment, "Skipping undecodable segment: {e}");
                }
            }
        }

        sink.report(100, "弹幕处理完成").await?;
        info!(tvid = episode_id, count = comments.len(), "iQiyi danmaku fetched");
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_path_uses_tvid_suffix_buckets() {
        assert_eq!(
            segment_path("2790634077834100", 3).as_deref(),
            Some("/bullet/41/00/2790634077834100_300_3.z")
        );
        assert!(segment_path("123", 1).is_none());
    }

    #[test]
    fn bullet_xml_parses_entries() {
        let xml = r#"<danmu><data><entry><list>
            <bulletInfo>
              <contentId>98765</contentId>
              <content>名场面</content>
              <showTime>12.5</showTime>
              <color>ff00ff</color>
              <font>25</font>
              <position>1</position>
            </bulletInfo>
            <bulletInfo>
              <contentId>98766</contentId>
              <content>哈哈</content>
              <showTime>13</showTime>
            </bulletInfo>
        </list></entry></data></danmu>"#;
        let comments = parse_bullet_xml(xml);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].id, "98765");
        assert_eq!(comments[0].mode, 5);
        assert_eq!(comments[0].color, 0x00FF_00FF);
        assert_eq!(comments[1].mode, 1);
        assert_eq!(comments[1].color, 16_777_215);
    }

    #[test]
    fn link_id_extracts_from_play_url() {
        assert!(LINK_ID_URL_RE
            .captures("https://www.iqiyi.com/v_19rrok4nt0.html")
            .is_some_and(|c| &c[1] == "19rrok4nt0"));
    }

    #[test]
    fn zlib_round_trip() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let xml = "<danmu></danmu>";
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(xml.as_bytes()).expect("compress");
        let body = encoder.finish().expect("finish");
        assert_eq!(inflate_zlib(&body).expect("inflate"), xml);
    }
}
