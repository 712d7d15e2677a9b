// Episode filtering and renumbering shared by all adapters.
//
// Two-pass: drop junk entries (promos, behind-the-scenes, trailers), then
// reassign contiguous 1-based indices in the platform-appropriate order.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::models::ProviderEpisodeInfo;

/// Bilingual junk-title keywords applied to every provider's episode list.
static JUNK_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        "(?i)纪录片|预告|花絮|专访|直拍|直播回顾|加更|走心|解忧|纯享|节点|解读|揭秘|赏析|速看|资讯|访谈|番外|短片|\
         彩蛋|删减片段|未播片段|精彩片段|精彩看点|精彩回顾|精彩集锦|看点解析|看点预告|\
         NG镜头|NG花絮|番外篇|番外特辑|制作特辑|拍摄特辑|幕后特辑|导演特辑|演员特辑|\
         片尾曲|插曲|主题曲|背景音乐|OST|音乐MV|歌曲MV|\
         前季回顾|剧情回顾|往期回顾|内容总结|剧情盘点|精选合集|剪辑合集|混剪视频|\
         媒体采访|发布会采访|抢先看|抢先版|试看版|即将上线|\
         Trailer|Teaser|Preview|Recap|Bonus|BDMenu|Menu",
    )
    .expect("junk title regex is valid")
});

/// Default episode blacklist merged with per-provider config.
pub const GLOBAL_EPISODE_BLACKLIST_DEFAULT: &str = "^(.*?)((.+?版)|(特(别|典))|((导|演)员|嘉宾|角色)访谈|福利|彩蛋|花絮|预告|特辑|专访|访谈|幕后|周边|资讯|看点|速看|回顾|盘点|合集|PV|MV|CM|OST|ED|OP|BD|特典|SP|NCOP|NCED|MENU|Web-DL|rip|x264|x265|aac|flac)(.*?)$";

static EPISODE_NUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*(\d+)\s*[集话話期]").expect("valid regex"));
static SXXEXX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)S\d{1,2}E(\d{1,3})").expect("valid regex"));
static PURE_INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,4})\s*$").expect("valid regex"));
static QI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*(\d+)\s*期([上中下])?").expect("valid regex"));
static DATE_IN_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}[-./]\d{1,2}[-./]\d{1,2}|\d{8}").expect("valid regex"));

/// How the list should be ordered after filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    TvSeries,
    Variety,
    Movie,
}

/// One raw entry from a provider's episode listing, before filtering.
#[derive(Debug, Clone)]
pub struct EpisodeCandidate {
    pub episode_id: String,
    pub title: String,
    pub url: Option<String>,
    pub published_at: Option<NaiveDate>,
    /// For movies: the API-confirmed main feature.
    pub is_main_feature: bool,
}

impl EpisodeCandidate {
    #[must_use]
    pub fn new(episode_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            episode_id: episode_id.into(),
            title: title.into(),
            url: None,
            published_at: None,
            is_main_feature: false,
        }
    }
}

/// Merge the global blacklist with a provider-specific one into a single
/// case-insensitive regex. Invalid patterns are dropped with a log line
/// rather than failing the listing.
#[must_use]
pub fn compile_blacklist(global: &str, provider_specific: &str) -> Option<Regex> {
    let mut parts = Vec::new();
    if !global.trim().is_empty() {
        parts.push(format!("({global})"));
    }
    if !provider_specific.trim().is_empty() {
        parts.push(format!("({provider_specific})"));
    }
    if parts.is_empty() {
        return None;
    }
    let joined = format!("(?i){}", parts.join("|"));
    match Regex::new(&joined) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!("Failed to compile episode blacklist '{joined}': {e}");
            None
        }
    }
}

/// Whether a search-result title matches the global junk pattern.
#[must_use]
pub fn is_junk_title(title: &str) -> bool {
    JUNK_TITLE_RE.is_match(title)
}

/// Titles that are a pure number or contain `第` are very likely main
/// episodes; the filters must not drop them.
fn is_likely_main_episode(title: &str) -> bool {
    PURE_INT_RE.is_match(title) || title.contains('第')
}

fn parse_episode_number(title: &str) -> Option<i32> {
    if let Some(caps) = EPISODE_NUM_RE.captures(title) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = SXXEXX_RE.captures(title) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = PURE_INT_RE.captures(title) {
        return caps[1].parse().ok();
    }
    None
}

/// Sort key for variety shows: `第N期` primary, `上/中/下` tiebreaker,
/// publish date fallback.
fn variety_key(candidate: &EpisodeCandidate, index: usize) -> (i32, i32, NaiveDate, usize) {
    let (qi, part) = QI_RE.captures(&candidate.title).map_or((i32::MAX, 0), |caps| {
        let qi = caps[1].parse().unwrap_or(i32::MAX);
        let part = match caps.get(2).map(|m| m.as_str()) {
            Some("上") => 0,
            Some("中") => 1,
            Some("下") => 2,
            _ => 0,
        };
        (qi, part)
    });
    let date = candidate
        .published_at
        .unwrap_or(NaiveDate::MAX);
    (qi, part, date, index)
}

/// Run the two-pass filter for one provider listing and renumber the
/// survivors `1..n`.
#[must_use]
pub fn filter_and_renumber(
    provider: &'static str,
    candidates: Vec<EpisodeCandidate>,
    blacklist: Option<&Regex>,
    kind: ListKind,
) -> Vec<ProviderEpisodeInfo> {
    let mut kept: Vec<(usize, EpisodeCandidate)> = Vec::new();
    for (index, candidate) in candidates.into_iter().enumerate() {
        if !is_likely_main_episode(&candidate.title) {
            if JUNK_TITLE_RE.is_match(&candidate.title) {
                debug!(provider, title = %candidate.title, "Filtered junk episode");
                continue;
            }
            if let Some(re) = blacklist {
                if re.is_match(&candidate.title) {
                    debug!(provider, title = %candidate.title, "Filtered blacklisted episode");
                    continue;
                }
            }
        }
        kept.push((index, candidate));
    }

    match kind {
        ListKind::TvSeries => {
            kept.sort_by_key(|(index, c)| {
                (parse_episode_number(&c.title).unwrap_or(i32::MAX), *index)
            });
        }
        ListKind::Variety => {
            // Collapse URL duplicates first, preferring the shorter,
            // date-free title for the surviving entry.
            let mut by_url: Vec<(usize, EpisodeCandidate)> = Vec::new();
            for (index, candidate) in kept {
                let dup = candidate.url.as_ref().and_then(|url| {
                    by_url
                        .iter_mut()
                        .find(|(_, existing)| existing.url.as_deref() == Some(url.as_str()))
                });
                match dup {
                    Some(existing) => {
                        if prefer_title(&candidate.title, &existing.1.title) {
                            existing.1 = candidate;
                        }
                    }
                    None => by_url.push((index, candidate)),
                }
            }
            kept = by_url;
            kept.sort_by_key(|(index, c)| variety_key(c, *index));
        }
        ListKind::Movie => {
            kept.sort_by_key(|(index, c)| (!c.is_main_feature, *index));
        }
    }

    kept.into_iter()
        .enumerate()
        .map(|(position, (_, candidate))| ProviderEpisodeInfo {
            provider: provider.to_string(),
            episode_id: candidate.episode_id,
            title: candidate.title,
            episode_index: position as i32 + 1,
            url: candidate.url,
        })
        .collect()
}

/// Between two titles of the same URL, prefer the date-free one, then the
/// shorter one.
fn prefer_title(candidate: &str, incumbent: &str) -> bool {
    let candidate_dated = DATE_IN_TITLE_RE.is_match(candidate);
    let incumbent_dated = DATE_IN_TITLE_RE.is_match(incumbent);
    if candidate_dated != incumbent_dated {
        return incumbent_dated;
    }
    candidate.chars().count() < incumbent.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(list: &[ProviderEpisodeInfo]) -> Vec<&str> {
        list.iter().map(|e| e.title.as_str()).collect()
    }

    #[test]
    fn junk_episodes_are_dropped_and_survivors_renumbered() {
        let candidates = vec![
            EpisodeCandidate::new("a", "第1集"),
            EpisodeCandidate::new("b", "先导预告"),
            EpisodeCandidate::new("c", "第2集"),
            EpisodeCandidate::new("d", "拍摄花絮"),
            EpisodeCandidate::new("e", "第3集"),
        ];
        let result = filter_and_renumber("tencent", candidates, None, ListKind::TvSeries);
        assert_eq!(titles(&result), vec!["第1集", "第2集", "第3集"]);
        let indices: Vec<i32> = result.iter().map(|e| e.episode_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn pure_number_titles_survive_the_blacklist() {
        let blacklist = compile_blacklist(GLOBAL_EPISODE_BLACKLIST_DEFAULT, "");
        let candidates = vec![
            EpisodeCandidate::new("a", "01"),
            EpisodeCandidate::new("b", "02"),
        ];
        let result =
            filter_and_renumber("youku", candidates, blacklist.as_ref(), ListKind::TvSeries);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn tv_series_sorts_by_parsed_number() {
        let candidates = vec![
            EpisodeCandidate::new("c", "第3集"),
            EpisodeCandidate::new("a", "第1集"),
            EpisodeCandidate::new("b", "第2集"),
        ];
        let result = filter_and_renumber("iqiyi", candidates, None, ListKind::TvSeries);
        assert_eq!(titles(&result), vec!["第1集", "第2集", "第3集"]);
        assert_eq!(result[0].episode_id, "a");
    }

    #[test]
    fn variety_orders_by_qi_with_updown_tiebreak() {
        let candidates = vec![
            EpisodeCandidate::new("c", "第2期下"),
            EpisodeCandidate::new("b", "第2期上"),
            EpisodeCandidate::new("a", "第1期"),
        ];
        let result = filter_and_renumber("mgtv", candidates, None, ListKind::Variety);
        assert_eq!(titles(&result), vec!["第1期", "第2期上", "第2期下"]);
    }

    #[test]
    fn variety_collapses_url_duplicates_preferring_date_free_title() {
        let mut a = EpisodeCandidate::new("a", "第1期 2024-03-01");
        a.url = Some("https://v.example.com/x1".into());
        let mut b = EpisodeCandidate::new("b", "第1期");
        b.url = Some("https://v.example.com/x1".into());
        let result = filter_and_renumber("mgtv", vec![a, b], None, ListKind::Variety);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].title, "第1期");
    }

    #[test]
    fn movie_puts_main_feature_first() {
        let mut main = EpisodeCandidate::new("m", "正片");
        main.is_main_feature = true;
        let extra = EpisodeCandidate::new("x", "彩蛋片段");
        let result = filter_and_renumber("tencent", vec![extra, main], None, ListKind::Movie);
        // The junk extra is dropped and the feature leads.
        assert_eq!(result[0].episode_id, "m");
        assert_eq!(result[0].episode_index, 1);
    }

    #[test]
    fn sxxexx_number_is_recognized() {
        assert_eq!(parse_episode_number("Breaking Bad S05E07"), Some(7));
        assert_eq!(parse_episode_number("第12话"), Some(12));
        assert_eq!(parse_episode_number("08"), Some(8));
        assert_eq!(parse_episode_number("总集篇"), None);
    }
}
