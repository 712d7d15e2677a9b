//! Search keyword parsing: split a freeform query into title, season and
//! episode.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::EpisodeHint;

/// Result of parsing one search keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyword {
    pub title: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl ParsedKeyword {
    #[must_use]
    pub const fn hint(&self) -> EpisodeHint {
        EpisodeHint {
            season: self.season,
            episode: self.episode,
        }
    }
}

static SXX_EXX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bS(\d{1,2})\s*E(\d{1,4})\b").expect("valid regex"));
static EPISODE_CN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*(\d{1,4})\s*[集话話]").expect("valid regex"));
static SEASON_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:S|Season\s*)(\d{1,2})\b").expect("valid regex"));
static SEASON_CN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"第\s*([一二三四五六七八九十壹贰叁肆伍陆柒捌玖拾]+|\d{1,2})\s*[季部幕]")
        .expect("valid regex")
});
static ZHI_ZHANG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([一二三四五六七八九十壹贰叁肆伍陆柒捌玖拾]+)\s*之\s*章").expect("valid regex")
});
static UNICODE_ROMAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s([Ⅰ-Ⅻ])(?:\s|$)").expect("valid regex"));
static ASCII_ROMAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s([IVXLCDMivxlcdm]+)\b").expect("valid regex"));
static TRAILING_INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*\S)\s+(\d{1,2})$").expect("valid regex"));
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(19|20)\d{2}$").expect("valid regex"));

fn chinese_numeral_value(c: char) -> Option<u32> {
    match c {
        '一' | '壹' => Some(1),
        '二' | '贰' => Some(2),
        '三' | '叁' => Some(3),
        '四' | '肆' => Some(4),
        '五' | '伍' => Some(5),
        '六' | '陆' => Some(6),
        '七' | '柒' => Some(7),
        '八' | '捌' => Some(8),
        '九' | '玖' => Some(9),
        '十' | '拾' => Some(10),
        _ => None,
    }
}

/// Parse a Chinese numeral up to 99 (`十二`, `二十`, `二十一`).
fn parse_chinese_numeral(s: &str) -> Option<u32> {
    if let Ok(n) = s.parse::<u32>() {
        return Some(n);
    }
    let digits: Vec<u32> = s.chars().map(chinese_numeral_value).collect::<Option<_>>()?;
    match digits.as_slice() {
        [n] => Some(*n),
        [10, n] => Some(10 + n),
        [n, 10] => Some(n * 10),
        [n, 10, m] => Some(n * 10 + m),
        _ => None,
    }
}

fn roman_to_int(s: &str) -> Option<u32> {
    let values: Vec<u32> = s
        .to_ascii_uppercase()
        .chars()
        .map(|c| match c {
            'I' => Some(1),
            'V' => Some(5),
            'X' => Some(10),
            'L' => Some(50),
            'C' => Some(100),
            'D' => Some(500),
            'M' => Some(1000),
            _ => None,
        })
        .collect::<Option<_>>()?;
    let mut total = 0u32;
    let mut i = 0;
    while i < values.len() {
        if i + 1 < values.len() && values[i] < values[i + 1] {
            total += values[i + 1] - values[i];
            i += 2;
        } else {
            total += values[i];
            i += 1;
        }
    }
    Some(total)
}

fn unicode_roman_value(c: char) -> Option<u32> {
    // Ⅰ (U+2160) .. Ⅻ (U+216B) are consecutive.
    let base = 0x2160u32;
    let code = c as u32;
    if (base..base + 12).contains(&code) {
        Some(code - base + 1)
    } else {
        None
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a keyword into `{title, season?, episode?}`.
///
/// Season markers are tried in priority order: `SxxExx`, `S01`/`Season 1`,
/// `第X季/部/幕`, `X之章`, Unicode roman, ASCII roman after whitespace, and a
/// trailing 1–2 digit integer whose preceding token is not a 4-digit year.
#[must_use]
pub fn parse_search_keyword(keyword: &str) -> ParsedKeyword {
    let mut text = collapse_whitespace(keyword);
    let mut season = None;
    let mut episode = None;

    // Capture ranges are extracted first so the text mutation never overlaps
    // an outstanding regex borrow.
    let sxx = SXX_EXX_RE.captures(&text).map(|caps| {
        (
            caps[1].parse::<u32>().ok(),
            caps[2].parse::<u32>().ok(),
            caps.get(0).map(|m| m.range()),
        )
    });
    if let Some((s, e, Some(range))) = sxx {
        season = s;
        episode = e;
        text.replace_range(range, " ");
    } else {
        let ep = EPISODE_CN_RE
            .captures(&text)
            .map(|caps| (caps[1].parse::<u32>().ok(), caps.get(0).map(|m| m.range())));
        if let Some((e, Some(range))) = ep {
            episode = e;
            text.replace_range(range, " ");
        }
    }

    if season.is_none() {
        season = extract_season(&mut text);
    }

    ParsedKeyword {
        title: collapse_whitespace(&text),
        season,
        episode,
    }
}

fn extract_season(text: &mut String) -> Option<u32> {
    let word = SEASON_WORD_RE
        .captures(text)
        .map(|caps| (caps[1].parse::<u32>().ok(), caps.get(0).map(|m| m.range())));
    if let Some((season, Some(range))) = word {
        text.replace_range(range, " ");
        return season;
    }

    let cn = SEASON_CN_RE
        .captures(text)
        .map(|caps| (parse_chinese_numeral(&caps[1]), caps.get(0).map(|m| m.range())));
    if let Some((Some(season), Some(range))) = cn {
        text.replace_range(range, " ");
        return Some(season);
    }

    let zhi = ZHI_ZHANG_RE
        .captures(text)
        .map(|caps| (parse_chinese_numeral(&caps[1]), caps.get(0).map(|m| m.range())));
    if let Some((Some(season), Some(range))) = zhi {
        text.replace_range(range, " ");
        return Some(season);
    }

    let unicode = UNICODE_ROMAN_RE.captures(text).map(|caps| {
        (
            caps[1].chars().next().and_then(unicode_roman_value),
            caps.get(1).map(|m| m.range()),
        )
    });
    if let Some((Some(season), Some(range))) = unicode {
        text.replace_range(range, " ");
        return Some(season);
    }

    let ascii = ASCII_ROMAN_RE
        .captures(text)
        .map(|caps| (roman_to_int(&caps[1]), caps.get(1).map(|m| m.range())));
    if let Some((Some(season), Some(range))) = ascii {
        // Seasons past twelve are almost certainly not roman numerals.
        if (1..=12).contains(&season) {
            text.replace_range(range, " ");
            return Some(season);
        }
    }

    let trailing = TRAILING_INT_RE
        .captures(text)
        .map(|caps| (caps[1].to_string(), caps[2].parse::<u32>().ok()));
    if let Some((prefix, Some(season))) = trailing {
        let last_token_is_year = prefix
            .split_whitespace()
            .last()
            .is_some_and(|token| YEAR_RE.is_match(token));
        if !last_token_is_year {
            *text = prefix;
            return Some(season);
        }
    }
    None
}

/// Season number parsed out of a result title, defaulting to 1.
#[must_use]
pub fn season_from_title(title: &str) -> u32 {
    let mut text = collapse_whitespace(title);
    extract_season(&mut text).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> (String, Option<u32>, Option<u32>) {
        let p = parse_search_keyword(s);
        (p.title, p.season, p.episode)
    }

    #[test]
    fn chinese_season_marker() {
        assert_eq!(parse("进击的巨人 第二季"), ("进击的巨人".into(), Some(2), None));
    }

    #[test]
    fn sxx_exx() {
        assert_eq!(parse("Breaking Bad S05E07"), ("Breaking Bad".into(), Some(5), Some(7)));
    }

    #[test]
    fn unicode_roman() {
        assert_eq!(parse("Frieren Ⅱ"), ("Frieren".into(), Some(2), None));
    }

    #[test]
    fn four_digit_year_is_not_a_season() {
        assert_eq!(parse("Blade Runner 2049"), ("Blade Runner 2049".into(), None, None));
    }

    #[test]
    fn trailing_small_integer_is_a_season() {
        assert_eq!(parse("物语系列 2"), ("物语系列".into(), Some(2), None));
    }

    #[test]
    fn trailing_integer_after_year_is_rejected() {
        assert_eq!(parse("2046 2"), ("2046 2".into(), None, None));
    }

    #[test]
    fn season_word_forms() {
        assert_eq!(parse("Fate Zero Season 2").1, Some(2));
        assert_eq!(parse("Fate Zero S2").1, Some(2));
        assert_eq!(parse("莉可丽丝 第3部").1, Some(3));
        assert_eq!(parse("游戏人生 十之章").1, Some(10));
    }

    #[test]
    fn ascii_roman_at_word_boundary() {
        assert_eq!(parse("Overlord III"), ("Overlord".into(), Some(3), None));
    }

    #[test]
    fn chinese_episode_marker() {
        assert_eq!(parse("海贼王 第1024集"), ("海贼王".into(), None, Some(1024)));
    }

    #[test]
    fn compound_chinese_numerals() {
        assert_eq!(parse_chinese_numeral("十二"), Some(12));
        assert_eq!(parse_chinese_numeral("二十"), Some(20));
        assert_eq!(parse_chinese_numeral("二十一"), Some(21));
        assert_eq!(parse_chinese_numeral("3"), Some(3));
        assert_eq!(parse_chinese_numeral("x"), None);
    }

    #[test]
    fn parse_compose_parse_is_stable() {
        let first = parse_search_keyword("进击的巨人 第二季");
        let composed = format!("{} 第{}季", first.title, first.season.expect("season"));
        let second = parse_search_keyword(&composed);
        assert_eq!(first, second);
    }

    #[test]
    fn season_from_result_title_defaults_to_one() {
        assert_eq!(season_from_title("间谍过家家"), 1);
        assert_eq!(season_from_title("间谍过家家 第二季"), 2);
    }
}
