//! Danmaku file path templating for the optional file storage backend.
//!
//! Paths are built from `${token}` templates; movies and TV use separate
//! roots and templates. `.xml` is appended automatically.

use std::path::{Path, PathBuf};

use crate::models::{Anime, MediaType};

/// Values available to the template.
#[derive(Debug, Clone)]
pub struct DanmakuPathContext {
    pub title: String,
    pub season: i32,
    pub episode: i32,
    pub year: Option<i32>,
    pub provider: String,
    pub anime_id: i64,
    pub episode_id: i64,
    pub source_id: i64,
    pub media_type: MediaType,
}

impl DanmakuPathContext {
    #[must_use]
    pub fn new(
        anime: &Anime,
        provider: &str,
        source_id: i64,
        episode_id: i64,
        episode_index: i32,
    ) -> Self {
        Self {
            title: anime.title.clone(),
            season: anime.season,
            episode: episode_index,
            year: anime.year,
            provider: provider.to_string(),
            anime_id: anime.id,
            episode_id,
            source_id,
            media_type: anime.media_type,
        }
    }
}

/// Characters that must not appear inside a single path component.
fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

fn expand(template: &str, ctx: &DanmakuPathContext) -> String {
    // Token values are sanitized; template-authored separators survive.
    let year = ctx.year.map_or_else(String::new, |y| y.to_string());
    template
        .replace("${title}", &sanitize_component(&ctx.title))
        .replace("${season}", &ctx.season.to_string())
        .replace("${episode}", &ctx.episode.to_string())
        .replace("${year}", &year)
        .replace("${provider}", &sanitize_component(&ctx.provider))
        .replace("${animeId}", &ctx.anime_id.to_string())
        .replace("${episodeId}", &ctx.episode_id.to_string())
        .replace("${sourceId}", &ctx.source_id.to_string())
}

/// Build the target file path under `root` from `template`.
#[must_use]
pub fn generate_danmaku_path(root: &str, template: &str, ctx: &DanmakuPathContext) -> PathBuf {
    let mut relative = expand(template, ctx);
    if !relative.ends_with(".xml") {
        relative.push_str(".xml");
    }
    // A template expanding to an absolute path must not escape the root.
    let relative = relative.trim_start_matches('/');
    Path::new(root).join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> DanmakuPathContext {
        DanmakuPathContext {
            title: "进击的巨人: Final".into(),
            season: 4,
            episode: 7,
            year: Some(2023),
            provider: "bilibili".into(),
            anime_id: 12,
            episode_id: 340,
            source_id: 55,
            media_type: MediaType::TvSeries,
        }
    }

    #[test]
    fn expands_tokens_and_appends_extension() {
        let path = generate_danmaku_path("/data/tv", "${animeId}/${episodeId}", &ctx());
        assert_eq!(path, PathBuf::from("/data/tv/12/340.xml"));
    }

    #[test]
    fn sanitizes_title_components() {
        let path = generate_danmaku_path("/data/movies", "${title}/${episode}", &ctx());
        let rendered = path.to_string_lossy();
        assert!(rendered.contains("进击的巨人_ Final"));
        assert!(!rendered.contains(':'));
    }

    #[test]
    fn template_supports_subdirectories() {
        let path = generate_danmaku_path(
            "/data/tv",
            "${provider}/${title}/S${season}E${episode}",
            &ctx(),
        );
        assert!(path.ends_with("bilibili/进击的巨人_ Final/S4E7.xml"));
    }
}
