//! Library graph models: Work (anime) -> Source -> Episode -> Comment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AnimeId, EpisodeId, SourceId};

/// Work type as stored in the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    TvSeries,
}

impl MediaType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::TvSeries => "tv_series",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        // Anything that is not explicitly a movie is treated as a series.
        if s == "movie" {
            Self::Movie
        } else {
            Self::TvSeries
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical record for a title+season pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anime {
    pub id: AnimeId,
    pub title: String,
    pub media_type: MediaType,
    pub season: i32,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    pub local_image_path: Option<String>,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub douban_id: Option<String>,
    pub bangumi_id: Option<String>,
    pub tmdb_episode_group_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One upstream platform's binding of a provider media id to a work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimeSource {
    pub id: SourceId,
    pub anime_id: AnimeId,
    pub provider_name: String,
    pub media_id: String,
    pub is_favorited: bool,
    pub incremental_refresh_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A numbered unit of a source; owns comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub source_id: SourceId,
    pub episode_index: i32,
    pub title: String,
    pub source_url: Option<String>,
    pub provider_episode_id: String,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Populated by list queries that join the comment table.
    #[serde(default)]
    pub comment_count: i64,
}

/// One overlay-text entry in the on-the-wire shape.
///
/// `p` is a CSV of `time,mode,font_size,color,[provider]`; `m` is the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub cid: String,
    pub p: String,
    pub m: String,
    #[serde(default)]
    pub t: f64,
}

/// Normalize a work title for storage. Half-width colons become full-width so
/// the `(title, season)` uniqueness key is stable across sources.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title.trim().replace(':', "：")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_round_trip() {
        assert_eq!(MediaType::parse("movie"), MediaType::Movie);
        assert_eq!(MediaType::parse("tv_series"), MediaType::TvSeries);
        assert_eq!(MediaType::parse("anything"), MediaType::TvSeries);
        assert_eq!(MediaType::Movie.as_str(), "movie");
    }

    #[test]
    fn title_normalization_replaces_colon() {
        assert_eq!(normalize_title("Fate: Zero "), "Fate：Zero");
        assert_eq!(normalize_title("无双"), "无双");
    }
}
