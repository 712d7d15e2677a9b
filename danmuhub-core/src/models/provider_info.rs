//! Declared shapes crossing the provider boundary

use serde::{Deserialize, Serialize};

use super::MediaType;

/// Season/episode context extracted from the search keyword.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeHint {
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

/// One search hit from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSearchInfo {
    pub provider: String,
    pub media_id: String,
    pub title: String,
    pub media_type: MediaType,
    pub season: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_count: Option<i32>,
    /// Episode the current request is after, if the keyword named one.
    /// Blanked before the result list is cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_episode_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One episode as listed by a provider, after filtering and renumbering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEpisodeInfo {
    pub provider: String,
    /// Provider-local id in the canonical string form accepted by
    /// `get_comments`.
    pub episode_id: String,
    pub title: String,
    /// Contiguous, 1-based after filtering.
    pub episode_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
