// Provider adapter interface
//
// Uniform contract over {search, info-from-url, list-episodes, fetch-comments}
// that every upstream platform adapter implements.

pub mod client;
pub mod error;
pub mod filter;
pub mod registry;

pub use client::{HttpClientFactory, RequestPacer};
pub use error::{ProviderError, Result};
pub use registry::ProviderRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{EpisodeHint, MediaType, ProviderEpisodeInfo, ProviderSearchInfo};

/// A comment exactly as one adapter yielded it, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawComment {
    /// Provider-scoped comment id.
    pub id: String,
    pub time_sec: f64,
    /// 1 = scroll, 4 = bottom, 5 = top.
    pub mode: u8,
    pub font_size: u32,
    /// 24-bit RGB.
    pub color: u32,
    pub text: String,
}

/// Episode id parsed out of a provider URL.
///
/// Most providers use a single opaque string; a few compose two parts
/// (e.g. `aid,cid`) that `format_episode_id_for_comments` joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeUrlId {
    Plain(String),
    Pair { first: String, second: String },
}

/// One settings-UI field an adapter declares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurableField {
    /// Config-store key.
    pub key: String,
    /// Human label shown in the settings UI.
    pub label: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Password,
    Boolean,
}

/// Receives progress updates from long comment fetches.
///
/// This is also the cooperative pause/cancel checkpoint: an `Err` return means
/// the surrounding task was cancelled and the fetch must unwind.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, percent: u32, message: &str) -> Result<()>;
}

/// A sink that discards progress; used outside of task contexts.
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _percent: u32, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Contract implemented by every upstream platform adapter.
///
/// Operations return an empty list / `None` for "no result" rather than an
/// error. `get_comments` must only be called after the rate limiter admitted
/// the request.
#[async_trait]
pub trait DanmakuProvider: Send + Sync {
    /// Stable identifier, also used as the `[provider]` tag in comment `p`
    /// attributes. Lowercase ASCII.
    fn provider_name(&self) -> &'static str;

    /// Domains routed to this adapter for URL-based import.
    fn handled_domains(&self) -> &'static [&'static str] {
        &[]
    }

    /// Per-provider request quota per rate-limit window. `None` = unlimited.
    fn rate_limit_quota(&self) -> Option<u32> {
        None
    }

    /// Whether raw upstream responses may be written to the log.
    fn is_loggable(&self) -> bool {
        true
    }

    /// Settings-UI fields (cookies, user agents, feature toggles).
    fn configurable_fields(&self) -> Vec<ConfigurableField> {
        Vec::new()
    }

    /// Connectivity probe URL for the settings UI.
    fn test_url(&self) -> Option<&'static str> {
        None
    }

    /// Provider-specific default episode blacklist, merged with the global
    /// one from config.
    fn default_episode_blacklist(&self) -> &'static str {
        ""
    }

    async fn search(
        &self,
        keyword: &str,
        hint: Option<EpisodeHint>,
    ) -> Result<Vec<ProviderSearchInfo>>;

    /// Resolve a work page URL into a search-info record (manual import).
    async fn get_info_from_url(&self, url: &str) -> Result<Option<ProviderSearchInfo>>;

    /// Resolve an episode page URL into a provider-local episode id.
    async fn get_id_from_url(&self, url: &str) -> Result<Option<EpisodeUrlId>>;

    /// List episodes for a media id, filtered and renumbered `1..n`.
    async fn get_episodes(
        &self,
        media_id: &str,
        target_index: Option<i32>,
        db_media_type: Option<MediaType>,
    ) -> Result<Vec<ProviderEpisodeInfo>>;

    /// Fetch all comments for one episode. Adapters paginate/segment as
    /// their platform requires and report progress through `sink`.
    async fn get_comments(
        &self,
        episode_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RawComment>>;

    /// Canonical string form of an episode id for storage and
    /// `get_comments`. Identity for most providers.
    fn format_episode_id_for_comments(&self, raw: &EpisodeUrlId) -> String {
        match raw {
            EpisodeUrlId::Plain(s) => s.clone(),
            EpisodeUrlId::Pair { first, second } => format!("{first},{second}"),
        }
    }

    /// Provider-defined actions (login flows, token refresh). The core does
    /// not interpret the returned document.
    async fn execute_action(&self, name: &str, _payload: Value) -> Result<Value> {
        Err(ProviderError::ActionNotSupported(name.to_string()))
    }
}
