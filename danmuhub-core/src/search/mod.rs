//! Cached, alias-expanded, season-parsed search across all enabled providers.

pub mod keyword;
mod pipeline;

pub use keyword::{parse_search_keyword, season_from_title, ParsedKeyword};
pub use pipeline::{SearchPipeline, SearchResponse};

use async_trait::async_trait;

/// A content-metadata source that can expand a title into known aliases
/// (TMDB, Bangumi, Douban adapters live outside this crate).
#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Aliases (translated titles, alternate spellings) for a work title.
    async fn search_aliases(&self, title: &str) -> crate::Result<Vec<String>>;
}
