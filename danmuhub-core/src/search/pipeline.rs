//! The provider search pipeline.
//!
//! parse -> base cache -> alias expansion -> parallel fan-out -> alias
//! filter -> type correction -> season filter -> sort -> cache.

use std::sync::Arc;
use std::sync::LazyLock;

use futures::future::join_all;
use rapidfuzz::fuzz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::keyword::{parse_search_keyword, season_from_title};
use super::MetadataSource;
use crate::models::{MediaType, ProviderSearchInfo};
use crate::provider::{filter::is_junk_title, ProviderRegistry};
use crate::repository::CacheRepository;
use crate::service::ConfigStore;
use crate::{Error, Result};

const ALIAS_VALIDATE_THRESHOLD: f64 = 70.0;
const ALIAS_FILTER_THRESHOLD: f64 = 85.0;
const DEFAULT_SEARCH_TTL: i64 = 10_800;

static MOVIE_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)剧场版|劇場版|movie|映画").expect("valid regex"));
static BRACKETED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\(（\[【][^\)）\]】]*[\)）\]】]").expect("valid regex"));

/// Search output: the sorted result list plus the parsed season/episode so
/// the caller can drive single-episode import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<ProviderSearchInfo>,
    pub search_season: Option<u32>,
    pub search_episode: Option<u32>,
}

pub struct SearchPipeline {
    registry: Arc<ProviderRegistry>,
    cache: CacheRepository,
    config: Arc<ConfigStore>,
    metadata_sources: Vec<Arc<dyn MetadataSource>>,
}

impl SearchPipeline {
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: CacheRepository,
        config: Arc<ConfigStore>,
        metadata_sources: Vec<Arc<dyn MetadataSource>>,
    ) -> Self {
        Self {
            registry,
            cache,
            config,
            metadata_sources,
        }
    }

    pub async fn search(&self, keyword: &str) -> Result<SearchResponse> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(Error::InvalidInput("search keyword must not be empty".into()));
        }

        let parsed = parse_search_keyword(keyword);
        let cache_key = format!(
            "search_base_{}_{}",
            parsed.title,
            parsed.season.map_or_else(|| "all".to_string(), |s| s.to_string())
        );

        // Base cache: annotate the cached list with this request's episode.
        if let Some(value) = self.cache.get(&cache_key).await? {
            if let Ok(mut results) = serde_json::from_value::<Vec<ProviderSearchInfo>>(value) {
                debug!(title = %parsed.title, "Search served from base cache");
                annotate_episode(&mut results, parsed.episode);
                return Ok(SearchResponse {
                    results,
                    search_season: parsed.season,
                    search_episode: parsed.episode,
                });
            }
        }

        let providers = self.registry.enabled().await;
        if providers.is_empty() {
            return Err(Error::InvalidInput(
                "no search providers are enabled".to_string(),
            ));
        }

        let aliases = self.expand_aliases(&parsed.title).await;

        // Fan out with the original title; aliases only filter afterwards.
        let hint = parsed.hint();
        let max_per_source = self.config.get_i64("search_max_results_per_source", 30).await;
        let futures = providers.iter().map(|provider| {
            let title = parsed.title.clone();
            let provider = provider.clone();
            async move {
                let name = provider.provider_name();
                match provider.search(&title, Some(hint)).await {
                    Ok(mut results) => {
                        if max_per_source > 0 {
                            results.truncate(max_per_source as usize);
                        }
                        results
                    }
                    Err(e) => {
                        warn!(provider = name, "Search failed: {e}");
                        Vec::new()
                    }
                }
            }
        });
        let mut results: Vec<ProviderSearchInfo> =
            join_all(futures).await.into_iter().flatten().collect();

        results.retain(|r| !is_junk_title(&r.title));
        results.retain(|r| alias_matches(&aliases, &r.title));

        // 剧场版/映画 in the title forces the movie type.
        for result in &mut results {
            if MOVIE_KEYWORD_RE.is_match(&result.title) {
                result.media_type = MediaType::Movie;
            }
        }

        if let Some(season) = parsed.season {
            results.retain(|r| {
                r.media_type == MediaType::TvSeries
                    && result_season(r) == season
            });
        }

        self.sort_results(&parsed.title, &mut results).await;

        // Cache with the per-request episode blanked.
        let ttl = self
            .config
            .get_i64("search_ttl_seconds", DEFAULT_SEARCH_TTL)
            .await;
        let mut cacheable = results.clone();
        for result in &mut cacheable {
            result.current_episode_index = None;
        }
        if let Err(e) = self
            .cache
            .set(&cache_key, &serde_json::to_value(&cacheable)?, ttl, None)
            .await
        {
            warn!("Failed to cache search results: {e}");
        }

        annotate_episode(&mut results, parsed.episode);
        info!(
            title = %parsed.title,
            season = ?parsed.season,
            count = results.len(),
            "Search completed"
        );
        Ok(SearchResponse {
            results,
            search_season: parsed.season,
            search_episode: parsed.episode,
        })
    }

    /// Ask every metadata source for aliases and keep those close enough to
    /// the query. The original title is always included.
    async fn expand_aliases(&self, title: &str) -> Vec<String> {
        let mut aliases = vec![title.to_string()];
        for source in &self.metadata_sources {
            match source.search_aliases(title).await {
                Ok(candidates) => {
                    for alias in candidates {
                        let score =
                            fuzz::token_set_ratio(title.chars(), alias.chars());
                        if score > ALIAS_VALIDATE_THRESHOLD && !aliases.contains(&alias) {
                            aliases.push(alias);
                        }
                    }
                }
                Err(e) => warn!(source = source.name(), "Alias expansion failed: {e}"),
            }
        }
        aliases
    }

    /// Primary key: configured provider display order ascending; secondary:
    /// fuzzy similarity to the query descending.
    async fn sort_results(&self, query: &str, results: &mut [ProviderSearchInfo]) {
        let mut keyed = Vec::with_capacity(results.len());
        for result in results.iter() {
            let order = self.registry.display_order(&result.provider).await;
            let score = fuzz::token_set_ratio(query.chars(), result.title.chars());
            keyed.push((order, score));
        }
        // Sort an index permutation, then apply it.
        let mut indices: Vec<usize> = (0..results.len()).collect();
        indices.sort_by(|&a, &b| {
            keyed[a]
                .0
                .cmp(&keyed[b].0)
                .then_with(|| keyed[b].1.total_cmp(&keyed[a].1))
        });
        let mut sorted: Vec<ProviderSearchInfo> = indices
            .iter()
            .map(|&i| results[i].clone())
            .collect();
        results.swap_with_slice(&mut sorted);
    }
}

fn annotate_episode(results: &mut [ProviderSearchInfo], episode: Option<u32>) {
    for result in results.iter_mut() {
        result.current_episode_index = episode.map(|e| e as i32);
    }
}

fn result_season(result: &ProviderSearchInfo) -> u32 {
    if result.season > 0 {
        result.season as u32
    } else {
        season_from_title(&result.title)
    }
}

/// Normalize a title for alias comparison: strip bracketed annotations,
/// casefold, drop spaces, unify full-width colons.
fn normalize_for_match(title: &str) -> String {
    let stripped = BRACKETED_RE.replace_all(title, "");
    stripped
        .to_lowercase()
        .replace('：', ":")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// A result survives iff some alias is a partial-ratio > 85 match of its
/// normalized title.
fn alias_matches(aliases: &[String], title: &str) -> bool {
    let normalized_title = normalize_for_match(title);
    if normalized_title.is_empty() {
        return false;
    }
    aliases.iter().any(|alias| {
        let normalized_alias = normalize_for_match(alias);
        if normalized_alias.is_empty() {
            return false;
        }
        fuzz::partial_ratio(normalized_alias.chars(), normalized_title.chars())
            > ALIAS_FILTER_THRESHOLD
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_brackets_and_spaces() {
        assert_eq!(normalize_for_match("进击的巨人（最终季）"), "进击的巨人");
        assert_eq!(normalize_for_match("Fate： Zero"), "fate:zero");
    }

    #[test]
    fn alias_filter_accepts_substring_titles() {
        let aliases = vec!["进击的巨人".to_string()];
        assert!(alias_matches(&aliases, "进击的巨人 最终季"));
        assert!(!alias_matches(&aliases, "完全不同的动画"));
    }

    #[test]
    fn movie_keyword_regex_matches_variants() {
        assert!(MOVIE_KEYWORD_RE.is_match("电影 剧场版"));
        assert!(MOVIE_KEYWORD_RE.is_match("Gintama THE MOVIE"));
        assert!(!MOVIE_KEYWORD_RE.is_match("第二季"));
    }
}
