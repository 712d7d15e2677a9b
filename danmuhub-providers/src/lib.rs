//! Concrete danmaku provider adapters, one module per upstream platform.
//!
//! Every adapter owns its HTTP client and cookies, serializes its own
//! outbound requests through a `RequestPacer`, and returns episode lists
//! already filtered and renumbered through the shared episode filter.

pub mod acfun;
pub mod bilibili;
pub mod iqiyi;
pub mod mgtv;
pub mod tencent;
pub mod youku;

use std::sync::Arc;

use danmuhub_core::provider::filter::{compile_blacklist, GLOBAL_EPISODE_BLACKLIST_DEFAULT};
use danmuhub_core::provider::ProviderRegistry;
use danmuhub_core::repository::CacheRepository;
use danmuhub_core::service::ConfigStore;
use regex::Regex;

/// Shared dependencies handed to each adapter at construction.
#[derive(Clone)]
pub struct ProviderDeps {
    pub config: Arc<ConfigStore>,
    pub cache: CacheRepository,
}

/// Register every built-in adapter.
pub fn register_all(registry: &mut ProviderRegistry, deps: &ProviderDeps) {
    registry.register(Arc::new(tencent::TencentProvider::new(deps.clone())));
    registry.register(Arc::new(bilibili::BilibiliProvider::new(deps.clone())));
    registry.register(Arc::new(iqiyi::IqiyiProvider::new(deps.clone())));
    registry.register(Arc::new(youku::YoukuProvider::new(deps.clone())));
    registry.register(Arc::new(mgtv::MgtvProvider::new(deps.clone())));
    registry.register(Arc::new(acfun::AcfunProvider::new(deps.clone())));
}

/// Effective episode blacklist for one provider: the global regex from
/// config merged with the provider-specific one.
pub(crate) async fn episode_blacklist(
    config: &ConfigStore,
    provider_name: &str,
    provider_default: &str,
) -> Option<Regex> {
    let global = config
        .get("episode_blacklist_regex", GLOBAL_EPISODE_BLACKLIST_DEFAULT)
        .await;
    let provider_specific = config
        .get(
            &format!("{provider_name}_episode_blacklist_regex"),
            provider_default,
        )
        .await;
    compile_blacklist(&global, &provider_specific)
}

/// Whether raw upstream responses may be logged for this provider right now.
pub(crate) async fn should_log_responses(
    config: &ConfigStore,
    provider_name: &str,
    is_loggable: bool,
) -> bool {
    if !is_loggable {
        return false;
    }
    config
        .get_bool(&format!("scraper_{provider_name}_log_responses"), false)
        .await
}
