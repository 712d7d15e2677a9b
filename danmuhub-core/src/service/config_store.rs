//! Runtime key/value configuration with an in-process read-through cache.
//!
//! Every tunable — TTLs, proxy, per-provider cookies, rate-limit caps,
//! blacklist regexes, webhook filters — lives here so it can change without a
//! restart. Booleans and integers are stored as lowercase strings.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::repository::ConfigRepository;
use crate::Result;

/// Keys unknown to the store are seeded from this table on first read.
const DEFAULT_CONFIGS: &[(&str, &str, &str)] = &[
    // Cache TTLs
    ("search_ttl_seconds", "10800", "搜索结果的缓存时间（秒）。"),
    ("episodes_ttl_seconds", "10800", "分集列表的缓存时间（秒）。"),
    ("base_info_ttl_seconds", "10800", "基础媒体信息的缓存时间（秒）。"),
    ("metadata_search_ttl_seconds", "10800", "元数据搜索结果的缓存时间（秒）。"),
    // Proxy
    ("proxy_url", "", "全局HTTP/HTTPS/SOCKS5代理地址。"),
    ("proxy_enabled", "false", "是否全局启用代理。"),
    // Search
    ("search_max_results_per_source", "30", "每个搜索源最多返回的结果数量。"),
    (
        "episode_blacklist_regex",
        crate::provider::filter::GLOBAL_EPISODE_BLACKLIST_DEFAULT,
        "用于过滤分集标题的全局黑名单（正则表达式）。",
    ),
    // Danmaku output
    ("danmaku_output_limit_per_source", "-1", "弹幕输出上限。-1为无限制，超出时按时间均匀采样。"),
    ("danmaku_max_segments", "100", "无时长影片最多抓取的一分钟弹幕分段数。"),
    // Danmaku file storage
    ("custom_danmaku_path_enabled", "false", "是否启用自定义弹幕文件保存路径。"),
    ("movie_danmaku_directory_path", "/app/config/danmaku/movies", "电影弹幕文件存储的根目录。"),
    ("movie_danmaku_filename_template", "${title}/${episodeId}", "电影弹幕文件命名模板。"),
    ("tv_danmaku_directory_path", "/app/config/danmaku/tv", "电视节目弹幕文件存储的根目录。"),
    ("tv_danmaku_filename_template", "${animeId}/${episodeId}", "电视节目弹幕文件命名模板。"),
    // Webhook
    ("webhook_enabled", "true", "是否全局启用 Webhook 功能。"),
    ("webhook_api_key", "", "用于Webhook调用的安全密钥。"),
    ("webhook_delayed_import_enabled", "false", "是否为 Webhook 触发的导入启用延时。"),
    ("webhook_delayed_import_hours", "24", "Webhook 延时导入的小时数。"),
    ("webhook_filter_mode", "blacklist", "Webhook 标题过滤模式 (blacklist/whitelist)。"),
    ("webhook_filter_regex", "", "用于过滤 Webhook 标题的正则表达式。"),
    // External API
    ("external_api_key", "", "用于外部API调用的安全密钥。"),
    ("ua_filter_mode", "off", "User-Agent 过滤模式 (off/blacklist/whitelist)。"),
];

/// Process-wide runtime config store.
#[derive(Clone)]
pub struct ConfigStore {
    repository: ConfigRepository,
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl ConfigStore {
    #[must_use]
    pub fn new(repository: ConfigRepository) -> Self {
        Self {
            repository,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed the defaults table into the database. Existing values win.
    pub async fn initialize(&self) -> Result<()> {
        for (key, default_value, description) in DEFAULT_CONFIGS {
            self.repository.seed(key, default_value, description).await?;
        }
        info!("Config store initialized with {} defaults", DEFAULT_CONFIGS.len());
        Ok(())
    }

    /// Get a config value, falling back to the defaults table and then to
    /// `default`. Reads populate the in-process cache.
    pub async fn get(&self, key: &str, default: &str) -> String {
        {
            let cache = self.cache.read().await;
            if let Some(value) = cache.get(key) {
                return value.clone();
            }
        }

        let value = match self.repository.get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                // Unknown key: seed from the defaults table when listed there.
                match DEFAULT_CONFIGS.iter().find(|(k, _, _)| *k == key) {
                    Some((_, default_value, description)) => self
                        .repository
                        .seed(key, default_value, description)
                        .await
                        .unwrap_or_else(|_| (*default_value).to_string()),
                    None => default.to_string(),
                }
            }
            Err(e) => {
                warn!(key, "Config read failed, using default: {e}");
                default.to_string()
            }
        };

        let mut cache = self.cache.write().await;
        cache.insert(key.to_string(), value.clone());
        value
    }

    /// Convenience accessor for integer configs.
    pub async fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key, &default.to_string())
            .await
            .trim()
            .parse()
            .unwrap_or(default)
    }

    /// Convenience accessor for boolean configs ("true"/"false" strings).
    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        let raw = self.get(key, if default { "true" } else { "false" }).await;
        raw.trim().eq_ignore_ascii_case("true")
    }

    /// Persist a value and publish it to the cache.
    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.repository.set(key, value, "").await?;
        let mut cache = self.cache.write().await;
        cache.insert(key.to_string(), value.to_string());
        debug!(key, "Config updated");
        Ok(())
    }

    /// Drop one key from the in-process cache; the next read goes to the
    /// database.
    pub async fn invalidate(&self, key: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(key);
    }

    /// All persisted values, for the settings surface.
    pub async fn get_all(&self) -> Result<Vec<(String, String)>> {
        self.repository.get_all().await
    }
}
