pub mod config_store;
pub mod rate_limit;

pub use config_store::ConfigStore;
pub use rate_limit::{RateLimitStatus, RateLimiter, UI_STATUS_CHECK_PROVIDER};
