/// Errors crossing the provider adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected upstream response: {0}")]
    Schema(String),

    #[error("Resource not found")]
    NotFound,

    #[error("Upstream rate limited, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Provider {0} is not registered")]
    UnknownProvider(String),

    #[error("Action '{0}' is not supported by this provider")]
    ActionNotSupported(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            return Self::RateLimited {
                retry_after_seconds: 60,
            };
        }
        if err.is_decode() {
            return Self::Schema(err.to_string());
        }
        Self::Network(err.to_string())
    }
}

impl ProviderError {
    /// Transient network failures are retried with backoff; everything else
    /// fails fast.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
