use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limit exceeded. Try again in {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },

    #[error("Rate limit configuration verification failed")]
    ConfigVerificationFailed,

    #[error("Upstream network error: {0}")]
    UpstreamNetwork(String),

    #[error("Upstream schema error: {0}")]
    UpstreamSchema(String),

    #[error("Task was cancelled")]
    TaskCancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            // Map "no rows" to NotFound
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            // Map constraint violations to typed errors
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // PostgreSQL unique_violation
                    "23505" => {
                        let detail = db_err.message().to_string();
                        if detail.contains("uq_anime_title_season") {
                            Error::Conflict("A work with this title and season already exists".to_string())
                        } else if detail.contains("uq_source_provider_media") {
                            Error::Conflict("This provider media is already linked to a work".to_string())
                        } else if detail.contains("uq_episode_source_index") {
                            Error::Conflict("An episode with this index already exists".to_string())
                        } else {
                            Error::Conflict("Resource already exists".to_string())
                        }
                    }
                    // PostgreSQL foreign_key_violation
                    "23503" => Error::NotFound("Referenced resource not found".to_string()),
                    // PostgreSQL check_violation
                    "23514" => Error::InvalidInput("Constraint check failed".to_string()),
                    // PostgreSQL not_null_violation
                    "23502" => Error::InvalidInput("Required field is missing".to_string()),
                    _ => Error::Database(err),
                }
            }
            _ => Error::Database(err),
        }
    }
}

impl From<crate::provider::ProviderError> for Error {
    fn from(err: crate::provider::ProviderError) -> Self {
        use crate::provider::ProviderError;
        match err {
            ProviderError::NotFound => Error::NotFound("Provider resource not found".to_string()),
            ProviderError::Network(msg) => Error::UpstreamNetwork(msg),
            ProviderError::Schema(msg) => Error::UpstreamSchema(msg),
            ProviderError::RateLimited { retry_after_seconds } => {
                Error::RateLimitExceeded { retry_after_seconds }
            }
            other => Error::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
