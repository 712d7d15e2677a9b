//! TTL cache table shared by the search pipeline and provider adapters.
//!
//! Entries are idempotent; concurrent writes are last-writer-wins.

use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::Result;

#[derive(Clone)]
pub struct CacheRepository {
    pool: PgPool,
}

impl CacheRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a cached JSON value, skipping expired entries.
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query(
            r"
            SELECT cache_value
            FROM cache_data
            WHERE cache_key = $1 AND expires_at > NOW()
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("cache_value")?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// Store a JSON value with a TTL. A non-positive TTL skips the write.
    pub async fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl_seconds: i64,
        provider: Option<&str>,
    ) -> Result<()> {
        if ttl_seconds <= 0 {
            return Ok(());
        }
        let expires_at = Utc::now() + Duration::seconds(ttl_seconds);
        sqlx::query(
            r"
            INSERT INTO cache_data (cache_key, cache_value, provider, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (cache_key)
            DO UPDATE SET cache_value = EXCLUDED.cache_value,
                          provider = EXCLUDED.provider,
                          expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(key)
        .bind(value.to_string())
        .bind(provider)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drop every cache entry. Returns the number of deleted rows.
    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_data")
            .execute(&self.pool)
            .await?;
        debug!("Cleared {} cache entries", result.rows_affected());
        Ok(result.rows_affected())
    }

    /// Drop all cache entries tagged with one provider.
    pub async fn clear_provider(&self, provider: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_data WHERE provider = $1")
            .bind(provider)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Remove expired rows; called periodically by the binary.
    pub async fn evict_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_data WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
