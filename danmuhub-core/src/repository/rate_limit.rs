//! Fixed-window rate limit state, read and updated atomically per call.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::Result;

/// One window counter row. `__global__` aggregates all providers.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub provider_name: String,
    pub request_count: i32,
    pub last_reset_time: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RateLimitRepository {
    pool: PgPool,
}

impl RateLimitRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read the state row for a provider, creating a zeroed row on first use,
    /// and reset the window if `period_seconds` have elapsed. The read, the
    /// conditional reset and the returned snapshot happen in one transaction.
    pub async fn load_and_roll_window(
        &self,
        provider_name: &str,
        period_seconds: i64,
    ) -> Result<RateLimitState> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r"
            INSERT INTO rate_limit_state (provider_name, request_count, last_reset_time)
            VALUES ($1, 0, NOW())
            ON CONFLICT (provider_name) DO UPDATE SET provider_name = EXCLUDED.provider_name
            RETURNING provider_name, request_count, last_reset_time
            ",
        )
        .bind(provider_name)
        .fetch_one(&mut *tx)
        .await?;

        let mut state = RateLimitState {
            provider_name: row.try_get("provider_name")?,
            request_count: row.try_get("request_count")?,
            last_reset_time: row.try_get("last_reset_time")?,
        };

        let elapsed = Utc::now() - state.last_reset_time;
        if elapsed.num_seconds() >= period_seconds {
            let row = sqlx::query(
                r"
                UPDATE rate_limit_state
                SET request_count = 0, last_reset_time = NOW()
                WHERE provider_name = $1
                RETURNING request_count, last_reset_time
                ",
            )
            .bind(provider_name)
            .fetch_one(&mut *tx)
            .await?;
            state.request_count = row.try_get("request_count")?;
            state.last_reset_time = row.try_get("last_reset_time")?;
        }

        tx.commit().await?;
        Ok(state)
    }

    /// Bump one provider's counter by one.
    pub async fn increment(&self, provider_name: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO rate_limit_state (provider_name, request_count, last_reset_time)
            VALUES ($1, 1, NOW())
            ON CONFLICT (provider_name)
            DO UPDATE SET request_count = rate_limit_state.request_count + 1
            ",
        )
        .bind(provider_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All state rows, for the status endpoint.
    pub async fn all_states(&self) -> Result<Vec<RateLimitState>> {
        let rows = sqlx::query(
            r"
            SELECT provider_name, request_count, last_reset_time
            FROM rate_limit_state
            ORDER BY provider_name
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(RateLimitState {
                    provider_name: row.try_get("provider_name")?,
                    request_count: row.try_get("request_count")?,
                    last_reset_time: row.try_get("last_reset_time")?,
                })
            })
            .collect()
    }
}
