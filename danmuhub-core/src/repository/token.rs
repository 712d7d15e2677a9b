//! API token and UA-rule repository

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};

use crate::models::{ApiToken, UaRule};
use crate::{Error, Result};

#[derive(Clone)]
pub struct TokenRepository {
    pool: PgPool,
}

fn token_from_row(row: &sqlx::postgres::PgRow) -> Result<ApiToken> {
    Ok(ApiToken {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        token: row.try_get("token")?,
        enabled: row.try_get("enabled")?,
        expires_at: row.try_get("expires_at")?,
        daily_call_limit: row.try_get("daily_call_limit")?,
        daily_count: row.try_get("daily_count")?,
        last_reset_date: row.try_get("last_reset_date")?,
        created_at: row.try_get("created_at")?,
    })
}

const TOKEN_COLUMNS: &str = "id, name, token, enabled, expires_at, daily_call_limit, \
     daily_count, last_reset_date, created_at";

impl TokenRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: &str,
        token: &str,
        expires_at: Option<DateTime<Utc>>,
        daily_call_limit: i32,
    ) -> Result<ApiToken> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO api_token (name, token, expires_at, daily_call_limit)
            VALUES ($1, $2, $3, $4)
            RETURNING {TOKEN_COLUMNS}
            "
        ))
        .bind(name)
        .bind(token)
        .bind(expires_at)
        .bind(daily_call_limit)
        .fetch_one(&self.pool)
        .await?;
        token_from_row(&row)
    }

    pub async fn list(&self) -> Result<Vec<ApiToken>> {
        let rows = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM api_token ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(token_from_row).collect()
    }

    pub async fn find_by_value(&self, token: &str) -> Result<Option<ApiToken>> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM api_token WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    pub async fn toggle(&self, id: i64) -> Result<bool> {
        let row = sqlx::query(
            "UPDATE api_token SET enabled = NOT enabled WHERE id = $1 RETURNING enabled",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("token {id} not found")))?;
        Ok(row.try_get("enabled")?)
    }

    /// Zero the daily counter and stamp today's date.
    pub async fn reset_counter(&self, id: i64, today: NaiveDate) -> Result<()> {
        sqlx::query("UPDATE api_token SET daily_count = 0, last_reset_date = $2 WHERE id = $1")
            .bind(id)
            .bind(today)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Count one call, rolling the counter over at the date boundary.
    pub async fn record_call(&self, id: i64, today: NaiveDate) -> Result<()> {
        sqlx::query(
            r"
            UPDATE api_token
            SET daily_count = CASE WHEN last_reset_date = $2 THEN daily_count + 1 ELSE 1 END,
                last_reset_date = $2
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(today)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_token WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========== UA rules ==========

    pub async fn list_ua_rules(&self) -> Result<Vec<UaRule>> {
        let rows = sqlx::query("SELECT id, ua_string, created_at FROM ua_rule ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(UaRule {
                    id: row.try_get("id")?,
                    ua_string: row.try_get("ua_string")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn add_ua_rule(&self, ua_string: &str) -> Result<UaRule> {
        let row = sqlx::query(
            r"
            INSERT INTO ua_rule (ua_string)
            VALUES ($1)
            RETURNING id, ua_string, created_at
            ",
        )
        .bind(ua_string)
        .fetch_one(&self.pool)
        .await?;
        Ok(UaRule {
            id: row.try_get("id")?,
            ua_string: row.try_get("ua_string")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn delete_ua_rule(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ua_rule WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
