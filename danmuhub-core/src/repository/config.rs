//! Config key/value repository

use sqlx::{PgPool, Row};

use crate::Result;

#[derive(Clone)]
pub struct ConfigRepository {
    pool: PgPool,
}

impl ConfigRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a single config value by key.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r"
            SELECT config_value
            FROM config
            WHERE config_key = $1
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("config_value")?)),
            None => Ok(None),
        }
    }

    /// Upsert a config value.
    pub async fn set(&self, key: &str, value: &str, description: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO config (config_key, config_value, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (config_key)
            DO UPDATE SET config_value = EXCLUDED.config_value, updated_at = NOW()
            ",
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Seed a default value without overwriting an existing one. Returns the
    /// stored value.
    pub async fn seed(&self, key: &str, default_value: &str, description: &str) -> Result<String> {
        let row = sqlx::query(
            r"
            INSERT INTO config (config_key, config_value, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (config_key) DO UPDATE SET config_key = EXCLUDED.config_key
            RETURNING config_value
            ",
        )
        .bind(key)
        .bind(default_value)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("config_value")?)
    }

    /// All config rows as (key, value) pairs, for the settings UI.
    pub async fn get_all(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            r"
            SELECT config_key, config_value
            FROM config
            ORDER BY config_key
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok((row.try_get("config_key")?, row.try_get("config_value")?)))
            .collect()
    }
}
