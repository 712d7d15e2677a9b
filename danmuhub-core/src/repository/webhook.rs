//! Webhook ingress rows: received now, executed after the configured delay.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::Result;

#[derive(Debug, Clone)]
pub struct WebhookTask {
    pub id: i64,
    pub title: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub reception_time: DateTime<Utc>,
    pub execute_time: DateTime<Utc>,
}

#[derive(Clone)]
pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        title: &str,
        payload: &serde_json::Value,
        execute_time: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r"
            INSERT INTO webhook_task (title, payload, execute_time)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(title)
        .bind(payload)
        .bind(execute_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    /// Claim due rows by flipping them to `dispatched` in the same statement,
    /// so a crashed pump run never dispatches a row twice.
    pub async fn claim_due(&self, limit: i64) -> Result<Vec<WebhookTask>> {
        let rows = sqlx::query(
            r"
            UPDATE webhook_task
            SET status = 'dispatched'
            WHERE id IN (
                SELECT id FROM webhook_task
                WHERE status = 'pending' AND execute_time <= NOW()
                ORDER BY execute_time
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, title, payload, status, reception_time, execute_time
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(WebhookTask {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    payload: row.try_get("payload")?,
                    status: row.try_get("status")?,
                    reception_time: row.try_get("reception_time")?,
                    execute_time: row.try_get("execute_time")?,
                })
            })
            .collect()
    }

    pub async fn list_pending(&self) -> Result<Vec<WebhookTask>> {
        let rows = sqlx::query(
            r"
            SELECT id, title, payload, status, reception_time, execute_time
            FROM webhook_task
            WHERE status = 'pending'
            ORDER BY execute_time
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(WebhookTask {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    payload: row.try_get("payload")?,
                    status: row.try_get("status")?,
                    reception_time: row.try_get("reception_time")?,
                    execute_time: row.try_get("execute_time")?,
                })
            })
            .collect()
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhook_task WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
