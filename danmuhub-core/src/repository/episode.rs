//! Episode repository
//!
//! `(source_id, episode_index)` is unique; renumber operations preserve it by
//! staging indices out of range first.

use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::models::{Episode, EpisodeId, SourceId};
use crate::{Error, Result};

#[derive(Clone)]
pub struct EpisodeRepository {
    pool: PgPool,
}

fn episode_from_row(row: &sqlx::postgres::PgRow) -> Result<Episode> {
    Ok(Episode {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        episode_index: row.try_get("episode_index")?,
        title: row.try_get("title")?,
        source_url: row.try_get("source_url")?,
        provider_episode_id: row.try_get("provider_episode_id")?,
        fetched_at: row.try_get("fetched_at")?,
        comment_count: row.try_get("comment_count").unwrap_or(0),
    })
}

const EPISODE_COLUMNS: &str =
    "id, source_id, episode_index, title, source_url, provider_episode_id, fetched_at, \
     0::bigint AS comment_count";

impl EpisodeRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: EpisodeId) -> Result<Option<Episode>> {
        let row = sqlx::query(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episode WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(episode_from_row).transpose()
    }

    /// Create the episode row if `(source_id, episode_index)` is new; return
    /// the existing id otherwise.
    pub async fn create_if_not_exists(
        &self,
        source_id: SourceId,
        episode_index: i32,
        title: &str,
        source_url: Option<&str>,
        provider_episode_id: &str,
    ) -> Result<EpisodeId> {
        if let Some(row) =
            sqlx::query("SELECT id FROM episode WHERE source_id = $1 AND episode_index = $2")
                .bind(source_id)
                .bind(episode_index)
                .fetch_optional(&self.pool)
                .await?
        {
            return Ok(row.try_get("id")?);
        }

        let row = sqlx::query(
            r"
            INSERT INTO episode (source_id, episode_index, title, source_url, provider_episode_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(source_id)
        .bind(episode_index)
        .bind(title)
        .bind(source_url)
        .bind(provider_episode_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    pub async fn exists(&self, source_id: SourceId, episode_index: i32) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM episode WHERE source_id = $1 AND episode_index = $2)",
        )
        .bind(source_id)
        .bind(episode_index)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Episodes of one source, with comment counts, in index order.
    pub async fn list_for_source(&self, source_id: SourceId) -> Result<Vec<Episode>> {
        let rows = sqlx::query(
            r"
            SELECT e.id, e.source_id, e.episode_index, e.title, e.source_url,
                   e.provider_episode_id, e.fetched_at,
                   COUNT(c.id) AS comment_count
            FROM episode e
            LEFT JOIN comment c ON c.episode_id = e.id
            WHERE e.source_id = $1
            GROUP BY e.id
            ORDER BY e.episode_index
            ",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(episode_from_row).collect()
    }

    pub async fn mark_fetched(&self, id: EpisodeId) -> Result<()> {
        sqlx::query("UPDATE episode SET fetched_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_title(&self, id: EpisodeId, title: &str) -> Result<()> {
        sqlx::query("UPDATE episode SET title = $2 WHERE id = $1")
            .bind(id)
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: EpisodeId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM episode WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove all episodes (and their comments, by cascade) of a source while
    /// keeping the source row itself.
    pub async fn clear_source_data(&self, source_id: SourceId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM episode WHERE source_id = $1")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Reassign `episode_index = 1..n` in the current sort order.
    ///
    /// Indices are staged negative first so the unique constraint holds at
    /// every point of the transaction. Idempotent.
    pub async fn reorder(&self, source_id: SourceId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let rows =
            sqlx::query("SELECT id FROM episode WHERE source_id = $1 ORDER BY episode_index")
                .bind(source_id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("UPDATE episode SET episode_index = -episode_index WHERE source_id = $1")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        for (position, row) in rows.iter().enumerate() {
            let id: EpisodeId = row.try_get("id")?;
            sqlx::query("UPDATE episode SET episode_index = $2 WHERE id = $1")
                .bind(id)
                .bind(position as i32 + 1)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(source_id, count = rows.len(), "Reordered episodes");
        Ok(rows.len() as u64)
    }

    /// Shift the index of the given episodes by `offset`.
    ///
    /// The caller must have pre-validated that no resulting index drops below
    /// one; this re-checks inside the transaction.
    pub async fn offset_indices(&self, ids: &[EpisodeId], offset: i32) -> Result<u64> {
        if ids.is_empty() || offset == 0 {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;

        let min_index: Option<i32> =
            sqlx::query_scalar("SELECT MIN(episode_index) FROM episode WHERE id = ANY($1)")
                .bind(ids)
                .fetch_one(&mut *tx)
                .await?;
        let min_index = min_index.ok_or_else(|| Error::NotFound("episodes not found".into()))?;
        if min_index + offset < 1 {
            return Err(Error::InvalidInput(format!(
                "最小集数将为 {}",
                min_index + offset
            )));
        }

        // Stage through the negative range to keep (source_id, index) unique
        // regardless of shift direction.
        sqlx::query("UPDATE episode SET episode_index = -(episode_index + $2) WHERE id = ANY($1)")
            .bind(ids)
            .bind(offset)
            .execute(&mut *tx)
            .await?;
        let result =
            sqlx::query("UPDATE episode SET episode_index = -episode_index WHERE id = ANY($1)")
                .bind(ids)
                .execute(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Lowest episode index among the given ids, for offset pre-validation.
    pub async fn min_index(&self, ids: &[EpisodeId]) -> Result<Option<i32>> {
        if ids.is_empty() {
            return Ok(None);
        }
        let min: Option<i32> =
            sqlx::query_scalar("SELECT MIN(episode_index) FROM episode WHERE id = ANY($1)")
                .bind(ids)
                .fetch_one(&self.pool)
                .await?;
        Ok(min)
    }
}
