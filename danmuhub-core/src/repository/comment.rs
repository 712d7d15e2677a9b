//! Comment repository
//!
//! Inserts are idempotent on `(episode_id, cid)`.

use std::collections::HashSet;

use sqlx::{PgPool, Row};

use crate::models::{Comment, EpisodeId, Page, PageParams};
use crate::Result;

#[derive(Clone)]
pub struct CommentRepository {
    pool: PgPool,
}

impl CommentRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a batch of comments, skipping `(episode_id, cid)` duplicates.
    /// Returns the number of newly inserted rows.
    pub async fn bulk_insert(&self, episode_id: EpisodeId, comments: &[Comment]) -> Result<u64> {
        if comments.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        // Chunked multi-row inserts keep the statement size bounded while
        // staying well below per-row round trip cost.
        for chunk in comments.chunks(500) {
            let mut cids = Vec::with_capacity(chunk.len());
            let mut ps = Vec::with_capacity(chunk.len());
            let mut ms = Vec::with_capacity(chunk.len());
            let mut ts = Vec::with_capacity(chunk.len());
            for comment in chunk {
                cids.push(comment.cid.clone());
                ps.push(comment.p.clone());
                ms.push(comment.m.clone());
                ts.push(comment.t);
            }

            let result = sqlx::query(
                r"
                INSERT INTO comment (episode_id, cid, p, m, t)
                SELECT $1, * FROM UNNEST($2::text[], $3::text[], $4::text[], $5::float8[])
                ON CONFLICT (episode_id, cid) DO NOTHING
                ",
            )
            .bind(episode_id)
            .bind(&cids)
            .bind(&ps)
            .bind(&ms)
            .bind(&ts)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Cids already stored for an episode, for incremental refresh diffs.
    pub async fn existing_cids(&self, episode_id: EpisodeId) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT cid FROM comment WHERE episode_id = $1")
            .bind(episode_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| Ok(row.try_get::<String, _>("cid")?))
            .collect()
    }

    pub async fn count_for_episode(&self, episode_id: EpisodeId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comment WHERE episode_id = $1")
            .bind(episode_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Paginated read in playback-time order, for the player-facing endpoint.
    pub async fn list_for_episode(
        &self,
        episode_id: EpisodeId,
        params: PageParams,
    ) -> Result<Page<Comment>> {
        let total = self.count_for_episode(episode_id).await?;

        let rows = sqlx::query(
            r"
            SELECT cid, p, m, t
            FROM comment
            WHERE episode_id = $1
            ORDER BY t, cid
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(episode_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(|row| {
                Ok(Comment {
                    cid: row.try_get("cid")?,
                    p: row.try_get("p")?,
                    m: row.try_get("m")?,
                    t: row.try_get("t")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, total as u64, params))
    }

    /// All comments of an episode in time order (XML export, file storage).
    pub async fn all_for_episode(&self, episode_id: EpisodeId) -> Result<Vec<Comment>> {
        let rows = sqlx::query(
            "SELECT cid, p, m, t FROM comment WHERE episode_id = $1 ORDER BY t, cid",
        )
        .bind(episode_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Comment {
                    cid: row.try_get("cid")?,
                    p: row.try_get("p")?,
                    m: row.try_get("m")?,
                    t: row.try_get("t")?,
                })
            })
            .collect()
    }
}
