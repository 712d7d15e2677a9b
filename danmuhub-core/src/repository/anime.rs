//! Work (anime) and source repository
//!
//! Enforces the `(title, season)` and `(provider, media_id)` uniqueness
//! invariants and the single-favorite-per-work rule.

use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::models::{
    library::normalize_title, Anime, AnimeId, AnimeSource, MediaType, Page, PageParams, SourceId,
};
use crate::{Error, Result};

#[derive(Clone)]
pub struct AnimeRepository {
    pool: PgPool,
}

fn anime_from_row(row: &sqlx::postgres::PgRow) -> Result<Anime> {
    let media_type: String = row.try_get("media_type")?;
    Ok(Anime {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        media_type: MediaType::parse(&media_type),
        season: row.try_get("season")?,
        year: row.try_get("year")?,
        image_url: row.try_get("image_url")?,
        local_image_path: row.try_get("local_image_path")?,
        tmdb_id: row.try_get("tmdb_id")?,
        imdb_id: row.try_get("imdb_id")?,
        tvdb_id: row.try_get("tvdb_id")?,
        douban_id: row.try_get("douban_id")?,
        bangumi_id: row.try_get("bangumi_id")?,
        tmdb_episode_group_id: row.try_get("tmdb_episode_group_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn source_from_row(row: &sqlx::postgres::PgRow) -> Result<AnimeSource> {
    Ok(AnimeSource {
        id: row.try_get("id")?,
        anime_id: row.try_get("anime_id")?,
        provider_name: row.try_get("provider_name")?,
        media_id: row.try_get("media_id")?,
        is_favorited: row.try_get("is_favorited")?,
        incremental_refresh_enabled: row.try_get("incremental_refresh_enabled")?,
        created_at: row.try_get("created_at")?,
    })
}

const ANIME_COLUMNS: &str = "id, title, media_type, season, year, image_url, local_image_path, \
     tmdb_id, imdb_id, tvdb_id, douban_id, bangumi_id, tmdb_episode_group_id, created_at";
const SOURCE_COLUMNS: &str =
    "id, anime_id, provider_name, media_id, is_favorited, incremental_refresh_enabled, created_at";

impl AnimeRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: AnimeId) -> Result<Option<Anime>> {
        let row = sqlx::query(&format!("SELECT {ANIME_COLUMNS} FROM anime WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(anime_from_row).transpose()
    }

    /// Find the work for a normalized `(title, season)` pair or create it.
    pub async fn get_or_create(
        &self,
        title: &str,
        media_type: MediaType,
        season: i32,
        image_url: Option<&str>,
        local_image_path: Option<&str>,
        year: Option<i32>,
    ) -> Result<AnimeId> {
        let title = normalize_title(title);

        if let Some(row) = sqlx::query("SELECT id FROM anime WHERE title = $1 AND season = $2")
            .bind(&title)
            .bind(season)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(row.try_get("id")?);
        }

        let row = sqlx::query(
            r"
            INSERT INTO anime (title, media_type, season, year, image_url, local_image_path)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (title, season) DO UPDATE SET title = EXCLUDED.title
            RETURNING id
            ",
        )
        .bind(&title)
        .bind(media_type.as_str())
        .bind(season)
        .bind(year)
        .bind(image_url)
        .bind(local_image_path)
        .fetch_one(&self.pool)
        .await?;

        let id: AnimeId = row.try_get("id")?;
        info!(anime_id = id, title = %title, season, "Created work");
        Ok(id)
    }

    /// Fill in external ids that are still empty; never overwrites.
    pub async fn update_metadata_if_empty(
        &self,
        anime_id: AnimeId,
        tmdb_id: Option<&str>,
        imdb_id: Option<&str>,
        tvdb_id: Option<&str>,
        douban_id: Option<&str>,
        bangumi_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE anime
            SET tmdb_id    = COALESCE(tmdb_id, $2),
                imdb_id    = COALESCE(imdb_id, $3),
                tvdb_id    = COALESCE(tvdb_id, $4),
                douban_id  = COALESCE(douban_id, $5),
                bangumi_id = COALESCE(bangumi_id, $6)
            WHERE id = $1
            ",
        )
        .bind(anime_id)
        .bind(tmdb_id)
        .bind(imdb_id)
        .bind(tvdb_id)
        .bind(douban_id)
        .bind(bangumi_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Paginated library listing, optionally filtered by a keyword.
    pub async fn list(&self, keyword: Option<&str>, params: PageParams) -> Result<Page<Anime>> {
        let pattern = keyword.map(|k| format!("%{k}%"));

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM anime WHERE $1::text IS NULL OR title ILIKE $1",
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            r"
            SELECT {ANIME_COLUMNS} FROM anime
            WHERE $1::text IS NULL OR title ILIKE $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "
        ))
        .bind(&pattern)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(anime_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, params))
    }

    /// Delete a work and, by cascade, all of its sources, episodes and
    /// comments.
    pub async fn delete(&self, id: AnimeId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM anime WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========== Sources ==========

    /// Link a provider media to a work, idempotent on `(provider, media_id)`.
    ///
    /// Returns the source id. Fails with `Conflict` when the same provider
    /// media is already bound to a different work.
    pub async fn link_source(
        &self,
        anime_id: AnimeId,
        provider_name: &str,
        media_id: &str,
    ) -> Result<SourceId> {
        if let Some(row) = sqlx::query(
            "SELECT id, anime_id FROM anime_source WHERE provider_name = $1 AND media_id = $2",
        )
        .bind(provider_name)
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?
        {
            let existing_anime: AnimeId = row.try_get("anime_id")?;
            if existing_anime != anime_id {
                return Err(Error::Conflict(format!(
                    "{provider_name} media {media_id} is already linked to another work"
                )));
            }
            return Ok(row.try_get("id")?);
        }

        let row = sqlx::query(
            r"
            INSERT INTO anime_source (anime_id, provider_name, media_id)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(anime_id)
        .bind(provider_name)
        .bind(media_id)
        .fetch_one(&self.pool)
        .await?;

        let id: SourceId = row.try_get("id")?;
        debug!(source_id = id, provider = provider_name, media_id, "Linked source");
        Ok(id)
    }

    pub async fn get_source(&self, id: SourceId) -> Result<Option<AnimeSource>> {
        let row = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM anime_source WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    pub async fn find_source(
        &self,
        provider_name: &str,
        media_id: &str,
    ) -> Result<Option<AnimeSource>> {
        let row = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM anime_source WHERE provider_name = $1 AND media_id = $2"
        ))
        .bind(provider_name)
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    pub async fn sources_for_anime(&self, anime_id: AnimeId) -> Result<Vec<AnimeSource>> {
        let rows = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM anime_source WHERE anime_id = $1 ORDER BY id"
        ))
        .bind(anime_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(source_from_row).collect()
    }

    /// Sources with incremental refresh enabled, for the scheduled refresh
    /// pump.
    pub async fn sources_with_incremental_refresh(&self) -> Result<Vec<AnimeSource>> {
        let rows = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM anime_source WHERE incremental_refresh_enabled ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(source_from_row).collect()
    }

    /// Unlink a source and cascade to its episodes and comments.
    pub async fn delete_source(&self, id: SourceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM anime_source WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Toggle a source's favorite flag, clearing any other favorite on the
    /// same work in the same transaction. Returns the new status.
    pub async fn toggle_source_favorite(&self, id: SourceId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT anime_id, is_favorited FROM anime_source WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("source {id} not found")))?;
        let anime_id: AnimeId = row.try_get("anime_id")?;
        let current: bool = row.try_get("is_favorited")?;
        let new_status = !current;

        if new_status {
            sqlx::query(
                "UPDATE anime_source SET is_favorited = FALSE WHERE anime_id = $1 AND id <> $2",
            )
            .bind(anime_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE anime_source SET is_favorited = $2 WHERE id = $1")
            .bind(id)
            .bind(new_status)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(new_status)
    }

    /// Toggle a source's incremental refresh flag. Returns the new status.
    pub async fn toggle_source_incremental_refresh(&self, id: SourceId) -> Result<bool> {
        let row = sqlx::query(
            r"
            UPDATE anime_source
            SET incremental_refresh_enabled = NOT incremental_refresh_enabled
            WHERE id = $1
            RETURNING incremental_refresh_enabled
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("source {id} not found")))?;
        Ok(row.try_get("incremental_refresh_enabled")?)
    }

    /// Move every source of `src_anime_id` onto `dst_anime_id`, then delete
    /// the source work. At most one favorite survives on the target.
    pub async fn reassociate_sources(
        &self,
        src_anime_id: AnimeId,
        dst_anime_id: AnimeId,
    ) -> Result<u64> {
        if src_anime_id == dst_anime_id {
            return Err(Error::InvalidInput(
                "source and target works are the same".to_string(),
            ));
        }
        let mut tx = self.pool.begin().await?;

        let dst_has_favorite: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM anime_source WHERE anime_id = $1 AND is_favorited)",
        )
        .bind(dst_anime_id)
        .fetch_one(&mut *tx)
        .await?;

        // Moving sources must not introduce a second favorite on the target.
        if dst_has_favorite {
            sqlx::query("UPDATE anime_source SET is_favorited = FALSE WHERE anime_id = $1")
                .bind(src_anime_id)
                .execute(&mut *tx)
                .await?;
        }

        let moved = sqlx::query("UPDATE anime_source SET anime_id = $2 WHERE anime_id = $1")
            .bind(src_anime_id)
            .bind(dst_anime_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM anime WHERE id = $1")
            .bind(src_anime_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(src_anime_id, dst_anime_id, moved, "Reassociated sources");
        Ok(moved)
    }
}
