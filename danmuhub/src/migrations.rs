use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, info};

/// Run database migrations embedded from the workspace `migrations/`
/// directory. Single-node deployment: no distributed lock needed.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            anyhow::anyhow!("Migration failed: {e}")
        })?;

    info!("Migrations completed");
    Ok(())
}
