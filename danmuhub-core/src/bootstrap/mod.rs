//! Startup helpers shared by the binary crate

mod database;

pub use database::init_database;

use anyhow::Result;

use crate::Config;

/// Load configuration from the default locations and validate it.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    let config = Config::load(path)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.database.url.is_empty() {
        anyhow::bail!("database.url must be set");
    }
    if config.database.max_connections == 0 {
        anyhow::bail!("database.max_connections must be at least 1");
    }
    Ok(())
}
