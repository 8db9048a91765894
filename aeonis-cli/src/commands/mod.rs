//! CLI command implementations

pub mod ask;
pub mod cache;
pub mod project;
pub mod spans;

use std::path::PathBuf;
use std::sync::Arc;

use aeonis_core::git::GitCli;
use aeonis_core::{Config, RepoCache};
use aeonis_db::Database;

pub use ask::AskArgs;
pub use cache::CacheArgs;
pub use project::ProjectArgs;
pub use spans::SpansArgs;

/// Database path from configuration, or the default location
pub fn database_path(config: &Config) -> anyhow::Result<PathBuf> {
    match &config.database.path {
        Some(path) => Ok(path.clone()),
        None => Ok(Database::default_path()?),
    }
}

/// Open (and migrate) the configured database
pub async fn open_database(config: &Config) -> anyhow::Result<Database> {
    Ok(Database::new(database_path(config)?).await?)
}

/// Repository cache backed by the database and the git CLI
pub fn build_cache(config: &Config, db: Arc<Database>) -> anyhow::Result<RepoCache> {
    let sync = Arc::new(GitCli::new(config.git.network_timeout));
    Ok(RepoCache::from_config(config, db, sync)?)
}
