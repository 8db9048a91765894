//! Repository cache commands

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use aeonis_core::Config;
use clap::{Args, Subcommand};

use super::{build_cache, open_database};

/// Repository cache commands
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// List cached working copies
    List,

    /// Delete working copies unused for longer than the configured max age
    Prune {
        /// Override the max age in days
        #[arg(long)]
        older_than: Option<u64>,
    },

    /// Delete a project's cached working copy
    Invalidate {
        /// Project identifier
        project: String,
    },
}

impl CacheArgs {
    /// Execute the cache command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let db = Arc::new(open_database(config).await?);
        let cache = build_cache(config, db)?;

        match &self.command {
            CacheCommand::List => {
                let entries = cache.disk_entries()?;
                if entries.is_empty() {
                    println!("No cached working copies in {}", cache.root().display());
                    return Ok(());
                }

                println!("Cache root: {}", cache.root().display());
                println!();
                for entry in entries {
                    let project = entry
                        .metadata
                        .as_ref()
                        .map(|m| m.project_id.as_str())
                        .unwrap_or("(unknown project)");
                    println!("{}", project);
                    println!("  path: {}", entry.path.display());
                    if let Some(metadata) = &entry.metadata {
                        println!("  remote: {}", metadata.remote);
                    }
                    if let Some(age) = entry.last_used().and_then(|t| SystemTime::now().duration_since(t).ok()) {
                        println!("  last used: {} ago", format_age(age));
                    }
                }
            }
            CacheCommand::Prune { older_than } => {
                let max_age = older_than
                    .map(|days| Duration::from_secs(days * 86_400))
                    .unwrap_or(config.cache.max_age);

                let removed = cache.prune(max_age)?;
                if removed.is_empty() {
                    println!("Nothing to prune");
                } else {
                    for path in &removed {
                        println!("Removed {}", path.display());
                    }
                    println!("Pruned {} working copies", removed.len());
                }
            }
            CacheCommand::Invalidate { project } => {
                if cache.invalidate(project).await? {
                    println!("Invalidated cached working copy for {}", project);
                } else {
                    println!("No cached working copy for {}", project);
                }
            }
        }

        Ok(())
    }
}

/// Age rounded down to whole seconds, e.g. `3days 10s`
fn format_age(age: Duration) -> String {
    humantime::format_duration(Duration::from_secs(age.as_secs())).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Duration::from_millis(5_400)), "5s");
        assert_eq!(format_age(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_age(Duration::from_secs(7_200)), "2h");
        assert_eq!(format_age(Duration::from_secs(3 * 86_400 + 10)), "3days 10s");
    }
}
