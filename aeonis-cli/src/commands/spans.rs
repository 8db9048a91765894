//! Span import command

use std::path::{Path, PathBuf};

use aeonis_core::Config;
use aeonis_db::NewSpan;
use clap::{Args, Subcommand};
use serde::Deserialize;

use super::open_database;

/// Span commands
#[derive(Args, Debug)]
pub struct SpansArgs {
    #[command(subcommand)]
    pub command: SpansCommand,
}

#[derive(Subcommand, Debug)]
pub enum SpansCommand {
    /// Import spans from a JSON file
    Import {
        /// Project identifier
        project: String,

        /// JSON file with an array of spans or `{"spans": [...]}`
        file: PathBuf,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SpanFile {
    List(Vec<NewSpan>),
    Batch { spans: Vec<NewSpan> },
}

impl SpanFile {
    fn into_spans(self) -> Vec<NewSpan> {
        match self {
            SpanFile::List(spans) | SpanFile::Batch { spans } => spans,
        }
    }
}

fn read_spans(path: &Path) -> anyhow::Result<Vec<NewSpan>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let file: SpanFile = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse spans in {}: {}", path.display(), e))?;
    Ok(file.into_spans())
}

impl SpansArgs {
    /// Execute the spans command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        match &self.command {
            SpansCommand::Import { project, file } => {
                let spans = read_spans(file)?;
                let total = spans.len();

                let db = open_database(config).await?;
                let project = db.projects().get(project).await?;
                let inserted = db.spans().insert_batch(&project.id, spans).await?;

                println!(
                    "Imported {} span(s) into {} ({} already present)",
                    inserted,
                    project.name,
                    total as u64 - inserted
                );
                Ok(())
            }
        }
    }
}
