//! Ask command - answer a question about a project

use std::sync::Arc;

use aeonis_core::{Config, Dispatcher, Secrets, SemgrepScanner, ToolContext};
use aeonis_llm::GeminiClient;
use clap::Args;

use super::{build_cache, open_database};

/// Arguments for the ask command
#[derive(Args, Debug)]
pub struct AskArgs {
    /// Project identifier
    pub project: String,

    /// The question to answer
    #[arg(required = true)]
    pub question: String,

    /// Override the maximum number of model calls
    #[arg(long)]
    pub max_turns: Option<usize>,
}

impl AskArgs {
    /// Execute the ask command
    pub async fn execute(&self, verbose: bool, config: &Config) -> anyhow::Result<()> {
        let db = Arc::new(open_database(config).await?);
        let project = db.projects().get(&self.project).await?;

        let secrets = Secrets::load()?;
        let engine = Arc::new(GeminiClient::from_config(&config.llm, &secrets)?);

        let context = Arc::new(ToolContext {
            cache: Arc::new(build_cache(config, db.clone())?),
            traces: db,
            scanner: Arc::new(SemgrepScanner::from_config(&config.scanner)),
        });

        let mut dispatcher = Dispatcher::new(engine, context)
            .with_max_turns(self.max_turns.unwrap_or(config.llm.max_turns));
        if let Some(path) = &config.llm.instructions_file {
            let template = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("Failed to read instructions file {}: {}", path.display(), e)
            })?;
            dispatcher = dispatcher.with_instructions(template);
        }

        tracing::info!(project_id = %project.id, "Answering question");
        let answer = dispatcher.ask(&project.id, &self.question).await?;

        println!("{}", answer.text);

        if verbose {
            eprintln!();
            eprintln!(
                "({} model call(s), {} tool call(s))",
                answer.model_calls, answer.tool_calls
            );
        }

        Ok(())
    }
}
