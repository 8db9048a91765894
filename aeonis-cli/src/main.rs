//! Aeonis CLI - Command line interface for Aeonis
//!
//! Ask questions about a project's code and traces, manage projects,
//! import spans and maintain the repository cache.

mod commands;

use std::path::PathBuf;

use aeonis_core::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{AskArgs, CacheArgs, ProjectArgs, SpansArgs};

/// Aeonis: trace-aware code assistant
#[derive(Parser, Debug)]
#[command(name = "aeonis")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ~/.config/aeonis/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model to use (overrides config and env)
    #[arg(long, global = true, env = "AEONIS_MODEL")]
    model: Option<String>,

    /// SQLite database path (overrides config and env)
    #[arg(long, global = true, env = "AEONIS_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Ask a question about a project
    #[command(visible_alias = "a")]
    Ask(AskArgs),

    /// Manage projects and their repository links
    #[command(visible_alias = "p")]
    Project(ProjectArgs),

    /// Import recorded spans
    Spans(SpansArgs),

    /// Inspect and maintain the repository cache
    Cache(CacheArgs),

    /// Show current configuration
    Config,

    /// Create a secrets file template for the completion API key
    InitSecrets,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so answers on stdout stay clean
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = Config::load_with_overrides(cli.config.as_deref(), cli.model.clone(), cli.database.clone())?;

    if cli.verbose {
        tracing::info!(
            model = %config.llm.model,
            max_turns = config.llm.max_turns,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("aeonis {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Ask(args)) => {
            args.execute(cli.verbose, &config).await?;
        }
        Some(Commands::Project(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Spans(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Cache(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Config) => show_config(&config, cli.config.as_deref())?,
        Some(Commands::InitSecrets) => {
            let path = aeonis_core::Secrets::create_template()?;
            println!("Created {}", path.display());
            println!("Add your API key under [llm] api_key");
        }
        None => {
            println!("Aeonis - trace-aware code assistant");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

fn show_config(config: &Config, explicit: Option<&std::path::Path>) -> anyhow::Result<()> {
    println!("Aeonis Configuration");
    println!("====================");
    println!();
    println!("Cache:");
    println!("  root: {}", config.cache.root_dir()?.display());
    println!("  capacity: {}", config.cache.capacity);
    println!("  max_age: {}", humanize(config.cache.max_age));
    println!();
    println!("Git:");
    println!("  network_timeout: {}", humanize(config.git.network_timeout));
    println!("  remote: {}", config.git.remote);
    println!();
    println!("Scanner:");
    println!("  path: {}", config.scanner.path);
    println!("  ruleset: {}", config.scanner.ruleset);
    println!("  timeout: {}", humanize(config.scanner.timeout));
    println!();
    println!("Completion:");
    println!("  model: {}", config.llm.model);
    println!("  base_url: {}", config.llm.base_url);
    println!("  max_turns: {}", config.llm.max_turns);
    if let Some(path) = &config.llm.instructions_file {
        println!("  instructions_file: {}", path.display());
    }
    let key_state = match aeonis_core::Secrets::load() {
        Ok(secrets) if secrets.llm_api_key().is_some() => "configured",
        Ok(_) => "missing",
        Err(_) => "unreadable secrets file",
    };
    println!("  api_key: {}", key_state);
    println!();
    println!("Database:");
    println!("  path: {}", commands::database_path(config)?.display());
    println!();

    let path = explicit
        .map(|p| p.to_path_buf())
        .or_else(Config::default_config_path);
    if let Some(path) = path {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }

    Ok(())
}

fn humanize(duration: std::time::Duration) -> String {
    humantime::format_duration(duration).to_string()
}
