//! Project management commands

use std::path::PathBuf;
use std::sync::Arc;

use aeonis_core::git::RemoteUrl;
use aeonis_core::Config;
use aeonis_db::{NewProject, Project};
use clap::{Args, Subcommand};

use super::{build_cache, open_database};

/// Project management commands
#[derive(Args, Debug)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub command: ProjectCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Create a project
    Add {
        /// Project name
        name: String,

        /// Repository clone URL
        #[arg(short, long)]
        remote: Option<String>,
    },

    /// Show project details
    Show {
        /// Project identifier
        project: String,
    },

    /// List projects
    List,

    /// Link a repository to a project (omit the URL to unlink)
    Link {
        /// Project identifier
        project: String,

        /// Repository clone URL
        remote: Option<String>,

        /// The repository requires a credential
        #[arg(long)]
        private: bool,

        /// File holding the SSH private key or HTTPS token
        #[arg(long, requires = "private")]
        credential_file: Option<PathBuf>,
    },

    /// Delete a project, its spans and its cached working copy
    Delete {
        /// Project identifier
        project: String,
    },
}

impl ProjectArgs {
    /// Execute the project command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        match &self.command {
            ProjectCommand::Add { name, remote } => add_project(config, name, remote.as_deref()).await,
            ProjectCommand::Show { project } => show_project(config, project).await,
            ProjectCommand::List => list_projects(config).await,
            ProjectCommand::Link {
                project,
                remote,
                private,
                credential_file,
            } => {
                link_project(
                    config,
                    project,
                    remote.as_deref(),
                    *private,
                    credential_file.as_deref(),
                )
                .await
            }
            ProjectCommand::Delete { project } => delete_project(config, project).await,
        }
    }
}

/// Parse a clone URL, returning its redacted form for display
fn check_remote(remote: &str) -> anyhow::Result<String> {
    Ok(RemoteUrl::parse(remote)?.redacted())
}

fn print_project(project: &Project) {
    println!("{}", project.name);
    println!("  id: {}", project.id);
    match &project.remote_url {
        Some(url) => {
            let display = RemoteUrl::parse(url)
                .map(|r| r.redacted())
                .unwrap_or_else(|_| "(invalid URL)".to_string());
            println!("  repository: {}", display);
            println!("  private: {}", project.is_private);
            if project.is_private {
                let state = if project.credential.is_some() { "stored" } else { "missing" };
                println!("  credential: {}", state);
            }
        }
        None => println!("  repository: (none)"),
    }
    println!("  created: {}", project.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

async fn add_project(config: &Config, name: &str, remote: Option<&str>) -> anyhow::Result<()> {
    if let Some(remote) = remote {
        check_remote(remote)?;
    }

    let db = open_database(config).await?;
    let mut new_project = NewProject::new(name);
    new_project.remote_url = remote.map(str::to_string);
    let project = db.projects().create(new_project).await?;

    println!("Created project:");
    print_project(&project);
    println!("  api_key: {}", project.api_key);
    println!();
    println!("Keep the API key; tracer SDKs use it to submit spans.");

    Ok(())
}

async fn show_project(config: &Config, id: &str) -> anyhow::Result<()> {
    let db = open_database(config).await?;
    let project = db.projects().get(id).await?;

    print_project(&project);
    println!("  api_key: {}", project.api_key);

    let traces = db.spans().recent_traces(&project.id, 5).await?;
    if !traces.is_empty() {
        println!("  recent traces:");
        for trace in traces {
            println!(
                "    {}  {} ({} spans{})",
                trace.trace_id,
                trace.root_span.as_deref().unwrap_or("(no root span)"),
                trace.span_count,
                if trace.has_error { ", error" } else { "" }
            );
        }
    }

    Ok(())
}

async fn list_projects(config: &Config) -> anyhow::Result<()> {
    let db = open_database(config).await?;
    let projects = db.projects().list().await?;

    if projects.is_empty() {
        println!("No projects found");
        return Ok(());
    }

    println!("{:<38} {:<24} REPOSITORY", "ID", "NAME");
    for project in projects {
        let repo = match &project.remote_url {
            Some(url) => RemoteUrl::parse(url)
                .map(|r| r.redacted())
                .unwrap_or_else(|_| "(invalid URL)".to_string()),
            None => "-".to_string(),
        };
        println!("{:<38} {:<24} {}", project.id, project.name, repo);
    }

    Ok(())
}

async fn link_project(
    config: &Config,
    id: &str,
    remote: Option<&str>,
    private: bool,
    credential_file: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let display = remote.map(check_remote).transpose()?;

    let credential = match credential_file {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("Failed to read credential file {}: {}", path.display(), e)
            })?;
            if contents.trim().is_empty() {
                anyhow::bail!("Credential file {} is empty", path.display());
            }
            Some(contents)
        }
        None => None,
    };

    if private && credential.is_none() {
        anyhow::bail!("A private repository needs --credential-file");
    }

    let db = Arc::new(open_database(config).await?);
    db.projects()
        .link_repository(id, remote.map(str::to_string), private, credential)
        .await?;

    // The cached copy may belong to the previous remote
    let cache = build_cache(config, db.clone())?;
    cache.invalidate(id).await?;

    match display {
        Some(url) => println!("Linked {} to {}", id, url),
        None => println!("Unlinked repository from {}", id),
    }

    Ok(())
}

async fn delete_project(config: &Config, id: &str) -> anyhow::Result<()> {
    let db = Arc::new(open_database(config).await?);

    let cache = build_cache(config, db.clone())?;
    cache.invalidate(id).await?;

    if db.projects().delete(id).await? {
        println!("Deleted project {}", id);
    } else {
        anyhow::bail!("Project {} not found", id);
    }

    Ok(())
}
