//! Remote URL parsing and git network operations (clone/fetch)

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::credential::EphemeralCredential;
use crate::{Error, Result};

/// Transport used to reach a remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `git@host:owner/repo.git` or `ssh://...`
    Ssh,
    /// `https://...` (or plain `http://`)
    Https,
    /// `file://...` or a filesystem path
    Local,
}

/// A parsed remote repository URL
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    /// URL exactly as configured
    raw: String,
    transport: Transport,
}

impl std::fmt::Debug for RemoteUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteUrl")
            .field("url", &self.redacted())
            .field("transport", &self.transport)
            .finish()
    }
}

impl std::fmt::Display for RemoteUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl RemoteUrl {
    /// Parse a remote URL
    ///
    /// Supports:
    /// - `https://github.com/owner/repo(.git)`
    /// - `ssh://git@github.com/owner/repo.git`
    /// - `git@github.com:owner/repo.git`
    /// - `file:///path/to/repo` or an absolute path
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if input.is_empty() {
            return Err(Error::Config("Remote URL is empty".to_string()));
        }

        // scp-like syntax (e.g., git@github.com:owner/repo.git)
        if !input.contains("://") {
            if let Some((userhost, path)) = input.split_once(':') {
                if !path.is_empty() && !userhost.contains('/') {
                    return Ok(Self {
                        raw: input.to_string(),
                        transport: Transport::Ssh,
                    });
                }
            }

            if Path::new(input).is_absolute() {
                return Ok(Self {
                    raw: input.to_string(),
                    transport: Transport::Local,
                });
            }
        }

        let url = url::Url::parse(input)
            .map_err(|e| Error::Config(format!("Invalid remote URL: {}", e)))?;

        let transport = match url.scheme() {
            "https" | "http" => Transport::Https,
            "ssh" | "git+ssh" => Transport::Ssh,
            "file" => Transport::Local,
            other => {
                return Err(Error::Config(format!(
                    "Unsupported remote URL scheme '{}'. Expected https, ssh or file",
                    other
                )))
            }
        };

        Ok(Self {
            raw: input.to_string(),
            transport,
        })
    }

    /// URL as configured, suitable for passing to git
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Transport used by this remote
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// URL with any embedded password or token removed, for logs and errors
    pub fn redacted(&self) -> String {
        match url::Url::parse(&self.raw) {
            Ok(mut url) if url.password().is_some() || !url.username().is_empty() => {
                let _ = url.set_password(None);
                let _ = url.set_username("");
                url.to_string()
            }
            _ => self.raw.clone(),
        }
    }

    /// HTTPS URL carrying `username:password`, for a credential-store entry
    pub fn with_userinfo(&self, username: &str, password: &str) -> Result<String> {
        let mut url = url::Url::parse(&self.raw)
            .map_err(|e| Error::Config(format!("Invalid remote URL: {}", e)))?;

        url.set_username(username)
            .and_then(|_| url.set_password(Some(password)))
            .map_err(|_| Error::Config(format!("Cannot attach credentials to {}", self.redacted())))?;

        Ok(url.to_string())
    }
}

/// Network side of git: the only operations that talk to a remote
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Clone `remote` into `dest`, which must not exist yet
    async fn clone_repo(
        &self,
        remote: &RemoteUrl,
        dest: &Path,
        credential: Option<&EphemeralCredential>,
    ) -> Result<()>;

    /// Fetch all updates for `remote_name` into the working copy at `workdir`
    async fn fetch(
        &self,
        workdir: &Path,
        remote_name: &str,
        credential: Option<&EphemeralCredential>,
    ) -> Result<()>;
}

/// [`RemoteSync`] that shells out to the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    git_path: String,
    timeout: Duration,
}

impl GitCli {
    /// Create a git runner with the given per-command deadline
    pub fn new(timeout: Duration) -> Self {
        Self {
            git_path: "git".to_string(),
            timeout,
        }
    }

    /// Use a custom path to the git executable
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.git_path = path.into();
        self
    }

    /// Build a git command with credentials applied and prompts disabled
    fn build_command(&self, credential: Option<&EphemeralCredential>) -> Command {
        let mut cmd = Command::new(&self.git_path);

        if let Some(credential) = credential {
            cmd.args(credential.git_config_args());
            cmd.envs(credential.git_env());
        }

        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }

    async fn run(&self, operation: &str, mut cmd: Command) -> Result<()> {
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| Error::Timeout(format!("git {} exceeded {:?}", operation, self.timeout)))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::Config(format!("git executable not found at '{}'", self.git_path))
                } else {
                    Error::Io(e)
                }
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = redact_credentials(&String::from_utf8_lossy(&output.stderr));
        Err(classify_failure(operation, &stderr))
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

/// Remove userinfo from every URL embedded in `text`
///
/// git echoes the remote URL in many of its messages, and an HTTPS token
/// may be part of it.
pub(crate) fn redact_credentials(text: &str) -> String {
    text.split_inclusive(char::is_whitespace)
        .map(redact_word)
        .collect()
}

fn redact_word(chunk: &str) -> String {
    let Some(sep) = chunk.find("://") else {
        return chunk.to_string();
    };

    let start = chunk[..sep]
        .char_indices()
        .rev()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let end = chunk[start..]
        .find(|c: char| c.is_whitespace() || matches!(c, '\'' | '"' | '`' | '>' | ')'))
        .map(|i| start + i)
        .unwrap_or(chunk.len());

    match url::Url::parse(&chunk[start..end]) {
        Ok(mut url) if url.password().is_some() || !url.username().is_empty() => {
            let _ = url.set_password(None);
            let _ = url.set_username("");
            format!("{}{}{}", &chunk[..start], url, &chunk[end..])
        }
        _ => chunk.to_string(),
    }
}

/// Map git's stderr to an error kind
pub(crate) fn classify_failure(operation: &str, stderr: &str) -> Error {
    let lower = stderr.to_lowercase();

    // "Could not read from remote repository" alone is a connection failure
    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("could not read username")
        || lower.contains("invalid username or password")
    {
        return Error::AuthFailure(format!("git {} was rejected by the remote", operation));
    }

    if lower.contains("repository not found") || lower.contains("does not exist") {
        return Error::NotFound(format!("git {}: remote repository not found", operation));
    }

    if lower.contains("not a git repository") {
        return Error::CorruptCache(format!("git {}: {}", operation, stderr.trim()));
    }

    Error::Other(format!("git {} failed: {}", operation, stderr.trim()))
}

#[async_trait]
impl RemoteSync for GitCli {
    async fn clone_repo(
        &self,
        remote: &RemoteUrl,
        dest: &Path,
        credential: Option<&EphemeralCredential>,
    ) -> Result<()> {
        debug!(remote = %remote, dest = %dest.display(), "Cloning repository");

        let mut cmd = self.build_command(credential);
        cmd.arg("clone")
            .arg("--no-recurse-submodules")
            .arg("--")
            .arg(remote.as_str())
            .arg(dest);

        self.run("clone", cmd).await
    }

    async fn fetch(
        &self,
        workdir: &Path,
        remote_name: &str,
        credential: Option<&EphemeralCredential>,
    ) -> Result<()> {
        debug!(workdir = %workdir.display(), remote = %remote_name, "Fetching updates");

        let mut cmd = self.build_command(credential);
        cmd.arg("fetch")
            .arg("--prune")
            .arg("--tags")
            .arg(remote_name)
            .current_dir(workdir);

        let result = self.run("fetch", cmd).await;
        if let Err(ref e) = result {
            warn!(workdir = %workdir.display(), "git fetch failed: {}", e);
        }
        result
    }
}
