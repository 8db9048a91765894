//! Ephemeral credentials for a single clone or fetch
//!
//! Credential material is written into a fresh private temporary directory
//! (never inside a working copy) and removed when the credential is dropped
//! or explicitly destroyed, whichever comes first. The contents are never
//! logged.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use super::remote::{RemoteUrl, Transport};
use crate::secrets::Secret;
use crate::{Error, Result};

/// Username used when a token is presented over HTTPS
const TOKEN_USERNAME: &str = "x-access-token";

/// How the credential is handed to git
#[derive(Debug, Clone, PartialEq, Eq)]
enum CredentialKind {
    /// Private key passed through `GIT_SSH_COMMAND`
    SshKey,
    /// Token stored for `git credential-store`
    HttpsToken,
}

/// Secret material materialized for exactly one network operation
pub struct EphemeralCredential {
    /// Single-use directory owning the secret file
    dir: TempDir,
    /// Path of the secret file inside `dir`
    path: PathBuf,
    kind: CredentialKind,
}

impl std::fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Write `contents` to a new file readable only by the current user
fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

/// Quote a path for inclusion in a command string that git hands to `sh`
fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

impl EphemeralCredential {
    /// Materialize `secret` for use against `remote`
    ///
    /// SSH remotes get a private key file; HTTPS remotes get a
    /// credential-store file holding the secret as a token.
    pub fn provision(remote: &RemoteUrl, secret: &Secret) -> Result<Self> {
        Self::provision_in(&std::env::temp_dir(), remote, secret)
    }

    /// Like [`EphemeralCredential::provision`] with an explicit parent directory
    pub fn provision_in(parent: &Path, remote: &RemoteUrl, secret: &Secret) -> Result<Self> {
        if secret.is_blank() {
            return Err(Error::AuthFailure(
                "Repository is private but no credential is configured".to_string(),
            ));
        }

        let dir = tempfile::Builder::new()
            .prefix("aeonis-cred-")
            .tempdir_in(parent)?;

        let credential = match remote.transport() {
            Transport::Ssh => {
                let path = dir.path().join("id_key");
                let mut key = secret.expose().trim().to_string();
                key.push('\n');
                write_private_file(&path, key.as_bytes())?;
                Self {
                    dir,
                    path,
                    kind: CredentialKind::SshKey,
                }
            }
            Transport::Https => {
                let path = dir.path().join("git-credentials");
                let entry = remote.with_userinfo(TOKEN_USERNAME, secret.expose().trim())?;
                write_private_file(&path, format!("{}\n", entry).as_bytes())?;
                Self {
                    dir,
                    path,
                    kind: CredentialKind::HttpsToken,
                }
            }
            Transport::Local => {
                return Err(Error::Config(
                    "Credentials are not supported for local repositories".to_string(),
                ))
            }
        };

        debug!(kind = ?credential.kind, "Provisioned ephemeral credential");
        Ok(credential)
    }

    /// Path of the materialized secret file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Environment variables for the git process
    ///
    /// For SSH this is a restricted `GIT_SSH_COMMAND` that only offers the
    /// provisioned key and skips host-key verification.
    pub fn git_env(&self) -> Vec<(String, String)> {
        match self.kind {
            CredentialKind::SshKey => vec![(
                "GIT_SSH_COMMAND".to_string(),
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no \
                     -o UserKnownHostsFile=/dev/null -o BatchMode=yes",
                    shell_quote(&self.path)
                ),
            )],
            CredentialKind::HttpsToken => Vec::new(),
        }
    }

    /// `-c` options placed before the git subcommand
    pub fn git_config_args(&self) -> Vec<String> {
        match self.kind {
            CredentialKind::SshKey => Vec::new(),
            CredentialKind::HttpsToken => vec![
                "-c".to_string(),
                "credential.helper=".to_string(),
                "-c".to_string(),
                format!("credential.helper=store --file={}", shell_quote(&self.path)),
            ],
        }
    }

    /// Delete the credential now, reporting removal failures
    pub fn destroy(self) -> Result<()> {
        self.dir.close()?;
        debug!("Destroyed ephemeral credential");
        Ok(())
    }
}

/// Destroy an optional credential, logging instead of failing
///
/// The `TempDir` drop would remove it anyway; this keeps removal errors visible.
pub fn release(credential: Option<EphemeralCredential>) {
    if let Some(credential) = credential {
        if let Err(e) = credential.destroy() {
            warn!("Failed to remove ephemeral credential: {}", e);
        }
    }
}
