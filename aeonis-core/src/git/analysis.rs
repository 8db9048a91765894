//! Static analysis of a historical commit
//!
//! The scanner needs real files on disk, so the working copy is moved to the
//! requested commit for the duration of the scan and then put back on the
//! ref it was on before. This is the only path that mutates checked-out
//! state outside a refresh, and it runs under the working copy's exclusive lock.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::repo::{ActiveRef, GitRepo};
use super::working_copy::WorkingCopy;
use crate::scanner::{ScanReport, StaticScanner};
use crate::{Error, Result};

/// Restores the recorded ref if the scan future is dropped or unwinds
struct RestoreOnDrop {
    root: PathBuf,
    remote: String,
    previous: Option<ActiveRef>,
}

impl RestoreOnDrop {
    fn disarm(&mut self) {
        self.previous = None;
    }
}

impl Drop for RestoreOnDrop {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };

        warn!(root = %self.root.display(), "Scan interrupted, restoring {}", previous);
        let restored = GitRepo::open(&self.root)
            .map(|repo| repo.with_remote(self.remote.clone()))
            .and_then(|repo| repo.restore(&previous));
        if let Err(e) = restored {
            error!(root = %self.root.display(), "Failed to restore working copy: {}", e);
        }
    }
}

impl WorkingCopy {
    /// Run `scanner` against the tree of `rev`, restoring the active ref afterwards
    ///
    /// The commit is reached by checking out a branch that contains it and
    /// then the commit itself; local modifications are discarded.
    pub async fn analyze_with_static_scanner(
        &self,
        scanner: &dyn StaticScanner,
        rev: &str,
    ) -> Result<ScanReport> {
        let guard = Arc::new(self.exclusive().await);

        let rev = rev.to_string();
        let (commit, branch, previous) = self
            .with_guard(&guard, move |repo| {
                let oid = repo.resolve_commit(&rev)?.id();
                let branch = repo
                    .branch_containing(oid)?
                    .ok_or_else(|| Error::NotFound(format!("No branch contains commit {}", oid)))?;
                Ok((oid, branch, repo.active_ref()?))
            })
            .await?;

        let mut restore = RestoreOnDrop {
            root: self.root().to_path_buf(),
            remote: self.remote_name().to_string(),
            previous: Some(previous.clone()),
        };

        debug!(
            project_id = %self.project_id(),
            branch = %branch,
            commit = %commit,
            previous = %previous,
            "Checking out commit for analysis"
        );

        let checkout_branch = branch.clone();
        let scanned = match self
            .with_guard(&guard, move |repo| {
                repo.checkout_branch(&checkout_branch)?;
                repo.checkout_commit(commit)
            })
            .await
        {
            Ok(()) => scanner.scan(self.root()).await,
            Err(e) => Err(e),
        };

        let restored = self
            .with_guard(&guard, {
                let previous = previous.clone();
                move |repo| repo.restore(&previous)
            })
            .await;

        match &restored {
            Ok(()) => restore.disarm(),
            Err(e) => error!(project_id = %self.project_id(), "Failed to restore {}: {}", previous, e),
        }
        drop(restore);

        let output = scanned?;
        restored?;

        info!(
            project_id = %self.project_id(),
            scanner = scanner.name(),
            commit = %commit,
            findings = output.findings.len(),
            "Static analysis complete"
        );

        Ok(ScanReport {
            commit: commit.to_string(),
            branch,
            findings: output.findings,
            errors: output.errors,
        })
    }
}
