//! Shared handle to a cached working copy
//!
//! Reads run concurrently, each on its own `git2::Repository` opened inside
//! a blocking task. Anything that moves HEAD or rewrites the working tree
//! takes the exclusive side of the same lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Oid;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::history::{CommitAuthor, CommitDiff, CommitSummary};
use super::repo::GitRepo;
use crate::{Error, Result};

/// A directory-backed clone owned by the repository cache
#[derive(Debug)]
pub struct WorkingCopy {
    project_id: String,
    root: PathBuf,
    remote: String,
    lock: Arc<RwLock<()>>,
}

/// Run git2 work on the blocking pool while holding a lock guard
async fn run_blocking<G, T, F>(guard: G, root: PathBuf, remote: String, f: F) -> Result<T>
where
    G: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&GitRepo) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        let repo = GitRepo::open(&root)?.with_remote(remote);
        f(&repo)
    })
    .await
    .map_err(|e| Error::Other(format!("git task failed: {}", e)))?
}

impl WorkingCopy {
    pub(crate) fn new(project_id: impl Into<String>, root: PathBuf, remote: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            root,
            remote: remote.into(),
            lock: Arc::new(RwLock::new(())),
        }
    }

    /// Project this working copy belongs to
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Working copy directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn remote_name(&self) -> &str {
        &self.remote
    }

    pub(crate) async fn shared(&self) -> OwnedRwLockReadGuard<()> {
        self.lock.clone().read_owned().await
    }

    pub(crate) async fn exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        self.lock.clone().write_owned().await
    }

    /// Run a read-only operation against the repository
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&GitRepo) -> Result<T> + Send + 'static,
    {
        let guard = self.shared().await;
        run_blocking(guard, self.root.clone(), self.remote.clone(), f).await
    }

    /// Run an operation that mutates checked-out state, with a guard the caller already holds
    pub(crate) async fn with_guard<T, F>(&self, guard: &Arc<OwnedRwLockWriteGuard<()>>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&GitRepo) -> Result<T> + Send + 'static,
    {
        run_blocking(Arc::clone(guard), self.root.clone(), self.remote.clone(), f).await
    }

    /// Names of all local branch heads
    pub async fn list_branches(&self) -> Result<Vec<String>> {
        self.read(|repo| repo.list_branches()).await
    }

    /// Branch designated by the remote's symbolic HEAD
    pub async fn default_branch(&self) -> Result<Option<String>> {
        self.read(|repo| repo.default_branch()).await
    }

    /// Up to `limit` commits of `branch`, most recent first
    pub async fn commit_history(&self, branch: &str, limit: usize) -> Result<Vec<CommitSummary>> {
        let branch = branch.to_string();
        self.read(move |repo| repo.commit_history(&branch, limit)).await
    }

    /// Diff of a commit against its first parent (or the empty tree)
    pub async fn commit_diff(&self, rev: &str) -> Result<CommitDiff> {
        let rev = rev.to_string();
        self.read(move |repo| repo.commit_diff(&rev)).await
    }

    /// UTF-8 content of a file at a commit
    pub async fn read_file_at_commit(&self, path: &str, rev: &str) -> Result<String> {
        let (path, rev) = (path.to_string(), rev.to_string());
        self.read(move |repo| repo.read_file_at_commit(&path, &rev)).await
    }

    /// All tracked paths at a commit
    pub async fn list_files_at_commit(&self, rev: &str) -> Result<Vec<String>> {
        let rev = rev.to_string();
        self.read(move |repo| repo.list_files_at_commit(&rev)).await
    }

    /// Author of a commit
    pub async fn commit_author(&self, rev: &str) -> Result<CommitAuthor> {
        let rev = rev.to_string();
        self.read(move |repo| repo.commit_author(&rev)).await
    }

    /// Branch containing a commit, preferring `main`/`master`
    pub async fn branch_containing(&self, rev: &str) -> Result<Option<String>> {
        let rev = rev.to_string();
        self.read(move |repo| {
            let oid: Oid = repo.resolve_commit(&rev)?.id();
            repo.branch_containing(oid)
        })
        .await
    }

    /// Hash of the newest commit on `branch`
    pub async fn branch_head(&self, branch: &str) -> Result<String> {
        let branch = branch.to_string();
        self.read(move |repo| Ok(repo.branch_tip(&branch)?.id().to_string()))
            .await
    }

    /// Currently checked-out ref
    pub async fn active_ref(&self) -> Result<super::repo::ActiveRef> {
        self.read(|repo| repo.active_ref()).await
    }
}
