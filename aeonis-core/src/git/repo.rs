//! Working copy repository wrapper and checkout operations

use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{BranchType, Commit, ErrorCode, Oid, Repository};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Remote that cached working copies are cloned from
pub const DEFAULT_REMOTE: &str = "origin";

/// Branch names preferred when several branches contain a commit
pub const CANONICAL_BRANCHES: [&str; 2] = ["main", "master"];

/// What HEAD points at: a local branch or a detached commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveRef {
    /// HEAD is attached to `refs/heads/<name>`
    Branch(String),
    /// HEAD points directly at a commit
    Detached(Oid),
}

impl std::fmt::Display for ActiveRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveRef::Branch(name) => write!(f, "{}", name),
            ActiveRef::Detached(oid) => write!(f, "{} (detached)", oid),
        }
    }
}

/// A git working copy providing the operations Aeonis needs
pub struct GitRepo {
    /// The underlying git2 repository
    repo: Repository,
    /// Path to the working copy root
    root: PathBuf,
    /// Remote whose symbolic HEAD designates the default branch
    remote: String,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo")
            .field("root", &self.root)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl GitRepo {
    /// Open the working copy rooted exactly at `path`
    ///
    /// Unlike discovery this never walks up into a parent repository, so a
    /// damaged cache directory is reported instead of silently resolving to
    /// some enclosing checkout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let repo = Repository::open(path).map_err(|e| {
            Error::CorruptCache(format!("{} is not a usable git repository: {}", path.display(), e.message()))
        })?;

        let root = repo
            .workdir()
            .ok_or_else(|| Error::CorruptCache("Bare repositories are not supported".to_string()))?
            .to_path_buf();

        Ok(Self {
            repo,
            root,
            remote: DEFAULT_REMOTE.to_string(),
        })
    }

    /// Use a remote other than `origin` for default-branch resolution
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Get the working copy root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the remote used for default-branch resolution
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Get access to the underlying git2 repository
    pub fn inner(&self) -> &Repository {
        &self.repo
    }

    /// Names of all local branch heads
    pub fn list_branches(&self) -> Result<Vec<String>> {
        let mut branches = Vec::new();

        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name().ok().flatten() {
                branches.push(name.to_string());
            }
        }

        Ok(branches)
    }

    /// Target of the remote's symbolic HEAD, e.g. `main` for `origin/HEAD -> origin/main`
    ///
    /// Returns `None` when the symbolic reference is missing or not symbolic.
    pub fn default_branch(&self) -> Result<Option<String>> {
        let head_ref = format!("refs/remotes/{}/HEAD", self.remote);
        let reference = match self.repo.find_reference(&head_ref) {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("refs/remotes/{}/", self.remote);
        Ok(reference
            .symbolic_target()
            .and_then(|target| target.strip_prefix(&prefix))
            .map(str::to_string))
    }

    /// Currently checked out branch, or the commit when HEAD is detached
    pub fn active_ref(&self) -> Result<ActiveRef> {
        let head = match self.repo.head() {
            Ok(h) => h,
            Err(e) if e.code() == ErrorCode::UnbornBranch => {
                return Err(Error::CorruptCache("Working copy has no commits".to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if head.is_branch() {
            let name = head
                .shorthand()
                .ok_or_else(|| Error::InvalidData("Branch name is not valid UTF-8".to_string()))?;
            Ok(ActiveRef::Branch(name.to_string()))
        } else {
            let oid = head
                .target()
                .ok_or_else(|| Error::InvalidData("HEAD has no target".to_string()))?;
            Ok(ActiveRef::Detached(oid))
        }
    }

    /// Resolve a revision expression (full or short hash, branch) to a commit
    pub fn resolve_commit(&self, rev: &str) -> Result<Commit<'_>> {
        let rev = rev.trim();
        if rev.is_empty() {
            return Err(Error::NotFound("Empty commit reference".to_string()));
        }

        let object = self.repo.revparse_single(rev).map_err(|e| match e.code() {
            ErrorCode::NotFound | ErrorCode::Ambiguous | ErrorCode::InvalidSpec => {
                Error::NotFound(format!("Commit '{}' not found", rev))
            }
            _ => Error::Git(e),
        })?;

        object
            .peel_to_commit()
            .map_err(|_| Error::NotFound(format!("'{}' does not name a commit", rev)))
    }

    /// Resolve a branch name to its tip commit, preferring the remote-tracking branch
    ///
    /// Local heads are only created by checkouts and can lag behind the last
    /// fetch; they are used when the remote has no such branch.
    pub fn branch_tip(&self, branch: &str) -> Result<Commit<'_>> {
        let candidates = [
            format!("refs/remotes/{}/{}", self.remote, branch),
            format!("refs/heads/{}", branch),
        ];

        for name in &candidates {
            if let Ok(reference) = self.repo.find_reference(name) {
                return Ok(reference.peel_to_commit()?);
            }
        }

        Err(Error::NotFound(format!("Branch '{}' not found", branch)))
    }

    /// Check out a local branch at its remote-tracking tip
    ///
    /// The local branch is created or moved to match the remote; a branch
    /// the remote does not have is checked out as is. Local modifications
    /// are discarded.
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        let local_ref = format!("refs/heads/{}", branch);
        let remote_ref = format!("refs/remotes/{}/{}", self.remote, branch);

        let tip = match self.repo.find_reference(&remote_ref) {
            Ok(reference) => {
                let tip = reference.peel_to_commit()?;
                match self.repo.find_reference(&local_ref) {
                    Ok(mut local) => {
                        if local.target() != Some(tip.id()) {
                            debug!(branch = %branch, commit = %tip.id(), "Moving local branch to remote tip");
                            local.set_target(tip.id(), "aeonis: follow remote branch")?;
                        }
                    }
                    Err(_) => {
                        debug!(branch = %branch, commit = %tip.id(), "Creating local branch from remote");
                        self.repo.branch(branch, &tip, false)?;
                    }
                }
                tip
            }
            Err(_) => self
                .repo
                .find_reference(&local_ref)
                .map_err(|_| Error::NotFound(format!("Branch '{}' not found", branch)))?
                .peel_to_commit()?,
        };

        // Tree first so files only tracked by the old HEAD are removed
        self.repo
            .checkout_tree(tip.as_object(), Some(CheckoutBuilder::new().force()))?;
        self.repo.set_head(&local_ref)?;

        Ok(())
    }

    /// Force check out an exact commit with a detached HEAD
    pub fn checkout_commit(&self, oid: Oid) -> Result<()> {
        let commit = self.repo.find_commit(oid).map_err(|e| match e.code() {
            ErrorCode::NotFound => Error::NotFound(format!("Commit '{}' not found", oid)),
            _ => Error::Git(e),
        })?;

        self.repo
            .checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        self.repo.set_head_detached(oid)?;

        Ok(())
    }

    /// Put HEAD and the working tree back to a previously recorded ref
    pub fn restore(&self, active: &ActiveRef) -> Result<()> {
        match active {
            ActiveRef::Branch(name) => self.checkout_branch(name)?,
            ActiveRef::Detached(oid) => self.checkout_commit(*oid)?,
        }

        debug!(active = %active, "Restored working copy");
        Ok(())
    }

    /// Bring the local default branch up to date with its fetched remote branch
    ///
    /// Fast-forwards when possible and otherwise resets to the remote tip.
    /// Returns the default branch, or `None` when the remote HEAD cannot be
    /// resolved, in which case nothing is changed.
    pub fn sync_default_branch(&self) -> Result<Option<String>> {
        let Some(branch) = self.default_branch()? else {
            warn!(root = %self.root.display(), "Remote HEAD is unresolvable, leaving working copy as is");
            return Ok(None);
        };

        let remote_ref = format!("refs/remotes/{}/{}", self.remote, branch);
        let remote_tip = self
            .repo
            .find_reference(&remote_ref)
            .map_err(|e| Error::CorruptCache(format!("Missing {}: {}", remote_ref, e.message())))?
            .peel_to_commit()?;

        match self.repo.find_branch(&branch, BranchType::Local) {
            Ok(mut local) => {
                let local_oid = local
                    .get()
                    .target()
                    .ok_or_else(|| Error::CorruptCache(format!("Branch '{}' has no target", branch)))?;

                if local_oid != remote_tip.id() {
                    if !self.repo.graph_descendant_of(remote_tip.id(), local_oid)? {
                        warn!(branch = %branch, "Local default branch diverged from remote, following remote");
                    }
                    local
                        .get_mut()
                        .set_target(remote_tip.id(), "aeonis: follow remote default branch")?;
                }
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                self.repo.branch(&branch, &remote_tip, false)?;
            }
            Err(e) => return Err(e.into()),
        }

        self.checkout_branch(&branch)?;
        self.sync_other_branches(&branch)?;
        debug!(branch = %branch, commit = %remote_tip.id(), "Default branch synchronized");

        Ok(Some(branch))
    }

    /// Move local branches other than `default_branch` to their remote tips
    ///
    /// Branches whose remote counterpart has been pruned are deleted.
    fn sync_other_branches(&self, default_branch: &str) -> Result<()> {
        let mut pruned = Vec::new();

        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (mut branch, _) = branch?;
            let Some(name) = branch.name().ok().flatten().map(str::to_string) else {
                continue;
            };
            if name == default_branch || branch.is_head() {
                continue;
            }

            let remote_ref = format!("refs/remotes/{}/{}", self.remote, name);
            match self.repo.find_reference(&remote_ref) {
                Ok(reference) => {
                    let tip = reference.peel_to_commit()?.id();
                    if branch.get().target() != Some(tip) {
                        debug!(branch = %name, commit = %tip, "Moving local branch to remote tip");
                        branch
                            .get_mut()
                            .set_target(tip, "aeonis: follow remote branch")?;
                    }
                }
                Err(e) if e.code() == ErrorCode::NotFound => pruned.push((name, branch)),
                Err(e) => return Err(e.into()),
            }
        }

        for (name, mut branch) in pruned {
            debug!(branch = %name, "Deleting local branch pruned from remote");
            branch.delete()?;
        }

        Ok(())
    }
}
