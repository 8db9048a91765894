//! Git layer for Aeonis
//!
//! Cached per-project working copies, the ephemeral credentials used to
//! clone and fetch them, and the read-only code intelligence queries that
//! run against them.

mod analysis;
mod cache;
mod credential;
mod history;
mod remote;
mod repo;
mod tree;
mod working_copy;

pub use cache::{directory_name, CacheMetadata, CachedProject, DiskEntry, RepoCache, DEFAULT_CAPACITY};
pub use credential::{release, EphemeralCredential};
pub use history::{CommitAuthor, CommitDiff, CommitSummary, DEFAULT_HISTORY_LIMIT};
pub use remote::{GitCli, RemoteSync, RemoteUrl, Transport};
pub use repo::{ActiveRef, GitRepo, CANONICAL_BRANCHES, DEFAULT_REMOTE};
pub use working_copy::WorkingCopy;
