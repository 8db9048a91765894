//! Commit history, diffs and authorship queries

use chrono::{DateTime, FixedOffset, TimeZone};
use git2::{BranchType, DiffFormat, Oid, Sort};
use serde::Serialize;

use super::repo::{GitRepo, CANONICAL_BRANCHES};
use crate::{Error, Result};

/// Default number of commits returned by [`GitRepo::commit_history`]
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// One entry of a branch history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub hash: String,
    pub author_name: String,
    pub committed_at: DateTime<FixedOffset>,
    /// Commit message with surrounding whitespace trimmed
    pub message: String,
}

/// Author information for a single commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
    pub committed_at: DateTime<FixedOffset>,
}

/// Patch text of a commit against its first parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitDiff {
    pub hash: String,
    /// First parent, or `None` for a root commit diffed against the empty tree
    pub parent: Option<String>,
    pub diff: String,
}

fn commit_time(time: git2::Time) -> Result<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60)
        .ok_or_else(|| Error::InvalidData(format!("Invalid timezone offset {}", time.offset_minutes())))?;

    offset
        .timestamp_opt(time.seconds(), 0)
        .single()
        .ok_or_else(|| Error::InvalidData(format!("Invalid commit timestamp {}", time.seconds())))
}

impl GitRepo {
    /// Up to `limit` commits reachable from `branch`, most recent first
    pub fn commit_history(&self, branch: &str, limit: usize) -> Result<Vec<CommitSummary>> {
        let tip = self.branch_tip(branch)?;

        let mut walk = self.inner().revwalk()?;
        walk.set_sorting(Sort::TIME)?;
        walk.push(tip.id())?;

        let mut commits = Vec::with_capacity(limit.min(64));
        for oid in walk.take(limit) {
            let commit = self.inner().find_commit(oid?)?;
            commits.push(CommitSummary {
                hash: commit.id().to_string(),
                author_name: commit.author().name().unwrap_or_default().to_string(),
                committed_at: commit_time(commit.time())?,
                message: String::from_utf8_lossy(commit.message_bytes()).trim().to_string(),
            });
        }

        Ok(commits)
    }

    /// Diff of a commit against its first parent, or the empty tree for a root commit
    pub fn commit_diff(&self, rev: &str) -> Result<CommitDiff> {
        let commit = self.resolve_commit(rev)?;
        let tree = commit.tree()?;

        let parent = if commit.parent_count() > 0 {
            Some(commit.parent(0)?)
        } else {
            None
        };
        let parent_tree = match parent {
            Some(ref p) => Some(p.tree()?),
            None => None,
        };

        let diff = self
            .inner()
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

        let mut text = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            match line.origin() {
                '+' | '-' | ' ' => text.push(line.origin()),
                _ => {}
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;

        Ok(CommitDiff {
            hash: commit.id().to_string(),
            parent: parent.map(|p| p.id().to_string()),
            diff: text,
        })
    }

    /// Author name, email and commit time
    pub fn commit_author(&self, rev: &str) -> Result<CommitAuthor> {
        let commit = self.resolve_commit(rev)?;
        let author = commit.author();

        Ok(CommitAuthor {
            name: author.name().unwrap_or_default().to_string(),
            email: author.email().unwrap_or_default().to_string(),
            committed_at: commit_time(commit.time())?,
        })
    }

    /// A branch whose history contains `commit`
    ///
    /// Local heads are considered first, then remote-tracking branches
    /// (reported by their short name). `main` and `master` win ties;
    /// otherwise the first branch found is returned.
    pub fn branch_containing(&self, commit: Oid) -> Result<Option<String>> {
        let mut containing: Vec<String> = Vec::new();
        let remote_prefix = format!("{}/", self.remote());

        for kind in [BranchType::Local, BranchType::Remote] {
            for branch in self.inner().branches(Some(kind))? {
                let (branch, _) = branch?;
                let Some(name) = branch.name().ok().flatten() else {
                    continue;
                };

                let short = match kind {
                    BranchType::Local => name.to_string(),
                    BranchType::Remote => match name.strip_prefix(&remote_prefix) {
                        Some("HEAD") | None => continue,
                        Some(short) => short.to_string(),
                    },
                };
                if containing.contains(&short) {
                    continue;
                }

                let Some(tip) = branch.get().target() else {
                    continue;
                };
                if tip == commit || self.inner().graph_descendant_of(tip, commit)? {
                    containing.push(short);
                }
            }
        }

        let preferred = CANONICAL_BRANCHES
            .iter()
            .find(|canonical| containing.iter().any(|b| b == *canonical))
            .map(|b| b.to_string());

        Ok(preferred.or_else(|| containing.into_iter().next()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_history, RepoFixture};
    use tempfile::TempDir;

    #[test]
    fn test_history_is_limited_and_newest_first() {
        let temp = TempDir::new().unwrap();
        let fixture = RepoFixture::init(temp.path());
        for i in 0..8 {
            fixture.commit("main", "log.txt", &format!("{}\n", i), &format!("commit {}", i), 1_700_000_000 + i * 60);
        }

        let repo = GitRepo::open(temp.path()).unwrap();
        let history = repo.commit_history("main", 5).unwrap();

        assert_eq!(history.len(), 5);
        assert_eq!(history[0].message, "commit 7");
        for pair in history.windows(2) {
            assert!(pair[0].committed_at > pair[1].committed_at);
        }
    }

    #[test]
    fn test_history_trims_message_and_reports_author() {
        let temp = TempDir::new().unwrap();
        let sample = sample_history(temp.path());

        let repo = GitRepo::open(temp.path()).unwrap();
        let history = repo.commit_history("main", DEFAULT_HISTORY_LIMIT).unwrap();

        assert_eq!(history.len(), 3);
        assert_eq!(history[0].hash, sample.main_tip.to_string());
        assert_eq!(history[0].message, "fix payment total");
        assert_eq!(history[0].author_name, "Ada Lovelace");
        assert_eq!(history[2].hash, sample.root_commit.to_string());
    }

    #[test]
    fn test_history_of_remote_only_branch() {
        let temp = TempDir::new().unwrap();
        let sample = sample_history(temp.path());
        RepoFixture::open(temp.path()).delete_local_branch("feature-x");

        let repo = GitRepo::open(temp.path()).unwrap();
        let history = repo.commit_history("feature-x", 1).unwrap();
        assert_eq!(history[0].hash, sample.feature_commit.to_string());
    }

    #[test]
    fn test_history_missing_branch() {
        let temp = TempDir::new().unwrap();
        sample_history(temp.path());

        let repo = GitRepo::open(temp.path()).unwrap();
        let result = repo.commit_history("does-not-exist", 10);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_diff_against_first_parent() {
        let temp = TempDir::new().unwrap();
        let sample = sample_history(temp.path());

        let repo = GitRepo::open(temp.path()).unwrap();
        let diff = repo.commit_diff(&sample.main_tip.to_string()).unwrap();

        assert!(diff.parent.is_some());
        assert!(diff.diff.contains("-    return 1"));
        assert!(diff.diff.contains("+    return 2"));
    }

    #[test]
    fn test_diff_of_root_commit_uses_empty_tree() {
        let temp = TempDir::new().unwrap();
        let sample = sample_history(temp.path());

        let repo = GitRepo::open(temp.path()).unwrap();
        let diff = repo.commit_diff(&sample.root_commit.to_string()).unwrap();

        assert_eq!(diff.parent, None);
        assert!(diff.diff.contains("+# shop"));
    }

    #[test]
    fn test_commit_author() {
        let temp = TempDir::new().unwrap();
        let sample = sample_history(temp.path());

        let repo = GitRepo::open(temp.path()).unwrap();
        let author = repo.commit_author(&sample.root_commit.to_string()).unwrap();

        assert_eq!(author.name, "Ada Lovelace");
        assert_eq!(author.email, "ada@example.com");
        assert_eq!(author.committed_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_branch_containing_prefers_main() {
        let temp = TempDir::new().unwrap();
        let sample = sample_history(temp.path());

        let repo = GitRepo::open(temp.path()).unwrap();
        // The root commit is on both main and feature-x
        assert_eq!(
            repo.branch_containing(sample.root_commit).unwrap(),
            Some("main".to_string())
        );
        assert_eq!(
            repo.branch_containing(sample.feature_commit).unwrap(),
            Some("feature-x".to_string())
        );
    }

    #[test]
    fn test_branch_containing_none() {
        let temp = TempDir::new().unwrap();
        let fixture = RepoFixture::init(temp.path());
        fixture.commit("main", "a.txt", "a\n", "a", 1_700_000_000);
        let orphan = fixture.commit("scratch", "b.txt", "b\n", "b", 1_700_000_100);
        fixture.delete_local_branch("scratch");

        let repo = GitRepo::open(temp.path()).unwrap();
        assert_eq!(repo.branch_containing(orphan).unwrap(), None);
    }
}
