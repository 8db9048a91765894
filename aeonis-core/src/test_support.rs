//! In-process git fixtures shared by unit tests

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use git2::build::CheckoutBuilder;
use git2::{Oid, Repository, RepositoryInitOptions, Signature, Time};

use crate::git::{EphemeralCredential, RemoteSync, RemoteUrl};
use crate::scanner::{ScanOutput, StaticScanner};
use crate::store::{ProjectStore, RepositoryRecord, SpanQuery, SpanRecord, TraceStore, TraceSummary};
use crate::{Error, Result};

/// A repository built commit by commit with deterministic timestamps
pub struct RepoFixture {
    pub repo: Repository,
    pub root: PathBuf,
}

impl RepoFixture {
    /// Initialize an empty repository whose initial branch is `main`
    pub fn init(path: &Path) -> Self {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(path, &opts).unwrap();
        Self {
            repo,
            root: path.to_path_buf(),
        }
    }

    /// Reopen a repository created earlier
    pub fn open(path: &Path) -> Self {
        Self {
            repo: Repository::open(path).unwrap(),
            root: path.to_path_buf(),
        }
    }

    /// Commit a single file change on `branch`, creating the branch from HEAD if needed
    ///
    /// Leaves `branch` checked out.
    pub fn commit(&self, branch: &str, path: &str, content: &str, message: &str, time: i64) -> Oid {
        let refname = format!("refs/heads/{}", branch);

        let parent = match self.repo.find_reference(&refname) {
            Ok(r) => Some(r.peel_to_commit().unwrap()),
            Err(_) => {
                let head = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
                if let Some(ref head) = head {
                    self.repo.branch(branch, head, false).unwrap();
                }
                head
            }
        };

        self.repo.set_head(&refname).unwrap();
        if parent.is_some() {
            self.repo
                .checkout_head(Some(CheckoutBuilder::new().force()))
                .unwrap();
        }

        let file = self.root.join(path);
        if let Some(dir) = file.parent() {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(&file, content).unwrap();

        let mut index = self.repo.index().unwrap();
        index.add_path(Path::new(path)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();

        let sig = Signature::new("Ada Lovelace", "ada@example.com", &Time::new(time, 0)).unwrap();
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        self.repo
            .commit(Some(&refname), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    /// Check out an existing local branch
    pub fn checkout(&self, branch: &str) {
        self.repo
            .set_head(&format!("refs/heads/{}", branch))
            .unwrap();
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))
            .unwrap();
    }

    /// Mirror `branch` to `origin/<branch>` and point `origin/HEAD` at it
    pub fn publish_remote(&self, branch: &str) {
        self.publish_branch(branch);
        self.repo
            .reference_symbolic(
                "refs/remotes/origin/HEAD",
                &format!("refs/remotes/origin/{}", branch),
                true,
                "fixture: remote head",
            )
            .unwrap();
    }

    /// Mirror `branch` to `origin/<branch>` only
    pub fn publish_branch(&self, branch: &str) {
        let tip = self
            .repo
            .find_reference(&format!("refs/heads/{}", branch))
            .unwrap()
            .target()
            .unwrap();
        self.repo
            .reference(
                &format!("refs/remotes/origin/{}", branch),
                tip,
                true,
                "fixture: publish",
            )
            .unwrap();
    }

    /// Delete a local branch that is not checked out
    pub fn delete_local_branch(&self, branch: &str) {
        let head_is_branch = self
            .repo
            .head()
            .ok()
            .and_then(|h| h.shorthand().map(|s| s == branch))
            .unwrap_or(false);
        if head_is_branch {
            self.checkout("main");
        }
        self.repo
            .find_branch(branch, git2::BranchType::Local)
            .unwrap()
            .delete()
            .unwrap();
    }

    /// Point a local branch at an arbitrary commit
    pub fn set_branch(&self, branch: &str, oid: Oid) {
        self.repo
            .reference(&format!("refs/heads/{}", branch), oid, true, "fixture: move")
            .unwrap();
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))
            .unwrap();
    }
}

/// Build a small project history used across tests
///
/// `main`: three commits touching `app.py` and `README.md`;
/// `feature-x`: one extra commit adding `feature.py`.
/// `origin/HEAD` points at `origin/main`; HEAD is left on `main`.
pub struct SampleHistory {
    pub root_commit: Oid,
    pub main_tip: Oid,
    pub feature_commit: Oid,
}

pub fn sample_history(path: &Path) -> SampleHistory {
    let fixture = RepoFixture::init(path);
    let root_commit = fixture.commit("main", "README.md", "# shop\n", "initial commit", 1_700_000_000);
    fixture.commit("main", "app.py", "def pay():\n    return 1\n", "add payments", 1_700_000_100);
    let main_tip = fixture.commit(
        "main",
        "app.py",
        "def pay():\n    return 2\n",
        "  fix payment total  \n",
        1_700_000_200,
    );
    let feature_commit = fixture.commit(
        "feature-x",
        "feature.py",
        "import os\nos.system(input())\n",
        "add feature x",
        1_700_000_300,
    );
    fixture.checkout("main");
    fixture.publish_remote("main");
    fixture.publish_branch("feature-x");

    SampleHistory {
        root_commit,
        main_tip,
        feature_commit,
    }
}

/// Project store backed by a fixed set of records
#[derive(Default)]
pub struct FakeStore {
    records: Mutex<HashMap<String, RepositoryRecord>>,
}

impl FakeStore {
    pub fn with_public(ids: &[&str]) -> Self {
        let store = Self::default();
        for id in ids {
            store.put(RepositoryRecord {
                project_id: id.to_string(),
                remote_url: Some(format!("https://example.com/acme/{}.git", id)),
                is_private: false,
                credential: None,
            });
        }
        store
    }

    pub fn put(&self, record: RepositoryRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.project_id.clone(), record);
    }
}

#[async_trait]
impl ProjectStore for FakeStore {
    async fn get_project_by_id(&self, project_id: &str) -> Result<Option<RepositoryRecord>> {
        Ok(self.records.lock().unwrap().get(project_id).cloned())
    }
}

/// What a fake network operation should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    FailAuth,
    FailOther,
    FailTimeout,
}

/// Network stand-in that builds the sample history locally
pub struct FakeSync {
    pub clones: AtomicUsize,
    pub fetches: AtomicUsize,
    clone_outcome: Mutex<Outcome>,
    fetch_outcome: Mutex<Outcome>,
    delay: Duration,
    /// Credential paths seen during operations, and whether they existed then
    pub credentials: Mutex<Vec<(PathBuf, bool)>>,
}

impl FakeSync {
    pub fn new() -> Self {
        Self {
            clones: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            clone_outcome: Mutex::new(Outcome::Succeed),
            fetch_outcome: Mutex::new(Outcome::Succeed),
            delay: Duration::ZERO,
            credentials: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_clone(&self, outcome: Outcome) {
        *self.clone_outcome.lock().unwrap() = outcome;
    }

    pub fn set_fetch(&self, outcome: Outcome) {
        *self.fetch_outcome.lock().unwrap() = outcome;
    }

    fn record(&self, credential: Option<&EphemeralCredential>) {
        if let Some(c) = credential {
            self.credentials
                .lock()
                .unwrap()
                .push((c.path().to_path_buf(), c.path().exists()));
        }
    }
}

impl Default for FakeSync {
    fn default() -> Self {
        Self::new()
    }
}

fn failure(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Succeed => Ok(()),
        Outcome::FailAuth => Err(Error::AuthFailure("git clone was rejected by the remote".to_string())),
        Outcome::FailOther => Err(Error::Other("git failed: RPC failed".to_string())),
        Outcome::FailTimeout => Err(Error::Timeout("git clone exceeded 5m".to_string())),
    }
}

#[async_trait]
impl RemoteSync for FakeSync {
    async fn clone_repo(
        &self,
        _remote: &RemoteUrl,
        dest: &Path,
        credential: Option<&EphemeralCredential>,
    ) -> Result<()> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        self.record(credential);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = *self.clone_outcome.lock().unwrap();
        if outcome != Outcome::Succeed {
            // Leave a partial directory behind like an interrupted clone
            fs::create_dir_all(dest.join(".git")).unwrap();
            return failure(outcome);
        }

        fs::create_dir_all(dest).unwrap();
        sample_history(dest);
        Ok(())
    }

    async fn fetch(
        &self,
        _workdir: &Path,
        _remote_name: &str,
        credential: Option<&EphemeralCredential>,
    ) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.record(credential);
        failure(*self.fetch_outcome.lock().unwrap())
    }
}

/// Trace store returning one canned span and recording every query
#[derive(Default)]
pub struct FakeTraceStore {
    pub queries: Mutex<Vec<SpanQuery>>,
    pub trace_lookups: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl TraceStore for FakeTraceStore {
    async fn query_spans(&self, query: &SpanQuery) -> Result<Vec<SpanRecord>> {
        self.queries.lock().unwrap().push(query.clone());
        let start = chrono::DateTime::from_timestamp(1_700_000_500, 0).unwrap();
        Ok(vec![SpanRecord {
            trace_id: "t1".to_string(),
            span_id: "s1".to_string(),
            parent_span_id: None,
            name: "POST /pay".to_string(),
            commit_id: Some("abc123".to_string()),
            start_time: start,
            end_time: start + chrono::Duration::milliseconds(1250),
            duration_ms: 1250,
            attributes: serde_json::json!({"http.status_code": 500}),
            error: Some(serde_json::json!({"message": "boom"})),
        }])
    }

    async fn recent_traces(&self, project_id: &str, limit: usize) -> Result<Vec<TraceSummary>> {
        self.trace_lookups
            .lock()
            .unwrap()
            .push((project_id.to_string(), limit));
        Ok(Vec::new())
    }
}

/// Scanner that reports no findings and counts its runs
#[derive(Default)]
pub struct CountingScanner {
    pub runs: AtomicUsize,
}

#[async_trait]
impl StaticScanner for CountingScanner {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn scan(&self, _dir: &Path) -> Result<ScanOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ScanOutput::default())
    }
}

/// Scanner that panics mid-scan
#[derive(Default)]
pub struct PanickingScanner;

#[async_trait]
impl StaticScanner for PanickingScanner {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn scan(&self, _dir: &Path) -> Result<ScanOutput> {
        panic!("scanner crashed");
    }
}
