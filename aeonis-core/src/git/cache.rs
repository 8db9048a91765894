//! Repository cache
//!
//! Keeps one working copy per project under a single cache root, with a
//! bounded table of in-memory handles evicted least-recently-used first.
//! Each working copy directory has a metadata sidecar in `<root>/.meta/`
//! used for on-disk pruning.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::credential::{release, EphemeralCredential};
use super::remote::{RemoteSync, RemoteUrl};
use super::repo::GitRepo;
use super::working_copy::WorkingCopy;
use crate::config::Config;
use crate::store::{ProjectStore, RepositoryRecord};
use crate::{Error, Result};

/// Default number of in-memory working copy handles
pub const DEFAULT_CAPACITY: usize = 32;

/// Directory under the cache root holding metadata sidecars
const METADATA_DIR: &str = ".meta";

/// Metadata stored next to each cached working copy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Project the working copy belongs to
    pub project_id: String,

    /// Remote URL with credentials stripped
    pub remote: String,

    /// When the working copy was cloned
    #[serde(with = "humantime_serde")]
    pub created_at: SystemTime,

    /// When the working copy was last cloned or refreshed
    #[serde(with = "humantime_serde")]
    pub last_used: SystemTime,
}

impl CacheMetadata {
    /// Create metadata for a fresh clone
    pub fn new(project_id: impl Into<String>, remote: &RemoteUrl) -> Self {
        let now = SystemTime::now();
        Self {
            project_id: project_id.into(),
            remote: remote.redacted(),
            created_at: now,
            last_used: now,
        }
    }

    /// Update last used timestamp
    pub fn touch(&mut self) {
        self.last_used = SystemTime::now();
    }

    /// Load metadata from a sidecar file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read cache metadata: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse cache metadata: {}", e)))
    }

    /// Save metadata to a sidecar file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("Failed to serialize cache metadata: {}", e)))?;

        fs::write(path, contents)
            .map_err(|e| Error::Other(format!("Failed to write cache metadata: {}", e)))
    }
}

/// Directory name for a project id
///
/// Anything outside `[A-Za-z0-9_-]` (and `.` past the first character) is
/// percent-encoded, so distinct ids never share a directory.
pub fn directory_name(project_id: &str) -> String {
    let mut name = String::with_capacity(project_id.len());
    for (i, byte) in project_id.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || (byte == b'.' && i > 0);
        if keep {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    name
}

/// An in-memory cache entry
#[derive(Debug, Clone)]
pub struct CachedProject {
    pub project_id: String,
    pub path: PathBuf,
    pub last_access: SystemTime,
    /// Whether a conversation currently holds the handle
    pub in_use: bool,
}

/// A working copy directory found on disk
#[derive(Debug, Clone)]
pub struct DiskEntry {
    pub path: PathBuf,
    /// Sidecar metadata, if present and readable
    pub metadata: Option<CacheMetadata>,
}

impl DiskEntry {
    /// Last use from metadata, falling back to the directory mtime
    pub fn last_used(&self) -> Option<SystemTime> {
        self.metadata
            .as_ref()
            .map(|m| m.last_used)
            .or_else(|| fs::metadata(&self.path).and_then(|m| m.modified()).ok())
    }
}

#[derive(Debug)]
struct CacheEntry {
    handle: Arc<WorkingCopy>,
    last_access: SystemTime,
    tick: u64,
}

#[derive(Debug, Default)]
struct Table {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

impl Table {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Manager of per-project working copies
pub struct RepoCache {
    root: PathBuf,
    capacity: usize,
    remote_name: String,
    store: Arc<dyn ProjectStore>,
    sync: Arc<dyn RemoteSync>,
    table: Mutex<Table>,
    /// Per-project gates serializing "check cache, else clone"
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for RepoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoCache")
            .field("root", &self.root)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl RepoCache {
    /// Create a cache rooted at `root`
    pub fn new(root: PathBuf, store: Arc<dyn ProjectStore>, sync: Arc<dyn RemoteSync>) -> Self {
        Self {
            root,
            capacity: DEFAULT_CAPACITY,
            remote_name: super::repo::DEFAULT_REMOTE.to_string(),
            store,
            sync,
            table: Mutex::new(Table::default()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Create a cache from configuration
    pub fn from_config(config: &Config, store: Arc<dyn ProjectStore>, sync: Arc<dyn RemoteSync>) -> Result<Self> {
        Ok(Self::new(config.cache.root_dir()?, store, sync)
            .with_capacity(config.cache.capacity)
            .with_remote_name(config.git.remote.clone()))
    }

    /// Set the number of in-memory handles kept
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the remote name working copies are cloned with
    pub fn with_remote_name(mut self, remote: impl Into<String>) -> Self {
        self.remote_name = remote.into();
        self
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working copy directory for a project
    pub fn working_copy_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(directory_name(project_id))
    }

    fn metadata_path(&self, project_id: &str) -> PathBuf {
        self.root
            .join(METADATA_DIR)
            .join(format!("{}.toml", directory_name(project_id)))
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, project_id: &str) -> Option<Arc<WorkingCopy>> {
        let mut table = self.lock_table();
        let tick = table.next_tick();
        let entry = table.entries.get_mut(project_id)?;
        entry.tick = tick;
        entry.last_access = SystemTime::now();
        Some(Arc::clone(&entry.handle))
    }

    fn gate(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(project_id.to_string()).or_default())
    }

    fn release_gate(&self, project_id: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and `gate` itself; anything more is a waiter
        if Arc::strong_count(&gate) == 2 {
            gates.remove(project_id);
        }
    }

    /// Get the working copy for a project, cloning or refreshing it as needed
    ///
    /// Fails with `NotFound` without touching the network when the project
    /// has no remote configured.
    pub async fn acquire(&self, project_id: &str) -> Result<Arc<WorkingCopy>> {
        if let Some(handle) = self.lookup(project_id) {
            debug!(project_id = %project_id, "Repository cache hit");
            return Ok(handle);
        }

        let gate = self.gate(project_id);
        let result = {
            let _guard = gate.lock().await;
            match self.lookup(project_id) {
                Some(handle) => Ok(handle),
                None => self.load(project_id).await,
            }
        };
        self.release_gate(project_id, gate);

        result
    }

    async fn load(&self, project_id: &str) -> Result<Arc<WorkingCopy>> {
        let record = self
            .store
            .get_project_by_id(project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Project '{}' not found", project_id)))?;

        let remote = match record.remote() {
            Some(url) => RemoteUrl::parse(url)?,
            None => {
                return Err(Error::NotFound(format!(
                    "Project '{}' has no repository configured",
                    project_id
                )))
            }
        };

        let dir = self.working_copy_dir(project_id);

        if dir.exists() {
            match self.refresh(&dir, &remote, &record).await {
                Ok(()) => return Ok(self.insert(project_id, dir)),
                Err(e @ (Error::AuthFailure(_) | Error::Timeout(_))) => return Err(e),
                Err(e) => {
                    warn!(project_id = %project_id, "Discarding cached working copy: {}", e);
                    remove_dir(&dir)?;
                }
            }
        }

        self.clone_fresh(&dir, &remote, &record).await?;
        Ok(self.insert(project_id, dir))
    }

    /// Materialize the project's credential when the repository is private
    fn credential_for(&self, remote: &RemoteUrl, record: &RepositoryRecord) -> Result<Option<EphemeralCredential>> {
        if !record.is_private {
            return Ok(None);
        }

        let secret = record.credential.as_ref().ok_or_else(|| {
            Error::AuthFailure("Repository is private but no credential is configured".to_string())
        })?;

        EphemeralCredential::provision(remote, secret).map(Some)
    }

    async fn refresh(&self, dir: &Path, remote: &RemoteUrl, record: &RepositoryRecord) -> Result<()> {
        debug!(project_id = %record.project_id, remote = %remote, "Refreshing working copy");

        let open_dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || GitRepo::open(open_dir).map(|_| ()))
            .await
            .map_err(|e| Error::Other(format!("git task failed: {}", e)))??;

        let credential = self.credential_for(remote, record)?;
        let fetched = self.sync.fetch(dir, &self.remote_name, credential.as_ref()).await;
        release(credential);
        fetched?;

        let sync_dir = dir.to_path_buf();
        let remote_name = self.remote_name.clone();
        let branch = tokio::task::spawn_blocking(move || {
            GitRepo::open(sync_dir)?
                .with_remote(remote_name)
                .sync_default_branch()
        })
        .await
        .map_err(|e| Error::Other(format!("git task failed: {}", e)))??;

        let metadata_path = self.metadata_path(&record.project_id);
        let mut metadata = CacheMetadata::load(&metadata_path)
            .unwrap_or_else(|_| CacheMetadata::new(record.project_id.clone(), remote));
        metadata.touch();
        if let Err(e) = metadata.save(&metadata_path) {
            warn!(project_id = %record.project_id, "Failed to update cache metadata: {}", e);
        }

        info!(
            project_id = %record.project_id,
            branch = branch.as_deref().unwrap_or("<unresolved>"),
            "Working copy refreshed"
        );
        Ok(())
    }

    async fn clone_fresh(&self, dir: &Path, remote: &RemoteUrl, record: &RepositoryRecord) -> Result<()> {
        fs::create_dir_all(&self.root)?;

        info!(project_id = %record.project_id, remote = %remote, "Cloning repository");

        let credential = self.credential_for(remote, record)?;
        let cloned = self.sync.clone_repo(remote, dir, credential.as_ref()).await;
        release(credential);

        if let Err(e) = cloned {
            if dir.exists() {
                if let Err(cleanup) = fs::remove_dir_all(dir) {
                    warn!(path = %dir.display(), "Failed to remove partial clone: {}", cleanup);
                }
            }
            return Err(e);
        }

        let metadata = CacheMetadata::new(record.project_id.clone(), remote);
        if let Err(e) = metadata.save(&self.metadata_path(&record.project_id)) {
            warn!(project_id = %record.project_id, "Failed to write cache metadata: {}", e);
        }

        Ok(())
    }

    /// Add a handle to the table, evicting least-recently-used idle entries
    fn insert(&self, project_id: &str, dir: PathBuf) -> Arc<WorkingCopy> {
        let handle = Arc::new(WorkingCopy::new(project_id, dir, self.remote_name.clone()));

        let mut table = self.lock_table();
        let tick = table.next_tick();
        table.entries.insert(
            project_id.to_string(),
            CacheEntry {
                handle: Arc::clone(&handle),
                last_access: SystemTime::now(),
                tick,
            },
        );

        while table.entries.len() > self.capacity {
            let victim = table
                .entries
                .iter()
                .filter(|(id, entry)| id.as_str() != project_id && Arc::strong_count(&entry.handle) == 1)
                .min_by_key(|(_, entry)| entry.tick)
                .map(|(id, _)| id.clone());

            match victim {
                Some(id) => {
                    table.entries.remove(&id);
                    debug!(project_id = %id, "Evicted working copy handle");
                }
                None => {
                    warn!(
                        entries = table.entries.len(),
                        capacity = self.capacity,
                        "All cached working copies are in use, exceeding capacity"
                    );
                    break;
                }
            }
        }

        handle
    }

    /// Drop a project's handle and delete its working copy from disk
    ///
    /// Waits for in-flight users of the handle. Returns whether anything was removed.
    pub async fn invalidate(&self, project_id: &str) -> Result<bool> {
        let gate = self.gate(project_id);
        let result = {
            let _guard = gate.lock().await;

            let handle = self.lock_table().entries.remove(project_id).map(|e| e.handle);
            let _exclusive = match &handle {
                Some(handle) => Some(handle.exclusive().await),
                None => None,
            };

            let dir = self.working_copy_dir(project_id);
            let existed = dir.exists();
            remove_dir(&dir)?;

            let metadata_path = self.metadata_path(project_id);
            if metadata_path.exists() {
                fs::remove_file(&metadata_path)?;
            }

            if existed || handle.is_some() {
                info!(project_id = %project_id, "Invalidated cached working copy");
            }
            Ok(existed || handle.is_some())
        };
        self.release_gate(project_id, gate);

        result
    }

    /// In-memory entries, most recently used first
    pub fn cached_projects(&self) -> Vec<CachedProject> {
        let table = self.lock_table();
        let mut entries: Vec<_> = table.entries.iter().collect();
        entries.sort_by(|a, b| b.1.tick.cmp(&a.1.tick));

        entries
            .into_iter()
            .map(|(id, entry)| CachedProject {
                project_id: id.clone(),
                path: entry.handle.root().to_path_buf(),
                last_access: entry.last_access,
                in_use: Arc::strong_count(&entry.handle) > 1,
            })
            .collect()
    }

    /// Working copy directories present under the cache root
    pub fn disk_entries(&self) -> Result<Vec<DiskEntry>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || entry.file_name() == METADATA_DIR {
                continue;
            }

            let metadata_path = self
                .root
                .join(METADATA_DIR)
                .join(format!("{}.toml", entry.file_name().to_string_lossy()));
            let metadata = CacheMetadata::load(&metadata_path).ok();

            entries.push(DiskEntry { path, metadata });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Delete on-disk working copies unused for longer than `max_age`
    ///
    /// Directories with a live in-memory handle are kept. Returns removed paths.
    pub fn prune(&self, max_age: Duration) -> Result<Vec<PathBuf>> {
        let live: Vec<PathBuf> = self
            .lock_table()
            .entries
            .values()
            .map(|e| e.handle.root().to_path_buf())
            .collect();

        let now = SystemTime::now();
        let mut removed = Vec::new();

        for entry in self.disk_entries()? {
            if live.contains(&entry.path) {
                continue;
            }

            let expired = entry
                .last_used()
                .and_then(|last| now.duration_since(last).ok())
                .map(|age| age > max_age)
                .unwrap_or(false);
            if !expired {
                continue;
            }

            remove_dir(&entry.path)?;
            if let Some(name) = entry.path.file_name() {
                let sidecar = self
                    .root
                    .join(METADATA_DIR)
                    .join(format!("{}.toml", name.to_string_lossy()));
                if sidecar.exists() {
                    fs::remove_file(&sidecar)?;
                }
            }

            info!(path = %entry.path.display(), "Pruned stale working copy");
            removed.push(entry.path);
        }

        Ok(removed)
    }
}

fn remove_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
