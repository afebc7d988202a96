//! Persistent package cache index
//!
//! The index is a single JSON file on the build machine holding every
//! [`CacheEntry`] in recency order. Reads never fail: a missing or corrupt
//! file is an empty cache. Mutations load, change and rewrite the whole file
//! while holding both an in-process mutex and the on-target [`CacheLock`].

use crate::cache::entry::{CacheEntry, PackageKind};
use crate::cache::lock::CacheLock;
use crate::config::schema::CacheConfig;
use crate::error::{KcacheError, KcacheResult};
use crate::target::RemoteExecutor;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Name of the index file under the cache root
pub const CACHE_FILE_NAME: &str = "kernel_cache.json";

/// A cache entry whose key matched and whose package is still on disk
#[derive(Debug, Clone)]
pub struct VerifiedEntry {
    pub entry: CacheEntry,
    /// The artifact that was found to exist
    pub verified_path: String,
}

/// Result of [`CacheStore::insert`]
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    /// Artifact paths of the inserted entry
    pub artifact_paths: Vec<String>,
    /// Entries pushed out by the capacity bound, oldest last
    pub evicted: Vec<CacheEntry>,
}

/// Move the entry at `idx` to the front and refresh its usage time
///
/// The new usage time never goes backwards, even if clocks disagree.
fn apply_promote(entries: &mut Vec<CacheEntry>, idx: usize) -> Vec<String> {
    let mut entry = entries.remove(idx);
    entry.last_used_time = Utc::now().max(entry.last_used_time);
    let paths = entry.artifact_paths.clone();
    entries.insert(0, entry);
    paths
}

/// Put `entry` at the front, replacing any entry for the same commit, and
/// evict from the tail until `max_size` holds
fn apply_insert(
    entries: &mut Vec<CacheEntry>,
    mut entry: CacheEntry,
    max_size: usize,
) -> Vec<CacheEntry> {
    entries.retain(|e| e.commit_id != entry.commit_id);
    entry.last_used_time = Utc::now();
    entries.insert(0, entry);

    let mut evicted = vec![];
    while entries.len() > max_size.max(1) {
        if let Some(removed) = entries.pop() {
            evicted.push(removed);
        }
    }
    evicted
}

/// Parse the index file, dropping malformed records individually
fn parse_entries(content: &str, path: &str) -> Vec<CacheEntry> {
    if content.trim().is_empty() {
        return vec![];
    }

    let records: Vec<serde_json::Value> = match serde_json::from_str(content) {
        Ok(records) => records,
        Err(e) => {
            error!("Failed to load cache {}: {}", path, e);
            return vec![];
        }
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(records.len());
    for (idx, record) in records.into_iter().enumerate() {
        let entry = match serde_json::from_value::<CacheEntry>(record) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Dropping malformed cache record #{} in {}: {}", idx, path, e);
                continue;
            }
        };
        if let Err(reason) = entry.validate() {
            warn!("Dropping invalid cache record #{} in {}: {}", idx, path, reason);
            continue;
        }
        if !seen.insert(entry.commit_id.clone()) {
            warn!(
                "Dropping duplicate cache record #{} for commit {}",
                idx, entry.commit_id
            );
            continue;
        }
        entries.push(entry);
    }
    entries
}

/// The cache index for one cache root
pub struct CacheStore {
    executor: Arc<dyn RemoteExecutor>,
    path: String,
    max_size: usize,
    lock_timeout: Duration,
    lock_stale_after: Duration,
    writer: Mutex<()>,
}

impl CacheStore {
    /// Create a store for the index under `cache_root`
    pub fn new(executor: Arc<dyn RemoteExecutor>, cache_root: &str, max_size: usize) -> Self {
        let defaults = CacheConfig::default();
        Self {
            executor,
            path: format!("{}/{}", cache_root.trim_end_matches('/'), CACHE_FILE_NAME),
            max_size,
            lock_timeout: defaults.lock_timeout(),
            lock_stale_after: defaults.lock_stale_after(),
            writer: Mutex::new(()),
        }
    }

    /// Create a store from the cache section of the config
    pub fn from_config(executor: Arc<dyn RemoteExecutor>, config: &CacheConfig) -> Self {
        Self::new(executor, &config.root, config.max_size)
            .with_lock_timing(config.lock_timeout(), config.lock_stale_after())
    }

    pub fn with_lock_timing(mut self, timeout: Duration, stale_after: Duration) -> Self {
        self.lock_timeout = timeout;
        self.lock_stale_after = stale_after;
        self
    }

    /// Path of the index file
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Load all entries; never fails
    pub async fn load(&self) -> Vec<CacheEntry> {
        match self.executor.read_file(&self.path).await {
            Ok(Some(content)) => parse_entries(&content, &self.path),
            Ok(None) => {
                debug!("Cache file {} not found, starting empty", self.path);
                vec![]
            }
            Err(e) => {
                error!("Failed to load cache {}: {}", self.path, e);
                vec![]
            }
        }
    }

    async fn persist(&self, entries: &[CacheEntry]) -> KcacheResult<()> {
        let content = serde_json::to_string_pretty(entries)?;
        self.executor
            .write_file(&self.path, &content)
            .await
            .map_err(|e| KcacheError::CachePersist {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// First artifact of `entry` that has the kind's suffix and exists
    pub async fn verify_entry(&self, entry: &CacheEntry) -> KcacheResult<Option<String>> {
        for path in &entry.artifact_paths {
            if entry.package_kind.matches(path) && self.executor.file_exists(path).await? {
                return Ok(Some(path.clone()));
            }
        }
        Ok(None)
    }

    /// Find a usable entry for the key without changing anything
    ///
    /// An entry whose packages are gone from disk is reported as a miss.
    pub async fn lookup(
        &self,
        commit_id: &str,
        kernel_version: &str,
        kind: PackageKind,
    ) -> KcacheResult<Option<VerifiedEntry>> {
        let entries = self.load().await;
        let Some(entry) = entries
            .into_iter()
            .find(|e| e.matches(commit_id, kernel_version, kind))
        else {
            debug!("No cache entry for commit {}", commit_id);
            return Ok(None);
        };

        match self.verify_entry(&entry).await? {
            Some(verified_path) => Ok(Some(VerifiedEntry {
                entry,
                verified_path,
            })),
            None => {
                info!(
                    "Cache entry for commit {} is stale: no {} package on disk",
                    commit_id, kind
                );
                Ok(None)
            }
        }
    }

    async fn lock(&self) -> KcacheResult<CacheLock> {
        CacheLock::acquire(
            self.executor.clone(),
            format!("{}.lock", self.path),
            self.lock_timeout,
            self.lock_stale_after,
        )
        .await
    }

    /// Mark the entry for `commit_id` as most recently used
    ///
    /// Returns its artifact paths, or `None` if no such entry exists.
    pub async fn promote(&self, commit_id: &str) -> KcacheResult<Option<Vec<String>>> {
        self.promote_where(|e| e.commit_id == commit_id).await
    }

    /// Promote the exact entry a [`lookup`](Self::lookup) returned
    ///
    /// Returns `None` if that entry was evicted or replaced by a newer build
    /// of the same commit since the lookup.
    pub async fn promote_verified(
        &self,
        verified: &VerifiedEntry,
    ) -> KcacheResult<Option<Vec<String>>> {
        self.promote_where(|e| e.same_generation(&verified.entry))
            .await
    }

    async fn promote_where<F>(&self, pred: F) -> KcacheResult<Option<Vec<String>>>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let _writer = self.writer.lock().await;
        let lock = self.lock().await?;
        let result = self.promote_locked(pred).await;
        lock.release().await;

        if let Ok(None) = result {
            warn!("No matching cache entry to promote in {}", self.path);
        }
        result
    }

    async fn promote_locked<F>(&self, pred: F) -> KcacheResult<Option<Vec<String>>>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let mut entries = self.load().await;
        let Some(idx) = entries.iter().position(|e| pred(e)) else {
            return Ok(None);
        };
        let commit_id = entries[idx].commit_id.clone();
        let paths = apply_promote(&mut entries, idx);
        self.persist(&entries).await?;
        info!("Updated last used time for cache entry {}", commit_id);
        Ok(Some(paths))
    }

    /// Add a freshly built entry at the front
    ///
    /// Any entry for the same commit is replaced; entries beyond `max_size`
    /// are evicted from the tail and returned.
    pub async fn insert(&self, entry: CacheEntry) -> KcacheResult<InsertOutcome> {
        let _writer = self.writer.lock().await;
        let lock = self.lock().await?;
        let result = self.insert_locked(entry).await;
        lock.release().await;
        result
    }

    async fn insert_locked(&self, entry: CacheEntry) -> KcacheResult<InsertOutcome> {
        let mut entries = self.load().await;
        let commit_id = entry.commit_id.clone();
        let artifact_paths = entry.artifact_paths.clone();
        let evicted = apply_insert(&mut entries, entry, self.max_size);
        self.persist(&entries).await?;

        for removed in &evicted {
            info!("Cache full. Removed oldest entry: {}", removed.commit_id);
        }
        info!("Created cache entry for commit {}", commit_id);
        Ok(InsertOutcome {
            artifact_paths,
            evicted,
        })
    }

    /// Every entry paired with whether its packages are still on disk
    pub async fn verify_all(&self) -> KcacheResult<Vec<(CacheEntry, bool)>> {
        let mut report = vec![];
        for entry in self.load().await {
            let ok = self.verify_entry(&entry).await?.is_some();
            report.push((entry, ok));
        }
        Ok(report)
    }
}
