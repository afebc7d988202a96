//! Cross-process lock for the cache file
//!
//! The lock is a directory created next to the cache file. Directory creation
//! is atomic on POSIX filesystems, so exactly one builder holds it at a time.
//! The holder records an owner file so abandoned locks can be recognized and
//! broken after `stale_after`.

use crate::error::{KcacheError, KcacheResult};
use crate::target::RemoteExecutor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Who holds the lock
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockOwner {
    token: Uuid,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held cache lock. Call [`CacheLock::release`] when done.
pub struct CacheLock {
    executor: Arc<dyn RemoteExecutor>,
    path: String,
    token: Uuid,
}

impl CacheLock {
    const OWNER_FILE: &'static str = "owner";
    const POLL_INTERVAL: Duration = Duration::from_millis(100);
    const CONTENTION_WARN_AFTER: Duration = Duration::from_millis(500);

    /// Acquire the lock at `path`, waiting up to `timeout`
    pub async fn acquire(
        executor: Arc<dyn RemoteExecutor>,
        path: String,
        timeout: Duration,
        stale_after: Duration,
    ) -> KcacheResult<Self> {
        let start = Instant::now();
        let mut warned = false;

        loop {
            if executor.try_create_dir(&path).await? {
                let lock = Self {
                    executor,
                    path,
                    token: Uuid::new_v4(),
                };
                lock.write_owner().await?;
                if warned {
                    debug!(
                        "Cache lock acquired after {:.1}s contention: {}",
                        start.elapsed().as_secs_f64(),
                        lock.path
                    );
                }
                return Ok(lock);
            }

            if let Some(owner) = Self::read_owner(&*executor, &path).await {
                let age = Utc::now() - owner.acquired_at;
                if age.to_std().unwrap_or_default() > stale_after {
                    warn!(
                        "Breaking stale cache lock {} held by pid {} since {}",
                        path, owner.pid, owner.acquired_at
                    );
                    Self::break_stale(&*executor, &path, owner.token).await?;
                    continue;
                }
            }

            if !warned && start.elapsed() > Self::CONTENTION_WARN_AFTER {
                warn!("Cache lock contention on {}, waiting...", path);
                warned = true;
            }

            if start.elapsed() >= timeout {
                return Err(KcacheError::CacheLockTimeout {
                    path,
                    waited: timeout,
                });
            }

            tokio::time::sleep(Self::POLL_INTERVAL).await;
        }
    }

    fn owner_path(path: &str) -> String {
        format!("{}/{}", path, Self::OWNER_FILE)
    }

    async fn write_owner(&self) -> KcacheResult<()> {
        let owner = LockOwner {
            token: self.token,
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string(&owner)?;
        if let Err(e) = self
            .executor
            .write_file(&Self::owner_path(&self.path), &content)
            .await
        {
            let _ = self.executor.remove_path(&self.path).await;
            return Err(e);
        }
        Ok(())
    }

    /// Move the lock owned by `stale` aside and delete it
    ///
    /// Waiters that saw the same stale owner race here. Only the one whose
    /// rename succeeds deletes anything, and a lock that turns out to belong
    /// to a new holder is put back.
    async fn break_stale(
        executor: &dyn RemoteExecutor,
        path: &str,
        stale: Uuid,
    ) -> KcacheResult<()> {
        let tombstone = format!("{}.stale-{}", path, Uuid::new_v4().simple());
        if let Err(e) = executor.rename(path, &tombstone).await {
            debug!("Stale lock {} already broken: {}", path, e);
            return Ok(());
        }

        match Self::read_owner(executor, &tombstone).await {
            Some(owner) if owner.token == stale => executor.remove_path(&tombstone).await,
            _ => {
                if let Err(e) = executor.rename(&tombstone, path).await {
                    warn!("Failed to restore cache lock {}: {}", path, e);
                    executor.remove_path(&tombstone).await?;
                }
                Ok(())
            }
        }
    }

    async fn read_owner(executor: &dyn RemoteExecutor, path: &str) -> Option<LockOwner> {
        let content = executor.read_file(&Self::owner_path(path)).await.ok()??;
        serde_json::from_str(&content).ok()
    }

    /// Release the lock
    ///
    /// If another process broke the lock and took it over, the new holder's
    /// lock is left alone.
    pub async fn release(self) {
        match Self::read_owner(&*self.executor, &self.path).await {
            Some(owner) if owner.token == self.token => {}
            Some(owner) => {
                warn!("Cache lock {} was taken over by pid {}", self.path, owner.pid);
                return;
            }
            None => {
                warn!("Cache lock {} was removed while held", self.path);
                return;
            }
        }

        if let Err(e) = self.executor.remove_path(&self.path).await {
            warn!("Failed to release cache lock {}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::memory::MemoryExecutor;

    const LOCK: &str = "/cache/kernel_cache.json.lock";

    #[tokio::test]
    async fn acquire_and_release() {
        let exec = Arc::new(MemoryExecutor::new());
        let lock = CacheLock::acquire(
            exec.clone(),
            LOCK.to_string(),
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert!(exec.has_file(&format!("{}/owner", LOCK)));
        lock.release().await;
        assert!(!exec.file_exists(LOCK).await.unwrap());
    }

    #[tokio::test]
    async fn times_out_while_held() {
        let exec = Arc::new(MemoryExecutor::new());
        let _held = CacheLock::acquire(
            exec.clone(),
            LOCK.to_string(),
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let result = CacheLock::acquire(
            exec.clone(),
            LOCK.to_string(),
            Duration::from_millis(150),
            Duration::from_secs(60),
        )
        .await;

        assert!(matches!(result, Err(KcacheError::CacheLockTimeout { .. })));
    }

    #[tokio::test]
    async fn breaks_stale_lock() {
        let exec = Arc::new(MemoryExecutor::new());
        let old = LockOwner {
            token: Uuid::new_v4(),
            pid: 4242,
            acquired_at: Utc::now() - chrono::Duration::hours(3),
        };
        exec.add_dir(LOCK);
        exec.add_file(
            &format!("{}/owner", LOCK),
            &serde_json::to_string(&old).unwrap(),
        );

        let lock = CacheLock::acquire(
            exec.clone(),
            LOCK.to_string(),
            Duration::from_millis(200),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let owner = CacheLock::read_owner(&*exec, LOCK).await.unwrap();
        assert_eq!(owner.pid, std::process::id());
        lock.release().await;
    }

    #[tokio::test]
    async fn late_breaker_keeps_fresh_lock() {
        let exec = Arc::new(MemoryExecutor::new());
        let stale = LockOwner {
            token: Uuid::new_v4(),
            pid: 4242,
            acquired_at: Utc::now() - chrono::Duration::hours(3),
        };
        exec.add_dir(LOCK);
        exec.add_file(
            &format!("{}/owner", LOCK),
            &serde_json::to_string(&stale).unwrap(),
        );

        // First waiter breaks the stale lock and a new holder takes it
        CacheLock::break_stale(&*exec, LOCK, stale.token).await.unwrap();
        assert!(!exec.file_exists(LOCK).await.unwrap());
        let held = CacheLock::acquire(
            exec.clone(),
            LOCK.to_string(),
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        // Second waiter acts on the same stale observation
        CacheLock::break_stale(&*exec, LOCK, stale.token).await.unwrap();

        let owner = CacheLock::read_owner(&*exec, LOCK).await.unwrap();
        assert_eq!(owner.token, held.token);
        assert_eq!(
            exec.list_dir("/cache").await.unwrap(),
            vec!["kernel_cache.json.lock".to_string()]
        );

        held.release().await;
        assert!(!exec.file_exists(LOCK).await.unwrap());
    }

    #[tokio::test]
    async fn release_leaves_foreign_lock_alone() {
        let exec = Arc::new(MemoryExecutor::new());
        let lock = CacheLock::acquire(
            exec.clone(),
            LOCK.to_string(),
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let other = LockOwner {
            token: Uuid::new_v4(),
            pid: 1,
            acquired_at: Utc::now(),
        };
        exec.add_file(
            &format!("{}/owner", LOCK),
            &serde_json::to_string(&other).unwrap(),
        );

        lock.release().await;
        assert!(exec.file_exists(LOCK).await.unwrap());
    }
}
