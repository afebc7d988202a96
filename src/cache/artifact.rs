//! Durable package storage
//!
//! Built packages live under `<root>/packages/commit_id-<commit>/`, so a
//! second build of the same commit lands in the same place.

use crate::cache::entry::PackageKind;
use crate::error::KcacheResult;
use crate::target::RemoteExecutor;
use std::sync::Arc;
use tracing::{debug, info};

/// Mode of per-commit package directories; installers on the target run as
/// arbitrary users and must be able to read and replace packages
const COMMIT_DIR_MODE: u32 = 0o777;

/// Final path component of a POSIX path
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Pick the installable kernel image out of a build's artifacts
///
/// Used for both freshly built and cached artifact lists. The first match in
/// list order wins; `None` means the list holds only auxiliary packages.
pub fn select_primary(kind: PackageKind, paths: &[String]) -> Option<&str> {
    paths
        .iter()
        .map(String::as_str)
        .find(|p| kind.is_primary(file_name(p)))
}

/// Package directory layout on the build machine
#[derive(Clone)]
pub struct ArtifactStore {
    executor: Arc<dyn RemoteExecutor>,
    root: String,
}

impl ArtifactStore {
    pub fn new(executor: Arc<dyn RemoteExecutor>, cache_root: &str) -> Self {
        Self {
            executor,
            root: cache_root.trim_end_matches('/').to_string(),
        }
    }

    pub fn packages_dir(&self) -> String {
        format!("{}/packages", self.root)
    }

    pub fn commit_dir(&self, commit_id: &str) -> String {
        format!("{}/commit_id-{}", self.packages_dir(), commit_id)
    }

    /// Move built artifacts into the commit's directory
    ///
    /// Returns the new paths in the order given. Existing files with the same
    /// name are replaced.
    pub async fn place(&self, commit_id: &str, sources: &[String]) -> KcacheResult<Vec<String>> {
        let dir = self.commit_dir(commit_id);
        if !self.executor.file_exists(&dir).await? {
            debug!("Creating package directory {}", dir);
            self.executor.create_dir_all(&dir, COMMIT_DIR_MODE).await?;
        }

        let mut placed = Vec::with_capacity(sources.len());
        for src in sources {
            let dest = format!("{}/{}", dir, file_name(src));
            self.executor.rename(src, &dest).await?;
            debug!("Stored {}", dest);
            placed.push(dest);
        }

        info!("Stored {} package(s) in {}", placed.len(), dir);
        Ok(placed)
    }

    /// Whether a stored package is still on disk
    pub async fn contains(&self, path: &str) -> KcacheResult<bool> {
        self.executor.file_exists(path).await
    }

    /// Delete a commit's package directory
    pub async fn remove(&self, commit_id: &str) -> KcacheResult<()> {
        let dir = self.commit_dir(commit_id);
        self.executor.remove_path(&dir).await?;
        info!("Removed package directory {}", dir);
        Ok(())
    }
}
