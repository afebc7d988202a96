//! Packaging requests
//!
//! Decides between reusing a cached package and running the build pipeline.
//! Either way the caller gets the path of the installable kernel image on
//! the build machine.

use crate::build::{BuildPipeline, DebianMakeTooling, PipelineSettings};
use crate::cache::{select_primary, ArtifactStore, CacheEntry, CacheStore, PackageKind};
use crate::config::Config;
use crate::error::{KcacheError, KcacheResult};
use crate::source::{GitSource, SourceLocation, SourceProvider};
use crate::target::RemoteExecutor;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PackagingOrchestrator {
    source: Arc<dyn SourceProvider>,
    cache: Arc<CacheStore>,
    artifacts: ArtifactStore,
    pipeline: BuildPipeline,
    kind: PackageKind,
    prune_evicted: bool,
}

impl PackagingOrchestrator {
    pub fn new(
        source: Arc<dyn SourceProvider>,
        cache: Arc<CacheStore>,
        artifacts: ArtifactStore,
        pipeline: BuildPipeline,
        prune_evicted: bool,
    ) -> Self {
        let kind = pipeline.settings().package_kind;
        Self {
            source,
            cache,
            artifacts,
            pipeline,
            kind,
            prune_evicted,
        }
    }

    /// Wire git source, Debian tooling and the cache for `executor`
    pub fn from_config(executor: Arc<dyn RemoteExecutor>, config: &Config) -> Self {
        let source: Arc<dyn SourceProvider> = Arc::new(GitSource::new(executor.clone()));
        let cache = Arc::new(CacheStore::from_config(executor.clone(), &config.cache));
        let artifacts = ArtifactStore::new(executor.clone(), &config.cache.root);
        let tooling = Arc::new(DebianMakeTooling::new(executor.clone(), config.build.clone()));
        let pipeline = BuildPipeline::new(
            executor,
            source.clone(),
            tooling,
            artifacts.clone(),
            cache.clone(),
            PipelineSettings::from_config(&config.build),
        );
        Self::new(source, cache, artifacts, pipeline, config.cache.prune_evicted)
    }

    /// Return the primary package for `location`, building it if needed
    pub async fn request(&self, location: &SourceLocation, use_cache: bool) -> KcacheResult<String> {
        let code_path = self.source.get_source_code(location).await?;
        let commit_id = self.source.get_latest_commit_id(&code_path).await?;
        let kernel_version = self.source.get_kernel_version(&code_path).await?;
        info!("Kernel source at {}: commit {}, version {}", code_path, commit_id, kernel_version);

        if use_cache {
            info!("Checking for cached kernel packages...");
            if let Some(path) = self.cached_primary(&commit_id, &kernel_version).await? {
                return Ok(path);
            }
            info!("Cache miss: building and packaging kernel");
        } else {
            info!("No-cache mode: building and packaging kernel");
        }

        let outcome = self
            .pipeline
            .run(&code_path, &commit_id, &kernel_version)
            .await
            .inspect_err(|e| {
                if e.is_precondition() {
                    warn!("Build of commit {} refused before starting: {}", commit_id, e);
                }
            })?;
        self.prune(&outcome.evicted).await;
        Ok(outcome.result.primary)
    }

    async fn cached_primary(
        &self,
        commit_id: &str,
        kernel_version: &str,
    ) -> KcacheResult<Option<String>> {
        let Some(hit) = self.cache.lookup(commit_id, kernel_version, self.kind).await? else {
            return Ok(None);
        };

        let primary = select_primary(self.kind, &hit.entry.artifact_paths)
            .ok_or_else(|| KcacheError::NoPrimaryArtifact {
                commit_id: commit_id.to_string(),
            })?
            .to_string();

        // Surviving headers alone do not make a usable hit
        if !self.artifacts.contains(&primary).await? {
            warn!(
                "Cached image {} for commit {} is missing; rebuilding",
                primary, commit_id
            );
            return Ok(None);
        }

        if self.cache.promote_verified(&hit).await?.is_none() {
            warn!(
                "Cache entry for commit {} disappeared before it could be promoted; rebuilding",
                commit_id
            );
            return Ok(None);
        }

        info!("Cache hit: using cached package {}", primary);
        Ok(Some(primary))
    }

    async fn prune(&self, evicted: &[CacheEntry]) {
        if !self.prune_evicted {
            return;
        }
        for entry in evicted {
            if let Err(e) = self.artifacts.remove(&entry.commit_id).await {
                warn!(
                    "Failed to remove packages of evicted commit {}: {}",
                    entry.commit_id, e
                );
            }
        }
    }
}
