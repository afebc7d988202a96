//! Build-and-package pipeline
//!
//! Turns a checked-out tree into cached packages. Every step is a hard
//! precondition for the next; nothing is written to the cache unless all of
//! them succeed.

use crate::build::tooling::BuildTooling;
use crate::cache::{select_primary, ArtifactStore, CacheEntry, CacheStore, PackageKind};
use crate::config::schema::BuildConfig;
use crate::error::{KcacheError, KcacheResult};
use crate::source::SourceProvider;
use crate::target::{ExecOptions, OsInfo, RemoteExecutor};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pipeline settings taken from the `[build]` config section
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub expected_branch: Option<String>,
    pub kernel_config_file: Option<String>,
    pub package_timeout: Duration,
    pub package_kind: PackageKind,
}

impl PipelineSettings {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            expected_branch: config.expected_branch.clone(),
            kernel_config_file: config.kernel_config_file.clone(),
            package_timeout: config.package_timeout(),
            package_kind: PackageKind::Deb,
        }
    }
}

/// Packages of one successful build, already in the artifact store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub commit_id: String,
    pub kernel_version: String,
    pub artifact_paths: Vec<String>,
    /// The installable kernel image among `artifact_paths`
    pub primary: String,
}

/// A build result plus the cache entries its insertion evicted
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub result: BuildResult,
    pub evicted: Vec<CacheEntry>,
}

/// Parent directory of a POSIX path
fn parent_dir(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => ".",
    }
}

pub struct BuildPipeline {
    executor: Arc<dyn RemoteExecutor>,
    source: Arc<dyn SourceProvider>,
    tooling: Arc<dyn BuildTooling>,
    artifacts: ArtifactStore,
    cache: Arc<CacheStore>,
    settings: PipelineSettings,
}

impl BuildPipeline {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        source: Arc<dyn SourceProvider>,
        tooling: Arc<dyn BuildTooling>,
        artifacts: ArtifactStore,
        cache: Arc<CacheStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            executor,
            source,
            tooling,
            artifacts,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Build, package, store and cache the tree at `code_path`
    pub async fn run(
        &self,
        code_path: &str,
        commit_id: &str,
        kernel_version: &str,
    ) -> KcacheResult<BuildOutcome> {
        let kind = self.settings.package_kind;
        let output_dir = parent_dir(code_path);

        self.clean_output_dir(output_dir).await?;

        info!("Installing build tools");
        self.tooling.install_build_tools().await?;

        if !self.executor.file_exists(code_path).await? {
            return Err(KcacheError::SourceNotFound(code_path.to_string()));
        }
        info!("Kernel code path: {}", code_path);

        self.tooling.modify_code(code_path).await?;

        if let Some(expected) = &self.settings.expected_branch {
            let actual = self.source.get_current_branch(code_path).await?;
            if &actual != expected {
                return Err(KcacheError::BranchMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
            info!("Verified kernel source is on branch '{}'", actual);
        }

        self.tooling
            .build_code(
                code_path,
                self.settings.kernel_config_file.as_deref(),
                kernel_version,
                true,
            )
            .await?;

        self.tooling
            .package(code_path, self.settings.package_timeout)
            .await?;

        let built = self.collect_artifacts(output_dir, kind).await?;
        info!("Build produced {} package(s)", built.len());

        let artifact_paths = self.artifacts.place(commit_id, &built).await?;

        let primary = select_primary(kind, &artifact_paths)
            .ok_or_else(|| KcacheError::NoPrimaryArtifact {
                commit_id: commit_id.to_string(),
            })?
            .to_string();

        let entry = CacheEntry {
            commit_id: commit_id.to_string(),
            kernel_version: kernel_version.to_string(),
            package_kind: kind,
            artifact_paths: artifact_paths.clone(),
            build_time: Utc::now(),
            last_used_time: Utc::now(),
            builder_identity: self.builder_identity().await,
            host_os_descriptor: self.host_os_descriptor().await,
        };
        let inserted = self.cache.insert(entry).await?;

        Ok(BuildOutcome {
            result: BuildResult {
                commit_id: commit_id.to_string(),
                kernel_version: kernel_version.to_string(),
                artifact_paths: inserted.artifact_paths,
                primary,
            },
            evicted: inserted.evicted,
        })
    }

    /// Remove packages left over from an earlier build
    async fn clean_output_dir(&self, dir: &str) -> KcacheResult<()> {
        let kind = self.settings.package_kind;
        for name in self.executor.list_dir(dir).await? {
            if kind.matches(&name) {
                let path = format!("{}/{}", dir.trim_end_matches('/'), name);
                debug!("Removing leftover package {}", path);
                self.executor.remove_path(&path).await?;
            }
        }
        Ok(())
    }

    async fn collect_artifacts(&self, dir: &str, kind: PackageKind) -> KcacheResult<Vec<String>> {
        let built: Vec<String> = self
            .executor
            .list_dir(dir)
            .await?
            .into_iter()
            .filter(|name| kind.matches(name))
            .map(|name| format!("{}/{}", dir.trim_end_matches('/'), name))
            .collect();

        if built.is_empty() {
            return Err(KcacheError::NoArtifacts {
                dir: dir.to_string(),
            });
        }
        Ok(built)
    }

    async fn builder_identity(&self) -> String {
        match self.executor.run("hostname", &ExecOptions::new()).await {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                out.stdout.trim().to_string()
            }
            _ => self.executor.name().to_string(),
        }
    }

    async fn host_os_descriptor(&self) -> String {
        match OsInfo::detect(self.executor.as_ref()).await {
            Ok(info) => info.describe(),
            Err(e) => {
                warn!("Failed to read build machine OS: {}", e);
                "unknown".to_string()
            }
        }
    }
}
