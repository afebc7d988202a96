//! Kernel source acquisition
//!
//! The cache key is derived from the checked-out tree, so the source is
//! fetched before any cache decision is made.

use crate::config::schema::SourceConfig;
use crate::error::{KcacheError, KcacheResult};
use crate::target::{shell_quote, ExecOptions, RemoteExecutor};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Where the kernel source comes from and where it is checked out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Repository to clone; `None` builds an existing checkout without fetching
    pub repo: Option<String>,
    /// Branch, tag or commit to check out
    pub git_ref: Option<String>,
    /// Parent directory of the checkout, also where packages are generated
    pub work_dir: String,
    /// Checkout directory name
    pub name: String,
}

impl SourceLocation {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            repo: config.repo.clone(),
            git_ref: config.git_ref.clone(),
            work_dir: config.work_dir.trim_end_matches('/').to_string(),
            name: config.name.clone(),
        }
    }

    /// Path of the checkout on the target
    pub fn code_path(&self) -> String {
        format!("{}/{}", self.work_dir, self.name)
    }
}

/// Source collaborator used by the orchestrator and the build pipeline
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Make the tree available and return its path
    async fn get_source_code(&self, location: &SourceLocation) -> KcacheResult<String>;

    /// Revision currently checked out at `path`
    async fn get_latest_commit_id(&self, path: &str) -> KcacheResult<String>;

    /// Branch currently checked out at `path` (`HEAD` when detached)
    async fn get_current_branch(&self, path: &str) -> KcacheResult<String>;

    /// Kernel version reported by the tree's build system
    async fn get_kernel_version(&self, path: &str) -> KcacheResult<String>;
}

/// Git checkout on the build machine
pub struct GitSource {
    executor: Arc<dyn RemoteExecutor>,
}

impl GitSource {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    async fn git(&self, step: &str, path: &str, args: &str) -> KcacheResult<String> {
        let command = format!("git {}", args);
        let output = self
            .executor
            .run(&command, &ExecOptions::new().cwd(path))
            .await?
            .check(step, &command)?;
        Ok(output.stdout.trim().to_string())
    }

    /// Drop local modifications, e.g. patches applied by an earlier build
    async fn restore_tree(&self, path: &str) -> KcacheResult<()> {
        debug!("Restoring {} to its checked-out commit", path);
        self.git("restore tree", path, "reset --hard HEAD").await?;
        self.git("restore tree", path, "clean -fd").await?;
        Ok(())
    }

    async fn has_remote_branch(&self, path: &str, branch: &str) -> KcacheResult<bool> {
        let command = format!(
            "git rev-parse --verify --quiet {}",
            shell_quote(&format!("refs/remotes/origin/{}", branch))
        );
        let output = self
            .executor
            .run(&command, &ExecOptions::new().cwd(path))
            .await?;
        Ok(output.success())
    }

    /// Move the current branch to the tip of its upstream, if it has one
    async fn follow_upstream(&self, path: &str) -> KcacheResult<()> {
        let command = "git rev-parse --abbrev-ref --symbolic-full-name '@{u}'";
        let output = self
            .executor
            .run(command, &ExecOptions::new().cwd(path))
            .await?;
        let upstream = output.stdout.trim();
        if !output.success() || upstream.is_empty() {
            debug!("No upstream branch for {}, keeping HEAD", path);
            return Ok(());
        }

        info!("Updating to {}", upstream);
        self.git("update", path, &format!("reset --hard {}", shell_quote(upstream)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SourceProvider for GitSource {
    async fn get_source_code(&self, location: &SourceLocation) -> KcacheResult<String> {
        let path = location.code_path();
        let checked_out = self.executor.file_exists(&format!("{}/.git", path)).await?;

        match (&location.repo, checked_out) {
            (Some(repo), false) => {
                info!("Cloning {} into {}", repo, path);
                self.executor
                    .create_dir_all(&location.work_dir, 0o755)
                    .await?;
                let command = format!("git clone {} {}", shell_quote(repo), shell_quote(&path));
                self.executor
                    .run(&command, &ExecOptions::new().cwd(&location.work_dir))
                    .await?
                    .check("clone", &command)?;
            }
            (Some(_), true) => {
                debug!("Updating existing checkout at {}", path);
                self.git("fetch", &path, "fetch --tags origin").await?;
                self.restore_tree(&path).await?;
            }
            (None, true) => {
                debug!("Using existing checkout at {}", path);
                self.restore_tree(&path).await?;
            }
            (None, false) => return Err(KcacheError::SourceNotFound(path)),
        }

        let remote = location.repo.is_some();
        let remote_branch = match &location.git_ref {
            Some(git_ref) if remote => self.has_remote_branch(&path, git_ref).await?,
            _ => false,
        };
        match &location.git_ref {
            Some(git_ref) if remote_branch => {
                // Local branch reset to the fetched tip, keeping the branch name
                info!("Checking out branch {} at origin/{}", git_ref, git_ref);
                let args = format!(
                    "checkout -B {} {}",
                    shell_quote(git_ref),
                    shell_quote(&format!("origin/{}", git_ref))
                );
                self.git("checkout", &path, &args).await?;
            }
            Some(git_ref) => {
                info!("Checking out {}", git_ref);
                self.git("checkout", &path, &format!("checkout {}", shell_quote(git_ref)))
                    .await?;
            }
            None if remote => self.follow_upstream(&path).await?,
            None => {}
        }

        Ok(path)
    }

    async fn get_latest_commit_id(&self, path: &str) -> KcacheResult<String> {
        self.git("commit id", path, "rev-parse HEAD").await
    }

    async fn get_current_branch(&self, path: &str) -> KcacheResult<String> {
        self.git("current branch", path, "rev-parse --abbrev-ref HEAD")
            .await
    }

    async fn get_kernel_version(&self, path: &str) -> KcacheResult<String> {
        let command = "make -s kernelversion 2>/dev/null";
        let output = self
            .executor
            .run(command, &ExecOptions::new().cwd(path))
            .await?
            .check("kernel version", command)?;
        let version = output.stdout.trim().to_string();
        if version.is_empty() {
            return Err(KcacheError::tool_failed(
                "kernel version",
                command,
                0,
                "empty output",
            ));
        }
        Ok(version)
    }
}
