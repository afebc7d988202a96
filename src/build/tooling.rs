//! Build tool invocation on the target

use crate::config::schema::BuildConfig;
use crate::error::{KcacheError, KcacheResult};
use crate::target::{shell_quote, ExecOptions, ExecOutput, OsInfo, RemoteExecutor};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Kernel config options that reference distro signing keys absent on builders
const DISABLED_KEY_OPTIONS: &[&str] = &["SYSTEM_TRUSTED_KEYS", "SYSTEM_REVOCATION_KEYS"];

/// Build/package delegate used by the pipeline
#[async_trait]
pub trait BuildTooling: Send + Sync {
    /// Install compilers and packaging helpers
    async fn install_build_tools(&self) -> KcacheResult<()>;

    /// Apply configured source modifications
    async fn modify_code(&self, code_path: &str) -> KcacheResult<()>;

    /// Configure the tree and optionally compile it
    async fn build_code(
        &self,
        code_path: &str,
        config_file: Option<&str>,
        kernel_version: &str,
        skip_plain_build: bool,
    ) -> KcacheResult<()>;

    /// Build installable packages into the parent of `code_path`
    async fn package(&self, code_path: &str, timeout: Duration) -> KcacheResult<()>;
}

/// `make`-based kernel build on a Debian-family machine
pub struct DebianMakeTooling {
    executor: Arc<dyn RemoteExecutor>,
    config: BuildConfig,
}

impl DebianMakeTooling {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: BuildConfig) -> Self {
        Self { executor, config }
    }

    fn jobs(&self) -> String {
        match self.config.jobs {
            Some(jobs) => jobs.max(1).to_string(),
            None => "$(nproc)".to_string(),
        }
    }

    async fn run_step(
        &self,
        step: &str,
        command: &str,
        options: &ExecOptions,
    ) -> KcacheResult<ExecOutput> {
        debug!("{}: {}", step, command);
        self.executor.run(command, options).await?.check(step, command)
    }
}

#[async_trait]
impl BuildTooling for DebianMakeTooling {
    async fn install_build_tools(&self) -> KcacheResult<()> {
        let os = OsInfo::detect(self.executor.as_ref()).await?;
        if !os.is_debian_family() {
            return Err(KcacheError::UnsupportedOs(os.describe()));
        }

        if self.config.build_packages.is_empty() {
            debug!("No build packages configured");
            return Ok(());
        }

        info!("Installing {} build packages", self.config.build_packages.len());
        let sudo = ExecOptions::new().sudo();
        self.run_step("package index update", "apt-get update", &sudo)
            .await?;

        let packages: Vec<String> = self
            .config
            .build_packages
            .iter()
            .map(|p| shell_quote(p))
            .collect();
        let command = format!(
            "DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
            packages.join(" ")
        );
        self.run_step("build tool installation", &command, &sudo)
            .await?;
        Ok(())
    }

    async fn modify_code(&self, code_path: &str) -> KcacheResult<()> {
        for patch in &self.config.patches {
            info!("Applying patch {}", patch);
            let command = format!("git apply {}", shell_quote(patch));
            self.run_step("patch", &command, &ExecOptions::new().cwd(code_path))
                .await?;
        }
        Ok(())
    }

    async fn build_code(
        &self,
        code_path: &str,
        config_file: Option<&str>,
        kernel_version: &str,
        skip_plain_build: bool,
    ) -> KcacheResult<()> {
        let in_tree = ExecOptions::new().cwd(code_path);

        match config_file {
            Some(file) => {
                info!("Using kernel config {}", file);
                let command = format!("cp {} .config", shell_quote(file));
                self.run_step("kernel config", &command, &in_tree).await?;
            }
            None => {
                if !self
                    .executor
                    .file_exists(&format!("{}/.config", code_path))
                    .await?
                {
                    info!("No kernel config given, generating defconfig");
                    self.run_step("kernel config", "make defconfig", &in_tree)
                        .await?;
                }
            }
        }

        self.run_step("kernel config", "make olddefconfig", &in_tree)
            .await?;

        let disable: Vec<String> = DISABLED_KEY_OPTIONS
            .iter()
            .map(|opt| format!("--disable {}", opt))
            .collect();
        let command = format!("scripts/config {}", disable.join(" "));
        self.run_step("kernel config", &command, &in_tree).await?;

        if skip_plain_build {
            debug!("Skipping plain build of {}; packaging builds the tree", kernel_version);
            return Ok(());
        }

        info!("Building kernel {}", kernel_version);
        let command = format!("make -j{}", self.jobs());
        self.run_step("kernel build", &command, &in_tree).await?;
        Ok(())
    }

    async fn package(&self, code_path: &str, timeout: Duration) -> KcacheResult<()> {
        let command = format!("make -j{} bindeb-pkg", self.jobs());
        info!("Packaging kernel (timeout {:?}): {}", timeout, command);
        self.run_step(
            "packaging",
            &command,
            &ExecOptions::new().cwd(code_path).timeout(timeout),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::memory::MemoryExecutor;

    fn tooling(exec: &Arc<MemoryExecutor>, config: BuildConfig) -> DebianMakeTooling {
        DebianMakeTooling::new(exec.clone(), config)
    }

    #[tokio::test]
    async fn rejects_non_debian_target() {
        let exec = Arc::new(MemoryExecutor::new());
        exec.add_file("/etc/os-release", "ID=fedora\nPRETTY_NAME=\"Fedora Linux 40\"\n");

        let err = tooling(&exec, BuildConfig::default())
            .install_build_tools()
            .await
            .unwrap_err();

        assert!(matches!(err, KcacheError::UnsupportedOs(ref os) if os == "Fedora Linux 40"));
        assert!(exec.commands().is_empty());
    }

    #[tokio::test]
    async fn installs_packages_with_sudo() {
        let exec = Arc::new(MemoryExecutor::new());
        exec.add_file("/etc/os-release", "ID=ubuntu\nID_LIKE=debian\n");
        let config = BuildConfig {
            build_packages: vec!["bc".to_string(), "flex".to_string()],
            ..Default::default()
        };

        tooling(&exec, config).install_build_tools().await.unwrap();

        assert!(exec.ran("apt-get update"));
        assert!(exec.ran("apt-get install -y 'bc' 'flex'"));
        assert!(exec.options_for("apt-get install").unwrap().sudo);
    }

    #[tokio::test]
    async fn applies_patches_in_order() {
        let exec = Arc::new(MemoryExecutor::new());
        let config = BuildConfig {
            patches: vec!["/patches/0001.patch".to_string(), "/patches/0002.patch".to_string()],
            ..Default::default()
        };

        tooling(&exec, config).modify_code("/work/linux").await.unwrap();

        assert_eq!(
            exec.commands(),
            vec![
                "git apply '/patches/0001.patch'",
                "git apply '/patches/0002.patch'",
            ]
        );
    }

    #[tokio::test]
    async fn failed_patch_stops_the_build() {
        let exec = Arc::new(MemoryExecutor::new());
        exec.respond("0001", ExecOutput::failed(1, "error: patch failed"));
        let config = BuildConfig {
            patches: vec!["/patches/0001.patch".to_string(), "/patches/0002.patch".to_string()],
            ..Default::default()
        };

        let err = tooling(&exec, config).modify_code("/work/linux").await.unwrap_err();

        assert!(matches!(err, KcacheError::ToolFailed { ref step, .. } if step == "patch"));
        assert!(!exec.ran("0002"));
    }

    #[tokio::test]
    async fn configures_with_given_config_and_skips_plain_build() {
        let exec = Arc::new(MemoryExecutor::new());

        tooling(&exec, BuildConfig::default())
            .build_code("/work/linux", Some("/configs/azure.config"), "6.1.0", true)
            .await
            .unwrap();

        let commands = exec.commands();
        assert_eq!(commands[0], "cp '/configs/azure.config' .config");
        assert_eq!(commands[1], "make olddefconfig");
        assert!(commands[2].contains("--disable SYSTEM_TRUSTED_KEYS"));
        assert!(commands[2].contains("--disable SYSTEM_REVOCATION_KEYS"));
        assert_eq!(commands.len(), 3);
    }

    #[tokio::test]
    async fn generates_defconfig_and_builds() {
        let exec = Arc::new(MemoryExecutor::new());
        let config = BuildConfig {
            jobs: Some(8),
            ..Default::default()
        };

        tooling(&exec, config)
            .build_code("/work/linux", None, "6.1.0", false)
            .await
            .unwrap();

        assert!(exec.ran("make defconfig"));
        assert_eq!(exec.commands().last().map(String::as_str), Some("make -j8"));
    }

    #[tokio::test]
    async fn keeps_existing_config() {
        let exec = Arc::new(MemoryExecutor::new());
        exec.add_file("/work/linux/.config", "CONFIG_X=y");

        tooling(&exec, BuildConfig::default())
            .build_code("/work/linux", None, "6.1.0", true)
            .await
            .unwrap();

        assert!(!exec.ran("make defconfig"));
    }

    #[tokio::test]
    async fn packaging_is_bounded_by_timeout() {
        let exec = Arc::new(MemoryExecutor::new());

        tooling(&exec, BuildConfig::default())
            .package("/work/linux", Duration::from_secs(600))
            .await
            .unwrap();

        let options = exec.options_for("bindeb-pkg").unwrap();
        assert_eq!(options.timeout, Some(Duration::from_secs(600)));
        assert_eq!(options.cwd.as_deref(), Some("/work/linux"));
        assert!(exec.ran("make -j$(nproc) bindeb-pkg"));
    }
}
