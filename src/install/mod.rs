//! Installing built kernel packages on a Debian-family machine

mod dpkg;

pub use dpkg::Dpkg;

use crate::cache::artifact::file_name;
use crate::error::{KcacheError, KcacheResult};
use crate::target::{shell_quote, ExecOptions, OsInfo, RemoteExecutor};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// File selector meaning every `.deb` in the directory
pub const ALL_FILES: &str = "*";

/// What an install run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub failed: Vec<String>,
}

impl InstallReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct DebInstaller {
    executor: Arc<dyn RemoteExecutor>,
    dpkg: Dpkg,
}

impl DebInstaller {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            dpkg: Dpkg::new(executor.clone()),
            executor,
        }
    }

    fn installs_all(files: &[String]) -> bool {
        files.is_empty() || (files.len() == 1 && files[0] == ALL_FILES)
    }

    async fn running_kernel(&self) -> String {
        match self.executor.run("uname -r", &ExecOptions::new()).await {
            Ok(out) if out.success() => out.stdout.trim().to_string(),
            _ => "unknown".to_string(),
        }
    }

    /// Reject the run before anything is installed
    async fn validate(&self, dir: &str, files: &[String]) -> KcacheResult<()> {
        let os = OsInfo::detect(self.executor.as_ref()).await?;
        if !os.is_debian_family() {
            return Err(KcacheError::UnsupportedOs(os.describe()));
        }

        if Self::installs_all(files) {
            let invalid = self.dpkg.validate_all_debs_in_directory(dir).await?;
            if !invalid.is_empty() {
                return Err(KcacheError::InvalidPackage(invalid.join(", ")));
            }
            return Ok(());
        }

        for file in files {
            let path = format!("{}/{}", dir, file);
            if self.executor.file_exists(&path).await? && !self.dpkg.is_valid_package(&path).await? {
                return Err(KcacheError::InvalidPackage(path));
            }
        }
        Ok(())
    }

    /// Install packages from `directory` and optionally reboot
    ///
    /// `files` are names relative to `directory`; `["*"]` (or nothing)
    /// installs every `.deb` there. Missing or failing named files are
    /// reported in [`InstallReport::failed`] rather than aborting the run.
    pub async fn install(
        &self,
        directory: &str,
        files: &[String],
        reboot: bool,
    ) -> KcacheResult<InstallReport> {
        let dir = directory.trim_end_matches('/');
        self.validate(dir, files).await?;

        info!("Kernel version before installation: {}", self.running_kernel().await);
        self.log_directory(dir).await;

        let mut report = InstallReport::default();
        if Self::installs_all(files) {
            let debs = self.dpkg.debs_in_directory(dir).await?;
            if debs.is_empty() {
                warn!("No .deb files found in {}. Skipping installation.", dir);
                return Ok(report);
            }
            info!("Installing all {} .deb packages in {}", debs.len(), dir);
            self.dpkg.install_packages_in_directory(dir, true).await?;
            report.installed = debs.iter().map(|p| file_name(p).to_string()).collect();
        } else {
            info!("Installing packages: {}", files.join(", "));
            for file in files {
                let path = format!("{}/{}", dir, file);
                if !self.executor.file_exists(&path).await? {
                    error!("File not found: {}. Skipping.", path);
                    report.failed.push(file.clone());
                    continue;
                }
                match self.dpkg.install_local_package(&path, true).await {
                    Ok(()) => report.installed.push(file.clone()),
                    Err(e) => {
                        error!("Failed to install {}: {}", path, e);
                        report.failed.push(file.clone());
                    }
                }
            }
            if !report.failed.is_empty() {
                warn!("Failed to install: {}", report.failed.join(", "));
            }
        }

        if reboot {
            info!("Rebooting {} after package installation", self.executor.name());
            let command = "systemctl reboot";
            match self.executor.run(command, &ExecOptions::new().sudo()).await {
                Ok(out) if out.success() => {}
                Ok(out) => error!("Reboot failed: exit code {}: {}", out.exit_code, out.stderr.trim()),
                Err(e) => error!("Reboot failed: {}", e),
            }
        } else {
            info!("Kernel version after installation: {}", self.running_kernel().await);
        }

        Ok(report)
    }

    async fn log_directory(&self, dir: &str) {
        let command = format!("ls -l {}", shell_quote(dir));
        if let Ok(out) = self.executor.run(&command, &ExecOptions::new()).await {
            debug!("Contents of {} before installation:\n{}", dir, out.stdout.trim_end());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::memory::MemoryExecutor;
    use crate::target::ExecOutput;

    fn debian() -> Arc<MemoryExecutor> {
        let exec = Arc::new(MemoryExecutor::new());
        exec.add_file("/etc/os-release", "ID=ubuntu\nID_LIKE=debian\n");
        exec.respond("uname -r", ExecOutput::ok("5.15.0-1\n"));
        exec
    }

    fn names(files: &[&str]) -> Vec<String> {
        files.iter().map(|f| f.to_string()).collect()
    }

    #[tokio::test]
    async fn requires_debian_family() {
        let exec = Arc::new(MemoryExecutor::new());
        exec.add_file("/etc/os-release", "ID=centos\n");

        let err = DebInstaller::new(exec.clone())
            .install("/pkgs", &names(&["*"]), false)
            .await
            .unwrap_err();

        assert!(matches!(err, KcacheError::UnsupportedOs(_)));
        assert!(!exec.ran("dpkg -i"));
    }

    #[tokio::test]
    async fn installs_whole_directory() {
        let exec = debian();
        exec.add_file("/pkgs/linux-image-6.1.deb", "x");
        exec.add_file("/pkgs/linux-headers-6.1.deb", "x");

        let report = DebInstaller::new(exec.clone())
            .install("/pkgs/", &names(&["*"]), false)
            .await
            .unwrap();

        assert_eq!(
            report.installed,
            vec!["linux-headers-6.1.deb", "linux-image-6.1.deb"]
        );
        assert!(report.is_success());
        assert!(exec.ran("dpkg -i --force-all '/pkgs'/*.deb"));
        assert!(exec.ran("apt-get -f install -y"));
        assert!(!exec.ran("reboot"));
    }

    #[tokio::test]
    async fn empty_directory_is_a_warning() {
        let exec = debian();
        exec.add_dir("/pkgs");

        let report = DebInstaller::new(exec.clone())
            .install("/pkgs", &[], true)
            .await
            .unwrap();

        assert_eq!(report, InstallReport::default());
        assert!(!exec.ran("dpkg -i"));
        assert!(!exec.ran("reboot"));
    }

    #[tokio::test]
    async fn invalid_package_aborts_before_install() {
        let exec = debian();
        exec.add_file("/pkgs/linux-image-6.1.deb", "x");
        exec.respond("dpkg --info '/pkgs/linux-image-6.1.deb'", ExecOutput::failed(2, "bad"));

        let err = DebInstaller::new(exec.clone())
            .install("/pkgs", &names(&["linux-image-6.1.deb"]), false)
            .await
            .unwrap_err();

        assert!(matches!(err, KcacheError::InvalidPackage(_)));
        assert!(!exec.ran("dpkg -i"));
    }

    #[tokio::test]
    async fn named_files_report_missing_and_failed() {
        let exec = debian();
        exec.add_file("/pkgs/good.deb", "x");
        exec.add_file("/pkgs/conflict.deb", "x");
        exec.respond("dpkg -i --force-all '/pkgs/conflict.deb'", ExecOutput::failed(1, "conflict"));

        let report = DebInstaller::new(exec)
            .install(
                "/pkgs",
                &names(&["good.deb", "missing.deb", "conflict.deb"]),
                false,
            )
            .await
            .unwrap();

        assert_eq!(report.installed, vec!["good.deb"]);
        assert_eq!(report.failed, vec!["missing.deb", "conflict.deb"]);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn reboot_failure_is_not_fatal() {
        let exec = debian();
        exec.add_file("/pkgs/linux-image-6.1.deb", "x");
        exec.respond("systemctl reboot", ExecOutput::failed(1, "access denied"));

        let report = DebInstaller::new(exec.clone())
            .install("/pkgs", &names(&["*"]), true)
            .await
            .unwrap();

        assert_eq!(report.installed.len(), 1);
        assert!(exec.options_for("systemctl reboot").unwrap().sudo);
    }
}
