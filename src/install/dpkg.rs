//! `dpkg` on the target

use crate::cache::PackageKind;
use crate::error::{KcacheError, KcacheResult};
use crate::target::{shell_quote, ExecOptions, RemoteExecutor};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Dpkg {
    executor: Arc<dyn RemoteExecutor>,
}

impl Dpkg {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    fn install_options(force: bool) -> &'static str {
        if force {
            "-i --force-all"
        } else {
            "-i"
        }
    }

    /// Whether `path` is a readable Debian package
    pub async fn is_valid_package(&self, path: &str) -> KcacheResult<bool> {
        let command = format!("dpkg --info {}", shell_quote(path));
        let output = self
            .executor
            .run(&command, &ExecOptions::new().sudo())
            .await?;
        Ok(output.success())
    }

    /// Install one package file
    pub async fn install_local_package(&self, path: &str, force: bool) -> KcacheResult<()> {
        let command = format!("dpkg {} {}", Self::install_options(force), shell_quote(path));
        debug!("Installing {}", path);
        self.executor
            .run(&command, &ExecOptions::new().sudo())
            .await?
            .check("install", &command)
            .map_err(|e| KcacheError::InstallFailed {
                file: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Install every `.deb` in `dir` in one transaction, then let apt resolve
    /// missing dependencies
    pub async fn install_packages_in_directory(&self, dir: &str, force: bool) -> KcacheResult<()> {
        let command = format!(
            "dpkg {} {}/*.deb",
            Self::install_options(force),
            shell_quote(dir.trim_end_matches('/'))
        );
        self.executor
            .run(&command, &ExecOptions::new().sudo())
            .await?
            .check("install", &command)
            .map_err(|e| KcacheError::InstallFailed {
                file: format!("{}/*.deb", dir.trim_end_matches('/')),
                reason: e.to_string(),
            })?;

        info!("Resolving package dependencies");
        let fix = "DEBIAN_FRONTEND=noninteractive apt-get -f install -y";
        self.executor
            .run(fix, &ExecOptions::new().sudo())
            .await?
            .check("dependency resolution", fix)?;
        Ok(())
    }

    /// Paths of `.deb` files in `dir`, sorted by name
    pub async fn debs_in_directory(&self, dir: &str) -> KcacheResult<Vec<String>> {
        let dir = dir.trim_end_matches('/');
        Ok(self
            .executor
            .list_dir(dir)
            .await?
            .into_iter()
            .filter(|name| PackageKind::Deb.matches(name))
            .map(|name| format!("{}/{}", dir, name))
            .collect())
    }

    /// The `.deb` files in `dir` that dpkg cannot read
    pub async fn validate_all_debs_in_directory(&self, dir: &str) -> KcacheResult<Vec<String>> {
        let mut invalid = vec![];
        for deb in self.debs_in_directory(dir).await? {
            if !self.is_valid_package(&deb).await? {
                invalid.push(deb);
            }
        }
        Ok(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::memory::MemoryExecutor;
    use crate::target::ExecOutput;

    #[tokio::test]
    async fn validity_follows_dpkg_exit_code() {
        let exec = Arc::new(MemoryExecutor::new());
        exec.respond("broken.deb", ExecOutput::failed(2, "not a Debian format archive"));
        let dpkg = Dpkg::new(exec.clone());

        assert!(dpkg.is_valid_package("/pkgs/good.deb").await.unwrap());
        assert!(!dpkg.is_valid_package("/pkgs/broken.deb").await.unwrap());
        assert!(exec.options_for("dpkg --info").unwrap().sudo);
    }

    #[tokio::test]
    async fn forced_install() {
        let exec = Arc::new(MemoryExecutor::new());
        let dpkg = Dpkg::new(exec.clone());

        dpkg.install_local_package("/pkgs/a.deb", true).await.unwrap();
        dpkg.install_local_package("/pkgs/b.deb", false).await.unwrap();

        assert_eq!(
            exec.commands(),
            vec!["dpkg -i --force-all '/pkgs/a.deb'", "dpkg -i '/pkgs/b.deb'"]
        );
    }

    #[tokio::test]
    async fn install_failure_names_the_file() {
        let exec = Arc::new(MemoryExecutor::new());
        exec.respond("dpkg -i", ExecOutput::failed(1, "dependency problems"));
        let dpkg = Dpkg::new(exec);

        let err = dpkg.install_local_package("/pkgs/a.deb", true).await.unwrap_err();
        match err {
            KcacheError::InstallFailed { file, reason } => {
                assert_eq!(file, "/pkgs/a.deb");
                assert!(reason.contains("dependency problems"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn directory_install_fixes_dependencies() {
        let exec = Arc::new(MemoryExecutor::new());
        let dpkg = Dpkg::new(exec.clone());

        dpkg.install_packages_in_directory("/pkgs/", true).await.unwrap();

        assert_eq!(
            exec.commands(),
            vec![
                "dpkg -i --force-all '/pkgs'/*.deb",
                "DEBIAN_FRONTEND=noninteractive apt-get -f install -y",
            ]
        );
    }

    #[tokio::test]
    async fn reports_invalid_debs() {
        let exec = Arc::new(MemoryExecutor::new());
        exec.add_file("/pkgs/linux-image.deb", "x");
        exec.add_file("/pkgs/corrupt.deb", "x");
        exec.add_file("/pkgs/README", "x");
        exec.respond("corrupt.deb", ExecOutput::failed(2, "bad"));
        let dpkg = Dpkg::new(exec);

        let invalid = dpkg.validate_all_debs_in_directory("/pkgs").await.unwrap();
        assert_eq!(invalid, vec!["/pkgs/corrupt.deb"]);
    }
}
