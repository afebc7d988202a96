//! Configuration schema for kcache
//!
//! Configuration is stored at `~/.config/kcache/config.toml`

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Machine the kernel is built on
    pub target: TargetConfig,

    /// Package cache settings
    pub cache: CacheConfig,

    /// Build and packaging settings
    pub build: BuildConfig,

    /// Kernel source location
    pub source: SourceConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// How commands reach the build machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Run on this machine
    Local,
    /// Run over the `ssh` client
    Ssh,
}

/// Build machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Local or ssh
    pub kind: TargetKind,

    /// SSH host name
    pub host: Option<String>,

    /// SSH user
    pub user: Option<String>,

    /// SSH port
    pub port: Option<u16>,

    /// SSH private key
    pub identity_file: Option<String>,

    /// Run privileged commands through `sudo -n`
    pub sudo: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            kind: TargetKind::Local,
            host: None,
            user: None,
            port: None,
            identity_file: None,
            sudo: true,
        }
    }
}

/// Package cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root on the build machine
    pub root: String,

    /// Maximum number of cache entries
    pub max_size: usize,

    /// How long to wait for the cache lock
    pub lock_timeout_secs: u64,

    /// Locks older than this are considered abandoned
    pub lock_stale_secs: u64,

    /// Delete the package directory of evicted entries
    pub prune_evicted: bool,
}

impl CacheConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: "/var/cache/kcache".to_string(),
            max_size: 100,
            lock_timeout_secs: 120,
            lock_stale_secs: 900,
            prune_evicted: true,
        }
    }
}

/// Build and packaging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Kernel config copied to `.config` before building
    pub kernel_config_file: Option<String>,

    /// Refuse to build unless this branch is checked out
    pub expected_branch: Option<String>,

    /// Patch files applied with `git apply`
    pub patches: Vec<String>,

    /// Parallel make jobs (default: nproc on the target)
    pub jobs: Option<u32>,

    /// Upper bound for the packaging step
    pub package_timeout_secs: u64,

    /// Packages installed before building
    pub build_packages: Vec<String>,
}

impl BuildConfig {
    pub fn package_timeout(&self) -> Duration {
        Duration::from_secs(self.package_timeout_secs)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            kernel_config_file: None,
            expected_branch: None,
            patches: vec![],
            jobs: None,
            package_timeout_secs: 60 * 60 * 2,
            build_packages: [
                "git",
                "build-essential",
                "bc",
                "bison",
                "flex",
                "libssl-dev",
                "libelf-dev",
                "dwarves",
                "rsync",
                "kmod",
                "cpio",
                "debhelper",
                "fakeroot",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

/// Kernel source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Git repository URL
    pub repo: Option<String>,

    /// Branch, tag or commit to check out
    pub git_ref: Option<String>,

    /// Directory the checkout lives in
    pub work_dir: String,

    /// Checkout directory name
    pub name: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repo: None,
            git_ref: None,
            work_dir: "/tmp/kcache/src".to_string(),
            name: "linux".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("[target]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.max_size, 100);
        assert_eq!(config.target.kind, TargetKind::Local);
        assert_eq!(config.build.package_timeout(), Duration::from_secs(7200));
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [cache]
            root = "/srv/kcache"
            max_size = 5

            [target]
            kind = "ssh"
            host = "builder-01"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.root, "/srv/kcache");
        assert_eq!(config.cache.max_size, 5);
        assert!(config.cache.prune_evicted); // default preserved
        assert_eq!(config.target.kind, TargetKind::Ssh);
        assert_eq!(config.target.host.as_deref(), Some("builder-01"));
    }
}
