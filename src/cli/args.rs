//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// kcache - cached kernel package builds
///
/// Builds Debian kernel packages from a git tree on a build machine and
/// reuses the packages of previously built commits.
#[derive(Parser, Debug)]
#[command(name = "kcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (or reuse) the kernel package for a source tree
    Package(PackageArgs),

    /// Inspect the package cache
    Cache(CacheArgs),

    /// Install kernel packages on the build machine
    Install(InstallArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the package command
#[derive(Parser, Debug)]
pub struct PackageArgs {
    /// Git repository to clone (default: from config)
    #[arg(long)]
    pub repo: Option<String>,

    /// Branch, tag or commit to check out
    #[arg(long = "ref")]
    pub git_ref: Option<String>,

    /// Directory the source is checked out in
    #[arg(long)]
    pub work_dir: Option<String>,

    /// Always build, ignoring cached packages
    #[arg(long)]
    pub no_cache: bool,

    /// Refuse to build unless this branch is checked out
    #[arg(long)]
    pub expect_branch: Option<String>,

    /// Kernel config file on the build machine
    #[arg(long)]
    pub kernel_config: Option<String>,
}

/// Arguments for the install command
#[derive(Parser, Debug)]
pub struct InstallArgs {
    /// Directory holding the packages
    pub directory: String,

    /// Package files to install (comma-separated, default: all .deb files)
    #[arg(long, value_delimiter = ',', default_value = "*")]
    pub files: Vec<String>,

    /// Reboot after installing
    #[arg(long)]
    pub reboot: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for list command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache entries, most recently used first
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Check that every cache entry still has its packages on disk
    Verify,
}
