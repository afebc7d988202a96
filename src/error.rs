//! Error types for kcache
//!
//! All modules use `KcacheResult<T>` as their return type.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for kcache operations
pub type KcacheResult<T> = Result<T, KcacheError>;

/// All errors that can occur in kcache
#[derive(Error, Debug)]
pub enum KcacheError {
    // Precondition errors
    #[error("Unsupported target OS: {0}. Kernel packaging requires a Debian-based distro.")]
    UnsupportedOs(String),

    #[error("Kernel source is on branch '{actual}', expected '{expected}'")]
    BranchMismatch { expected: String, actual: String },

    #[error("Kernel source tree not found: {0}")]
    SourceNotFound(String),

    // Tooling errors
    #[error("{step} failed: {command}, exit code: {code}\n{output}")]
    ToolFailed {
        step: String,
        command: String,
        code: i32,
        output: String,
    },

    #[error("Command timed out after {after:?}: {command}")]
    Timeout { command: String, after: Duration },

    #[error("No packages were generated in {dir}")]
    NoArtifacts { dir: String },

    #[error("No main linux-image package found for commit {commit_id}")]
    NoPrimaryArtifact { commit_id: String },

    // Cache errors
    #[error("Timed out after {waited:?} waiting for cache lock {path}")]
    CacheLockTimeout { path: String, waited: Duration },

    #[error("Failed to persist cache {path}: {reason}")]
    CachePersist { path: String, reason: String },

    // Package installation errors
    #[error("Not a valid package: {0}")]
    InvalidPackage(String),

    #[error("Failed to install {file}: {reason}")]
    InstallFailed { file: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl KcacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a build/packaging tool failure
    pub fn tool_failed(
        step: impl Into<String>,
        command: impl Into<String>,
        code: i32,
        output: impl Into<String>,
    ) -> Self {
        Self::ToolFailed {
            step: step.into(),
            command: command.into(),
            code,
            output: output.into(),
        }
    }

    /// Whether the error happened before any build work started
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedOs(_) | Self::BranchMismatch { .. } | Self::SourceNotFound(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::BranchMismatch { .. } => {
                Some("Check out the expected branch or drop --expect-branch")
            }
            Self::CacheLockTimeout { .. } => {
                Some("Another build may be writing the cache; retry, or remove a stale .lock directory")
            }
            Self::Timeout { .. } => Some("Raise build.package_timeout_secs in the config"),
            Self::NoPrimaryArtifact { .. } => Some("Rebuild without the cache: kcache package --no-cache"),
            Self::ConfigNotFound(_) => Some("Run: kcache config init"),
            _ => None,
        }
    }
}
