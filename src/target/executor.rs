//! Remote executor abstraction
//!
//! Every interaction with the build machine goes through this trait so that
//! the cache and the build pipeline never assemble ad hoc shell pipelines.

use crate::error::{KcacheError, KcacheResult};
use crate::target::build_error_output;
use async_trait::async_trait;
use std::time::Duration;

/// Options for a single command
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory on the target
    pub cwd: Option<String>,
    /// Run with elevated privileges (if the executor allows it)
    pub sudo: bool,
    /// Kill the command and fail after this long
    pub timeout: Option<Duration>,
    /// Data written to the command's stdin
    pub stdin: Option<String>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// Result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a `ToolFailed` error for `step`
    pub fn check(self, step: &str, command: &str) -> KcacheResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(KcacheError::tool_failed(
                step,
                command,
                self.exit_code,
                build_error_output(&self.stdout, &self.stderr),
            ))
        }
    }
}

/// Capability interface for the machine that builds and stores packages
///
/// Paths are POSIX paths on the target, passed as strings because the target
/// is not necessarily the machine running kcache.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command and wait for it
    async fn run(&self, command: &str, options: &ExecOptions) -> KcacheResult<ExecOutput>;

    /// Check whether a file or directory exists
    async fn file_exists(&self, path: &str) -> KcacheResult<bool>;

    /// Read a whole file, `None` if it does not exist
    async fn read_file(&self, path: &str) -> KcacheResult<Option<String>>;

    /// Replace a file's contents; readers never see a partial write
    async fn write_file(&self, path: &str, contents: &str) -> KcacheResult<()>;

    /// Create a directory and its parents, applying `mode` to the leaf
    async fn create_dir_all(&self, path: &str, mode: u32) -> KcacheResult<()>;

    /// Atomically create a single directory; `false` if it already exists
    async fn try_create_dir(&self, path: &str) -> KcacheResult<bool>;

    /// Move a file or directory; a file destination is replaced, a non-empty
    /// directory destination is an error
    async fn rename(&self, from: &str, to: &str) -> KcacheResult<()>;

    /// File names directly inside `path`, sorted; empty if `path` is missing
    async fn list_dir(&self, path: &str) -> KcacheResult<Vec<String>>;

    /// Remove a file or directory tree; missing paths are not an error
    async fn remove_path(&self, path: &str) -> KcacheResult<()>;

    /// Human-readable name of the target
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_builder() {
        let opts = ExecOptions::new()
            .cwd("/src/linux")
            .sudo()
            .timeout(Duration::from_secs(5));
        assert_eq!(opts.cwd.as_deref(), Some("/src/linux"));
        assert!(opts.sudo);
        assert_eq!(opts.timeout, Some(Duration::from_secs(5)));
        assert!(opts.stdin.is_none());
    }

    #[test]
    fn check_passes_success_through() {
        let out = ExecOutput::ok("5.4.0\n").check("kernel version", "make kernelversion");
        assert_eq!(out.unwrap().stdout, "5.4.0\n");
    }

    #[test]
    fn check_maps_failure() {
        let err = ExecOutput::failed(2, "make: *** No rule")
            .check("packaging", "make bindeb-pkg")
            .unwrap_err();
        match err {
            KcacheError::ToolFailed {
                step, code, output, ..
            } => {
                assert_eq!(step, "packaging");
                assert_eq!(code, 2);
                assert!(output.contains("No rule"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
