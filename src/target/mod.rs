//! Build machine access
//!
//! Provides a narrow executor interface over the machine that builds and
//! stores kernel packages:
//! - Local: commands run on this machine
//! - Ssh: commands run on a remote host through the `ssh` client

mod executor;
mod factory;
mod local;
#[cfg(test)]
pub(crate) mod memory;
mod os;
mod ssh;

pub use executor::{ExecOptions, ExecOutput, RemoteExecutor};
pub use factory::create_executor;
pub use local::LocalExecutor;
pub use os::OsInfo;
pub use ssh::SshExecutor;

/// Max number of output lines to include in tool error messages.
const TOOL_ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of tool output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `TOOL_ERROR_TAIL_LINES`
/// lines so a failed kernel build is actionable without dumping the whole log.
pub(crate) fn build_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > TOOL_ERROR_TAIL_LINES {
        lines[total - TOOL_ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}

/// Quote a string for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
