//! Executor for a build machine reached over the `ssh` client

use crate::config::schema::TargetConfig;
use crate::error::{KcacheError, KcacheResult};
use crate::target::executor::{ExecOptions, ExecOutput, RemoteExecutor};
use crate::target::shell_quote;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Grace period before coreutils `timeout` escalates to SIGKILL
const REMOTE_KILL_AFTER: Duration = Duration::from_secs(10);

/// Extra local wait on top of a remote timeout before dropping the connection
const LOCAL_TIMEOUT_SLACK: Duration = Duration::from_secs(30);

/// Exit codes of coreutils `timeout` when the deadline fired (TERM, then KILL)
const REMOTE_TIMEOUT_CODES: [i32; 2] = [124, 137];

/// Runs every operation as a shell command on the remote host
pub struct SshExecutor {
    host: String,
    user: Option<String>,
    port: Option<u16>,
    identity_file: Option<String>,
    allow_sudo: bool,
}

impl SshExecutor {
    /// Create an executor from the target section of the config
    pub fn from_config(config: &TargetConfig) -> KcacheResult<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| KcacheError::User("target.host is required for ssh targets".to_string()))?;

        Ok(Self {
            host,
            user: config.user.clone(),
            port: config.port,
            identity_file: config.identity_file.clone(),
            allow_sudo: config.sudo,
        })
    }

    fn destination(&self) -> String {
        match self.user {
            Some(ref user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Arguments passed to the local `ssh` binary
    fn ssh_args(&self, remote_command: String) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
        ];

        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(ref key) = self.identity_file {
            args.push("-i".to_string());
            args.push(key.clone());
        }

        args.push(self.destination());
        args.push("--".to_string());
        args.push(remote_command);
        args
    }

    /// Wrap a command so it runs in `cwd`, optionally under sudo
    ///
    /// With a timeout the shell runs under coreutils `timeout`, which signals
    /// its whole process group on the remote side when the deadline passes.
    fn remote_command(&self, command: &str, options: &ExecOptions) -> String {
        let script = match options.cwd {
            Some(ref cwd) => format!("cd {} && {}", shell_quote(cwd), command),
            None => command.to_string(),
        };

        let shell = match options.timeout {
            Some(limit) => format!(
                "timeout --kill-after={}s {:.3}s sh -c {}",
                REMOTE_KILL_AFTER.as_secs(),
                limit.as_secs_f64(),
                shell_quote(&script)
            ),
            None => format!("sh -c {}", shell_quote(&script)),
        };

        if options.sudo && self.allow_sudo {
            format!("sudo -n {}", shell)
        } else {
            shell
        }
    }

    /// Run a command that mutates the cache or package directories
    async fn run_privileged(&self, command: &str) -> KcacheResult<ExecOutput> {
        self.run(command, &ExecOptions::new().sudo()).await
    }

    async fn run_checked(&self, command: &str, what: &str) -> KcacheResult<ExecOutput> {
        let output = self.run_privileged(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(KcacheError::command_exec(what, output.stderr.trim()))
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, command: &str, options: &ExecOptions) -> KcacheResult<ExecOutput> {
        let remote = self.remote_command(command, options);
        debug!("Executing on {}: {}", self.host, remote);

        let mut child = Command::new("ssh")
            .args(self.ssh_args(remote))
            .stdin(if options.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KcacheError::command_failed(format!("ssh {}", self.host), e))?;

        if let Some(ref input) = options.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| KcacheError::command_failed(command, e))?;
            }
        }

        let wait = child.wait_with_output();
        let output = match options.timeout {
            // Backstop only; the remote `timeout` normally fires first
            Some(limit) => tokio::time::timeout(limit + LOCAL_TIMEOUT_SLACK, wait)
                .await
                .map_err(|_| KcacheError::Timeout {
                    command: command.to_string(),
                    after: limit,
                })?,
            None => wait.await,
        }
        .map_err(|e| KcacheError::command_failed(command, e))?;

        let exit_code = output.status.code().unwrap_or(-1);
        if let Some(limit) = options.timeout {
            if REMOTE_TIMEOUT_CODES.contains(&exit_code) {
                return Err(KcacheError::Timeout {
                    command: command.to_string(),
                    after: limit,
                });
            }
        }

        // ssh reserves 255 for its own connection failures
        if exit_code == 255 {
            return Err(KcacheError::command_exec(
                format!("ssh {}", self.host),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn file_exists(&self, path: &str) -> KcacheResult<bool> {
        let output = self
            .run(&format!("test -e {}", shell_quote(path)), &ExecOptions::new())
            .await?;
        Ok(output.success())
    }

    async fn read_file(&self, path: &str) -> KcacheResult<Option<String>> {
        if !self.file_exists(path).await? {
            return Ok(None);
        }
        let output = self
            .run(&format!("cat {}", shell_quote(path)), &ExecOptions::new())
            .await?;
        if output.success() {
            Ok(Some(output.stdout))
        } else {
            Err(KcacheError::command_exec(
                format!("cat {}", path),
                output.stderr.trim(),
            ))
        }
    }

    async fn write_file(&self, path: &str, contents: &str) -> KcacheResult<()> {
        let tmp = format!("{}.tmp-{}", path, uuid::Uuid::new_v4().simple());
        let command = format!(
            "mkdir -p \"$(dirname {path})\" && cat > {tmp} && mv -f {tmp} {path}",
            path = shell_quote(path),
            tmp = shell_quote(&tmp),
        );
        let output = self
            .run(&command, &ExecOptions::new().sudo().stdin(contents))
            .await?;
        if output.success() {
            Ok(())
        } else {
            let _ = self
                .run_privileged(&format!("rm -f {}", shell_quote(&tmp)))
                .await;
            Err(KcacheError::command_exec(
                format!("writing {}", path),
                output.stderr.trim(),
            ))
        }
    }

    async fn create_dir_all(&self, path: &str, mode: u32) -> KcacheResult<()> {
        let quoted = shell_quote(path);
        self.run_checked(
            &format!("mkdir -p {q} && chmod {mode:o} {q}", q = quoted, mode = mode),
            &format!("creating directory {}", path),
        )
        .await
        .map(|_| ())
    }

    async fn try_create_dir(&self, path: &str) -> KcacheResult<bool> {
        let quoted = shell_quote(path);
        let output = self
            .run_privileged(&format!(
                "mkdir -p \"$(dirname {q})\" && mkdir {q}",
                q = quoted
            ))
            .await?;
        if output.success() {
            return Ok(true);
        }
        if self.file_exists(path).await? {
            Ok(false)
        } else {
            Err(KcacheError::command_exec(
                format!("mkdir {}", path),
                output.stderr.trim(),
            ))
        }
    }

    async fn rename(&self, from: &str, to: &str) -> KcacheResult<()> {
        self.run_checked(
            // -T: never move into an existing directory
            &format!("mv -fT {} {}", shell_quote(from), shell_quote(to)),
            &format!("moving {} to {}", from, to),
        )
        .await
        .map(|_| ())
    }

    async fn list_dir(&self, path: &str) -> KcacheResult<Vec<String>> {
        let quoted = shell_quote(path);
        let output = self
            .run(
                &format!("test -d {q} || exit 0; ls -1A {q}", q = quoted),
                &ExecOptions::new(),
            )
            .await?;
        if !output.success() {
            return Err(KcacheError::command_exec(
                format!("ls {}", path),
                output.stderr.trim(),
            ));
        }

        let mut names: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn remove_path(&self, path: &str) -> KcacheResult<()> {
        self.run_checked(
            &format!("rm -rf {}", shell_quote(path)),
            &format!("removing {}", path),
        )
        .await
        .map(|_| ())
    }

    fn name(&self) -> &str {
        &self.host
    }
}
