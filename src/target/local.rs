//! Executor for the machine kcache itself runs on

use crate::error::{KcacheError, KcacheResult};
use crate::target::executor::{ExecOptions, ExecOutput, RemoteExecutor};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs commands through `sh -c` and touches files directly
pub struct LocalExecutor {
    allow_sudo: bool,
}

impl LocalExecutor {
    /// Create a local executor; `allow_sudo` enables `sudo -n` for privileged commands
    pub fn new(allow_sudo: bool) -> Self {
        Self { allow_sudo }
    }

    fn command_for(&self, command: &str, options: &ExecOptions) -> Command {
        let mut cmd = if options.sudo && self.allow_sudo {
            let mut cmd = Command::new("sudo");
            cmd.args(["-n", "sh", "-c", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };

        if let Some(ref cwd) = options.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(if options.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        // Own process group, so a timeout can take down everything it started
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// Kill every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        debug!(
            "Process group {} already gone: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn run(&self, command: &str, options: &ExecOptions) -> KcacheResult<ExecOutput> {
        debug!("Executing locally: {}", command);

        let mut child = self
            .command_for(command, options)
            .spawn()
            .map_err(|e| KcacheError::command_failed(command, e))?;

        if let Some(ref input) = options.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| KcacheError::command_failed(command, e))?;
            }
        }

        let pid = child.id();
        let wait = child.wait_with_output();
        tokio::pin!(wait);
        let output = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut wait).await {
                Ok(result) => result,
                Err(_) => {
                    // Group first: the shell's children outlive a kill of the shell alone
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    return Err(KcacheError::Timeout {
                        command: command.to_string(),
                        after: limit,
                    });
                }
            },
            None => wait.await,
        }
        .map_err(|e| KcacheError::command_failed(command, e))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn file_exists(&self, path: &str) -> KcacheResult<bool> {
        fs::try_exists(path)
            .await
            .map_err(|e| KcacheError::io(format!("checking {}", path), e))
    }

    async fn read_file(&self, path: &str) -> KcacheResult<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KcacheError::io(format!("reading {}", path), e)),
        }
    }

    async fn write_file(&self, path: &str, contents: &str) -> KcacheResult<()> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KcacheError::io(format!("creating {}", parent.display()), e))?;
        }

        let tmp = format!("{}.tmp-{}", path, uuid::Uuid::new_v4().simple());
        fs::write(&tmp, contents)
            .await
            .map_err(|e| KcacheError::io(format!("writing {}", tmp), e))?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(KcacheError::io(format!("replacing {}", path), e));
        }
        Ok(())
    }

    async fn create_dir_all(&self, path: &str, mode: u32) -> KcacheResult<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| KcacheError::io(format!("creating directory {}", path), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| KcacheError::io(format!("setting permissions on {}", path), e))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(())
    }

    async fn try_create_dir(&self, path: &str) -> KcacheResult<bool> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KcacheError::io(format!("creating {}", parent.display()), e))?;
        }

        match fs::create_dir(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(KcacheError::io(format!("creating directory {}", path), e)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> KcacheResult<()> {
        fs::rename(from, to)
            .await
            .map_err(|e| KcacheError::io(format!("moving {} to {}", from, to), e))
    }

    async fn list_dir(&self, path: &str) -> KcacheResult<Vec<String>> {
        let mut entries = match fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(KcacheError::io(format!("listing {}", path), e)),
        };

        let mut names = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KcacheError::io(format!("listing {}", path), e))?
        {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    async fn remove_path(&self, path: &str) -> KcacheResult<()> {
        let meta = match fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(KcacheError::io(format!("inspecting {}", path), e)),
        };

        let result = if meta.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        };
        result.map_err(|e| KcacheError::io(format!("removing {}", path), e))
    }

    fn name(&self) -> &str {
        "localhost"
    }
}
