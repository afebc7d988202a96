//! In-memory target used by unit tests
//!
//! Files and directories live in maps, commands are recorded and answered
//! from scripted responses (success with empty output by default).

use crate::error::{KcacheError, KcacheResult};
use crate::target::executor::{ExecOptions, ExecOutput, RemoteExecutor};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, String>,
    dirs: BTreeMap<String, u32>,
    commands: Vec<(String, ExecOptions)>,
    responses: Vec<(String, ExecOutput)>,
    read_only: BTreeSet<String>,
}

impl MemoryState {
    fn add_parents(&mut self, path: &str) {
        let mut current = path;
        while let Some(idx) = current.rfind('/') {
            current = &current[..idx];
            if current.is_empty() {
                break;
            }
            self.dirs.entry(current.to_string()).or_insert(0o755);
        }
    }
}

pub(crate) struct MemoryExecutor {
    state: Mutex<MemoryState>,
}

impl MemoryExecutor {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add_file(&self, path: &str, contents: &str) {
        let mut state = self.state();
        state.add_parents(path);
        state.files.insert(path.to_string(), contents.to_string());
    }

    pub(crate) fn add_dir(&self, path: &str) {
        let mut state = self.state();
        state.add_parents(path);
        state.dirs.entry(path.to_string()).or_insert(0o755);
    }

    pub(crate) fn delete(&self, path: &str) {
        let mut state = self.state();
        state.files.remove(path);
        state.dirs.remove(path);
    }

    pub(crate) fn contents(&self, path: &str) -> Option<String> {
        self.state().files.get(path).cloned()
    }

    pub(crate) fn has_file(&self, path: &str) -> bool {
        self.state().files.contains_key(path)
    }

    pub(crate) fn dir_mode(&self, path: &str) -> Option<u32> {
        self.state().dirs.get(path).copied()
    }

    /// Answer every command containing `pattern` with `output`
    pub(crate) fn respond(&self, pattern: &str, output: ExecOutput) {
        self.state().responses.push((pattern.to_string(), output));
    }

    /// Make writes to `path` fail with a permission error
    pub(crate) fn make_read_only(&self, path: &str) {
        self.state().read_only.insert(path.to_string());
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.state().commands.iter().map(|(c, _)| c.clone()).collect()
    }

    pub(crate) fn options_for(&self, pattern: &str) -> Option<ExecOptions> {
        self.state()
            .commands
            .iter()
            .find(|(c, _)| c.contains(pattern))
            .map(|(_, o)| o.clone())
    }

    pub(crate) fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }
}

#[async_trait]
impl RemoteExecutor for MemoryExecutor {
    async fn run(&self, command: &str, options: &ExecOptions) -> KcacheResult<ExecOutput> {
        let mut state = self.state();
        state.commands.push((command.to_string(), options.clone()));
        Ok(state
            .responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn file_exists(&self, path: &str) -> KcacheResult<bool> {
        let state = self.state();
        Ok(state.files.contains_key(path) || state.dirs.contains_key(path))
    }

    async fn read_file(&self, path: &str) -> KcacheResult<Option<String>> {
        Ok(self.state().files.get(path).cloned())
    }

    async fn write_file(&self, path: &str, contents: &str) -> KcacheResult<()> {
        let mut state = self.state();
        if state.read_only.contains(path) {
            return Err(KcacheError::io(
                format!("writing {}", path),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only target"),
            ));
        }
        state.add_parents(path);
        state.files.insert(path.to_string(), contents.to_string());
        Ok(())
    }

    async fn create_dir_all(&self, path: &str, mode: u32) -> KcacheResult<()> {
        let mut state = self.state();
        state.add_parents(path);
        state.dirs.insert(path.to_string(), mode);
        Ok(())
    }

    async fn try_create_dir(&self, path: &str) -> KcacheResult<bool> {
        let mut state = self.state();
        if state.dirs.contains_key(path) || state.files.contains_key(path) {
            return Ok(false);
        }
        state.add_parents(path);
        state.dirs.insert(path.to_string(), 0o755);
        Ok(true)
    }

    async fn rename(&self, from: &str, to: &str) -> KcacheResult<()> {
        let mut state = self.state();
        let fail = |kind: std::io::ErrorKind| {
            KcacheError::io(format!("moving {} to {}", from, to), std::io::Error::from(kind))
        };

        if let Some(contents) = state.files.remove(from) {
            state.add_parents(to);
            state.files.insert(to.to_string(), contents);
            return Ok(());
        }

        // Directories move with their contents and never replace an existing path
        let Some(mode) = state.dirs.remove(from) else {
            return Err(fail(std::io::ErrorKind::NotFound));
        };
        if state.dirs.contains_key(to) || state.files.contains_key(to) {
            state.dirs.insert(from.to_string(), mode);
            return Err(fail(std::io::ErrorKind::AlreadyExists));
        }

        let prefix = format!("{}/", from);
        let moved = |p: &String| p.strip_prefix(&prefix).map(|rest| format!("{}/{}", to, rest));
        let files: Vec<(String, String)> = state
            .files
            .iter()
            .filter_map(|(p, c)| moved(p).map(|dest| (dest, c.clone())))
            .collect();
        let dirs: Vec<(String, u32)> = state
            .dirs
            .iter()
            .filter_map(|(p, m)| moved(p).map(|dest| (dest, *m)))
            .collect();
        state.files.retain(|p, _| !p.starts_with(&prefix));
        state.dirs.retain(|p, _| !p.starts_with(&prefix));

        state.add_parents(to);
        state.dirs.insert(to.to_string(), mode);
        state.files.extend(files);
        state.dirs.extend(dirs);
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> KcacheResult<Vec<String>> {
        let state = self.state();
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let names: BTreeSet<String> = state
            .files
            .keys()
            .chain(state.dirs.keys())
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn remove_path(&self, path: &str) -> KcacheResult<()> {
        let mut state = self.state();
        let prefix = format!("{}/", path);
        state.files.retain(|p, _| p != path && !p.starts_with(&prefix));
        state.dirs.retain(|p, _| p != path && !p.starts_with(&prefix));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
