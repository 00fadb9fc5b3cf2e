//! In-memory backend.
//!
//! The standard test double, also usable as a scratch filesystem. Nodes
//! live in a sorted map (directory keys carry a trailing slash), watcher
//! notices are emitted only when a test scripts them, and dialog results
//! are scripted the same way so runs stay deterministic. Modification
//! times come from a monotonic millisecond counter, giving every mutation
//! a distinct, comparable mtime.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::{Backend, BackendNotice, OpenDialogOptions, SaveDialogOptions};
use crate::error::FsError;
use crate::fs::stat::FileStat;
use crate::path_util;

#[derive(Clone)]
struct MemoryNode {
    is_file: bool,
    data: Vec<u8>,
    mtime: SystemTime,
}

#[derive(Default)]
struct MemoryState {
    nodes: BTreeMap<String, MemoryNode>,
    watched: HashSet<String>,
    notices: Option<mpsc::UnboundedSender<BackendNotice>>,
    fail_watch: HashSet<String>,
    fail_unwatch: HashSet<String>,
    open_dialog_selection: Vec<String>,
    save_dialog_choice: Option<String>,
}

/// In-memory [`Backend`] with scripted watcher and dialog behavior.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    recursive: bool,
    unc: bool,
    clock: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// An empty filesystem containing only the root directory. Watches
    /// are recursive and UNC paths are collapsed.
    pub fn new() -> Self {
        let backend = Self {
            state: Mutex::new(MemoryState::default()),
            recursive: true,
            unc: false,
            clock: AtomicU64::new(0),
        };
        backend.state.lock().unwrap().nodes.insert(
            "/".to_string(),
            MemoryNode {
                is_file: false,
                data: Vec::new(),
                mtime: backend.next_mtime(),
            },
        );
        backend
    }

    /// Override the recursive-watch capability.
    pub fn with_recursive_watch(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Override the UNC-path capability.
    pub fn with_unc_paths(mut self, unc: bool) -> Self {
        self.unc = unc;
        self
    }

    fn next_mtime(&self) -> SystemTime {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        UNIX_EPOCH + Duration::from_millis(tick)
    }

    fn stat_of(key: &str, node: &MemoryNode) -> FileStat {
        FileStat::new(node.is_file, node.data.len() as u64, node.mtime).with_real_path(key)
    }

    fn ensure_parents(&self, state: &mut MemoryState, path: &str) {
        for (i, ch) in path.char_indices().skip(1) {
            if ch == '/' {
                let key = path[..=i].to_string();
                let mtime = self.next_mtime();
                state.nodes.entry(key).or_insert(MemoryNode {
                    is_file: false,
                    data: Vec::new(),
                    mtime,
                });
            }
        }
    }

    fn lookup(state: &MemoryState, path: &str) -> Option<(String, MemoryNode)> {
        if let Some(node) = state.nodes.get(path) {
            return Some((path.to_string(), node.clone()));
        }
        if !path.ends_with('/') {
            let with_slash = format!("{path}/");
            if let Some(node) = state.nodes.get(&with_slash) {
                return Some((with_slash, node.clone()));
            }
        } else if path.len() > 1 {
            let trimmed = &path[..path.len() - 1];
            if let Some(node) = state.nodes.get(trimmed) {
                return Some((trimmed.to_string(), node.clone()));
            }
        }
        None
    }

    /// Seed a file, creating parent directories as needed.
    pub fn add_file(&self, path: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        self.ensure_parents(&mut state, path);
        let mtime = self.next_mtime();
        state.nodes.insert(
            path.to_string(),
            MemoryNode {
                is_file: true,
                data: data.to_vec(),
                mtime,
            },
        );
    }

    /// Seed a directory, creating parent directories as needed.
    pub fn add_dir(&self, path: &str) {
        let key = path_util::with_trailing_slash(path);
        let mut state = self.state.lock().unwrap();
        self.ensure_parents(&mut state, &key);
        let mtime = self.next_mtime();
        state.nodes.entry(key).or_insert(MemoryNode {
            is_file: false,
            data: Vec::new(),
            mtime,
        });
    }

    /// Script the next watch of `path` to fail.
    pub fn fail_watch_path(&self, path: &str) {
        self.state.lock().unwrap().fail_watch.insert(path.to_string());
    }

    /// Script the next unwatch of `path` to fail.
    pub fn fail_unwatch_path(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_unwatch
            .insert(path.to_string());
    }

    /// Stop failing watches of `path`.
    pub fn clear_watch_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_watch.clear();
        state.fail_unwatch.clear();
    }

    /// Paths currently watched, sorted.
    pub fn watched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.lock().unwrap().watched.iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Current stat for a path, when it exists.
    pub fn stat_for(&self, path: &str) -> Option<FileStat> {
        let state = self.state.lock().unwrap();
        Self::lookup(&state, path).map(|(key, node)| Self::stat_of(&key, &node))
    }

    /// Emit a change notice as a native watcher would.
    pub fn emit_changed(&self, path: Option<&str>, stat: Option<FileStat>) {
        let sender = self.state.lock().unwrap().notices.clone();
        if let Some(sender) = sender {
            let _ = sender.send(BackendNotice::Changed {
                path: path.map(str::to_string),
                stat,
            });
        }
    }

    /// Emit the offline notice.
    pub fn emit_offline(&self) {
        let sender = self.state.lock().unwrap().notices.clone();
        if let Some(sender) = sender {
            let _ = sender.send(BackendNotice::Offline);
        }
    }

    /// Script the open-dialog selection.
    pub fn set_open_dialog_selection(&self, selection: Vec<String>) {
        self.state.lock().unwrap().open_dialog_selection = selection;
    }

    /// Script the save-dialog choice.
    pub fn set_save_dialog_choice(&self, choice: Option<String>) {
        self.state.lock().unwrap().save_dialog_choice = choice;
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn init_watchers(&self, notices: mpsc::UnboundedSender<BackendNotice>) {
        self.state.lock().unwrap().notices = Some(notices);
    }

    async fn stat(&self, path: &str) -> Result<FileStat, FsError> {
        let state = self.state.lock().unwrap();
        Self::lookup(&state, path)
            .map(|(key, node)| Self::stat_of(&key, &node))
            .ok_or_else(|| FsError::backend(format!("no such entry: {path}")))
    }

    async fn readdir(&self, path: &str) -> Result<Vec<(String, FileStat)>, FsError> {
        let key = path_util::with_trailing_slash(path);
        let state = self.state.lock().unwrap();
        if !state.nodes.contains_key(&key) {
            return Err(FsError::backend(format!("no such directory: {path}")));
        }
        let mut listing = Vec::new();
        for (node_key, node) in state.nodes.range(key.clone()..) {
            if !node_key.starts_with(&key) {
                break;
            }
            let rel = &node_key[key.len()..];
            if rel.is_empty() {
                continue;
            }
            let name = rel.strip_suffix('/').unwrap_or(rel);
            if name.contains('/') {
                continue;
            }
            listing.push((name.to_string(), Self::stat_of(node_key, node)));
        }
        Ok(listing)
    }

    async fn read_file(&self, path: &str) -> Result<(Vec<u8>, FileStat), FsError> {
        let state = self.state.lock().unwrap();
        match state.nodes.get(path) {
            Some(node) if node.is_file => Ok((node.data.clone(), Self::stat_of(path, node))),
            Some(_) => Err(FsError::backend(format!("not a file: {path}"))),
            None => Err(FsError::backend(format!("no such file: {path}"))),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(FileStat, bool), FsError> {
        let mtime = self.next_mtime();
        let mut state = self.state.lock().unwrap();
        self.ensure_parents(&mut state, path);
        let created = !state.nodes.contains_key(path);
        let node = MemoryNode {
            is_file: true,
            data: data.to_vec(),
            mtime,
        };
        let stat = Self::stat_of(path, &node);
        state.nodes.insert(path.to_string(), node);
        Ok((stat, created))
    }

    async fn mkdir(&self, path: &str) -> Result<FileStat, FsError> {
        let key = path_util::with_trailing_slash(path);
        let mtime = self.next_mtime();
        let mut state = self.state.lock().unwrap();
        if state.nodes.contains_key(&key) {
            return Err(FsError::backend(format!("directory exists: {path}")));
        }
        self.ensure_parents(&mut state, &key);
        let node = MemoryNode {
            is_file: false,
            data: Vec::new(),
            mtime,
        };
        let stat = Self::stat_of(&key, &node);
        state.nodes.insert(key, node);
        Ok(stat)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if old_path.ends_with('/') {
            let moved: Vec<String> = state
                .nodes
                .keys()
                .filter(|key| key.starts_with(old_path))
                .cloned()
                .collect();
            if moved.is_empty() {
                return Err(FsError::backend(format!("no such entry: {old_path}")));
            }
            for key in moved {
                if let Some(node) = state.nodes.remove(&key) {
                    let renamed = format!("{new_path}{}", &key[old_path.len()..]);
                    state.nodes.insert(renamed, node);
                }
            }
            Ok(())
        } else {
            match state.nodes.remove(old_path) {
                Some(node) => {
                    state.nodes.insert(new_path.to_string(), node);
                    Ok(())
                }
                None => Err(FsError::backend(format!("no such entry: {old_path}"))),
            }
        }
    }

    async fn unlink(&self, path: &str) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if path.ends_with('/') {
            let doomed: Vec<String> = state
                .nodes
                .keys()
                .filter(|key| key.starts_with(path))
                .cloned()
                .collect();
            if doomed.is_empty() {
                return Err(FsError::backend(format!("no such entry: {path}")));
            }
            for key in doomed {
                state.nodes.remove(&key);
            }
            Ok(())
        } else if state.nodes.remove(path).is_some() {
            Ok(())
        } else {
            Err(FsError::backend(format!("no such entry: {path}")))
        }
    }

    async fn watch_path(&self, path: &str) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_watch.contains(path) {
            return Err(FsError::backend(format!("cannot watch {path}")));
        }
        state.watched.insert(path.to_string());
        Ok(())
    }

    async fn unwatch_path(&self, path: &str) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_unwatch.contains(path) {
            return Err(FsError::backend(format!("cannot unwatch {path}")));
        }
        state.watched.remove(path);
        Ok(())
    }

    async fn unwatch_all(&self) -> Result<(), FsError> {
        self.state.lock().unwrap().watched.clear();
        Ok(())
    }

    async fn show_open_dialog(&self, _options: &OpenDialogOptions) -> Result<Vec<String>, FsError> {
        Ok(self.state.lock().unwrap().open_dialog_selection.clone())
    }

    async fn show_save_dialog(
        &self,
        _options: &SaveDialogOptions,
    ) -> Result<Option<String>, FsError> {
        Ok(self.state.lock().unwrap().save_dialog_choice.clone())
    }

    fn recursive_watch(&self) -> bool {
        self.recursive
    }

    fn normalize_unc_paths(&self) -> bool {
        self.unc
    }
}
