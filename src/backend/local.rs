//! Local-disk backend with a native file watcher.
//!
//! I/O goes through `std::fs`; change notifications come from a
//! `notify::RecommendedWatcher` whose callback forwards each event path,
//! with a best-effort stat, into the core's notification channel. The
//! native watcher is recursive, so the core issues a single watch per
//! root.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::backend::{Backend, BackendNotice, OpenDialogOptions, SaveDialogOptions};
use crate::error::FsError;
use crate::fs::stat::FileStat;

/// [`Backend`] over the local filesystem.
#[derive(Default)]
pub struct LocalBackend {
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl LocalBackend {
    /// Create a backend with no watcher yet; the watcher is built when the
    /// core calls [`Backend::init_watchers`].
    pub fn new() -> Self {
        Self::default()
    }

    fn os_path(path: &str) -> PathBuf {
        let trimmed = if path.len() > 1 && path.ends_with('/') {
            &path[..path.len() - 1]
        } else {
            path
        };
        PathBuf::from(trimmed)
    }

    fn canonical_string(path: &Path, is_dir: bool) -> String {
        let mut text = path.to_string_lossy().replace('\\', "/");
        if is_dir && !text.ends_with('/') {
            text.push('/');
        }
        text
    }

    fn stat_path(path: &Path) -> Result<FileStat, FsError> {
        let metadata =
            std::fs::metadata(path).map_err(|err| FsError::backend(err.to_string()))?;
        let mut stat = FileStat::new(
            metadata.is_file(),
            metadata.len(),
            metadata.modified().unwrap_or(UNIX_EPOCH),
        );
        if let Ok(real) = std::fs::canonicalize(path) {
            stat = stat.with_real_path(Self::canonical_string(&real, metadata.is_dir()));
        }
        Ok(stat)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn init_watchers(&self, notices: mpsc::UnboundedSender<BackendNotice>) {
        let config = Config::default().with_compare_contents(false);
        let watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    for path in event.paths {
                        let stat = Self::stat_path(&path).ok();
                        let is_dir = stat.as_ref().map(|s| s.is_directory()).unwrap_or(false);
                        let _ = notices.send(BackendNotice::Changed {
                            path: Some(Self::canonical_string(&path, is_dir)),
                            stat,
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "native watcher error");
                }
            },
            config,
        );
        match watcher {
            Ok(watcher) => *self.watcher.lock().unwrap() = Some(watcher),
            Err(err) => tracing::error!(%err, "failed to create native watcher"),
        }
    }

    async fn stat(&self, path: &str) -> Result<FileStat, FsError> {
        Self::stat_path(&Self::os_path(path))
    }

    async fn readdir(&self, path: &str) -> Result<Vec<(String, FileStat)>, FsError> {
        let entries = std::fs::read_dir(Self::os_path(path))
            .map_err(|err| FsError::backend(err.to_string()))?;
        let mut listing = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| FsError::backend(err.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match Self::stat_path(&entry.path()) {
                Ok(stat) => listing.push((name, stat)),
                Err(err) => {
                    tracing::debug!(%name, %err, "skipping unstatable directory entry");
                }
            }
        }
        Ok(listing)
    }

    async fn read_file(&self, path: &str) -> Result<(Vec<u8>, FileStat), FsError> {
        let os_path = Self::os_path(path);
        let data = std::fs::read(&os_path).map_err(|err| FsError::backend(err.to_string()))?;
        let stat = Self::stat_path(&os_path)?;
        Ok((data, stat))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(FileStat, bool), FsError> {
        let os_path = Self::os_path(path);
        let created = !os_path.exists();
        std::fs::write(&os_path, data).map_err(|err| FsError::backend(err.to_string()))?;
        Ok((Self::stat_path(&os_path)?, created))
    }

    async fn mkdir(&self, path: &str) -> Result<FileStat, FsError> {
        let os_path = Self::os_path(path);
        std::fs::create_dir(&os_path).map_err(|err| FsError::backend(err.to_string()))?;
        Self::stat_path(&os_path)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), FsError> {
        std::fs::rename(Self::os_path(old_path), Self::os_path(new_path))
            .map_err(|err| FsError::backend(err.to_string()))
    }

    async fn unlink(&self, path: &str) -> Result<(), FsError> {
        let os_path = Self::os_path(path);
        let metadata =
            std::fs::metadata(&os_path).map_err(|err| FsError::backend(err.to_string()))?;
        let result = if metadata.is_dir() {
            std::fs::remove_dir_all(&os_path)
        } else {
            std::fs::remove_file(&os_path)
        };
        result.map_err(|err| FsError::backend(err.to_string()))
    }

    async fn watch_path(&self, path: &str) -> Result<(), FsError> {
        let mut guard = self.watcher.lock().unwrap();
        let watcher = guard
            .as_mut()
            .ok_or_else(|| FsError::backend("watcher unavailable"))?;
        watcher
            .watch(&Self::os_path(path), RecursiveMode::Recursive)
            .map_err(|err| FsError::backend(format!("failed to watch {path}: {err}")))
    }

    async fn unwatch_path(&self, path: &str) -> Result<(), FsError> {
        let mut guard = self.watcher.lock().unwrap();
        let watcher = guard
            .as_mut()
            .ok_or_else(|| FsError::backend("watcher unavailable"))?;
        watcher
            .unwatch(&Self::os_path(path))
            .map_err(|err| FsError::backend(format!("failed to unwatch {path}: {err}")))
    }

    async fn unwatch_all(&self) -> Result<(), FsError> {
        // Dropping the watcher releases every native watch at once.
        *self.watcher.lock().unwrap() = None;
        Ok(())
    }

    async fn show_open_dialog(&self, _options: &OpenDialogOptions) -> Result<Vec<String>, FsError> {
        // Headless host: behave like a cancelled dialog.
        Ok(Vec::new())
    }

    async fn show_save_dialog(
        &self,
        _options: &SaveDialogOptions,
    ) -> Result<Option<String>, FsError> {
        Ok(None)
    }

    fn recursive_watch(&self) -> bool {
        true
    }

    fn normalize_unc_paths(&self) -> bool {
        cfg!(windows)
    }
}
