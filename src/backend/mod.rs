//! The low-level storage backend contract.
//!
//! The core never touches bytes or native watchers itself; everything goes
//! through a [`Backend`]. Implementations push observed changes into the
//! notification channel handed to [`Backend::init_watchers`], and declare
//! their capabilities through [`Backend::recursive_watch`] and
//! [`Backend::normalize_unc_paths`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::FsError;
use crate::fs::stat::FileStat;

pub mod local;
pub mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

/// Notification pushed by a backend watcher.
#[derive(Debug, Clone)]
pub enum BackendNotice {
    /// Something changed at `path`; a `None` path means arbitrary parts of
    /// the filesystem may have changed. The stat is a best-effort snapshot
    /// of the changed path.
    Changed {
        /// Changed path, possibly without a trailing slash for directories.
        path: Option<String>,
        /// Fresh stat when the backend had one at hand.
        stat: Option<FileStat>,
    },
    /// The backend lost its watchers; all watched state is void.
    Offline,
}

/// Options for the open-dialog passthrough.
#[derive(Debug, Clone, Default)]
pub struct OpenDialogOptions {
    /// Allow selecting more than one item.
    pub allow_multiple_selection: bool,
    /// Select directories instead of files.
    pub choose_directories: bool,
    /// Dialog title.
    pub title: String,
    /// Directory the dialog starts in.
    pub initial_path: Option<String>,
    /// Accepted file-type extensions; empty means all.
    pub file_types: Vec<String>,
}

/// Options for the save-dialog passthrough.
#[derive(Debug, Clone, Default)]
pub struct SaveDialogOptions {
    /// Dialog title.
    pub title: String,
    /// Directory the dialog starts in.
    pub initial_path: Option<String>,
    /// Pre-filled file name.
    pub proposed_new_filename: String,
}

/// Low-level storage backend consumed by the filesystem core.
///
/// All byte I/O, stat calls, native watchers, and dialog UI live behind
/// this trait. Errors are opaque to the core: implementations report them
/// as [`FsError::Backend`] messages and the core passes them through
/// verbatim, never interprets, and never retries.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Register the notification channel. Called exactly once, from
    /// `FileSystem::init`.
    fn init_watchers(&self, notices: mpsc::UnboundedSender<BackendNotice>);

    /// Stat a raw, possibly un-normalized path.
    async fn stat(&self, path: &str) -> Result<FileStat, FsError>;

    /// List a directory as `(name, stat)` pairs. Ordering is whatever the
    /// backend produces and is preserved by the core.
    async fn readdir(&self, path: &str) -> Result<Vec<(String, FileStat)>, FsError>;

    /// Read a file's contents together with its current stat.
    async fn read_file(&self, path: &str) -> Result<(Vec<u8>, FileStat), FsError>;

    /// Write a file, returning the new stat and whether the file was
    /// created by this call.
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(FileStat, bool), FsError>;

    /// Create a directory, returning its stat.
    async fn mkdir(&self, path: &str) -> Result<FileStat, FsError>;

    /// Rename a file or directory subtree.
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), FsError>;

    /// Remove a file or directory subtree.
    async fn unlink(&self, path: &str) -> Result<(), FsError>;

    /// Start delivering change notifications for a path.
    async fn watch_path(&self, path: &str) -> Result<(), FsError>;

    /// Stop delivering change notifications for a path.
    async fn unwatch_path(&self, path: &str) -> Result<(), FsError>;

    /// Drop every watch at once.
    async fn unwatch_all(&self) -> Result<(), FsError>;

    /// Show an open dialog. User cancellation is a successful empty
    /// selection, not an error.
    async fn show_open_dialog(&self, options: &OpenDialogOptions) -> Result<Vec<String>, FsError>;

    /// Show a save dialog. User cancellation is a successful `None`, not
    /// an error.
    async fn show_save_dialog(&self, options: &SaveDialogOptions)
        -> Result<Option<String>, FsError>;

    /// True when a single watch on a root covers its whole subtree.
    fn recursive_watch(&self) -> bool;

    /// True when UNC double-slash prefixes must be preserved.
    fn normalize_unc_paths(&self) -> bool;
}
