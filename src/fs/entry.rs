//! File and directory handles.
//!
//! Handles are interned: for any canonical path there is at most one live
//! entry object, and equality is identity. Each entry carries the cached
//! pieces the watcher pipeline keeps fresh (stat, directory contents, file
//! data) and a non-owning reference to the core that interned it; entries
//! must not outlive the core.
//!
//! Mutating operations (`write`, `create`, `rename`, `unlink`) bracket
//! themselves with the change coordinator so externally observed changes
//! are delivered only after the index and listeners have seen the
//! in-process result.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::error::FsError;
use crate::fs::events::ChangeEvent;
use crate::fs::facade::FsShared;
use crate::fs::stat::FileStat;
use crate::path_util;

struct EntryState {
    full_path: String,
    name: String,
    parent_path: String,
    stat: Option<FileStat>,
    /// Cached ordered listing, directories only.
    contents: Option<Vec<Entry>>,
    /// Cached file data, files only.
    data: Option<Arc<[u8]>>,
}

pub(crate) struct EntryInner {
    state: Mutex<EntryState>,
    fs: Weak<FsShared>,
}

impl EntryInner {
    fn new(full_path: String, fs: Weak<FsShared>) -> Arc<Self> {
        let (parent_path, name) = path_util::split_name(&full_path);
        Arc::new(Self {
            state: Mutex::new(EntryState {
                full_path,
                name,
                parent_path,
                stat: None,
                contents: None,
                data: None,
            }),
            fs,
        })
    }
}

/// Handle to a file path. The target need not exist.
#[derive(Clone)]
pub struct File {
    inner: Arc<EntryInner>,
}

/// Handle to a directory path. The target need not exist.
#[derive(Clone)]
pub struct Directory {
    inner: Arc<EntryInner>,
}

/// Either kind of handle.
#[derive(Clone)]
pub enum Entry {
    /// A file handle.
    File(File),
    /// A directory handle.
    Directory(Directory),
}

impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for File {}

impl PartialEq for Directory {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Directory {}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Entry::File(a), Entry::File(b)) => a == b,
            (Entry::Directory(a), Entry::Directory(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Entry {}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File({})", self.as_entry().full_path())
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Directory({})", self.as_entry().full_path())
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::File(file) => file.fmt(f),
            Entry::Directory(dir) => dir.fmt(f),
        }
    }
}

impl Entry {
    fn inner(&self) -> &Arc<EntryInner> {
        match self {
            Entry::File(file) => &file.inner,
            Entry::Directory(dir) => &dir.inner,
        }
    }

    /// Canonical absolute path; directories end with `/`.
    pub fn full_path(&self) -> String {
        self.inner().state.lock().unwrap().full_path.clone()
    }

    /// Last path segment.
    pub fn name(&self) -> String {
        self.inner().state.lock().unwrap().name.clone()
    }

    /// Canonical path of the parent directory, empty for the root.
    pub fn parent_path(&self) -> String {
        self.inner().state.lock().unwrap().parent_path.clone()
    }

    /// True for file handles.
    pub fn is_file(&self) -> bool {
        matches!(self, Entry::File(_))
    }

    /// True for directory handles.
    pub fn is_directory(&self) -> bool {
        matches!(self, Entry::Directory(_))
    }

    /// The cached stat snapshot, when one is held.
    pub fn cached_stat(&self) -> Option<FileStat> {
        self.inner().state.lock().unwrap().stat.clone()
    }

    pub(crate) fn set_location(&self, full_path: String) {
        let (parent_path, name) = path_util::split_name(&full_path);
        let mut state = self.inner().state.lock().unwrap();
        state.full_path = full_path;
        state.name = name;
        state.parent_path = parent_path;
    }

    pub(crate) fn adopt_stat(&self, stat: Option<FileStat>) {
        self.inner().state.lock().unwrap().stat = stat;
    }

    pub(crate) fn clear_cached_data(&self) {
        let mut state = self.inner().state.lock().unwrap();
        state.stat = None;
        state.contents = None;
        state.data = None;
    }

    pub(crate) fn take_cached_contents(&self) -> Option<Vec<Entry>> {
        self.inner().state.lock().unwrap().contents.take()
    }

    fn owner(&self) -> Result<Arc<FsShared>, FsError> {
        self.inner().fs.upgrade().ok_or(FsError::NotInitialized)
    }

    /// Stat this entry, serving the cache when present. An explicit stat
    /// caches its result; the cache is cleared on unwatch and on external
    /// change.
    pub async fn stat(&self) -> Result<FileStat, FsError> {
        if let Some(stat) = self.cached_stat() {
            return Ok(stat);
        }
        let shared = self.owner()?;
        let backend = shared.backend()?;
        let stat = backend.stat(&self.full_path()).await?;
        self.adopt_stat(Some(stat.clone()));
        Ok(stat)
    }

    /// Rename this entry, updating every indexed path under it in place.
    /// Listeners observe a single `rename` event rather than a delete/add
    /// pair, even when the backend watcher reports both.
    pub async fn rename(&self, new_path: &str) -> Result<(), FsError> {
        let shared = self.owner()?;
        let backend = shared.backend()?;
        let is_directory = self.is_directory();
        let new_canonical =
            path_util::normalize(new_path, is_directory, backend.normalize_unc_paths())?;
        let old_path = self.full_path();
        if old_path == new_canonical {
            return Ok(());
        }

        shared.begin_change();
        let result = backend.rename(&old_path, &new_canonical).await;
        if result.is_ok() {
            shared.apply_rename(&old_path, &new_canonical, is_directory);
            shared.fire_rename(&old_path, &new_canonical);
        }
        shared.end_change().await;
        result
    }

    /// Delete this entry (recursively for directories), prune it from the
    /// index, and notify listeners through the parent directory.
    pub async fn unlink(&self) -> Result<(), FsError> {
        let shared = self.owner()?;
        let backend = shared.backend()?;
        let path = self.full_path();

        shared.begin_change();
        let result = backend.unlink(&path).await;
        if result.is_ok() {
            self.clear_cached_data();
            shared.prune_entry(self);
            let parent_path = self.parent_path();
            if !parent_path.is_empty() {
                if let Ok(parent) = shared.directory_for_canonical(parent_path) {
                    parent.as_entry().clear_cached_data();
                    shared.fire_change(&ChangeEvent::with_children(
                        Entry::Directory(parent),
                        None,
                        Some(vec![self.clone()]),
                    ));
                }
            }
        }
        shared.end_change().await;
        result
    }
}

impl File {
    pub(crate) fn new(full_path: String, fs: Weak<FsShared>) -> Self {
        Self {
            inner: EntryInner::new(full_path, fs),
        }
    }

    /// This handle as an [`Entry`].
    pub fn as_entry(&self) -> Entry {
        Entry::File(self.clone())
    }

    /// Canonical absolute path.
    pub fn full_path(&self) -> String {
        self.as_entry().full_path()
    }

    /// Last path segment.
    pub fn name(&self) -> String {
        self.as_entry().name()
    }

    /// Parent directory path.
    pub fn parent_path(&self) -> String {
        self.as_entry().parent_path()
    }

    /// Stat this file. See [`Entry::stat`].
    pub async fn stat(&self) -> Result<FileStat, FsError> {
        self.as_entry().stat().await
    }

    /// Rename this file. See [`Entry::rename`].
    pub async fn rename(&self, new_path: &str) -> Result<(), FsError> {
        self.as_entry().rename(new_path).await
    }

    /// Delete this file. See [`Entry::unlink`].
    pub async fn unlink(&self) -> Result<(), FsError> {
        self.as_entry().unlink().await
    }

    /// Read the file, serving cached data when the watcher keeps it fresh.
    pub async fn read(&self) -> Result<(Arc<[u8]>, FileStat), FsError> {
        {
            let state = self.inner.state.lock().unwrap();
            if let (Some(data), Some(stat)) = (&state.data, &state.stat) {
                return Ok((Arc::clone(data), stat.clone()));
            }
        }
        let entry = self.as_entry();
        let shared = entry.owner()?;
        let backend = shared.backend()?;
        let path = self.full_path();
        let (bytes, stat) = backend.read_file(&path).await?;
        let data: Arc<[u8]> = Arc::from(bytes);
        {
            let mut state = self.inner.state.lock().unwrap();
            state.stat = Some(stat.clone());
            if shared.is_watched(&path) {
                state.data = Some(Arc::clone(&data));
            }
        }
        Ok((data, stat))
    }

    /// Write the file, creating it when absent. Fires `change` on the file,
    /// or on the parent directory with this file as `added` when the write
    /// created it.
    pub async fn write(&self, data: &[u8]) -> Result<FileStat, FsError> {
        let entry = self.as_entry();
        let shared = entry.owner()?;
        let backend = shared.backend()?;
        let path = self.full_path();

        shared.begin_change();
        let result = backend.write_file(&path, data).await;
        let outcome = match result {
            Ok((stat, created)) => {
                {
                    let mut state = self.inner.state.lock().unwrap();
                    state.stat = Some(stat.clone());
                    state.data = if shared.is_watched(&path) {
                        Some(Arc::from(data))
                    } else {
                        None
                    };
                }
                let parent_path = self.parent_path();
                if created && !parent_path.is_empty() {
                    if let Ok(parent) = shared.directory_for_canonical(parent_path) {
                        parent.as_entry().clear_cached_data();
                        shared.fire_change(&ChangeEvent::with_children(
                            Entry::Directory(parent),
                            Some(vec![entry.clone()]),
                            None,
                        ));
                    }
                } else {
                    shared.fire_change(&ChangeEvent::entry(entry.clone()));
                }
                Ok(stat)
            }
            Err(err) => Err(err),
        };
        shared.end_change().await;
        outcome
    }
}

impl Directory {
    pub(crate) fn new(full_path: String, fs: Weak<FsShared>) -> Self {
        Self {
            inner: EntryInner::new(full_path, fs),
        }
    }

    /// This handle as an [`Entry`].
    pub fn as_entry(&self) -> Entry {
        Entry::Directory(self.clone())
    }

    /// Canonical absolute path, with trailing slash.
    pub fn full_path(&self) -> String {
        self.as_entry().full_path()
    }

    /// Last path segment.
    pub fn name(&self) -> String {
        self.as_entry().name()
    }

    /// Parent directory path.
    pub fn parent_path(&self) -> String {
        self.as_entry().parent_path()
    }

    /// Stat this directory. See [`Entry::stat`].
    pub async fn stat(&self) -> Result<FileStat, FsError> {
        self.as_entry().stat().await
    }

    /// Rename this directory. See [`Entry::rename`].
    pub async fn rename(&self, new_path: &str) -> Result<(), FsError> {
        self.as_entry().rename(new_path).await
    }

    /// Delete this directory and its subtree. See [`Entry::unlink`].
    pub async fn unlink(&self) -> Result<(), FsError> {
        self.as_entry().unlink().await
    }

    /// List the directory. Children are interned through the index, pass
    /// the covering watched root's filter when one applies, and keep the
    /// backend's ordering. The listing is cached only while this directory
    /// sits under an active watched root, since only then does the watcher
    /// keep it fresh.
    pub async fn get_contents(&self) -> Result<Vec<Entry>, FsError> {
        if let Some(cached) = self.inner.state.lock().unwrap().contents.clone() {
            return Ok(cached);
        }
        let entry = self.as_entry();
        let shared = entry.owner()?;
        let backend = shared.backend()?;
        let path = self.full_path();

        let listing = backend.readdir(&path).await?;
        let mut contents = Vec::with_capacity(listing.len());
        for (name, stat) in listing {
            if !shared.should_index(&name, &path) {
                continue;
            }
            let child = if stat.is_file {
                Entry::File(shared.file_for_canonical(format!("{path}{name}"))?)
            } else {
                Entry::Directory(shared.directory_for_canonical(format!("{path}{name}/"))?)
            };
            if shared.is_watched(&child.full_path()) {
                child.adopt_stat(Some(stat));
            }
            contents.push(child);
        }
        if shared.is_watched(&path) {
            self.inner.state.lock().unwrap().contents = Some(contents.clone());
        }
        Ok(contents)
    }

    /// Create this directory. Fires `change` on the parent with this
    /// directory as `added`.
    pub async fn create(&self) -> Result<FileStat, FsError> {
        let entry = self.as_entry();
        let shared = entry.owner()?;
        let backend = shared.backend()?;
        let path = self.full_path();

        shared.begin_change();
        let result = backend.mkdir(&path).await;
        let outcome = match result {
            Ok(stat) => {
                entry.adopt_stat(Some(stat.clone()));
                let parent_path = self.parent_path();
                if !parent_path.is_empty() {
                    if let Ok(parent) = shared.directory_for_canonical(parent_path) {
                        parent.as_entry().clear_cached_data();
                        shared.fire_change(&ChangeEvent::with_children(
                            Entry::Directory(parent),
                            Some(vec![entry.clone()]),
                            None,
                        ));
                    }
                }
                Ok(stat)
            }
            Err(err) => Err(err),
        };
        shared.end_change().await;
        outcome
    }

    /// Walk this directory and everything beneath it, visiting the
    /// directory itself first. The visitor returning false prunes the
    /// subtree below the rejected entry.
    pub async fn visit<V>(&self, mut visitor: V) -> Result<(), FsError>
    where
        V: FnMut(&Entry) -> bool + Send,
    {
        let root = self.as_entry();
        if !visitor(&root) {
            return Ok(());
        }
        let mut pending: VecDeque<Directory> = VecDeque::from([self.clone()]);
        while let Some(dir) = pending.pop_front() {
            for child in dir.get_contents().await? {
                if !visitor(&child) {
                    continue;
                }
                if let Entry::Directory(sub) = &child {
                    pending.push_back(sub.clone());
                }
            }
        }
        Ok(())
    }
}
