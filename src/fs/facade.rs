//! The filesystem façade.
//!
//! [`FileSystem`] is the single entry point application code talks to. It
//! normalizes paths, interns entry handles through the index, runs watch
//! and unwatch requests through the serial queue, and coordinates
//! in-process mutations with externally observed changes so listeners see
//! a consistent picture.
//!
//! The core assumes cooperative single-driver use: operations suspend only
//! at backend calls, and observers run synchronously at event-fire time.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use tokio::sync::mpsc;

use crate::backend::{Backend, BackendNotice, OpenDialogOptions, SaveDialogOptions};
use crate::error::FsError;
use crate::fs::changes::{ChangeCoordinator, ExternalChange};
use crate::fs::entry::{Directory, Entry, File};
use crate::fs::events::{ChangeEvent, EventDispatcher, ListenerId};
use crate::fs::index::EntryIndex;
use crate::fs::stat::FileStat;
use crate::path_util;
use crate::watch::queue::WatchRequestQueue;
use crate::watch::roots::{WatchFilter, WatchedRoot, WatchedRoots};

/// Shared core state behind every [`FileSystem`] handle and entry.
pub(crate) struct FsShared {
    me: Weak<FsShared>,
    backend: OnceLock<Arc<dyn Backend>>,
    queue: OnceLock<WatchRequestQueue>,
    index: Mutex<EntryIndex>,
    roots: Mutex<WatchedRoots>,
    changes: ChangeCoordinator,
    events: EventDispatcher,
}

impl FsShared {
    pub(crate) fn backend(&self) -> Result<Arc<dyn Backend>, FsError> {
        self.backend.get().cloned().ok_or(FsError::NotInitialized)
    }

    fn queue(&self) -> Result<&WatchRequestQueue, FsError> {
        self.queue.get().ok_or(FsError::NotInitialized)
    }

    fn unc_paths(&self) -> bool {
        self.backend
            .get()
            .map(|backend| backend.normalize_unc_paths())
            .unwrap_or(false)
    }

    /// Intern a file handle for an already-canonical path.
    pub(crate) fn file_for_canonical(&self, canonical: String) -> Result<File, FsError> {
        let mut index = self.index.lock().unwrap();
        match index.get(&canonical) {
            Some(Entry::File(file)) => Ok(file),
            Some(Entry::Directory(_)) => Err(FsError::InvalidPath(canonical)),
            None => {
                let file = File::new(canonical, self.me.clone());
                index.add(Entry::File(file.clone()));
                Ok(file)
            }
        }
    }

    /// Intern a directory handle for an already-canonical path.
    pub(crate) fn directory_for_canonical(&self, canonical: String) -> Result<Directory, FsError> {
        let mut index = self.index.lock().unwrap();
        match index.get(&canonical) {
            Some(Entry::Directory(dir)) => Ok(dir),
            Some(Entry::File(_)) => Err(FsError::InvalidPath(canonical)),
            None => {
                let dir = Directory::new(canonical, self.me.clone());
                index.add(Entry::Directory(dir.clone()));
                Ok(dir)
            }
        }
    }

    /// Whether a child discovered during enumeration should be indexed.
    /// Under a watched root (pending ones included, so the initial scan is
    /// already filtered) the root's filter decides; elsewhere everything is
    /// included so explicit lookups outside watched roots keep working.
    pub(crate) fn should_index(&self, name: &str, parent_path: &str) -> bool {
        let roots = self.roots.lock().unwrap();
        match roots.covering(parent_path) {
            Some(root) => root.filter.as_ref()(name, parent_path),
            None => true,
        }
    }

    /// True when `path` lies under an active watched root, which is when
    /// cached stats and listings are kept fresh by the watcher.
    pub(crate) fn is_watched(&self, path: &str) -> bool {
        self.roots.lock().unwrap().covering_active(path).is_some()
    }

    pub(crate) fn begin_change(&self) {
        self.changes.begin();
    }

    pub(crate) async fn end_change(&self) {
        self.changes.end();
        self.drain_external().await;
    }

    pub(crate) async fn enqueue_external_change(
        &self,
        path: Option<String>,
        stat: Option<FileStat>,
    ) {
        self.changes.push(ExternalChange { path, stat });
        self.drain_external().await;
    }

    async fn drain_external(&self) {
        while let Some(change) = self.changes.next_ready() {
            self.handle_external_change(change.path, change.stat).await;
        }
    }

    pub(crate) fn fire_change(&self, event: &ChangeEvent) {
        self.events.fire_change(event);
    }

    pub(crate) fn fire_rename(&self, old_path: &str, new_path: &str) {
        self.events.fire_rename(old_path, new_path);
    }

    /// Bulk path update after an in-process rename: re-key the index and
    /// any watched roots that moved with the subtree.
    pub(crate) fn apply_rename(&self, old_path: &str, new_path: &str, is_directory: bool) {
        self.index
            .lock()
            .unwrap()
            .entry_renamed(old_path, new_path, is_directory);
        let mut roots = self.roots.lock().unwrap();
        if is_directory {
            roots.entry_renamed(old_path, new_path);
        } else if let Some(root) = roots.remove(old_path) {
            roots.insert(new_path.to_string(), root);
        }
    }

    /// Drop an entry (and, for directories, its subtree) from the index,
    /// clearing caches on everything removed.
    pub(crate) fn prune_entry(&self, entry: &Entry) {
        let removed = {
            let mut index = self.index.lock().unwrap();
            if entry.is_directory() {
                index.prune_prefix(&entry.full_path())
            } else {
                index.remove(entry);
                vec![entry.clone()]
            }
        };
        for entry in removed {
            entry.clear_cached_data();
        }
    }

    /// Clear cached stat and contents on every indexed entry under
    /// `prefix`. Once a subtree is unwatched its caches are no longer
    /// refreshed and must not be served stale.
    fn clear_cached_under(&self, prefix: &str) {
        let index = self.index.lock().unwrap();
        index.visit_all(|entry| {
            if entry.full_path().starts_with(prefix) {
                entry.clear_cached_data();
            }
        });
    }

    /// Run a watch request through the serial queue.
    pub(crate) async fn dispatch_watch(
        &self,
        entry: &Entry,
        filter: &WatchFilter,
        is_root_request: bool,
    ) -> Result<(), FsError> {
        let shared = self.me.upgrade().ok_or(FsError::NotInitialized)?;
        let entry = entry.clone();
        let filter = filter.clone();
        self.queue()?
            .run(async move {
                let backend = shared.backend()?;
                let targets =
                    watch_targets(&entry, &filter, backend.recursive_watch(), is_root_request)
                        .await?;
                let mut first_error = None;
                for target in &targets {
                    if let Err(err) = backend.watch_path(target).await {
                        tracing::warn!(path = %target, %err, "watch request failed");
                        first_error.get_or_insert(err);
                    }
                }
                match first_error {
                    None => Ok(()),
                    Some(err) => Err(err),
                }
            })
            .await
    }

    /// Run an unwatch request through the serial queue, then clear caches
    /// under the entry regardless of the backend outcome.
    pub(crate) async fn dispatch_unwatch(
        &self,
        entry: &Entry,
        filter: &WatchFilter,
        is_root_request: bool,
    ) -> Result<(), FsError> {
        let shared = self.me.upgrade().ok_or(FsError::NotInitialized)?;
        let job_entry = entry.clone();
        let filter = filter.clone();
        let result = self
            .queue()?
            .run(async move {
                let backend = shared.backend()?;
                let targets =
                    watch_targets(&job_entry, &filter, backend.recursive_watch(), is_root_request)
                        .await?;
                let mut first_error = None;
                for target in &targets {
                    if let Err(err) = backend.unwatch_path(target).await {
                        tracing::warn!(path = %target, %err, "unwatch request failed");
                        first_error.get_or_insert(err);
                    }
                }
                match first_error {
                    None => Ok(()),
                    Some(err) => Err(err),
                }
            })
            .await;
        self.clear_cached_under(&entry.full_path());
        result
    }

    /// Deliver one externally observed change.
    async fn handle_external_change(&self, path: Option<String>, stat: Option<FileStat>) {
        let Some(raw) = path else {
            // Wholesale: everything may be stale.
            self.clear_cached_under("");
            self.fire_change(&ChangeEvent::wholesale());
            return;
        };

        let entry = {
            let as_file = match path_util::normalize(&raw, false, self.unc_paths()) {
                Ok(path) => path,
                Err(err) => {
                    tracing::warn!(path = %raw, %err, "dropping unparseable external change");
                    return;
                }
            };
            let index = self.index.lock().unwrap();
            // Watcher callbacks may omit the trailing slash on directories.
            index
                .get(&as_file)
                .or_else(|| index.get(&path_util::with_trailing_slash(&as_file)))
        };
        // Unknown paths are dropped; entries are never speculatively
        // instantiated from watcher traffic.
        let Some(entry) = entry else { return };

        match entry {
            Entry::File(file) => {
                let fresh = file.as_entry().cached_stat();
                if let (Some(new_stat), Some(old_stat)) = (&stat, &fresh) {
                    if new_stat.same_mtime(old_stat) {
                        return;
                    }
                }
                let entry = file.as_entry();
                entry.clear_cached_data();
                entry.adopt_stat(stat);
                self.fire_change(&ChangeEvent::entry(entry));
            }
            Entry::Directory(dir) => self.handle_directory_change(dir, stat).await,
        }
    }

    /// Reload a changed directory, diff its listing by identity, and keep
    /// watches in step with the diff before notifying listeners.
    async fn handle_directory_change(&self, dir: Directory, stat: Option<FileStat>) {
        let entry = dir.as_entry();
        let old_contents = entry.take_cached_contents().unwrap_or_default();
        entry.clear_cached_data();

        let new_contents = match dir.get_contents().await {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(path = %entry.full_path(), %err, "failed to reload changed directory");
                if stat.is_some() {
                    entry.adopt_stat(stat);
                }
                self.fire_change(&ChangeEvent::entry(entry));
                return;
            }
        };

        let added: Vec<Entry> = new_contents
            .iter()
            .filter(|child| !old_contents.contains(child))
            .cloned()
            .collect();
        let removed: Vec<Entry> = old_contents
            .iter()
            .filter(|child| !new_contents.contains(child))
            .cloned()
            .collect();

        let covering = {
            let roots = self.roots.lock().unwrap();
            roots.covering_active(&entry.full_path()).cloned()
        };
        if let Some(root) = covering {
            for child in &added {
                if let Err(err) = self.dispatch_watch(child, &root.filter, false).await {
                    tracing::warn!(path = %child.full_path(), %err, "failed to watch added entry");
                }
            }
            for child in &removed {
                if let Err(err) = self.dispatch_unwatch(child, &root.filter, false).await {
                    tracing::warn!(path = %child.full_path(), %err, "failed to unwatch removed entry");
                }
            }
        }
        for child in &removed {
            self.prune_entry(child);
        }
        if stat.is_some() {
            entry.adopt_stat(stat);
        }
        self.fire_change(&ChangeEvent::with_children(
            entry,
            Some(added),
            Some(removed),
        ));
    }

    /// Backend went offline: tear down every watched root, then treat the
    /// whole filesystem as changed.
    async fn handle_offline(&self) {
        tracing::warn!("backend offline, dropping all watched roots");
        let drained = self.roots.lock().unwrap().drain();
        for (_, root) in drained {
            let _ = self.dispatch_unwatch(&root.entry, &root.filter, true).await;
            self.prune_entry(&root.entry);
        }
        self.enqueue_external_change(None, None).await;
    }
}

/// The set of backend paths a watch or unwatch request must touch.
///
/// Recursive backends need a single call on the root and nothing for
/// non-root entries. Non-recursive backends get one call per directory
/// under the entry that passes the root's filter; rejected directories
/// prune their subtree.
async fn watch_targets(
    entry: &Entry,
    filter: &WatchFilter,
    recursive: bool,
    is_root_request: bool,
) -> Result<Vec<String>, FsError> {
    if recursive {
        return Ok(if is_root_request {
            vec![entry.full_path()]
        } else {
            Vec::new()
        });
    }
    let mut targets = Vec::new();
    match entry {
        Entry::File(file) => {
            if filter.as_ref()(&file.name(), &file.parent_path()) {
                targets.push(file.full_path());
            }
        }
        Entry::Directory(dir) => {
            dir.visit(|child: &Entry| {
                if !filter.as_ref()(&child.name(), &child.parent_path()) {
                    return false;
                }
                if child.is_directory() || child == entry {
                    targets.push(child.full_path());
                }
                true
            })
            .await?;
        }
    }
    Ok(targets)
}

/// The virtual filesystem façade.
///
/// Create one with [`FileSystem::new`], wire a backend with
/// [`FileSystem::init`] (exactly once), then hand out interned entry
/// handles. Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct FileSystem {
    pub(crate) shared: Arc<FsShared>,
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem {
    /// Create an uninitialized facade.
    pub fn new() -> Self {
        let shared = Arc::new_cyclic(|me| FsShared {
            me: me.clone(),
            backend: OnceLock::new(),
            queue: OnceLock::new(),
            index: Mutex::new(EntryIndex::new()),
            roots: Mutex::new(WatchedRoots::new()),
            changes: ChangeCoordinator::new(),
            events: EventDispatcher::new(),
        });
        Self { shared }
    }

    /// Attach the backend and start the notification pipeline. May be
    /// called exactly once; a second call panics.
    ///
    /// Must run inside a tokio runtime: it spawns the watch-queue worker
    /// and the listener task that feeds backend notices into the change
    /// coordinator.
    pub fn init(&self, backend: Arc<dyn Backend>) {
        assert!(
            self.shared.backend.set(Arc::clone(&backend)).is_ok(),
            "filesystem already initialized"
        );
        let _ = self.shared.queue.set(WatchRequestQueue::start());

        let (tx, mut rx) = mpsc::unbounded_channel();
        backend.init_watchers(tx);
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                let Some(shared) = weak.upgrade() else { break };
                match notice {
                    BackendNotice::Changed { path, stat } => {
                        shared.enqueue_external_change(path, stat).await;
                    }
                    BackendNotice::Offline => shared.handle_offline().await,
                }
            }
        });
    }

    /// Drop all backend watches and forget every interned entry.
    pub async fn close(&self) -> Result<(), FsError> {
        let backend = self.shared.backend()?;
        let result = backend.unwatch_all().await;
        self.shared.roots.lock().unwrap().clear();
        let mut index = self.shared.index.lock().unwrap();
        tracing::debug!(entries = index.len(), "closing filesystem");
        index.clear();
        result
    }

    /// Interned file handle for `path`. Fails only on path validity; the
    /// target need not exist.
    pub fn get_file_for_path(&self, path: &str) -> Result<File, FsError> {
        let canonical = path_util::normalize(path, false, self.shared.unc_paths())?;
        self.shared.file_for_canonical(canonical)
    }

    /// Interned directory handle for `path`. Fails only on path validity;
    /// the target need not exist.
    pub fn get_directory_for_path(&self, path: &str) -> Result<Directory, FsError> {
        let canonical = path_util::normalize(path, true, self.shared.unc_paths())?;
        self.shared.directory_for_canonical(canonical)
    }

    /// Resolve a path to an existing entry plus its stat, consulting the
    /// index first and the backend for paths not yet interned.
    pub async fn resolve(&self, path: &str) -> Result<(Entry, FileStat), FsError> {
        let as_file = path_util::normalize(path, false, self.shared.unc_paths())?;
        let existing = {
            let index = self.shared.index.lock().unwrap();
            index
                .get(&as_file)
                .or_else(|| index.get(&path_util::with_trailing_slash(&as_file)))
        };
        if let Some(entry) = existing {
            let stat = entry.stat().await?;
            return Ok((entry, stat));
        }

        let backend = self.shared.backend()?;
        // Raw stat on the original path: the slash policy depends on what
        // kind of entry turns out to live there.
        let stat = backend.stat(path).await?;
        let entry = if stat.is_file {
            Entry::File(self.shared.file_for_canonical(as_file)?)
        } else {
            Entry::Directory(
                self.shared
                    .directory_for_canonical(path_util::with_trailing_slash(&as_file))?,
            )
        };
        if self.shared.is_watched(&entry.full_path()) {
            entry.adopt_stat(Some(stat.clone()));
        }
        Ok((entry, stat))
    }

    /// Watch a subtree. `filter` is called with `(name, parent_path)` for
    /// every entry discovered under the root; returning false excludes the
    /// entry and prunes everything beneath it.
    ///
    /// Fails when the root overlaps an active watched root in either
    /// direction. A failed backend watch removes the pending root and
    /// surfaces the error.
    pub async fn watch(
        &self,
        entry: &Entry,
        filter: impl Fn(&str, &str) -> bool + Send + Sync + 'static,
    ) -> Result<(), FsError> {
        let filter: WatchFilter = Arc::new(filter);
        let path = entry.full_path();
        {
            let mut roots = self.shared.roots.lock().unwrap();
            roots.check_overlap(&path)?;
            roots.insert(
                path.clone(),
                WatchedRoot {
                    entry: entry.clone(),
                    filter: filter.clone(),
                    active: false,
                },
            );
        }

        let result = self.shared.dispatch_watch(entry, &filter, true).await;
        {
            let mut roots = self.shared.roots.lock().unwrap();
            match &result {
                Ok(()) => roots.activate(&path),
                Err(_) => {
                    roots.remove(&path);
                }
            }
        }
        result
    }

    /// Stop watching a subtree. The root and every indexed entry under it
    /// are pruned even when the backend unwatch fails; the error is still
    /// surfaced.
    pub async fn unwatch(&self, entry: &Entry) -> Result<(), FsError> {
        let path = entry.full_path();
        let filter = {
            let mut roots = self.shared.roots.lock().unwrap();
            roots
                .deactivate(&path)
                .ok_or_else(|| FsError::NotWatched(path.clone()))?
        };

        let result = self.shared.dispatch_unwatch(entry, &filter, true).await;
        self.shared.roots.lock().unwrap().remove(&path);
        self.shared.prune_entry(entry);
        result
    }

    /// Open-dialog passthrough. Cancellation is an empty selection.
    pub async fn show_open_dialog(
        &self,
        options: &OpenDialogOptions,
    ) -> Result<Vec<String>, FsError> {
        self.shared.backend()?.show_open_dialog(options).await
    }

    /// Save-dialog passthrough. Cancellation is `None`.
    pub async fn show_save_dialog(
        &self,
        options: &SaveDialogOptions,
    ) -> Result<Option<String>, FsError> {
        self.shared.backend()?.show_save_dialog(options).await
    }

    /// Register a `change` observer. Observers fire in registration order.
    pub fn on_change(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerId {
        self.shared.events.on_change(listener)
    }

    /// Unregister a `change` observer.
    pub fn off_change(&self, id: ListenerId) -> bool {
        self.shared.events.off_change(id)
    }

    /// Register a `rename` observer.
    pub fn on_rename(&self, listener: impl Fn(&str, &str) + Send + Sync + 'static) -> ListenerId {
        self.shared.events.on_rename(listener)
    }

    /// Unregister a `rename` observer.
    pub fn off_rename(&self, id: ListenerId) -> bool {
        self.shared.events.off_rename(id)
    }

    /// Open a mutation bracket. External changes observed while any
    /// bracket is open are queued instead of delivered. Entry mutations
    /// bracket themselves; use this only around compound operations.
    pub fn begin_change(&self) {
        self.shared.begin_change();
    }

    /// Close a mutation bracket, draining deferred external changes when
    /// this was the outermost one.
    pub async fn end_change(&self) {
        self.shared.end_change().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    type ChangeRecord = (Option<String>, Vec<String>, Vec<String>);

    struct Recorder {
        changes: Arc<StdMutex<Vec<ChangeRecord>>>,
        renames: Arc<StdMutex<Vec<(String, String)>>>,
    }

    impl Recorder {
        fn attach(fs: &FileSystem) -> Self {
            let changes = Arc::new(StdMutex::new(Vec::new()));
            let renames = Arc::new(StdMutex::new(Vec::new()));

            let changes_cb = Arc::clone(&changes);
            fs.on_change(move |event| {
                let paths = |entries: &Option<Vec<Entry>>| {
                    entries
                        .iter()
                        .flatten()
                        .map(Entry::full_path)
                        .collect::<Vec<_>>()
                };
                changes_cb.lock().unwrap().push((
                    event.entry.as_ref().map(Entry::full_path),
                    paths(&event.added),
                    paths(&event.removed),
                ));
            });
            let renames_cb = Arc::clone(&renames);
            fs.on_rename(move |old, new| {
                renames_cb
                    .lock()
                    .unwrap()
                    .push((old.to_string(), new.to_string()));
            });
            Self { changes, renames }
        }

        fn changes(&self) -> Vec<ChangeRecord> {
            self.changes.lock().unwrap().clone()
        }

        fn renames(&self) -> Vec<(String, String)> {
            self.renames.lock().unwrap().clone()
        }
    }

    fn setup(backend: MemoryBackend) -> (FileSystem, Arc<MemoryBackend>) {
        let backend = Arc::new(backend);
        let fs = FileSystem::new();
        fs.init(backend.clone());
        (fs, backend)
    }

    #[tokio::test]
    async fn test_equivalent_paths_intern_to_same_handle() {
        let (fs, _) = setup(MemoryBackend::new());
        let first = fs.get_file_for_path("/a//b/../b/c.txt").unwrap();
        let second = fs.get_file_for_path("/a/b/c.txt").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.full_path(), "/a/b/c.txt");
        assert_eq!(second.full_path(), "/a/b/c.txt");

        let dir_one = fs.get_directory_for_path("/x/y").unwrap();
        let dir_two = fs.get_directory_for_path("/x//y/").unwrap();
        assert_eq!(dir_one, dir_two);
    }

    #[tokio::test]
    async fn test_directory_paths_gain_trailing_slash() {
        let (fs, _) = setup(MemoryBackend::new());
        let dir = fs.get_directory_for_path("/x/y").unwrap();
        assert_eq!(dir.full_path(), "/x/y/");
    }

    #[tokio::test]
    async fn test_path_validity_errors() {
        let (fs, _) = setup(MemoryBackend::new());
        assert_eq!(
            fs.get_file_for_path("/../a"),
            Err(FsError::InvalidPath("/../a".to_string()))
        );
        assert_eq!(
            fs.get_file_for_path("relative/a"),
            Err(FsError::AbsolutePathRequired("relative/a".to_string()))
        );
    }

    #[tokio::test]
    async fn test_external_change_deferred_until_quiescent() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/p/f.txt", b"data");
        let file = fs.get_file_for_path("/p/f.txt").unwrap();
        let recorder = Recorder::attach(&fs);

        fs.begin_change();
        fs.shared
            .enqueue_external_change(Some("/p/f.txt".to_string()), backend.stat_for("/p/f.txt"))
            .await;
        assert!(recorder.changes().is_empty(), "delivery must be deferred");
        assert_eq!(fs.shared.changes.deferred_len(), 1);

        fs.end_change().await;
        let changes = recorder.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0.as_deref(), Some("/p/f.txt"));
        assert_eq!(file.as_entry().cached_stat(), backend.stat_for("/p/f.txt"));
    }

    #[tokio::test]
    async fn test_rename_observed_as_single_rename() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/a/b/f.txt", b"hi");
        let dir = fs.get_directory_for_path("/a/b").unwrap();
        let file = fs.get_file_for_path("/a/b/f.txt").unwrap();
        let recorder = Recorder::attach(&fs);

        // The watcher races the in-process rename: it reports the old path
        // gone and the new path present while the operation is still open.
        fs.begin_change();
        fs.shared
            .enqueue_external_change(Some("/a/b".to_string()), None)
            .await;
        dir.rename("/a/c").await.unwrap();
        fs.shared
            .enqueue_external_change(Some("/a/c".to_string()), backend.stat_for("/a/c"))
            .await;
        assert!(recorder.changes().is_empty());
        fs.end_change().await;

        assert_eq!(
            recorder.renames(),
            [("/a/b/".to_string(), "/a/c/".to_string())]
        );
        assert_eq!(dir.full_path(), "/a/c/");
        assert_eq!(file.full_path(), "/a/c/f.txt");
        assert_eq!(fs.get_file_for_path("/a/c/f.txt").unwrap(), file);

        let changes = recorder.changes();
        assert!(
            changes.iter().all(|(path, _, _)| {
                path.as_deref() != Some("/a/b/") && path.as_deref() != Some("/a/b")
            }),
            "no change may surface for the old path: {changes:?}"
        );
        assert!(changes.len() <= 1, "at most one change after drain: {changes:?}");
    }

    #[tokio::test]
    async fn test_watched_root_overlap_rejected() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/proj/sub/a.txt", b"a");
        let proj = fs.get_directory_for_path("/proj").unwrap().as_entry();
        let sub = fs.get_directory_for_path("/proj/sub").unwrap().as_entry();
        let root = fs.get_directory_for_path("/").unwrap().as_entry();

        fs.watch(&proj, |_, _| true).await.unwrap();
        assert_eq!(
            fs.watch(&sub, |_, _| true).await,
            Err(FsError::ParentAlreadyWatched("/proj/sub/".to_string()))
        );
        assert_eq!(
            fs.watch(&root, |_, _| true).await,
            Err(FsError::ChildAlreadyWatched("/".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failed_watch_leaves_registry_clean() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_dir("/proj");
        backend.fail_watch_path("/proj/");
        let proj = fs.get_directory_for_path("/proj").unwrap().as_entry();

        let err = fs.watch(&proj, |_, _| true).await.unwrap_err();
        assert_eq!(err, FsError::Backend("cannot watch /proj/".to_string()));

        backend.clear_watch_failures();
        fs.watch(&proj, |_, _| true).await.unwrap();
        assert_eq!(backend.watched_paths(), ["/proj/"]);
    }

    #[tokio::test]
    async fn test_unwatch_prunes_index_and_fails_forward() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/proj/a.txt", b"a");
        backend.add_file("/proj/sub/b.txt", b"b");
        let proj = fs.get_directory_for_path("/proj").unwrap();
        fs.watch(&proj.as_entry(), |_, _| true).await.unwrap();
        proj.get_contents().await.unwrap();
        assert!(fs.shared.index.lock().unwrap().get("/proj/a.txt").is_some());

        backend.fail_unwatch_path("/proj/");
        let err = fs.unwatch(&proj.as_entry()).await.unwrap_err();
        assert_eq!(err, FsError::Backend("cannot unwatch /proj/".to_string()));

        let index = fs.shared.index.lock().unwrap();
        let mut survivors = Vec::new();
        index.visit_all(|entry| survivors.push(entry.full_path()));
        assert!(
            survivors.iter().all(|path| !path.starts_with("/proj/")),
            "unwatch must prune even on backend failure: {survivors:?}"
        );
        drop(index);

        assert_eq!(
            fs.unwatch(&proj.as_entry()).await,
            Err(FsError::NotWatched("/proj/".to_string()))
        );
    }

    #[tokio::test]
    async fn test_recursive_watch_issues_single_backend_call() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/proj/sub/a.txt", b"a");
        let proj = fs.get_directory_for_path("/proj").unwrap().as_entry();
        fs.watch(&proj, |_, _| true).await.unwrap();
        assert_eq!(backend.watched_paths(), ["/proj/"]);
    }

    #[tokio::test]
    async fn test_non_recursive_watch_enumerates_filtered_directories() {
        let (fs, backend) = setup(MemoryBackend::new().with_recursive_watch(false));
        backend.add_file("/proj/a.txt", b"a");
        backend.add_file("/proj/sub/b.txt", b"b");
        backend.add_file("/proj/node_modules/x.js", b"x");
        let proj = fs.get_directory_for_path("/proj").unwrap().as_entry();

        fs.watch(&proj, |name, _| name != "node_modules").await.unwrap();
        assert_eq!(backend.watched_paths(), ["/proj/", "/proj/sub/"]);

        // The rejected subtree was pruned from enumeration and the index.
        let index = fs.shared.index.lock().unwrap();
        assert!(index.get("/proj/node_modules/").is_none());
        assert!(index.get("/proj/node_modules/x.js").is_none());
        drop(index);

        fs.unwatch(&proj).await.unwrap();
        assert!(backend.watched_paths().is_empty());
    }

    #[tokio::test]
    async fn test_directory_external_change_diffs_listing() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/proj/a.txt", b"a");
        let proj = fs.get_directory_for_path("/proj").unwrap();
        fs.watch(&proj.as_entry(), |_, _| true).await.unwrap();
        proj.get_contents().await.unwrap();
        let recorder = Recorder::attach(&fs);

        backend.add_file("/proj/new.txt", b"n");
        fs.shared
            .enqueue_external_change(Some("/proj".to_string()), backend.stat_for("/proj"))
            .await;

        let changes = recorder.changes();
        assert_eq!(changes.len(), 1);
        let (path, added, removed) = &changes[0];
        assert_eq!(path.as_deref(), Some("/proj/"));
        assert_eq!(added, &["/proj/new.txt"]);
        assert!(removed.is_empty());
        assert!(fs.shared.index.lock().unwrap().get("/proj/new.txt").is_some());

        backend.unlink("/proj/new.txt").await.unwrap();
        fs.shared
            .enqueue_external_change(Some("/proj".to_string()), backend.stat_for("/proj"))
            .await;

        let changes = recorder.changes();
        assert_eq!(changes.len(), 2);
        let (_, added, removed) = &changes[1];
        assert!(added.is_empty());
        assert_eq!(removed, &["/proj/new.txt"]);
        assert!(fs.shared.index.lock().unwrap().get("/proj/new.txt").is_none());
    }

    #[tokio::test]
    async fn test_file_external_change_dedupes_on_matching_mtime() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/proj/a.txt", b"a");
        let file = fs.get_file_for_path("/proj/a.txt").unwrap();
        file.stat().await.unwrap();
        let recorder = Recorder::attach(&fs);

        fs.shared
            .enqueue_external_change(Some("/proj/a.txt".to_string()), backend.stat_for("/proj/a.txt"))
            .await;
        assert!(recorder.changes().is_empty(), "matching mtime is a no-op");

        backend.write_file("/proj/a.txt", b"changed").await.unwrap();
        let fresh = backend.stat_for("/proj/a.txt");
        fs.shared
            .enqueue_external_change(Some("/proj/a.txt".to_string()), fresh.clone())
            .await;
        let changes = recorder.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0.as_deref(), Some("/proj/a.txt"));
        assert_eq!(file.as_entry().cached_stat(), fresh);
    }

    #[tokio::test]
    async fn test_wholesale_change_clears_caches() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/proj/a.txt", b"a");
        let file = fs.get_file_for_path("/proj/a.txt").unwrap();
        file.stat().await.unwrap();
        assert!(file.as_entry().cached_stat().is_some());
        let recorder = Recorder::attach(&fs);

        fs.shared.enqueue_external_change(None, None).await;

        let changes = recorder.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, None);
        assert!(file.as_entry().cached_stat().is_none());
    }

    #[tokio::test]
    async fn test_offline_drops_roots_and_fires_wholesale() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/proj/a.txt", b"a");
        let proj = fs.get_directory_for_path("/proj").unwrap().as_entry();
        fs.watch(&proj, |_, _| true).await.unwrap();
        let recorder = Recorder::attach(&fs);

        backend.emit_offline();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let changes = recorder.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, None, "offline ends in a wholesale change");
        // The registry is empty again, so a fresh watch cannot collide.
        fs.watch(&proj, |_, _| true).await.unwrap();
    }

    #[tokio::test]
    async fn test_notices_flow_through_listener_task() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/p/f.txt", b"data");
        fs.get_file_for_path("/p/f.txt").unwrap();
        let recorder = Recorder::attach(&fs);

        backend.emit_changed(Some("/p/f.txt"), backend.stat_for("/p/f.txt"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let changes = recorder.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0.as_deref(), Some("/p/f.txt"));
    }

    #[tokio::test]
    async fn test_write_create_and_unlink_events() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_dir("/proj");
        let recorder = Recorder::attach(&fs);

        let file = fs.get_file_for_path("/proj/new.txt").unwrap();
        file.write(b"hello").await.unwrap();
        let changes = recorder.changes();
        assert_eq!(changes.last().unwrap().0.as_deref(), Some("/proj/"));
        assert_eq!(changes.last().unwrap().1, ["/proj/new.txt"]);

        file.write(b"hello again").await.unwrap();
        let changes = recorder.changes();
        assert_eq!(changes.last().unwrap().0.as_deref(), Some("/proj/new.txt"));

        let (data, stat) = file.read().await.unwrap();
        assert_eq!(&data[..], b"hello again");
        assert_eq!(stat.size, 11);

        let build = fs.get_directory_for_path("/proj/build").unwrap();
        build.create().await.unwrap();
        let changes = recorder.changes();
        assert_eq!(changes.last().unwrap().1, ["/proj/build/"]);

        file.unlink().await.unwrap();
        let changes = recorder.changes();
        assert_eq!(changes.last().unwrap().0.as_deref(), Some("/proj/"));
        assert_eq!(changes.last().unwrap().2, ["/proj/new.txt"]);
        assert!(fs.shared.index.lock().unwrap().get("/proj/new.txt").is_none());
    }

    #[tokio::test]
    async fn test_resolve_picks_kind_from_backend() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/proj/a.txt", b"abc");
        backend.add_dir("/proj/sub");

        let (entry, stat) = fs.resolve("/proj/a.txt").await.unwrap();
        assert!(entry.is_file());
        assert_eq!(stat.size, 3);

        let (entry, stat) = fs.resolve("/proj/sub").await.unwrap();
        assert!(entry.is_directory());
        assert!(stat.is_directory());
        assert_eq!(entry.full_path(), "/proj/sub/");

        // A second resolve returns the interned handle.
        let (again, _) = fs.resolve("/proj/sub").await.unwrap();
        assert_eq!(entry, again);

        let missing = fs.resolve("/proj/nope").await.unwrap_err();
        assert_eq!(missing, FsError::Backend("no such entry: /proj/nope".to_string()));
    }

    #[tokio::test]
    async fn test_dialog_passthrough() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.set_open_dialog_selection(vec!["/proj".to_string()]);
        backend.set_save_dialog_choice(Some("/proj/out.txt".to_string()));

        let selection = fs
            .show_open_dialog(&OpenDialogOptions::default())
            .await
            .unwrap();
        assert_eq!(selection, ["/proj"]);

        let choice = fs
            .show_save_dialog(&SaveDialogOptions::default())
            .await
            .unwrap();
        assert_eq!(choice.as_deref(), Some("/proj/out.txt"));

        // Cancellation: empty scripted results, still no error.
        backend.set_open_dialog_selection(Vec::new());
        backend.set_save_dialog_choice(None);
        assert!(fs
            .show_open_dialog(&OpenDialogOptions::default())
            .await
            .unwrap()
            .is_empty());
        assert!(fs
            .show_save_dialog(&SaveDialogOptions::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_close_clears_state() {
        let (fs, backend) = setup(MemoryBackend::new());
        backend.add_file("/proj/a.txt", b"a");
        let proj = fs.get_directory_for_path("/proj").unwrap();
        fs.watch(&proj.as_entry(), |_, _| true).await.unwrap();
        proj.get_contents().await.unwrap();

        fs.close().await.unwrap();
        assert!(backend.watched_paths().is_empty());
        assert_eq!(fs.shared.index.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    #[should_panic(expected = "filesystem already initialized")]
    async fn test_double_init_panics() {
        let fs = FileSystem::new();
        fs.init(Arc::new(MemoryBackend::new()));
        fs.init(Arc::new(MemoryBackend::new()));
    }
}
