//! Watched-root records and the registry that keeps them disjoint.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FsError;
use crate::fs::entry::Entry;

/// Include filter applied to entries discovered under a watched root.
///
/// Called with `(name, parent_path)`; returning false excludes the entry
/// and prunes everything beneath it.
pub type WatchFilter = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// One watched subtree.
#[derive(Clone)]
pub(crate) struct WatchedRoot {
    pub entry: Entry,
    pub filter: WatchFilter,
    /// True only between successful watch completion and the start of
    /// unwatch.
    pub active: bool,
}

/// Registry of watched roots keyed by canonical full path.
///
/// No two active roots may be in ancestor/descendant relation; the filter
/// lookup therefore finds at most one covering root for any path.
#[derive(Default)]
pub(crate) struct WatchedRoots {
    roots: HashMap<String, WatchedRoot>,
}

impl WatchedRoots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject a new root that overlaps an active one in either direction.
    /// Watching an already-watched path counts as the parent case.
    pub fn check_overlap(&self, path: &str) -> Result<(), FsError> {
        for (root_path, root) in &self.roots {
            if !root.active {
                continue;
            }
            if path.starts_with(root_path.as_str()) {
                return Err(FsError::ParentAlreadyWatched(path.to_string()));
            }
            if root_path.starts_with(path) {
                return Err(FsError::ChildAlreadyWatched(path.to_string()));
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, path: String, root: WatchedRoot) {
        self.roots.insert(path, root);
    }

    pub fn activate(&mut self, path: &str) {
        if let Some(root) = self.roots.get_mut(path) {
            root.active = true;
        }
    }

    pub fn deactivate(&mut self, path: &str) -> Option<WatchFilter> {
        let root = self.roots.get_mut(path)?;
        root.active = false;
        Some(root.filter.clone())
    }

    pub fn remove(&mut self, path: &str) -> Option<WatchedRoot> {
        self.roots.remove(path)
    }

    pub fn clear(&mut self) {
        self.roots.clear();
    }

    /// The root whose subtree contains `path`, pending roots included.
    /// Pending roots participate so enumeration during the initial watch
    /// scan already applies the root's filter.
    pub fn covering(&self, path: &str) -> Option<&WatchedRoot> {
        self.roots
            .iter()
            .find(|(root_path, _)| path.starts_with(root_path.as_str()))
            .map(|(_, root)| root)
    }

    /// The active root whose subtree contains `path`.
    pub fn covering_active(&self, path: &str) -> Option<&WatchedRoot> {
        self.covering(path).filter(|root| root.active)
    }

    /// Deactivate and remove every root, returning them for teardown.
    pub fn drain(&mut self) -> Vec<(String, WatchedRoot)> {
        let mut drained: Vec<(String, WatchedRoot)> = self.roots.drain().collect();
        for (_, root) in &mut drained {
            root.active = false;
        }
        drained
    }

    /// Re-key roots moved by an in-process rename so the overlap invariant
    /// stays checkable against their new paths.
    pub fn entry_renamed(&mut self, old_path: &str, new_path: &str) {
        let moved: Vec<String> = self
            .roots
            .keys()
            .filter(|path| path.starts_with(old_path))
            .cloned()
            .collect();
        for key in moved {
            if let Some(root) = self.roots.remove(&key) {
                let renamed = format!("{new_path}{}", &key[old_path.len()..]);
                self.roots.insert(renamed, root);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::entry::tests::detached_dir;

    fn root(path: &str, active: bool) -> WatchedRoot {
        WatchedRoot {
            entry: Entry::Directory(detached_dir(path)),
            filter: Arc::new(|_, _| true),
            active,
        }
    }

    #[test]
    fn test_overlap_rejected_in_both_directions() {
        let mut roots = WatchedRoots::new();
        roots.insert("/proj/".to_string(), root("/proj/", true));

        assert_eq!(
            roots.check_overlap("/proj/sub/"),
            Err(FsError::ParentAlreadyWatched("/proj/sub/".to_string()))
        );
        assert_eq!(
            roots.check_overlap("/"),
            Err(FsError::ChildAlreadyWatched("/".to_string()))
        );
        assert_eq!(
            roots.check_overlap("/proj/"),
            Err(FsError::ParentAlreadyWatched("/proj/".to_string()))
        );
        assert_eq!(roots.check_overlap("/other/"), Ok(()));
    }

    #[test]
    fn test_inactive_roots_do_not_block() {
        let mut roots = WatchedRoots::new();
        roots.insert("/proj/".to_string(), root("/proj/", false));
        assert_eq!(roots.check_overlap("/proj/sub/"), Ok(()));
    }

    #[test]
    fn test_covering_includes_pending_roots() {
        let mut roots = WatchedRoots::new();
        roots.insert("/proj/".to_string(), root("/proj/", false));
        assert!(roots.covering("/proj/src/main.rs").is_some());
        assert!(roots.covering_active("/proj/src/main.rs").is_none());

        roots.activate("/proj/");
        assert!(roots.covering_active("/proj/src/main.rs").is_some());
        assert!(roots.covering("/elsewhere/").is_none());
    }

    #[test]
    fn test_entry_renamed_rekeys() {
        let mut roots = WatchedRoots::new();
        roots.insert("/old/proj/".to_string(), root("/old/proj/", true));
        roots.entry_renamed("/old/", "/new/");
        assert!(roots.covering("/new/proj/file").is_some());
        assert!(roots.covering("/old/proj/file").is_none());
    }
}
