//! Intern table mapping canonical paths to entry handles.
//!
//! The index is what makes handles stable: any two lookups that normalize
//! to the same canonical path observe the same underlying entry object.
//! Rename updates entries in place and re-keys the mapping, so held handles
//! survive a rename with their identity intact.

use std::collections::HashMap;

use crate::fs::entry::Entry;

/// Canonical path → entry handle mapping.
#[derive(Default)]
pub(crate) struct EntryIndex {
    entries: HashMap<String, Entry>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact lookup by canonical path.
    pub fn get(&self, path: &str) -> Option<Entry> {
        self.entries.get(path).cloned()
    }

    /// Insert an entry. The caller guarantees the path is not yet present.
    pub fn add(&mut self, entry: Entry) {
        let path = entry.full_path();
        debug_assert!(
            !self.entries.contains_key(&path),
            "entry already indexed: {path}"
        );
        self.entries.insert(path, entry);
    }

    /// Remove an entry by its current path.
    pub fn remove(&mut self, entry: &Entry) {
        self.entries.remove(&entry.full_path());
    }

    /// Iterate all entries. Order is unspecified.
    pub fn visit_all(&self, mut visitor: impl FnMut(&Entry)) {
        for entry in self.entries.values() {
            visitor(entry);
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Re-key every entry affected by a rename of `old_path` to `new_path`.
    ///
    /// For a directory this sweeps the whole subtree; for a file only the
    /// exact path moves. Identity is preserved: the same entry objects are
    /// re-inserted under their new canonical paths.
    pub fn entry_renamed(&mut self, old_path: &str, new_path: &str, is_directory: bool) {
        let moved: Vec<String> = if is_directory {
            self.entries
                .keys()
                .filter(|path| path.starts_with(old_path))
                .cloned()
                .collect()
        } else {
            self.entries
                .keys()
                .filter(|path| path.as_str() == old_path)
                .cloned()
                .collect()
        };

        for key in moved {
            if let Some(entry) = self.entries.remove(&key) {
                let renamed = format!("{new_path}{}", &key[old_path.len()..]);
                entry.set_location(renamed.clone());
                self.entries.insert(renamed, entry);
            }
        }
    }

    /// Remove every entry whose path begins with `prefix`, returning the
    /// removed entries so the caller can clear their caches.
    pub fn prune_prefix(&mut self, prefix: &str) -> Vec<Entry> {
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|path| self.entries.remove(&path))
            .collect()
    }
}
