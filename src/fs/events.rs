//! Change and rename observer registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::fs::entry::Entry;

/// Payload of a `change` notification.
///
/// A missing entry marks a wholesale change: all caches were invalidated
/// and listeners should re-read whatever they display. For directory
/// changes, `added` and `removed` carry the listing diff when one was
/// computed.
#[derive(Clone, Default)]
pub struct ChangeEvent {
    /// The changed entry, or `None` for a wholesale change.
    pub entry: Option<Entry>,
    /// Entries that appeared in a directory listing.
    pub added: Option<Vec<Entry>>,
    /// Entries that disappeared from a directory listing.
    pub removed: Option<Vec<Entry>>,
}

impl ChangeEvent {
    /// A wholesale change: everything may be stale.
    pub fn wholesale() -> Self {
        Self::default()
    }

    /// A change on a single entry.
    pub fn entry(entry: Entry) -> Self {
        Self {
            entry: Some(entry),
            ..Self::default()
        }
    }

    /// A directory change with its listing diff.
    pub fn with_children(
        entry: Entry,
        added: Option<Vec<Entry>>,
        removed: Option<Vec<Entry>>,
    ) -> Self {
        Self {
            entry: Some(entry),
            added,
            removed,
        }
    }
}

/// Callback invoked on every `change` notification.
pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Callback invoked on every `rename` notification with `(old, new)` paths.
pub type RenameListener = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Token returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Minimal observer registry for the two core events.
///
/// Listeners fire in registration order. Callbacks are collected before
/// invocation so a listener may register or unregister others without
/// deadlocking the registry.
#[derive(Default)]
pub(crate) struct EventDispatcher {
    next_id: AtomicU64,
    change: Mutex<Vec<(ListenerId, ChangeListener)>>,
    rename: Mutex<Vec<(ListenerId, RenameListener)>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_change(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.allocate();
        self.change.lock().unwrap().push((id, Arc::new(listener)));
        id
    }

    pub fn off_change(&self, id: ListenerId) -> bool {
        let mut listeners = self.change.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn on_rename(&self, listener: impl Fn(&str, &str) + Send + Sync + 'static) -> ListenerId {
        let id = self.allocate();
        self.rename.lock().unwrap().push((id, Arc::new(listener)));
        id
    }

    pub fn off_rename(&self, id: ListenerId) -> bool {
        let mut listeners = self.rename.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn fire_change(&self, event: &ChangeEvent) {
        let listeners: Vec<ChangeListener> = {
            let guard = self.change.lock().unwrap();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for listener in listeners {
            listener.as_ref()(event);
        }
    }

    pub fn fire_rename(&self, old_path: &str, new_path: &str) {
        let listeners: Vec<RenameListener> = {
            let guard = self.rename.lock().unwrap();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for listener in listeners {
            listener.as_ref()(old_path, new_path);
        }
    }
}
