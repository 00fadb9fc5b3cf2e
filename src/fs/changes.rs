//! Coordination between in-process mutations and external change reports.
//!
//! Mutating operations bracket themselves with [`ChangeCoordinator::begin`]
//! and [`ChangeCoordinator::end`]. While at least one mutation is active,
//! changes reported by the backend watcher are queued instead of handled, so
//! a rename in progress is never misread as an unrelated delete/add pair.
//! Once the count returns to zero the queue drains in arrival order.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::fs::stat::FileStat;

/// A change observed by the backend watcher, queued for delivery.
///
/// A `None` path is a wholesale notification: arbitrary parts of the
/// filesystem may have changed and all caches must be invalidated.
#[derive(Debug, Clone)]
pub(crate) struct ExternalChange {
    pub path: Option<String>,
    pub stat: Option<FileStat>,
}

#[derive(Default)]
struct CoordState {
    active: i64,
    deferred: VecDeque<ExternalChange>,
}

/// Active-mutation refcount plus the deferred external change queue.
#[derive(Default)]
pub(crate) struct ChangeCoordinator {
    state: Mutex<CoordState>,
}

impl ChangeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a mutating operation.
    pub fn begin(&self) {
        let mut state = self.state.lock().unwrap();
        state.active += 1;
    }

    /// Leave a mutating operation. An unbalanced call is logged and the
    /// count recovers on the next `begin`.
    pub fn end(&self) {
        let mut state = self.state.lock().unwrap();
        state.active -= 1;
        if state.active < 0 {
            tracing::warn!(count = state.active, "unbalanced end of change bracket");
        }
    }

    /// Current refcount, for assertions.
    #[cfg(test)]
    pub fn active_count(&self) -> i64 {
        self.state.lock().unwrap().active
    }

    /// Queue an external change for delivery.
    pub fn push(&self, change: ExternalChange) {
        let mut state = self.state.lock().unwrap();
        state.deferred.push_back(change);
    }

    /// Pop the next deliverable change, or `None` while a mutation is
    /// active or the queue is empty. Draining through this method is what
    /// keeps change handling out of mutation brackets.
    pub fn next_ready(&self) -> Option<ExternalChange> {
        let mut state = self.state.lock().unwrap();
        if state.active > 0 {
            return None;
        }
        state.deferred.pop_front()
    }

    /// Number of queued changes, for assertions.
    #[cfg(test)]
    pub fn deferred_len(&self) -> usize {
        self.state.lock().unwrap().deferred.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str) -> ExternalChange {
        ExternalChange {
            path: Some(path.to_string()),
            stat: None,
        }
    }

    #[test]
    fn test_defers_while_active() {
        let coord = ChangeCoordinator::new();
        coord.begin();
        coord.push(change("/p/f.txt"));
        assert!(coord.next_ready().is_none());
        assert_eq!(coord.deferred_len(), 1);

        coord.end();
        let ready = coord.next_ready().expect("drains at quiescence");
        assert_eq!(ready.path.as_deref(), Some("/p/f.txt"));
        assert!(coord.next_ready().is_none());
    }

    #[test]
    fn test_preserves_arrival_order() {
        let coord = ChangeCoordinator::new();
        coord.begin();
        coord.push(change("/a"));
        coord.push(change("/b"));
        coord.push(change("/c"));
        coord.end();

        let order: Vec<String> = std::iter::from_fn(|| coord.next_ready())
            .map(|c| c.path.unwrap())
            .collect();
        assert_eq!(order, ["/a", "/b", "/c"]);
    }

    #[test]
    fn test_nested_brackets() {
        let coord = ChangeCoordinator::new();
        coord.begin();
        coord.begin();
        coord.push(change("/x"));
        coord.end();
        assert!(coord.next_ready().is_none(), "outer bracket still active");
        coord.end();
        assert!(coord.next_ready().is_some());
    }

    #[test]
    fn test_unbalanced_end_recovers() {
        let coord = ChangeCoordinator::new();
        coord.end();
        assert_eq!(coord.active_count(), -1);
        coord.push(change("/y"));
        assert!(coord.next_ready().is_some(), "negative count still drains");
        coord.begin();
        assert_eq!(coord.active_count(), 0);
    }
}
