//! Shared dirty-path tracking.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Path segment recorded for any mutation of a list.
pub const LIST_SEGMENT: &str = "[*]";

/// Set of dot-separated property paths changed since the last clean state.
///
/// Cloning a `DirtySet` does not copy the paths: every clone refers to the
/// same underlying set. An entity hands clones to each nested property
/// handle it creates, so a write at `shipping.address.city` lands in the
/// root's set.
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    paths: Arc<Mutex<BTreeSet<String>>>,
}

impl DirtySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a changed path.
    pub fn mark(&self, path: impl Into<String>) {
        self.paths.lock().insert(path.into());
    }

    /// Returns `true` if exactly this path was recorded.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.paths.lock().contains(path)
    }

    /// Returns `true` if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    /// Number of recorded paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    /// Forgets every recorded path.
    pub fn clear(&self) {
        self.paths.lock().clear();
    }

    /// Copy of the recorded paths.
    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.paths.lock().clone()
    }

    /// First segments of the recorded paths, i.e. the changed top-level
    /// fields.
    #[must_use]
    pub fn top_level(&self) -> BTreeSet<String> {
        self.paths
            .lock()
            .iter()
            .map(|path| first_segment(path).to_string())
            .collect()
    }

    /// Returns `true` if both handles refer to the same set.
    #[must_use]
    pub fn shares_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.paths, &other.paths)
    }
}

/// Joins a parent path and a child name.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn first_segment(path: &str) -> &str {
    path.split_once('.').map_or(path, |(head, _)| head)
}

/// Whether any recorded path is `path` itself or lies below it.
pub(crate) fn touches(paths: &BTreeSet<String>, path: &str) -> bool {
    paths.iter().any(|p| {
        p == path
            || p
                .strip_prefix(path)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

/// Names directly below `path` that were changed.
pub(crate) fn changed_children(paths: &BTreeSet<String>, path: &str) -> BTreeSet<String> {
    let prefix = format!("{path}.");
    paths
        .iter()
        .filter_map(|p| p.strip_prefix(prefix.as_str()))
        .map(|rest| first_segment(rest).to_string())
        .collect()
}
