use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{CacheObject, KeyPolicy, ObjectKey};

/// The outcome of merging a fresh listing into a cache.
///
/// `updated` contains the very instances that were cached before, with the fresh state
/// merged into them.
pub struct ChangeSet<T> {
    /// Objects that were not cached before.
    pub added: Vec<Arc<T>>,
    /// Objects that are gone from the cache.
    pub removed: Vec<Arc<T>>,
    /// Objects that were cached before and are still present.
    pub updated: Vec<Arc<T>>,
}

impl<T> ChangeSet<T> {
    /// Whether the set of cached objects is unchanged.
    ///
    /// Updated objects do not count as a change.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            updated: Vec::new(),
        }
    }
}

impl<T> fmt::Debug for ChangeSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSet")
            .field("added", &self.added.len())
            .field("removed", &self.removed.len())
            .field("updated", &self.updated.len())
            .finish()
    }
}

/// Receives the changes applied by reconciling a cache.
///
/// This allows navigators and other views to be refreshed incrementally.
pub trait ChangeListener<T>: Send + Sync {
    /// Called after the changes have been committed to the cache.
    fn objects_changed(&self, changes: &ChangeSet<T>);
}

impl<T, F> ChangeListener<T> for F
where
    F: Fn(&ChangeSet<T>) + Send + Sync,
{
    fn objects_changed(&self, changes: &ChangeSet<T>) {
        self(changes)
    }
}

/// Merges `fresh` into `current`.
///
/// Returns the new list of entries in the order of `fresh`, followed by any unpersisted
/// objects of `current` that are not part of `fresh`. Duplicate keys within `fresh` keep
/// their first occurrence.
pub(crate) fn reconcile<T, M>(
    policy: KeyPolicy,
    current: &[Arc<T>],
    fresh: Vec<T>,
    mut merge: M,
) -> (Vec<Arc<T>>, ChangeSet<T>)
where
    T: CacheObject,
    M: FnMut(&T, T),
{
    let mut existing: FxHashMap<ObjectKey, &Arc<T>> = current
        .iter()
        .map(|object| (policy.key(object.identity()), object))
        .collect();
    let mut seen = FxHashSet::default();

    let mut entries = Vec::with_capacity(fresh.len());
    let mut changes = ChangeSet::default();

    for object in fresh {
        let key = policy.key(object.identity());
        if !seen.insert(key.clone()) {
            tracing::warn!(%key, "Skipping duplicate object in remote listing");
            continue;
        }

        match existing.remove(&key) {
            Some(cached) => {
                merge(cached, object);
                entries.push(Arc::clone(cached));
                changes.updated.push(Arc::clone(cached));
            }
            None => {
                let object = Arc::new(object);
                entries.push(Arc::clone(&object));
                changes.added.push(object);
            }
        }
    }

    // keep the original order for leftovers
    for object in current {
        let key = policy.key(object.identity());
        if !existing.contains_key(&key) {
            continue;
        }
        if object.is_persisted() {
            changes.removed.push(Arc::clone(object));
        } else {
            entries.push(Arc::clone(object));
        }
    }

    (entries, changes)
}
