//! Per-identifier state storage.

use dashmap::DashMap;

/// Storage for per-identifier limiter state.
///
/// This trait abstracts over where bucket and window state lives so that the
/// limiters can be exercised in isolation and a shared store can be swapped
/// in without touching callers. Implementations must run [`update`] and
/// [`modify`] atomically with respect to other calls for the same key.
///
/// [`update`]: StateStore::update
/// [`modify`]: StateStore::modify
pub trait StateStore<S>: Send + Sync {
    /// Look up the state for `key`, creating it with `init` if absent, and
    /// apply `f` to it while holding the entry exclusively.
    fn update<R>(&self, key: &str, init: impl FnOnce() -> S, f: impl FnOnce(&mut S) -> R) -> R;

    /// Apply `f` to the state for `key` only if it already exists.
    fn modify<R>(&self, key: &str, f: impl FnOnce(&mut S) -> R) -> Option<R>;

    /// Get a copy of the state for `key`.
    fn get(&self, key: &str) -> Option<S>
    where
        S: Clone;

    /// Replace the state for `key`.
    fn set(&self, key: &str, state: S);

    /// Remove the state for `key`. Returns `true` if an entry was removed.
    fn delete(&self, key: &str) -> bool;

    /// Visit every entry, keeping only those for which `keep` returns `true`.
    fn retain(&self, keep: impl FnMut(&str, &mut S) -> bool);

    /// Number of tracked identifiers.
    fn len(&self) -> usize;

    /// Whether no identifiers are tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all state.
    fn clear(&self);
}

/// In-process store backed by a sharded concurrent map.
///
/// Each shard has its own lock, so unrelated identifiers rarely contend.
#[derive(Debug)]
pub struct MemoryStore<S> {
    entries: DashMap<String, S>,
}

impl<S> MemoryStore<S> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<S> Default for MemoryStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + Sync> StateStore<S> for MemoryStore<S> {
    fn update<R>(&self, key: &str, init: impl FnOnce() -> S, f: impl FnOnce(&mut S) -> R) -> R {
        if let Some(mut entry) = self.entries.get_mut(key) {
            return f(entry.value_mut());
        }

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(init);
        f(entry.value_mut())
    }

    fn modify<R>(&self, key: &str, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        self.entries
            .get_mut(key)
            .map(|mut entry| f(entry.value_mut()))
    }

    fn get(&self, key: &str) -> Option<S>
    where
        S: Clone,
    {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, state: S) {
        self.entries.insert(key.to_string(), state);
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn retain(&self, mut keep: impl FnMut(&str, &mut S) -> bool) {
        self.entries.retain(|key, state| keep(key, state));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_creates_then_mutates() {
        let store: MemoryStore<u32> = MemoryStore::new();

        let first = store.update("a", || 10, |v| {
            *v += 1;
            *v
        });
        assert_eq!(first, 11);

        // init is not used once the entry exists
        let second = store.update("a", || 0, |v| {
            *v += 1;
            *v
        });
        assert_eq!(second, 12);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_modify_skips_missing() {
        let store: MemoryStore<u32> = MemoryStore::new();
        assert_eq!(store.modify("missing", |v| *v), None);
        assert!(store.is_empty());

        store.set("present", 3);
        assert_eq!(store.modify("present", |v| { *v *= 2; *v }), Some(6));
    }

    #[test]
    fn test_get_set_delete() {
        let store: MemoryStore<String> = MemoryStore::new();
        store.set("k", "v".to_string());
        assert_eq!(store.get("k"), Some("v".to_string()));

        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_retain_and_clear() {
        let store: MemoryStore<u32> = MemoryStore::new();
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            store.set(key, i as u32);
        }

        store.retain(|_, v| *v % 2 == 0);
        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_is_atomic_across_threads() {
        use std::sync::Arc;

        let store: Arc<MemoryStore<u64>> = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        store.update("shared", || 0, |v| *v += 1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get("shared"), Some(8000));
    }
}
