//! In-memory preference store and its load state machine
//!
//! One `parking_lot::Mutex` guards the map, the load state, the recorded
//! load failure and the merge generation. A `Condvar` releases readers that
//! arrive while the load is in flight.
//!
//! State machine: `NotLoaded -> Loading -> Loaded`. `begin_load` wins at most
//! once; `complete_load` installs either the decoded snapshot or the failure
//! and wakes every waiter. After a failed load every read and merge returns
//! `StorageUnavailable` so a corrupt file is never silently replaced.
//!
//! The map lives behind an `Arc` and is copied on write: a merge clones it
//! only while the writer thread still holds the previous snapshot.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error};

use crate::codec::{encoded_entry_len, Snapshot, SNAPSHOT_OVERHEAD};
use crate::error::{PrefError, PrefResult};
use crate::key::{Key, KeyRef};
use crate::value::Value;

/// Live key-value mapping.
pub type PrefMap = HashMap<Key, Value>;

/// Load progress of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
}

/// Staged changes from one editor, applied in order: clear, removals, puts.
#[derive(Debug, Default, Clone)]
pub struct Batch {
    pub clear: bool,
    pub removed: Vec<String>,
    pub puts: Vec<(String, Value)>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        !self.clear && self.removed.is_empty() && self.puts.is_empty()
    }
}

/// Upper bound on the encoded snapshot, mirroring what a load accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBudget {
    pub max_file_size: u64,
    pub key_hashes: bool,
}

/// Result of a merge: the keys it touched and its generation.
#[derive(Debug)]
pub struct Merged {
    pub changed: Vec<String>,
    pub generation: u64,
}

struct StoreState {
    load: LoadState,
    map: Arc<PrefMap>,
    failure: Option<PrefError>,
    generation: u64,
}

/// Authoritative in-memory preference map.
pub struct Store {
    state: Mutex<StoreState>,
    loaded: Condvar,
    budget: Option<FileBudget>,
}

impl Store {
    /// Store without a size limit on merges.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Store whose merges are refused if the resulting snapshot would not
    /// fit in `budget`.
    pub fn with_budget(budget: FileBudget) -> Self {
        Self::build(Some(budget))
    }

    fn build(budget: Option<FileBudget>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                load: LoadState::NotLoaded,
                map: Arc::new(PrefMap::new()),
                failure: None,
                generation: 0,
            }),
            loaded: Condvar::new(),
            budget,
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.state.lock().load
    }

    /// Claim the load. Returns `true` for exactly one caller; later calls
    /// (while loading or after) are no-ops returning `false`.
    pub fn begin_load(&self) -> bool {
        let mut state = self.state.lock();
        if state.load != LoadState::NotLoaded {
            return false;
        }
        state.load = LoadState::Loading;
        true
    }

    /// Finish the load claimed by [`Store::begin_load`] and release blocked
    /// readers. Ignored unless the store is `Loading`.
    pub fn complete_load(&self, result: PrefResult<Snapshot>) -> bool {
        let mut state = self.state.lock();
        if state.load != LoadState::Loading {
            error!(state = ?state.load, "complete_load without a load in flight");
            return false;
        }

        match result {
            Ok(snapshot) => {
                let count = snapshot.len();
                // Later duplicates win, matching on-disk order
                state.map = Arc::new(snapshot.into_iter().collect());
                debug!(entries = count, unique = state.map.len(), "preference store loaded");
            }
            Err(e) => {
                state.failure = Some(e);
            }
        }
        state.load = LoadState::Loaded;
        drop(state);
        self.loaded.notify_all();
        true
    }

    /// Block until loaded and return the recorded failure, if any.
    pub fn wait_loaded(&self) -> PrefResult<()> {
        self.ready().map(|_| ())
    }

    /// Block until loaded, then hand out the guard or the load failure.
    fn ready(&self) -> PrefResult<MutexGuard<'_, StoreState>> {
        let mut state = self.state.lock();
        while state.load != LoadState::Loaded {
            self.loaded.wait(&mut state);
        }
        if let Some(cause) = &state.failure {
            return Err(PrefError::StorageUnavailable {
                cause: Box::new(cause.clone()),
            });
        }
        Ok(state)
    }

    pub fn get(&self, key: &str) -> PrefResult<Option<Value>> {
        let state = self.ready()?;
        Ok(state.map.get(&KeyRef::new(key)).cloned())
    }

    pub fn contains(&self, key: &str) -> PrefResult<bool> {
        let state = self.ready()?;
        Ok(state.map.contains_key(&KeyRef::new(key)))
    }

    /// Defensive copy of every entry, keyed by text.
    pub fn get_all(&self) -> PrefResult<std::collections::HashMap<String, Value>> {
        let state = self.ready()?;
        Ok(state
            .map
            .iter()
            .map(|(k, v)| (k.as_str().to_owned(), v.clone()))
            .collect())
    }

    pub fn len(&self) -> PrefResult<usize> {
        Ok(self.ready()?.map.len())
    }

    pub fn is_empty(&self) -> PrefResult<bool> {
        Ok(self.ready()?.map.is_empty())
    }

    /// Apply `batch` atomically, then run `then` with the new snapshot while
    /// the lock is still held so callers can enqueue writes and notifications
    /// in merge order.
    ///
    /// A batch whose result would exceed the file budget changes nothing.
    pub fn merge<F>(&self, batch: Batch, then: F) -> PrefResult<Merged>
    where
        F: FnOnce(&Arc<PrefMap>, &Merged),
    {
        let mut state = self.ready()?;

        if let Some(budget) = self.budget {
            let size = projected_size(&state.map, &batch, budget.key_hashes);
            if size > budget.max_file_size {
                return Err(PrefError::Oversized {
                    component: "preference file",
                    size,
                    max: budget.max_file_size,
                });
            }
        }

        let mut changed = Vec::new();
        let mut seen = HashSet::new();
        let mut note = |key: &str, changed: &mut Vec<String>| {
            if seen.insert(key.to_owned()) {
                changed.push(key.to_owned());
            }
        };

        let map = Arc::make_mut(&mut state.map);
        if batch.clear {
            for key in map.keys() {
                note(key.as_str(), &mut changed);
            }
            map.clear();
        }
        for key in &batch.removed {
            map.remove(&KeyRef::new(key));
            note(key, &mut changed);
        }
        for (key, value) in batch.puts {
            note(&key, &mut changed);
            map.insert(Key::new(&key), value);
        }

        state.generation += 1;
        let merged = Merged {
            changed,
            generation: state.generation,
        };
        then(&state.map, &merged);
        Ok(merged)
    }

    /// Current snapshot and generation, without modifying anything.
    pub fn snapshot(&self) -> PrefResult<(Arc<PrefMap>, u64)> {
        let state = self.ready()?;
        Ok((Arc::clone(&state.map), state.generation))
    }
}

/// Encoded size of the snapshot `batch` would produce from `map`.
fn projected_size(map: &PrefMap, batch: &Batch, key_hashes: bool) -> u64 {
    let mut size = SNAPSHOT_OVERHEAD;
    if !batch.clear {
        let replaced: HashSet<&[u8]> = batch
            .removed
            .iter()
            .map(|k| k.as_bytes())
            .chain(batch.puts.iter().map(|(k, _)| k.as_bytes()))
            .collect();
        size += map
            .iter()
            .filter(|(k, _)| !replaced.contains(k.as_bytes()))
            .map(|(k, v)| encoded_entry_len(k.as_bytes(), v, key_hashes))
            .sum::<u64>();
    }
    size + batch
        .puts
        .iter()
        .map(|(k, v)| encoded_entry_len(k.as_bytes(), v, key_hashes))
        .sum::<u64>()
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use std::thread;
    use std::time::Duration;

    fn loaded_store(entries: Vec<(&str, Value)>) -> Store {
        let store = Store::new();
        assert!(store.begin_load());
        let snapshot = entries.into_iter().map(|(k, v)| (Key::new(k), v)).collect();
        assert!(store.complete_load(Ok(snapshot)));
        store
    }

    fn puts(entries: Vec<(&str, Value)>) -> Batch {
        Batch {
            puts: entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect(),
            ..Batch::default()
        }
    }

    #[test]
    fn test_begin_load_only_once() {
        let store = Store::new();
        assert_eq!(store.load_state(), LoadState::NotLoaded);
        assert!(store.begin_load());
        assert_eq!(store.load_state(), LoadState::Loading);
        assert!(!store.begin_load());
        store.complete_load(Ok(Vec::new()));
        assert_eq!(store.load_state(), LoadState::Loaded);
        assert!(!store.begin_load());
    }

    #[test]
    fn test_complete_without_begin_ignored() {
        let store = Store::new();
        assert!(!store.complete_load(Ok(Vec::new())));
        assert_eq!(store.load_state(), LoadState::NotLoaded);
    }

    #[test]
    fn test_reads_block_until_loaded() {
        let store = Arc::new(Store::new());
        assert!(store.begin_load());

        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.get("count"))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished());

        store.complete_load(Ok(vec![(Key::new("count"), Value::Int(5))]));
        assert_eq!(reader.join().unwrap().unwrap(), Some(Value::Int(5)));
    }

    #[test]
    fn test_failed_load_surfaces_on_every_read() {
        let store = Store::new();
        store.begin_load();
        store.complete_load(Err(PrefError::from(CodecError::Truncated {
            offset: 10,
            needed: 4,
            available: 0,
        })));

        assert!(matches!(store.get("x"), Err(PrefError::StorageUnavailable { .. })));
        assert!(matches!(store.contains("x"), Err(PrefError::StorageUnavailable { .. })));
        assert!(matches!(store.get_all(), Err(PrefError::StorageUnavailable { .. })));
        assert!(matches!(
            store.merge(puts(vec![("x", Value::Int(1))]), |_, _| {}),
            Err(PrefError::StorageUnavailable { .. })
        ));
    }

    #[test]
    fn test_duplicate_keys_last_wins_on_load() {
        let store = loaded_store(vec![("k", Value::Int(1)), ("k", Value::Int(2))]);
        assert_eq!(store.get("k").unwrap(), Some(Value::Int(2)));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_merge_precedence_clear_remove_put() {
        let store = loaded_store(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        let batch = Batch {
            clear: true,
            removed: vec!["c".into(), "d".into()],
            puts: vec![("d".into(), Value::Bool(true))],
        };

        let merged = store.merge(batch, |_, _| {}).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("d").unwrap(), Some(Value::Bool(true)));
        assert_eq!(store.len().unwrap(), 1);

        let mut changed = merged.changed.clone();
        changed.sort();
        assert_eq!(changed, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_last_merge_wins() {
        let store = loaded_store(Vec::new());
        store.merge(puts(vec![("k", Value::Int(1))]), |_, _| {}).unwrap();
        store.merge(puts(vec![("k", Value::Int(2))]), |_, _| {}).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn test_generation_and_snapshot_passed_under_lock() {
        let store = loaded_store(Vec::new());
        let mut seen = Vec::new();
        for i in 0..3 {
            store
                .merge(puts(vec![("k", Value::Int(i))]), |snapshot, merged| {
                    seen.push((merged.generation, snapshot.len()));
                })
                .unwrap();
        }
        assert_eq!(seen, vec![(1, 1), (2, 1), (3, 1)]);
        assert_eq!(store.snapshot().unwrap().1, 3);
    }

    #[test]
    fn test_held_snapshot_is_not_mutated() {
        let store = loaded_store(vec![("k", Value::Int(1))]);
        let (before, _) = store.snapshot().unwrap();
        store.merge(puts(vec![("k", Value::Int(2))]), |_, _| {}).unwrap();
        assert_eq!(before.get(&KeyRef::new("k")), Some(&Value::Int(1)));
        assert_eq!(store.get("k").unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn test_merge_over_budget_changes_nothing() {
        let store = Store::with_budget(FileBudget {
            max_file_size: 1024,
            key_hashes: true,
        });
        store.begin_load();
        store.complete_load(Ok(vec![(Key::new("keep"), Value::Int(1))]));

        let mut called = false;
        let result = store.merge(puts(vec![("big", Value::String("x".repeat(4000)))]), |_, _| {
            called = true;
        });
        assert!(matches!(
            result,
            Err(PrefError::Oversized { component: "preference file", max: 1024, .. })
        ));
        assert!(!called);
        assert_eq!(store.get("big").unwrap(), None);
        assert_eq!(store.snapshot().unwrap().1, 0);

        // A batch that fits still merges
        store.merge(puts(vec![("keep", Value::Int(2))]), |_, _| {}).unwrap();
        assert_eq!(store.get("keep").unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn test_projected_size_matches_encoding() {
        let mut map = PrefMap::new();
        map.insert(Key::new("a"), Value::String("alpha".into()));
        map.insert(Key::new("b"), Value::Long(2));
        map.insert(Key::new("c"), Value::Bool(true));
        let batch = Batch {
            clear: false,
            removed: vec!["c".into()],
            puts: vec![("a".into(), Value::Int(1)), ("d".into(), Value::Float(0.5))],
        };

        let mut expected = map.clone();
        expected.remove(&KeyRef::new("c"));
        expected.insert(Key::new("a"), Value::Int(1));
        expected.insert(Key::new("d"), Value::Float(0.5));
        let encoded = crate::codec::encode(expected.iter(), true).unwrap();

        assert_eq!(projected_size(&map, &batch, true), encoded.len() as u64);
    }

    #[test]
    fn test_get_all_is_a_copy() {
        let store = loaded_store(vec![("k", Value::Int(1))]);
        let mut all = store.get_all().unwrap();
        all.insert("injected".into(), Value::Int(9));
        assert!(!store.contains("injected").unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }
}
