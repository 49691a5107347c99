//! # Keyspace
//!
//! Purpose: Tie the index, the entry arena, and the TTL heap into the
//! top-level key/value store the command layer executes against.
//!
//! ## Design Principles
//! 1. **Index + Arena**: The progressive-rehash map resolves a key to a
//!    small entry id; entries live in a dense arena with a free-list, so
//!    the timer heap can name an entry without holding a pointer.
//! 2. **Tagged Values**: An entry holds either raw bytes or a sorted set;
//!    commands that assume the wrong kind get a type error.
//! 3. **Back-Referenced Timers**: `Entry::heap_idx` always mirrors the
//!    entry's position in the timer heap; every heap movement syncs it.
//! 4. **Deferred Teardown**: Dropping a sorted set past the size threshold
//!    is handed to the worker pool so the reactor never stalls on a free.

use ahash::RandomState;

use crate::hash::HMap;
use crate::heap::{TimerHeap, TimerItem};
use crate::pool::ThreadPool;
use crate::zset::ZSet;

/// Sorted sets at or above this many members are freed on the worker pool.
pub const LARGE_CONTAINER_THRESHOLD: usize = 1000;

/// Upper bound on entries expired in one reactor tick.
pub const EXPIRE_WORK_MAX: usize = 2000;

/// Value stored under a key.
pub enum Value {
    Bytes(Vec<u8>),
    Sorted(ZSet),
}

/// One keyspace entry. `heap_idx` is `Some(i)` exactly when timer heap slot
/// `i` refers back to this entry.
struct Entry {
    key: Box<[u8]>,
    value: Value,
    heap_idx: Option<usize>,
}

/// TTL state of a key, mirroring the command-layer contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlState {
    /// Key does not exist (or has already expired).
    Missing,
    /// Key exists without an expiration.
    NoExpiry,
    /// Key expires after this many milliseconds.
    ExpiresInMs(i64),
}

/// A command addressed a value of the wrong kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongType;

/// The top-level keyspace.
pub struct Store {
    index: HMap<u32>,
    entries: Vec<Option<Entry>>,
    free: Vec<u32>,
    timers: TimerHeap,
    hash: RandomState,
    destructors: Option<ThreadPool>,
}

impl Store {
    /// Store with the default worker count for deferred teardown.
    pub fn new() -> Self {
        Self::with_workers(4)
    }

    /// Store with an explicit worker count; zero disables the pool and all
    /// values are freed inline.
    pub fn with_workers(workers: usize) -> Self {
        Store {
            index: HMap::new(),
            entries: Vec::new(),
            free: Vec::new(),
            timers: TimerHeap::new(),
            hash: RandomState::new(),
            destructors: (workers > 0).then(|| ThreadPool::new(workers)),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Fetches the value under `key`.
    pub fn get(&mut self, key: &[u8]) -> Option<&Value> {
        let id = self.lookup(key)?;
        Some(&self.entry(id).value)
    }

    /// Upserts a bytes value. An existing TTL on the key is preserved; a
    /// sorted-set value under the same key is a type error.
    pub fn set_bytes(&mut self, key: &[u8], data: Vec<u8>) -> Result<(), WrongType> {
        match self.lookup(key) {
            Some(id) => match &mut self.entry_mut(id).value {
                Value::Bytes(slot) => {
                    *slot = data;
                    Ok(())
                }
                Value::Sorted(_) => Err(WrongType),
            },
            None => {
                self.insert_entry(key, Value::Bytes(data));
                Ok(())
            }
        }
    }

    /// Removes a key, detaching its timer and disposing of the value.
    /// Returns `true` when the key existed.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let hcode = self.hash.hash_one(key);
        match self.index.remove(hcode, key) {
            Some(id) => {
                self.drop_entry(id);
                true
            }
            None => false,
        }
    }

    /// All live keys, in unspecified order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(self.index.len());
        self.index.for_each(|key, _| out.push(key.to_vec()));
        out
    }

    /// Schedules (or reschedules) the key to expire at `when_us`.
    /// Returns `false` when the key does not exist.
    pub fn set_ttl(&mut self, key: &[u8], when_us: u64) -> bool {
        let Some(id) = self.lookup(key) else {
            return false;
        };
        let pos = self.entry(id).heap_idx;
        let Store {
            timers, entries, ..
        } = self;
        timers.upsert(pos, TimerItem { when_us, owner: id }, &mut |owner, idx| {
            if let Some(entry) = entries[owner as usize].as_mut() {
                entry.heap_idx = Some(idx);
            }
        });
        true
    }

    /// Removes the key's expiration. Returns `true` only when a timer was
    /// actually cleared.
    pub fn clear_ttl(&mut self, key: &[u8]) -> bool {
        let Some(id) = self.lookup(key) else {
            return false;
        };
        let Some(pos) = self.entry(id).heap_idx else {
            return false;
        };
        self.entry_mut(id).heap_idx = None;
        let Store {
            timers, entries, ..
        } = self;
        timers.remove(pos, &mut |owner, idx| {
            if let Some(entry) = entries[owner as usize].as_mut() {
                entry.heap_idx = Some(idx);
            }
        });
        true
    }

    /// Reports the key's TTL relative to `now_us`.
    pub fn ttl_state(&mut self, key: &[u8], now_us: u64) -> TtlState {
        let Some(id) = self.lookup(key) else {
            return TtlState::Missing;
        };
        match self.entry(id).heap_idx {
            None => TtlState::NoExpiry,
            Some(pos) => {
                let when_us = self.timers.get(pos).when_us;
                TtlState::ExpiresInMs((when_us.saturating_sub(now_us) / 1000) as i64)
            }
        }
    }

    /// Earliest scheduled expiration, for the reactor's poll timeout.
    pub fn next_expiry_us(&self) -> Option<u64> {
        self.timers.peek().map(|item| item.when_us)
    }

    /// Expires due keys, at most `budget` per call so one tick cannot stall
    /// on a burst of deadlines. Returns the number of keys removed.
    pub fn evict_due(&mut self, now_us: u64, budget: usize) -> usize {
        let mut evicted = 0;
        while evicted < budget {
            let Some(top) = self.timers.peek() else {
                break;
            };
            if top.when_us > now_us {
                break;
            }
            let key = self.entry(top.owner).key.clone();
            let hcode = self.hash.hash_one(&key[..]);
            self.index.remove(hcode, &key);
            self.drop_entry(top.owner);
            evicted += 1;
        }
        evicted
    }

    /// Sorted-set access without creating the key. `Ok(None)` means the key
    /// is absent; a bytes value is a type error.
    pub fn sorted(&mut self, key: &[u8]) -> Result<Option<&mut ZSet>, WrongType> {
        match self.lookup(key) {
            None => Ok(None),
            Some(id) => match &mut self.entry_mut(id).value {
                Value::Sorted(zset) => Ok(Some(zset)),
                Value::Bytes(_) => Err(WrongType),
            },
        }
    }

    /// Sorted-set access that creates an empty set when the key is absent.
    pub fn sorted_or_create(&mut self, key: &[u8]) -> Result<&mut ZSet, WrongType> {
        let id = match self.lookup(key) {
            Some(id) => id,
            None => self.insert_entry(key, Value::Sorted(ZSet::new())),
        };
        match &mut self.entry_mut(id).value {
            Value::Sorted(zset) => Ok(zset),
            Value::Bytes(_) => Err(WrongType),
        }
    }

    fn lookup(&mut self, key: &[u8]) -> Option<u32> {
        let hcode = self.hash.hash_one(key);
        self.index.get(hcode, key).copied()
    }

    fn entry(&self, id: u32) -> &Entry {
        self.entries[id as usize].as_ref().expect("live entry")
    }

    fn entry_mut(&mut self, id: u32) -> &mut Entry {
        self.entries[id as usize].as_mut().expect("live entry")
    }

    fn insert_entry(&mut self, key: &[u8], value: Value) -> u32 {
        let id = self.free.pop().unwrap_or_else(|| {
            self.entries.push(None);
            (self.entries.len() - 1) as u32
        });
        self.entries[id as usize] = Some(Entry {
            key: key.into(),
            value,
            heap_idx: None,
        });
        let hcode = self.hash.hash_one(key);
        self.index.insert(hcode, key, id);
        id
    }

    /// Frees an arena slot after the index no longer references it.
    fn drop_entry(&mut self, id: u32) {
        let entry = self.entries[id as usize].take().expect("live entry");
        self.free.push(id);
        if let Some(pos) = entry.heap_idx {
            let Store {
                timers, entries, ..
            } = self;
            timers.remove(pos, &mut |owner, idx| {
                if let Some(moved) = entries[owner as usize].as_mut() {
                    moved.heap_idx = Some(idx);
                }
            });
        }
        self.dispose(entry.value);
    }

    fn dispose(&self, value: Value) {
        if let Value::Sorted(zset) = value {
            if zset.len() >= LARGE_CONTAINER_THRESHOLD {
                if let Some(pool) = &self.destructors {
                    pool.execute(move || drop(zset));
                    return;
                }
            }
            drop(zset);
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(store: &mut Store, key: &[u8]) -> Option<Vec<u8>> {
        match store.get(key) {
            Some(Value::Bytes(data)) => Some(data.clone()),
            _ => None,
        }
    }

    #[test]
    fn bytes_lifecycle() {
        let mut store = Store::with_workers(0);
        store.set_bytes(b"foo", b"bar".to_vec()).unwrap();
        assert_eq!(bytes_of(&mut store, b"foo"), Some(b"bar".to_vec()));

        store.set_bytes(b"foo", b"baz".to_vec()).unwrap();
        assert_eq!(bytes_of(&mut store, b"foo"), Some(b"baz".to_vec()));
        assert_eq!(store.len(), 1);

        assert!(store.remove(b"foo"));
        assert!(!store.remove(b"foo"));
        assert!(store.get(b"foo").is_none());
    }

    #[test]
    fn kind_mismatch_is_a_type_error() {
        let mut store = Store::with_workers(0);
        store.set_bytes(b"plain", b"v".to_vec()).unwrap();
        assert!(matches!(store.sorted(b"plain"), Err(WrongType)));
        assert!(store.sorted_or_create(b"plain").is_err());

        store
            .sorted_or_create(b"ranked")
            .unwrap()
            .insert(b"alice", 1.0);
        assert_eq!(store.set_bytes(b"ranked", b"v".to_vec()), Err(WrongType));
    }

    #[test]
    fn sorted_lookup_without_create() {
        let mut store = Store::with_workers(0);
        assert_eq!(store.sorted(b"missing").map(|z| z.is_none()), Ok(true));
        assert_eq!(store.len(), 0);

        store.sorted_or_create(b"ranked").unwrap().insert(b"m", 2.0);
        let zset = store.sorted(b"ranked").unwrap().unwrap();
        assert_eq!(zset.score(b"m"), Some(2.0));
    }

    #[test]
    fn ttl_schedule_query_persist() {
        let mut store = Store::with_workers(0);
        let now = 1_000_000u64;

        assert!(!store.set_ttl(b"missing", now));
        assert_eq!(store.ttl_state(b"missing", now), TtlState::Missing);

        store.set_bytes(b"k", b"v".to_vec()).unwrap();
        assert_eq!(store.ttl_state(b"k", now), TtlState::NoExpiry);

        assert!(store.set_ttl(b"k", now + 100_000));
        assert_eq!(store.ttl_state(b"k", now), TtlState::ExpiresInMs(100));
        assert_eq!(store.ttl_state(b"k", now + 40_000), TtlState::ExpiresInMs(60));

        assert!(store.clear_ttl(b"k"));
        assert!(!store.clear_ttl(b"k"));
        assert_eq!(store.ttl_state(b"k", now), TtlState::NoExpiry);
    }

    #[test]
    fn overwrite_keeps_ttl() {
        let mut store = Store::with_workers(0);
        let now = 0u64;
        store.set_bytes(b"k", b"v1".to_vec()).unwrap();
        store.set_ttl(b"k", now + 500_000);

        store.set_bytes(b"k", b"v2".to_vec()).unwrap();
        assert_eq!(store.ttl_state(b"k", now), TtlState::ExpiresInMs(500));
    }

    #[test]
    fn evict_due_respects_deadlines_and_budget() {
        let mut store = Store::with_workers(0);
        for i in 0..10u64 {
            let key = format!("k{i}").into_bytes();
            store.set_bytes(&key, b"v".to_vec()).unwrap();
            store.set_ttl(&key, 1_000 * (i + 1));
        }

        // Nothing is due yet.
        assert_eq!(store.evict_due(999, EXPIRE_WORK_MAX), 0);

        // Five keys due, but the budget stops at three.
        assert_eq!(store.evict_due(5_000, 3), 3);
        assert_eq!(store.evict_due(5_000, EXPIRE_WORK_MAX), 2);
        assert_eq!(store.len(), 5);

        assert_eq!(store.ttl_state(b"k0", 5_000), TtlState::Missing);
        assert_eq!(store.ttl_state(b"k9", 5_000), TtlState::ExpiresInMs(5));
    }

    #[test]
    fn remove_detaches_timer() {
        let mut store = Store::with_workers(0);
        store.set_bytes(b"a", b"v".to_vec()).unwrap();
        store.set_bytes(b"b", b"v".to_vec()).unwrap();
        store.set_ttl(b"a", 1_000);
        store.set_ttl(b"b", 2_000);

        assert!(store.remove(b"a"));
        assert_eq!(store.next_expiry_us(), Some(2_000));
        assert_eq!(store.evict_due(10_000, EXPIRE_WORK_MAX), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn large_sorted_set_teardown_is_deferred() {
        let mut store = Store::with_workers(1);
        {
            let zset = store.sorted_or_create(b"big").unwrap();
            for i in 0..(LARGE_CONTAINER_THRESHOLD + 10) {
                let name = format!("member-{i}").into_bytes();
                zset.insert(&name, i as f64);
            }
        }
        assert!(store.remove(b"big"));
        assert!(store.get(b"big").is_none());
        // Dropping the store joins the pool, which finishes the teardown.
        drop(store);
    }

    #[test]
    fn keys_enumerates_everything() {
        let mut store = Store::with_workers(0);
        store.set_bytes(b"a", b"1".to_vec()).unwrap();
        store.set_bytes(b"b", b"2".to_vec()).unwrap();
        store.sorted_or_create(b"z").unwrap().insert(b"m", 1.0);

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"z".to_vec()]);
    }
}
