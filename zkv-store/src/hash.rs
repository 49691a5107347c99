//! # Hash Map with Progressive Rehashing
//!
//! Purpose: Provide the byte-keyed index used by the keyspace and by sorted
//! sets, resizing without latency spikes.
//!
//! ## Design Principles
//! 1. **Two Tables**: A resize moves the full table into an `older` slot and
//!    allocates a doubled `newer` table; lookups consult both.
//! 2. **Bounded Migration**: Every operation moves at most `REHASH_WORK`
//!    chain heads, so the cost of a resize is amortized O(1) per operation.
//! 3. **Caller-Supplied Hashes**: Nodes store a 64-bit hash code computed by
//!    the caller, keeping the map itself hasher-agnostic and making bucket
//!    selection a mask instead of a modulo.
//! 4. **Chained Buckets**: Collisions are resolved with head-inserted,
//!    box-linked chains; detach is O(chain length).

use std::mem;

/// Resize when `size >= capacity * MAX_LOAD_FACTOR` and no migration is
/// already in flight.
const MAX_LOAD_FACTOR: usize = 8;

/// Chain heads migrated per operation while a resize is in flight.
const REHASH_WORK: usize = 128;

/// Starting bucket count; doubled on every resize.
const INITIAL_CAPACITY: usize = 4;

type Link<V> = Option<Box<Node<V>>>;

struct Node<V> {
    hcode: u64,
    key: Box<[u8]>,
    value: V,
    next: Link<V>,
}

/// One fixed-capacity chained table.
struct HTab<V> {
    slots: Box<[Link<V>]>,
    mask: u64,
    size: usize,
}

impl<V> HTab<V> {
    fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        HTab {
            slots: slots.into_boxed_slice(),
            mask: (capacity - 1) as u64,
            size: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn bucket(&self, hcode: u64) -> usize {
        (hcode & self.mask) as usize
    }

    fn push(&mut self, mut node: Box<Node<V>>) {
        let pos = self.bucket(node.hcode);
        node.next = self.slots[pos].take();
        self.slots[pos] = Some(node);
        self.size += 1;
    }

    fn get(&self, hcode: u64, key: &[u8]) -> Option<&V> {
        let mut cur = self.slots[self.bucket(hcode)].as_deref();
        while let Some(node) = cur {
            if node.hcode == hcode && &node.key[..] == key {
                return Some(&node.value);
            }
            cur = node.next.as_deref();
        }
        None
    }

    fn get_mut(&mut self, hcode: u64, key: &[u8]) -> Option<&mut V> {
        let pos = self.bucket(hcode);
        let mut cur = self.slots[pos].as_deref_mut();
        while let Some(node) = cur {
            if node.hcode == hcode && &node.key[..] == key {
                return Some(&mut node.value);
            }
            cur = node.next.as_deref_mut();
        }
        None
    }

    fn detach(&mut self, hcode: u64, key: &[u8]) -> Option<Box<Node<V>>> {
        let pos = self.bucket(hcode);
        let mut link = &mut self.slots[pos];
        loop {
            let found = matches!(
                link.as_deref(),
                Some(node) if node.hcode == hcode && &node.key[..] == key
            );
            if found {
                let mut node = link.take().expect("node exists");
                *link = node.next.take();
                self.size -= 1;
                return Some(node);
            }
            match link {
                Some(node) => link = &mut node.next,
                None => return None,
            }
        }
    }

    fn for_each(&self, f: &mut impl FnMut(&[u8], &V)) {
        for slot in self.slots.iter() {
            let mut cur = slot.as_deref();
            while let Some(node) = cur {
                f(&node.key, &node.value);
                cur = node.next.as_deref();
            }
        }
    }
}

impl<V> Drop for HTab<V> {
    fn drop(&mut self) {
        // Unlink chains iteratively so a long bucket cannot overflow the
        // stack through nested box drops.
        for slot in self.slots.iter_mut() {
            let mut cur = slot.take();
            while let Some(mut node) = cur {
                cur = node.next.take();
            }
        }
    }
}

/// Byte-keyed hash map that rehashes progressively.
///
/// `newer` receives all inserts; `older` exists only while a resize is being
/// drained, and lookups consult both. Iteration order is unspecified.
pub struct HMap<V> {
    newer: HTab<V>,
    older: Option<HTab<V>>,
    migrate_pos: usize,
}

impl<V> HMap<V> {
    pub fn new() -> Self {
        HMap {
            newer: HTab::new(INITIAL_CAPACITY),
            older: None,
            migrate_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.newer.size + self.older.as_ref().map_or(0, |tab| tab.size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a resize is still being drained.
    pub fn is_rehashing(&self) -> bool {
        self.older.is_some()
    }

    /// Looks up a key. Performs a bounded chunk of migration first.
    pub fn get(&mut self, hcode: u64, key: &[u8]) -> Option<&V> {
        self.help_rehashing();
        if let Some(value) = self.newer.get(hcode, key) {
            return Some(value);
        }
        self.older.as_ref().and_then(|tab| tab.get(hcode, key))
    }

    /// Mutable lookup. Performs a bounded chunk of migration first.
    pub fn get_mut(&mut self, hcode: u64, key: &[u8]) -> Option<&mut V> {
        self.help_rehashing();
        if self.newer.get(hcode, key).is_some() {
            return self.newer.get_mut(hcode, key);
        }
        match self.older.as_mut() {
            Some(older) => older.get_mut(hcode, key),
            None => None,
        }
    }

    /// Inserts or replaces a key, returning the previous value if any.
    ///
    /// New keys always land in `newer`; a replacement happens in whichever
    /// table currently holds the key.
    pub fn insert(&mut self, hcode: u64, key: &[u8], value: V) -> Option<V> {
        self.help_rehashing();
        match self.try_replace(hcode, key, value) {
            Ok(old) => Some(old),
            Err(value) => {
                self.newer.push(Box::new(Node {
                    hcode,
                    key: key.into(),
                    value,
                    next: None,
                }));
                if self.older.is_none()
                    && self.newer.size >= self.newer.capacity() * MAX_LOAD_FACTOR
                {
                    self.trigger_rehashing();
                }
                self.help_rehashing();
                None
            }
        }
    }

    /// Removes a key, returning its value if it was present.
    pub fn remove(&mut self, hcode: u64, key: &[u8]) -> Option<V> {
        self.help_rehashing();
        if let Some(node) = self.newer.detach(hcode, key) {
            return Some(node.value);
        }
        match self.older.as_mut() {
            Some(older) => older.detach(hcode, key).map(|node| node.value),
            None => None,
        }
    }

    /// Visits every live entry, `newer` first. Ordering is unspecified.
    pub fn for_each(&self, mut f: impl FnMut(&[u8], &V)) {
        self.newer.for_each(&mut f);
        if let Some(older) = &self.older {
            older.for_each(&mut f);
        }
    }

    fn try_replace(&mut self, hcode: u64, key: &[u8], value: V) -> Result<V, V> {
        if let Some(slot) = self.newer.get_mut(hcode, key) {
            return Ok(mem::replace(slot, value));
        }
        if let Some(older) = self.older.as_mut() {
            if let Some(slot) = older.get_mut(hcode, key) {
                return Ok(mem::replace(slot, value));
            }
        }
        Err(value)
    }

    fn trigger_rehashing(&mut self) {
        let capacity = self.newer.capacity() * 2;
        let full = mem::replace(&mut self.newer, HTab::new(capacity));
        self.older = Some(full);
        self.migrate_pos = 0;
    }

    fn help_rehashing(&mut self) {
        let mut nwork = 0;
        while nwork < REHASH_WORK {
            let Some(older) = self.older.as_mut() else {
                return;
            };
            if older.size == 0 {
                break;
            }
            // size > 0 guarantees a non-empty slot at or past the cursor
            let Some(mut node) = older.slots[self.migrate_pos].take() else {
                self.migrate_pos += 1;
                continue;
            };
            older.slots[self.migrate_pos] = node.next.take();
            older.size -= 1;
            self.newer.push(node);
            nwork += 1;
        }
        if self.older.as_ref().map_or(false, |tab| tab.size == 0) {
            self.older = None;
        }
    }
}

impl<V> Default for HMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
