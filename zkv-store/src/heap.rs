//! # TTL Timer Heap
//!
//! Purpose: Schedule key expirations as a binary min-heap ordered by
//! absolute timestamp.
//!
//! ## Design Principles
//! 1. **Array-Backed**: Items live in one `Vec`; parent/child positions are
//!    index arithmetic.
//! 2. **Synced Back-References**: Every time an item lands at a new index,
//!    a caller-supplied callback is told `(owner, index)` so the owning
//!    entry can keep its heap position current. This replaces the raw
//!    back-pointer of a pointer-based heap.
//! 3. **Swap-With-Tail Removal**: `remove` pops the last item into the hole
//!    and re-heapifies it, keeping deletion O(log n).

/// One scheduled expiration: an absolute wall-clock time in microseconds and
/// the entry id that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerItem {
    pub when_us: u64,
    pub owner: u32,
}

/// Min-heap over `TimerItem`, ordered by `when_us`.
pub struct TimerHeap {
    items: Vec<TimerItem>,
}

/// Invoked with `(owner, index)` whenever an item settles at `index`.
pub type SyncFn<'a> = &'a mut dyn FnMut(u32, usize);

impl TimerHeap {
    pub fn new() -> Self {
        TimerHeap { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Earliest scheduled item, if any.
    pub fn peek(&self) -> Option<TimerItem> {
        self.items.first().copied()
    }

    /// Item at a known position; the position must come from a synced
    /// back-reference.
    pub fn get(&self, pos: usize) -> TimerItem {
        self.items[pos]
    }

    /// Replaces the item at `pos` or appends a new one, then restores heap
    /// order.
    pub fn upsert(&mut self, pos: Option<usize>, item: TimerItem, sync: SyncFn<'_>) {
        match pos {
            Some(pos) => {
                self.items[pos] = item;
                self.update(pos, sync);
            }
            None => {
                self.items.push(item);
                self.sift_up(self.items.len() - 1, sync);
            }
        }
    }

    /// Removes the item at `pos`, re-heapifying whatever item replaces it.
    /// The removed item's owner is not synced; the caller is dropping it.
    pub fn remove(&mut self, pos: usize, sync: SyncFn<'_>) -> TimerItem {
        let removed = self.items[pos];
        let last = self.items.pop().expect("non-empty heap");
        if pos < self.items.len() {
            self.items[pos] = last;
            self.update(pos, sync);
        }
        removed
    }

    fn update(&mut self, pos: usize, sync: SyncFn<'_>) {
        if pos > 0 && self.items[parent(pos)].when_us > self.items[pos].when_us {
            self.sift_up(pos, sync);
        } else {
            self.sift_down(pos, sync);
        }
    }

    fn sift_up(&mut self, mut pos: usize, sync: SyncFn<'_>) {
        let item = self.items[pos];
        while pos > 0 && self.items[parent(pos)].when_us > item.when_us {
            self.items[pos] = self.items[parent(pos)];
            sync(self.items[pos].owner, pos);
            pos = parent(pos);
        }
        self.items[pos] = item;
        sync(item.owner, pos);
    }

    fn sift_down(&mut self, mut pos: usize, sync: SyncFn<'_>) {
        let item = self.items[pos];
        let len = self.items.len();
        loop {
            let l = 2 * pos + 1;
            let r = 2 * pos + 2;
            let mut min_pos = pos;
            let mut min_val = item.when_us;
            if l < len && self.items[l].when_us < min_val {
                min_pos = l;
                min_val = self.items[l].when_us;
            }
            if r < len && self.items[r].when_us < min_val {
                min_pos = r;
            }
            if min_pos == pos {
                break;
            }
            self.items[pos] = self.items[min_pos];
            sync(self.items[pos].owner, pos);
            pos = min_pos;
        }
        self.items[pos] = item;
        sync(item.owner, pos);
    }
}

fn parent(pos: usize) -> usize {
    (pos + 1) / 2 - 1
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Owner-indexed position table standing in for `Entry::heap_idx`.
    struct Owners {
        pos: Vec<Option<usize>>,
    }

    impl Owners {
        fn new(n: usize) -> Self {
            Owners { pos: vec![None; n] }
        }
    }

    fn verify(heap: &TimerHeap, owners: &Owners) {
        for i in 1..heap.len() {
            assert!(heap.get(parent(i)).when_us <= heap.get(i).when_us);
        }
        // back-references point at the right slots, both directions
        for i in 0..heap.len() {
            let item = heap.get(i);
            assert_eq!(owners.pos[item.owner as usize], Some(i));
        }
        let live = owners.pos.iter().filter(|p| p.is_some()).count();
        assert_eq!(live, heap.len());
    }

    #[test]
    fn upsert_orders_by_timestamp() {
        let mut heap = TimerHeap::new();
        let mut owners = Owners::new(4);
        for (owner, when) in [(0u32, 300u64), (1, 100), (2, 200), (3, 50)] {
            heap.upsert(
                None,
                TimerItem {
                    when_us: when,
                    owner,
                },
                &mut |o, i| owners.pos[o as usize] = Some(i),
            );
            verify(&heap, &owners);
        }
        assert_eq!(heap.peek().unwrap().owner, 3);
    }

    #[test]
    fn update_in_place_reschedules() {
        let mut heap = TimerHeap::new();
        let mut owners = Owners::new(3);
        for (owner, when) in [(0u32, 100u64), (1, 200), (2, 300)] {
            heap.upsert(
                None,
                TimerItem {
                    when_us: when,
                    owner,
                },
                &mut |o, i| owners.pos[o as usize] = Some(i),
            );
        }

        // Push the earliest deadline to the back.
        let pos = owners.pos[0].unwrap();
        heap.upsert(
            Some(pos),
            TimerItem {
                when_us: 900,
                owner: 0,
            },
            &mut |o, i| owners.pos[o as usize] = Some(i),
        );
        verify(&heap, &owners);
        assert_eq!(heap.peek().unwrap().owner, 1);
    }

    #[test]
    fn remove_swaps_tail_and_stays_synced() {
        let mut heap = TimerHeap::new();
        let mut owners = Owners::new(8);
        for owner in 0..8u32 {
            heap.upsert(
                None,
                TimerItem {
                    when_us: (8 - owner as u64) * 10,
                    owner,
                },
                &mut |o, i| owners.pos[o as usize] = Some(i),
            );
        }

        while !heap.is_empty() {
            let top = heap.peek().unwrap();
            let pos = owners.pos[top.owner as usize].unwrap();
            owners.pos[top.owner as usize] = None;
            heap.remove(pos, &mut |o, i| owners.pos[o as usize] = Some(i));
            verify(&heap, &owners);
        }
    }

    #[test]
    fn randomized_ops_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut heap = TimerHeap::new();
        let mut owners = Owners::new(64);

        for _ in 0..2_000 {
            let owner = rng.gen_range(0..64u32);
            let pos = owners.pos[owner as usize];
            if pos.is_some() && rng.gen_bool(0.3) {
                owners.pos[owner as usize] = None;
                heap.remove(pos.unwrap(), &mut |o, i| owners.pos[o as usize] = Some(i));
            } else {
                let item = TimerItem {
                    when_us: rng.gen_range(0..100_000),
                    owner,
                };
                heap.upsert(pos, item, &mut |o, i| owners.pos[o as usize] = Some(i));
            }
            verify(&heap, &owners);
        }
    }
}
