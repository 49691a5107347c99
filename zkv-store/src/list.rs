//! # Intrusive Circular List
//!
//! Purpose: Track connection recency for idle timeouts with O(1) insert and
//! detach.
//!
//! The list stores no payload: it is a table of `prev`/`next` indices, and
//! the caller decides what each index means (the reactor maps connection
//! slot `i` to list node `i + 1` and reserves node `0` as the sentinel). A
//! detached node points at itself, the same convention as a freshly
//! initialized sentinel.

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: u32,
    next: u32,
}

/// Table-backed circular doubly linked list.
pub struct DList {
    links: Vec<Link>,
}

impl DList {
    pub fn new() -> Self {
        DList { links: Vec::new() }
    }

    /// Grows the table so `id` is addressable; new nodes start detached.
    pub fn ensure(&mut self, id: usize) {
        while self.links.len() <= id {
            let i = self.links.len() as u32;
            self.links.push(Link { prev: i, next: i });
        }
    }

    /// Resets a node to the detached (self-linked) state.
    pub fn init(&mut self, id: usize) {
        self.links[id] = Link {
            prev: id as u32,
            next: id as u32,
        };
    }

    /// True when the node links to itself; for a sentinel this means the
    /// list is empty.
    pub fn is_detached(&self, id: usize) -> bool {
        self.links[id].next as usize == id
    }

    pub fn next(&self, id: usize) -> usize {
        self.links[id].next as usize
    }

    pub fn prev(&self, id: usize) -> usize {
        self.links[id].prev as usize
    }

    /// Unlinks a node; its neighbors are joined and the node becomes
    /// self-linked.
    pub fn detach(&mut self, id: usize) {
        let Link { prev, next } = self.links[id];
        self.links[prev as usize].next = next;
        self.links[next as usize].prev = prev;
        self.init(id);
    }

    /// Links a detached node just before `target`.
    pub fn insert_before(&mut self, target: usize, id: usize) {
        debug_assert!(self.is_detached(id));
        let prev = self.links[target].prev;
        self.links[prev as usize].next = id as u32;
        self.links[id] = Link {
            prev,
            next: target as u32,
        };
        self.links[target].prev = id as u32;
    }
}

impl Default for DList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: usize = 0;

    #[test]
    fn starts_empty_and_self_linked() {
        let mut list = DList::new();
        list.ensure(SENTINEL);
        assert!(list.is_detached(SENTINEL));
        assert_eq!(list.next(SENTINEL), SENTINEL);
        assert_eq!(list.prev(SENTINEL), SENTINEL);
    }

    #[test]
    fn insert_before_sentinel_orders_oldest_first() {
        let mut list = DList::new();
        list.ensure(3);
        list.insert_before(SENTINEL, 1);
        list.insert_before(SENTINEL, 2);
        list.insert_before(SENTINEL, 3);

        // Oldest at the sentinel's next, newest just before it.
        assert_eq!(list.next(SENTINEL), 1);
        assert_eq!(list.prev(SENTINEL), 3);
        assert_eq!(list.next(1), 2);
        assert_eq!(list.next(2), 3);
        assert_eq!(list.next(3), SENTINEL);
    }

    #[test]
    fn detach_joins_neighbors() {
        let mut list = DList::new();
        list.ensure(3);
        for id in 1..=3 {
            list.insert_before(SENTINEL, id);
        }

        list.detach(2);
        assert!(list.is_detached(2));
        assert_eq!(list.next(1), 3);
        assert_eq!(list.prev(3), 1);

        // Reattaching as most-recent moves it to the tail.
        list.insert_before(SENTINEL, 2);
        assert_eq!(list.prev(SENTINEL), 2);
    }

    #[test]
    fn detach_last_node_empties_list() {
        let mut list = DList::new();
        list.ensure(1);
        list.insert_before(SENTINEL, 1);
        list.detach(1);
        assert!(list.is_detached(SENTINEL));
    }
}
