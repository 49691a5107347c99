//! # Size-Augmented AVL Tree
//!
//! Purpose: Back the ordered view of sorted sets with a balanced tree that
//! can also answer rank-offset queries in O(log n).
//!
//! ## Design Principles
//! 1. **Arena + Handles**: Nodes live in a dense `Vec` with a free-list and
//!    are addressed by `u32` ids, so other indexes can hold stable handles
//!    instead of pointers.
//! 2. **Comparator At The Call Site**: The tree never inspects its payload;
//!    `insert` and `lower_bound` take the ordering as a closure.
//! 3. **Detach Without Free**: A node can be unlinked, mutated, and
//!    reinserted under its original id with no reallocation.
//! 4. **Augmented Metadata**: Each node tracks subtree height and size,
//!    refreshed bottom-up after every structural change.

/// One tree node; `data` is the caller's payload.
struct AvlNode<T> {
    parent: Option<u32>,
    left: Option<u32>,
    right: Option<u32>,
    height: u32,
    cnt: u32,
    data: T,
}

/// Height-balanced binary search tree with subtree sizes.
pub struct AvlTree<T> {
    nodes: Vec<Option<AvlNode<T>>>,
    free: Vec<u32>,
    root: Option<u32>,
}

impl<T> AvlTree<T> {
    pub fn new() -> Self {
        AvlTree {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
        }
    }

    /// Number of nodes currently linked into the tree.
    pub fn len(&self) -> usize {
        self.count(self.root) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<u32> {
        self.root
    }

    pub fn data(&self, id: u32) -> &T {
        &self.node(id).data
    }

    /// Mutable payload access; callers must not change the ordering of a
    /// node that is currently linked into the tree.
    pub fn data_mut(&mut self, id: u32) -> &mut T {
        &mut self.node_mut(id).data
    }

    /// Allocates a detached node and returns its id.
    pub fn alloc(&mut self, data: T) -> u32 {
        let id = self.free.pop().unwrap_or_else(|| {
            self.nodes.push(None);
            (self.nodes.len() - 1) as u32
        });
        self.nodes[id as usize] = Some(AvlNode {
            parent: None,
            left: None,
            right: None,
            height: 1,
            cnt: 1,
            data,
        });
        id
    }

    /// Releases a detached node's slot and returns its payload.
    pub fn free(&mut self, id: u32) -> T {
        let node = self.nodes[id as usize].take().expect("node exists");
        debug_assert!(node.parent.is_none() && node.left.is_none() && node.right.is_none());
        self.free.push(id);
        node.data
    }

    /// Links a detached node into the tree at the position chosen by `less`.
    pub fn insert(&mut self, id: u32, mut less: impl FnMut(&T, &T) -> bool) {
        let mut parent = None;
        let mut go_left = false;
        let mut cur = self.root;
        while let Some(c) = cur {
            go_left = less(&self.node(id).data, &self.node(c).data);
            parent = Some(c);
            cur = if go_left {
                self.node(c).left
            } else {
                self.node(c).right
            };
        }

        self.node_mut(id).parent = parent;
        match parent {
            None => self.root = Some(id),
            Some(p) => {
                if go_left {
                    self.node_mut(p).left = Some(id);
                } else {
                    self.node_mut(p).right = Some(id);
                }
            }
        }
        self.fix(id);
    }

    /// Unlinks a node from the tree; the id stays valid and can be
    /// reinserted or freed by the caller.
    pub fn detach(&mut self, id: u32) {
        let (left, right) = {
            let node = self.node(id);
            (node.left, node.right)
        };

        if left.is_some() && right.is_some() {
            // Lift the in-order successor into this node's position.
            let mut succ = right.expect("right child exists");
            while let Some(l) = self.node(succ).left {
                succ = l;
            }
            self.splice(succ);

            // Copy the (possibly rebalanced) links of `id` onto the
            // successor, then repoint the neighborhood at it.
            let (l2, r2, p2, h2, c2) = {
                let node = self.node(id);
                (node.left, node.right, node.parent, node.height, node.cnt)
            };
            {
                let s = self.node_mut(succ);
                s.left = l2;
                s.right = r2;
                s.parent = p2;
                s.height = h2;
                s.cnt = c2;
            }
            if let Some(l) = l2 {
                self.node_mut(l).parent = Some(succ);
            }
            if let Some(r) = r2 {
                self.node_mut(r).parent = Some(succ);
            }
            self.relink_parent(p2, id, succ);
        } else {
            self.splice(id);
        }

        let node = self.node_mut(id);
        node.parent = None;
        node.left = None;
        node.right = None;
        node.height = 1;
        node.cnt = 1;
    }

    /// Walks `offset` positions through the in-order sequence using subtree
    /// sizes; positive offsets move toward successors. Returns `None` when
    /// the target rank falls outside the tree.
    pub fn offset(&self, start: u32, offset: i64) -> Option<u32> {
        let mut id = start;
        let mut pos: i64 = 0; // rank relative to the starting node
        while pos != offset {
            let (left, right, parent) = {
                let node = self.node(id);
                (node.left, node.right, node.parent)
            };
            let left_cnt = self.count(left) as i64;
            let right_cnt = self.count(right) as i64;

            if pos < offset && pos + right_cnt >= offset {
                // target is inside the right subtree
                id = right.expect("non-empty right subtree");
                pos += self.count(self.node(id).left) as i64 + 1;
            } else if pos > offset && pos - left_cnt <= offset {
                // target is inside the left subtree
                id = left.expect("non-empty left subtree");
                pos -= self.count(self.node(id).right) as i64 + 1;
            } else {
                let p = parent?;
                if self.node(p).right == Some(id) {
                    pos -= left_cnt + 1;
                } else {
                    pos += right_cnt + 1;
                }
                id = p;
            }
        }
        Some(id)
    }

    /// Returns the leftmost node whose payload is not `below` the target,
    /// i.e. the first node of the suffix that starts at the lower bound.
    pub fn lower_bound(&self, mut below: impl FnMut(&T) -> bool) -> Option<u32> {
        let mut found = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            if below(&self.node(id).data) {
                cur = self.node(id).right;
            } else {
                found = Some(id);
                cur = self.node(id).left;
            }
        }
        found
    }

    fn node(&self, id: u32) -> &AvlNode<T> {
        self.nodes[id as usize].as_ref().expect("node exists")
    }

    fn node_mut(&mut self, id: u32) -> &mut AvlNode<T> {
        self.nodes[id as usize].as_mut().expect("node exists")
    }

    fn height(&self, id: Option<u32>) -> u32 {
        id.map_or(0, |i| self.node(i).height)
    }

    fn count(&self, id: Option<u32>) -> u32 {
        id.map_or(0, |i| self.node(i).cnt)
    }

    fn refresh(&mut self, id: u32) {
        let (left, right) = {
            let node = self.node(id);
            (node.left, node.right)
        };
        let height = 1 + self.height(left).max(self.height(right));
        let cnt = 1 + self.count(left) + self.count(right);
        let node = self.node_mut(id);
        node.height = height;
        node.cnt = cnt;
    }

    fn relink_parent(&mut self, parent: Option<u32>, old: u32, new: u32) {
        match parent {
            None => self.root = Some(new),
            Some(p) => {
                let node = self.node_mut(p);
                if node.left == Some(old) {
                    node.left = Some(new);
                } else {
                    node.right = Some(new);
                }
            }
        }
    }

    fn rot_left(&mut self, id: u32) -> u32 {
        let parent = self.node(id).parent;
        let new_top = self.node(id).right.expect("rotation needs a right child");
        let inner = self.node(new_top).left;

        self.node_mut(id).right = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(id);
        }

        self.node_mut(new_top).parent = parent;
        self.node_mut(new_top).left = Some(id);
        self.node_mut(id).parent = Some(new_top);
        self.relink_parent(parent, id, new_top);

        self.refresh(id);
        self.refresh(new_top);
        new_top
    }

    fn rot_right(&mut self, id: u32) -> u32 {
        let parent = self.node(id).parent;
        let new_top = self.node(id).left.expect("rotation needs a left child");
        let inner = self.node(new_top).right;

        self.node_mut(id).left = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(id);
        }

        self.node_mut(new_top).parent = parent;
        self.node_mut(new_top).right = Some(id);
        self.node_mut(id).parent = Some(new_top);
        self.relink_parent(parent, id, new_top);

        self.refresh(id);
        self.refresh(new_top);
        new_top
    }

    fn fix_left(&mut self, id: u32) -> u32 {
        let left = self.node(id).left.expect("left-heavy node has a left child");
        if self.height(self.node(left).left) < self.height(self.node(left).right) {
            self.rot_left(left);
        }
        self.rot_right(id)
    }

    fn fix_right(&mut self, id: u32) -> u32 {
        let right = self.node(id).right.expect("right-heavy node has a right child");
        if self.height(self.node(right).right) < self.height(self.node(right).left) {
            self.rot_right(right);
        }
        self.rot_left(id)
    }

    /// Walks from `start` to the root refreshing metadata and rotating at
    /// the first node whose children differ in height by two.
    fn fix(&mut self, start: u32) {
        let mut id = start;
        loop {
            self.refresh(id);
            let l = self.height(self.node(id).left);
            let r = self.height(self.node(id).right);
            let top = if l == r + 2 {
                self.fix_left(id)
            } else if l + 2 == r {
                self.fix_right(id)
            } else {
                id
            };
            match self.node(top).parent {
                Some(p) => id = p,
                None => {
                    self.root = Some(top);
                    return;
                }
            }
        }
    }

    /// Unlinks a node that has at most one child.
    fn splice(&mut self, id: u32) {
        let (child, parent) = {
            let node = self.node(id);
            debug_assert!(node.left.is_none() || node.right.is_none());
            (node.left.or(node.right), node.parent)
        };

        if let Some(child) = child {
            self.node_mut(child).parent = parent;
        }
        match parent {
            None => self.root = child,
            Some(p) => {
                let node = self.node_mut(p);
                if node.left == Some(id) {
                    node.left = child;
                } else {
                    node.right = child;
                }
                self.fix(p);
            }
        }
    }
}

impl<T> Default for AvlTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn by_value(a: &i64, b: &i64) -> bool {
        a < b
    }

    fn inorder(tree: &AvlTree<i64>, id: Option<u32>, out: &mut Vec<u32>) {
        if let Some(id) = id {
            inorder(tree, tree.node(id).left, out);
            out.push(id);
            inorder(tree, tree.node(id).right, out);
        }
    }

    /// Checks balance, height, cnt, and parent links for every reachable
    /// node and returns the in-order id sequence.
    fn verify(tree: &AvlTree<i64>) -> Vec<u32> {
        fn rec(tree: &AvlTree<i64>, id: Option<u32>, parent: Option<u32>) -> (u32, u32) {
            let Some(id) = id else {
                return (0, 0);
            };
            let node = tree.node(id);
            assert_eq!(node.parent, parent);
            let (lh, lc) = rec(tree, node.left, Some(id));
            let (rh, rc) = rec(tree, node.right, Some(id));
            assert!(lh.abs_diff(rh) <= 1, "unbalanced at id {id}");
            assert_eq!(node.height, 1 + lh.max(rh));
            assert_eq!(node.cnt, 1 + lc + rc);
            (node.height, node.cnt)
        }
        rec(tree, tree.root, None);

        let mut ids = Vec::new();
        inorder(tree, tree.root, &mut ids);
        for pair in ids.windows(2) {
            assert!(tree.data(pair[0]) <= tree.data(pair[1]));
        }
        assert_eq!(ids.len(), tree.len());
        ids
    }

    #[test]
    fn sequential_inserts_stay_balanced() {
        let mut tree = AvlTree::new();
        for value in 0..128i64 {
            let id = tree.alloc(value);
            tree.insert(id, by_value);
            verify(&tree);
        }
        // A perfectly degenerate insert order still yields log height.
        assert!(tree.node(tree.root.unwrap()).height <= 8);
    }

    #[test]
    fn detach_keeps_invariants() {
        let mut tree = AvlTree::new();
        let ids: Vec<u32> = (0..64i64)
            .map(|value| {
                let id = tree.alloc(value);
                tree.insert(id, by_value);
                id
            })
            .collect();

        // Remove every other node, checking after each detach.
        for id in ids.iter().step_by(2) {
            tree.detach(*id);
            tree.free(*id);
            verify(&tree);
        }
        assert_eq!(tree.len(), 32);
    }

    #[test]
    fn detached_node_can_be_reinserted() {
        let mut tree = AvlTree::new();
        let ids: Vec<u32> = [10i64, 20, 30]
            .iter()
            .map(|&value| {
                let id = tree.alloc(value);
                tree.insert(id, by_value);
                id
            })
            .collect();

        tree.detach(ids[0]);
        *tree.data_mut(ids[0]) = 25;
        tree.insert(ids[0], by_value);

        let order = verify(&tree);
        let values: Vec<i64> = order.iter().map(|&id| *tree.data(id)).collect();
        assert_eq!(values, vec![20, 25, 30]);
    }

    #[test]
    fn offset_matches_inorder_rank() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = AvlTree::new();
        for _ in 0..100 {
            let id = tree.alloc(rng.gen_range(0..1_000_000));
            tree.insert(id, by_value);
        }

        let ids = verify(&tree);
        let n = ids.len() as i64;
        for (i, &id) in ids.iter().enumerate() {
            for k in -(i as i64)..(n - i as i64) {
                let expect = ids[(i as i64 + k) as usize];
                assert_eq!(tree.offset(id, k), Some(expect));
            }
            assert_eq!(tree.offset(id, -(i as i64) - 1), None);
            assert_eq!(tree.offset(id, n - i as i64), None);
        }
    }

    #[test]
    fn randomized_churn_keeps_invariants() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut tree = AvlTree::new();
        let mut live: Vec<u32> = Vec::new();

        for _ in 0..500 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let id = tree.alloc(rng.gen_range(0..10_000));
                tree.insert(id, by_value);
                live.push(id);
            } else {
                let pick = rng.gen_range(0..live.len());
                let id = live.swap_remove(pick);
                tree.detach(id);
                tree.free(id);
            }
            verify(&tree);
        }
    }

    #[test]
    fn lower_bound_finds_first_not_below() {
        let mut tree = AvlTree::new();
        for value in [10i64, 20, 30, 40] {
            let id = tree.alloc(value);
            tree.insert(id, by_value);
        }

        let at = tree.lower_bound(|v| *v < 25).unwrap();
        assert_eq!(*tree.data(at), 30);
        let at = tree.lower_bound(|v| *v < 10).unwrap();
        assert_eq!(*tree.data(at), 10);
        assert_eq!(tree.lower_bound(|v| *v < 99), None);
    }
}
