//! # Sorted Set
//!
//! Purpose: Maintain a set of named members with floating-point scores,
//! ordered by `(score, name)` and addressable by name.
//!
//! Two views share one arena of member nodes: the AVL tree orders members
//! for range scans, and the hash map resolves a name to its tree handle in
//! O(1). A score update relinks the tree view only; the hash view and the
//! node allocation are untouched.

use std::cmp::Ordering;

use ahash::RandomState;

use crate::avl::AvlTree;
use crate::hash::HMap;

/// Upper bound on the number of members one range query may return.
pub const ZQUERY_MAX: usize = 10_000;

/// Payload of one member node in the tree arena.
struct Member {
    score: f64,
    name: Box<[u8]>,
}

/// Sorted set: an ordered tree and a by-name index over the same members.
pub struct ZSet {
    by_rank: AvlTree<Member>,
    by_name: HMap<u32>,
    hash: RandomState,
}

/// Ordering on `(score, name)`: scores first (total order over doubles),
/// names as raw bytes on ties.
fn rank_less(a: &Member, b: &Member) -> bool {
    match a.score.total_cmp(&b.score) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => a.name < b.name,
    }
}

/// True when `member` sorts strictly before the `(score, name)` pair.
fn rank_below(member: &Member, score: f64, name: &[u8]) -> bool {
    match member.score.total_cmp(&score) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => &member.name[..] < name,
    }
}

impl ZSet {
    pub fn new() -> Self {
        ZSet {
            by_rank: AvlTree::new(),
            by_name: HMap::new(),
            hash: RandomState::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_rank.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_rank.is_empty()
    }

    /// Adds a member or updates an existing member's score.
    ///
    /// Returns `true` when the member was newly added, `false` when an
    /// existing member was updated.
    pub fn insert(&mut self, name: &[u8], score: f64) -> bool {
        let hcode = self.hash.hash_one(name);
        if let Some(&id) = self.by_name.get(hcode, name) {
            self.update_score(id, score);
            return false;
        }

        let id = self.by_rank.alloc(Member {
            score,
            name: name.into(),
        });
        self.by_name.insert(hcode, name, id);
        self.by_rank.insert(id, rank_less);
        true
    }

    /// Removes a member by name. Returns `true` when it was present.
    pub fn remove(&mut self, name: &[u8]) -> bool {
        let hcode = self.hash.hash_one(name);
        match self.by_name.remove(hcode, name) {
            Some(id) => {
                self.by_rank.detach(id);
                self.by_rank.free(id);
                true
            }
            None => false,
        }
    }

    /// Looks up a member's score by name.
    pub fn score(&mut self, name: &[u8]) -> Option<f64> {
        let hcode = self.hash.hash_one(name);
        let id = self.by_name.get(hcode, name).copied()?;
        Some(self.by_rank.data(id).score)
    }

    /// Range scan: seek to the first member at or after `(score, name)`,
    /// step `offset` ranks (negative walks backward), then collect up to
    /// `limit` consecutive members.
    pub fn query(&self, score: f64, name: &[u8], offset: i64, limit: usize) -> Vec<(Vec<u8>, f64)> {
        let mut out = Vec::new();
        let Some(start) = self.by_rank.lower_bound(|m| rank_below(m, score, name)) else {
            return out;
        };

        let mut cur = self.by_rank.offset(start, offset);
        while let Some(id) = cur {
            if out.len() >= limit {
                break;
            }
            let member = self.by_rank.data(id);
            out.push((member.name.to_vec(), member.score));
            cur = self.by_rank.offset(id, 1);
        }
        out
    }

    /// Relinks the tree view under a new score. The node keeps its id, so
    /// the by-name index stays valid without being touched.
    fn update_score(&mut self, id: u32, score: f64) {
        if self.by_rank.data(id).score == score {
            return;
        }
        self.by_rank.detach(id);
        self.by_rank.data_mut(id).score = score;
        self.by_rank.insert(id, rank_less);
    }
}

impl Default for ZSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ZSet {
        let mut zset = ZSet::new();
        for (score, name) in [
            (100.0, "alice"),
            (200.0, "bob"),
            (150.0, "charlie"),
            (250.0, "diana"),
            (180.0, "eve"),
        ] {
            assert!(zset.insert(name.as_bytes(), score));
        }
        zset
    }

    fn names(rows: &[(Vec<u8>, f64)]) -> Vec<&str> {
        rows.iter()
            .map(|(name, _)| std::str::from_utf8(name).unwrap())
            .collect()
    }

    #[test]
    fn both_views_stay_in_sync() {
        let mut zset = sample();
        assert_eq!(zset.len(), 5);
        assert_eq!(zset.by_name.len(), zset.by_rank.len());

        assert!(zset.remove(b"charlie"));
        assert!(!zset.remove(b"charlie"));
        assert_eq!(zset.len(), 4);
        assert_eq!(zset.by_name.len(), zset.by_rank.len());
        assert_eq!(zset.score(b"charlie"), None);
    }

    #[test]
    fn insert_existing_updates_score() {
        let mut zset = sample();
        assert!(!zset.insert(b"alice", 500.0));
        assert_eq!(zset.len(), 5);
        assert_eq!(zset.score(b"alice"), Some(500.0));

        // alice now sorts last
        let rows = zset.query(f64::MIN, b"", 0, 10);
        assert_eq!(names(&rows).last(), Some(&"alice"));
    }

    #[test]
    fn query_seeks_by_score_then_name() {
        let zset = sample();
        let rows = zset.query(150.0, b"charlie", 0, 3);
        assert_eq!(names(&rows), vec!["charlie", "eve", "bob"]);
        assert_eq!(rows[0].1, 150.0);
        assert_eq!(rows[1].1, 180.0);
        assert_eq!(rows[2].1, 200.0);
    }

    #[test]
    fn query_negative_offset_walks_backward() {
        let zset = sample();
        let rows = zset.query(200.0, b"bob", -1, 2);
        assert_eq!(names(&rows), vec!["eve", "bob"]);
    }

    #[test]
    fn query_limits_and_edges() {
        let zset = sample();
        assert!(zset.query(251.0, b"", 0, 10).is_empty());
        assert!(zset.query(100.0, b"alice", -2, 10).is_empty());
        assert_eq!(zset.query(100.0, b"alice", 0, 2).len(), 2);

        let empty = ZSet::new();
        assert!(empty.query(0.0, b"", 0, 10).is_empty());
    }

    #[test]
    fn ties_order_by_name_bytes() {
        let mut zset = ZSet::new();
        zset.insert(b"bb", 1.0);
        zset.insert(b"a", 1.0);
        zset.insert(b"ab", 1.0);
        let rows = zset.query(1.0, b"", 0, 10);
        assert_eq!(names(&rows), vec!["a", "ab", "bb"]);
    }
}
