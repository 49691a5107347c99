//! # zkv-store
//!
//! The in-memory data plane for the zkv server: a progressive-rehash hash
//! map, a size-augmented AVL tree, a sorted set combining both, a TTL timer
//! heap, an intrusive-style idle list, a worker pool for deferred teardown,
//! and the top-level keyspace tying them together.
//!
//! Everything here is single-owner data intended to live on one thread; the
//! only concurrency is the worker pool, which receives values whose ownership
//! has already been detached from the keyspace.

pub mod avl;
pub mod hash;
pub mod heap;
pub mod list;
pub mod pool;
pub mod store;
pub mod zset;

pub use pool::ThreadPool;
pub use store::{Store, TtlState, Value, WrongType, EXPIRE_WORK_MAX, LARGE_CONTAINER_THRESHOLD};
pub use zset::{ZSet, ZQUERY_MAX};
