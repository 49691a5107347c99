//! # zkv-server
//!
//! The zkv network layer: a single-threaded, readiness-driven reactor that
//! multiplexes client connections, parses length-prefixed command frames,
//! executes them against the keyspace, and schedules idle and TTL timeouts.

pub mod commands;
pub mod conn;
pub mod reactor;

pub use reactor::{Server, ServerConfig};
