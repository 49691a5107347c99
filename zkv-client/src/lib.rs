//! # zkv Sync Client
//!
//! Provide a lightweight, blocking client for the zkv wire protocol with
//! connection pooling to minimize TCP handshake overhead.

mod client;
mod pool;

pub use client::{ClientConfig, ClientError, ClientResult, KvClient, Ttl};
