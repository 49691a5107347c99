//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing zkv commands over
//! the length-prefixed wire protocol.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KvClient` hides pooling and framing details.
//! 2. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 3. **Typed Results**: Each command maps the tagged reply into the shape
//!    its contract promises; anything else is an error.
//! 4. **Status-Carrying Errors**: Non-OK replies surface the server status
//!    so callers can distinguish type errors from unknown commands.

use std::fmt;
use std::time::Duration;

use zkv_common::{FrameError, Reply, Status};

use crate::pool::{ConnectionPool, PoolConfig};

/// Result type for the sync client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the sync client.
#[derive(Debug)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    Io(std::io::Error),
    /// Wire framing violation in either direction.
    Frame(FrameError),
    /// Server closed the connection mid-reply.
    Closed,
    /// Server replied with a non-OK status.
    Server { status: Status },
    /// Reply payload did not match the command's contract.
    UnexpectedResponse,
    /// Pool is at capacity and no idle connections are available.
    PoolExhausted,
    /// Address could not be parsed into a socket address.
    InvalidAddress,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "io error: {}", err),
            ClientError::Frame(err) => write!(f, "frame error: {}", err),
            ClientError::Closed => write!(f, "connection closed by server"),
            ClientError::Server { status } => write!(f, "server error: {:?}", status),
            ClientError::UnexpectedResponse => write!(f, "unexpected response"),
            ClientError::PoolExhausted => write!(f, "connection pool exhausted"),
            ClientError::InvalidAddress => write!(f, "invalid address"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err)
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        ClientError::Frame(err)
    }
}

/// TTL state reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Configuration for the synchronous client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:1234".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: format!("127.0.0.1:{}", zkv_common::DEFAULT_PORT),
            max_idle: 8,
            max_total: 16,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

/// Synchronous client with connection pooling.
///
/// Each call acquires a connection, executes one command, and returns the
/// connection to the pool.
pub struct KvClient {
    pool: ConnectionPool,
}

impl KvClient {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let mut config = ClientConfig::default();
        config.addr = addr.into();
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
        })?;
        Ok(KvClient { pool })
    }

    /// Sends an arbitrary command and returns the raw status and reply.
    pub fn raw(&self, args: &[&[u8]]) -> ClientResult<(Status, Reply)> {
        let mut conn = self.pool.acquire()?;
        conn.exec(args)
    }

    /// Fetches a value by key. `Ok(None)` means the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.exec_ok(&[&b"GET"[..], key])? {
            Reply::Str(data) => Ok(Some(data)),
            Reply::Nil => Ok(None),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a bytes value for a key.
    pub fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        match self.exec_ok(&[&b"SET"[..], key, value])? {
            Reply::Nil => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn del(&self, key: &[u8]) -> ClientResult<bool> {
        self.exec_int(&[&b"DEL"[..], key]).map(|n| n == 1)
    }

    /// Lists every key in the keyspace.
    pub fn keys(&self) -> ClientResult<Vec<Vec<u8>>> {
        match self.exec_ok(&[&b"KEYS"[..]])? {
            Reply::Arr(items) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Str(key) => Ok(key),
                    _ => Err(ClientError::UnexpectedResponse),
                })
                .collect(),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> ClientResult<bool> {
        let ms = ttl.as_millis().to_string();
        self.exec_int(&[&b"EXPIRE"[..], key, ms.as_bytes()]).map(|n| n == 1)
    }

    /// Removes a key's TTL. Returns true when a timer was cleared.
    pub fn persist(&self, key: &[u8]) -> ClientResult<bool> {
        self.exec_int(&[&b"PERSIST"[..], key]).map(|n| n == 1)
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: &[u8]) -> ClientResult<Ttl> {
        match self.exec_int(&[&b"TTL"[..], key])? {
            -2 => Ok(Ttl::Missing),
            -1 => Ok(Ttl::NoExpiry),
            ms if ms >= 0 => Ok(Ttl::ExpiresIn(Duration::from_millis(ms as u64))),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Adds a member to a sorted set or updates its score.
    /// Returns true when the member was newly added.
    pub fn zadd(&self, key: &[u8], score: f64, member: &[u8]) -> ClientResult<bool> {
        let score = score.to_string();
        self.exec_int(&[&b"ZADD"[..], key, score.as_bytes(), member])
            .map(|n| n == 1)
    }

    /// Removes a member from a sorted set. Returns true when it existed.
    pub fn zrem(&self, key: &[u8], member: &[u8]) -> ClientResult<bool> {
        self.exec_int(&[&b"ZREM"[..], key, member]).map(|n| n == 1)
    }

    /// Fetches a member's score, `Ok(None)` when absent.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> ClientResult<Option<f64>> {
        match self.exec_ok(&[&b"ZSCORE"[..], key, member])? {
            Reply::Dbl(score) => Ok(Some(score)),
            Reply::Nil => Ok(None),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Range scan over a sorted set, returning `(member, score)` pairs.
    pub fn zquery(
        &self,
        key: &[u8],
        score: f64,
        member: &[u8],
        offset: i64,
        limit: usize,
    ) -> ClientResult<Vec<(Vec<u8>, f64)>> {
        let score = score.to_string();
        let offset = offset.to_string();
        let limit = limit.to_string();
        let reply = self.exec_ok(&[
            b"ZQUERY",
            key,
            score.as_bytes(),
            member,
            offset.as_bytes(),
            limit.as_bytes(),
        ])?;

        let Reply::Arr(items) = reply else {
            return Err(ClientError::UnexpectedResponse);
        };
        if items.len() % 2 != 0 {
            return Err(ClientError::UnexpectedResponse);
        }

        let mut rows = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(name), Some(score)) = (iter.next(), iter.next()) {
            match (name, score) {
                (Reply::Str(name), Reply::Dbl(score)) => rows.push((name, score)),
                _ => return Err(ClientError::UnexpectedResponse),
            }
        }
        Ok(rows)
    }

    fn exec_ok(&self, args: &[&[u8]]) -> ClientResult<Reply> {
        let (status, reply) = self.raw(args)?;
        if status != Status::Ok {
            return Err(ClientError::Server { status });
        }
        Ok(reply)
    }

    fn exec_int(&self, args: &[&[u8]]) -> ClientResult<i64> {
        match self.exec_ok(args)? {
            Reply::Int(value) => Ok(value),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}
