//! # Reactor
//!
//! Purpose: Run the single-threaded event loop that owns the listener, all
//! connections, the idle list, and the keyspace.
//!
//! ## Design Principles
//! 1. **One Thread, No Locks**: Every command executes to completion on this
//!    thread before the loop polls again, so the keyspace needs no
//!    synchronization and commands serialize at frame granularity.
//! 2. **Deadline-Driven Polling**: The poll timeout is the nearest of the
//!    oldest connection's idle deadline, the earliest TTL, and a default
//!    tick, so timers fire without busy-waiting.
//! 3. **Slot Arithmetic**: Connection slot `i` is poll token `i + 1` and
//!    idle-list node `i + 1`; token 0 is the listener and list node 0 the
//!    sentinel.
//! 4. **Drain On Edge**: Readiness is edge-triggered, so accept and I/O
//!    handlers always run until `WouldBlock`.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use zkv_common::DEFAULT_PORT;
use zkv_store::list::DList;
use zkv_store::{Store, EXPIRE_WORK_MAX};

use crate::conn::Conn;

const LISTENER: Token = Token(0);

/// Sentinel node of the idle list.
const IDLE_SENTINEL: usize = 0;

/// Poll timeout when no timer is nearer.
const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Accepts per readable listener event, so one accept storm cannot starve
/// established connections.
const ACCEPT_BATCH: usize = 64;

const EVENT_CAPACITY: usize = 256;

/// Wall-clock microseconds since the Unix epoch.
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Server configuration supplied by the binary (or by tests).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Connections with no successful I/O for this long are dropped.
    pub idle_timeout: Duration,
    /// Worker threads for deferred teardown; zero frees inline.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(60),
            workers: 4,
        }
    }
}

/// The event loop and everything it owns.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    conns: Vec<Option<Conn>>,
    free: Vec<usize>,
    idle: DList,
    store: Store,
    idle_timeout_us: u64,
}

impl Server {
    /// Binds the listening socket and prepares the loop. The listener is
    /// non-blocking and created with `SO_REUSEADDR`.
    pub fn bind(config: ServerConfig) -> io::Result<Server> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(config.addr)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let mut idle = DList::new();
        idle.ensure(IDLE_SENTINEL);

        Ok(Server {
            poll,
            listener,
            conns: Vec::new(),
            free: Vec::new(),
            idle,
            store: Store::with_workers(config.workers),
            idle_timeout_us: config.idle_timeout.as_micros() as u64,
        })
    }

    /// Address the listener actually bound (port 0 resolves here).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the event loop forever.
    pub fn run(&mut self) -> io::Result<()> {
        info!("listening on {}", self.listener.local_addr()?);
        let mut events = Events::with_capacity(EVENT_CAPACITY);
        loop {
            self.tick(&mut events)?;
        }
    }

    /// One loop iteration: poll, serve ready sockets, fire timers, reap.
    fn tick(&mut self, events: &mut Events) -> io::Result<()> {
        let timeout = self.poll_timeout(now_us());
        match self.poll.poll(events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err),
        }

        let now = now_us();
        for event in events.iter() {
            match event.token() {
                LISTENER => self.accept_ready(now),
                Token(token) => {
                    self.conn_ready(token - 1, event.is_readable(), event.is_writable(), now)
                }
            }
        }

        self.store.evict_due(now_us(), EXPIRE_WORK_MAX);
        self.close_idle(now_us());
        self.reap();
        Ok(())
    }

    /// Nearest deadline among the oldest idle connection, the TTL heap, and
    /// the default tick.
    fn poll_timeout(&self, now: u64) -> Duration {
        let mut deadline = now + DEFAULT_TICK.as_micros() as u64;

        if !self.idle.is_detached(IDLE_SENTINEL) {
            let slot = self.idle.next(IDLE_SENTINEL) - 1;
            if let Some(conn) = self.conns[slot].as_ref() {
                deadline = deadline.min(conn.last_active_us + self.idle_timeout_us);
            }
        }
        if let Some(when) = self.store.next_expiry_us() {
            deadline = deadline.min(when);
        }

        Duration::from_micros(deadline.saturating_sub(now))
    }

    fn accept_ready(&mut self, now: u64) {
        for _ in 0..ACCEPT_BATCH {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = self.register_conn(stream, peer, now) {
                        warn!("failed to register {peer}: {err}");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    // Transient per-connection failures (e.g. the peer reset
                    // before accept) should not take the listener down.
                    warn!("accept failed: {err}");
                    break;
                }
            }
        }
    }

    fn register_conn(
        &mut self,
        mut stream: mio::net::TcpStream,
        peer: SocketAddr,
        now: u64,
    ) -> io::Result<()> {
        let _ = stream.set_nodelay(true);

        let slot = self.free.pop().unwrap_or_else(|| {
            self.conns.push(None);
            self.conns.len() - 1
        });
        self.poll
            .registry()
            .register(&mut stream, Token(slot + 1), Interest::READABLE)?;

        self.conns[slot] = Some(Conn::new(stream, peer, now));
        self.idle.ensure(slot + 1);
        self.idle.init(slot + 1);
        self.idle.insert_before(IDLE_SENTINEL, slot + 1);
        debug!("accepted {peer} in slot {slot}");
        Ok(())
    }

    fn conn_ready(&mut self, slot: usize, readable: bool, writable: bool, now: u64) {
        // Events can be stale: the slot may already be reaped or closing.
        let Some(conn) = self.conns.get_mut(slot).and_then(|c| c.as_mut()) else {
            return;
        };
        if conn.want_close {
            return;
        }

        let mut progressed = false;
        if readable && conn.want_read {
            progressed |= conn.on_readable(&mut self.store, now);
        }
        if writable && conn.want_write {
            progressed |= conn.on_writable(&mut self.store, now);
        }

        if progressed && !conn.want_close {
            conn.last_active_us = now;
            self.idle.detach(slot + 1);
            self.idle.insert_before(IDLE_SENTINEL, slot + 1);
        }
        self.sync_interest(slot);
    }

    /// Mirrors a connection's want flags into its poller registration.
    fn sync_interest(&mut self, slot: usize) {
        let Some(conn) = self.conns.get_mut(slot).and_then(|c| c.as_mut()) else {
            return;
        };
        if conn.want_close {
            return;
        }
        let desired = conn.desired_interest();
        if desired != conn.registered {
            match self
                .poll
                .registry()
                .reregister(&mut conn.stream, Token(slot + 1), desired)
            {
                Ok(()) => conn.registered = desired,
                Err(err) => {
                    warn!("reregister failed for {}: {err}", conn.peer);
                    conn.want_close = true;
                }
            }
        }
    }

    /// Walks the idle list from its oldest end, flagging timed-out
    /// connections for close.
    fn close_idle(&mut self, now: u64) {
        while !self.idle.is_detached(IDLE_SENTINEL) {
            let node = self.idle.next(IDLE_SENTINEL);
            let slot = node - 1;
            let Some(conn) = self.conns[slot].as_mut() else {
                self.idle.detach(node);
                continue;
            };
            if now.saturating_sub(conn.last_active_us) < self.idle_timeout_us {
                break;
            }
            debug!("closing idle connection {}", conn.peer);
            conn.want_close = true;
            self.idle.detach(node);
        }
    }

    /// Deregisters and frees every connection flagged for close.
    fn reap(&mut self) {
        for slot in 0..self.conns.len() {
            let close = self.conns[slot]
                .as_ref()
                .map_or(false, |conn| conn.want_close);
            if !close {
                continue;
            }
            let mut conn = self.conns[slot].take().expect("flagged connection");
            let _ = self.poll.registry().deregister(&mut conn.stream);
            self.idle.detach(slot + 1);
            self.free.push(slot);
            debug!("closed {}", conn.peer);
        }
    }
}
