//! # Connection State Machine
//!
//! Purpose: Own one client socket's buffers and drive it through the
//! read / write / close states.
//!
//! A connection is reading by default. A read callback drains the socket,
//! then processes every complete frame while the outbound buffer has room;
//! once replies are pending it flips to write-only. A write callback drains
//! the outbound buffer and flips back to reading, immediately processing any
//! frames that were pipelined behind the last batch. Protocol violations,
//! I/O errors, and buffer-cap abuse all funnel into `want_close`; the
//! reactor reaps flagged connections at the end of each tick.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::Interest;
use tracing::{debug, warn};

use zkv_common::{encode_response, try_parse_request, MAX_MSG_LEN, MAX_REPLY_LEN};
use zkv_store::Store;

use crate::commands;

/// Per-connection buffer cap. A peer that outruns the server past this
/// point is dropped rather than buffered without bound.
pub const BUF_LIMIT: usize = 16 * MAX_MSG_LEN;

/// Bytes read from the socket per syscall.
const READ_CHUNK: usize = 64 * 1024;

/// One client connection.
pub struct Conn {
    pub(crate) stream: TcpStream,
    pub(crate) peer: SocketAddr,
    inbound: BytesMut,
    outbound: BytesMut,
    pub(crate) want_read: bool,
    pub(crate) want_write: bool,
    pub(crate) want_close: bool,
    /// Peer sent EOF; close once the outbound buffer drains.
    peer_closed: bool,
    pub(crate) last_active_us: u64,
    /// Interest currently registered with the poller.
    pub(crate) registered: Interest,
}

impl Conn {
    pub fn new(stream: TcpStream, peer: SocketAddr, now_us: u64) -> Self {
        Conn {
            stream,
            peer,
            inbound: BytesMut::with_capacity(4 * 1024),
            outbound: BytesMut::with_capacity(4 * 1024),
            want_read: true,
            want_write: false,
            want_close: false,
            peer_closed: false,
            last_active_us: now_us,
            registered: Interest::READABLE,
        }
    }

    /// Interest implied by the current want flags.
    pub(crate) fn desired_interest(&self) -> Interest {
        match (self.want_read, self.want_write) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (false, true) => Interest::WRITABLE,
            _ => Interest::READABLE,
        }
    }

    /// Drains the socket into the inbound buffer and processes frames.
    /// Returns true when any bytes were transferred.
    pub fn on_readable(&mut self, store: &mut Store, now_us: u64) -> bool {
        let mut progressed = false;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(n) => {
                    progressed = true;
                    self.inbound.extend_from_slice(&chunk[..n]);
                    if self.inbound.len() > BUF_LIMIT {
                        warn!("dropping {}: inbound buffer over {} bytes", self.peer, BUF_LIMIT);
                        self.want_close = true;
                        return progressed;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("read error from {}: {err}", self.peer);
                    self.want_close = true;
                    return progressed;
                }
            }
        }

        self.process(store, now_us);
        if self.peer_closed && self.outbound.is_empty() {
            // Frames already buffered were answered; a trailing partial
            // frame is discarded with the connection.
            self.want_close = true;
        }
        progressed
    }

    /// Drains the outbound buffer. Returns true when any bytes were written.
    pub fn on_writable(&mut self, store: &mut Store, now_us: u64) -> bool {
        let mut progressed = false;
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => {
                    self.want_close = true;
                    return progressed;
                }
                Ok(n) => {
                    progressed = true;
                    self.outbound.advance(n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("write error to {}: {err}", self.peer);
                    self.want_close = true;
                    return progressed;
                }
            }
        }

        if self.outbound.is_empty() {
            if self.peer_closed {
                self.want_close = true;
                return progressed;
            }
            self.want_write = false;
            self.want_read = true;
            // Pipelined frames behind the last reply batch run now instead
            // of waiting for the next readable event.
            self.process(store, now_us);
        }
        progressed
    }

    /// Executes complete frames while the outbound buffer has room.
    fn process(&mut self, store: &mut Store, now_us: u64) {
        while self.outbound.len() < BUF_LIMIT {
            match try_parse_request(&mut self.inbound) {
                Ok(Some(args)) => {
                    let (status, reply) = commands::dispatch(store, &args, now_us);
                    encode_response(status, &reply, &mut self.outbound);
                    if self.outbound.len() > MAX_REPLY_LEN {
                        warn!("dropping {}: reply exceeds {} bytes", self.peer, MAX_REPLY_LEN);
                        self.want_close = true;
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("dropping {}: {err}", self.peer);
                    self.want_close = true;
                    return;
                }
            }
        }

        if !self.outbound.is_empty() {
            self.want_read = false;
            self.want_write = true;
        }
    }
}
