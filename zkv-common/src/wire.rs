//! # Wire Framing and Tagged Values
//!
//! Purpose: Encode and decode the length-prefixed binary protocol spoken
//! between the zkv server and its clients.
//!
//! ## Design Principles
//! 1. **Length-Prefixed Frames**: Every message starts with a `u32` byte
//!    count so partial reads are cheap to detect and resume.
//! 2. **Tagged Values**: Replies are a small recursive grammar (nil, error,
//!    string, int, double, array) with a one-byte tag per value.
//! 3. **Binary-Safe**: Keys, values, and member names are raw bytes.
//! 4. **Fail Fast**: Oversize or malformed frames surface as errors so the
//!    connection owner can drop the peer without guessing.
//!
//! All integers on the wire are little-endian.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Maximum request payload size in bytes (the frame length field excluded).
pub const MAX_MSG_LEN: usize = 4096;

/// Maximum response payload the client will accept before assuming a broken
/// peer. Server replies are already bounded by its outbound buffer cap.
pub const MAX_REPLY_LEN: usize = 1 << 20;

/// Default TCP port for the server.
pub const DEFAULT_PORT: u16 = 1234;

/// Value tags used in response payloads.
mod tag {
    pub const NIL: u8 = 0;
    pub const ERR: u8 = 1;
    pub const STR: u8 = 2;
    pub const INT: u8 = 3;
    pub const DBL: u8 = 4;
    pub const ARR: u8 = 5;
}

/// Status code carried in every response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    /// Command executed; the payload carries the result.
    Ok = 0,
    /// Reserved "not found" status; absent keys normally reply `Ok` + nil.
    NotFound = 1,
    /// Generic server-side failure.
    Err = 2,
    /// Command name was not recognized.
    UnknownCommand = 3,
    /// Wrong arity or an unparseable argument.
    BadArgument = 4,
    /// The key holds a value of the wrong kind for this command.
    BadType = 5,
}

impl Status {
    /// Decodes a wire status code.
    pub fn from_u32(code: u32) -> Option<Status> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::NotFound),
            2 => Some(Status::Err),
            3 => Some(Status::UnknownCommand),
            4 => Some(Status::BadArgument),
            5 => Some(Status::BadType),
            _ => None,
        }
    }
}

/// One tagged value in a response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Error { code: u32, message: Vec<u8> },
    Str(Vec<u8>),
    Int(i64),
    Dbl(f64),
    Arr(Vec<Reply>),
}

impl Reply {
    /// Encoded size of this value in bytes, tag included.
    pub fn wire_len(&self) -> usize {
        match self {
            Reply::Nil => 1,
            Reply::Error { message, .. } => 1 + 4 + 4 + message.len(),
            Reply::Str(data) => 1 + 4 + data.len(),
            Reply::Int(_) => 1 + 8,
            Reply::Dbl(_) => 1 + 8,
            Reply::Arr(items) => 1 + 4 + items.iter().map(Reply::wire_len).sum::<usize>(),
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        match self {
            Reply::Nil => out.put_u8(tag::NIL),
            Reply::Error { code, message } => {
                out.put_u8(tag::ERR);
                out.put_u32_le(*code);
                out.put_u32_le(message.len() as u32);
                out.put_slice(message);
            }
            Reply::Str(data) => {
                out.put_u8(tag::STR);
                out.put_u32_le(data.len() as u32);
                out.put_slice(data);
            }
            Reply::Int(value) => {
                out.put_u8(tag::INT);
                out.put_i64_le(*value);
            }
            Reply::Dbl(value) => {
                out.put_u8(tag::DBL);
                out.put_f64_le(*value);
            }
            Reply::Arr(items) => {
                out.put_u8(tag::ARR);
                out.put_u32_le(items.len() as u32);
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    fn decode(rd: &mut &[u8]) -> Result<Reply, FrameError> {
        if rd.remaining() < 1 {
            return Err(FrameError::Malformed("missing value tag"));
        }
        match rd.get_u8() {
            tag::NIL => Ok(Reply::Nil),
            tag::ERR => {
                let code = read_u32(rd)?;
                let message = read_bytes(rd)?;
                Ok(Reply::Error { code, message })
            }
            tag::STR => Ok(Reply::Str(read_bytes(rd)?)),
            tag::INT => {
                if rd.remaining() < 8 {
                    return Err(FrameError::Malformed("truncated integer"));
                }
                Ok(Reply::Int(rd.get_i64_le()))
            }
            tag::DBL => {
                if rd.remaining() < 8 {
                    return Err(FrameError::Malformed("truncated double"));
                }
                Ok(Reply::Dbl(rd.get_f64_le()))
            }
            tag::ARR => {
                let count = read_u32(rd)? as usize;
                // Each element takes at least a tag byte.
                if count > rd.remaining() {
                    return Err(FrameError::Malformed("array length overruns frame"));
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(Reply::decode(rd)?);
                }
                Ok(Reply::Arr(items))
            }
            _ => Err(FrameError::Malformed("unknown value tag")),
        }
    }
}

/// Framing errors. Any of these means the peer violated the protocol and the
/// connection should be dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the message limit")]
    Oversize(usize),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Encodes a request frame (`nstr` length-prefixed strings) into `out`.
///
/// # Errors
/// Returns `FrameError::Oversize` when the encoded payload would exceed
/// `MAX_MSG_LEN`; nothing is written in that case.
pub fn encode_request(args: &[&[u8]], out: &mut BytesMut) -> Result<(), FrameError> {
    let body_len = 4 + args.iter().map(|arg| 4 + arg.len()).sum::<usize>();
    if body_len > MAX_MSG_LEN {
        return Err(FrameError::Oversize(body_len));
    }

    out.reserve(4 + body_len);
    out.put_u32_le(body_len as u32);
    out.put_u32_le(args.len() as u32);
    for arg in args {
        out.put_u32_le(arg.len() as u32);
        out.put_slice(arg);
    }
    Ok(())
}

/// Extracts one complete request frame from the head of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a whole frame; the
/// caller should read more bytes and retry. On success the frame is consumed
/// from `buf`.
pub fn try_parse_request(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, FrameError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let frame_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if frame_len > MAX_MSG_LEN {
        return Err(FrameError::Oversize(frame_len));
    }
    if buf.len() < 4 + frame_len {
        return Ok(None);
    }

    let frame = buf.split_to(4 + frame_len);
    let mut rd: &[u8] = &frame[4..];

    let nstr = read_u32(&mut rd)? as usize;
    if nstr > rd.remaining() / 4 {
        return Err(FrameError::Malformed("string count overruns frame"));
    }

    let mut args = Vec::with_capacity(nstr);
    for _ in 0..nstr {
        args.push(read_bytes(&mut rd)?);
    }
    if rd.has_remaining() {
        return Err(FrameError::Malformed("trailing bytes after last string"));
    }
    Ok(Some(args))
}

/// Encodes a response frame (status header plus one tagged value).
pub fn encode_response(status: Status, reply: &Reply, out: &mut BytesMut) {
    let body_len = 4 + reply.wire_len();
    out.reserve(4 + body_len);
    out.put_u32_le(body_len as u32);
    out.put_u32_le(status as u32);
    reply.encode(out);
}

/// Extracts one complete response frame from the head of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a whole frame.
pub fn try_parse_response(buf: &mut BytesMut) -> Result<Option<(Status, Reply)>, FrameError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let frame_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if frame_len > MAX_REPLY_LEN {
        return Err(FrameError::Oversize(frame_len));
    }
    if buf.len() < 4 + frame_len {
        return Ok(None);
    }

    let frame = buf.split_to(4 + frame_len);
    let mut rd: &[u8] = &frame[4..];

    let status =
        Status::from_u32(read_u32(&mut rd)?).ok_or(FrameError::Malformed("unknown status"))?;
    let reply = Reply::decode(&mut rd)?;
    if rd.has_remaining() {
        return Err(FrameError::Malformed("trailing bytes after value"));
    }
    Ok(Some((status, reply)))
}

fn read_u32(rd: &mut &[u8]) -> Result<u32, FrameError> {
    if rd.remaining() < 4 {
        return Err(FrameError::Malformed("truncated length field"));
    }
    Ok(rd.get_u32_le())
}

fn read_bytes(rd: &mut &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = read_u32(rd)? as usize;
    if rd.remaining() < len {
        return Err(FrameError::Malformed("string overruns frame"));
    }
    let mut data = vec![0u8; len];
    rd.copy_to_slice(&mut data);
    Ok(data)
}
