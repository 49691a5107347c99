//! # zkv-common
//!
//! Wire protocol shared by the zkv server and client: frame codec,
//! tagged reply values, and status codes.

pub mod wire;

pub use wire::{
    encode_request, encode_response, try_parse_request, try_parse_response, FrameError, Reply,
    Status, DEFAULT_PORT, MAX_MSG_LEN, MAX_REPLY_LEN,
};
