//! Protocol module - Defines the wire protocol for BlueRPC communication
//!
//! A request is two frames written back to back by the client:
//! - 4 bytes endpoint name length (little-endian) + UTF-8 endpoint name
//! - payload bytes terminated by a single NUL byte
//!
//! The server answers only requests naming a registered endpoint:
//! - 4 bytes response length (little-endian) + response bytes
//!
//! Payloads cannot contain NUL. This is part of the wire format and
//! peers depend on it.

mod codec;
mod reply;

pub use codec::*;
pub use reply::*;

/// Size of every length prefix on the wire
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Byte that ends a request payload frame
pub const PAYLOAD_TERMINATOR: u8 = 0x00;

/// Default cap on the declared length of an endpoint name frame
pub const DEFAULT_MAX_ENDPOINT_LEN: usize = 4096;
