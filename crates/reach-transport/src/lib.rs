// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-transport
//!
//! Framed, signed mesh transport: a length-prefixed binary stream codec
//! plus an HTTP fallback for environments where a raw stream transport
//! isn't usable.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod http;
mod message;

pub use connection::{ConnectionId, ConnectionTable, PeerConnection};
pub use http::{http_router, HttpTransportState};
pub use message::{read_framed, sign_message, verify_message, write_framed, Message, MessageType};

/// Hard cap on a single framed message's body size.
pub const MAX_MESSAGE_BYTES: u32 = 10 * 1024 * 1024;

/// Multiple of `connection_timeout` beyond which an idle connection is
/// swept.
pub const IDLE_SWEEP_MULTIPLIER: u32 = 2;
