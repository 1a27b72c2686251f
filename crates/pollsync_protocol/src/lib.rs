//! # pollsync Protocol
//!
//! Wire-facing types for the pollsync long-poll protocol.
//!
//! This crate provides:
//! - `Position` stream cursors (decimal strings on the wire)
//! - `Request` / `Response` envelopes with opaque bodies and payloads
//! - `ConnId` session identities
//! - `HandlerError` status-tagged errors
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod messages;
mod position;

pub use error::{
    BoxError, HandlerError, STATUS_BAD_REQUEST, STATUS_INTERNAL, STATUS_TOO_MANY_REQUESTS,
};
pub use messages::{ConnId, Request, Response, DEFAULT_TIMEOUT};
pub use position::{Position, PositionParseError};
