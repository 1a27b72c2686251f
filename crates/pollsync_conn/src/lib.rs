//! # pollsync Conn
//!
//! Per-device session layer for long-poll sync endpoints.
//!
//! This crate provides:
//! - `Conn`, which turns retried, racing and lost long-poll requests into an
//!   ordered stream processed exactly once
//! - `ResponseBuffer` for responses awaiting acknowledgment
//! - `ConnHandler`, the boundary to the business logic computing payloads
//! - `CancelToken` for preempting superseded requests
//! - `ConnObserver` for structured diagnostics
//!
//! # Protocol
//!
//! Every response carries a position. The client sends the last position it
//! received with its next request, which acknowledges everything up to it:
//! 1. Position `0` starts a session
//! 2. A known position drops acknowledged responses from the buffer
//! 3. Resending the previous position with the same body replays the
//!    buffered response without calling the handler
//! 4. Anything else is processed by the handler and buffered at the next
//!    position; the oldest unacknowledged response is returned
//!
//! Positions the connection never issued are rejected with a 400.
//!
//! # Concurrency
//!
//! Requests on one connection are processed one at a time, handler call
//! included. A new request cancels the one in flight before waiting for it:
//!
//! ```rust,ignore
//! use pollsync_conn::Conn;
//! use pollsync_protocol::{ConnId, Position, Request};
//!
//! let conn = Conn::new(ConnId::new("DEVICE_A"), handler);
//! let response = conn.on_incoming_request(Request::new(Position::INITIAL, body))?;
//! assert_eq!(response.position, Position::new(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod buffer;
mod cancel;
mod config;
mod conn;
mod error;
mod handler;
mod observer;

pub use buffer::{OutOfOrderPosition, ResponseBuffer};
pub use cancel::CancelToken;
pub use config::{ConnConfig, DEFAULT_MAX_BUFFERED};
pub use conn::{Conn, ConnSnapshot};
pub use error::{ConnError, ConnResult};
pub use handler::{ConnHandler, RequestContext};
pub use observer::{ConnEvent, ConnObserver, NoopObserver, TracingObserver};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
