//! # pollsync Testkit
//!
//! Test utilities for pollsync.
//!
//! This crate provides:
//! - `ScriptedHandler`, a handler that follows a script and records calls
//! - `RecordingObserver` and `TestConn` fixtures
//! - Property-based generators for client request scripts
//! - `LossyClient`, a simulated client on an unreliable link
//! - Stress utilities racing requests against one connection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pollsync_testkit::{request, TestConn};
//!
//! #[test]
//! fn test_with_connection() {
//!     let conn = TestConn::new();
//!     let res = conn.on_incoming_request(request(0, "lists=a")).unwrap();
//!     assert_eq!(res.position.as_u64(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod fixtures;
pub mod generators;
pub mod stress;

pub use client::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
