//! Structured diagnostics for connections.
//!
//! A connection reports what it decided for each request through a
//! [`ConnObserver`] supplied at construction. [`TracingObserver`] forwards
//! everything to `tracing`.

use pollsync_protocol::{ConnId, Position};
use std::time::Duration;

/// Something a connection decided while handling a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnEvent {
    /// The request referenced a position that was never issued.
    UnknownPosition {
        /// Position supplied by the client.
        position: Position,
    },
    /// A buffered response was returned without invoking the handler.
    Replayed {
        /// Position supplied by the client.
        position: Position,
        /// Position of the replayed response.
        replayed: Position,
    },
    /// The client resent a position with a different body.
    BodyChanged {
        /// Position supplied by the client.
        position: Position,
    },
    /// The timeout hint was lowered because a response is already waiting.
    TimeoutShrunk {
        /// Hint supplied by the client.
        from: Duration,
        /// Hint passed to the handler.
        to: Duration,
    },
    /// The buffer is at capacity and the request needed the handler.
    BufferFull {
        /// Configured buffer depth.
        limit: usize,
    },
    /// A newer request cancelled the one in flight.
    Preempted,
    /// The handler returned an error.
    HandlerFailed {
        /// Status code of the error.
        status: u16,
        /// Error message.
        message: String,
    },
    /// The handler panicked.
    HandlerPanicked {
        /// Panic message.
        message: String,
    },
    /// A request finished, successfully or not.
    Finished {
        /// Responses dropped by this request's acknowledgment.
        acked: usize,
        /// The position matched the previous request's.
        is_retransmit: bool,
        /// The position matched the oldest buffered response.
        acks_oldest: bool,
        /// The position matched the newest response produced.
        acks_newest: bool,
        /// This was the first request of the session.
        is_initial: bool,
        /// The body matched the previous request's.
        is_same: bool,
        /// Position supplied by the client.
        position: Position,
        /// User owning the connection.
        user_id: String,
        /// Position of the response returned, if any is buffered.
        new_position: Option<Position>,
    },
}

/// Receives [`ConnEvent`]s from connections.
pub trait ConnObserver: Send + Sync {
    /// Records one event for the given connection.
    fn on_event(&self, id: &ConnId, event: &ConnEvent);
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConnObserver for NoopObserver {
    fn on_event(&self, _id: &ConnId, _event: &ConnEvent) {}
}

/// Emits events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ConnObserver for TracingObserver {
    fn on_event(&self, id: &ConnId, event: &ConnEvent) {
        let conn = id.device_id();
        match event {
            ConnEvent::UnknownPosition { position } => {
                tracing::trace!(conn, pos = position.as_u64(), "unknown pos");
            }
            ConnEvent::Replayed { position, replayed } => {
                tracing::trace!(
                    conn,
                    pos = position.as_u64(),
                    replayed = replayed.as_u64(),
                    "returning cached response for pos"
                );
            }
            ConnEvent::BodyChanged { position } => {
                tracing::info!(
                    conn,
                    pos = position.as_u64(),
                    "client has resent this pos with different request data"
                );
            }
            ConnEvent::TimeoutShrunk { from, to } => {
                tracing::trace!(
                    conn,
                    from_ms = millis(*from),
                    to_ms = millis(*to),
                    "buffered response pending, shrinking timeout"
                );
            }
            ConnEvent::BufferFull { limit } => {
                tracing::warn!(conn, limit, "response buffer full, rejecting request");
            }
            ConnEvent::Preempted => {
                tracing::debug!(conn, "cancelled outstanding request");
            }
            ConnEvent::HandlerFailed { status, message } => {
                tracing::warn!(conn, status, error = %message, "handler failed");
            }
            ConnEvent::HandlerPanicked { message } => {
                tracing::error!(conn, panic = %message, "handler panicked");
            }
            ConnEvent::Finished {
                acked,
                is_retransmit,
                acks_oldest,
                acks_newest,
                is_initial,
                is_same,
                position,
                user_id,
                new_position,
            } => {
                tracing::trace!(
                    conn,
                    num_res_acks = acked,
                    is_retransmit,
                    acks_oldest,
                    acks_newest,
                    is_first = is_initial,
                    is_same,
                    pos = position.as_u64(),
                    user = %user_id,
                    new_pos = new_position.map(Position::as_u64),
                    "on_incoming_request finished"
                );
            }
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
