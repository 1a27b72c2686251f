//! Error types for connections.

use crate::buffer::OutOfOrderPosition;
use pollsync_protocol::{
    HandlerError, Position, STATUS_BAD_REQUEST, STATUS_INTERNAL, STATUS_TOO_MANY_REQUESTS,
};
use thiserror::Error;

/// Result type for connection operations.
pub type ConnResult<T> = Result<T, ConnError>;

/// Errors returned from [`Conn::on_incoming_request`](crate::Conn::on_incoming_request).
///
/// Every variant is terminal for the current call only. None of them leave
/// the connection in a state the next request cannot recover from.
#[derive(Error, Debug)]
pub enum ConnError {
    /// The client sent a position this connection never issued.
    #[error("unknown position: {position}")]
    UnknownPosition {
        /// Position supplied by the client.
        position: Position,
    },

    /// The client keeps changing its request without acknowledging.
    #[error("response buffer full: {limit} responses awaiting acknowledgment")]
    BufferFull {
        /// Configured buffer depth.
        limit: usize,
    },

    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// The handler panicked.
    #[error("handler panicked: {message}")]
    HandlerPanicked {
        /// Panic payload, if it was a string.
        message: String,
    },

    /// No position is left after the newest one.
    #[error("position space exhausted after {last}")]
    PositionOverflow {
        /// Newest position produced.
        last: Position,
    },

    /// A response would have been buffered out of order.
    #[error(transparent)]
    OutOfOrder(#[from] OutOfOrderPosition),
}

impl ConnError {
    /// Returns the status code a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ConnError::UnknownPosition { .. } => STATUS_BAD_REQUEST,
            ConnError::BufferFull { .. } => STATUS_TOO_MANY_REQUESTS,
            ConnError::Handler(err) => err.status(),
            ConnError::HandlerPanicked { .. }
            | ConnError::PositionOverflow { .. }
            | ConnError::OutOfOrder(_) => STATUS_INTERNAL,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status_code())
    }

    /// Converts into the status-tagged form handed to transports.
    pub fn into_handler_error(self) -> HandlerError {
        match self {
            ConnError::Handler(err) => err,
            other => HandlerError::new(other.status_code(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let unknown = ConnError::UnknownPosition {
            position: Position::new(999),
        };
        assert!(unknown.is_client_error());
        assert_eq!(unknown.status_code(), 400);

        let full = ConnError::BufferFull { limit: 4 };
        assert!(full.is_client_error());
        assert_eq!(full.status_code(), 429);

        let panicked = ConnError::HandlerPanicked {
            message: "boom".into(),
        };
        assert!(panicked.is_server_error());

        let overflow = ConnError::PositionOverflow {
            last: Position::new(u64::MAX),
        };
        assert_eq!(overflow.status_code(), 500);

        let out_of_order = ConnError::from(OutOfOrderPosition {
            position: Position::new(2),
            newest: Position::new(3),
        });
        assert!(out_of_order.is_server_error());
        assert!(out_of_order.to_string().contains("does not follow"));
    }

    #[test]
    fn handler_status_passes_through() {
        let err = ConnError::Handler(HandlerError::new(401, "expired token"));
        assert_eq!(err.status_code(), 401);
        assert!(err.is_client_error());
        assert_eq!(err.into_handler_error().status(), 401);
    }

    #[test]
    fn error_display() {
        let err = ConnError::UnknownPosition {
            position: Position::new(999),
        };
        assert_eq!(err.to_string(), "unknown position: 999");

        let tagged = err.into_handler_error();
        assert_eq!(tagged.status(), 400);
        assert!(tagged.to_string().contains("999"));
    }
}
