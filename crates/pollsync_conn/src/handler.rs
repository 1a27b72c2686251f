//! The business-logic boundary of a connection.

use crate::cancel::CancelToken;
use pollsync_protocol::{BoxError, ConnId, Request, Response};
use std::time::Duration;

/// Context handed to a handler for one invocation.
///
/// Carries the cancellation signal of the request being processed. A newer
/// request on the same connection cancels it before waiting for its turn.
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: CancelToken,
}

impl RequestContext {
    /// Creates a context around the given token.
    pub fn new(token: CancelToken) -> Self {
        Self { token }
    }

    /// Returns true if the request has been superseded.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Blocks until the request is cancelled or `timeout` elapses.
    ///
    /// Returns true if the request was cancelled. Long-poll handlers use this
    /// to wait for new data without outliving a superseded request.
    pub fn wait_for_cancel(&self, timeout: Duration) -> bool {
        self.token.wait_timeout(timeout)
    }

    /// Returns the underlying token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

/// Computes sync responses for one connection.
///
/// Implementations may block inside
/// [`on_incoming_request`](ConnHandler::on_incoming_request) for up to the
/// request's timeout hint, and should return early once the context is
/// cancelled. The connection never retries a failed call itself.
pub trait ConnHandler: Send + Sync {
    /// Request body. Compared for equality to detect retries.
    type Body: PartialEq + Clone + Send;

    /// Response payload. Cloned when a buffered response is replayed.
    type Payload: Clone + Send;

    /// Produces the response to `request`.
    ///
    /// Errors that downcast to [`HandlerError`](pollsync_protocol::HandlerError)
    /// keep their status code; anything else is reported as a 500. The
    /// returned response's position and transaction id are overwritten.
    fn on_incoming_request(
        &self,
        ctx: &RequestContext,
        id: &ConnId,
        request: &Request<Self::Body>,
        is_initial: bool,
    ) -> Result<Response<Self::Payload>, BoxError>;

    /// Returns the user owning this connection.
    fn user_id(&self) -> String;

    /// Returns false once the connection should be discarded.
    fn alive(&self) -> bool;

    /// Called when the owning registry discards the connection.
    fn destroy(&self);
}
