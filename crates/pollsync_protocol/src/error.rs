//! Status-tagged errors exchanged with transports.

use std::error::Error as StdError;
use thiserror::Error;

/// A boxed error as returned by request handlers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Status code for a request the client must not repeat as-is.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Status code for a client that sends more than the server will buffer.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Status code for any failure the client cannot fix.
pub const STATUS_INTERNAL: u16 = 500;

/// An error tagged with the status code the transport should answer with.
///
/// Handlers may return a `HandlerError` (boxed) to pick the status code
/// themselves. Any other error is wrapped with [`STATUS_INTERNAL`] by
/// [`HandlerError::from_boxed`].
#[derive(Debug, Error)]
#[error("{source} (status {status})")]
pub struct HandlerError {
    status: u16,
    #[source]
    source: BoxError,
}

impl HandlerError {
    /// Creates an error with an explicit status code.
    pub fn new(status: u16, source: impl Into<BoxError>) -> Self {
        Self {
            status,
            source: source.into(),
        }
    }

    /// Creates a 400 error with the given message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(STATUS_BAD_REQUEST, message.into())
    }

    /// Creates a 500 error wrapping the given cause.
    pub fn internal(source: impl Into<BoxError>) -> Self {
        Self::new(STATUS_INTERNAL, source)
    }

    /// Recovers a tagged error from a boxed one, or tags it as internal.
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<HandlerError>() {
            Ok(tagged) => *tagged,
            Err(other) => Self::internal(other),
        }
    }

    /// Returns the status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the underlying cause.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}
