//! Protocol messages exchanged between a connection and its handler.

use crate::position::Position;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifies one session, typically by device.
///
/// Only used for lookup and logging; protocol decisions never look at it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnId {
    device_id: String,
}

impl ConnId {
    /// Creates a connection identity for the given device.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    /// Returns the device identifier.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.device_id)
    }
}

/// Default long-poll timeout suggested to handlers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A sync request from a client.
///
/// The body is opaque to the connection; it is only compared for equality
/// to tell retries apart from new requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request<B> {
    /// Last position the client received, or [`Position::INITIAL`].
    #[serde(rename = "pos")]
    pub position: Position,
    /// Request body.
    pub body: B,
    /// Client-chosen transaction id, echoed on the response.
    #[serde(default)]
    pub txn_id: String,
    /// How long the handler may wait for new data.
    #[serde(rename = "timeout_ms", with = "duration_millis", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl<B> Request<B> {
    /// Creates a request at the given position with the default timeout.
    pub fn new(position: Position, body: B) -> Self {
        Self {
            position,
            body,
            txn_id: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the transaction id.
    pub fn with_txn_id(mut self, txn_id: impl Into<String>) -> Self {
        self.txn_id = txn_id.into();
        self
    }

    /// Sets the timeout hint.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns true if this is the first request of a session.
    pub fn is_initial(&self) -> bool {
        self.position.is_initial()
    }

    /// Lowers the timeout hint to `limit` if it is currently longer.
    ///
    /// Returns true if the hint changed.
    pub fn shrink_timeout(&mut self, limit: Duration) -> bool {
        if self.timeout > limit {
            self.timeout = limit;
            true
        } else {
            false
        }
    }
}

impl<B: PartialEq> Request<B> {
    /// Returns true if both requests carry the same body.
    ///
    /// Position and timeout are not compared.
    pub fn same(&self, other: &Request<B>) -> bool {
        self.body == other.body
    }
}

/// A response produced for a client.
///
/// Handlers build responses with [`Response::new`]; the connection assigns
/// the position and transaction id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<P> {
    /// Position of this response in the connection's stream.
    #[serde(rename = "pos")]
    pub position: Position,
    /// Transaction id of the request that produced this response.
    #[serde(default)]
    pub txn_id: String,
    /// Response payload.
    pub payload: P,
}

impl<P> Response<P> {
    /// Creates an unpositioned response carrying `payload`.
    pub fn new(payload: P) -> Self {
        Self {
            position: Position::INITIAL,
            txn_id: String::new(),
            payload,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
