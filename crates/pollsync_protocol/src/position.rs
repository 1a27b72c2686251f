//! Stream positions.
//!
//! A [`Position`] identifies one server-produced response within a single
//! connection. The client echoes the last position it received on its next
//! request, which makes the position double as an acknowledgment cursor.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A position in a connection's response stream.
///
/// Position `0` is reserved for "no prior position": it marks the first
/// request of a session. The first response a connection produces is at
/// position `1`.
///
/// Transports see positions as decimal strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(u64);

impl Position {
    /// The position sent by a client that has not received anything yet.
    pub const INITIAL: Position = Position(0);

    /// Creates a position from its raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this is the initial (zero) position.
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }

    /// Returns the position that follows this one.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the position that follows this one, or `None` at `u64::MAX`.
    pub const fn checked_next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Position> for u64 {
    fn from(pos: Position) -> Self {
        pos.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a position string is not a decimal integer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid position {input:?}: expected a decimal integer")]
pub struct PositionParseError {
    input: String,
}

impl FromStr for Position {
    type Err = PositionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // u64::from_str accepts a leading '+', which is not part of the encoding
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PositionParseError { input: s.into() });
        }
        s.parse::<u64>()
            .map(Position)
            .map_err(|_| PositionParseError { input: s.into() })
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PositionVisitor;

        impl<'de> Visitor<'de> for PositionVisitor {
            type Value = Position;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal position string or an unsigned integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Position, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Position, E> {
                Ok(Position(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Position, E> {
                u64::try_from(v)
                    .map(Position)
                    .map_err(|_| E::custom(format!("negative position {v}")))
            }
        }

        deserializer.deserialize_any(PositionVisitor)
    }
}
