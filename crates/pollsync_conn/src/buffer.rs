//! Buffer of responses awaiting acknowledgment.

use pollsync_protocol::{Position, Response};
use std::collections::VecDeque;
use thiserror::Error;

/// A response was pushed at or before the newest buffered position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("response position {position} does not follow buffered position {newest}")]
pub struct OutOfOrderPosition {
    /// Position of the rejected response.
    pub position: Position,
    /// Newest position already buffered.
    pub newest: Position,
}

/// Responses sent to the client but not yet acknowledged, oldest first.
///
/// Positions are strictly increasing from head to tail. The head is what the
/// client gets back until it acknowledges it; acknowledging a position drops
/// the whole prefix up to and including it.
#[derive(Debug, Clone)]
pub struct ResponseBuffer<P> {
    responses: VecDeque<Response<P>>,
}

impl<P> ResponseBuffer<P> {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            responses: VecDeque::new(),
        }
    }

    /// Appends a response.
    ///
    /// The response's position must be later than every buffered one;
    /// otherwise the buffer is left unchanged.
    pub fn push(&mut self, response: Response<P>) -> Result<(), OutOfOrderPosition> {
        if let Some(newest) = self.newest_position() {
            if response.position <= newest {
                return Err(OutOfOrderPosition {
                    position: response.position,
                    newest,
                });
            }
        }
        self.responses.push_back(response);
        Ok(())
    }

    /// Returns the oldest unacknowledged response.
    pub fn head(&self) -> Option<&Response<P>> {
        self.responses.front()
    }

    /// Returns the position of the oldest unacknowledged response.
    pub fn oldest_position(&self) -> Option<Position> {
        self.responses.front().map(|r| r.position)
    }

    /// Returns the position of the newest buffered response.
    pub fn newest_position(&self) -> Option<Position> {
        self.responses.back().map(|r| r.position)
    }

    /// Returns how many responses [`acknowledge`](Self::acknowledge) would
    /// drop for `position`, without dropping them.
    pub fn covered_by(&self, position: Position) -> usize {
        self.responses
            .iter()
            .take_while(|r| r.position <= position)
            .count()
    }

    /// Returns the oldest response after `position`, i.e. the head once
    /// `position` is acknowledged.
    pub fn first_after(&self, position: Position) -> Option<&Response<P>> {
        self.responses.get(self.covered_by(position))
    }

    /// Drops every response at or before `position`.
    ///
    /// Returns how many were dropped.
    pub fn acknowledge(&mut self, position: Position) -> usize {
        let acked = self.covered_by(position);
        self.responses.drain(..acked);
        acked
    }

    /// Returns the number of buffered responses.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Returns true if nothing is awaiting acknowledgment.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Iterates over buffered responses, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Response<P>> {
        self.responses.iter()
    }

    /// Returns the buffered positions, oldest first.
    pub fn positions(&self) -> Vec<Position> {
        self.responses.iter().map(|r| r.position).collect()
    }
}

impl<P> Default for ResponseBuffer<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn res(pos: u64) -> Response<u64> {
        let mut r = Response::new(pos * 10);
        r.position = Position::new(pos);
        r
    }

    fn filled(positions: &[u64]) -> ResponseBuffer<u64> {
        let mut buf = ResponseBuffer::new();
        for &p in positions {
            buf.push(res(p)).unwrap();
        }
        buf
    }

    #[test]
    fn empty_buffer() {
        let buf: ResponseBuffer<u64> = ResponseBuffer::new();
        assert!(buf.is_empty());
        assert!(buf.head().is_none());
        assert_eq!(buf.oldest_position(), None);
        assert_eq!(buf.newest_position(), None);
    }

    #[test]
    fn push_keeps_order() {
        let mut buf = filled(&[1, 2]);
        buf.push(res(5)).unwrap();
        assert_eq!(
            buf.positions(),
            vec![Position::new(1), Position::new(2), Position::new(5)]
        );
        assert_eq!(buf.oldest_position(), Some(Position::new(1)));
        assert_eq!(buf.newest_position(), Some(Position::new(5)));
    }

    #[test]
    fn push_rejects_stale_position() {
        let mut buf = filled(&[1, 2]);
        let err = buf.push(res(2)).unwrap_err();
        assert_eq!(err.position, Position::new(2));
        assert_eq!(err.newest, Position::new(2));
        assert!(buf.push(res(1)).is_err());
        assert_eq!(buf.positions(), vec![Position::new(1), Position::new(2)]);
    }

    #[test]
    fn lookahead_does_not_drop() {
        let buf = filled(&[3, 4, 5]);
        assert_eq!(buf.covered_by(Position::new(4)), 2);
        assert_eq!(buf.first_after(Position::new(4)).map(|r| r.payload), Some(50));
        assert_eq!(buf.first_after(Position::INITIAL).map(|r| r.payload), Some(30));
        assert!(buf.first_after(Position::new(5)).is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn acknowledge_drops_prefix() {
        let mut buf = filled(&[3, 4, 5]);
        assert_eq!(buf.acknowledge(Position::new(2)), 0);
        assert_eq!(buf.acknowledge(Position::new(4)), 2);
        assert_eq!(buf.head().map(|r| r.payload), Some(50));
        assert_eq!(buf.acknowledge(Position::new(100)), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn acknowledge_initial_is_noop() {
        let mut buf = filled(&[1]);
        assert_eq!(buf.acknowledge(Position::INITIAL), 0);
        assert_eq!(buf.len(), 1);
    }

    proptest! {
        #[test]
        fn acknowledge_leaves_only_later_positions(
            count in 0u64..20,
            ack in 0u64..25,
        ) {
            let positions: Vec<u64> = (1..=count).collect();
            let mut buf = filled(&positions);
            let dropped = buf.acknowledge(Position::new(ack));

            prop_assert_eq!(dropped as u64, ack.min(count));
            prop_assert!(buf.iter().all(|r| r.position > Position::new(ack)));
            prop_assert_eq!(buf.len() as u64, count - ack.min(count));
        }
    }
}
