//! Property-based test generators using proptest.
//!
//! Scripts of client steps are generated symbolically (e.g. "acknowledge
//! the newest position") and resolved against the live connection state, so
//! shrinking keeps them meaningful.

use crate::fixtures::Outcome;
use pollsync_conn::ConnSnapshot;
use pollsync_protocol::Position;
use proptest::prelude::*;

/// Which position a generated request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionChoice {
    /// Position 0.
    Initial,
    /// The newest position the connection produced.
    Newest,
    /// The oldest buffered position, if any.
    Oldest,
    /// The position of the last request the handler processed.
    LastRequest,
    /// An arbitrary, probably unknown position.
    Arbitrary(u64),
}

impl PositionChoice {
    /// Resolves the choice against a connection snapshot.
    pub fn resolve(self, snapshot: &ConnSnapshot) -> Position {
        match self {
            PositionChoice::Initial => Position::INITIAL,
            PositionChoice::Newest => snapshot.last_position,
            PositionChoice::Oldest => snapshot
                .buffered
                .first()
                .copied()
                .unwrap_or(snapshot.last_position),
            PositionChoice::LastRequest => {
                snapshot.last_client_position.unwrap_or(Position::INITIAL)
            }
            PositionChoice::Arbitrary(raw) => Position::new(raw),
        }
    }
}

/// One generated client request plus what the handler will do with it.
#[derive(Debug, Clone)]
pub struct ClientStep {
    /// Position to send.
    pub position: PositionChoice,
    /// Request body.
    pub body: String,
    /// Scripted handler outcome, used only if the handler is invoked.
    pub outcome: Outcome,
}

/// Strategy for generating position choices.
pub fn position_choice_strategy() -> impl Strategy<Value = PositionChoice> {
    prop_oneof![
        1 => Just(PositionChoice::Initial),
        4 => Just(PositionChoice::Newest),
        3 => Just(PositionChoice::Oldest),
        3 => Just(PositionChoice::LastRequest),
        1 => (0u64..40).prop_map(PositionChoice::Arbitrary),
    ]
}

/// Strategy for generating request bodies from a small alphabet, so that
/// repeats are common.
pub fn body_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["lists=a", "lists=b", "lists=a,b"]).prop_map(String::from)
}

/// Strategy for generating handler outcomes.
pub fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        8 => "[a-z]{1,6}".prop_map(Outcome::Respond),
        1 => prop::sample::select(vec![400u16, 401, 500, 503]).prop_map(Outcome::Fail),
        1 => Just(Outcome::FailUntagged("connection reset".into())),
        1 => Just(Outcome::Panic("scripted panic".into())),
    ]
}

/// Strategy for generating one client step.
pub fn client_step_strategy() -> impl Strategy<Value = ClientStep> {
    (position_choice_strategy(), body_strategy(), outcome_strategy()).prop_map(
        |(position, body, outcome)| ClientStep {
            position,
            body,
            outcome,
        },
    )
}

/// Strategy for generating a script of client steps.
pub fn client_script_strategy(
    min_steps: usize,
    max_steps: usize,
) -> impl Strategy<Value = Vec<ClientStep>> {
    prop::collection::vec(client_step_strategy(), min_steps..max_steps)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
