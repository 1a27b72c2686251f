//! A simulated client talking to a connection over a lossy link.
//!
//! The client behaves the way a real sync client does: it echoes the last
//! position it received, resends the same request when a response is lost
//! or an error comes back, and every so often changes its request body.

use pollsync_conn::{Conn, ConnHandler};
use pollsync_protocol::{Position, Request};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Duration;

/// Configuration for a [`LossyClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Probability that a response is lost on the way back.
    pub loss_rate: f64,
    /// Change the request body every this many requests (0 = never).
    pub change_every: usize,
    /// Timeout hint sent with each request.
    pub timeout: Duration,
    /// Seed for the loss pattern.
    pub seed: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.2,
            change_every: 0,
            timeout: Duration::from_millis(1),
            seed: 0,
        }
    }
}

/// Counters collected by a [`LossyClient`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientReport {
    /// Requests sent.
    pub requests: usize,
    /// Responses dropped by the simulated link.
    pub lost: usize,
    /// Requests answered with an error.
    pub errors: usize,
    /// Responses received with a position seen before.
    pub duplicates: usize,
    /// Responses received that skipped a position.
    pub gaps: usize,
    /// Positions received, in order.
    pub delivered: Vec<u64>,
}

impl ClientReport {
    /// Returns true if every position arrived once, in order, starting at 1.
    pub fn is_gap_free(&self) -> bool {
        self.duplicates == 0
            && self.gaps == 0
            && self
                .delivered
                .iter()
                .zip(1u64..)
                .all(|(&pos, expected)| pos == expected)
    }
}

/// A client that loses responses at random.
pub struct LossyClient {
    config: ClientConfig,
    rng: StdRng,
    position: Position,
    body: String,
    body_version: usize,
    report: ClientReport,
}

impl LossyClient {
    /// Creates a client at position 0.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            position: Position::INITIAL,
            body: "filter-0".into(),
            body_version: 0,
            report: ClientReport::default(),
        }
    }

    /// Returns the last position received.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Returns the counters collected so far.
    pub fn report(&self) -> &ClientReport {
        &self.report
    }

    /// Sends one request and processes whatever comes back.
    pub fn step<H>(&mut self, conn: &Conn<H>)
    where
        H: ConnHandler<Body = String>,
    {
        self.report.requests += 1;
        if self.config.change_every > 0 && self.report.requests % self.config.change_every == 0 {
            self.body_version += 1;
            self.body = format!("filter-{}", self.body_version);
        }

        let request = Request::new(self.position, self.body.clone())
            .with_txn_id(format!("txn-{}", self.report.requests))
            .with_timeout(self.config.timeout);

        match conn.on_incoming_request(request) {
            Ok(response) => {
                if self.rng.gen_bool(self.config.loss_rate.clamp(0.0, 1.0)) {
                    self.report.lost += 1;
                    return;
                }
                let expected = self.position.next();
                if response.position <= self.position {
                    self.report.duplicates += 1;
                } else {
                    if response.position != expected {
                        self.report.gaps += 1;
                    }
                    self.position = response.position;
                    self.report.delivered.push(response.position.as_u64());
                }
            }
            Err(_) => self.report.errors += 1,
        }
    }

    /// Sends `n` requests.
    pub fn run<H>(&mut self, conn: &Conn<H>, n: usize) -> &ClientReport
    where
        H: ConnHandler<Body = String>,
    {
        for _ in 0..n {
            self.step(conn);
        }
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_free_detection() {
        let report = ClientReport {
            delivered: vec![1, 2, 3],
            ..ClientReport::default()
        };
        assert!(report.is_gap_free());

        let report = ClientReport {
            delivered: vec![1, 3],
            gaps: 1,
            ..ClientReport::default()
        };
        assert!(!report.is_gap_free());

        let report = ClientReport {
            delivered: vec![2],
            ..ClientReport::default()
        };
        assert!(!report.is_gap_free());
    }
}
