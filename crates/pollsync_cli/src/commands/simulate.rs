//! Simulate command implementation.
//!
//! Runs a [`LossyClient`] against a connection backed by a counting handler
//! and reports what the connection did to keep delivery gap-free.

use pollsync_conn::{
    Conn, ConnConfig, ConnEvent, ConnHandler, ConnObserver, RequestContext, TracingObserver,
};
use pollsync_protocol::{BoxError, ConnId, Request, Response};
use pollsync_testkit::{ClientConfig, LossyClient};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the simulate command.
#[derive(Debug, Error)]
pub enum SimulateError {
    /// The loss rate is outside [0, 1].
    #[error("loss rate must be between 0 and 1, got {0}")]
    InvalidLossRate(f64),

    /// The client saw a duplicate or missing position.
    #[error("delivery was not gap-free: {gaps} gaps, {duplicates} duplicates")]
    NotGapFree {
        /// Skipped positions.
        gaps: usize,
        /// Repeated positions.
        duplicates: usize,
    },

    /// Report serialization failed.
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Options for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Requests the client sends.
    pub requests: usize,
    /// Probability a response is lost.
    pub loss_rate: f64,
    /// Change the request body every this many requests (0 = never).
    pub change_every: usize,
    /// Seed for the loss pattern.
    pub seed: u64,
    /// Buffer depth, `None` for unbounded.
    pub max_buffered: Option<usize>,
}

/// Simulation result.
#[derive(Debug, Serialize)]
pub struct SimulateReport {
    /// Requests sent.
    pub requests: usize,
    /// Responses dropped on the way back.
    pub lost: usize,
    /// Requests answered with an error.
    pub errors: usize,
    /// Handler invocations.
    pub handler_calls: usize,
    /// Responses served from the buffer.
    pub replays: usize,
    /// Resends that carried a new body.
    pub body_changes: usize,
    /// Positions the client received.
    pub delivered: usize,
    /// Newest position the connection produced.
    pub last_position: u64,
    /// Responses still awaiting acknowledgment.
    pub buffered: usize,
    /// Whether every position arrived once and in order.
    pub gap_free: bool,
}

/// Answers each request with an incrementing counter.
#[derive(Debug, Default)]
struct CounterHandler {
    calls: AtomicUsize,
}

impl ConnHandler for CounterHandler {
    type Body = String;
    type Payload = usize;

    fn on_incoming_request(
        &self,
        _ctx: &RequestContext,
        _id: &ConnId,
        _request: &Request<String>,
        _is_initial: bool,
    ) -> Result<Response<usize>, BoxError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Response::new(n))
    }

    fn user_id(&self) -> String {
        "@simulator:localhost".into()
    }

    fn alive(&self) -> bool {
        true
    }

    fn destroy(&self) {}
}

/// Counts replays and body changes, forwarding everything to tracing.
#[derive(Debug, Default)]
struct CountingObserver {
    replays: AtomicUsize,
    body_changes: AtomicUsize,
}

impl ConnObserver for CountingObserver {
    fn on_event(&self, id: &ConnId, event: &ConnEvent) {
        match event {
            ConnEvent::Replayed { .. } => {
                self.replays.fetch_add(1, Ordering::Relaxed);
            }
            ConnEvent::BodyChanged { .. } => {
                self.body_changes.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        TracingObserver.on_event(id, event);
    }
}

/// Runs a simulation and returns its report.
pub fn simulate(options: &SimulateOptions) -> Result<SimulateReport, SimulateError> {
    if !(0.0..=1.0).contains(&options.loss_rate) {
        return Err(SimulateError::InvalidLossRate(options.loss_rate));
    }

    let config = match options.max_buffered {
        Some(limit) => ConnConfig::new().with_max_buffered(limit),
        None => ConnConfig::new().unbounded(),
    };
    let observer = Arc::new(CountingObserver::default());
    let conn = Conn::with_config(
        ConnId::new("SIMULATED"),
        CounterHandler::default(),
        config,
    )
    .with_observer(observer.clone());

    let mut client = LossyClient::new(ClientConfig {
        loss_rate: options.loss_rate,
        change_every: options.change_every,
        seed: options.seed,
        ..ClientConfig::default()
    });
    let client_report = client.run(&conn, options.requests);

    let snapshot = conn.snapshot();
    let report = SimulateReport {
        requests: client_report.requests,
        lost: client_report.lost,
        errors: client_report.errors,
        handler_calls: conn.handler().calls.load(Ordering::SeqCst),
        replays: observer.replays.load(Ordering::Relaxed),
        body_changes: observer.body_changes.load(Ordering::Relaxed),
        delivered: client_report.delivered.len(),
        last_position: snapshot.last_position.as_u64(),
        buffered: snapshot.buffered.len(),
        gap_free: client_report.is_gap_free(),
    };

    if !report.gap_free {
        return Err(SimulateError::NotGapFree {
            gaps: client_report.gaps,
            duplicates: client_report.duplicates,
        });
    }
    Ok(report)
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), SimulateError> {
    tracing::info!(
        requests = options.requests,
        loss_rate = options.loss_rate,
        seed = options.seed,
        "starting simulation"
    );
    let report = simulate(options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(&report),
    }
    Ok(())
}

fn print_text_output(report: &SimulateReport) {
    println!("Simulation Report");
    println!("=================");
    println!();
    println!("Requests sent:      {}", report.requests);
    println!("Responses lost:     {}", report.lost);
    println!("Errors:             {}", report.errors);
    println!();
    println!("Handler calls:      {}", report.handler_calls);
    println!("Replays:            {}", report.replays);
    println!("Body changes:       {}", report.body_changes);
    println!();
    println!("Positions delivered: {}", report.delivered);
    println!("Last position:       {}", report.last_position);
    println!("Still buffered:      {}", report.buffered);
    println!();
    if report.gap_free {
        println!("✓ Delivery was gap-free");
    } else {
        println!("✗ Delivery had gaps or duplicates");
    }
}
