//! Benchmark utilities.

use pollsync_conn::{Conn, ConnConfig, ConnHandler, NoopObserver, RequestContext};
use pollsync_protocol::{BoxError, ConnId, Request, Response};
use rand::Rng;
use std::sync::Arc;

/// Handler that answers immediately with a fixed-size payload.
#[derive(Debug, Clone)]
pub struct BenchHandler {
    payload: Vec<u8>,
}

impl BenchHandler {
    /// Creates a handler returning `payload_size` bytes per response.
    pub fn new(payload_size: usize) -> Self {
        Self {
            payload: random_data(payload_size),
        }
    }
}

impl ConnHandler for BenchHandler {
    type Body = String;
    type Payload = Vec<u8>;

    fn on_incoming_request(
        &self,
        _ctx: &RequestContext,
        _id: &ConnId,
        _request: &Request<String>,
        _is_initial: bool,
    ) -> Result<Response<Vec<u8>>, BoxError> {
        Ok(Response::new(self.payload.clone()))
    }

    fn user_id(&self) -> String {
        "@bench:localhost".into()
    }

    fn alive(&self) -> bool {
        true
    }

    fn destroy(&self) {}
}

/// Creates a connection that drops its events.
pub fn bench_conn(payload_size: usize, config: ConnConfig) -> Conn<BenchHandler> {
    Conn::with_config(ConnId::new("BENCH"), BenchHandler::new(payload_size), config)
        .with_observer(Arc::new(NoopObserver))
}

/// Generate random payload data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}
