//! Stress tests for connections.
//!
//! These helpers hammer a single connection from several threads that share
//! one client position, the way a client racing its own retries would.

use crate::fixtures::ScriptedHandler;
use parking_lot::Mutex;
use pollsync_conn::Conn;
use pollsync_protocol::{Position, Request};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Result of a stress test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressTestResult {
    /// Requests answered with a response.
    pub successful_ops: usize,
    /// Requests answered with an error.
    pub failed_ops: usize,
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Requests sent per thread.
    pub requests_per_thread: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Timeout hint sent with each request.
    pub timeout: Duration,
    /// Number of distinct request bodies the threads pick from.
    pub bodies: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            requests_per_thread: 200,
            threads: 4,
            timeout: Duration::from_millis(2),
            bodies: 2,
        }
    }
}

/// Races requests from several threads against one connection.
///
/// All threads share the newest position any of them received. Responses
/// must never go backwards relative to the position that was sent.
pub fn stress_racing_requests(
    conn: Arc<Conn<ScriptedHandler>>,
    config: &StressConfig,
) -> StressTestResult {
    let shared_position = Arc::new(Mutex::new(Position::INITIAL));
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let bodies = config.bodies.max(1);

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let conn = Arc::clone(&conn);
            let shared_position = Arc::clone(&shared_position);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let requests = config.requests_per_thread;
            let timeout = config.timeout;

            thread::spawn(move || {
                for i in 0..requests {
                    let position = *shared_position.lock();
                    let body = format!("filter-{}", (t + i) % bodies);
                    let request = Request::new(position, body).with_timeout(timeout);

                    match conn.on_incoming_request(request) {
                        Ok(response) => {
                            assert!(
                                response.position > position,
                                "response {} not after sent position {}",
                                response.position,
                                position
                            );
                            let mut shared = shared_position.lock();
                            if response.position > *shared {
                                *shared = response.position;
                            }
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult {
        successful_ops: successful.load(Ordering::Relaxed),
        failed_ops: failed.load(Ordering::Relaxed),
    }
}
