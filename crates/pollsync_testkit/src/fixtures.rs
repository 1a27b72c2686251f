//! Test handlers, observers and connection helpers.
//!
//! [`ScriptedHandler`] answers requests from a queue of scripted
//! [`Outcome`]s and records every call, so tests can assert exactly when the
//! connection went to the handler and what it passed along.

use parking_lot::{Condvar, Mutex};
use pollsync_conn::{Conn, ConnConfig, ConnEvent, ConnHandler, ConnObserver, RequestContext};
use pollsync_protocol::{BoxError, ConnId, HandlerError, Position, Request, Response};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a [`ScriptedHandler`] does for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Return the payload immediately.
    Respond(String),
    /// Wait until cancelled or the request's timeout elapses, then return
    /// the payload.
    LongPoll(String),
    /// Fail with the given status code.
    Fail(u16),
    /// Fail with an error that carries no status code.
    FailUntagged(String),
    /// Panic with the given message.
    Panic(String),
}

/// One recorded handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Position of the request.
    pub position: Position,
    /// Body of the request.
    pub body: String,
    /// Timeout hint the handler received.
    pub timeout: Duration,
    /// Whether the connection flagged the request as initial.
    pub is_initial: bool,
    /// Whether the request had been cancelled by the time the handler returned.
    pub cancelled: bool,
    /// Whether the handler returned a response.
    pub succeeded: bool,
}

/// A [`ConnHandler`] driven by a script.
///
/// When the script is empty it responds with `"<body>@<call number>"`,
/// immediately or after long-polling depending on how it was built.
pub struct ScriptedHandler {
    user_id: String,
    long_poll: bool,
    script: Mutex<VecDeque<Outcome>>,
    calls: Mutex<Vec<Call>>,
    entered: Mutex<usize>,
    entered_cond: Condvar,
    alive: AtomicBool,
    destroyed: AtomicBool,
}

impl ScriptedHandler {
    /// Creates a handler that responds immediately by default.
    pub fn new() -> Self {
        Self {
            user_id: "@alice:localhost".into(),
            long_poll: false,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            entered: Mutex::new(0),
            entered_cond: Condvar::new(),
            alive: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Creates a handler that long-polls by default.
    pub fn long_polling() -> Self {
        Self {
            long_poll: true,
            ..Self::new()
        }
    }

    /// Queues outcomes for the next calls.
    pub fn push(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.script.lock().extend(outcomes);
    }

    /// Drops any outcomes not consumed yet.
    pub fn clear_script(&self) {
        self.script.lock().clear();
    }

    /// Returns every completed call, oldest first.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Returns the number of completed calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the number of calls that returned a response.
    pub fn success_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.succeeded).count()
    }

    /// Returns the number of calls that have started.
    pub fn entered_count(&self) -> usize {
        *self.entered.lock()
    }

    /// Blocks until at least `n` calls have started or `timeout` elapses.
    pub fn wait_for_entered(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut entered = self.entered.lock();
        while *entered < n {
            if self.entered_cond.wait_until(&mut entered, deadline).timed_out() {
                break;
            }
        }
        *entered >= n
    }

    /// Marks the session as no longer usable.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Returns true once the connection reported its destruction.
    pub fn was_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, request: &Request<String>, n: usize) -> Outcome {
        if let Some(outcome) = self.script.lock().pop_front() {
            return outcome;
        }
        let payload = format!("{}@{}", request.body, n);
        if self.long_poll {
            Outcome::LongPoll(payload)
        } else {
            Outcome::Respond(payload)
        }
    }

    fn record(&self, ctx: &RequestContext, request: &Request<String>, is_initial: bool, ok: bool) {
        self.calls.lock().push(Call {
            position: request.position,
            body: request.body.clone(),
            timeout: request.timeout,
            is_initial,
            cancelled: ctx.is_cancelled(),
            succeeded: ok,
        });
    }
}

impl Default for ScriptedHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnHandler for ScriptedHandler {
    type Body = String;
    type Payload = String;

    fn on_incoming_request(
        &self,
        ctx: &RequestContext,
        _id: &ConnId,
        request: &Request<String>,
        is_initial: bool,
    ) -> Result<Response<String>, BoxError> {
        let n = {
            let mut entered = self.entered.lock();
            *entered += 1;
            self.entered_cond.notify_all();
            *entered
        };

        match self.next_outcome(request, n) {
            Outcome::Respond(payload) => {
                self.record(ctx, request, is_initial, true);
                Ok(Response::new(payload))
            }
            Outcome::LongPoll(payload) => {
                ctx.wait_for_cancel(request.timeout);
                self.record(ctx, request, is_initial, true);
                Ok(Response::new(payload))
            }
            Outcome::Fail(status) => {
                self.record(ctx, request, is_initial, false);
                Err(Box::new(HandlerError::new(status, "scripted failure")))
            }
            Outcome::FailUntagged(message) => {
                self.record(ctx, request, is_initial, false);
                Err(message.into())
            }
            Outcome::Panic(message) => {
                self.record(ctx, request, is_initial, false);
                panic!("{}", message);
            }
        }
    }

    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// An observer that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ConnEvent>>,
}

impl RecordingObserver {
    /// Creates an empty observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events, oldest first.
    pub fn events(&self) -> Vec<ConnEvent> {
        self.events.lock().clone()
    }

    /// Counts events matching `pred`.
    pub fn count(&self, pred: impl Fn(&ConnEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Drops all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ConnObserver for RecordingObserver {
    fn on_event(&self, _id: &ConnId, event: &ConnEvent) {
        self.events.lock().push(event.clone());
    }
}

/// A connection wired to a [`ScriptedHandler`] and a [`RecordingObserver`].
pub struct TestConn {
    /// The connection under test.
    pub conn: Arc<Conn<ScriptedHandler>>,
    /// Events emitted by the connection.
    pub events: Arc<RecordingObserver>,
}

impl TestConn {
    /// Creates a test connection with the default configuration.
    pub fn new() -> Self {
        Self::with_handler(ScriptedHandler::new(), ConnConfig::default())
    }

    /// Creates a test connection around the given handler and configuration.
    pub fn with_handler(handler: ScriptedHandler, config: ConnConfig) -> Self {
        let events = Arc::new(RecordingObserver::new());
        let observer: Arc<dyn ConnObserver> = events.clone();
        let conn = Conn::with_config(ConnId::new("TEST_DEVICE"), handler, config)
            .with_observer(observer);
        Self {
            conn: Arc::new(conn),
            events,
        }
    }

    /// Returns the handler.
    pub fn handler(&self) -> &ScriptedHandler {
        self.conn.handler()
    }
}

impl Default for TestConn {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestConn {
    type Target = Conn<ScriptedHandler>;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

/// Builds a request at `position` with the given body.
pub fn request(position: u64, body: &str) -> Request<String> {
    Request::new(Position::new(position), body.to_string()).with_txn_id(format!("txn-{position}"))
}
