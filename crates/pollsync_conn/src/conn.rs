//! The per-device long-poll connection.

use crate::buffer::ResponseBuffer;
use crate::cancel::CancelToken;
use crate::config::ConnConfig;
use crate::error::{ConnError, ConnResult};
use crate::handler::{ConnHandler, RequestContext};
use crate::observer::{ConnEvent, ConnObserver, TracingObserver};
use parking_lot::Mutex;
use pollsync_protocol::{ConnId, HandlerError, Position, Request, Response};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Protocol state of one connection. Only touched under [`Conn::state`].
struct SessionState<B, P> {
    /// Last request answered successfully, by the handler or from the buffer.
    last_client_request: Option<Request<B>>,
    /// Responses the client has not acknowledged yet.
    buffer: ResponseBuffer<P>,
    /// Position of the newest response produced.
    last_position: Position,
}

/// How an incoming request relates to the connection's history.
#[derive(Debug, Clone, Copy)]
struct Classification {
    position: Position,
    is_initial: bool,
    is_retransmit: bool,
    acks_oldest: bool,
    acks_newest: bool,
    is_same: bool,
}

impl Classification {
    fn of<B: PartialEq, P>(state: &SessionState<B, P>, request: &Request<B>) -> Self {
        let position = request.position;
        let is_initial = position.is_initial();
        let last = state.last_client_request.as_ref();
        Self {
            position,
            is_initial,
            is_retransmit: !is_initial && last.is_some_and(|last| last.position == position),
            acks_oldest: state.buffer.oldest_position() == Some(position),
            acks_newest: !state.last_position.is_initial() && state.last_position == position,
            is_same: !is_initial && last.is_some_and(|last| last.same(request)),
        }
    }

    /// A position we told the client about, or a resend of its last one.
    fn is_known(&self) -> bool {
        self.is_initial || self.acks_newest || self.acks_oldest || self.is_retransmit
    }
}

/// Point-in-time view of a connection's protocol state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnSnapshot {
    /// Position of the newest response produced.
    pub last_position: Position,
    /// Position of the last successfully answered request.
    pub last_client_position: Option<Position>,
    /// Positions awaiting acknowledgment, oldest first.
    pub buffered: Vec<Position>,
}

/// A long-poll connection for one device.
///
/// Tracks positions on behalf of the handler: retries get the response that
/// was produced for them, acknowledged responses are dropped, and requests
/// are processed strictly one at a time. Payload contents are never
/// inspected.
pub struct Conn<H: ConnHandler> {
    id: ConnId,
    handler: H,
    config: ConnConfig,
    observer: Arc<dyn ConnObserver>,
    // Held for the whole of on_incoming_request, handler call included, so
    // requests on one connection are linearized.
    state: Mutex<SessionState<H::Body, H::Payload>>,
    in_flight: Mutex<Option<CancelToken>>,
}

impl<H: ConnHandler> Conn<H> {
    /// Creates a connection with the default configuration.
    pub fn new(id: ConnId, handler: H) -> Self {
        Self::with_config(id, handler, ConnConfig::default())
    }

    /// Creates a connection with the given configuration.
    pub fn with_config(id: ConnId, handler: H, config: ConnConfig) -> Self {
        Self {
            id,
            handler,
            config,
            observer: Arc::new(TracingObserver),
            state: Mutex::new(SessionState {
                last_client_request: None,
                buffer: ResponseBuffer::new(),
                last_position: Position::INITIAL,
            }),
            in_flight: Mutex::new(None),
        }
    }

    /// Replaces the observer that receives this connection's events.
    pub fn with_observer(mut self, observer: Arc<dyn ConnObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Returns the connection identity.
    pub fn id(&self) -> &ConnId {
        &self.id
    }

    /// Returns the handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ConnConfig {
        &self.config
    }

    /// Returns the user owning this connection.
    pub fn user_id(&self) -> String {
        self.handler.user_id()
    }

    /// Returns false once the handler considers this connection finished.
    pub fn alive(&self) -> bool {
        self.handler.alive()
    }

    /// Cancels any in-flight request and notifies the handler.
    pub fn destroy(&self) {
        self.cancel_in_flight();
        self.handler.destroy();
    }

    /// Cancels the request currently being processed, if any.
    ///
    /// Returns true if a request was cancelled.
    pub fn cancel_in_flight(&self) -> bool {
        match self.in_flight.lock().as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Returns the position of the newest response produced.
    pub fn last_position(&self) -> Position {
        self.state.lock().last_position
    }

    /// Returns the number of responses awaiting acknowledgment.
    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Returns a view of the protocol state.
    ///
    /// Blocks while a request is being processed.
    pub fn snapshot(&self) -> ConnSnapshot {
        let state = self.state.lock();
        ConnSnapshot {
            last_position: state.last_position,
            last_client_position: state.last_client_request.as_ref().map(|r| r.position),
            buffered: state.buffer.positions(),
        }
    }

    /// Advances the client's position in the stream and returns the oldest
    /// response it has not acknowledged.
    ///
    /// Any request already in flight on this connection is cancelled first,
    /// then this call waits for it to finish.
    pub fn on_incoming_request(
        &self,
        request: Request<H::Body>,
    ) -> ConnResult<Response<H::Payload>> {
        let token = self.preempt();
        let result = {
            let mut state = self.state.lock();
            self.process(&mut state, &token, request)
        };
        self.release(&token);
        result
    }

    /// Registers `token` as in flight and cancels whatever it replaces.
    fn preempt(&self) -> CancelToken {
        let token = CancelToken::new();
        let previous = self.in_flight.lock().replace(token.clone());
        if let Some(previous) = previous {
            if !previous.is_cancelled() {
                previous.cancel();
                self.observer.on_event(&self.id, &ConnEvent::Preempted);
            }
        }
        token
    }

    fn release(&self, token: &CancelToken) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().is_some_and(|current| current.ptr_eq(token)) {
            *in_flight = None;
        }
    }

    fn process(
        &self,
        state: &mut SessionState<H::Body, H::Payload>,
        token: &CancelToken,
        request: Request<H::Body>,
    ) -> ConnResult<Response<H::Payload>> {
        let class = Classification::of(state, &request);

        // the client made up a position, reject it before touching anything
        if !class.is_known() {
            self.observer.on_event(
                &self.id,
                &ConnEvent::UnknownPosition {
                    position: class.position,
                },
            );
            return Err(ConnError::UnknownPosition {
                position: class.position,
            });
        }

        // supplying a position acknowledges everything up to and including
        // it; the eviction is only applied once the call succeeds
        let acked = state.buffer.covered_by(class.position);

        let result = self.respond(state, token, request, &class, acked);

        self.observer.on_event(
            &self.id,
            &ConnEvent::Finished {
                acked: if result.is_ok() { acked } else { 0 },
                is_retransmit: class.is_retransmit,
                acks_oldest: class.acks_oldest,
                acks_newest: class.acks_newest,
                is_initial: class.is_initial,
                is_same: class.is_same,
                position: class.position,
                user_id: self.handler.user_id(),
                new_position: state.buffer.oldest_position(),
            },
        );
        result
    }

    fn respond(
        &self,
        state: &mut SessionState<H::Body, H::Payload>,
        token: &CancelToken,
        mut request: Request<H::Body>,
        class: &Classification,
        acked: usize,
    ) -> ConnResult<Response<H::Payload>> {
        if class.is_retransmit {
            if class.is_same {
                match self.replay(state, request, class) {
                    Ok(head) => return Ok(head),
                    Err(unserved) => request = unserved,
                }
            } else {
                // the client changed its request (e.g. new filters) and will
                // not resend the old one, so it has to be processed
                self.observer.on_event(
                    &self.id,
                    &ConnEvent::BodyChanged {
                        position: class.position,
                    },
                );
            }
        }

        let pending = state.buffer.len() - acked;
        if pending > 0 {
            if class.is_same {
                match self.replay(state, request, class) {
                    Ok(head) => return Ok(head),
                    Err(unserved) => request = unserved,
                }
            }
            // Returning the buffered response now would drop this request's
            // data, so process it first but without making the client wait.
            let from = request.timeout;
            if request.shrink_timeout(self.config.min_timeout) {
                self.observer.on_event(
                    &self.id,
                    &ConnEvent::TimeoutShrunk {
                        from,
                        to: request.timeout,
                    },
                );
            }
        }

        if self.config.buffer_full(pending) {
            let limit = self.config.max_buffered.unwrap_or(pending);
            self.observer
                .on_event(&self.id, &ConnEvent::BufferFull { limit });
            return Err(ConnError::BufferFull { limit });
        }

        let position = state
            .last_position
            .checked_next()
            .ok_or(ConnError::PositionOverflow {
                last: state.last_position,
            })?;

        let mut response = self.try_request(token, &request)?;

        // Only now is anything recorded: a failed or panicking handler must
        // leave the session exactly as it was, or retries would wedge on it.
        response.position = position;
        response.txn_id = request.txn_id.clone();
        state.buffer.push(response)?;
        state.buffer.acknowledge(class.position);
        state.last_client_request = Some(request);
        state.last_position = position;

        state
            .buffer
            .head()
            .cloned()
            .ok_or_else(|| ConnError::Handler(HandlerError::internal("response buffer empty")))
    }

    /// Serves the response after the acknowledged prefix to a request whose
    /// body matches the last one.
    ///
    /// The acknowledgment is applied and the request recorded, so that
    /// resending it again stays a known position. Hands the request back if
    /// nothing is left to serve.
    fn replay(
        &self,
        state: &mut SessionState<H::Body, H::Payload>,
        request: Request<H::Body>,
        class: &Classification,
    ) -> Result<Response<H::Payload>, Request<H::Body>> {
        let Some(head) = state.buffer.first_after(class.position).cloned() else {
            return Err(request);
        };
        self.observer.on_event(
            &self.id,
            &ConnEvent::Replayed {
                position: class.position,
                replayed: head.position,
            },
        );
        state.buffer.acknowledge(class.position);
        state.last_client_request = Some(request);
        Ok(head)
    }

    /// Invokes the handler, turning errors and panics into [`ConnError`]s.
    fn try_request(
        &self,
        token: &CancelToken,
        request: &Request<H::Body>,
    ) -> ConnResult<Response<H::Payload>> {
        let ctx = RequestContext::new(token.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler
                .on_incoming_request(&ctx, &self.id, request, request.is_initial())
        }));

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                let err = HandlerError::from_boxed(err);
                self.observer.on_event(
                    &self.id,
                    &ConnEvent::HandlerFailed {
                        status: err.status(),
                        message: err.cause().to_string(),
                    },
                );
                Err(ConnError::Handler(err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.observer.on_event(
                    &self.id,
                    &ConnEvent::HandlerPanicked {
                        message: message.clone(),
                    },
                );
                Err(ConnError::HandlerPanicked { message })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollsync_protocol::BoxError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers every request with `"<body>#<call number>"`.
    #[derive(Default)]
    struct EchoHandler {
        calls: AtomicUsize,
        last_timeout: Mutex<Option<Duration>>,
        fail_next: Mutex<Option<u16>>,
        panic_next: Mutex<bool>,
    }

    impl ConnHandler for EchoHandler {
        type Body = String;
        type Payload = String;

        fn on_incoming_request(
            &self,
            _ctx: &RequestContext,
            _id: &ConnId,
            request: &Request<String>,
            _is_initial: bool,
        ) -> Result<Response<String>, BoxError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_timeout.lock() = Some(request.timeout);
            if std::mem::take(&mut *self.panic_next.lock()) {
                panic!("handler exploded");
            }
            if let Some(status) = self.fail_next.lock().take() {
                return Err(Box::new(HandlerError::new(status, "upstream unavailable")));
            }
            Ok(Response::new(format!("{}#{}", request.body, n)))
        }

        fn user_id(&self) -> String {
            "@alice:localhost".into()
        }

        fn alive(&self) -> bool {
            true
        }

        fn destroy(&self) {}
    }

    fn conn() -> Conn<EchoHandler> {
        Conn::new(ConnId::new("DEVICE"), EchoHandler::default())
    }

    fn req(pos: u64, body: &str) -> Request<String> {
        Request::new(Position::new(pos), body.to_string()).with_txn_id(format!("txn-{pos}"))
    }

    fn calls(conn: &Conn<EchoHandler>) -> usize {
        conn.handler().calls.load(Ordering::SeqCst)
    }

    #[test]
    fn initial_request_produces_position_one() {
        let conn = conn();
        let res = conn.on_incoming_request(req(0, "a")).unwrap();
        assert_eq!(res.position, Position::new(1));
        assert_eq!(res.payload, "a#1");
        assert_eq!(res.txn_id, "txn-0");
        assert_eq!(conn.last_position(), Position::new(1));
        assert_eq!(conn.buffered_len(), 1);
    }

    #[test]
    fn fresh_connection_rejects_made_up_position() {
        let conn = conn();
        let err = conn.on_incoming_request(req(999, "a")).unwrap_err();
        assert!(matches!(err, ConnError::UnknownPosition { position } if position == Position::new(999)));
        assert_eq!(err.status_code(), 400);
        assert_eq!(calls(&conn), 0);
        assert_eq!(
            conn.snapshot(),
            ConnSnapshot {
                last_position: Position::INITIAL,
                last_client_position: None,
                buffered: vec![],
            }
        );
    }

    #[test]
    fn acknowledging_evicts_and_long_polls() {
        let conn = conn();
        conn.on_incoming_request(req(0, "a")).unwrap();
        let res = conn.on_incoming_request(req(1, "a")).unwrap();
        assert_eq!(res.position, Position::new(2));
        assert_eq!(conn.snapshot().buffered, vec![Position::new(2)]);
        assert_eq!(calls(&conn), 2);
    }

    #[test]
    fn identical_retransmit_replays_without_handler() {
        let conn = conn();
        conn.on_incoming_request(req(0, "a")).unwrap();
        let first = conn.on_incoming_request(req(1, "a")).unwrap();
        let again = conn.on_incoming_request(req(1, "a")).unwrap();
        assert_eq!(first, again);
        assert_eq!(calls(&conn), 2);
    }

    #[test]
    fn changed_retransmit_queues_behind_buffered_response() {
        let conn = conn();
        conn.on_incoming_request(req(0, "a")).unwrap();
        conn.on_incoming_request(req(1, "a")).unwrap();

        let res = conn.on_incoming_request(req(1, "b")).unwrap();
        assert_eq!(res.position, Position::new(2));
        assert_eq!(res.payload, "a#2");
        assert_eq!(calls(&conn), 3);
        assert_eq!(
            *conn.handler().last_timeout.lock(),
            Some(Duration::from_millis(1))
        );
        assert_eq!(
            conn.snapshot().buffered,
            vec![Position::new(2), Position::new(3)]
        );

        // acknowledging 2 with the same body hands out 3 without a new call
        let res = conn.on_incoming_request(req(2, "b")).unwrap();
        assert_eq!(res.position, Position::new(3));
        assert_eq!(res.payload, "b#3");
        assert_eq!(calls(&conn), 3);
    }

    #[test]
    fn replayed_request_can_be_resent() {
        let conn = conn();
        conn.on_incoming_request(req(0, "a")).unwrap();
        conn.on_incoming_request(req(1, "a")).unwrap();
        conn.on_incoming_request(req(1, "b")).unwrap();

        // served from the buffer, then the response is lost and resent
        let first = conn.on_incoming_request(req(2, "b")).unwrap();
        let again = conn.on_incoming_request(req(2, "b")).unwrap();
        assert_eq!(first.position, Position::new(3));
        assert_eq!(first, again);
        assert_eq!(calls(&conn), 3);
        assert_eq!(conn.snapshot().last_client_position, Some(Position::new(2)));
    }

    #[test]
    fn handler_error_leaves_state_untouched() {
        let conn = conn();
        conn.on_incoming_request(req(0, "a")).unwrap();
        let before = conn.snapshot();

        *conn.handler().fail_next.lock() = Some(503);
        let err = conn.on_incoming_request(req(0, "a")).unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert_eq!(conn.snapshot(), before);

        // the retry goes through cleanly
        let res = conn.on_incoming_request(req(0, "a")).unwrap();
        assert_eq!(res.position, Position::new(1));
        assert_eq!(conn.last_position(), Position::new(2));
    }

    #[test]
    fn handler_panic_is_contained() {
        let conn = conn();
        conn.on_incoming_request(req(0, "a")).unwrap();
        let before = conn.snapshot();

        *conn.handler().panic_next.lock() = true;
        let err = conn.on_incoming_request(req(1, "a")).unwrap_err();
        match &err {
            ConnError::HandlerPanicked { message } => assert_eq!(message, "handler exploded"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.status_code(), 500);
        // the acknowledgment of position 1 is not applied either
        assert_eq!(conn.snapshot(), before);

        let res = conn.on_incoming_request(req(1, "a")).unwrap();
        assert_eq!(res.position, Position::new(2));
    }

    #[test]
    fn full_buffer_rejects_new_work() {
        let conn = Conn::with_config(
            ConnId::new("DEVICE"),
            EchoHandler::default(),
            ConnConfig::new().with_max_buffered(2),
        );
        assert_eq!(conn.config().max_buffered, Some(2));
        conn.on_incoming_request(req(0, "a")).unwrap();
        conn.on_incoming_request(req(0, "b")).unwrap();
        let err = conn.on_incoming_request(req(0, "c")).unwrap_err();
        assert!(matches!(err, ConnError::BufferFull { limit: 2 }));
        assert_eq!(err.status_code(), 429);
        assert_eq!(calls(&conn), 2);

        // acknowledging frees room again
        let res = conn.on_incoming_request(req(1, "c")).unwrap();
        assert_eq!(res.position, Position::new(2));
        assert_eq!(conn.last_position(), Position::new(3));
    }

    #[test]
    fn failed_acknowledgment_keeps_buffer() {
        let conn = conn();
        conn.on_incoming_request(req(0, "a")).unwrap();
        let before = conn.snapshot();
        assert_eq!(before.buffered, vec![Position::new(1)]);

        *conn.handler().fail_next.lock() = Some(500);
        conn.on_incoming_request(req(1, "b")).unwrap_err();
        assert_eq!(conn.snapshot(), before);

        // the retry applies the acknowledgment along with the new response
        let res = conn.on_incoming_request(req(1, "b")).unwrap();
        assert_eq!(res.position, Position::new(2));
        assert_eq!(conn.snapshot().buffered, vec![Position::new(2)]);
    }

    #[test]
    fn exhausted_positions_fail_before_handler() {
        let conn = conn();
        conn.state.lock().last_position = Position::new(u64::MAX);

        let err = conn.on_incoming_request(req(0, "a")).unwrap_err();
        assert!(matches!(err, ConnError::PositionOverflow { last } if last == Position::new(u64::MAX)));
        assert_eq!(err.status_code(), 500);
        assert_eq!(calls(&conn), 0);
        assert_eq!(conn.buffered_len(), 0);
    }

    #[test]
    fn panic_message_extraction() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic payload");
    }
}
