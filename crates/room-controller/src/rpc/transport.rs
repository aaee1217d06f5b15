//! Per-connection RPC transport.
//!
//! Wraps the wire codec with request/response correlation, notify fan-out,
//! per-call timeouts and cancellation on close. Callers of [`RpcTransport::call`]
//! always get a resolved outcome: the matching response, a synthetic 408 on
//! timeout, or a synthetic 499 when the transport closes. A pending request
//! is removed from the correlation map exactly once; removal is resolution,
//! so a second or late response for the same `seq` finds nothing and is
//! dropped.

use futures::future::BoxFuture;
use serde_json::Value;
use signal_protocol::{codec, method_id, Message};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default timeout for outbound calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Error result of a dispatched inbound request.
#[derive(Debug, Clone)]
pub struct RpcError {
    /// Numeric wire code.
    pub code: u16,
    /// Human-readable description, never empty.
    pub message: String,
}

impl RpcError {
    /// Build an error, substituting a generic message when empty.
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            "internal error".to_string()
        } else {
            message
        };
        Self { code, message }
    }

    /// The 404 error used for unregistered methods.
    #[must_use]
    pub fn unknown_method() -> Self {
        Self::new(404, "unknown method")
    }
}

/// An inbound request handed to the dispatcher.
#[derive(Debug)]
pub struct InboundRequest {
    /// Wire method id.
    pub method_id: u32,
    /// Request sequence number.
    pub seq: u32,
    /// Handler arguments.
    pub args: Vec<Value>,
}

/// Dispatch seam between the transport and the method table.
pub trait Dispatch: Send + Sync + 'static {
    /// Dispatch one inbound request to its handler.
    fn dispatch(&self, request: InboundRequest) -> BoxFuture<'static, Result<Value, RpcError>>;
}

/// Final outcome of an outbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome {
    /// The remote end responded successfully.
    Success {
        /// Response body.
        data: Value,
    },
    /// The remote end responded with an error, or the transport synthesized
    /// one (408 timeout, 499 canceled).
    Error {
        /// Numeric wire code.
        code: u16,
        /// Error description.
        message: String,
    },
}

impl RpcOutcome {
    /// Whether this outcome is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, RpcOutcome::Success { .. })
    }

    fn canceled() -> Self {
        RpcOutcome::Error {
            code: 499,
            message: "canceled".to_string(),
        }
    }

    fn timeout() -> Self {
        RpcOutcome::Error {
            code: 408,
            message: "timeout".to_string(),
        }
    }
}

/// An inbound notify delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct NotifyEvent {
    /// Event name.
    pub name: String,
    /// Event body.
    pub data: Value,
}

struct PendingRequest {
    method_id: u32,
    respond_to: oneshot::Sender<RpcOutcome>,
}

struct NotifySubscription {
    /// `None` subscribes to every notify (wildcard).
    filter: Option<String>,
    tx: mpsc::UnboundedSender<NotifyEvent>,
}

struct State {
    next_seq: u32,
    pending: HashMap<u32, PendingRequest>,
    notify_subs: Vec<NotifySubscription>,
    closed: bool,
}

struct Inner {
    label: String,
    outbound: mpsc::UnboundedSender<String>,
    dispatcher: Arc<dyn Dispatch>,
    request_timeout: Duration,
    closed_token: CancellationToken,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a frame. Returns false when the transport is closed or the
    /// outbound channel is gone.
    fn write(&self, message: &Message) -> bool {
        if self.state().closed {
            return false;
        }
        self.outbound.send(codec::encode(message)).is_ok()
    }

    fn resolve(&self, seq: u32, outcome: RpcOutcome) {
        let entry = self.state().pending.remove(&seq);
        match entry {
            Some(request) => {
                let _ = request.respond_to.send(outcome);
            }
            None => {
                debug!(
                    target: "rpc.transport",
                    peer = %self.label,
                    seq,
                    "ignoring response for unknown or already resolved request"
                );
            }
        }
    }

    fn deliver_notify(&self, name: &str, data: &Value) {
        let mut state = self.state();
        let before = state.notify_subs.len();
        state.notify_subs.retain(|sub| {
            let matches = sub.filter.as_deref().map_or(true, |filter| filter == name);
            if !matches {
                return true;
            }
            sub.tx
                .send(NotifyEvent {
                    name: name.to_string(),
                    data: data.clone(),
                })
                .is_ok()
        });
        let pruned = before - state.notify_subs.len();
        drop(state);
        if pruned > 0 {
            debug!(
                target: "rpc.transport",
                peer = %self.label,
                pruned,
                "pruned dead notify subscriptions"
            );
        }
    }

    fn close(&self) {
        let pending: Vec<PendingRequest> = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.notify_subs.clear();
            state.pending.drain().map(|(_, request)| request).collect()
        };

        for request in pending {
            debug!(
                target: "rpc.transport",
                peer = %self.label,
                method_id = request.method_id,
                "canceling pending request"
            );
            let _ = request.respond_to.send(RpcOutcome::canceled());
        }

        self.closed_token.cancel();
        debug!(target: "rpc.transport", peer = %self.label, "transport closed");
    }
}

/// Per-connection RPC transport. Cheap to clone.
#[derive(Clone)]
pub struct RpcTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for RpcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcTransport")
            .field("label", &self.inner.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RpcTransport {
    /// Create a transport over an outbound frame channel.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        outbound: mpsc::UnboundedSender<String>,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                outbound,
                dispatcher,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                closed_token: CancellationToken::new(),
                state: Mutex::new(State {
                    next_seq: 1,
                    pending: HashMap::new(),
                    notify_subs: Vec::new(),
                    closed: false,
                }),
            }),
        }
    }

    /// Token cancelled when the transport closes.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.inner.closed_token.clone()
    }

    /// Whether the transport is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state().closed
    }

    /// Send a fire-and-forget notify.
    pub fn notify(&self, name: &str, data: Value) {
        if !self.inner.write(&Message::notify(name, data)) {
            debug!(
                target: "rpc.transport",
                peer = %self.inner.label,
                name,
                "notify dropped, transport unavailable"
            );
        }
    }

    /// Subscribe to inbound notifies, optionally filtered by name.
    ///
    /// A `None` filter receives every notify.
    pub fn subscribe(&self, filter: Option<&str>) -> mpsc::UnboundedReceiver<NotifyEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.state().notify_subs.push(NotifySubscription {
            filter: filter.map(ToString::to_string),
            tx,
        });
        rx
    }

    /// Issue a correlated call and wait for its outcome.
    ///
    /// Resolves exactly once: with the matching response, a synthetic 408
    /// after the request timeout, or a synthetic 499 when the transport is
    /// closed before the response arrives.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> RpcOutcome {
        let wire_id = method_id(method);
        let (tx, rx) = oneshot::channel();

        let seq = {
            let mut state = self.inner.state();
            if state.closed {
                return RpcOutcome::canceled();
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(
                seq,
                PendingRequest {
                    method_id: wire_id,
                    respond_to: tx,
                },
            );
            seq
        };

        debug!(
            target: "rpc.transport",
            peer = %self.inner.label,
            method,
            seq,
            "outbound call"
        );

        if !self.inner.write(&Message::request(wire_id, seq, args)) {
            // The connection is gone; close resolves every pending request
            // (including this one) with 499.
            self.close();
        }

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => RpcOutcome::canceled(),
            Err(_) => {
                let entry = self.inner.state().pending.remove(&seq);
                if entry.is_some() {
                    debug!(
                        target: "rpc.transport",
                        peer = %self.inner.label,
                        method,
                        seq,
                        "request timed out"
                    );
                }
                RpcOutcome::timeout()
            }
        }
    }

    /// Feed one raw inbound frame into the transport.
    ///
    /// Malformed frames are logged and dropped; they never tear down the
    /// connection.
    pub fn read(&self, raw: &str) {
        let message = match codec::decode(raw) {
            Ok(message) => message,
            Err(error) => {
                warn!(
                    target: "rpc.transport",
                    peer = %self.inner.label,
                    %error,
                    "dropping malformed frame"
                );
                return;
            }
        };

        match message {
            Message::Ping { .. } => {
                self.inner.write(&Message::Pong {
                    payload: Vec::new(),
                });
            }
            Message::Pong { .. } => {}
            Message::Notify { name, data, .. } => {
                self.inner.deliver_notify(&name, &data);
            }
            Message::Request {
                method_id: wire_id,
                seq,
                args,
            } => {
                self.spawn_dispatch(wire_id, seq, args);
            }
            Message::ResponseSuccess { seq, data, .. } => {
                self.inner.resolve(seq, RpcOutcome::Success { data });
            }
            Message::ResponseError {
                seq, code, message, ..
            } => {
                self.inner.resolve(seq, RpcOutcome::Error { code, message });
            }
        }
    }

    /// Close the transport, cancelling every pending call with 499.
    ///
    /// Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    fn spawn_dispatch(&self, wire_id: u32, seq: u32, args: Vec<Value>) {
        let inner = Arc::clone(&self.inner);
        let future = inner.dispatcher.dispatch(InboundRequest {
            method_id: wire_id,
            seq,
            args,
        });

        tokio::spawn(async move {
            let response = match future.await {
                Ok(data) => Message::response_success(seq, data),
                Err(error) => Message::response_error(seq, error.code, error.message),
            };
            inner.write(&response);
        });
    }

    /// Method id of the oldest pending request, for diagnostics.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state().pending.len()
    }

    #[cfg(test)]
    fn pending_method_id(&self, seq: u32) -> Option<u32> {
        self.inner
            .state()
            .pending
            .get(&seq)
            .map(|request| request.method_id)
    }
}
