//! Message types for the signaling protocol.

use serde_json::Value;

/// Protocol version carried in every frame.
pub const PROTOCOL_VERSION: u64 = 1;

/// Wire type tag for `Ping`.
pub const TYPE_PING: u64 = 0;
/// Wire type tag for `Pong`.
pub const TYPE_PONG: u64 = 1;
/// Wire type tag for `Notify`.
pub const TYPE_NOTIFY: u64 = 2;
/// Wire type tag for `Request`.
pub const TYPE_REQUEST: u64 = 3;
/// Wire type tag for `ResponseSuccess`.
pub const TYPE_RESPONSE_SUCCESS: u64 = 4;
/// Wire type tag for `ResponseError`.
pub const TYPE_RESPONSE_ERROR: u64 = 5;

/// A signaling message.
///
/// Every variant carries an open trailing `payload` slot so future protocol
/// revisions can append fields without breaking older decoders. `Request`
/// frames have no usable trailing slot: everything after the sequence number
/// belongs to the handler arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Liveness probe.
    Ping {
        /// Forward-compatible trailing fields.
        payload: Vec<Value>,
    },
    /// Liveness probe response.
    Pong {
        /// Forward-compatible trailing fields.
        payload: Vec<Value>,
    },
    /// One-way event, no response expected.
    Notify {
        /// Event name, non-empty.
        name: String,
        /// Event body.
        data: Value,
        /// Forward-compatible trailing fields.
        payload: Vec<Value>,
    },
    /// Correlated request expecting exactly one response.
    Request {
        /// Checksum of the method name (see [`crate::method_id`]).
        method_id: u32,
        /// Sequence number, unique per transport.
        seq: u32,
        /// Handler arguments.
        args: Vec<Value>,
    },
    /// Successful response to a `Request` with the same `seq`.
    ResponseSuccess {
        /// Sequence number of the matching request.
        seq: u32,
        /// Handler result.
        data: Value,
        /// Forward-compatible trailing fields.
        payload: Vec<Value>,
    },
    /// Failed response to a `Request` with the same `seq`.
    ResponseError {
        /// Sequence number of the matching request.
        seq: u32,
        /// Numeric error code (404, 408, 499, 500, ...).
        code: u16,
        /// Human-readable error description, non-empty.
        message: String,
        /// Forward-compatible trailing fields.
        payload: Vec<Value>,
    },
}

impl Message {
    /// Wire type tag for this message.
    #[must_use]
    pub fn type_id(&self) -> u64 {
        match self {
            Message::Ping { .. } => TYPE_PING,
            Message::Pong { .. } => TYPE_PONG,
            Message::Notify { .. } => TYPE_NOTIFY,
            Message::Request { .. } => TYPE_REQUEST,
            Message::ResponseSuccess { .. } => TYPE_RESPONSE_SUCCESS,
            Message::ResponseError { .. } => TYPE_RESPONSE_ERROR,
        }
    }

    /// Build a `Notify` message.
    #[must_use]
    pub fn notify(name: impl Into<String>, data: Value) -> Self {
        Message::Notify {
            name: name.into(),
            data,
            payload: Vec::new(),
        }
    }

    /// Build a `Request` message.
    #[must_use]
    pub fn request(method_id: u32, seq: u32, args: Vec<Value>) -> Self {
        Message::Request {
            method_id,
            seq,
            args,
        }
    }

    /// Build a `ResponseSuccess` message.
    #[must_use]
    pub fn response_success(seq: u32, data: Value) -> Self {
        Message::ResponseSuccess {
            seq,
            data,
            payload: Vec::new(),
        }
    }

    /// Build a `ResponseError` message.
    #[must_use]
    pub fn response_error(seq: u32, code: u16, message: impl Into<String>) -> Self {
        Message::ResponseError {
            seq,
            code,
            message: message.into(),
            payload: Vec::new(),
        }
    }
}
