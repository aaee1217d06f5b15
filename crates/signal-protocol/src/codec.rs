//! Codec for encoding and decoding signaling frames.
//!
//! Wire representation is one JSON array per message whose first two
//! elements are `[version, type]` followed by type-specific fields:
//!
//! ```text
//! Ping            -> [1, 0, ...payload]
//! Pong            -> [1, 1, ...payload]
//! Notify          -> [1, 2, name, data, ...payload]
//! Request         -> [1, 3, methodId, seq, ...args]
//! ResponseSuccess -> [1, 4, seq, data, ...payload]
//! ResponseError   -> [1, 5, seq, code, message, ...payload]
//! ```
//!
//! A malformed frame fails decoding as a whole; the caller is expected to
//! drop the frame rather than tear down the connection.

use crate::message::{
    Message, PROTOCOL_VERSION, TYPE_NOTIFY, TYPE_PING, TYPE_PONG, TYPE_REQUEST,
    TYPE_RESPONSE_ERROR, TYPE_RESPONSE_SUCCESS,
};
use serde_json::Value;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame is not valid JSON
    #[error("invalid frame json: {0}")]
    InvalidJson(String),

    /// Frame is valid JSON but not an array
    #[error("expected array frame")]
    NotAnArray,

    /// Unsupported protocol version
    #[error("unsupported version: {0}")]
    UnsupportedVersion(Value),

    /// Unknown message type tag
    #[error("unknown message type: {0}")]
    UnknownType(Value),

    /// A required field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field is present but has the wrong type or an invalid value
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

/// Encode a message to its textual frame.
#[must_use]
pub fn encode(message: &Message) -> String {
    let mut fields: Vec<Value> = vec![
        Value::from(PROTOCOL_VERSION),
        Value::from(message.type_id()),
    ];

    match message {
        Message::Ping { payload } | Message::Pong { payload } => {
            fields.extend(payload.iter().cloned());
        }
        Message::Notify {
            name,
            data,
            payload,
        } => {
            fields.push(Value::from(name.as_str()));
            fields.push(data.clone());
            fields.extend(payload.iter().cloned());
        }
        Message::Request {
            method_id,
            seq,
            args,
        } => {
            fields.push(Value::from(*method_id));
            fields.push(Value::from(*seq));
            fields.extend(args.iter().cloned());
        }
        Message::ResponseSuccess { seq, data, payload } => {
            fields.push(Value::from(*seq));
            fields.push(data.clone());
            fields.extend(payload.iter().cloned());
        }
        Message::ResponseError {
            seq,
            code,
            message,
            payload,
        } => {
            fields.push(Value::from(*seq));
            fields.push(Value::from(*code));
            fields.push(Value::from(message.as_str()));
            fields.extend(payload.iter().cloned());
        }
    }

    Value::Array(fields).to_string()
}

/// Decode a textual frame into a message.
///
/// # Errors
///
/// Returns a [`CodecError`] when the frame is not valid JSON, is not an
/// array, carries an unsupported version or unknown type, or violates the
/// per-type field layout.
pub fn decode(raw: &str) -> Result<Message, CodecError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| CodecError::InvalidJson(e.to_string()))?;

    let Value::Array(fields) = value else {
        return Err(CodecError::NotAnArray);
    };

    let mut fields = fields.into_iter();

    let version = fields.next().ok_or(CodecError::MissingField("version"))?;
    if version.as_u64() != Some(PROTOCOL_VERSION) {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let type_field = fields.next().ok_or(CodecError::MissingField("type"))?;
    let type_id = type_field
        .as_u64()
        .ok_or(CodecError::InvalidField("type"))?;

    match type_id {
        TYPE_PING => Ok(Message::Ping {
            payload: fields.collect(),
        }),

        TYPE_PONG => Ok(Message::Pong {
            payload: fields.collect(),
        }),

        TYPE_NOTIFY => {
            let name = non_empty_string(fields.next(), "name")?;
            let data = fields.next().unwrap_or(Value::Null);

            Ok(Message::Notify {
                name,
                data,
                payload: fields.collect(),
            })
        }

        TYPE_REQUEST => {
            let method_id = u32_field(fields.next(), "methodId")?;
            let seq = u32_field(fields.next(), "seq")?;

            // Everything after seq belongs to the handler arguments; the
            // trailing extension slot is not usable for Request frames.
            Ok(Message::Request {
                method_id,
                seq,
                args: fields.collect(),
            })
        }

        TYPE_RESPONSE_SUCCESS => {
            let seq = u32_field(fields.next(), "seq")?;
            let data = fields.next().unwrap_or(Value::Null);

            Ok(Message::ResponseSuccess {
                seq,
                data,
                payload: fields.collect(),
            })
        }

        TYPE_RESPONSE_ERROR => {
            let seq = u32_field(fields.next(), "seq")?;
            let code = u16_field(fields.next(), "code")?;
            let message = non_empty_string(fields.next(), "message")?;

            Ok(Message::ResponseError {
                seq,
                code,
                message,
                payload: fields.collect(),
            })
        }

        _ => Err(CodecError::UnknownType(type_field)),
    }
}

fn non_empty_string(field: Option<Value>, name: &'static str) -> Result<String, CodecError> {
    match field {
        None => Err(CodecError::MissingField(name)),
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(_) => Err(CodecError::InvalidField(name)),
    }
}

fn u32_field(field: Option<Value>, name: &'static str) -> Result<u32, CodecError> {
    let value = field.ok_or(CodecError::MissingField(name))?;
    let number = value.as_u64().ok_or(CodecError::InvalidField(name))?;
    u32::try_from(number).map_err(|_| CodecError::InvalidField(name))
}

fn u16_field(field: Option<Value>, name: &'static str) -> Result<u16, CodecError> {
    let value = field.ok_or(CodecError::MissingField(name))?;
    let number = value.as_u64().ok_or(CodecError::InvalidField(name))?;
    u16::try_from(number).map_err(|_| CodecError::InvalidField(name))
}
