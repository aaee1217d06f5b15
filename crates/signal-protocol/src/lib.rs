//! Signaling wire protocol for the room controller.
//!
//! This crate implements the framed request/response/notify protocol spoken
//! over each signaling connection: the message model, the textual codec and
//! the checksum that turns method names into numeric wire ids.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;
pub mod method_id;

pub use codec::{decode, encode, CodecError};
pub use message::{Message, PROTOCOL_VERSION};
pub use method_id::method_id;
