//! Room controller error types.
//!
//! Handler-visible failures become `ResponseError` frames on the wire. Every
//! handler error maps to code 500 with its display text; 404 is reserved for
//! unknown methods and 408/499 are synthesized by the RPC transport for
//! timeouts and cancellation on close.

use media_engine::EngineError;
use thiserror::Error;

/// Room controller error type.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Operation requires a joined peer.
    #[error("Peer not yet joined")]
    NotJoined,

    /// Peer attempted to join twice.
    #[error("Peer already joined")]
    AlreadyJoined,

    /// Referenced peer does not exist in the room.
    #[error("peer with id \"{0}\" not found")]
    PeerNotFound(String),

    /// Referenced transport does not exist in the caller's session.
    #[error("transport with id \"{0}\" not found")]
    TransportNotFound(String),

    /// Referenced producer does not exist in the caller's session.
    #[error("producer with id \"{0}\" not found")]
    ProducerNotFound(String),

    /// Referenced consumer does not exist in the caller's session.
    #[error("consumer with id \"{0}\" not found")]
    ConsumerNotFound(String),

    /// Referenced data producer does not exist in the caller's session.
    #[error("dataProducer with id \"{0}\" not found")]
    DataProducerNotFound(String),

    /// Referenced data consumer does not exist in the caller's session.
    #[error("dataConsumer with id \"{0}\" not found")]
    DataConsumerNotFound(String),

    /// Referenced broadcaster does not exist.
    #[error("broadcaster with id \"{0}\" does not exist")]
    BroadcasterNotFound(String),

    /// Broadcaster id already taken.
    #[error("broadcaster with id \"{0}\" already exists")]
    BroadcasterExists(String),

    /// Request failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Room is already closed.
    #[error("room is closed")]
    RoomClosed,

    /// Manager is shutting down.
    #[error("shutting down")]
    ShuttingDown,

    /// Media engine operation failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Internal error (actor mailbox failures and the like).
    #[error("internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Build the error used when an actor mailbox send or reply fails.
    pub fn mailbox(err: impl std::fmt::Display) -> Self {
        RoomError::Internal(format!("channel send failed: {err}"))
    }
}

impl From<RoomError> for crate::rpc::RpcError {
    fn from(error: RoomError) -> Self {
        crate::rpc::RpcError::new(500, error.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        assert_eq!(format!("{}", RoomError::NotJoined), "Peer not yet joined");
        assert_eq!(
            format!("{}", RoomError::AlreadyJoined),
            "Peer already joined"
        );
        assert_eq!(
            format!("{}", RoomError::TransportNotFound("t1".to_string())),
            "transport with id \"t1\" not found"
        );
        assert_eq!(
            format!("{}", RoomError::BroadcasterNotFound("b1".to_string())),
            "broadcaster with id \"b1\" does not exist"
        );
    }

    #[test]
    fn test_engine_error_conversion() {
        let engine_err = EngineError::NotFound("producer x".to_string());
        let err: RoomError = engine_err.into();
        assert!(matches!(err, RoomError::Engine(_)));
        assert_eq!(format!("{err}"), "engine error: resource not found: producer x");
    }

    #[test]
    fn test_mailbox_helper() {
        let err = RoomError::mailbox("receiver dropped");
        assert_eq!(
            format!("{err}"),
            "internal error: channel send failed: receiver dropped"
        );
    }
}
