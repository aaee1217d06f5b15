//! Peer and broadcaster session state.
//!
//! A peer's joined-only fields live behind the [`PeerSession`] tag, so code
//! touching capabilities or the display name must prove the peer joined
//! first. Media resource maps exist from connection time because transports
//! may be created before joining.

use crate::actors::messages::PeerSummary;
use crate::rpc::RpcTransport;

use media_engine::{
    MediaConsumer, MediaDataConsumer, MediaDataProducer, MediaProducer, MediaTransport,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Session state of a connected peer.
pub enum PeerSession {
    /// Connected, `join` not yet called.
    Unjoined,
    /// Joined with negotiated capabilities.
    Joined(JoinedSession),
}

/// State only a joined peer has.
pub struct JoinedSession {
    /// Display name shown to other participants.
    pub display_name: String,
    /// Opaque device description.
    pub device: Value,
    /// RTP capabilities of the endpoint.
    pub rtp_capabilities: Value,
    /// SCTP capabilities, `Null` when data channels are unsupported.
    pub sctp_capabilities: Value,
}

/// A WebRTC/plain transport owned by a participant.
pub struct TransportRecord {
    /// Engine handle.
    pub handle: Arc<dyn MediaTransport>,
    /// The endpoint sends media over this transport.
    pub producing: bool,
    /// The endpoint receives media over this transport.
    pub consuming: bool,
}

/// A producer owned by a participant.
pub struct ProducerRecord {
    /// Engine handle.
    pub handle: Arc<dyn MediaProducer>,
}

/// A consumer owned by a participant.
pub struct ConsumerRecord {
    /// Engine handle.
    pub handle: Arc<dyn MediaConsumer>,
    /// Producer this consumer is attached to.
    pub producer_id: String,
}

/// A data producer owned by a participant.
pub struct DataProducerRecord {
    /// Engine handle.
    pub handle: Arc<dyn MediaDataProducer>,
    /// Channel label.
    pub label: String,
}

/// A data consumer owned by a participant.
pub struct DataConsumerRecord {
    /// Engine handle.
    pub handle: Arc<dyn MediaDataConsumer>,
    /// Data producer this consumer is attached to.
    pub data_producer_id: String,
}

/// Media resources rooted at one participant.
///
/// Every id inserted here is removed exactly once, either by the explicit
/// teardown cascade or by a close-event callback.
#[derive(Default)]
pub struct MediaResources {
    /// Transports by id.
    pub transports: HashMap<String, TransportRecord>,
    /// Producers by id.
    pub producers: HashMap<String, ProducerRecord>,
    /// Consumers by id.
    pub consumers: HashMap<String, ConsumerRecord>,
    /// Data producers by id.
    pub data_producers: HashMap<String, DataProducerRecord>,
    /// Data consumers by id.
    pub data_consumers: HashMap<String, DataConsumerRecord>,
}

impl MediaResources {
    /// The transport the participant uses for consuming, when any.
    #[must_use]
    pub fn consuming_transport(&self) -> Option<&TransportRecord> {
        self.transports.values().find(|record| record.consuming)
    }
}

/// A participant with a live signaling connection.
pub struct Peer {
    /// Peer id, unique within the room.
    pub id: String,
    /// Signaling transport.
    pub transport: RpcTransport,
    /// Tagged session state.
    pub session: PeerSession,
    /// Media resources rooted at this peer.
    pub resources: MediaResources,
}

impl Peer {
    /// Create an unjoined peer.
    #[must_use]
    pub fn new(id: String, transport: RpcTransport) -> Self {
        Self {
            id,
            transport,
            session: PeerSession::Unjoined,
            resources: MediaResources::default(),
        }
    }

    /// Joined-only state, when joined.
    #[must_use]
    pub fn joined(&self) -> Option<&JoinedSession> {
        match &self.session {
            PeerSession::Unjoined => None,
            PeerSession::Joined(session) => Some(session),
        }
    }

    /// Mutable joined-only state, when joined.
    pub fn joined_mut(&mut self) -> Option<&mut JoinedSession> {
        match &mut self.session {
            PeerSession::Unjoined => None,
            PeerSession::Joined(session) => Some(session),
        }
    }

    /// Whether the peer has joined.
    #[must_use]
    pub fn is_joined(&self) -> bool {
        matches!(self.session, PeerSession::Joined(_))
    }

    /// Summary for peer lists; `None` for unjoined peers.
    #[must_use]
    pub fn summary(&self) -> Option<PeerSummary> {
        self.joined().map(|session| PeerSummary {
            id: self.id.clone(),
            display_name: session.display_name.clone(),
            device: session.device.clone(),
        })
    }
}

/// A participant without a signaling connection, managed via administrative
/// calls only.
pub struct Broadcaster {
    /// Broadcaster id.
    pub id: String,
    /// Display name shown to other participants.
    pub display_name: String,
    /// Device description (flagged as broadcaster).
    pub device: Value,
    /// RTP capabilities, `Null` when the broadcaster only produces.
    pub rtp_capabilities: Value,
    /// Media resources rooted at this broadcaster.
    pub resources: MediaResources,
}

impl Broadcaster {
    /// Summary for peer lists.
    #[must_use]
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            device: self.device.clone(),
        }
    }
}
