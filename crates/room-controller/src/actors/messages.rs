//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply patterns use `tokio::sync::oneshot`.

use crate::actors::room::RoomHandle;
use crate::errors::RoomError;
use crate::rpc::RpcTransport;

use media_engine::events::{
    ConsumerEvent, DataConsumerEvent, ObserverEvent, ProducerEvent, TransportEvent,
};
use media_engine::types::MediaKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

fn default_true() -> bool {
    true
}

/// Session parameters supplied with a `join` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Display name shown to other participants.
    pub display_name: String,
    /// Opaque device description.
    #[serde(default)]
    pub device: Value,
    /// RTP capabilities of the endpoint.
    #[serde(default)]
    pub rtp_capabilities: Value,
    /// SCTP capabilities of the endpoint, `Null` when data channels are
    /// unsupported.
    #[serde(default)]
    pub sctp_capabilities: Value,
}

/// Parameters for `createWebRtcTransport`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebRtcTransportRequest {
    /// Restrict ICE candidates to TCP.
    #[serde(default)]
    pub force_tcp: bool,
    /// The endpoint will send media over this transport.
    #[serde(default)]
    pub producing: bool,
    /// The endpoint will receive media over this transport.
    #[serde(default)]
    pub consuming: bool,
    /// Endpoint SCTP capabilities; enables SCTP when present.
    #[serde(default)]
    pub sctp_capabilities: Value,
}

/// Parameters for `connectWebRtcTransport`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectWebRtcTransportRequest {
    /// Transport to connect.
    pub transport_id: String,
    /// Remote DTLS parameters.
    pub dtls_parameters: Value,
}

/// Parameters for `produce`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    /// Transport carrying the new producer.
    pub transport_id: String,
    /// Media kind.
    pub kind: MediaKind,
    /// RTP send parameters.
    pub rtp_parameters: Value,
    /// Application data attached to the producer.
    #[serde(default)]
    pub app_data: Value,
}

/// Parameters for `produceData`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceDataRequest {
    /// Transport carrying the new data producer.
    pub transport_id: String,
    /// Channel label.
    #[serde(default)]
    pub label: String,
    /// Channel subprotocol.
    #[serde(default)]
    pub protocol: String,
    /// SCTP stream parameters.
    #[serde(default)]
    pub sctp_stream_parameters: Value,
    /// Application data attached to the data producer.
    #[serde(default)]
    pub app_data: Value,
}

/// Parameters for the network-throttle operations.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkThrottleRequest {
    /// Uplink limit in kbps.
    #[serde(default)]
    pub uplink: Option<u32>,
    /// Downlink limit in kbps.
    #[serde(default)]
    pub downlink: Option<u32>,
    /// Added round-trip time in ms.
    #[serde(default)]
    pub rtt: Option<u32>,
    /// Packet loss percentage.
    #[serde(default)]
    pub packet_loss: Option<u32>,
}

/// Parameters for creating a broadcaster.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBroadcasterRequest {
    /// Broadcaster id.
    pub id: String,
    /// Descriptive name.
    pub display_name: String,
    /// Device info; `name` is required.
    #[serde(default)]
    pub device: Value,
    /// RTP capabilities; enables the consumable-producer bootstrap list.
    #[serde(default)]
    pub rtp_capabilities: Value,
}

/// Transport flavor for a broadcaster transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcasterTransportType {
    /// WebRTC transport.
    Webrtc,
    /// Plain RTP transport.
    Plain,
}

/// Parameters for creating a broadcaster transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBroadcasterTransportRequest {
    /// Transport flavor.
    #[serde(rename = "type")]
    pub transport_type: BroadcasterTransportType,
    /// Plain transports only: multiplex RTCP.
    #[serde(default)]
    pub rtcp_mux: bool,
    /// Plain transports only: learn the remote address from the first packet.
    #[serde(default = "default_true")]
    pub comedia: bool,
    /// Endpoint SCTP capabilities; enables SCTP when present.
    #[serde(default)]
    pub sctp_capabilities: Value,
}

/// Parameters for creating a broadcaster producer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBroadcasterProducerRequest {
    /// Media kind.
    pub kind: MediaKind,
    /// RTP send parameters.
    pub rtp_parameters: Value,
}

/// Parameters for creating a broadcaster data producer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBroadcasterDataProducerRequest {
    /// Channel label.
    #[serde(default)]
    pub label: String,
    /// Channel subprotocol.
    #[serde(default)]
    pub protocol: String,
    /// SCTP stream parameters.
    #[serde(default)]
    pub sctp_stream_parameters: Value,
    /// Application data attached to the data producer.
    #[serde(default)]
    pub app_data: Value,
}

/// Short participant description returned in peer lists.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    /// Participant id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Opaque device description.
    pub device: Value,
}

/// Result of a `join` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResult {
    /// Already-joined participants, excluding the caller.
    pub peers: Vec<PeerSummary>,
}

/// Result of `createWebRtcTransport`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportCreated {
    /// Transport id.
    pub id: String,
    /// ICE parameters.
    pub ice_parameters: Value,
    /// ICE candidates.
    pub ice_candidates: Value,
    /// DTLS parameters.
    pub dtls_parameters: Value,
    /// SCTP parameters, `Null` when SCTP is disabled.
    pub sctp_parameters: Value,
}

/// Result of `produce`/`produceData` and the broadcaster equivalents.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerCreated {
    /// Created resource id.
    pub id: String,
}

/// Producer description in a broadcaster bootstrap list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSummary {
    /// Producer id.
    pub id: String,
    /// Media kind.
    pub kind: String,
}

/// Participant entry in a broadcaster bootstrap list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterPeerInfo {
    /// Participant id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Opaque device description.
    pub device: Value,
    /// Producers the broadcaster can consume.
    pub producers: Vec<ProducerSummary>,
}

/// Result of `createBroadcaster`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterCreated {
    /// Joined participants and their consumable producers.
    pub peers: Vec<BroadcasterPeerInfo>,
}

/// Result of creating a broadcaster consumer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterConsumerCreated {
    /// Consumer id.
    pub id: String,
    /// Consumed producer id.
    pub producer_id: String,
    /// Media kind.
    pub kind: String,
    /// RTP receive parameters.
    pub rtp_parameters: Value,
    /// Consumer type.
    #[serde(rename = "type")]
    pub consumer_type: String,
}

/// Result of creating a broadcaster data consumer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterDataConsumerCreated {
    /// Data consumer id.
    pub id: String,
    /// SCTP stream id.
    pub stream_id: Value,
}

/// Room state snapshot for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct RoomStatus {
    /// Room id.
    pub room_id: String,
    /// Engine router id.
    pub router_id: String,
    /// All connected peer ids.
    pub peer_ids: Vec<String>,
    /// Joined peer ids.
    pub joined_peer_ids: Vec<String>,
    /// Broadcaster ids.
    pub broadcaster_ids: Vec<String>,
    /// Room creation timestamp (unix seconds).
    pub created_at: i64,
    /// Whether the room has been torn down.
    pub closed: bool,
}

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Register a new signaling connection for a peer id, evicting a live
    /// peer with the same id first.
    HandleConnection {
        peer_id: String,
        outbound: mpsc::UnboundedSender<String>,
        respond_to: oneshot::Sender<Result<RpcTransport, RoomError>>,
    },

    /// The signaling connection for a peer has closed.
    PeerClosed { peer_id: String },

    /// Router RTP capabilities for client-side negotiation.
    RouterRtpCapabilities {
        respond_to: oneshot::Sender<Result<Value, RoomError>>,
    },

    /// A peer joins the room.
    Join {
        peer_id: String,
        request: JoinRequest,
        respond_to: oneshot::Sender<Result<JoinResult, RoomError>>,
    },

    /// Create a WebRTC transport for a (possibly unjoined) peer.
    CreateWebRtcTransport {
        peer_id: String,
        request: CreateWebRtcTransportRequest,
        respond_to: oneshot::Sender<Result<TransportCreated, RoomError>>,
    },

    /// Provide remote DTLS parameters for a transport.
    ConnectWebRtcTransport {
        peer_id: String,
        request: ConnectWebRtcTransportRequest,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Restart ICE on a transport.
    RestartIce {
        peer_id: String,
        transport_id: String,
        respond_to: oneshot::Sender<Result<Value, RoomError>>,
    },

    /// Create a producer.
    Produce {
        peer_id: String,
        request: ProduceRequest,
        respond_to: oneshot::Sender<Result<ProducerCreated, RoomError>>,
    },

    /// Create a data producer.
    ProduceData {
        peer_id: String,
        request: ProduceDataRequest,
        respond_to: oneshot::Sender<Result<ProducerCreated, RoomError>>,
    },

    /// Pause a consumer.
    PauseConsumer {
        peer_id: String,
        consumer_id: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Resume a consumer.
    ResumeConsumer {
        peer_id: String,
        consumer_id: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Request a key frame on a consumer.
    RequestConsumerKeyFrame {
        peer_id: String,
        consumer_id: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Change the caller's display name.
    ChangeDisplayName {
        peer_id: String,
        display_name: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Transport statistics.
    TransportStats {
        peer_id: String,
        transport_id: String,
        respond_to: oneshot::Sender<Result<Value, RoomError>>,
    },

    /// Producer statistics.
    ProducerStats {
        peer_id: String,
        producer_id: String,
        respond_to: oneshot::Sender<Result<Value, RoomError>>,
    },

    /// Consumer statistics.
    ConsumerStats {
        peer_id: String,
        consumer_id: String,
        respond_to: oneshot::Sender<Result<Value, RoomError>>,
    },

    /// Data-producer statistics.
    DataProducerStats {
        peer_id: String,
        data_producer_id: String,
        respond_to: oneshot::Sender<Result<Value, RoomError>>,
    },

    /// Data-consumer statistics.
    DataConsumerStats {
        peer_id: String,
        data_consumer_id: String,
        respond_to: oneshot::Sender<Result<Value, RoomError>>,
    },

    /// Apply a network throttle (log-only).
    ApplyNetworkThrottle {
        peer_id: String,
        request: NetworkThrottleRequest,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Reset the network throttle (log-only).
    ResetNetworkThrottle {
        peer_id: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Create a broadcaster.
    CreateBroadcaster {
        request: CreateBroadcasterRequest,
        respond_to: oneshot::Sender<Result<BroadcasterCreated, RoomError>>,
    },

    /// Delete a broadcaster.
    DeleteBroadcaster {
        broadcaster_id: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Create a broadcaster transport.
    CreateBroadcasterTransport {
        broadcaster_id: String,
        request: CreateBroadcasterTransportRequest,
        respond_to: oneshot::Sender<Result<Value, RoomError>>,
    },

    /// Connect a broadcaster WebRTC transport.
    ConnectBroadcasterTransport {
        broadcaster_id: String,
        transport_id: String,
        dtls_parameters: Value,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Create a broadcaster producer.
    CreateBroadcasterProducer {
        broadcaster_id: String,
        transport_id: String,
        request: CreateBroadcasterProducerRequest,
        respond_to: oneshot::Sender<Result<ProducerCreated, RoomError>>,
    },

    /// Create a broadcaster consumer.
    CreateBroadcasterConsumer {
        broadcaster_id: String,
        transport_id: String,
        producer_id: String,
        respond_to: oneshot::Sender<Result<BroadcasterConsumerCreated, RoomError>>,
    },

    /// Create a broadcaster data producer.
    CreateBroadcasterDataProducer {
        broadcaster_id: String,
        transport_id: String,
        request: CreateBroadcasterDataProducerRequest,
        respond_to: oneshot::Sender<Result<ProducerCreated, RoomError>>,
    },

    /// Create a broadcaster data consumer.
    CreateBroadcasterDataConsumer {
        broadcaster_id: String,
        transport_id: String,
        data_producer_id: String,
        respond_to: oneshot::Sender<Result<BroadcasterDataConsumerCreated, RoomError>>,
    },

    /// Room state snapshot.
    GetStatus {
        respond_to: oneshot::Sender<RoomStatus>,
    },

    /// A consuming peer acknowledged a `newConsumer` call; resume the
    /// server-side consumer.
    ConsumerAcknowledged {
        peer_id: String,
        consumer_id: String,
    },

    /// Engine producer lifecycle event.
    ProducerEvent {
        peer_id: String,
        producer_id: String,
        event: ProducerEvent,
    },

    /// Engine consumer lifecycle event.
    ConsumerEvent {
        peer_id: String,
        consumer_id: String,
        event: ConsumerEvent,
    },

    /// Engine data-consumer lifecycle event.
    DataConsumerEvent {
        peer_id: String,
        data_consumer_id: String,
        event: DataConsumerEvent,
    },

    /// Engine transport lifecycle event for a peer transport.
    PeerTransportEvent {
        peer_id: String,
        transport_id: String,
        event: TransportEvent,
    },

    /// Audio observer event.
    AudioObserverEvent { event: ObserverEvent },

    /// A message arrived on the bot's data consumer for a peer data producer.
    BotMessage {
        peer_id: String,
        payload: String,
        ppid: u32,
    },
}

/// Manager status snapshot.
#[derive(Debug, Clone)]
pub struct ManagerStatus {
    /// Ids of live rooms.
    pub rooms: Vec<String>,
    /// Pids of the worker pool.
    pub worker_pids: Vec<u32>,
    /// Whether a shutdown is in progress.
    pub shutting_down: bool,
}

/// Messages sent to the `RoomManagerActor`.
#[derive(Debug)]
pub enum ManagerMessage {
    /// Resolve or lazily create the room for a room id.
    GetOrCreateRoom {
        room_id: String,
        respond_to: oneshot::Sender<Result<RoomHandle, RoomError>>,
    },

    /// A room's peer registry became empty and the room tore itself down.
    RoomClosed { room_id: String },

    /// A media worker process died unexpectedly.
    WorkerDied { pid: u32 },

    /// Manager status snapshot.
    GetStatus {
        respond_to: oneshot::Sender<ManagerStatus>,
    },

    /// Initiate graceful shutdown.
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}
