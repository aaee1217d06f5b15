//! Typed lifecycle events emitted by engine resources.
//!
//! Each resource exposes a take-once event stream instead of an ambient
//! emitter; the consumer wires the stream into its own mailbox.

use serde_json::Value;

/// ICE connectivity state of a WebRTC transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    /// Gathering not started
    New,
    /// Connectivity checks succeeded
    Connected,
    /// All checks finished
    Completed,
    /// Connectivity lost
    Disconnected,
    /// ICE terminated
    Closed,
}

/// DTLS handshake state of a WebRTC transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsState {
    /// Handshake not started
    New,
    /// Handshake in progress
    Connecting,
    /// Handshake completed
    Connected,
    /// Handshake failed
    Failed,
    /// DTLS terminated
    Closed,
}

/// Events emitted by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// ICE state changed.
    IceStateChange(IceState),
    /// DTLS state changed.
    DtlsStateChange(DtlsState),
    /// SCTP state changed.
    SctpStateChange(String),
    /// Trace record (e.g. bandwidth-estimation probes).
    Trace(Value),
}

/// Events emitted by a producer.
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    /// Stream quality score changed.
    Score(Value),
    /// Video orientation changed on the sending device.
    VideoOrientationChange(Value),
    /// Trace record.
    Trace(Value),
}

/// Events emitted by a consumer.
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// The consumed producer was closed.
    ProducerClose,
    /// The consumed producer was paused.
    ProducerPause,
    /// The consumed producer was resumed.
    ProducerResume,
    /// Stream quality score changed.
    Score(Value),
    /// Active simulcast/SVC layers changed; `None` when no layer is active.
    LayersChange(Option<ConsumerLayers>),
    /// Trace record.
    Trace(Value),
}

/// Active layers of a simulcast/SVC consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerLayers {
    /// Spatial layer index.
    pub spatial_layer: u8,
    /// Temporal layer index, when applicable.
    pub temporal_layer: Option<u8>,
}

/// Events emitted by a data consumer.
#[derive(Debug, Clone)]
pub enum DataConsumerEvent {
    /// The consumed data producer was closed.
    DataProducerClose,
    /// A message arrived on the channel.
    Message {
        /// Message body.
        payload: String,
        /// SCTP payload protocol identifier (51 = WebRTC string).
        ppid: u32,
    },
}

/// Events emitted by an audio observer.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    /// Volume report for the loudest producer.
    Volumes {
        /// Producer id.
        producer_id: String,
        /// Volume in dBvo.
        volume: i16,
    },
    /// No audible producer in the last interval.
    Silence,
    /// Dominant speaker changed.
    DominantSpeaker {
        /// Producer id.
        producer_id: String,
    },
}
