//! Option and parameter types for engine operations.
//!
//! Negotiation blobs (ICE/DTLS/SCTP parameters, RTP capabilities, stats) are
//! opaque `serde_json::Value`s: the controller relays them between endpoint
//! and engine without interpreting them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Media kind of a producer or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio stream
    Audio,
    /// Video stream
    Video,
}

impl MediaKind {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Settings for spawning a worker process.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Worker log level ("debug", "warn", ...).
    pub log_level: String,
    /// Worker log tags.
    pub log_tags: Vec<String>,
    /// Lower bound of the RTC port range.
    pub rtc_min_port: u16,
    /// Upper bound of the RTC port range.
    pub rtc_max_port: u16,
}

/// Options for creating a WebRTC transport.
#[derive(Debug, Clone)]
pub struct WebRtcTransportOptions {
    /// Local listening IP.
    pub listen_ip: String,
    /// IP announced to remote endpoints, when different from `listen_ip`.
    pub announced_ip: Option<String>,
    /// Offer UDP candidates.
    pub enable_udp: bool,
    /// Offer TCP candidates.
    pub enable_tcp: bool,
    /// Negotiate an SCTP association (data channels).
    pub enable_sctp: bool,
    /// Requested SCTP stream counts, as provided by the endpoint.
    pub num_sctp_streams: Option<Value>,
    /// Maximum SCTP message size in bytes.
    pub max_sctp_message_size: u32,
    /// Initial outgoing bitrate estimate.
    pub initial_available_outgoing_bitrate: u32,
    /// Application data attached to the transport.
    pub app_data: Value,
}

/// Options for creating a plain RTP transport.
#[derive(Debug, Clone)]
pub struct PlainTransportOptions {
    /// Local listening IP.
    pub listen_ip: String,
    /// IP announced to remote endpoints, when different from `listen_ip`.
    pub announced_ip: Option<String>,
    /// Multiplex RTCP on the RTP port.
    pub rtcp_mux: bool,
    /// Learn the remote address from the first received packet.
    pub comedia: bool,
    /// Maximum SCTP message size in bytes.
    pub max_sctp_message_size: u32,
    /// Application data attached to the transport.
    pub app_data: Value,
}

/// Options for creating a direct (in-process) transport.
#[derive(Debug, Clone)]
pub struct DirectTransportOptions {
    /// Maximum message size in bytes.
    pub max_message_size: u32,
    /// Application data attached to the transport.
    pub app_data: Value,
}

/// Options for creating an audio-level observer.
#[derive(Debug, Clone)]
pub struct AudioLevelObserverOptions {
    /// Number of loudest producers reported per interval.
    pub max_entries: u16,
    /// Minimum volume in dBvo to be reported.
    pub threshold: i16,
    /// Reporting interval in milliseconds.
    pub interval_ms: u32,
}

/// Negotiation parameters of a created transport.
#[derive(Debug, Clone)]
pub enum TransportInfo {
    /// WebRTC transport parameters.
    WebRtc {
        /// ICE parameters.
        ice_parameters: Value,
        /// ICE candidate list.
        ice_candidates: Value,
        /// DTLS parameters.
        dtls_parameters: Value,
        /// SCTP parameters, `Null` when SCTP is disabled.
        sctp_parameters: Value,
    },
    /// Plain RTP transport parameters.
    Plain {
        /// Local RTP IP.
        local_ip: String,
        /// Local RTP port.
        local_port: u16,
        /// Local RTCP port when RTCP-mux is off.
        rtcp_port: Option<u16>,
    },
    /// Direct transport; nothing to negotiate.
    Direct,
}

/// Options for creating a producer.
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    /// Media kind.
    pub kind: MediaKind,
    /// RTP send parameters from the endpoint.
    pub rtp_parameters: Value,
    /// Create the producer paused.
    pub paused: bool,
    /// Application data attached to the producer.
    pub app_data: Value,
}

/// Options for creating a consumer.
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Producer to consume.
    pub producer_id: String,
    /// RTP capabilities of the consuming endpoint.
    pub rtp_capabilities: Value,
    /// Create the consumer paused.
    pub paused: bool,
    /// Enable retransmission streams.
    pub enable_rtx: bool,
    /// Ignore DTX silence.
    pub ignore_dtx: bool,
    /// Application data attached to the consumer.
    pub app_data: Value,
}

/// Options for creating a data producer.
#[derive(Debug, Clone)]
pub struct DataProduceOptions {
    /// Channel label.
    pub label: String,
    /// Channel subprotocol.
    pub protocol: String,
    /// SCTP stream parameters from the endpoint.
    pub sctp_stream_parameters: Value,
    /// Application data attached to the data producer.
    pub app_data: Value,
}
