//! Media-engine collaborator interface.
//!
//! The room controller never routes packets itself; it drives an external
//! media engine through the factory operations and lifecycle events defined
//! here. Every operation is asynchronous and fallible, and resources are
//! correlated by their string ids.
//!
//! Closing a transport does NOT cascade to the producers and consumers
//! created on it; the caller owns that cascade explicitly as part of its
//! peer/room teardown path.
//!
//! [`loopback::LoopbackEngine`] is the in-process implementation used by the
//! binary in standalone signaling mode and by the integration tests.

#![warn(clippy::pedantic)]

pub mod events;
pub mod loopback;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use events::{ConsumerEvent, DataConsumerEvent, ObserverEvent, ProducerEvent, TransportEvent};
use types::{
    AudioLevelObserverOptions, ConsumeOptions, DataProduceOptions, DirectTransportOptions,
    MediaKind, PlainTransportOptions, ProduceOptions, TransportInfo, WebRtcTransportOptions,
    WorkerSettings,
};

/// Error type for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Referenced resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Operation on a closed resource
    #[error("resource closed: {0}")]
    Closed(String),

    /// Invalid option or parameter
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Engine-internal failure
    #[error("engine failure: {0}")]
    Internal(String),
}

/// Entry point to a media engine: a factory of worker processes.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Engine implementation version, announced to connecting peers.
    fn version(&self) -> String;

    /// Spawn a media worker process.
    async fn create_worker(
        &self,
        settings: &WorkerSettings,
    ) -> Result<Arc<dyn MediaWorker>, EngineError>;
}

/// A media worker process. One worker hosts many routers simultaneously.
#[async_trait]
pub trait MediaWorker: Send + Sync {
    /// Process id of the worker.
    fn pid(&self) -> u32;

    /// Token cancelled when the worker process dies unexpectedly.
    ///
    /// A deliberate [`close`](MediaWorker::close) does not fire it.
    fn died(&self) -> CancellationToken;

    /// Create a router on this worker.
    async fn create_router(
        &self,
        media_codecs: Vec<Value>,
    ) -> Result<Arc<dyn MediaRouter>, EngineError>;

    /// Terminate the worker process.
    fn close(&self);
}

/// A media router: the packet-relay domain of one room.
#[async_trait]
pub trait MediaRouter: Send + Sync {
    /// Router id.
    fn id(&self) -> String;

    /// RTP capabilities a client must negotiate against.
    fn rtp_capabilities(&self) -> Value;

    /// Whether an endpoint with the given capabilities can consume the
    /// given producer.
    fn can_consume(&self, producer_id: &str, rtp_capabilities: &Value) -> bool;

    /// Create a WebRTC transport.
    async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, EngineError>;

    /// Create a plain RTP transport (legacy endpoints).
    async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, EngineError>;

    /// Create a direct (in-process) transport.
    async fn create_direct_transport(
        &self,
        options: DirectTransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, EngineError>;

    /// Create an audio-level observer.
    async fn create_audio_level_observer(
        &self,
        options: AudioLevelObserverOptions,
    ) -> Result<Arc<dyn MediaObserver>, EngineError>;

    /// Create an active-speaker observer.
    async fn create_active_speaker_observer(&self) -> Result<Arc<dyn MediaObserver>, EngineError>;

    /// Close the router.
    fn close(&self);
}

/// A negotiated network path carrying producers and consumers.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Transport id.
    fn id(&self) -> String;

    /// Negotiation parameters for the remote endpoint.
    fn info(&self) -> TransportInfo;

    /// Take the transport's event stream. Yields `None` after the first call.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Provide the remote DTLS parameters.
    async fn connect(&self, dtls_parameters: Value) -> Result<(), EngineError>;

    /// Limit the incoming bitrate on this transport.
    async fn set_max_incoming_bitrate(&self, bitrate: u32) -> Result<(), EngineError>;

    /// Restart ICE; returns fresh ICE parameters.
    async fn restart_ice(&self) -> Result<Value, EngineError>;

    /// Create a producer (outbound media stream from the endpoint).
    async fn produce(&self, options: ProduceOptions) -> Result<Arc<dyn MediaProducer>, EngineError>;

    /// Create a consumer (inbound media stream towards the endpoint).
    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn MediaConsumer>, EngineError>;

    /// Create a data producer (application data channel from the endpoint).
    async fn produce_data(
        &self,
        options: DataProduceOptions,
    ) -> Result<Arc<dyn MediaDataProducer>, EngineError>;

    /// Create a data consumer for an existing data producer.
    async fn consume_data(
        &self,
        data_producer_id: &str,
    ) -> Result<Arc<dyn MediaDataConsumer>, EngineError>;

    /// Transport statistics.
    async fn get_stats(&self) -> Result<Value, EngineError>;

    /// Close the transport. Does not cascade to producers/consumers.
    fn close(&self);
}

/// An outbound media stream handle.
#[async_trait]
pub trait MediaProducer: Send + Sync {
    /// Producer id.
    fn id(&self) -> String;

    /// Media kind.
    fn kind(&self) -> MediaKind;

    /// Application data attached at creation.
    fn app_data(&self) -> Value;

    /// Take the producer's event stream. Yields `None` after the first call.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<ProducerEvent>>;

    /// Producer statistics.
    async fn get_stats(&self) -> Result<Value, EngineError>;

    /// Close the producer.
    fn close(&self);
}

/// An inbound media stream handle.
#[async_trait]
pub trait MediaConsumer: Send + Sync {
    /// Consumer id.
    fn id(&self) -> String;

    /// Id of the producer being consumed.
    fn producer_id(&self) -> String;

    /// Media kind.
    fn kind(&self) -> MediaKind;

    /// RTP parameters the consuming endpoint must apply.
    fn rtp_parameters(&self) -> Value;

    /// Consumer type ("simple", "simulcast", ...).
    fn consumer_type(&self) -> String;

    /// Whether the consumed producer is currently paused.
    fn producer_paused(&self) -> bool;

    /// Current consumer score.
    fn score(&self) -> Value;

    /// Take the consumer's event stream. Yields `None` after the first call.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<ConsumerEvent>>;

    /// Pause delivery towards the endpoint.
    async fn pause(&self) -> Result<(), EngineError>;

    /// Resume delivery towards the endpoint.
    async fn resume(&self) -> Result<(), EngineError>;

    /// Ask the producer for a key frame.
    async fn request_key_frame(&self) -> Result<(), EngineError>;

    /// Consumer statistics.
    async fn get_stats(&self) -> Result<Value, EngineError>;

    /// Close the consumer.
    fn close(&self);
}

/// An application data channel source handle.
#[async_trait]
pub trait MediaDataProducer: Send + Sync {
    /// Data producer id.
    fn id(&self) -> String;

    /// Channel label.
    fn label(&self) -> String;

    /// Channel subprotocol.
    fn protocol(&self) -> String;

    /// SCTP stream parameters.
    fn sctp_stream_parameters(&self) -> Value;

    /// Application data attached at creation.
    fn app_data(&self) -> Value;

    /// Send a string message into the channel.
    async fn send(&self, payload: &str) -> Result<(), EngineError>;

    /// Data producer statistics.
    async fn get_stats(&self) -> Result<Value, EngineError>;

    /// Close the data producer.
    fn close(&self);
}

/// An application data channel sink handle.
#[async_trait]
pub trait MediaDataConsumer: Send + Sync {
    /// Data consumer id.
    fn id(&self) -> String;

    /// Id of the data producer being consumed.
    fn data_producer_id(&self) -> String;

    /// Channel label.
    fn label(&self) -> String;

    /// Channel subprotocol.
    fn protocol(&self) -> String;

    /// SCTP stream parameters, including the stream id.
    fn sctp_stream_parameters(&self) -> Value;

    /// Take the data consumer's event stream. Yields `None` after the first
    /// call.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<DataConsumerEvent>>;

    /// Data consumer statistics.
    async fn get_stats(&self) -> Result<Value, EngineError>;

    /// Close the data consumer.
    fn close(&self);
}

/// An audio-level or active-speaker observer.
#[async_trait]
pub trait MediaObserver: Send + Sync {
    /// Register a producer with the observer.
    async fn add_producer(&self, producer_id: &str) -> Result<(), EngineError>;

    /// Take the observer's event stream. Yields `None` after the first call.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<ObserverEvent>>;

    /// Close the observer.
    fn close(&self);
}
