//! `RoomActor` - per-room actor that owns all room state.
//!
//! Each `RoomActor`:
//! - Owns one engine router, the peer registry and the broadcaster map
//! - Serves every RPC method of the signaling protocol
//! - Runs the producer/consumer creation protocols
//! - Owns the explicit resource-close cascade on peer and room teardown
//!
//! All map mutations happen inside the actor. Remote calls that must not
//! block the mailbox (`newConsumer`, `newDataConsumer`) run in spawned tasks
//! and report back via actor messages, so a half-created consumer is never
//! visible to a concurrently running handler.
//!
//! A room is torn down exactly once, when its peer registry becomes empty.
//! Broadcasters never keep a room alive.

use crate::actors::messages::{
    BroadcasterConsumerCreated, BroadcasterCreated, BroadcasterDataConsumerCreated,
    BroadcasterPeerInfo, BroadcasterTransportType, ConnectWebRtcTransportRequest,
    CreateBroadcasterDataProducerRequest, CreateBroadcasterProducerRequest,
    CreateBroadcasterRequest, CreateBroadcasterTransportRequest, CreateWebRtcTransportRequest,
    JoinRequest, JoinResult, ManagerMessage, NetworkThrottleRequest, PeerSummary, ProduceDataRequest,
    ProduceRequest, ProducerCreated, ProducerSummary, RoomMessage, RoomStatus, TransportCreated,
};
use crate::actors::peer::{
    Broadcaster, ConsumerRecord, DataConsumerRecord, DataProducerRecord, JoinedSession,
    MediaResources, Peer, PeerSession, ProducerRecord, TransportRecord,
};
use crate::bot::Bot;
use crate::config::Config;
use crate::errors::RoomError;
use crate::handlers;
use crate::rpc::{MethodRegistry, RoomDispatcher, RpcOutcome, RpcTransport};

use media_engine::events::{
    ConsumerEvent, DataConsumerEvent, DtlsState, IceState, ObserverEvent, ProducerEvent,
    TransportEvent,
};
use media_engine::types::{
    AudioLevelObserverOptions, ConsumeOptions, DataProduceOptions, MediaKind,
    PlainTransportOptions, ProduceOptions, TransportInfo, WebRtcTransportOptions,
};
use media_engine::{
    MediaConsumer, MediaDataConsumer, MediaDataProducer, MediaObserver, MediaProducer,
    MediaRouter, MediaTransport, MediaWorker,
};

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
}

impl RoomHandle {
    /// Get the room ID.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Token cancelled when the room is torn down.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Whether the room has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        message: RoomMessage,
        rx: oneshot::Receiver<Result<T, RoomError>>,
    ) -> Result<T, RoomError> {
        self.sender.send(message).await.map_err(RoomError::mailbox)?;
        rx.await.map_err(RoomError::mailbox)?
    }

    /// Register a new signaling connection, evicting a live peer with the
    /// same id first. Returns the connection's RPC transport.
    pub async fn handle_connection(
        &self,
        peer_id: String,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Result<RpcTransport, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::HandleConnection {
                peer_id,
                outbound,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Notify the room that a peer's signaling connection closed.
    pub async fn peer_closed(&self, peer_id: String) {
        let _ = self.sender.send(RoomMessage::PeerClosed { peer_id }).await;
    }

    /// Router RTP capabilities.
    pub async fn router_rtp_capabilities(&self) -> Result<Value, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomMessage::RouterRtpCapabilities { respond_to: tx }, rx)
            .await
    }

    /// Join a peer into the room.
    pub async fn join(&self, peer_id: String, request: JoinRequest) -> Result<JoinResult, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::Join {
                peer_id,
                request,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Create a WebRTC transport for a peer.
    pub async fn create_webrtc_transport(
        &self,
        peer_id: String,
        request: CreateWebRtcTransportRequest,
    ) -> Result<TransportCreated, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::CreateWebRtcTransport {
                peer_id,
                request,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Connect a peer WebRTC transport.
    pub async fn connect_webrtc_transport(
        &self,
        peer_id: String,
        request: ConnectWebRtcTransportRequest,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::ConnectWebRtcTransport {
                peer_id,
                request,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Restart ICE on a peer transport.
    pub async fn restart_ice(
        &self,
        peer_id: String,
        transport_id: String,
    ) -> Result<Value, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::RestartIce {
                peer_id,
                transport_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Create a producer for a peer.
    pub async fn produce(
        &self,
        peer_id: String,
        request: ProduceRequest,
    ) -> Result<ProducerCreated, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::Produce {
                peer_id,
                request,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Create a data producer for a peer.
    pub async fn produce_data(
        &self,
        peer_id: String,
        request: ProduceDataRequest,
    ) -> Result<ProducerCreated, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::ProduceData {
                peer_id,
                request,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Pause a peer consumer.
    pub async fn pause_consumer(
        &self,
        peer_id: String,
        consumer_id: String,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::PauseConsumer {
                peer_id,
                consumer_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Resume a peer consumer.
    pub async fn resume_consumer(
        &self,
        peer_id: String,
        consumer_id: String,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::ResumeConsumer {
                peer_id,
                consumer_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Request a key frame on a peer consumer.
    pub async fn request_consumer_key_frame(
        &self,
        peer_id: String,
        consumer_id: String,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::RequestConsumerKeyFrame {
                peer_id,
                consumer_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Change a peer's display name.
    pub async fn change_display_name(
        &self,
        peer_id: String,
        display_name: String,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::ChangeDisplayName {
                peer_id,
                display_name,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Transport statistics.
    pub async fn transport_stats(
        &self,
        peer_id: String,
        transport_id: String,
    ) -> Result<Value, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::TransportStats {
                peer_id,
                transport_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Producer statistics.
    pub async fn producer_stats(
        &self,
        peer_id: String,
        producer_id: String,
    ) -> Result<Value, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::ProducerStats {
                peer_id,
                producer_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Consumer statistics.
    pub async fn consumer_stats(
        &self,
        peer_id: String,
        consumer_id: String,
    ) -> Result<Value, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::ConsumerStats {
                peer_id,
                consumer_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Data-producer statistics.
    pub async fn data_producer_stats(
        &self,
        peer_id: String,
        data_producer_id: String,
    ) -> Result<Value, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::DataProducerStats {
                peer_id,
                data_producer_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Data-consumer statistics.
    pub async fn data_consumer_stats(
        &self,
        peer_id: String,
        data_consumer_id: String,
    ) -> Result<Value, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::DataConsumerStats {
                peer_id,
                data_consumer_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Apply a network throttle (log-only).
    pub async fn apply_network_throttle(
        &self,
        peer_id: String,
        request: NetworkThrottleRequest,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::ApplyNetworkThrottle {
                peer_id,
                request,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Reset the network throttle (log-only).
    pub async fn reset_network_throttle(&self, peer_id: String) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::ResetNetworkThrottle {
                peer_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Create a broadcaster.
    pub async fn create_broadcaster(
        &self,
        request: CreateBroadcasterRequest,
    ) -> Result<BroadcasterCreated, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::CreateBroadcaster {
                request,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Delete a broadcaster.
    pub async fn delete_broadcaster(&self, broadcaster_id: String) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::DeleteBroadcaster {
                broadcaster_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Create a broadcaster transport.
    pub async fn create_broadcaster_transport(
        &self,
        broadcaster_id: String,
        request: CreateBroadcasterTransportRequest,
    ) -> Result<Value, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::CreateBroadcasterTransport {
                broadcaster_id,
                request,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Connect a broadcaster WebRTC transport.
    pub async fn connect_broadcaster_transport(
        &self,
        broadcaster_id: String,
        transport_id: String,
        dtls_parameters: Value,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::ConnectBroadcasterTransport {
                broadcaster_id,
                transport_id,
                dtls_parameters,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Create a broadcaster producer.
    pub async fn create_broadcaster_producer(
        &self,
        broadcaster_id: String,
        transport_id: String,
        request: CreateBroadcasterProducerRequest,
    ) -> Result<ProducerCreated, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::CreateBroadcasterProducer {
                broadcaster_id,
                transport_id,
                request,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Create a broadcaster consumer.
    pub async fn create_broadcaster_consumer(
        &self,
        broadcaster_id: String,
        transport_id: String,
        producer_id: String,
    ) -> Result<BroadcasterConsumerCreated, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::CreateBroadcasterConsumer {
                broadcaster_id,
                transport_id,
                producer_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Create a broadcaster data producer.
    pub async fn create_broadcaster_data_producer(
        &self,
        broadcaster_id: String,
        transport_id: String,
        request: CreateBroadcasterDataProducerRequest,
    ) -> Result<ProducerCreated, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::CreateBroadcasterDataProducer {
                broadcaster_id,
                transport_id,
                request,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Create a broadcaster data consumer.
    pub async fn create_broadcaster_data_consumer(
        &self,
        broadcaster_id: String,
        transport_id: String,
        data_producer_id: String,
    ) -> Result<BroadcasterDataConsumerCreated, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomMessage::CreateBroadcasterDataConsumer {
                broadcaster_id,
                transport_id,
                data_producer_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Room state snapshot.
    pub async fn status(&self) -> Result<RoomStatus, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetStatus { respond_to: tx })
            .await
            .map_err(RoomError::mailbox)?;
        rx.await.map_err(RoomError::mailbox)
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: String,
    receiver: mpsc::Receiver<RoomMessage>,
    self_sender: mpsc::Sender<RoomMessage>,
    handle: RoomHandle,
    manager: mpsc::Sender<ManagerMessage>,
    cancel_token: CancellationToken,
    config: Arc<Config>,
    engine_version: String,
    router: Arc<dyn MediaRouter>,
    audio_level_observer: Arc<dyn MediaObserver>,
    active_speaker_observer: Arc<dyn MediaObserver>,
    bot: Bot,
    registry: Arc<MethodRegistry>,
    peers: HashMap<String, Peer>,
    broadcasters: HashMap<String, Broadcaster>,
    consumer_replicas: u32,
    network_throttled: bool,
    created_at: i64,
    closed: bool,
}

impl RoomActor {
    /// Create the room's engine resources and spawn the actor.
    pub async fn create(
        room_id: String,
        worker: Arc<dyn MediaWorker>,
        config: Arc<Config>,
        engine_version: String,
        manager: mpsc::Sender<ManagerMessage>,
        cancel_token: CancellationToken,
    ) -> Result<RoomHandle, RoomError> {
        info!(target: "room.actor", room_id = %room_id, "creating room");

        let router = worker.create_router(config.media_codecs.clone()).await?;

        let audio_level_observer = router
            .create_audio_level_observer(AudioLevelObserverOptions {
                max_entries: 1,
                threshold: -80,
                interval_ms: 800,
            })
            .await?;

        let active_speaker_observer = router.create_active_speaker_observer().await?;

        let bot = Bot::create(&router).await?;

        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let handle = RoomHandle {
            sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            room_id: room_id.clone(),
        };

        spawn_observer_watcher(&audio_level_observer, sender.clone());
        spawn_observer_watcher(&active_speaker_observer, sender.clone());

        let actor = Self {
            room_id,
            receiver,
            self_sender: sender,
            handle: handle.clone(),
            manager,
            cancel_token,
            consumer_replicas: config.consumer_replicas,
            config,
            engine_version,
            router,
            audio_level_observer,
            active_speaker_observer,
            bot,
            registry: Arc::new(handlers::build_registry()),
            peers: HashMap::new(),
            broadcasters: HashMap::new(),
            network_throttled: false,
            created_at: chrono::Utc::now().timestamp(),
            closed: false,
        };

        tokio::spawn(actor.run());

        Ok(handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "room.actor", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(target: "room.actor", room_id = %self.room_id, "RoomActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.close_room("cancelled").await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            if self.closed {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        info!(target: "room.actor", room_id = %self.room_id, "RoomActor stopped");
    }

    #[allow(clippy::too_many_lines)] // one arm per protocol operation
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::HandleConnection {
                peer_id,
                outbound,
                respond_to,
            } => {
                let result = self.handle_connection(peer_id, outbound).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::PeerClosed { peer_id } => {
                self.close_peer(&peer_id, "connection closed");
                self.maybe_close_when_empty().await;
            }

            RoomMessage::RouterRtpCapabilities { respond_to } => {
                let _ = respond_to.send(Ok(self.router.rtp_capabilities()));
            }

            RoomMessage::Join {
                peer_id,
                request,
                respond_to,
            } => {
                let result = self.join(&peer_id, request).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::CreateWebRtcTransport {
                peer_id,
                request,
                respond_to,
            } => {
                let result = self.create_webrtc_transport(&peer_id, request).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectWebRtcTransport {
                peer_id,
                request,
                respond_to,
            } => {
                let result = self.connect_webrtc_transport(&peer_id, request).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::RestartIce {
                peer_id,
                transport_id,
                respond_to,
            } => {
                let result = match self.peer_transport(&peer_id, &transport_id) {
                    Ok(transport) => transport.restart_ice().await.map_err(Into::into),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::Produce {
                peer_id,
                request,
                respond_to,
            } => {
                let result = self.produce(&peer_id, request).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ProduceData {
                peer_id,
                request,
                respond_to,
            } => {
                let result = self.produce_data(&peer_id, request).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::PauseConsumer {
                peer_id,
                consumer_id,
                respond_to,
            } => {
                let result = match self.joined_peer_consumer(&peer_id, &consumer_id) {
                    Ok(consumer) => consumer.pause().await.map_err(Into::into),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::ResumeConsumer {
                peer_id,
                consumer_id,
                respond_to,
            } => {
                let result = match self.joined_peer_consumer(&peer_id, &consumer_id) {
                    Ok(consumer) => consumer.resume().await.map_err(Into::into),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::RequestConsumerKeyFrame {
                peer_id,
                consumer_id,
                respond_to,
            } => {
                let result = match self.joined_peer_consumer(&peer_id, &consumer_id) {
                    Ok(consumer) => consumer.request_key_frame().await.map_err(Into::into),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::ChangeDisplayName {
                peer_id,
                display_name,
                respond_to,
            } => {
                let result = self.change_display_name(&peer_id, display_name);
                let _ = respond_to.send(result);
            }

            RoomMessage::TransportStats {
                peer_id,
                transport_id,
                respond_to,
            } => {
                let result = match self.peer_transport(&peer_id, &transport_id) {
                    Ok(transport) => transport.get_stats().await.map_err(Into::into),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::ProducerStats {
                peer_id,
                producer_id,
                respond_to,
            } => {
                let result = match self.peer_producer(&peer_id, &producer_id) {
                    Ok(producer) => producer.get_stats().await.map_err(Into::into),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::ConsumerStats {
                peer_id,
                consumer_id,
                respond_to,
            } => {
                let result = match self.peer_consumer(&peer_id, &consumer_id) {
                    Ok(consumer) => consumer.get_stats().await.map_err(Into::into),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::DataProducerStats {
                peer_id,
                data_producer_id,
                respond_to,
            } => {
                let result = match self.peer_data_producer(&peer_id, &data_producer_id) {
                    Ok(data_producer) => data_producer.get_stats().await.map_err(Into::into),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::DataConsumerStats {
                peer_id,
                data_consumer_id,
                respond_to,
            } => {
                let result = match self.peer_data_consumer(&peer_id, &data_consumer_id) {
                    Ok(data_consumer) => data_consumer.get_stats().await.map_err(Into::into),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::ApplyNetworkThrottle {
                peer_id,
                request,
                respond_to,
            } => {
                let _ = respond_to.send(self.apply_network_throttle(&peer_id, &request));
            }

            RoomMessage::ResetNetworkThrottle {
                peer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.reset_network_throttle(&peer_id));
            }

            RoomMessage::CreateBroadcaster {
                request,
                respond_to,
            } => {
                let _ = respond_to.send(self.create_broadcaster(request));
            }

            RoomMessage::DeleteBroadcaster {
                broadcaster_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.delete_broadcaster(&broadcaster_id));
            }

            RoomMessage::CreateBroadcasterTransport {
                broadcaster_id,
                request,
                respond_to,
            } => {
                let result = self
                    .create_broadcaster_transport(&broadcaster_id, request)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectBroadcasterTransport {
                broadcaster_id,
                transport_id,
                dtls_parameters,
                respond_to,
            } => {
                let result = match self.broadcaster_transport(&broadcaster_id, &transport_id) {
                    Ok(transport) => transport.connect(dtls_parameters).await.map_err(Into::into),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::CreateBroadcasterProducer {
                broadcaster_id,
                transport_id,
                request,
                respond_to,
            } => {
                let result = self
                    .create_broadcaster_producer(&broadcaster_id, &transport_id, request)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::CreateBroadcasterConsumer {
                broadcaster_id,
                transport_id,
                producer_id,
                respond_to,
            } => {
                let result = self
                    .create_broadcaster_consumer(&broadcaster_id, &transport_id, &producer_id)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::CreateBroadcasterDataProducer {
                broadcaster_id,
                transport_id,
                request,
                respond_to,
            } => {
                let result = self
                    .create_broadcaster_data_producer(&broadcaster_id, &transport_id, request)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::CreateBroadcasterDataConsumer {
                broadcaster_id,
                transport_id,
                data_producer_id,
                respond_to,
            } => {
                let result = self
                    .create_broadcaster_data_consumer(
                        &broadcaster_id,
                        &transport_id,
                        &data_producer_id,
                    )
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            RoomMessage::ConsumerAcknowledged {
                peer_id,
                consumer_id,
            } => {
                self.consumer_acknowledged(&peer_id, &consumer_id).await;
            }

            RoomMessage::ProducerEvent {
                peer_id,
                producer_id,
                event,
            } => {
                self.producer_event(&peer_id, &producer_id, event);
            }

            RoomMessage::ConsumerEvent {
                peer_id,
                consumer_id,
                event,
            } => {
                self.consumer_event(&peer_id, &consumer_id, event);
            }

            RoomMessage::DataConsumerEvent {
                peer_id,
                data_consumer_id,
                event,
            } => {
                self.data_consumer_event(&peer_id, &data_consumer_id, event);
            }

            RoomMessage::PeerTransportEvent {
                peer_id,
                transport_id,
                event,
            } => {
                self.peer_transport_event(&peer_id, &transport_id, event).await;
            }

            RoomMessage::AudioObserverEvent { event } => {
                self.audio_observer_event(event);
            }

            RoomMessage::BotMessage {
                peer_id,
                payload,
                ppid,
            } => {
                self.bot_message(&peer_id, &payload, ppid).await;
            }
        }
    }

    async fn handle_connection(
        &mut self,
        peer_id: String,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Result<RpcTransport, RoomError> {
        if self.closed {
            return Err(RoomError::RoomClosed);
        }

        if peer_id.is_empty() {
            return Err(RoomError::InvalidRequest("peerId must not be empty".to_string()));
        }

        if self.peers.contains_key(&peer_id) {
            warn!(
                target: "room.actor",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "peer with same id already connected, evicting it"
            );
            self.close_peer(&peer_id, "evicted");
        }

        let dispatcher = Arc::new(RoomDispatcher::new(
            Arc::clone(&self.registry),
            self.handle.clone(),
            peer_id.clone(),
        ));
        let transport = RpcTransport::new(peer_id.clone(), outbound, dispatcher);

        transport.notify("serverVersion", json!({"version": self.engine_version}));

        self.peers
            .insert(peer_id.clone(), Peer::new(peer_id.clone(), transport.clone()));

        info!(
            target: "room.actor",
            room_id = %self.room_id,
            peer_id = %peer_id,
            peers = self.peers.len(),
            "peer connected"
        );

        Ok(transport)
    }

    /// Remove a peer and run the explicit close cascade. Does not close the
    /// room; callers decide whether an empty registry tears it down.
    fn close_peer(&mut self, peer_id: &str, reason: &str) {
        let Some(peer) = self.peers.remove(peer_id) else {
            return;
        };

        info!(
            target: "room.actor",
            room_id = %self.room_id,
            peer_id = %peer_id,
            reason,
            "closing peer"
        );

        if peer.is_joined() && !self.closed {
            self.notify_joined_peers_except(peer_id, "peerClosed", json!({"peerId": peer_id}));
        }

        self.teardown_resources(peer.resources);
        peer.transport.close();
    }

    /// Explicitly close every resource rooted at one participant, then the
    /// consumers other participants hold on its producers. The engine does
    /// not cascade; this is the sole owner of that responsibility.
    fn teardown_resources(&mut self, resources: MediaResources) {
        for record in resources.data_consumers.values() {
            record.handle.close();
        }
        for (data_producer_id, record) in &resources.data_producers {
            record.handle.close();
            self.close_dependent_data_consumers(data_producer_id);
        }
        for record in resources.consumers.values() {
            record.handle.close();
        }
        for (producer_id, record) in &resources.producers {
            record.handle.close();
            self.close_dependent_consumers(producer_id);
        }
        for record in resources.transports.values() {
            record.handle.close();
        }
    }

    fn close_dependent_consumers(&mut self, producer_id: &str) {
        for peer in self.peers.values_mut() {
            let consumer_ids: Vec<String> = peer
                .resources
                .consumers
                .iter()
                .filter(|(_, record)| record.producer_id == producer_id)
                .map(|(id, _)| id.clone())
                .collect();

            for consumer_id in consumer_ids {
                if let Some(record) = peer.resources.consumers.remove(&consumer_id) {
                    record.handle.close();
                    peer.transport
                        .notify("consumerClosed", json!({"consumerId": consumer_id}));
                }
            }
        }

        for broadcaster in self.broadcasters.values_mut() {
            broadcaster
                .resources
                .consumers
                .retain(|_, record| {
                    if record.producer_id == producer_id {
                        record.handle.close();
                        false
                    } else {
                        true
                    }
                });
        }
    }

    fn close_dependent_data_consumers(&mut self, data_producer_id: &str) {
        for peer in self.peers.values_mut() {
            let data_consumer_ids: Vec<String> = peer
                .resources
                .data_consumers
                .iter()
                .filter(|(_, record)| record.data_producer_id == data_producer_id)
                .map(|(id, _)| id.clone())
                .collect();

            for data_consumer_id in data_consumer_ids {
                if let Some(record) = peer.resources.data_consumers.remove(&data_consumer_id) {
                    record.handle.close();
                    peer.transport.notify(
                        "dataConsumerClosed",
                        json!({"dataConsumerId": data_consumer_id}),
                    );
                }
            }
        }

        for broadcaster in self.broadcasters.values_mut() {
            broadcaster.resources.data_consumers.retain(|_, record| {
                if record.data_producer_id == data_producer_id {
                    record.handle.close();
                    false
                } else {
                    true
                }
            });
        }
    }

    async fn maybe_close_when_empty(&mut self) {
        if !self.closed && self.peers.is_empty() {
            info!(
                target: "room.actor",
                room_id = %self.room_id,
                "last peer in the room left, closing the room"
            );
            self.close_room("last peer left").await;
        }
    }

    async fn close_room(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;

        info!(target: "room.actor", room_id = %self.room_id, reason, "closing room");

        let peers = std::mem::take(&mut self.peers);
        for peer in peers.into_values() {
            close_resources_quietly(&peer.resources);
            peer.transport.close();
        }

        let broadcasters = std::mem::take(&mut self.broadcasters);
        for broadcaster in broadcasters.into_values() {
            close_resources_quietly(&broadcaster.resources);
        }

        self.bot.close();
        self.audio_level_observer.close();
        self.active_speaker_observer.close();
        self.router.close();

        if self.network_throttled {
            debug!(target: "room.actor", room_id = %self.room_id, "stopping network throttle");
        }

        let _ = self
            .manager
            .send(ManagerMessage::RoomClosed {
                room_id: self.room_id.clone(),
            })
            .await;

        self.cancel_token.cancel();
    }

    async fn join(&mut self, peer_id: &str, request: JoinRequest) -> Result<JoinResult, RoomError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;

        if peer.is_joined() {
            return Err(RoomError::AlreadyJoined);
        }

        peer.session = PeerSession::Joined(JoinedSession {
            display_name: request.display_name,
            device: request.device,
            rtp_capabilities: request.rtp_capabilities,
            sctp_capabilities: request.sctp_capabilities,
        });

        // Already-joined participants (and broadcasters), excluding the caller.
        let peer_infos: Vec<PeerSummary> = self
            .peers
            .values()
            .filter(|other| other.id != peer_id)
            .filter_map(Peer::summary)
            .chain(self.broadcasters.values().map(Broadcaster::summary))
            .collect();

        // Existing producers the new peer should consume.
        let mut producer_refs: Vec<(String, String)> = Vec::new();
        let mut data_producer_refs: Vec<(String, String)> = Vec::new();
        for other in self.peers.values() {
            if other.id == peer_id || !other.is_joined() {
                continue;
            }
            for producer_id in other.resources.producers.keys() {
                producer_refs.push((other.id.clone(), producer_id.clone()));
            }
            for (data_producer_id, record) in &other.resources.data_producers {
                if record.label == "bot" {
                    continue;
                }
                data_producer_refs.push((other.id.clone(), data_producer_id.clone()));
            }
        }
        for broadcaster in self.broadcasters.values() {
            for producer_id in broadcaster.resources.producers.keys() {
                producer_refs.push((broadcaster.id.clone(), producer_id.clone()));
            }
            for data_producer_id in broadcaster.resources.data_producers.keys() {
                data_producer_refs.push((broadcaster.id.clone(), data_producer_id.clone()));
            }
        }

        for (owner_id, producer_id) in producer_refs {
            self.create_consumer(peer_id, &owner_id, &producer_id).await;
        }
        for (owner_id, data_producer_id) in data_producer_refs {
            self.create_data_consumer(peer_id, Some(&owner_id), &data_producer_id)
                .await;
        }

        // The bot's data producer is added through its dedicated path.
        let bot_data_producer_id = self.bot.data_producer_id();
        self.create_data_consumer(peer_id, None, &bot_data_producer_id)
            .await;

        if let Some(summary) = self.peers.get(peer_id).and_then(Peer::summary) {
            self.notify_joined_peers_except(
                peer_id,
                "newPeer",
                json!({
                    "id": summary.id,
                    "displayName": summary.display_name,
                    "device": summary.device,
                }),
            );
        }

        info!(
            target: "room.actor",
            room_id = %self.room_id,
            peer_id = %peer_id,
            peers = self.peers.len(),
            "peer joined"
        );

        Ok(JoinResult { peers: peer_infos })
    }

    async fn create_webrtc_transport(
        &mut self,
        peer_id: &str,
        request: CreateWebRtcTransportRequest,
    ) -> Result<TransportCreated, RoomError> {
        // Unjoined peers may create transports so they are ready when they
        // later join.
        if !self.peers.contains_key(peer_id) {
            return Err(RoomError::PeerNotFound(peer_id.to_string()));
        }

        let options = WebRtcTransportOptions {
            listen_ip: self.config.rtc_listen_ip.clone(),
            announced_ip: self.config.rtc_announced_ip.clone(),
            enable_udp: !request.force_tcp,
            enable_tcp: true,
            enable_sctp: !request.sctp_capabilities.is_null(),
            num_sctp_streams: request.sctp_capabilities.get("numStreams").cloned(),
            max_sctp_message_size: self.config.max_sctp_message_size,
            initial_available_outgoing_bitrate: self.config.initial_available_outgoing_bitrate,
            app_data: json!({
                "producing": request.producing,
                "consuming": request.consuming,
            }),
        };

        let transport = self.router.create_webrtc_transport(options).await?;
        let transport_id = transport.id();

        self.spawn_transport_watcher(peer_id, &transport);

        if let Some(bitrate) = self.config.max_incoming_bitrate {
            if let Err(error) = transport.set_max_incoming_bitrate(bitrate).await {
                debug!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    %error,
                    "setMaxIncomingBitrate failed"
                );
            }
        }

        let info = transport.info();

        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        peer.resources.transports.insert(
            transport_id.clone(),
            TransportRecord {
                handle: transport,
                producing: request.producing,
                consuming: request.consuming,
            },
        );

        match info {
            TransportInfo::WebRtc {
                ice_parameters,
                ice_candidates,
                dtls_parameters,
                sctp_parameters,
            } => Ok(TransportCreated {
                id: transport_id,
                ice_parameters,
                ice_candidates,
                dtls_parameters,
                sctp_parameters,
            }),
            TransportInfo::Plain { .. } | TransportInfo::Direct => Err(RoomError::Internal(
                "engine returned a non-WebRTC transport".to_string(),
            )),
        }
    }

    async fn connect_webrtc_transport(
        &mut self,
        peer_id: &str,
        request: ConnectWebRtcTransportRequest,
    ) -> Result<(), RoomError> {
        let transport = self.peer_transport(peer_id, &request.transport_id)?;
        transport.connect(request.dtls_parameters).await?;
        Ok(())
    }

    async fn produce(
        &mut self,
        peer_id: &str,
        request: ProduceRequest,
    ) -> Result<ProducerCreated, RoomError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        if !peer.is_joined() {
            return Err(RoomError::NotJoined);
        }

        let transport = peer
            .resources
            .transports
            .get(&request.transport_id)
            .map(|record| Arc::clone(&record.handle))
            .ok_or_else(|| RoomError::TransportNotFound(request.transport_id.clone()))?;

        // Carry the peer id in appData so observer events can be attributed.
        let mut app_data = match request.app_data {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        app_data.insert("peerId".to_string(), Value::from(peer_id));

        let producer = transport
            .produce(ProduceOptions {
                kind: request.kind,
                rtp_parameters: request.rtp_parameters,
                paused: false,
                app_data: Value::Object(app_data),
            })
            .await?;
        let producer_id = producer.id();

        self.spawn_producer_watcher(peer_id, &producer);

        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        peer.resources.producers.insert(
            producer_id.clone(),
            ProducerRecord {
                handle: Arc::clone(&producer),
            },
        );

        // Optimization: eagerly create a server-side consumer on every other
        // joined peer.
        let other_peer_ids: Vec<String> = self
            .peers
            .values()
            .filter(|other| other.id != peer_id && other.is_joined())
            .map(|other| other.id.clone())
            .collect();
        for other_id in other_peer_ids {
            self.create_consumer(&other_id, peer_id, &producer_id).await;
        }

        if request.kind == MediaKind::Audio {
            let _ = self.audio_level_observer.add_producer(&producer_id).await;
            let _ = self
                .active_speaker_observer
                .add_producer(&producer_id)
                .await;
        }

        Ok(ProducerCreated { id: producer_id })
    }

    async fn produce_data(
        &mut self,
        peer_id: &str,
        request: ProduceDataRequest,
    ) -> Result<ProducerCreated, RoomError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        if !peer.is_joined() {
            return Err(RoomError::NotJoined);
        }

        let transport = peer
            .resources
            .transports
            .get(&request.transport_id)
            .map(|record| Arc::clone(&record.handle))
            .ok_or_else(|| RoomError::TransportNotFound(request.transport_id.clone()))?;

        let data_producer = transport
            .produce_data(DataProduceOptions {
                label: request.label.clone(),
                protocol: request.protocol,
                sctp_stream_parameters: request.sctp_stream_parameters,
                app_data: request.app_data,
            })
            .await?;
        let data_producer_id = data_producer.id();

        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        peer.resources.data_producers.insert(
            data_producer_id.clone(),
            DataProducerRecord {
                handle: data_producer,
                label: request.label,
            },
        );

        let other_peer_ids: Vec<String> = self
            .peers
            .values()
            .filter(|other| other.id != peer_id && other.is_joined())
            .map(|other| other.id.clone())
            .collect();
        for other_id in other_peer_ids {
            self.create_data_consumer(&other_id, Some(peer_id), &data_producer_id)
                .await;
        }

        // Attach the bot so it can echo this peer's messages.
        match self.bot.handle_peer_data_producer(&data_producer_id).await {
            Ok(events) => self.spawn_bot_watcher(peer_id, events),
            Err(error) => {
                warn!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    %error,
                    "bot could not attach to data producer"
                );
            }
        }

        Ok(ProducerCreated {
            id: data_producer_id,
        })
    }

    /// The consumer-creation protocol.
    ///
    /// Consumers are created paused, announced to the endpoint over a
    /// correlated `newConsumer` call and only resumed server-side once that
    /// call resolves; resuming earlier can make the endpoint fail to
    /// associate the incoming stream. A rejected call leaves the consumer
    /// stored and paused.
    async fn create_consumer(
        &mut self,
        consumer_peer_id: &str,
        producer_owner_id: &str,
        producer_id: &str,
    ) {
        // Skip silently when the peer cannot consume; this is not an error.
        let Some(consumer_peer) = self.peers.get(consumer_peer_id) else {
            return;
        };
        let Some(session) = consumer_peer.joined() else {
            return;
        };
        let rtp_capabilities = session.rtp_capabilities.clone();
        if !self.router.can_consume(producer_id, &rtp_capabilities) {
            return;
        }

        let Some(transport) = consumer_peer
            .resources
            .consuming_transport()
            .map(|record| Arc::clone(&record.handle))
        else {
            warn!(
                target: "room.actor",
                room_id = %self.room_id,
                peer_id = %consumer_peer_id,
                "transport for consuming not found"
            );
            return;
        };

        let producer_app_data = self.producer_app_data(producer_owner_id, producer_id);
        let consumer_count = 1 + self.consumer_replicas;

        for _ in 0..consumer_count {
            let consumer = match transport
                .consume(ConsumeOptions {
                    producer_id: producer_id.to_string(),
                    rtp_capabilities: rtp_capabilities.clone(),
                    paused: true,
                    enable_rtx: true,
                    ignore_dtx: true,
                    app_data: Value::Null,
                })
                .await
            {
                Ok(consumer) => consumer,
                Err(error) => {
                    warn!(
                        target: "room.actor",
                        room_id = %self.room_id,
                        %error,
                        "transport.consume() failed"
                    );
                    continue;
                }
            };

            let consumer_id = consumer.id();

            let Some(consumer_peer) = self.peers.get_mut(consumer_peer_id) else {
                consumer.close();
                return;
            };
            consumer_peer.resources.consumers.insert(
                consumer_id.clone(),
                ConsumerRecord {
                    handle: Arc::clone(&consumer),
                    producer_id: producer_id.to_string(),
                },
            );
            let rpc = consumer_peer.transport.clone();

            self.spawn_consumer_watcher(consumer_peer_id, &consumer);

            let params = json!({
                "peerId": producer_owner_id,
                "producerId": producer_id,
                "id": consumer_id,
                "kind": consumer.kind().as_str(),
                "rtpParameters": consumer.rtp_parameters(),
                "type": consumer.consumer_type(),
                "appData": producer_app_data,
                "producerPaused": consumer.producer_paused(),
            });

            let self_sender = self.self_sender.clone();
            let ack_peer_id = consumer_peer_id.to_string();
            tokio::spawn(async move {
                match rpc.call("newConsumer", vec![params]).await {
                    RpcOutcome::Success { .. } => {
                        let _ = self_sender
                            .send(RoomMessage::ConsumerAcknowledged {
                                peer_id: ack_peer_id,
                                consumer_id,
                            })
                            .await;
                    }
                    RpcOutcome::Error { code, message } => {
                        warn!(
                            target: "room.actor",
                            code,
                            %message,
                            "newConsumer request failed, consumer left paused"
                        );
                    }
                }
            });
        }
    }

    /// The data-consumer creation protocol: single-phase, no pause/resume
    /// two-step.
    async fn create_data_consumer(
        &mut self,
        consumer_peer_id: &str,
        producer_owner_id: Option<&str>,
        data_producer_id: &str,
    ) {
        let Some(consumer_peer) = self.peers.get(consumer_peer_id) else {
            return;
        };
        let Some(session) = consumer_peer.joined() else {
            return;
        };
        if session.sctp_capabilities.is_null() {
            return;
        }

        let Some(transport) = consumer_peer
            .resources
            .consuming_transport()
            .map(|record| Arc::clone(&record.handle))
        else {
            warn!(
                target: "room.actor",
                room_id = %self.room_id,
                peer_id = %consumer_peer_id,
                "transport for consuming not found"
            );
            return;
        };

        let data_consumer = match transport.consume_data(data_producer_id).await {
            Ok(data_consumer) => data_consumer,
            Err(error) => {
                warn!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    %error,
                    "transport.consumeData() failed"
                );
                return;
            }
        };

        let data_consumer_id = data_consumer.id();
        let app_data = producer_owner_id
            .and_then(|owner| self.find_data_producer(owner, data_producer_id))
            .map_or(Value::Null, |handle| handle.app_data());

        let Some(consumer_peer) = self.peers.get_mut(consumer_peer_id) else {
            data_consumer.close();
            return;
        };
        consumer_peer.resources.data_consumers.insert(
            data_consumer_id.clone(),
            DataConsumerRecord {
                handle: Arc::clone(&data_consumer),
                data_producer_id: data_producer_id.to_string(),
            },
        );
        let rpc = consumer_peer.transport.clone();

        self.spawn_data_consumer_watcher(consumer_peer_id, &data_consumer);

        let params = json!({
            // Null identifies the bot's data producer.
            "peerId": producer_owner_id.map_or(Value::Null, Value::from),
            "dataProducerId": data_producer_id,
            "id": data_consumer_id,
            "sctpStreamParameters": data_consumer.sctp_stream_parameters(),
            "label": data_consumer.label(),
            "protocol": data_consumer.protocol(),
            "appData": app_data,
        });

        tokio::spawn(async move {
            if let RpcOutcome::Error { code, message } =
                rpc.call("newDataConsumer", vec![params]).await
            {
                warn!(
                    target: "room.actor",
                    code,
                    %message,
                    "newDataConsumer request failed"
                );
            }
        });
    }

    async fn consumer_acknowledged(&mut self, peer_id: &str, consumer_id: &str) {
        let Some(peer) = self.peers.get(peer_id) else {
            return;
        };
        let Some(record) = peer.resources.consumers.get(consumer_id) else {
            return;
        };

        match record.handle.resume().await {
            Ok(()) => {
                peer.transport.notify(
                    "consumerScore",
                    json!({"consumerId": consumer_id, "score": record.handle.score()}),
                );
            }
            Err(error) => {
                warn!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    %error,
                    "consumer resume failed"
                );
            }
        }
    }

    fn change_display_name(
        &mut self,
        peer_id: &str,
        display_name: String,
    ) -> Result<(), RoomError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        let session = peer.joined_mut().ok_or(RoomError::NotJoined)?;

        let old_display_name = std::mem::replace(&mut session.display_name, display_name.clone());

        self.notify_joined_peers_except(
            peer_id,
            "peerDisplayNameChanged",
            json!({
                "peerId": peer_id,
                "displayName": display_name,
                "oldDisplayName": old_display_name,
            }),
        );

        Ok(())
    }

    fn apply_network_throttle(
        &mut self,
        peer_id: &str,
        request: &NetworkThrottleRequest,
    ) -> Result<(), RoomError> {
        const DEFAULT_UPLINK: u32 = 1_000_000;
        const DEFAULT_DOWNLINK: u32 = 1_000_000;

        if !self.peers.contains_key(peer_id) {
            return Err(RoomError::PeerNotFound(peer_id.to_string()));
        }

        // The throttling backend is disabled; keep the log-only behavior.
        self.network_throttled = true;
        warn!(
            target: "room.actor",
            room_id = %self.room_id,
            uplink = request.uplink.unwrap_or(DEFAULT_UPLINK),
            downlink = request.downlink.unwrap_or(DEFAULT_DOWNLINK),
            rtt = request.rtt.unwrap_or(0),
            packet_loss = request.packet_loss.unwrap_or(0),
            "network throttle set"
        );

        Ok(())
    }

    fn reset_network_throttle(&mut self, peer_id: &str) -> Result<(), RoomError> {
        if !self.peers.contains_key(peer_id) {
            return Err(RoomError::PeerNotFound(peer_id.to_string()));
        }

        self.network_throttled = false;
        warn!(target: "room.actor", room_id = %self.room_id, "network throttle stopped");
        Ok(())
    }

    fn create_broadcaster(
        &mut self,
        request: CreateBroadcasterRequest,
    ) -> Result<BroadcasterCreated, RoomError> {
        if request.id.is_empty() {
            return Err(RoomError::InvalidRequest("missing body.id".to_string()));
        }
        if request.display_name.is_empty() {
            return Err(RoomError::InvalidRequest(
                "missing body.displayName".to_string(),
            ));
        }
        let device_name = request
            .device
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RoomError::InvalidRequest("missing body.device.name".to_string()))?
            .to_string();

        if self.broadcasters.contains_key(&request.id) {
            return Err(RoomError::BroadcasterExists(request.id));
        }

        let device = json!({
            "flag": "broadcaster",
            "name": device_name,
            "version": request.device.get("version").cloned().unwrap_or(Value::Null),
        });

        let broadcaster = Broadcaster {
            id: request.id.clone(),
            display_name: request.display_name,
            device,
            rtp_capabilities: request.rtp_capabilities,
            resources: MediaResources::default(),
        };

        self.notify_joined_peers(
            "newPeer",
            json!({
                "id": broadcaster.id,
                "displayName": broadcaster.display_name,
                "device": broadcaster.device,
            }),
        );

        // Reply with joined peers and the producers this broadcaster can
        // consume, so an HTTP-originated consumer can bootstrap without a
        // handshake.
        let mut peer_infos = Vec::new();
        if !broadcaster.rtp_capabilities.is_null() {
            for peer in self.peers.values() {
                let Some(summary) = peer.summary() else {
                    continue;
                };
                let producers: Vec<ProducerSummary> = peer
                    .resources
                    .producers
                    .iter()
                    .filter(|(producer_id, _)| {
                        self.router
                            .can_consume(producer_id, &broadcaster.rtp_capabilities)
                    })
                    .map(|(producer_id, record)| ProducerSummary {
                        id: producer_id.clone(),
                        kind: record.handle.kind().as_str().to_string(),
                    })
                    .collect();

                peer_infos.push(BroadcasterPeerInfo {
                    id: summary.id,
                    display_name: summary.display_name,
                    device: summary.device,
                    producers,
                });
            }
        }

        info!(
            target: "room.actor",
            room_id = %self.room_id,
            broadcaster_id = %broadcaster.id,
            "broadcaster created"
        );

        self.broadcasters
            .insert(broadcaster.id.clone(), broadcaster);

        Ok(BroadcasterCreated { peers: peer_infos })
    }

    fn delete_broadcaster(&mut self, broadcaster_id: &str) -> Result<(), RoomError> {
        let broadcaster = self
            .broadcasters
            .remove(broadcaster_id)
            .ok_or_else(|| RoomError::BroadcasterNotFound(broadcaster_id.to_string()))?;

        self.teardown_resources(broadcaster.resources);

        self.notify_joined_peers("peerClosed", json!({"peerId": broadcaster_id}));

        info!(
            target: "room.actor",
            room_id = %self.room_id,
            broadcaster_id = %broadcaster_id,
            "broadcaster deleted"
        );

        Ok(())
    }

    async fn create_broadcaster_transport(
        &mut self,
        broadcaster_id: &str,
        request: CreateBroadcasterTransportRequest,
    ) -> Result<Value, RoomError> {
        if !self.broadcasters.contains_key(broadcaster_id) {
            return Err(RoomError::BroadcasterNotFound(broadcaster_id.to_string()));
        }

        match request.transport_type {
            BroadcasterTransportType::Webrtc => {
                let options = WebRtcTransportOptions {
                    listen_ip: self.config.rtc_listen_ip.clone(),
                    announced_ip: self.config.rtc_announced_ip.clone(),
                    enable_udp: true,
                    enable_tcp: true,
                    enable_sctp: !request.sctp_capabilities.is_null(),
                    num_sctp_streams: request.sctp_capabilities.get("numStreams").cloned(),
                    max_sctp_message_size: self.config.max_sctp_message_size,
                    initial_available_outgoing_bitrate: self
                        .config
                        .initial_available_outgoing_bitrate,
                    app_data: Value::Null,
                };

                let transport = self.router.create_webrtc_transport(options).await?;
                let transport_id = transport.id();
                let info = transport.info();

                self.insert_broadcaster_transport(broadcaster_id, transport)?;

                match info {
                    TransportInfo::WebRtc {
                        ice_parameters,
                        ice_candidates,
                        dtls_parameters,
                        sctp_parameters,
                    } => Ok(json!({
                        "id": transport_id,
                        "iceParameters": ice_parameters,
                        "iceCandidates": ice_candidates,
                        "dtlsParameters": dtls_parameters,
                        "sctpParameters": sctp_parameters,
                    })),
                    TransportInfo::Plain { .. } | TransportInfo::Direct => Err(
                        RoomError::Internal("engine returned a non-WebRTC transport".to_string()),
                    ),
                }
            }

            BroadcasterTransportType::Plain => {
                let options = PlainTransportOptions {
                    listen_ip: self.config.rtc_listen_ip.clone(),
                    announced_ip: self.config.rtc_announced_ip.clone(),
                    rtcp_mux: request.rtcp_mux,
                    comedia: request.comedia,
                    max_sctp_message_size: self.config.max_sctp_message_size,
                    app_data: Value::Null,
                };

                let transport = self.router.create_plain_transport(options).await?;
                let transport_id = transport.id();
                let info = transport.info();

                self.insert_broadcaster_transport(broadcaster_id, transport)?;

                match info {
                    TransportInfo::Plain {
                        local_ip,
                        local_port,
                        rtcp_port,
                    } => Ok(json!({
                        "id": transport_id,
                        "ip": local_ip,
                        "port": local_port,
                        "rtcpPort": rtcp_port,
                    })),
                    TransportInfo::WebRtc { .. } | TransportInfo::Direct => Err(
                        RoomError::Internal("engine returned a non-plain transport".to_string()),
                    ),
                }
            }
        }
    }

    fn insert_broadcaster_transport(
        &mut self,
        broadcaster_id: &str,
        transport: Arc<dyn MediaTransport>,
    ) -> Result<(), RoomError> {
        let broadcaster = self
            .broadcasters
            .get_mut(broadcaster_id)
            .ok_or_else(|| RoomError::BroadcasterNotFound(broadcaster_id.to_string()))?;
        broadcaster.resources.transports.insert(
            transport.id(),
            TransportRecord {
                handle: transport,
                producing: true,
                consuming: true,
            },
        );
        Ok(())
    }

    async fn create_broadcaster_producer(
        &mut self,
        broadcaster_id: &str,
        transport_id: &str,
        request: CreateBroadcasterProducerRequest,
    ) -> Result<ProducerCreated, RoomError> {
        let transport = self.broadcaster_transport(broadcaster_id, transport_id)?;

        let producer = transport
            .produce(ProduceOptions {
                kind: request.kind,
                rtp_parameters: request.rtp_parameters,
                paused: false,
                app_data: json!({"peerId": broadcaster_id}),
            })
            .await?;
        let producer_id = producer.id();

        let broadcaster = self
            .broadcasters
            .get_mut(broadcaster_id)
            .ok_or_else(|| RoomError::BroadcasterNotFound(broadcaster_id.to_string()))?;
        broadcaster.resources.producers.insert(
            producer_id.clone(),
            ProducerRecord { handle: producer },
        );

        // Optimization: eagerly create a server-side consumer on every
        // joined peer.
        let peer_ids: Vec<String> = self
            .peers
            .values()
            .filter(|peer| peer.is_joined())
            .map(|peer| peer.id.clone())
            .collect();
        for peer_id in peer_ids {
            self.create_consumer(&peer_id, broadcaster_id, &producer_id)
                .await;
        }

        if request.kind == MediaKind::Audio {
            let _ = self.audio_level_observer.add_producer(&producer_id).await;
            let _ = self
                .active_speaker_observer
                .add_producer(&producer_id)
                .await;
        }

        Ok(ProducerCreated { id: producer_id })
    }

    async fn create_broadcaster_consumer(
        &mut self,
        broadcaster_id: &str,
        transport_id: &str,
        producer_id: &str,
    ) -> Result<BroadcasterConsumerCreated, RoomError> {
        let broadcaster = self
            .broadcasters
            .get(broadcaster_id)
            .ok_or_else(|| RoomError::BroadcasterNotFound(broadcaster_id.to_string()))?;
        if broadcaster.rtp_capabilities.is_null() {
            return Err(RoomError::InvalidRequest(
                "broadcaster does not have rtpCapabilities".to_string(),
            ));
        }
        let rtp_capabilities = broadcaster.rtp_capabilities.clone();

        let transport = self.broadcaster_transport(broadcaster_id, transport_id)?;

        let consumer = transport
            .consume(ConsumeOptions {
                producer_id: producer_id.to_string(),
                rtp_capabilities,
                paused: false,
                enable_rtx: true,
                ignore_dtx: false,
                app_data: Value::Null,
            })
            .await?;
        let consumer_id = consumer.id();

        let broadcaster = self
            .broadcasters
            .get_mut(broadcaster_id)
            .ok_or_else(|| RoomError::BroadcasterNotFound(broadcaster_id.to_string()))?;
        broadcaster.resources.consumers.insert(
            consumer_id.clone(),
            ConsumerRecord {
                handle: Arc::clone(&consumer),
                producer_id: producer_id.to_string(),
            },
        );

        Ok(BroadcasterConsumerCreated {
            id: consumer_id,
            producer_id: producer_id.to_string(),
            kind: consumer.kind().as_str().to_string(),
            rtp_parameters: consumer.rtp_parameters(),
            consumer_type: consumer.consumer_type(),
        })
    }

    async fn create_broadcaster_data_producer(
        &mut self,
        broadcaster_id: &str,
        transport_id: &str,
        request: CreateBroadcasterDataProducerRequest,
    ) -> Result<ProducerCreated, RoomError> {
        let transport = self.broadcaster_transport(broadcaster_id, transport_id)?;

        let data_producer = transport
            .produce_data(DataProduceOptions {
                label: request.label.clone(),
                protocol: request.protocol,
                sctp_stream_parameters: request.sctp_stream_parameters,
                app_data: request.app_data,
            })
            .await?;
        let data_producer_id = data_producer.id();

        let broadcaster = self
            .broadcasters
            .get_mut(broadcaster_id)
            .ok_or_else(|| RoomError::BroadcasterNotFound(broadcaster_id.to_string()))?;
        broadcaster.resources.data_producers.insert(
            data_producer_id.clone(),
            DataProducerRecord {
                handle: data_producer,
                label: request.label,
            },
        );

        let peer_ids: Vec<String> = self
            .peers
            .values()
            .filter(|peer| peer.is_joined())
            .map(|peer| peer.id.clone())
            .collect();
        for peer_id in peer_ids {
            self.create_data_consumer(&peer_id, Some(broadcaster_id), &data_producer_id)
                .await;
        }

        Ok(ProducerCreated {
            id: data_producer_id,
        })
    }

    async fn create_broadcaster_data_consumer(
        &mut self,
        broadcaster_id: &str,
        transport_id: &str,
        data_producer_id: &str,
    ) -> Result<BroadcasterDataConsumerCreated, RoomError> {
        let broadcaster = self
            .broadcasters
            .get(broadcaster_id)
            .ok_or_else(|| RoomError::BroadcasterNotFound(broadcaster_id.to_string()))?;
        if broadcaster.rtp_capabilities.is_null() {
            return Err(RoomError::InvalidRequest(
                "broadcaster does not have rtpCapabilities".to_string(),
            ));
        }

        let transport = self.broadcaster_transport(broadcaster_id, transport_id)?;

        let data_consumer = transport.consume_data(data_producer_id).await?;
        let data_consumer_id = data_consumer.id();
        let stream_id = data_consumer
            .sctp_stream_parameters()
            .get("streamId")
            .cloned()
            .unwrap_or(Value::Null);

        let broadcaster = self
            .broadcasters
            .get_mut(broadcaster_id)
            .ok_or_else(|| RoomError::BroadcasterNotFound(broadcaster_id.to_string()))?;
        broadcaster.resources.data_consumers.insert(
            data_consumer_id.clone(),
            DataConsumerRecord {
                handle: data_consumer,
                data_producer_id: data_producer_id.to_string(),
            },
        );

        Ok(BroadcasterDataConsumerCreated {
            id: data_consumer_id,
            stream_id,
        })
    }

    fn status(&self) -> RoomStatus {
        let mut joined_peer_ids: Vec<String> = self
            .peers
            .values()
            .filter(|peer| peer.is_joined())
            .map(|peer| peer.id.clone())
            .collect();
        joined_peer_ids.sort();

        let mut peer_ids: Vec<String> = self.peers.keys().cloned().collect();
        peer_ids.sort();

        let mut broadcaster_ids: Vec<String> = self.broadcasters.keys().cloned().collect();
        broadcaster_ids.sort();

        RoomStatus {
            room_id: self.room_id.clone(),
            router_id: self.router.id(),
            peer_ids,
            joined_peer_ids,
            broadcaster_ids,
            created_at: self.created_at,
            closed: self.closed,
        }
    }

    fn producer_event(&mut self, peer_id: &str, producer_id: &str, event: ProducerEvent) {
        match event {
            ProducerEvent::Score(score) => {
                if let Some(peer) = self.peers.get(peer_id) {
                    peer.transport.notify(
                        "producerScore",
                        json!({"producerId": producer_id, "score": score}),
                    );
                }
            }
            ProducerEvent::VideoOrientationChange(orientation) => {
                info!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    producer_id = %producer_id,
                    ?orientation,
                    "producer video orientation changed"
                );
            }
            ProducerEvent::Trace(trace) => {
                debug!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    producer_id = %producer_id,
                    ?trace,
                    "producer trace event"
                );
            }
        }
    }

    fn consumer_event(&mut self, peer_id: &str, consumer_id: &str, event: ConsumerEvent) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };

        match event {
            ConsumerEvent::ProducerClose => {
                if let Some(record) = peer.resources.consumers.remove(consumer_id) {
                    record.handle.close();
                    peer.transport
                        .notify("consumerClosed", json!({"consumerId": consumer_id}));
                }
            }
            ConsumerEvent::ProducerPause => {
                peer.transport
                    .notify("consumerPaused", json!({"consumerId": consumer_id}));
            }
            ConsumerEvent::ProducerResume => {
                peer.transport
                    .notify("consumerResumed", json!({"consumerId": consumer_id}));
            }
            ConsumerEvent::Score(score) => {
                peer.transport.notify(
                    "consumerScore",
                    json!({"consumerId": consumer_id, "score": score}),
                );
            }
            ConsumerEvent::LayersChange(layers) => {
                peer.transport.notify(
                    "consumerLayersChanged",
                    json!({
                        "consumerId": consumer_id,
                        "spatialLayer": layers.map(|l| l.spatial_layer),
                        "temporalLayer": layers.and_then(|l| l.temporal_layer),
                    }),
                );
            }
            ConsumerEvent::Trace(trace) => {
                debug!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    consumer_id = %consumer_id,
                    ?trace,
                    "consumer trace event"
                );
            }
        }
    }

    fn data_consumer_event(
        &mut self,
        peer_id: &str,
        data_consumer_id: &str,
        event: DataConsumerEvent,
    ) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };

        match event {
            DataConsumerEvent::DataProducerClose => {
                if let Some(record) = peer.resources.data_consumers.remove(data_consumer_id) {
                    record.handle.close();
                    peer.transport.notify(
                        "dataConsumerClosed",
                        json!({"dataConsumerId": data_consumer_id}),
                    );
                }
            }
            DataConsumerEvent::Message { .. } => {
                // Peer-side data consumers deliver to the endpoint, not here.
                debug!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    data_consumer_id = %data_consumer_id,
                    "ignoring message on peer data consumer"
                );
            }
        }
    }

    async fn peer_transport_event(
        &mut self,
        peer_id: &str,
        transport_id: &str,
        event: TransportEvent,
    ) {
        match event {
            TransportEvent::IceStateChange(state) => {
                if matches!(state, IceState::Disconnected | IceState::Closed) {
                    info!(
                        target: "room.actor",
                        room_id = %self.room_id,
                        peer_id = %peer_id,
                        ?state,
                        "ICE state changed, closing peer"
                    );
                    self.close_peer(peer_id, "ice failed");
                    self.maybe_close_when_empty().await;
                } else {
                    debug!(
                        target: "room.actor",
                        room_id = %self.room_id,
                        transport_id = %transport_id,
                        ?state,
                        "ICE state changed"
                    );
                }
            }
            TransportEvent::DtlsStateChange(state) => {
                if matches!(state, DtlsState::Failed | DtlsState::Closed) {
                    warn!(
                        target: "room.actor",
                        room_id = %self.room_id,
                        peer_id = %peer_id,
                        ?state,
                        "DTLS state changed, closing peer"
                    );
                    self.close_peer(peer_id, "dtls failed");
                    self.maybe_close_when_empty().await;
                } else {
                    debug!(
                        target: "room.actor",
                        room_id = %self.room_id,
                        transport_id = %transport_id,
                        ?state,
                        "DTLS state changed"
                    );
                }
            }
            TransportEvent::SctpStateChange(state) => {
                debug!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    transport_id = %transport_id,
                    state = %state,
                    "SCTP state changed"
                );
            }
            TransportEvent::Trace(trace) => {
                debug!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    transport_id = %transport_id,
                    ?trace,
                    "transport trace event"
                );

                let is_downlink_bwe = trace.get("type").and_then(Value::as_str) == Some("bwe")
                    && trace.get("direction").and_then(Value::as_str) == Some("out");
                if is_downlink_bwe {
                    if let Some(peer) = self.peers.get(peer_id) {
                        let info = trace.get("info").cloned().unwrap_or(Value::Null);
                        peer.transport.notify(
                            "downlinkBwe",
                            json!({
                                "desiredBitrate": info.get("desiredBitrate"),
                                "effectiveDesiredBitrate": info.get("effectiveDesiredBitrate"),
                                "availableBitrate": info.get("availableBitrate"),
                            }),
                        );
                    }
                }
            }
        }
    }

    fn audio_observer_event(&mut self, event: ObserverEvent) {
        match event {
            ObserverEvent::Volumes {
                producer_id,
                volume,
            } => {
                let peer_id = self
                    .find_producer_owner(&producer_id)
                    .map_or(Value::Null, Value::from);
                self.notify_joined_peers(
                    "activeSpeaker",
                    json!({"peerId": peer_id, "volume": volume}),
                );
            }
            ObserverEvent::Silence => {
                self.notify_joined_peers("activeSpeaker", json!({"peerId": Value::Null}));
            }
            ObserverEvent::DominantSpeaker { producer_id } => {
                debug!(
                    target: "room.actor",
                    room_id = %self.room_id,
                    producer_id = %producer_id,
                    "dominant speaker changed"
                );
            }
        }
    }

    async fn bot_message(&mut self, peer_id: &str, payload: &str, ppid: u32) {
        // Only WebRTC DataChannel string messages are echoed.
        if ppid != 51 {
            warn!(
                target: "room.actor",
                room_id = %self.room_id,
                ppid,
                "ignoring non string message from a peer"
            );
            return;
        }

        let display_name = self
            .peers
            .get(peer_id)
            .and_then(Peer::joined)
            .map_or("peer", |session| session.display_name.as_str());

        let message = format!("{display_name} said me: \"{payload}\"");

        if let Err(error) = self.bot.send(&message).await {
            warn!(
                target: "room.actor",
                room_id = %self.room_id,
                %error,
                "bot echo failed"
            );
        }
    }

    fn notify_joined_peers(&self, name: &str, data: Value) {
        for peer in self.peers.values() {
            if peer.is_joined() {
                peer.transport.notify(name, data.clone());
            }
        }
    }

    fn notify_joined_peers_except(&self, except_peer_id: &str, name: &str, data: Value) {
        for peer in self.peers.values() {
            if peer.id != except_peer_id && peer.is_joined() {
                peer.transport.notify(name, data.clone());
            }
        }
    }

    fn find_producer_owner(&self, producer_id: &str) -> Option<String> {
        self.peers
            .values()
            .find(|peer| peer.resources.producers.contains_key(producer_id))
            .map(|peer| peer.id.clone())
            .or_else(|| {
                self.broadcasters
                    .values()
                    .find(|broadcaster| {
                        broadcaster.resources.producers.contains_key(producer_id)
                    })
                    .map(|broadcaster| broadcaster.id.clone())
            })
    }

    fn producer_app_data(&self, owner_id: &str, producer_id: &str) -> Value {
        let from_peer = self
            .peers
            .get(owner_id)
            .and_then(|peer| peer.resources.producers.get(producer_id));
        let from_broadcaster = self
            .broadcasters
            .get(owner_id)
            .and_then(|broadcaster| broadcaster.resources.producers.get(producer_id));

        from_peer
            .or(from_broadcaster)
            .map_or(Value::Null, |record| record.handle.app_data())
    }

    fn find_data_producer(
        &self,
        owner_id: &str,
        data_producer_id: &str,
    ) -> Option<Arc<dyn MediaDataProducer>> {
        let from_peer = self
            .peers
            .get(owner_id)
            .and_then(|peer| peer.resources.data_producers.get(data_producer_id));
        let from_broadcaster = self.broadcasters.get(owner_id).and_then(|broadcaster| {
            broadcaster.resources.data_producers.get(data_producer_id)
        });

        from_peer
            .or(from_broadcaster)
            .map(|record| Arc::clone(&record.handle))
    }

    fn peer_transport(
        &self,
        peer_id: &str,
        transport_id: &str,
    ) -> Result<Arc<dyn MediaTransport>, RoomError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        peer.resources
            .transports
            .get(transport_id)
            .map(|record| Arc::clone(&record.handle))
            .ok_or_else(|| RoomError::TransportNotFound(transport_id.to_string()))
    }

    fn peer_producer(
        &self,
        peer_id: &str,
        producer_id: &str,
    ) -> Result<Arc<dyn MediaProducer>, RoomError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        peer.resources
            .producers
            .get(producer_id)
            .map(|record| Arc::clone(&record.handle))
            .ok_or_else(|| RoomError::ProducerNotFound(producer_id.to_string()))
    }

    fn peer_consumer(
        &self,
        peer_id: &str,
        consumer_id: &str,
    ) -> Result<Arc<dyn MediaConsumer>, RoomError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        peer.resources
            .consumers
            .get(consumer_id)
            .map(|record| Arc::clone(&record.handle))
            .ok_or_else(|| RoomError::ConsumerNotFound(consumer_id.to_string()))
    }

    /// Consumer lookup for the joined-only consumer operations.
    fn joined_peer_consumer(
        &self,
        peer_id: &str,
        consumer_id: &str,
    ) -> Result<Arc<dyn MediaConsumer>, RoomError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        if !peer.is_joined() {
            return Err(RoomError::NotJoined);
        }
        peer.resources
            .consumers
            .get(consumer_id)
            .map(|record| Arc::clone(&record.handle))
            .ok_or_else(|| RoomError::ConsumerNotFound(consumer_id.to_string()))
    }

    fn peer_data_producer(
        &self,
        peer_id: &str,
        data_producer_id: &str,
    ) -> Result<Arc<dyn MediaDataProducer>, RoomError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        peer.resources
            .data_producers
            .get(data_producer_id)
            .map(|record| Arc::clone(&record.handle))
            .ok_or_else(|| RoomError::DataProducerNotFound(data_producer_id.to_string()))
    }

    fn peer_data_consumer(
        &self,
        peer_id: &str,
        data_consumer_id: &str,
    ) -> Result<Arc<dyn MediaDataConsumer>, RoomError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| RoomError::PeerNotFound(peer_id.to_string()))?;
        peer.resources
            .data_consumers
            .get(data_consumer_id)
            .map(|record| Arc::clone(&record.handle))
            .ok_or_else(|| RoomError::DataConsumerNotFound(data_consumer_id.to_string()))
    }

    fn broadcaster_transport(
        &self,
        broadcaster_id: &str,
        transport_id: &str,
    ) -> Result<Arc<dyn MediaTransport>, RoomError> {
        let broadcaster = self
            .broadcasters
            .get(broadcaster_id)
            .ok_or_else(|| RoomError::BroadcasterNotFound(broadcaster_id.to_string()))?;
        broadcaster
            .resources
            .transports
            .get(transport_id)
            .map(|record| Arc::clone(&record.handle))
            .ok_or_else(|| RoomError::TransportNotFound(transport_id.to_string()))
    }

    fn spawn_transport_watcher(&self, peer_id: &str, transport: &Arc<dyn MediaTransport>) {
        let Some(mut events) = transport.events() else {
            return;
        };
        let sender = self.self_sender.clone();
        let peer_id = peer_id.to_string();
        let transport_id = transport.id();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let message = RoomMessage::PeerTransportEvent {
                    peer_id: peer_id.clone(),
                    transport_id: transport_id.clone(),
                    event,
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        });
    }

    fn spawn_producer_watcher(&self, peer_id: &str, producer: &Arc<dyn MediaProducer>) {
        let Some(mut events) = producer.events() else {
            return;
        };
        let sender = self.self_sender.clone();
        let peer_id = peer_id.to_string();
        let producer_id = producer.id();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let message = RoomMessage::ProducerEvent {
                    peer_id: peer_id.clone(),
                    producer_id: producer_id.clone(),
                    event,
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        });
    }

    fn spawn_consumer_watcher(&self, peer_id: &str, consumer: &Arc<dyn MediaConsumer>) {
        let Some(mut events) = consumer.events() else {
            return;
        };
        let sender = self.self_sender.clone();
        let peer_id = peer_id.to_string();
        let consumer_id = consumer.id();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let message = RoomMessage::ConsumerEvent {
                    peer_id: peer_id.clone(),
                    consumer_id: consumer_id.clone(),
                    event,
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        });
    }

    fn spawn_data_consumer_watcher(&self, peer_id: &str, data_consumer: &Arc<dyn MediaDataConsumer>) {
        let Some(mut events) = data_consumer.events() else {
            return;
        };
        let sender = self.self_sender.clone();
        let peer_id = peer_id.to_string();
        let data_consumer_id = data_consumer.id();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let message = RoomMessage::DataConsumerEvent {
                    peer_id: peer_id.clone(),
                    data_consumer_id: data_consumer_id.clone(),
                    event,
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        });
    }

    fn spawn_bot_watcher(
        &self,
        peer_id: &str,
        mut events: mpsc::UnboundedReceiver<DataConsumerEvent>,
    ) {
        let sender = self.self_sender.clone();
        let peer_id = peer_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    DataConsumerEvent::Message { payload, ppid } => {
                        let message = RoomMessage::BotMessage {
                            peer_id: peer_id.clone(),
                            payload,
                            ppid,
                        };
                        if sender.send(message).await.is_err() {
                            break;
                        }
                    }
                    DataConsumerEvent::DataProducerClose => break,
                }
            }
        });
    }
}

fn close_resources_quietly(resources: &MediaResources) {
    for record in resources.data_consumers.values() {
        record.handle.close();
    }
    for record in resources.data_producers.values() {
        record.handle.close();
    }
    for record in resources.consumers.values() {
        record.handle.close();
    }
    for record in resources.producers.values() {
        record.handle.close();
    }
    for record in resources.transports.values() {
        record.handle.close();
    }
}

fn spawn_observer_watcher(observer: &Arc<dyn MediaObserver>, sender: mpsc::Sender<RoomMessage>) {
    let Some(mut events) = observer.events() else {
        return;
    };
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if sender
                .send(RoomMessage::AudioObserverEvent { event })
                .await
                .is_err()
            {
                break;
            }
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use media_engine::loopback::LoopbackEngine;
    use media_engine::MediaEngine;

    async fn spawn_room(room_id: &str) -> (RoomHandle, mpsc::Receiver<ManagerMessage>) {
        let engine = LoopbackEngine::new();
        let config = Arc::new(
            Config::from_vars(&std::collections::HashMap::new()).expect("test config"),
        );
        let worker = engine
            .create_worker(&config.worker_settings())
            .await
            .expect("worker");
        let (manager_tx, manager_rx) = mpsc::channel(16);

        let handle = RoomActor::create(
            room_id.to_string(),
            worker,
            config,
            engine.version(),
            manager_tx,
            CancellationToken::new(),
        )
        .await
        .expect("room should spawn");

        (handle, manager_rx)
    }

    #[tokio::test]
    async fn test_room_actor_spawn_and_status() {
        let (handle, _manager_rx) = spawn_room("room-1").await;

        assert_eq!(handle.room_id(), "room-1");
        assert!(!handle.is_closed());

        let status = handle.status().await.unwrap();
        assert_eq!(status.room_id, "room-1");
        assert!(status.peer_ids.is_empty());
        assert!(!status.closed);
    }

    #[tokio::test]
    async fn test_connection_rejects_empty_peer_id() {
        let (handle, _manager_rx) = spawn_room("room-empty-id").await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = handle.handle_connection(String::new(), tx).await;
        assert!(matches!(result, Err(RoomError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_last_peer_disconnect_reports_room_closed() {
        let (handle, mut manager_rx) = spawn_room("room-teardown").await;

        let (tx, _outbound) = mpsc::unbounded_channel();
        let transport = handle
            .handle_connection("p1".to_string(), tx)
            .await
            .unwrap();

        handle.peer_closed("p1".to_string()).await;

        let message = manager_rx.recv().await.expect("manager notified");
        assert!(matches!(
            message,
            ManagerMessage::RoomClosed { room_id } if room_id == "room-teardown"
        ));
        assert!(handle.is_closed());
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_cancellation_closes_room() {
        let (handle, mut manager_rx) = spawn_room("room-cancel").await;

        handle.closed_token().cancel();

        let message = manager_rx.recv().await.expect("manager notified");
        assert!(matches!(message, ManagerMessage::RoomClosed { .. }));
    }
}
