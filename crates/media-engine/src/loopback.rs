//! In-process media engine.
//!
//! `LoopbackEngine` implements the whole engine interface without routing a
//! single packet: resources are plain records in an internal registry and
//! negotiation parameters are fabricated. It backs the binary in standalone
//! signaling mode and drives the integration tests, which use the
//! `emit_*`/`kill_worker` hooks to simulate engine-originated events.
//!
//! The loopback engine performs no internal close cascade: closing a
//! transport leaves its producers and consumers untouched, matching the
//! contract in the crate root.

use crate::events::{
    ConsumerEvent, DataConsumerEvent, ObserverEvent, ProducerEvent, TransportEvent,
};
use crate::types::{
    AudioLevelObserverOptions, ConsumeOptions, DataProduceOptions, DirectTransportOptions,
    MediaKind, PlainTransportOptions, ProduceOptions, TransportInfo, WebRtcTransportOptions,
    WorkerSettings,
};
use crate::{
    EngineError, MediaConsumer, MediaDataConsumer, MediaDataProducer, MediaEngine, MediaObserver,
    MediaProducer, MediaRouter, MediaTransport, MediaWorker,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Take-once event stream shared between a resource record and its handle.
struct EventChannel<E> {
    tx: mpsc::UnboundedSender<E>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<E>>>,
}

impl<E> EventChannel<E> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    fn take(&self) -> Option<mpsc::UnboundedReceiver<E>> {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn emit(&self, event: E) -> bool {
        self.tx.send(event).is_ok()
    }
}

struct WorkerRecord {
    pid: u32,
    died: CancellationToken,
    closed: AtomicBool,
}

struct RouterRecord {
    id: String,
    media_codecs: Vec<Value>,
    closed: AtomicBool,
}

struct TransportRecord {
    id: String,
    info: TransportInfo,
    connected: AtomicBool,
    closed: AtomicBool,
    events: EventChannel<TransportEvent>,
}

struct ProducerRecord {
    id: String,
    kind: MediaKind,
    rtp_parameters: Value,
    app_data: Value,
    closed: AtomicBool,
    events: EventChannel<ProducerEvent>,
}

struct ConsumerRecord {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: Value,
    consumer_type: String,
    paused: AtomicBool,
    producer_paused: AtomicBool,
    closed: AtomicBool,
    events: EventChannel<ConsumerEvent>,
}

struct DataProducerRecord {
    id: String,
    label: String,
    protocol: String,
    sctp_stream_parameters: Value,
    app_data: Value,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
}

struct DataConsumerRecord {
    id: String,
    data_producer_id: String,
    label: String,
    protocol: String,
    sctp_stream_parameters: Value,
    closed: AtomicBool,
    events: EventChannel<DataConsumerEvent>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ObserverKind {
    AudioLevel,
    ActiveSpeaker,
}

struct ObserverRecord {
    id: String,
    kind: ObserverKind,
    producer_ids: Mutex<Vec<String>>,
    closed: AtomicBool,
    events: EventChannel<ObserverEvent>,
}

#[derive(Default)]
struct Registry {
    next_pid: u32,
    next_port: u16,
    next_stream_id: u16,
    workers: HashMap<u32, Arc<WorkerRecord>>,
    routers: HashMap<String, Arc<RouterRecord>>,
    transports: HashMap<String, Arc<TransportRecord>>,
    producers: HashMap<String, Arc<ProducerRecord>>,
    consumers: HashMap<String, Arc<ConsumerRecord>>,
    data_producers: HashMap<String, Arc<DataProducerRecord>>,
    data_consumers: HashMap<String, Arc<DataConsumerRecord>>,
    observers: HashMap<String, Arc<ObserverRecord>>,
}

impl Registry {
    fn alloc_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = if port >= 49_999 { 40_000 } else { port + 1 };
        port
    }

    fn alloc_stream_id(&mut self) -> u16 {
        let id = self.next_stream_id;
        self.next_stream_id = self.next_stream_id.wrapping_add(1);
        id
    }
}

struct Inner {
    registry: Mutex<Registry>,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The in-process engine.
#[derive(Clone)]
pub struct LoopbackEngine {
    inner: Arc<Inner>,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn short_token() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id.chars().take(16).collect()
}

fn fingerprint() -> String {
    Uuid::new_v4()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn ice_parameters() -> Value {
    json!({
        "usernameFragment": short_token(),
        "password": short_token(),
        "iceLite": true,
    })
}

impl LoopbackEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    next_pid: 1,
                    next_port: 40_000,
                    next_stream_id: 0,
                    ..Registry::default()
                }),
            }),
        }
    }

    /// Simulate the unexpected death of a worker process.
    pub fn kill_worker(&self, pid: u32) -> bool {
        let worker = self.inner.registry().workers.get(&pid).cloned();
        match worker {
            Some(worker) => {
                worker.died.cancel();
                true
            }
            None => false,
        }
    }

    /// Pids of all workers spawned so far.
    #[must_use]
    pub fn worker_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.inner.registry().workers.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Paused state of a consumer, `None` when unknown.
    #[must_use]
    pub fn consumer_paused(&self, consumer_id: &str) -> Option<bool> {
        self.inner
            .registry()
            .consumers
            .get(consumer_id)
            .map(|c| c.paused.load(Ordering::SeqCst))
    }

    /// Closed state of any known resource id, `None` when unknown.
    #[must_use]
    pub fn resource_closed(&self, id: &str) -> Option<bool> {
        let registry = self.inner.registry();
        if let Some(r) = registry.routers.get(id) {
            return Some(r.closed.load(Ordering::SeqCst));
        }
        if let Some(t) = registry.transports.get(id) {
            return Some(t.closed.load(Ordering::SeqCst));
        }
        if let Some(p) = registry.producers.get(id) {
            return Some(p.closed.load(Ordering::SeqCst));
        }
        if let Some(c) = registry.consumers.get(id) {
            return Some(c.closed.load(Ordering::SeqCst));
        }
        if let Some(p) = registry.data_producers.get(id) {
            return Some(p.closed.load(Ordering::SeqCst));
        }
        if let Some(c) = registry.data_consumers.get(id) {
            return Some(c.closed.load(Ordering::SeqCst));
        }
        None
    }

    /// Inject a producer event, as the real engine would.
    pub fn emit_producer_event(&self, producer_id: &str, event: ProducerEvent) -> bool {
        let producer = self.inner.registry().producers.get(producer_id).cloned();
        producer.is_some_and(|p| p.events.emit(event))
    }

    /// Inject a consumer event, as the real engine would.
    pub fn emit_consumer_event(&self, consumer_id: &str, event: ConsumerEvent) -> bool {
        let consumer = self.inner.registry().consumers.get(consumer_id).cloned();
        consumer.is_some_and(|c| c.events.emit(event))
    }

    /// Inject a transport event, as the real engine would.
    pub fn emit_transport_event(&self, transport_id: &str, event: TransportEvent) -> bool {
        let transport = self.inner.registry().transports.get(transport_id).cloned();
        transport.is_some_and(|t| t.events.emit(event))
    }

    /// Inject an inbound data-channel message into a data consumer.
    pub fn emit_data_message(&self, data_consumer_id: &str, payload: &str, ppid: u32) -> bool {
        let consumer = self
            .inner
            .registry()
            .data_consumers
            .get(data_consumer_id)
            .cloned();
        consumer.is_some_and(|c| {
            c.events.emit(DataConsumerEvent::Message {
                payload: payload.to_string(),
                ppid,
            })
        })
    }

    /// Report a volume for a producer on every audio-level observer that
    /// registered it. Returns the number of observers notified.
    pub fn emit_volumes(&self, producer_id: &str, volume: i16) -> usize {
        let observers: Vec<Arc<ObserverRecord>> =
            self.inner.registry().observers.values().cloned().collect();
        observers
            .iter()
            .filter(|o| {
                o.kind == ObserverKind::AudioLevel
                    && o.producer_ids
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .iter()
                        .any(|p| p == producer_id)
            })
            .filter(|o| {
                o.events.emit(ObserverEvent::Volumes {
                    producer_id: producer_id.to_string(),
                    volume,
                })
            })
            .count()
    }

    /// Report silence on every audio-level observer.
    pub fn emit_silence(&self) -> usize {
        let observers: Vec<Arc<ObserverRecord>> =
            self.inner.registry().observers.values().cloned().collect();
        observers
            .iter()
            .filter(|o| o.kind == ObserverKind::AudioLevel)
            .filter(|o| o.events.emit(ObserverEvent::Silence))
            .count()
    }

    /// Messages sent through a data producer, oldest first.
    #[must_use]
    pub fn data_producer_sent(&self, data_producer_id: &str) -> Vec<String> {
        self.inner
            .registry()
            .data_producers
            .get(data_producer_id)
            .map(|p| {
                p.sent
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
            .unwrap_or_default()
    }

    /// Ids of data producers carrying the given label.
    #[must_use]
    pub fn data_producers_with_label(&self, label: &str) -> Vec<String> {
        self.inner
            .registry()
            .data_producers
            .values()
            .filter(|p| p.label == label)
            .map(|p| p.id.clone())
            .collect()
    }

    /// Ids of data consumers attached to the given data producer.
    #[must_use]
    pub fn data_consumers_of(&self, data_producer_id: &str) -> Vec<String> {
        self.inner
            .registry()
            .data_consumers
            .values()
            .filter(|c| c.data_producer_id == data_producer_id)
            .map(|c| c.id.clone())
            .collect()
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    fn version(&self) -> String {
        format!("loopback/{}", env!("CARGO_PKG_VERSION"))
    }

    async fn create_worker(
        &self,
        settings: &WorkerSettings,
    ) -> Result<Arc<dyn MediaWorker>, EngineError> {
        if settings.rtc_min_port > settings.rtc_max_port {
            return Err(EngineError::InvalidOption(
                "rtcMinPort greater than rtcMaxPort".to_string(),
            ));
        }

        let mut registry = self.inner.registry();
        let pid = registry.next_pid;
        registry.next_pid += 1;

        let record = Arc::new(WorkerRecord {
            pid,
            died: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        registry.workers.insert(pid, Arc::clone(&record));
        drop(registry);

        tracing::debug!(target: "engine.loopback", pid, "worker spawned");

        Ok(Arc::new(LoopbackWorker {
            record,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct LoopbackWorker {
    record: Arc<WorkerRecord>,
    inner: Arc<Inner>,
}

#[async_trait]
impl MediaWorker for LoopbackWorker {
    fn pid(&self) -> u32 {
        self.record.pid
    }

    fn died(&self) -> CancellationToken {
        self.record.died.clone()
    }

    async fn create_router(
        &self,
        media_codecs: Vec<Value>,
    ) -> Result<Arc<dyn MediaRouter>, EngineError> {
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!("worker {}", self.record.pid)));
        }

        let record = Arc::new(RouterRecord {
            id: new_id(),
            media_codecs,
            closed: AtomicBool::new(false),
        });
        self.inner
            .registry()
            .routers
            .insert(record.id.clone(), Arc::clone(&record));

        Ok(Arc::new(LoopbackRouter {
            record,
            inner: Arc::clone(&self.inner),
        }))
    }

    fn close(&self) {
        self.record.closed.store(true, Ordering::SeqCst);
    }
}

struct LoopbackRouter {
    record: Arc<RouterRecord>,
    inner: Arc<Inner>,
}

impl LoopbackRouter {
    fn insert_transport(&self, info: TransportInfo) -> Arc<TransportRecord> {
        let record = Arc::new(TransportRecord {
            id: new_id(),
            info,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events: EventChannel::new(),
        });
        self.inner
            .registry()
            .transports
            .insert(record.id.clone(), Arc::clone(&record));
        record
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!("router {}", self.record.id)));
        }
        Ok(())
    }

    fn insert_observer(&self, kind: ObserverKind) -> Arc<ObserverRecord> {
        let record = Arc::new(ObserverRecord {
            id: new_id(),
            kind,
            producer_ids: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            events: EventChannel::new(),
        });
        self.inner
            .registry()
            .observers
            .insert(record.id.clone(), Arc::clone(&record));
        record
    }
}

#[async_trait]
impl MediaRouter for LoopbackRouter {
    fn id(&self) -> String {
        self.record.id.clone()
    }

    fn rtp_capabilities(&self) -> Value {
        json!({
            "codecs": self.record.media_codecs,
            "headerExtensions": [],
        })
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &Value) -> bool {
        let has_codecs = rtp_capabilities
            .get("codecs")
            .and_then(Value::as_array)
            .is_some_and(|codecs| !codecs.is_empty());
        if !has_codecs {
            return false;
        }

        self.inner
            .registry()
            .producers
            .get(producer_id)
            .is_some_and(|p| !p.closed.load(Ordering::SeqCst))
    }

    async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, EngineError> {
        self.ensure_open()?;
        if !options.enable_udp && !options.enable_tcp {
            return Err(EngineError::InvalidOption(
                "neither UDP nor TCP enabled".to_string(),
            ));
        }

        let port = self.inner.registry().alloc_port();
        let announced = options
            .announced_ip
            .clone()
            .unwrap_or_else(|| options.listen_ip.clone());
        let protocol = if options.enable_udp { "udp" } else { "tcp" };

        let info = TransportInfo::WebRtc {
            ice_parameters: ice_parameters(),
            ice_candidates: json!([{
                "foundation": "udpcandidate",
                "ip": announced,
                "port": port,
                "priority": 1_076_302_079u32,
                "protocol": protocol,
                "type": "host",
            }]),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{"algorithm": "sha-256", "value": fingerprint()}],
            }),
            sctp_parameters: if options.enable_sctp {
                json!({
                    "port": 5000,
                    "OS": 1024,
                    "MIS": 1024,
                    "maxMessageSize": options.max_sctp_message_size,
                })
            } else {
                Value::Null
            },
        };

        let record = self.insert_transport(info);
        Ok(Arc::new(LoopbackTransport {
            record,
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, EngineError> {
        self.ensure_open()?;

        let mut registry = self.inner.registry();
        let local_port = registry.alloc_port();
        let rtcp_port = if options.rtcp_mux {
            None
        } else {
            Some(registry.alloc_port())
        };
        drop(registry);

        let info = TransportInfo::Plain {
            local_ip: options.listen_ip,
            local_port,
            rtcp_port,
        };

        let record = self.insert_transport(info);
        Ok(Arc::new(LoopbackTransport {
            record,
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn create_direct_transport(
        &self,
        _options: DirectTransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, EngineError> {
        self.ensure_open()?;
        let record = self.insert_transport(TransportInfo::Direct);
        Ok(Arc::new(LoopbackTransport {
            record,
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn create_audio_level_observer(
        &self,
        _options: AudioLevelObserverOptions,
    ) -> Result<Arc<dyn MediaObserver>, EngineError> {
        self.ensure_open()?;
        let record = self.insert_observer(ObserverKind::AudioLevel);
        Ok(Arc::new(LoopbackObserver { record }))
    }

    async fn create_active_speaker_observer(&self) -> Result<Arc<dyn MediaObserver>, EngineError> {
        self.ensure_open()?;
        let record = self.insert_observer(ObserverKind::ActiveSpeaker);
        Ok(Arc::new(LoopbackObserver { record }))
    }

    fn close(&self) {
        self.record.closed.store(true, Ordering::SeqCst);
    }
}

struct LoopbackTransport {
    record: Arc<TransportRecord>,
    inner: Arc<Inner>,
}

impl LoopbackTransport {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!("transport {}", self.record.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    fn id(&self) -> String {
        self.record.id.clone()
    }

    fn info(&self) -> TransportInfo {
        self.record.info.clone()
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.record.events.take()
    }

    async fn connect(&self, dtls_parameters: Value) -> Result<(), EngineError> {
        self.ensure_open()?;
        if !dtls_parameters.is_object() {
            return Err(EngineError::InvalidOption(
                "dtlsParameters must be an object".to_string(),
            ));
        }
        self.record.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn set_max_incoming_bitrate(&self, _bitrate: u32) -> Result<(), EngineError> {
        self.ensure_open()
    }

    async fn restart_ice(&self) -> Result<Value, EngineError> {
        self.ensure_open()?;
        Ok(ice_parameters())
    }

    async fn produce(&self, options: ProduceOptions) -> Result<Arc<dyn MediaProducer>, EngineError> {
        self.ensure_open()?;
        if !options.rtp_parameters.is_object() {
            return Err(EngineError::InvalidOption(
                "rtpParameters must be an object".to_string(),
            ));
        }

        let record = Arc::new(ProducerRecord {
            id: new_id(),
            kind: options.kind,
            rtp_parameters: options.rtp_parameters,
            app_data: options.app_data,
            closed: AtomicBool::new(false),
            events: EventChannel::new(),
        });
        self.inner
            .registry()
            .producers
            .insert(record.id.clone(), Arc::clone(&record));

        Ok(Arc::new(LoopbackProducer { record }))
    }

    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn MediaConsumer>, EngineError> {
        self.ensure_open()?;

        let producer = self
            .inner
            .registry()
            .producers
            .get(&options.producer_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("producer {}", options.producer_id)))?;
        if producer.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!("producer {}", producer.id)));
        }

        let record = Arc::new(ConsumerRecord {
            id: new_id(),
            producer_id: producer.id.clone(),
            kind: producer.kind,
            rtp_parameters: producer.rtp_parameters.clone(),
            consumer_type: "simple".to_string(),
            paused: AtomicBool::new(options.paused),
            producer_paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events: EventChannel::new(),
        });
        self.inner
            .registry()
            .consumers
            .insert(record.id.clone(), Arc::clone(&record));

        Ok(Arc::new(LoopbackConsumer { record }))
    }

    async fn produce_data(
        &self,
        options: DataProduceOptions,
    ) -> Result<Arc<dyn MediaDataProducer>, EngineError> {
        self.ensure_open()?;

        let record = Arc::new(DataProducerRecord {
            id: new_id(),
            label: options.label,
            protocol: options.protocol,
            sctp_stream_parameters: options.sctp_stream_parameters,
            app_data: options.app_data,
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        });
        self.inner
            .registry()
            .data_producers
            .insert(record.id.clone(), Arc::clone(&record));

        Ok(Arc::new(LoopbackDataProducer { record }))
    }

    async fn consume_data(
        &self,
        data_producer_id: &str,
    ) -> Result<Arc<dyn MediaDataConsumer>, EngineError> {
        self.ensure_open()?;

        let mut registry = self.inner.registry();
        let producer = registry
            .data_producers
            .get(data_producer_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("dataProducer {data_producer_id}")))?;
        if producer.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!("dataProducer {}", producer.id)));
        }

        let stream_id = registry.alloc_stream_id();
        let record = Arc::new(DataConsumerRecord {
            id: new_id(),
            data_producer_id: producer.id.clone(),
            label: producer.label.clone(),
            protocol: producer.protocol.clone(),
            sctp_stream_parameters: json!({"streamId": stream_id, "ordered": true}),
            closed: AtomicBool::new(false),
            events: EventChannel::new(),
        });
        registry
            .data_consumers
            .insert(record.id.clone(), Arc::clone(&record));
        drop(registry);

        Ok(Arc::new(LoopbackDataConsumer { record }))
    }

    async fn get_stats(&self) -> Result<Value, EngineError> {
        self.ensure_open()?;
        Ok(json!([{
            "type": "transport",
            "transportId": self.record.id,
            "dtlsState": if self.record.connected.load(Ordering::SeqCst) { "connected" } else { "new" },
        }]))
    }

    fn close(&self) {
        self.record.closed.store(true, Ordering::SeqCst);
    }
}

struct LoopbackProducer {
    record: Arc<ProducerRecord>,
}

#[async_trait]
impl MediaProducer for LoopbackProducer {
    fn id(&self) -> String {
        self.record.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.record.kind
    }

    fn app_data(&self) -> Value {
        self.record.app_data.clone()
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<ProducerEvent>> {
        self.record.events.take()
    }

    async fn get_stats(&self) -> Result<Value, EngineError> {
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!("producer {}", self.record.id)));
        }
        Ok(json!([{
            "type": "outbound-rtp",
            "producerId": self.record.id,
            "kind": self.record.kind.as_str(),
        }]))
    }

    fn close(&self) {
        self.record.closed.store(true, Ordering::SeqCst);
    }
}

struct LoopbackConsumer {
    record: Arc<ConsumerRecord>,
}

impl LoopbackConsumer {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!("consumer {}", self.record.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaConsumer for LoopbackConsumer {
    fn id(&self) -> String {
        self.record.id.clone()
    }

    fn producer_id(&self) -> String {
        self.record.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.record.kind
    }

    fn rtp_parameters(&self) -> Value {
        self.record.rtp_parameters.clone()
    }

    fn consumer_type(&self) -> String {
        self.record.consumer_type.clone()
    }

    fn producer_paused(&self) -> bool {
        self.record.producer_paused.load(Ordering::SeqCst)
    }

    fn score(&self) -> Value {
        json!({"score": 10, "producerScore": 10, "producerScores": [10]})
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<ConsumerEvent>> {
        self.record.events.take()
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.record.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.record.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn request_key_frame(&self) -> Result<(), EngineError> {
        self.ensure_open()
    }

    async fn get_stats(&self) -> Result<Value, EngineError> {
        self.ensure_open()?;
        Ok(json!([{
            "type": "inbound-rtp",
            "consumerId": self.record.id,
            "kind": self.record.kind.as_str(),
        }]))
    }

    fn close(&self) {
        self.record.closed.store(true, Ordering::SeqCst);
    }
}

struct LoopbackDataProducer {
    record: Arc<DataProducerRecord>,
}

#[async_trait]
impl MediaDataProducer for LoopbackDataProducer {
    fn id(&self) -> String {
        self.record.id.clone()
    }

    fn label(&self) -> String {
        self.record.label.clone()
    }

    fn protocol(&self) -> String {
        self.record.protocol.clone()
    }

    fn sctp_stream_parameters(&self) -> Value {
        self.record.sctp_stream_parameters.clone()
    }

    fn app_data(&self) -> Value {
        self.record.app_data.clone()
    }

    async fn send(&self, payload: &str) -> Result<(), EngineError> {
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!(
                "dataProducer {}",
                self.record.id
            )));
        }
        self.record
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.to_string());
        Ok(())
    }

    async fn get_stats(&self) -> Result<Value, EngineError> {
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!(
                "dataProducer {}",
                self.record.id
            )));
        }
        Ok(json!([{
            "type": "data-producer",
            "dataProducerId": self.record.id,
            "label": self.record.label,
        }]))
    }

    fn close(&self) {
        self.record.closed.store(true, Ordering::SeqCst);
    }
}

struct LoopbackDataConsumer {
    record: Arc<DataConsumerRecord>,
}

#[async_trait]
impl MediaDataConsumer for LoopbackDataConsumer {
    fn id(&self) -> String {
        self.record.id.clone()
    }

    fn data_producer_id(&self) -> String {
        self.record.data_producer_id.clone()
    }

    fn label(&self) -> String {
        self.record.label.clone()
    }

    fn protocol(&self) -> String {
        self.record.protocol.clone()
    }

    fn sctp_stream_parameters(&self) -> Value {
        self.record.sctp_stream_parameters.clone()
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<DataConsumerEvent>> {
        self.record.events.take()
    }

    async fn get_stats(&self) -> Result<Value, EngineError> {
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!(
                "dataConsumer {}",
                self.record.id
            )));
        }
        Ok(json!([{
            "type": "data-consumer",
            "dataConsumerId": self.record.id,
            "label": self.record.label,
        }]))
    }

    fn close(&self) {
        self.record.closed.store(true, Ordering::SeqCst);
    }
}

struct LoopbackObserver {
    record: Arc<ObserverRecord>,
}

#[async_trait]
impl MediaObserver for LoopbackObserver {
    async fn add_producer(&self, producer_id: &str) -> Result<(), EngineError> {
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!("observer {}", self.record.id)));
        }
        self.record
            .producer_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(producer_id.to_string());
        Ok(())
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<ObserverEvent>> {
        self.record.events.take()
    }

    fn close(&self) {
        self.record.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            log_level: "warn".to_string(),
            log_tags: vec!["info".to_string()],
            rtc_min_port: 40_000,
            rtc_max_port: 49_999,
        }
    }

    fn caps() -> Value {
        json!({"codecs": [{"mimeType": "audio/opus"}]})
    }

    async fn webrtc_transport(
        router: &Arc<dyn MediaRouter>,
    ) -> Arc<dyn MediaTransport> {
        router
            .create_webrtc_transport(WebRtcTransportOptions {
                listen_ip: "127.0.0.1".to_string(),
                announced_ip: None,
                enable_udp: true,
                enable_tcp: true,
                enable_sctp: true,
                num_sctp_streams: None,
                max_sctp_message_size: 262_144,
                initial_available_outgoing_bitrate: 1_000_000,
                app_data: json!({"producing": true, "consuming": false}),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_worker_router_transport_chain() {
        let engine = LoopbackEngine::new();
        let worker = engine.create_worker(&settings()).await.unwrap();
        assert_eq!(worker.pid(), 1);

        let router = worker
            .create_router(vec![json!({"mimeType": "audio/opus"})])
            .await
            .unwrap();
        assert!(router.rtp_capabilities().get("codecs").is_some());

        let transport = webrtc_transport(&router).await;
        match transport.info() {
            TransportInfo::WebRtc {
                sctp_parameters, ..
            } => assert!(sctp_parameters.is_object()),
            other => panic!("unexpected info: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_produce_and_consume() {
        let engine = LoopbackEngine::new();
        let worker = engine.create_worker(&settings()).await.unwrap();
        let router = worker.create_router(vec![]).await.unwrap();
        let transport = webrtc_transport(&router).await;

        let producer = transport
            .produce(ProduceOptions {
                kind: MediaKind::Audio,
                rtp_parameters: json!({"codecs": []}),
                paused: false,
                app_data: json!({"peerId": "alice"}),
            })
            .await
            .unwrap();

        assert!(router.can_consume(&producer.id(), &caps()));
        assert!(!router.can_consume(&producer.id(), &json!({})));
        assert!(!router.can_consume("nope", &caps()));

        let consumer = transport
            .consume(ConsumeOptions {
                producer_id: producer.id(),
                rtp_capabilities: caps(),
                paused: true,
                enable_rtx: true,
                ignore_dtx: true,
                app_data: Value::Null,
            })
            .await
            .unwrap();

        assert_eq!(engine.consumer_paused(&consumer.id()), Some(true));
        consumer.resume().await.unwrap();
        assert_eq!(engine.consumer_paused(&consumer.id()), Some(false));
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_operations() {
        let engine = LoopbackEngine::new();
        let worker = engine.create_worker(&settings()).await.unwrap();
        let router = worker.create_router(vec![]).await.unwrap();
        let transport = webrtc_transport(&router).await;

        transport.close();

        let result = transport
            .produce(ProduceOptions {
                kind: MediaKind::Video,
                rtp_parameters: json!({}),
                paused: false,
                app_data: Value::Null,
            })
            .await;
        assert!(matches!(result, Err(EngineError::Closed(_))));
    }

    #[tokio::test]
    async fn test_close_does_not_cascade() {
        let engine = LoopbackEngine::new();
        let worker = engine.create_worker(&settings()).await.unwrap();
        let router = worker.create_router(vec![]).await.unwrap();
        let transport = webrtc_transport(&router).await;

        let producer = transport
            .produce(ProduceOptions {
                kind: MediaKind::Audio,
                rtp_parameters: json!({}),
                paused: false,
                app_data: Value::Null,
            })
            .await
            .unwrap();

        transport.close();
        assert_eq!(engine.resource_closed(&producer.id()), Some(false));
    }

    #[tokio::test]
    async fn test_kill_worker_fires_died_token() {
        let engine = LoopbackEngine::new();
        let worker = engine.create_worker(&settings()).await.unwrap();
        let died = worker.died();
        assert!(!died.is_cancelled());

        assert!(engine.kill_worker(worker.pid()));
        assert!(died.is_cancelled());

        assert!(!engine.kill_worker(999));
    }

    #[tokio::test]
    async fn test_event_streams_are_take_once() {
        let engine = LoopbackEngine::new();
        let worker = engine.create_worker(&settings()).await.unwrap();
        let router = worker.create_router(vec![]).await.unwrap();
        let transport = webrtc_transport(&router).await;

        let mut events = transport.events().expect("first take");
        assert!(transport.events().is_none());

        assert!(engine.emit_transport_event(
            &transport.id(),
            TransportEvent::SctpStateChange("connected".to_string())
        ));
        let event = events.recv().await.expect("event delivered");
        assert!(matches!(event, TransportEvent::SctpStateChange(s) if s == "connected"));
    }

    #[tokio::test]
    async fn test_data_channel_chain() {
        let engine = LoopbackEngine::new();
        let worker = engine.create_worker(&settings()).await.unwrap();
        let router = worker.create_router(vec![]).await.unwrap();
        let transport = router
            .create_direct_transport(DirectTransportOptions {
                max_message_size: 512,
                app_data: Value::Null,
            })
            .await
            .unwrap();

        let data_producer = transport
            .produce_data(DataProduceOptions {
                label: "bot".to_string(),
                protocol: String::new(),
                sctp_stream_parameters: Value::Null,
                app_data: Value::Null,
            })
            .await
            .unwrap();
        assert_eq!(
            engine.data_producers_with_label("bot"),
            vec![data_producer.id()]
        );

        let data_consumer = transport.consume_data(&data_producer.id()).await.unwrap();
        assert_eq!(engine.data_consumers_of(&data_producer.id()).len(), 1);
        assert!(data_consumer
            .sctp_stream_parameters()
            .get("streamId")
            .is_some());

        data_producer.send("hello").await.unwrap();
        assert_eq!(
            engine.data_producer_sent(&data_producer.id()),
            vec!["hello".to_string()]
        );
    }
}
