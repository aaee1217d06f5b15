//! Shared harness for the integration tests: an in-process server on the
//! loopback engine, and a test client that speaks raw wire frames against
//! the server-side transport the gateway would normally bridge.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use media_engine::loopback::LoopbackEngine;
use room_controller::actors::{RoomHandle, RoomManagerHandle};
use room_controller::config::Config;
use room_controller::rpc::RpcTransport;
use serde_json::{json, Value};
use signal_protocol::{codec, method_id, Message};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub manager: RoomManagerHandle,
    pub engine: LoopbackEngine,
}

pub async fn start_server() -> TestServer {
    let vars = HashMap::from([("ROOM_NUM_WORKERS".to_string(), "1".to_string())]);
    let config = Arc::new(Config::from_vars(&vars).expect("test config"));
    let engine = LoopbackEngine::new();
    let manager = RoomManagerHandle::new(config, Arc::new(engine.clone()))
        .await
        .expect("manager should start");
    TestServer { manager, engine }
}

impl TestServer {
    pub async fn connect(&self, room_id: &str, peer_id: &str) -> TestClient {
        let room = self
            .manager
            .get_or_create_room(room_id.to_string())
            .await
            .expect("room should resolve");
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let transport = room
            .handle_connection(peer_id.to_string(), outbound_tx)
            .await
            .expect("connection should be accepted");

        TestClient {
            peer_id: peer_id.to_string(),
            room,
            transport,
            outbound: outbound_rx,
            notifies: VecDeque::new(),
            requests: VecDeque::new(),
            responses: VecDeque::new(),
            next_seq: 1,
        }
    }
}

pub struct TestClient {
    pub peer_id: String,
    pub room: RoomHandle,
    pub transport: RpcTransport,
    outbound: mpsc::UnboundedReceiver<String>,
    notifies: VecDeque<(String, Value)>,
    requests: VecDeque<(u32, u32, Vec<Value>)>,
    responses: VecDeque<Message>,
    next_seq: u32,
}

impl TestClient {
    fn classify(&mut self, message: Message) {
        match message {
            Message::Notify { name, data, .. } => self.notifies.push_back((name, data)),
            Message::Request {
                method_id: id,
                seq,
                args,
            } => self.requests.push_back((id, seq, args)),
            message @ (Message::ResponseSuccess { .. } | Message::ResponseError { .. }) => {
                self.responses.push_back(message);
            }
            Message::Ping { .. } | Message::Pong { .. } => {}
        }
    }

    async fn pump(&mut self) -> bool {
        match tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv()).await {
            Ok(Some(frame)) => {
                let message = codec::decode(&frame).expect("server frames must decode");
                self.classify(message);
                true
            }
            _ => false,
        }
    }

    /// Issue a request and wait for its response.
    pub async fn request(&mut self, method: &str, body: Value) -> Result<Value, (u16, String)> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.transport.read(&codec::encode(&Message::request(
            method_id(method),
            seq,
            vec![body],
        )));

        loop {
            let position = self.responses.iter().position(|message| match message {
                Message::ResponseSuccess { seq: s, .. } | Message::ResponseError { seq: s, .. } => {
                    *s == seq
                }
                _ => false,
            });
            if let Some(position) = position {
                match self.responses.remove(position).expect("indexed") {
                    Message::ResponseSuccess { data, .. } => return Ok(data),
                    Message::ResponseError { code, message, .. } => return Err((code, message)),
                    _ => panic!("classified response had unexpected shape"),
                }
            }
            assert!(
                self.pump().await,
                "timed out waiting for response to {method}"
            );
        }
    }

    /// Wait for a notify with the given name.
    pub async fn expect_notify(&mut self, name: &str) -> Value {
        loop {
            if let Some(position) = self.notifies.iter().position(|(n, _)| n == name) {
                return self.notifies.remove(position).expect("indexed").1;
            }
            assert!(self.pump().await, "timed out waiting for notify {name}");
        }
    }

    /// Wait for a server-originated request with the given method name.
    pub async fn expect_request(&mut self, method: &str) -> (u32, Vec<Value>) {
        let id = method_id(method);
        loop {
            if let Some(position) = self.requests.iter().position(|(m, _, _)| *m == id) {
                let (_, seq, args) = self.requests.remove(position).expect("indexed");
                return (seq, args);
            }
            assert!(self.pump().await, "timed out waiting for request {method}");
        }
    }

    pub fn respond_success(&self, seq: u32, data: Value) {
        self.transport
            .read(&codec::encode(&Message::response_success(seq, data)));
    }

    pub fn respond_error(&self, seq: u32, code: u16, message: &str) {
        self.transport
            .read(&codec::encode(&Message::response_error(seq, code, message)));
    }

    /// Simulate the socket closing, the way the gateway reports it.
    pub async fn disconnect(&mut self) {
        self.room.peer_closed(self.peer_id.clone()).await;
    }

    pub async fn join_as(&mut self, display_name: &str) -> Value {
        self.request(
            "join",
            json!({
                "displayName": display_name,
                "device": {"flag": "test", "name": "test-agent"},
                "rtpCapabilities": {
                    "codecs": [
                        {"mimeType": "audio/opus"},
                        {"mimeType": "video/VP8"},
                    ],
                },
                "sctpCapabilities": {"numStreams": {"OS": 1024, "MIS": 1024}},
            }),
        )
        .await
        .expect("join should succeed")
    }

    pub async fn create_transport(&mut self, producing: bool, consuming: bool) -> String {
        let result = self
            .request(
                "createWebRtcTransport",
                json!({
                    "forceTcp": false,
                    "producing": producing,
                    "consuming": consuming,
                    "sctpCapabilities": {"numStreams": {"OS": 1024, "MIS": 1024}},
                }),
            )
            .await
            .expect("createWebRtcTransport should succeed");
        result
            .get("id")
            .and_then(Value::as_str)
            .expect("transport id")
            .to_string()
    }

    pub async fn produce_video(&mut self, transport_id: &str) -> String {
        let result = self
            .request(
                "produce",
                json!({
                    "transportId": transport_id,
                    "kind": "video",
                    "rtpParameters": {"codecs": [{"mimeType": "video/VP8"}]},
                    "appData": {"source": "webcam"},
                }),
            )
            .await
            .expect("produce should succeed");
        result
            .get("id")
            .and_then(Value::as_str)
            .expect("producer id")
            .to_string()
    }

    pub async fn produce_audio(&mut self, transport_id: &str) -> String {
        let result = self
            .request(
                "produce",
                json!({
                    "transportId": transport_id,
                    "kind": "audio",
                    "rtpParameters": {"codecs": [{"mimeType": "audio/opus"}]},
                }),
            )
            .await
            .expect("produce should succeed");
        result
            .get("id")
            .and_then(Value::as_str)
            .expect("producer id")
            .to_string()
    }
}

/// Poll until the predicate holds, asserting on timeout.
pub async fn eventually<F>(mut predicate: F, what: &str)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting until {what}");
}
