//! Room and peer lifecycle: join semantics, eviction, teardown, the
//! consumer-creation protocol and the broadcaster surface.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

mod common;

use common::{eventually, start_server};
use room_controller::actors::messages::{
    BroadcasterTransportType, CreateBroadcasterRequest, CreateBroadcasterTransportRequest,
    CreateBroadcasterProducerRequest,
};
use media_engine::types::MediaKind;
use serde_json::{json, Value};

#[tokio::test]
async fn test_join_returns_existing_peers_and_notifies() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    let result = alice.join_as("Alice").await;
    assert_eq!(result.get("peers"), Some(&json!([])));

    let mut bob = server.connect("r1", "bob").await;
    let result = bob.join_as("Bob").await;
    let peers = result.get("peers").and_then(Value::as_array).unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].get("id"), Some(&json!("alice")));
    assert_eq!(peers[0].get("displayName"), Some(&json!("Alice")));

    let new_peer = alice.expect_notify("newPeer").await;
    assert_eq!(new_peer.get("id"), Some(&json!("bob")));
    assert_eq!(new_peer.get("displayName"), Some(&json!("Bob")));
}

#[tokio::test]
async fn test_join_twice_fails() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;

    let error = alice
        .request(
            "join",
            json!({
                "displayName": "Alice again",
                "rtpCapabilities": {"codecs": [{"mimeType": "audio/opus"}]},
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(error.0, 500);
    assert_eq!(error.1, "Peer already joined");
}

#[tokio::test]
async fn test_joined_only_methods_fail_before_join() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    // Transports may be created before joining.
    let transport_id = alice.create_transport(true, false).await;

    let error = alice
        .request(
            "produce",
            json!({
                "transportId": transport_id,
                "kind": "audio",
                "rtpParameters": {"codecs": []},
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(error.1, "Peer not yet joined");

    let error = alice
        .request("changeDisplayName", json!({"displayName": "Someone"}))
        .await
        .unwrap_err();
    assert_eq!(error.1, "Peer not yet joined");
}

#[tokio::test]
async fn test_duplicate_peer_id_evicts_previous_connection() {
    let server = start_server().await;

    let mut first_alice = server.connect("r1", "alice").await;
    first_alice.join_as("Alice").await;

    let mut bob = server.connect("r1", "bob").await;
    bob.join_as("Bob").await;

    // Second connection with the same peer id wins.
    let second_alice = server.connect("r1", "alice").await;
    assert!(first_alice.transport.is_closed());
    assert!(!second_alice.transport.is_closed());

    // The evicted identity had joined, so others hear about it.
    let closed = bob.expect_notify("peerClosed").await;
    assert_eq!(closed.get("peerId"), Some(&json!("alice")));

    let status = second_alice.room.status().await.unwrap();
    assert_eq!(status.peer_ids, vec!["alice".to_string(), "bob".to_string()]);
    // The new occupant of the id starts unjoined.
    assert_eq!(status.joined_peer_ids, vec!["bob".to_string()]);
}

#[tokio::test]
async fn test_room_closes_when_last_peer_leaves() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;

    let status = alice.room.status().await.unwrap();
    let router_id = status.router_id.clone();
    assert_eq!(server.manager.status().await.unwrap().rooms, vec!["r1"]);

    alice.disconnect().await;

    wait_for_no_rooms(&server).await;
    assert_eq!(server.engine.resource_closed(&router_id), Some(true));
}

async fn wait_for_no_rooms(server: &common::TestServer) {
    for _ in 0..200 {
        let empty = server
            .manager
            .status()
            .await
            .map(|status| status.rooms.is_empty())
            .unwrap_or(true);
        if empty {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for the room to be torn down");
}

#[tokio::test]
async fn test_room_survives_while_other_peers_remain() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let mut bob = server.connect("r1", "bob").await;
    bob.join_as("Bob").await;
    alice.expect_notify("newPeer").await;

    bob.disconnect().await;

    let closed = alice.expect_notify("peerClosed").await;
    assert_eq!(closed.get("peerId"), Some(&json!("bob")));

    let status = alice.room.status().await.unwrap();
    assert!(!status.closed);
    assert_eq!(status.peer_ids, vec!["alice".to_string()]);
    assert_eq!(server.manager.status().await.unwrap().rooms, vec!["r1"]);
}

#[tokio::test]
async fn test_end_to_end_media_session() {
    let server = start_server().await;

    // Alice joins and prepares a producing transport.
    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let alice_transport = alice.create_transport(true, false).await;

    // Bob prepares a consuming transport, then joins.
    let mut bob = server.connect("r1", "bob").await;
    let _bob_transport = bob.create_transport(false, true).await;
    bob.join_as("Bob").await;
    alice.expect_notify("newPeer").await;

    // Alice produces video; the server eagerly consumes it towards Bob.
    let producer_id = alice.produce_video(&alice_transport).await;

    let (seq, args) = bob.expect_request("newConsumer").await;
    let params = &args[0];
    assert_eq!(params.get("peerId"), Some(&json!("alice")));
    assert_eq!(params.get("producerId"), Some(&json!(producer_id)));
    assert_eq!(params.get("kind"), Some(&json!("video")));
    assert_eq!(params.get("producerPaused"), Some(&json!(false)));
    let consumer_id = params
        .get("id")
        .and_then(Value::as_str)
        .unwrap()
        .to_string();

    // Created paused; resumed only after the acknowledgment.
    assert_eq!(server.engine.consumer_paused(&consumer_id), Some(true));
    bob.respond_success(seq, Value::Null);
    bob.expect_notify("consumerScore").await;
    assert_eq!(server.engine.consumer_paused(&consumer_id), Some(false));

    // Bob leaves; Alice hears about it.
    bob.disconnect().await;
    let closed = alice.expect_notify("peerClosed").await;
    assert_eq!(closed.get("peerId"), Some(&json!("bob")));

    // Alice leaves; the room is torn down.
    let router_id = alice.room.status().await.unwrap().router_id;
    alice.disconnect().await;

    wait_for_no_rooms(&server).await;
    assert_eq!(server.engine.resource_closed(&router_id), Some(true));
}

#[tokio::test]
async fn test_rejected_new_consumer_leaves_consumer_paused() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let alice_transport = alice.create_transport(true, false).await;

    let mut bob = server.connect("r1", "bob").await;
    bob.create_transport(false, true).await;
    bob.join_as("Bob").await;
    alice.expect_notify("newPeer").await;

    alice.produce_video(&alice_transport).await;

    let (seq, args) = bob.expect_request("newConsumer").await;
    let consumer_id = args[0]
        .get("id")
        .and_then(Value::as_str)
        .unwrap()
        .to_string();

    bob.respond_error(seq, 500, "cannot apply consumer");

    // The consumer stays stored and paused; it never resumes on its own.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(server.engine.consumer_paused(&consumer_id), Some(true));

    // The stored consumer does not block later, correct negotiation: Bob can
    // still drive it, and a new producer consumes cleanly.
    bob.request("resumeConsumer", json!({"consumerId": consumer_id}))
        .await
        .unwrap();
    assert_eq!(server.engine.consumer_paused(&consumer_id), Some(false));

    alice.produce_video(&alice_transport).await;
    let (seq, args) = bob.expect_request("newConsumer").await;
    let second_consumer_id = args[0]
        .get("id")
        .and_then(Value::as_str)
        .unwrap()
        .to_string();
    bob.respond_success(seq, Value::Null);
    bob.expect_notify("consumerScore").await;
    assert_eq!(
        server.engine.consumer_paused(&second_consumer_id),
        Some(false)
    );
}

#[tokio::test]
async fn test_broadcaster_lifecycle() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.create_transport(false, true).await;
    alice.join_as("Alice").await;

    // Create the broadcaster; Alice is listed in the bootstrap reply.
    let created = alice
        .room
        .create_broadcaster(CreateBroadcasterRequest {
            id: "bcast-1".to_string(),
            display_name: "Studio Feed".to_string(),
            device: json!({"name": "ffmpeg"}),
            rtp_capabilities: json!({"codecs": [{"mimeType": "audio/opus"}]}),
        })
        .await
        .unwrap();
    assert_eq!(created.peers.len(), 1);
    assert_eq!(created.peers[0].id, "alice");

    let new_peer = alice.expect_notify("newPeer").await;
    assert_eq!(new_peer.get("id"), Some(&json!("bcast-1")));
    assert_eq!(
        new_peer.get("device").and_then(|d| d.get("flag")),
        Some(&json!("broadcaster"))
    );

    // Duplicate ids are rejected.
    let duplicate = alice
        .room
        .create_broadcaster(CreateBroadcasterRequest {
            id: "bcast-1".to_string(),
            display_name: "Second".to_string(),
            device: json!({"name": "gstreamer"}),
            rtp_capabilities: Value::Null,
        })
        .await;
    assert!(duplicate.is_err());

    // Broadcaster produces audio; Alice receives a consumer for it.
    let transport = alice
        .room
        .create_broadcaster_transport(
            "bcast-1".to_string(),
            CreateBroadcasterTransportRequest {
                transport_type: BroadcasterTransportType::Webrtc,
                rtcp_mux: false,
                comedia: true,
                sctp_capabilities: Value::Null,
            },
        )
        .await
        .unwrap();
    let transport_id = transport
        .get("id")
        .and_then(Value::as_str)
        .unwrap()
        .to_string();

    let produced = alice
        .room
        .create_broadcaster_producer(
            "bcast-1".to_string(),
            transport_id,
            CreateBroadcasterProducerRequest {
                kind: MediaKind::Audio,
                rtp_parameters: json!({"codecs": [{"mimeType": "audio/opus"}]}),
            },
        )
        .await
        .unwrap();

    let (seq, args) = alice.expect_request("newConsumer").await;
    assert_eq!(args[0].get("peerId"), Some(&json!("bcast-1")));
    assert_eq!(args[0].get("producerId"), Some(&json!(produced.id)));
    alice.respond_success(seq, Value::Null);
    alice.expect_notify("consumerScore").await;

    // Deleting the broadcaster closes the dependent consumer and announces
    // the departure.
    alice
        .room
        .delete_broadcaster("bcast-1".to_string())
        .await
        .unwrap();
    let closed = alice.expect_notify("peerClosed").await;
    assert_eq!(closed.get("peerId"), Some(&json!("bcast-1")));
    alice.expect_notify("consumerClosed").await;

    let status = alice.room.status().await.unwrap();
    assert!(status.broadcaster_ids.is_empty());
}

#[tokio::test]
async fn test_bot_echo_round_trip() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.create_transport(true, true).await;
    alice.join_as("Alice").await;

    // Joining wires a data consumer for the bot's own channel.
    let (seq, args) = alice.expect_request("newDataConsumer").await;
    assert_eq!(args[0].get("peerId"), Some(&json!(null)));
    assert_eq!(args[0].get("label"), Some(&json!("bot")));
    alice.respond_success(seq, Value::Null);

    // Alice opens a chat channel; the bot attaches to it.
    let transport_id = alice.create_transport(true, false).await;
    let produced = alice
        .request(
            "produceData",
            json!({
                "transportId": transport_id,
                "label": "chat",
                "protocol": "",
                "sctpStreamParameters": {"streamId": 0, "ordered": true},
            }),
        )
        .await
        .unwrap();
    let data_producer_id = produced
        .get("id")
        .and_then(Value::as_str)
        .unwrap()
        .to_string();

    let engine = server.engine.clone();
    let producer_for_wait = data_producer_id.clone();
    eventually(
        move || !engine.data_consumers_of(&producer_for_wait).is_empty(),
        "bot data consumer attached",
    )
    .await;

    // A message from Alice comes back through the bot's channel.
    let bot_consumer_id = server.engine.data_consumers_of(&data_producer_id)[0].clone();
    assert!(server.engine.emit_data_message(&bot_consumer_id, "hi", 51));

    let bot_producer_id = server.engine.data_producers_with_label("bot")[0].clone();
    let engine = server.engine.clone();
    let bot_producer_for_wait = bot_producer_id.clone();
    eventually(
        move || {
            engine
                .data_producer_sent(&bot_producer_for_wait)
                .contains(&"Alice said me: \"hi\"".to_string())
        },
        "bot echoed the message",
    )
    .await;

    // Non-string messages are ignored.
    assert!(server.engine.emit_data_message(&bot_consumer_id, "bin", 53));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(server.engine.data_producer_sent(&bot_producer_id).len(), 1);
}
