//! Connection gateway: WebSocket signaling endpoint and admin HTTP surface.
//!
//! The gateway is deliberately thin. It validates the `roomId`/`peerId`
//! query parameters before upgrading, bridges raw text frames into the
//! peer's RPC transport, and maps the broadcaster admin routes onto room
//! operations. Outbound frames flow through an unbounded channel with no
//! flow control; backpressure stays log-only.

use crate::actors::messages::{
    CreateBroadcasterDataProducerRequest, CreateBroadcasterProducerRequest,
    CreateBroadcasterRequest, CreateBroadcasterTransportRequest,
};
use crate::actors::{RoomHandle, RoomManagerHandle};
use crate::errors::RoomError;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared state for the gateway routes.
#[derive(Clone)]
pub struct GatewayState {
    /// Handle to the room manager.
    pub manager: RoomManagerHandle,
}

/// Build the gateway router: signaling WebSocket, health and broadcaster
/// admin routes.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health))
        .route("/rooms/:room_id/broadcasters", post(create_broadcaster))
        .route(
            "/rooms/:room_id/broadcasters/:broadcaster_id",
            delete(delete_broadcaster),
        )
        .route(
            "/rooms/:room_id/broadcasters/:broadcaster_id/transports",
            post(create_broadcaster_transport),
        )
        .route(
            "/rooms/:room_id/broadcasters/:broadcaster_id/transports/:transport_id/connect",
            post(connect_broadcaster_transport),
        )
        .route(
            "/rooms/:room_id/broadcasters/:broadcaster_id/transports/:transport_id/producers",
            post(create_broadcaster_producer),
        )
        .route(
            "/rooms/:room_id/broadcasters/:broadcaster_id/transports/:transport_id/consume",
            post(create_broadcaster_consumer),
        )
        .route(
            "/rooms/:room_id/broadcasters/:broadcaster_id/transports/:transport_id/produce-data",
            post(create_broadcaster_data_producer),
        )
        .route(
            "/rooms/:room_id/broadcasters/:broadcaster_id/transports/:transport_id/consume-data",
            post(create_broadcaster_data_consumer),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<GatewayState>,
) -> Response {
    // Both identifiers are required before the upgrade happens.
    let Some(room_id) = params.get("roomId").filter(|id| !id.is_empty()).cloned() else {
        return (StatusCode::BAD_REQUEST, "Connection request without roomId").into_response();
    };
    let Some(peer_id) = params.get("peerId").filter(|id| !id.is_empty()).cloned() else {
        return (StatusCode::BAD_REQUEST, "Connection request without peerId").into_response();
    };

    let room = match state.manager.get_or_create_room(room_id.clone()).await {
        Ok(room) => room,
        Err(error) => {
            warn!(target: "gateway", %room_id, %error, "failed to resolve room");
            return (StatusCode::SERVICE_UNAVAILABLE, error.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, room, room_id, peer_id))
}

async fn handle_socket(socket: WebSocket, room: RoomHandle, room_id: String, peer_id: String) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    let transport = match room.handle_connection(peer_id.clone(), outbound_tx).await {
        Ok(transport) => transport,
        Err(error) => {
            warn!(
                target: "gateway",
                %room_id,
                %peer_id,
                %error,
                "failed to register peer, closing connection"
            );
            return;
        }
    };

    info!(target: "gateway", %room_id, %peer_id, "peer connected");

    // Log every inbound notify, wildcard style.
    let mut notifies = transport.subscribe(None);
    let log_peer_id = peer_id.clone();
    tokio::spawn(async move {
        while let Some(notify) = notifies.recv().await {
            debug!(
                target: "gateway",
                peer_id = %log_peer_id,
                name = %notify.name,
                "peer notify received"
            );
        }
    });

    let (mut sink, mut stream) = socket.split();
    let closed = transport.closed_token();

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = closed.cancelled() => break,
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if sink.send(WsMessage::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(WsMessage::Text(text)) => transport.read(&text),
            Ok(WsMessage::Binary(_)) => {
                debug!(target: "gateway", %peer_id, "ignoring binary frame");
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    room.peer_closed(peer_id.clone()).await;
    transport.close();
    let _ = send_task.await;

    info!(target: "gateway", %room_id, %peer_id, "peer disconnected");
}

fn http_error(error: &RoomError) -> (StatusCode, String) {
    let status = match error {
        RoomError::BroadcasterNotFound(_)
        | RoomError::TransportNotFound(_)
        | RoomError::ProducerNotFound(_)
        | RoomError::ConsumerNotFound(_)
        | RoomError::DataProducerNotFound(_)
        | RoomError::DataConsumerNotFound(_)
        | RoomError::PeerNotFound(_) => StatusCode::NOT_FOUND,
        RoomError::InvalidRequest(_) | RoomError::BroadcasterExists(_) => StatusCode::BAD_REQUEST,
        RoomError::RoomClosed | RoomError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        RoomError::Engine(_)
        | RoomError::Internal(_)
        | RoomError::NotJoined
        | RoomError::AlreadyJoined => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string())
}

async fn resolve_room(
    state: &GatewayState,
    room_id: String,
) -> Result<RoomHandle, (StatusCode, String)> {
    state
        .manager
        .get_or_create_room(room_id)
        .await
        .map_err(|error| http_error(&error))
}

async fn create_broadcaster(
    State(state): State<GatewayState>,
    Path(room_id): Path<String>,
    Json(request): Json<CreateBroadcasterRequest>,
) -> Result<Response, (StatusCode, String)> {
    let room = resolve_room(&state, room_id).await?;
    let result = room
        .create_broadcaster(request)
        .await
        .map_err(|error| http_error(&error))?;
    Ok(Json(result).into_response())
}

async fn delete_broadcaster(
    State(state): State<GatewayState>,
    Path((room_id, broadcaster_id)): Path<(String, String)>,
) -> Result<Response, (StatusCode, String)> {
    let room = resolve_room(&state, room_id).await?;
    room.delete_broadcaster(broadcaster_id)
        .await
        .map_err(|error| http_error(&error))?;
    Ok(StatusCode::OK.into_response())
}

async fn create_broadcaster_transport(
    State(state): State<GatewayState>,
    Path((room_id, broadcaster_id)): Path<(String, String)>,
    Json(request): Json<CreateBroadcasterTransportRequest>,
) -> Result<Response, (StatusCode, String)> {
    let room = resolve_room(&state, room_id).await?;
    let result = room
        .create_broadcaster_transport(broadcaster_id, request)
        .await
        .map_err(|error| http_error(&error))?;
    Ok(Json(result).into_response())
}

async fn connect_broadcaster_transport(
    State(state): State<GatewayState>,
    Path((room_id, broadcaster_id, transport_id)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Result<Response, (StatusCode, String)> {
    let room = resolve_room(&state, room_id).await?;
    let dtls_parameters = body.get("dtlsParameters").cloned().unwrap_or(Value::Null);
    room.connect_broadcaster_transport(broadcaster_id, transport_id, dtls_parameters)
        .await
        .map_err(|error| http_error(&error))?;
    Ok(StatusCode::OK.into_response())
}

async fn create_broadcaster_producer(
    State(state): State<GatewayState>,
    Path((room_id, broadcaster_id, transport_id)): Path<(String, String, String)>,
    Json(request): Json<CreateBroadcasterProducerRequest>,
) -> Result<Response, (StatusCode, String)> {
    let room = resolve_room(&state, room_id).await?;
    let result = room
        .create_broadcaster_producer(broadcaster_id, transport_id, request)
        .await
        .map_err(|error| http_error(&error))?;
    Ok(Json(result).into_response())
}

async fn create_broadcaster_consumer(
    State(state): State<GatewayState>,
    Path((room_id, broadcaster_id, transport_id)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, (StatusCode, String)> {
    let room = resolve_room(&state, room_id).await?;
    let producer_id = params
        .get("producerId")
        .filter(|id| !id.is_empty())
        .cloned()
        .ok_or((
            StatusCode::BAD_REQUEST,
            "missing producerId query parameter".to_string(),
        ))?;
    let result = room
        .create_broadcaster_consumer(broadcaster_id, transport_id, producer_id)
        .await
        .map_err(|error| http_error(&error))?;
    Ok(Json(result).into_response())
}

async fn create_broadcaster_data_producer(
    State(state): State<GatewayState>,
    Path((room_id, broadcaster_id, transport_id)): Path<(String, String, String)>,
    Json(request): Json<CreateBroadcasterDataProducerRequest>,
) -> Result<Response, (StatusCode, String)> {
    let room = resolve_room(&state, room_id).await?;
    let result = room
        .create_broadcaster_data_producer(broadcaster_id, transport_id, request)
        .await
        .map_err(|error| http_error(&error))?;
    Ok(Json(result).into_response())
}

async fn create_broadcaster_data_consumer(
    State(state): State<GatewayState>,
    Path((room_id, broadcaster_id, transport_id)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, (StatusCode, String)> {
    let room = resolve_room(&state, room_id).await?;
    let data_producer_id = params
        .get("dataProducerId")
        .filter(|id| !id.is_empty())
        .cloned()
        .ok_or((
            StatusCode::BAD_REQUEST,
            "missing dataProducerId query parameter".to_string(),
        ))?;
    let result = room
        .create_broadcaster_data_consumer(broadcaster_id, transport_id, data_producer_id)
        .await
        .map_err(|error| http_error(&error))?;
    Ok(Json(result).into_response())
}
