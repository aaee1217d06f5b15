//! RPC method handlers.
//!
//! Handlers are thin: parse the request body, call the room handle, encode
//! the result. All room logic lives in the room actor. The registry is
//! built explicitly at construction; there is no reflective scanning.

use crate::actors::messages::{
    ConnectWebRtcTransportRequest, CreateWebRtcTransportRequest, JoinRequest,
    NetworkThrottleRequest, ProduceDataRequest, ProduceRequest,
};
use crate::rpc::{HandlerFn, MethodRegistry, RpcContext, RpcError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransportIdRequest {
    transport_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProducerIdRequest {
    producer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumerIdRequest {
    consumer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataProducerIdRequest {
    data_producer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataConsumerIdRequest {
    data_consumer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisplayNameRequest {
    display_name: String,
}

fn parse_request<T: DeserializeOwned>(args: &[Value]) -> Result<T, RpcError> {
    let body = args.first().cloned().unwrap_or(Value::Null);
    serde_json::from_value(body)
        .map_err(|error| RpcError::new(500, format!("invalid request: {error}")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|error| RpcError::new(500, error.to_string()))
}

fn method<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(RpcContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    Arc::new(move |ctx, args| Box::pin(f(ctx, args)))
}

/// Build the method table served to every peer connection.
#[must_use]
pub fn build_registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();

    registry.define("getRouterRtpCapabilities", method(get_router_rtp_capabilities));
    registry.define("join", method(join));
    registry.define("createWebRtcTransport", method(create_webrtc_transport));
    registry.define("connectWebRtcTransport", method(connect_webrtc_transport));
    registry.define("restartIce", method(restart_ice));
    registry.define("produce", method(produce));
    registry.define("produceData", method(produce_data));
    registry.define("pauseConsumer", method(pause_consumer));
    registry.define("resumeConsumer", method(resume_consumer));
    registry.define("requestConsumerKeyFrame", method(request_consumer_key_frame));
    registry.define("changeDisplayName", method(change_display_name));
    registry.define("getTransportStats", method(get_transport_stats));
    registry.define("getProducerStats", method(get_producer_stats));
    registry.define("getConsumerStats", method(get_consumer_stats));
    registry.define("getDataProducerStats", method(get_data_producer_stats));
    registry.define("getDataConsumerStats", method(get_data_consumer_stats));
    registry.define("applyNetworkThrottle", method(apply_network_throttle));
    registry.define("resetNetworkThrottle", method(reset_network_throttle));

    registry
}

async fn get_router_rtp_capabilities(
    ctx: RpcContext,
    _args: Vec<Value>,
) -> Result<Value, RpcError> {
    Ok(ctx.room.router_rtp_capabilities().await?)
}

async fn join(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: JoinRequest = parse_request(&args)?;
    let result = ctx.room.join(ctx.peer_id, request).await?;
    to_value(&result)
}

async fn create_webrtc_transport(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: CreateWebRtcTransportRequest = parse_request(&args)?;
    let result = ctx.room.create_webrtc_transport(ctx.peer_id, request).await?;
    to_value(&result)
}

async fn connect_webrtc_transport(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: ConnectWebRtcTransportRequest = parse_request(&args)?;
    ctx.room
        .connect_webrtc_transport(ctx.peer_id, request)
        .await?;
    Ok(json!(true))
}

async fn restart_ice(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: TransportIdRequest = parse_request(&args)?;
    Ok(ctx
        .room
        .restart_ice(ctx.peer_id, request.transport_id)
        .await?)
}

async fn produce(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: ProduceRequest = parse_request(&args)?;
    let result = ctx.room.produce(ctx.peer_id, request).await?;
    to_value(&result)
}

async fn produce_data(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: ProduceDataRequest = parse_request(&args)?;
    let result = ctx.room.produce_data(ctx.peer_id, request).await?;
    to_value(&result)
}

async fn pause_consumer(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: ConsumerIdRequest = parse_request(&args)?;
    ctx.room
        .pause_consumer(ctx.peer_id, request.consumer_id)
        .await?;
    Ok(Value::Null)
}

async fn resume_consumer(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: ConsumerIdRequest = parse_request(&args)?;
    ctx.room
        .resume_consumer(ctx.peer_id, request.consumer_id)
        .await?;
    Ok(Value::Null)
}

async fn request_consumer_key_frame(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: ConsumerIdRequest = parse_request(&args)?;
    ctx.room
        .request_consumer_key_frame(ctx.peer_id, request.consumer_id)
        .await?;
    Ok(Value::Null)
}

async fn change_display_name(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: DisplayNameRequest = parse_request(&args)?;
    ctx.room
        .change_display_name(ctx.peer_id, request.display_name)
        .await?;
    Ok(json!(true))
}

async fn get_transport_stats(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: TransportIdRequest = parse_request(&args)?;
    Ok(ctx
        .room
        .transport_stats(ctx.peer_id, request.transport_id)
        .await?)
}

async fn get_producer_stats(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: ProducerIdRequest = parse_request(&args)?;
    Ok(ctx
        .room
        .producer_stats(ctx.peer_id, request.producer_id)
        .await?)
}

async fn get_consumer_stats(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: ConsumerIdRequest = parse_request(&args)?;
    Ok(ctx
        .room
        .consumer_stats(ctx.peer_id, request.consumer_id)
        .await?)
}

async fn get_data_producer_stats(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: DataProducerIdRequest = parse_request(&args)?;
    Ok(ctx
        .room
        .data_producer_stats(ctx.peer_id, request.data_producer_id)
        .await?)
}

async fn get_data_consumer_stats(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: DataConsumerIdRequest = parse_request(&args)?;
    Ok(ctx
        .room
        .data_consumer_stats(ctx.peer_id, request.data_consumer_id)
        .await?)
}

async fn apply_network_throttle(ctx: RpcContext, args: Vec<Value>) -> Result<Value, RpcError> {
    let request: NetworkThrottleRequest = parse_request(&args)?;
    ctx.room
        .apply_network_throttle(ctx.peer_id, request)
        .await?;
    Ok(Value::Null)
}

async fn reset_network_throttle(ctx: RpcContext, _args: Vec<Value>) -> Result<Value, RpcError> {
    ctx.room.reset_network_throttle(ctx.peer_id).await?;
    Ok(Value::Null)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use signal_protocol::method_id;

    #[test]
    fn test_registry_holds_the_full_method_set() {
        let registry = build_registry();
        assert_eq!(registry.len(), 18);

        for name in [
            "getRouterRtpCapabilities",
            "join",
            "createWebRtcTransport",
            "connectWebRtcTransport",
            "restartIce",
            "produce",
            "produceData",
            "pauseConsumer",
            "resumeConsumer",
            "requestConsumerKeyFrame",
            "changeDisplayName",
            "getTransportStats",
            "getProducerStats",
            "getConsumerStats",
            "getDataProducerStats",
            "getDataConsumerStats",
            "applyNetworkThrottle",
            "resetNetworkThrottle",
        ] {
            let (registered, _) = registry
                .get(method_id(name))
                .unwrap_or_else(|| panic!("method {name} missing"));
            assert_eq!(registered, name);
        }
    }

    #[test]
    fn test_parse_request_rejects_wrong_shape() {
        let error =
            parse_request::<DisplayNameRequest>(&[serde_json::json!({"wrong": 1})]).unwrap_err();
        assert_eq!(error.code, 500);
        assert!(error.message.starts_with("invalid request"));

        let error = parse_request::<DisplayNameRequest>(&[]).unwrap_err();
        assert_eq!(error.code, 500);
    }
}
