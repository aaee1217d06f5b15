//! Method registry and request dispatch.
//!
//! The registry is an explicit table built once at construction: every
//! method is registered by name and stored under the same checksum id that
//! `Request` frames carry, so client and server tables bind purely through
//! matching name strings. Registration order does not matter.

use crate::actors::RoomHandle;
use crate::rpc::transport::{Dispatch, InboundRequest, RpcError};

use futures::future::BoxFuture;
use serde_json::Value;
use signal_protocol::method_id;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Context handed to every method handler.
#[derive(Debug, Clone)]
pub struct RpcContext {
    /// Id of the calling peer.
    pub peer_id: String,
    /// Sequence number of the request being served.
    pub seq: u32,
    /// Handle to the room serving the request.
    pub room: RoomHandle,
}

/// A registered method handler.
pub type HandlerFn =
    Arc<dyn Fn(RpcContext, Vec<Value>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

struct RegisteredMethod {
    name: &'static str,
    handler: HandlerFn,
}

/// Explicit `methodId -> handler` table.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<u32, RegisteredMethod>,
}

impl MethodRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its method name.
    ///
    /// A checksum collision with an already registered name keeps the first
    /// registration and logs the conflict.
    pub fn define(&mut self, name: &'static str, handler: HandlerFn) {
        let id = method_id(name);
        if let Some(existing) = self.methods.get(&id) {
            error!(
                target: "rpc.registry",
                name,
                existing = existing.name,
                id,
                "method id collision, keeping existing registration"
            );
            return;
        }
        self.methods.insert(id, RegisteredMethod { name, handler });
    }

    /// Look up a handler by wire id.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<(&'static str, HandlerFn)> {
        self.methods
            .get(&id)
            .map(|method| (method.name, Arc::clone(&method.handler)))
    }

    /// Look up a handler by method name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<(&'static str, HandlerFn)> {
        self.get(method_id(name))
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Binds a registry, a room and a peer identity into the transport's
/// dispatch seam.
pub struct RoomDispatcher {
    registry: Arc<MethodRegistry>,
    room: RoomHandle,
    peer_id: String,
}

impl RoomDispatcher {
    /// Create a dispatcher for one peer connection.
    #[must_use]
    pub fn new(registry: Arc<MethodRegistry>, room: RoomHandle, peer_id: String) -> Self {
        Self {
            registry,
            room,
            peer_id,
        }
    }
}

impl Dispatch for RoomDispatcher {
    fn dispatch(&self, request: InboundRequest) -> BoxFuture<'static, Result<Value, RpcError>> {
        match self.registry.get(request.method_id) {
            None => Box::pin(std::future::ready(Err(RpcError::unknown_method()))),
            Some((name, handler)) => {
                debug!(
                    target: "rpc.registry",
                    peer = %self.peer_id,
                    method = name,
                    seq = request.seq,
                    "dispatching request"
                );
                let context = RpcContext {
                    peer_id: self.peer_id.clone(),
                    seq: request.seq,
                    room: self.room.clone(),
                };
                handler(context, request.args)
            }
        }
    }
}
