//! RPC layer: per-connection transport and method dispatch.

pub mod registry;
pub mod transport;

pub use registry::{HandlerFn, MethodRegistry, RoomDispatcher, RpcContext};
pub use transport::{
    Dispatch, InboundRequest, NotifyEvent, RpcError, RpcOutcome, RpcTransport,
    DEFAULT_REQUEST_TIMEOUT,
};
