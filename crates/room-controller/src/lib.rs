//! Room Controller Service Library
//!
//! Signaling and session-orchestration layer for multi-party real-time
//! media rooms:
//!
//! - Persistent duplex WebSocket connections per participant
//! - A framed request/response/notify RPC protocol multiplexed over them
//!   (see the `signal-protocol` crate)
//! - Room/peer orchestration that drives a pool of media workers through
//!   the `media-engine` collaborator interface: per-participant transports,
//!   producers and consumers
//!
//! # Architecture
//!
//! One actor per unit of mutable state, so handlers never share maps:
//!
//! ```text
//! RoomManagerActor (singleton per process)
//! ├── fixed media worker pool, round-robin room assignment
//! └── RoomActor (one per room, bound to one worker for its lifetime)
//!     ├── peers, broadcasters, router, observers, bot
//!     └── RpcTransport (one per peer connection)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - manager and room actors
//! - [`bot`] - the room's echo data channel
//! - [`config`] - service configuration from environment
//! - [`errors`] - error types
//! - [`gateway`] - WebSocket endpoint and admin HTTP surface
//! - [`handlers`] - RPC method table
//! - [`rpc`] - per-connection transport and dispatch

pub mod actors;
pub mod bot;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod rpc;
