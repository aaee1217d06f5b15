//! Actor model implementation.
//!
//! The controller uses an actor hierarchy with one mailbox per unit of
//! mutable state, so no locking is needed around room or peer maps:
//!
//! ```text
//! RoomManagerActor (singleton)
//! ├── owns the media worker pool (round-robin assignment)
//! └── supervises N RoomActors
//!     └── RoomActor (one per room)
//!         ├── owns all room state (peers, broadcasters, router, bot)
//!         └── owns one RpcTransport per connected peer
//! ```

pub mod manager;
pub mod messages;
pub mod peer;
pub mod room;

pub use manager::RoomManagerHandle;
pub use messages::{ManagerStatus, RoomStatus};
pub use room::{RoomActor, RoomHandle};
