//! Actor model implementation for the session router.
//!
//! ```text
//! SessionRegistryActor (singleton per process)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns the room's router handle
//!         └── owns N Peers (one per joined signaling connection)
//!             └── transport, producer and consumer handles
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer per room**: every peer-map mutation is a message to the
//!   room's actor, so two connections never race on the same map
//! - **Engine creates outside, closes inside**: connection tasks call the
//!   media engine to create resources and hand the handles to the room; the
//!   room closes them when a peer leaves or the room shuts down
//! - **CancellationToken propagation**: rooms get child tokens of the registry
//! - **Mailbox monitoring**: depth thresholds with metrics (Registry: 100/500, Room: 50/200)
//!
//! # Modules
//!
//! - [`registry`] - `SessionRegistryActor`, room id to room map
//! - [`room`] - `RoomActor`, one per active room
//! - [`peer`] - per-connection handle bookkeeping owned by a room
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod peer;
pub mod registry;
pub mod room;

// Re-export primary types
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use peer::Peer;
pub use registry::{RegistrySettings, SessionRegistryActor, SessionRegistryHandle};
pub use room::{RoomActor, RoomHandle};
