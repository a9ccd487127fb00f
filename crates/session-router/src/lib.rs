//! Session Router Library
//!
//! Real-time session routing for one-mentor-to-many-mentee live video:
//!
//! - WebSocket signaling with a closed JSON action set
//! - Room membership, created on first join and removed when empty
//! - Per-peer transport, producer and consumer lifecycles against a media engine
//! - Deterministic mentor-stream selection for `consume`
//! - Graceful shutdown that releases every engine resource
//!
//! # Architecture
//!
//! ```text
//! SignalingGateway (one task per WebSocket connection)
//! │   └── SignalingSession (NotJoined -> Joined -> Left/Closed)
//! │
//! SessionRegistryActor (singleton)
//! └── RoomActor (one per active room)
//!     └── Peer (transport/producer/consumer handles)
//! ```
//!
//! Connection tasks call the [`engine::MediaEngine`] to create resources and
//! hand the resulting handles to their room actor, which owns them from then
//! on and closes them when the peer goes away.
//!
//! # Modules
//!
//! - [`actors`] - Registry and room actors, peer bookkeeping
//! - [`config`] - Service configuration from environment
//! - [`engine`] - Media engine interface, in-process engine, test double
//! - [`errors`] - Error types and their client-facing classes
//! - [`gateway`] - WebSocket listener and protocol state machine
//! - [`observability`] - Prometheus metrics and health endpoints

pub mod actors;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod observability;
