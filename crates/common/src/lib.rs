//! Common types shared across the session router crates.

#![warn(clippy::pedantic)]

/// Module for identifier and role types
pub mod types;

pub use types::{InvalidPeerRole, InvalidRoomId, PeerId, PeerRole, RoomId};
