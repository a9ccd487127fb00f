//! Signaling gateway: WebSocket listener plus the per-connection protocol
//! state machine.
//!
//! - [`session`] - `SignalingSession`, action dispatch for one connection
//! - [`ws`] - axum WebSocket routes and the connection loop

pub mod session;
pub mod ws;

pub use session::{GatewayContext, SignalingSession};
pub use ws::{run_connection, signaling_router};
