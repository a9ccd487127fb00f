//! Signaling protocol for the session router.
//!
//! Every frame, in both directions, is a JSON text message shaped as
//! `{ "action": <string>, "data": <object> }`. Failures travel as
//! `{ "action": "error", "message": <string> }`.
//!
//! Client requests decode into the closed [`ClientAction`] enum so the
//! gateway dispatch is an exhaustive `match`; server replies are built from
//! [`ServerMessage`].

#![warn(clippy::pedantic)]

pub mod actions;
pub mod envelope;
pub mod replies;

pub use actions::{
    ClientAction, ConnectTransport, Consume, JoinRoom, MediaKind, Produce, ACTION_NAMES,
};
pub use envelope::{Envelope, ProtocolError};
pub use replies::{
    ConsumedData, JoinedRoomData, ProducedData, ProducerSummary, ServerEnvelope, ServerMessage,
    TransportCreatedData,
};
