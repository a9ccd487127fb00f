//! Session Router error types.
//!
//! Every error maps to an [`ErrorClass`] that drives both the client reply and
//! the `class` label of `sr_errors_total`. Internal details (engine reasons,
//! channel failures) are logged server-side but never sent to clients.

use crate::engine::EngineError;
use signaling_protocol::ProtocolError;
use thiserror::Error;

/// Session Router error type.
#[derive(Debug, Error)]
pub enum SrError {
    /// Client frame could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Action is not valid in the connection's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    /// `consume` found no mentor producer in the room.
    #[error("No producer available")]
    NoProducerAvailable,

    /// The engine reports the caller cannot consume the selected producer.
    #[error("Incompatible RTP capabilities for producer {0}")]
    IncompatibleCapabilities(String),

    /// Media engine rejected an operation.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Duplicate identifier (e.g., peer already in room).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Room is at its peer limit.
    #[error("Room at capacity: {0}")]
    RoomCapacityExceeded(String),

    /// Registry is at its room limit.
    #[error("Registry at capacity")]
    RegistryCapacityExceeded,

    /// Registry is shutting down.
    #[error("Session router is draining")]
    Draining,

    /// Room actor has stopped (closed while empty, or shut down).
    #[error("Room closed")]
    RoomClosed,

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error classes exposed in replies and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Protocol,
    State,
    NotFound,
    Engine,
    Capacity,
    Internal,
}

impl ErrorClass {
    /// Metric label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Protocol => "protocol",
            ErrorClass::State => "state",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Engine => "engine",
            ErrorClass::Capacity => "capacity",
            ErrorClass::Internal => "internal",
        }
    }
}

impl SrError {
    /// Returns the class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            SrError::Protocol(_) | SrError::IncompatibleCapabilities(_) => ErrorClass::Protocol,
            SrError::InvalidState(_) | SrError::Conflict(_) | SrError::NoProducerAvailable => {
                ErrorClass::State
            }
            SrError::RoomNotFound(_)
            | SrError::PeerNotFound(_)
            | SrError::TransportNotFound(_)
            | SrError::ProducerNotFound(_)
            | SrError::ConsumerNotFound(_) => ErrorClass::NotFound,
            SrError::Engine(_) => ErrorClass::Engine,
            SrError::RoomCapacityExceeded(_)
            | SrError::RegistryCapacityExceeded
            | SrError::Draining => ErrorClass::Capacity,
            SrError::RoomClosed | SrError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SrError::Protocol(e) => e.client_message(),
            SrError::InvalidState(msg) | SrError::Conflict(msg) => msg.clone(),
            SrError::RoomNotFound(_) => "Room not found".to_string(),
            SrError::PeerNotFound(_) => "Peer not found".to_string(),
            SrError::TransportNotFound(_) => "Transport not found".to_string(),
            SrError::ProducerNotFound(_) => "Producer not found".to_string(),
            SrError::ConsumerNotFound(_) => "Consumer not found".to_string(),
            SrError::NoProducerAvailable => "No producer available".to_string(),
            SrError::IncompatibleCapabilities(_) => {
                "Cannot consume producer with the given RTP capabilities".to_string()
            }
            SrError::Engine(_) => "Media engine rejected the request".to_string(),
            SrError::RoomCapacityExceeded(_) => "Room is at capacity".to_string(),
            SrError::RegistryCapacityExceeded => {
                "Server is at capacity, please try again".to_string()
            }
            SrError::Draining => "Server is shutting down, please reconnect".to_string(),
            SrError::RoomClosed | SrError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
