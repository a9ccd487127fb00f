//! Server-to-client replies.

use crate::actions::MediaKind;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// `joinedRoom` data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoomData {
    pub room_id: String,
    pub peer_id: String,
}

/// `transportCreated` data: everything the client needs to build its side
/// of the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportCreatedData {
    pub transport_id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// `produced` data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducedData {
    pub producer_id: String,
}

/// `consumed` data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedData {
    pub consumer_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(rename = "type")]
    pub consumer_type: String,
}

/// One entry of the `producers` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSummary {
    pub producer_id: String,
    pub peer_id: String,
    pub kind: MediaKind,
    pub is_mentor: bool,
}

/// Reply frames sent by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    JoinedRoom(JoinedRoomData),
    RtpCapabilities(Value),
    TransportCreated(TransportCreatedData),
    Connected,
    Produced(ProducedData),
    Consumed(ConsumedData),
    Producers(Vec<ProducerSummary>),
    LeftRoom,
    Error { message: String },
}

impl ServerMessage {
    /// Build an error reply.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Wire name of the reply.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            ServerMessage::JoinedRoom(_) => "joinedRoom",
            ServerMessage::RtpCapabilities(_) => "rtpCapabilities",
            ServerMessage::TransportCreated(_) => "transportCreated",
            ServerMessage::Connected => "connected",
            ServerMessage::Produced(_) => "produced",
            ServerMessage::Consumed(_) => "consumed",
            ServerMessage::Producers(_) => "producers",
            ServerMessage::LeftRoom => "leftRoom",
            ServerMessage::Error { .. } => "error",
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error { .. })
    }

    /// Encode as a JSON text frame.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"action":"error","message":"Encoding failed"}"#.to_string())
    }
}

impl Serialize for ServerMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("action", self.action())?;
        match self {
            ServerMessage::JoinedRoom(data) => map.serialize_entry("data", data)?,
            ServerMessage::RtpCapabilities(data) => map.serialize_entry("data", data)?,
            ServerMessage::TransportCreated(data) => map.serialize_entry("data", data)?,
            ServerMessage::Produced(data) => map.serialize_entry("data", data)?,
            ServerMessage::Consumed(data) => map.serialize_entry("data", data)?,
            ServerMessage::Producers(data) => map.serialize_entry("data", data)?,
            ServerMessage::Connected | ServerMessage::LeftRoom => {
                map.serialize_entry("data", &serde_json::Map::new())?;
            }
            ServerMessage::Error { message } => map.serialize_entry("message", message)?,
        }
        map.end()
    }
}

/// Loosely-typed view of a reply, for clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerEnvelope {
    pub action: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: Option<String>,
}

impl ServerEnvelope {
    /// Decode the `data` payload into a typed reply struct.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the payload does not match `T`.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.action == "error"
    }
}
