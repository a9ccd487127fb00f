//! Client-to-server actions.

use crate::envelope::{Envelope, ProtocolError};
use common::{PeerRole, RoomId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JOIN_ROOM: &str = "joinRoom";
pub const GET_RTP_CAPABILITIES: &str = "getRTPCapabilities";
pub const CREATE_WEBRTC_TRANSPORT: &str = "createWebRtcTransport";
pub const CONNECT_TRANSPORT: &str = "connectTransport";
pub const PRODUCE: &str = "produce";
pub const CONSUME: &str = "consume";
pub const GET_PRODUCERS: &str = "getProducers";
pub const LEAVE_ROOM: &str = "leaveRoom";

/// Every action name the gateway understands. Bounded set, safe as a metric label.
pub const ACTION_NAMES: [&str; 8] = [
    JOIN_ROOM,
    GET_RTP_CAPABILITIES,
    CREATE_WEBRTC_TRANSPORT,
    CONNECT_TRANSPORT,
    PRODUCE,
    CONSUME,
    GET_PRODUCERS,
    LEAVE_ROOM,
];

/// Media kind of a producer or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// `joinRoom` payload.
///
/// `role` is the current field; `isMentor` is the older boolean form and is
/// only consulted when `role` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<PeerRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_mentor: Option<bool>,
}

impl JoinRoom {
    /// Effective role of the joining peer (mentee when nothing is given).
    #[must_use]
    pub fn role(&self) -> PeerRole {
        self.role
            .or_else(|| self.is_mentor.map(PeerRole::from))
            .unwrap_or_default()
    }
}

/// `connectTransport` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransport {
    pub transport_id: String,
    pub dtls_parameters: Value,
}

/// `produce` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Produce {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_mentor: Option<bool>,
}

/// `consume` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consume {
    pub transport_id: String,
    pub rtp_capabilities: Value,
}

/// Closed set of client requests.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    JoinRoom(JoinRoom),
    GetRtpCapabilities,
    CreateWebRtcTransport,
    ConnectTransport(ConnectTransport),
    Produce(Produce),
    Consume(Consume),
    GetProducers,
    LeaveRoom,
}

impl ClientAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientAction::JoinRoom(_) => JOIN_ROOM,
            ClientAction::GetRtpCapabilities => GET_RTP_CAPABILITIES,
            ClientAction::CreateWebRtcTransport => CREATE_WEBRTC_TRANSPORT,
            ClientAction::ConnectTransport(_) => CONNECT_TRANSPORT,
            ClientAction::Produce(_) => PRODUCE,
            ClientAction::Consume(_) => CONSUME,
            ClientAction::GetProducers => GET_PRODUCERS,
            ClientAction::LeaveRoom => LEAVE_ROOM,
        }
    }

    /// Decode a text frame into an action.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for malformed envelopes, unknown action
    /// names, or payloads that do not match the action.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Self::try_from(Envelope::parse(text)?)
    }

    /// Encode the action as a wire envelope (used by clients and tests).
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        let data = match self {
            ClientAction::JoinRoom(payload) => to_value(payload),
            ClientAction::ConnectTransport(payload) => to_value(payload),
            ClientAction::Produce(payload) => to_value(payload),
            ClientAction::Consume(payload) => to_value(payload),
            ClientAction::GetRtpCapabilities
            | ClientAction::CreateWebRtcTransport
            | ClientAction::GetProducers
            | ClientAction::LeaveRoom => Value::Object(serde_json::Map::new()),
        };
        Envelope {
            action: self.name().to_string(),
            data,
        }
    }

    /// Encode the action as a JSON text frame.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(&self.to_envelope()).unwrap_or_default()
    }
}

impl TryFrom<Envelope> for ClientAction {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope { action, data } = envelope;
        match action.as_str() {
            JOIN_ROOM => payload(&action, data).map(ClientAction::JoinRoom),
            GET_RTP_CAPABILITIES => Ok(ClientAction::GetRtpCapabilities),
            CREATE_WEBRTC_TRANSPORT => Ok(ClientAction::CreateWebRtcTransport),
            CONNECT_TRANSPORT => payload(&action, data).map(ClientAction::ConnectTransport),
            PRODUCE => payload(&action, data).map(ClientAction::Produce),
            CONSUME => payload(&action, data).map(ClientAction::Consume),
            GET_PRODUCERS => Ok(ClientAction::GetProducers),
            LEAVE_ROOM => Ok(ClientAction::LeaveRoom),
            _ => Err(ProtocolError::UnknownAction(action)),
        }
    }
}

fn payload<T: DeserializeOwned>(action: &str, data: Value) -> Result<T, ProtocolError> {
    if data.is_null() {
        return Err(ProtocolError::InvalidData {
            action: action.to_string(),
            reason: "missing data".to_string(),
        });
    }
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidData {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
