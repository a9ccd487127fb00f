//! Pre-configured signaling payloads.
//!
//! Shapes follow what a browser WebRTC client sends: RTP parameters for
//! `produce`, device RTP capabilities for `consume`, DTLS parameters for
//! `connectTransport`.

use common::{PeerRole, RoomId};
use serde_json::{json, Value};
use signaling_protocol::{ClientAction, ConnectTransport, Consume, JoinRoom, MediaKind, Produce};
use uuid::Uuid;

/// A room id that no other test uses.
#[must_use]
pub fn random_room_id() -> String {
    format!("room-{}", Uuid::new_v4())
}

/// RTP parameters of a VP8 video send stream.
#[must_use]
pub fn video_rtp_parameters() -> Value {
    json!({
        "mid": "0",
        "codecs": [{
            "mimeType": "video/VP8",
            "payloadType": 101,
            "clockRate": 90000,
            "parameters": {},
            "rtcpFeedback": [{ "type": "nack" }, { "type": "goog-remb" }]
        }],
        "headerExtensions": [],
        "encodings": [{ "ssrc": 22_222_222 }],
        "rtcp": { "cname": "test-cname", "reducedSize": true }
    })
}

/// RTP parameters of an opus audio send stream.
#[must_use]
pub fn audio_rtp_parameters() -> Value {
    json!({
        "mid": "1",
        "codecs": [{
            "mimeType": "audio/opus",
            "payloadType": 100,
            "clockRate": 48000,
            "channels": 2,
            "parameters": { "useinbandfec": 1 },
            "rtcpFeedback": []
        }],
        "headerExtensions": [],
        "encodings": [{ "ssrc": 11_111_111 }],
        "rtcp": { "cname": "test-cname", "reducedSize": true }
    })
}

/// RTP parameters for `kind`.
#[must_use]
pub fn rtp_parameters(kind: MediaKind) -> Value {
    match kind {
        MediaKind::Audio => audio_rtp_parameters(),
        MediaKind::Video => video_rtp_parameters(),
    }
}

/// Receive capabilities of a client that supports opus and VP8.
#[must_use]
pub fn rtp_capabilities() -> Value {
    json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ],
        "headerExtensions": []
    })
}

/// Receive capabilities of a client that only decodes H264.
#[must_use]
pub fn h264_only_rtp_capabilities() -> Value {
    json!({
        "codecs": [
            { "kind": "video", "mimeType": "video/H264", "clockRate": 90000 }
        ],
        "headerExtensions": []
    })
}

/// Client DTLS parameters for `connectTransport`.
#[must_use]
pub fn dtls_parameters() -> Value {
    json!({
        "role": "client",
        "fingerprints": [{
            "algorithm": "sha-256",
            "value": "82:5A:68:3D:36:C3:0A:DE:AF:E7:32:43:D2:88:83:57:AC:2D:65:E5:80:C4:B6:FB:AF:1A:A0:21:9F:6D:0C:AD"
        }]
    })
}

/// `joinRoom` with an explicit role.
///
/// # Panics
///
/// Panics if `room_id` is not a valid room id.
#[must_use]
pub fn join_action(room_id: &str, role: PeerRole) -> ClientAction {
    ClientAction::JoinRoom(JoinRoom {
        room_id: RoomId::parse(room_id).expect("valid room id"),
        role: Some(role),
        is_mentor: None,
    })
}

#[must_use]
pub fn connect_action(transport_id: &str) -> ClientAction {
    ClientAction::ConnectTransport(ConnectTransport {
        transport_id: transport_id.to_string(),
        dtls_parameters: dtls_parameters(),
    })
}

/// `produce` of `kind`; `is_mentor: None` lets the join role decide.
#[must_use]
pub fn produce_action(transport_id: &str, kind: MediaKind, is_mentor: Option<bool>) -> ClientAction {
    ClientAction::Produce(Produce {
        transport_id: transport_id.to_string(),
        kind,
        rtp_parameters: rtp_parameters(kind),
        is_mentor,
    })
}

#[must_use]
pub fn consume_action(transport_id: &str) -> ClientAction {
    ClientAction::Consume(Consume {
        transport_id: transport_id.to_string(),
        rtp_capabilities: rtp_capabilities(),
    })
}
