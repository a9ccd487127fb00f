//! Identifier and role types for rooms and peers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Maximum accepted length of a caller-supplied room identifier.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Identifier of a room, supplied by the caller (typically a session id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

/// Rejected room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRoomId {
    #[error("room id must not be empty")]
    Empty,

    #[error("room id exceeds {MAX_ROOM_ID_LEN} characters")]
    TooLong,
}

impl RoomId {
    /// Validate and wrap a room identifier.
    ///
    /// Surrounding whitespace is trimmed; the result must be non-empty and at
    /// most [`MAX_ROOM_ID_LEN`] characters.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, InvalidRoomId> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(InvalidRoomId::Empty);
        }
        if trimmed.chars().count() > MAX_ROOM_ID_LEN {
            return Err(InvalidRoomId::TooLong);
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = InvalidRoomId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-unique identifier of a peer (one per signaling connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Create a new random peer ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role handed in by the authentication layer and trusted as given.
///
/// Accepted case-insensitively on the wire; always sent lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum PeerRole {
    Mentor,
    #[default]
    Mentee,
}

/// Rejected role string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role `{0}`, expected `mentor` or `mentee`")]
pub struct InvalidPeerRole(pub String);

impl PeerRole {
    /// Parse a role, ignoring ASCII case.
    pub fn parse(value: &str) -> Result<Self, InvalidPeerRole> {
        if value.eq_ignore_ascii_case("mentor") {
            Ok(PeerRole::Mentor)
        } else if value.eq_ignore_ascii_case("mentee") {
            Ok(PeerRole::Mentee)
        } else {
            Err(InvalidPeerRole(value.to_string()))
        }
    }

    #[must_use]
    pub const fn is_mentor(self) -> bool {
        matches!(self, PeerRole::Mentor)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PeerRole::Mentor => "mentor",
            PeerRole::Mentee => "mentee",
        }
    }
}

impl TryFrom<String> for PeerRole {
    type Error = InvalidPeerRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<bool> for PeerRole {
    fn from(is_mentor: bool) -> Self {
        if is_mentor {
            PeerRole::Mentor
        } else {
            PeerRole::Mentee
        }
    }
}
