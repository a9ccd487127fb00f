//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use super::room::RoomHandle;
use crate::engine::{ConsumerHandle, EngineError, ProducerHandle, RouterHandle, TransportHandle};
use crate::errors::SrError;
use common::{PeerId, RoomId};
use signaling_protocol::{MediaKind, ProducerSummary};
use tokio::sync::oneshot;

/// Messages sent to `SessionRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Return the room for `room_id`, creating it (and its router) if absent.
    GetOrCreateRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomHandle, SrError>>,
    },

    /// Return the room for `room_id` without creating it.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomHandle, SrError>>,
    },

    /// A router creation started by `GetOrCreateRoom` finished. Sent by the
    /// registry's own creation task; installs the room and answers every
    /// joiner waiting on it.
    RoomCreated {
        room_id: RoomId,
        result: Result<RouterHandle, EngineError>,
    },

    /// The room with `router_id` closed itself because it was empty. Replies
    /// `true` if the entry was still in the map and this call removed it.
    RoomReleased {
        room_id: RoomId,
        router_id: String,
        respond_to: oneshot::Sender<bool>,
    },

    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting rooms and close every room.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), SrError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Add a peer. Replies with the new peer count.
    AddPeer {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Result<usize, SrError>>,
    },

    GetPeer {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Result<PeerInfo, SrError>>,
    },

    GetPeers {
        respond_to: oneshot::Sender<Vec<PeerInfo>>,
    },

    /// Close all of a peer's handles and remove it. Replies `None` if the
    /// peer was not in the room.
    RemovePeer {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Option<PeerRemoval>>,
    },

    AddTransport {
        peer_id: PeerId,
        transport: TransportHandle,
        respond_to: oneshot::Sender<Result<(), SrError>>,
    },

    GetTransport {
        peer_id: PeerId,
        transport_id: String,
        respond_to: oneshot::Sender<Result<TransportHandle, SrError>>,
    },

    /// Record a producer; the room assigns its creation sequence number.
    AddProducer {
        peer_id: PeerId,
        producer: ProducerHandle,
        respond_to: oneshot::Sender<Result<ProducerInfo, SrError>>,
    },

    GetProducer {
        peer_id: PeerId,
        producer_id: String,
        respond_to: oneshot::Sender<Result<ProducerInfo, SrError>>,
    },

    AddConsumer {
        peer_id: PeerId,
        consumer: ConsumerHandle,
        respond_to: oneshot::Sender<Result<(), SrError>>,
    },

    GetConsumer {
        peer_id: PeerId,
        consumer_id: String,
        respond_to: oneshot::Sender<Result<ConsumerHandle, SrError>>,
    },

    /// Earliest-recorded mentor producer in the room.
    SelectMentorProducer {
        respond_to: oneshot::Sender<Option<ProducerInfo>>,
    },

    /// Earliest-recorded mentor producer owned by `peer_id`.
    MentorProducerOf {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Option<ProducerInfo>>,
    },

    ProducersExcluding {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Vec<ProducerInfo>>,
    },

    AllProducers {
        respond_to: oneshot::Sender<Vec<ProducerInfo>>,
    },

    /// Close the router and stop the actor if there are no peers. Replies
    /// `true` if the room closed.
    CloseIfEmpty {
        respond_to: oneshot::Sender<bool>,
    },

    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Resource summary of one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

/// Producer as seen outside its room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    pub producer_id: String,
    pub peer_id: PeerId,
    pub kind: MediaKind,
    pub is_mentor: bool,
    /// Room-local creation sequence number.
    pub seq: u64,
}

impl ProducerInfo {
    /// Wire form used in `producers` replies.
    #[must_use]
    pub fn to_summary(&self) -> ProducerSummary {
        ProducerSummary {
            producer_id: self.producer_id.clone(),
            peer_id: self.peer_id.to_string(),
            kind: self.kind,
            is_mentor: self.is_mentor,
        }
    }
}

/// Outcome of removing a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRemoval {
    /// Engine handles closed for the peer.
    pub handles_closed: usize,
    /// Peers left in the room.
    pub remaining_peers: usize,
}

/// Snapshot of a room (for diagnostics and tests).
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: RoomId,
    pub router_id: String,
    pub peers: Vec<PeerInfo>,
    pub producer_count: usize,
    pub created_at: i64,
}

/// Registry status (for health checks and tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatus {
    pub room_count: usize,
    pub peer_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
