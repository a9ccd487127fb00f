//! `RoomActor` - one per active room.
//!
//! The room actor is the single writer for a room's peer map:
//!
//! - Owns every `Peer` in the room and, through them, every engine handle
//! - Owns the room's router handle and closes it when the room closes
//! - Assigns producer creation sequence numbers (mentor selection order)
//! - Never calls back into the registry
//!
//! Engine calls that create resources happen on the connection task; the
//! room only records the resulting handles. Closing happens here, because
//! the room is the owner that outlives every in-flight request.
//!
//! The actor stops when it is cancelled (shutdown) or when `CloseIfEmpty`
//! finds no peers. Once stopped it closes its mailbox and only then releases
//! the router, so callers waiting on `CloseIfEmpty` never wait on the engine.
//! Requests that reach a stopped room fail with [`SrError::RoomClosed`].

use super::messages::{PeerInfo, PeerRemoval, ProducerInfo, RoomMessage, RoomState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::peer::Peer;
use crate::engine::{ConsumerHandle, MediaEngine, ProducerHandle, RouterHandle, TransportHandle};
use crate::errors::SrError;

use common::{PeerId, RoomId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
    router: Arc<RouterHandle>,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    #[must_use]
    pub fn router_id(&self) -> &str {
        &self.router.id
    }

    /// Router RTP capabilities, fixed for the lifetime of the room.
    #[must_use]
    pub fn rtp_capabilities(&self) -> &Value {
        &self.router.rtp_capabilities
    }

    /// Whether the actor behind this handle has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, SrError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| SrError::RoomClosed)?;
        rx.await.map_err(|_| SrError::RoomClosed)
    }

    /// Add a peer; returns the new peer count.
    pub async fn add_peer(&self, peer_id: PeerId) -> Result<usize, SrError> {
        self.request(|respond_to| RoomMessage::AddPeer {
            peer_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_peer(&self, peer_id: PeerId) -> Result<PeerInfo, SrError> {
        self.request(|respond_to| RoomMessage::GetPeer {
            peer_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_peers(&self) -> Result<Vec<PeerInfo>, SrError> {
        self.request(|respond_to| RoomMessage::GetPeers { respond_to })
            .await
    }

    /// Remove a peer, closing all of its handles. `Ok(None)` if absent.
    pub async fn remove_peer(&self, peer_id: PeerId) -> Result<Option<PeerRemoval>, SrError> {
        self.request(|respond_to| RoomMessage::RemovePeer {
            peer_id,
            respond_to,
        })
        .await
    }

    pub async fn add_transport(
        &self,
        peer_id: PeerId,
        transport: TransportHandle,
    ) -> Result<(), SrError> {
        self.request(|respond_to| RoomMessage::AddTransport {
            peer_id,
            transport,
            respond_to,
        })
        .await?
    }

    pub async fn get_transport(
        &self,
        peer_id: PeerId,
        transport_id: &str,
    ) -> Result<TransportHandle, SrError> {
        let transport_id = transport_id.to_string();
        self.request(|respond_to| RoomMessage::GetTransport {
            peer_id,
            transport_id,
            respond_to,
        })
        .await?
    }

    pub async fn add_producer(
        &self,
        peer_id: PeerId,
        producer: ProducerHandle,
    ) -> Result<ProducerInfo, SrError> {
        self.request(|respond_to| RoomMessage::AddProducer {
            peer_id,
            producer,
            respond_to,
        })
        .await?
    }

    pub async fn get_producer(
        &self,
        peer_id: PeerId,
        producer_id: &str,
    ) -> Result<ProducerInfo, SrError> {
        let producer_id = producer_id.to_string();
        self.request(|respond_to| RoomMessage::GetProducer {
            peer_id,
            producer_id,
            respond_to,
        })
        .await?
    }

    pub async fn add_consumer(
        &self,
        peer_id: PeerId,
        consumer: ConsumerHandle,
    ) -> Result<(), SrError> {
        self.request(|respond_to| RoomMessage::AddConsumer {
            peer_id,
            consumer,
            respond_to,
        })
        .await?
    }

    pub async fn get_consumer(
        &self,
        peer_id: PeerId,
        consumer_id: &str,
    ) -> Result<ConsumerHandle, SrError> {
        let consumer_id = consumer_id.to_string();
        self.request(|respond_to| RoomMessage::GetConsumer {
            peer_id,
            consumer_id,
            respond_to,
        })
        .await?
    }

    pub async fn select_mentor_producer(&self) -> Result<Option<ProducerInfo>, SrError> {
        self.request(|respond_to| RoomMessage::SelectMentorProducer { respond_to })
            .await
    }

    pub async fn mentor_producer_of(
        &self,
        peer_id: PeerId,
    ) -> Result<Option<ProducerInfo>, SrError> {
        self.request(|respond_to| RoomMessage::MentorProducerOf {
            peer_id,
            respond_to,
        })
        .await
    }

    pub async fn producers_excluding(&self, peer_id: PeerId) -> Result<Vec<ProducerInfo>, SrError> {
        self.request(|respond_to| RoomMessage::ProducersExcluding {
            peer_id,
            respond_to,
        })
        .await
    }

    pub async fn all_producers(&self) -> Result<Vec<ProducerInfo>, SrError> {
        self.request(|respond_to| RoomMessage::AllProducers { respond_to })
            .await
    }

    /// Close the room if it has no peers. A room that has already stopped
    /// reports `true`.
    pub async fn close_if_empty(&self) -> Result<bool, SrError> {
        match self
            .request(|respond_to| RoomMessage::CloseIfEmpty { respond_to })
            .await
        {
            Err(SrError::RoomClosed) => Ok(true),
            result => result,
        }
    }

    pub async fn get_state(&self) -> Result<RoomState, SrError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    /// Cancel the actor (closes all peers and the router).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    router: Arc<RouterHandle>,
    engine: Arc<dyn MediaEngine>,
    peers: HashMap<PeerId, Peer>,
    /// Next producer creation sequence number.
    next_seq: u64,
    max_peers: usize,
    created_at: i64,
    /// Set once the room has closed; the loop exits after the current message.
    closed: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor owning `router`.
    pub fn spawn(
        room_id: RoomId,
        router: RouterHandle,
        engine: Arc<dyn MediaEngine>,
        max_peers: usize,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let router = Arc::new(router);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            router: Arc::clone(&router),
            engine,
            peers: HashMap::new(),
            next_seq: 0,
            max_peers,
            created_at: chrono::Utc::now().timestamp(),
            closed: false,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            cancel_token,
            room_id,
            router,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "sr.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "sr.actor.room",
            room_id = %self.room_id,
            router_id = %self.router.id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sr.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.close_room().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_depth(self.receiver.len());
                            self.handle_message(message).await;
                            self.mailbox.record_processed();
                            self.metrics.record_message_processed();
                            if self.closed {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "sr.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.close_room().await;
                            break;
                        }
                    }
                }
            }
        }

        // Requests still queued are dropped and fail with `RoomClosed`.
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}

        self.engine.close_router(&self.router.id).await;

        info!(
            target: "sr.actor.room",
            room_id = %self.room_id,
            router_id = %self.router.id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::AddPeer {
                peer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.add_peer(peer_id));
            }

            RoomMessage::GetPeer {
                peer_id,
                respond_to,
            } => {
                let result = self
                    .peers
                    .get(&peer_id)
                    .map(Peer::info)
                    .ok_or_else(|| SrError::PeerNotFound(peer_id.to_string()));
                let _ = respond_to.send(result);
            }

            RoomMessage::GetPeers { respond_to } => {
                let _ = respond_to.send(self.peers.values().map(Peer::info).collect());
            }

            RoomMessage::RemovePeer {
                peer_id,
                respond_to,
            } => {
                let result = self.remove_peer(peer_id).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::AddTransport {
                peer_id,
                transport,
                respond_to,
            } => {
                let result = self.add_transport(peer_id, transport).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::GetTransport {
                peer_id,
                transport_id,
                respond_to,
            } => {
                let result = self.peer(peer_id).and_then(|peer| {
                    peer.get_transport(&transport_id)
                        .cloned()
                        .ok_or(SrError::TransportNotFound(transport_id))
                });
                let _ = respond_to.send(result);
            }

            RoomMessage::AddProducer {
                peer_id,
                producer,
                respond_to,
            } => {
                let result = self.add_producer(peer_id, producer).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::GetProducer {
                peer_id,
                producer_id,
                respond_to,
            } => {
                let result = self.peer(peer_id).and_then(|peer| {
                    peer.get_producer(&producer_id)
                        .map(|producer| peer.producer_info(producer))
                        .ok_or(SrError::ProducerNotFound(producer_id))
                });
                let _ = respond_to.send(result);
            }

            RoomMessage::AddConsumer {
                peer_id,
                consumer,
                respond_to,
            } => {
                let result = self.add_consumer(peer_id, consumer).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::GetConsumer {
                peer_id,
                consumer_id,
                respond_to,
            } => {
                let result = self.peer(peer_id).and_then(|peer| {
                    peer.get_consumer(&consumer_id)
                        .cloned()
                        .ok_or(SrError::ConsumerNotFound(consumer_id))
                });
                let _ = respond_to.send(result);
            }

            RoomMessage::SelectMentorProducer { respond_to } => {
                let selected = self
                    .producer_infos()
                    .filter(|producer| producer.is_mentor)
                    .min_by_key(|producer| producer.seq);
                let _ = respond_to.send(selected);
            }

            RoomMessage::MentorProducerOf {
                peer_id,
                respond_to,
            } => {
                let selected = self
                    .producer_infos()
                    .filter(|producer| producer.peer_id == peer_id && producer.is_mentor)
                    .min_by_key(|producer| producer.seq);
                let _ = respond_to.send(selected);
            }

            RoomMessage::ProducersExcluding {
                peer_id,
                respond_to,
            } => {
                let mut producers: Vec<ProducerInfo> = self
                    .producer_infos()
                    .filter(|producer| producer.peer_id != peer_id)
                    .collect();
                producers.sort_by_key(|producer| producer.seq);
                let _ = respond_to.send(producers);
            }

            RoomMessage::AllProducers { respond_to } => {
                let mut producers: Vec<ProducerInfo> = self.producer_infos().collect();
                producers.sort_by_key(|producer| producer.seq);
                let _ = respond_to.send(producers);
            }

            RoomMessage::CloseIfEmpty { respond_to } => {
                let closed = if self.peers.is_empty() {
                    self.close_room().await;
                    true
                } else {
                    false
                };
                let _ = respond_to.send(closed);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(RoomState {
                    room_id: self.room_id.clone(),
                    router_id: self.router.id.clone(),
                    peers: self.peers.values().map(Peer::info).collect(),
                    producer_count: self.producer_infos().count(),
                    created_at: self.created_at,
                });
            }
        }
    }

    fn peer(&self, peer_id: PeerId) -> Result<&Peer, SrError> {
        self.peers
            .get(&peer_id)
            .ok_or_else(|| SrError::PeerNotFound(peer_id.to_string()))
    }

    fn producer_infos(&self) -> impl Iterator<Item = ProducerInfo> + '_ {
        self.peers
            .values()
            .flat_map(|peer| peer.producers().map(move |producer| peer.producer_info(producer)))
    }

    fn add_peer(&mut self, peer_id: PeerId) -> Result<usize, SrError> {
        if self.peers.contains_key(&peer_id) {
            return Err(SrError::Conflict("Peer already in room".to_string()));
        }
        if self.peers.len() >= self.max_peers {
            warn!(
                target: "sr.actor.room",
                room_id = %self.room_id,
                max_peers = self.max_peers,
                "Room at capacity, rejecting peer"
            );
            return Err(SrError::RoomCapacityExceeded(self.room_id.to_string()));
        }

        self.peers.insert(peer_id, Peer::new(peer_id));
        self.metrics.peer_joined();

        info!(
            target: "sr.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            peer_count = self.peers.len(),
            "Peer joined room"
        );

        Ok(self.peers.len())
    }

    async fn remove_peer(&mut self, peer_id: PeerId) -> Option<PeerRemoval> {
        let mut peer = self.peers.remove(&peer_id)?;
        let handles_closed = peer.close_all(self.engine.as_ref()).await;
        self.metrics.peer_left();

        info!(
            target: "sr.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            handles_closed,
            peer_count = self.peers.len(),
            "Peer removed from room"
        );

        Some(PeerRemoval {
            handles_closed,
            remaining_peers: self.peers.len(),
        })
    }

    async fn add_transport(
        &mut self,
        peer_id: PeerId,
        transport: TransportHandle,
    ) -> Result<(), SrError> {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            self.engine.close_transport(&transport.id).await;
            return Err(self.orphaned(peer_id, "transport", &transport.id));
        };
        if peer.add_transport(transport) {
            Ok(())
        } else {
            Err(SrError::Conflict("Transport already recorded".to_string()))
        }
    }

    async fn add_producer(
        &mut self,
        peer_id: PeerId,
        producer: ProducerHandle,
    ) -> Result<ProducerInfo, SrError> {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            self.engine.close_producer(&producer.id).await;
            return Err(self.orphaned(peer_id, "producer", &producer.id));
        };

        let seq = self.next_seq;
        let producer_id = producer.id.clone();
        if !peer.add_producer(producer, seq) {
            return Err(SrError::Conflict("Producer already recorded".to_string()));
        }
        self.next_seq += 1;

        let info = peer
            .get_producer(&producer_id)
            .map(|recorded| peer.producer_info(recorded))
            .ok_or_else(|| SrError::Internal("producer vanished after insert".to_string()))?;

        debug!(
            target: "sr.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            producer_id = %info.producer_id,
            is_mentor = info.is_mentor,
            seq,
            "Producer recorded"
        );

        Ok(info)
    }

    async fn add_consumer(
        &mut self,
        peer_id: PeerId,
        consumer: ConsumerHandle,
    ) -> Result<(), SrError> {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            self.engine.close_consumer(&consumer.id).await;
            return Err(self.orphaned(peer_id, "consumer", &consumer.id));
        };
        if peer.add_consumer(consumer) {
            Ok(())
        } else {
            Err(SrError::Conflict("Consumer already recorded".to_string()))
        }
    }

    /// A handle arrived for a peer that is no longer here; it has been closed.
    fn orphaned(&self, peer_id: PeerId, kind: &'static str, handle_id: &str) -> SrError {
        warn!(
            target: "sr.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            kind,
            handle_id = %handle_id,
            "Handle recorded for absent peer, closed"
        );
        SrError::PeerNotFound(peer_id.to_string())
    }

    /// Close every peer and mark the room closed. The router is released
    /// after the loop exits.
    async fn close_room(&mut self) {
        let peer_ids: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer_id in peer_ids {
            self.remove_peer(peer_id).await;
        }

        if !self.closed {
            info!(
                target: "sr.actor.room",
                room_id = %self.room_id,
                "Room closed"
            );
        }
        self.closed = true;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::mock::MockMediaEngine;
    use crate::engine::{ProducerMetadata, CONSUMER_TYPE_SIMPLE};
    use serde_json::json;
    use signaling_protocol::MediaKind;

    struct Fixture {
        engine: Arc<MockMediaEngine>,
        handle: RoomHandle,
        task: JoinHandle<()>,
        metrics: Arc<ActorMetrics>,
    }

    fn spawn_room(max_peers: usize) -> Fixture {
        let engine = Arc::new(MockMediaEngine::new());
        let metrics = ActorMetrics::new();
        let router = RouterHandle {
            id: "router-test".to_string(),
            rtp_capabilities: json!({ "codecs": [] }),
        };
        let (handle, task) = RoomActor::spawn(
            RoomId::parse("R1").unwrap(),
            router,
            engine.clone(),
            max_peers,
            CancellationToken::new(),
            Arc::clone(&metrics),
        );
        Fixture {
            engine,
            handle,
            task,
            metrics,
        }
    }

    fn transport(id: &str) -> TransportHandle {
        TransportHandle {
            id: id.to_string(),
            ice_parameters: json!({}),
            ice_candidates: json!([]),
            dtls_parameters: json!({}),
        }
    }

    fn producer(id: &str, is_mentor: bool) -> ProducerHandle {
        ProducerHandle {
            id: id.to_string(),
            kind: MediaKind::Video,
            rtp_parameters: json!({}),
            metadata: ProducerMetadata { is_mentor },
        }
    }

    fn consumer(id: &str, producer_id: &str) -> ConsumerHandle {
        ConsumerHandle {
            id: id.to_string(),
            producer_id: producer_id.to_string(),
            kind: MediaKind::Video,
            rtp_parameters: json!({}),
            consumer_type: CONSUMER_TYPE_SIMPLE.to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_and_get_peers() {
        let room = spawn_room(10);
        let a = PeerId::new();
        let b = PeerId::new();

        assert_eq!(room.handle.add_peer(a).await.unwrap(), 1);
        assert_eq!(room.handle.add_peer(b).await.unwrap(), 2);
        assert_eq!(room.handle.get_peer(a).await.unwrap().peer_id, a);
        assert_eq!(room.handle.get_peers().await.unwrap().len(), 2);
        assert_eq!(room.metrics.peer_count(), 2);

        let missing = room.handle.get_peer(PeerId::new()).await;
        assert!(matches!(missing, Err(SrError::PeerNotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_peer_is_conflict() {
        let room = spawn_room(10);
        let a = PeerId::new();
        room.handle.add_peer(a).await.unwrap();
        assert!(matches!(
            room.handle.add_peer(a).await,
            Err(SrError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let room = spawn_room(1);
        room.handle.add_peer(PeerId::new()).await.unwrap();
        assert!(matches!(
            room.handle.add_peer(PeerId::new()).await,
            Err(SrError::RoomCapacityExceeded(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_lookups() {
        let room = spawn_room(10);
        let a = PeerId::new();
        room.handle.add_peer(a).await.unwrap();

        room.handle.add_transport(a, transport("t-1")).await.unwrap();
        room.handle.add_producer(a, producer("p-1", true)).await.unwrap();
        room.handle.add_consumer(a, consumer("c-1", "p-0")).await.unwrap();

        assert_eq!(room.handle.get_transport(a, "t-1").await.unwrap().id, "t-1");
        assert!(room.handle.get_producer(a, "p-1").await.unwrap().is_mentor);
        assert_eq!(
            room.handle.get_consumer(a, "c-1").await.unwrap().producer_id,
            "p-0"
        );

        assert!(matches!(
            room.handle.get_transport(a, "t-9").await,
            Err(SrError::TransportNotFound(id)) if id == "t-9"
        ));
        assert!(matches!(
            room.handle.get_producer(a, "p-9").await,
            Err(SrError::ProducerNotFound(_))
        ));
        assert!(matches!(
            room.handle.get_consumer(a, "c-9").await,
            Err(SrError::ConsumerNotFound(_))
        ));

        let info = room.handle.get_peer(a).await.unwrap();
        assert_eq!((info.transports, info.producers, info.consumers), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_handle_for_absent_peer_is_closed() {
        let room = spawn_room(10);
        let ghost = PeerId::new();

        let result = room.handle.add_transport(ghost, transport("t-ghost")).await;
        assert!(matches!(result, Err(SrError::PeerNotFound(_))));
        assert_eq!(room.engine.close_count("t-ghost"), 1);

        let result = room.handle.add_producer(ghost, producer("p-ghost", true)).await;
        assert!(matches!(result, Err(SrError::PeerNotFound(_))));
        assert_eq!(room.engine.close_count("p-ghost"), 1);
    }

    #[tokio::test]
    async fn test_select_mentor_producer_picks_earliest() {
        let room = spawn_room(10);
        let mentor = PeerId::new();
        let second_mentor = PeerId::new();
        let mentee = PeerId::new();
        for peer in [mentor, second_mentor, mentee] {
            room.handle.add_peer(peer).await.unwrap();
        }

        assert!(room.handle.select_mentor_producer().await.unwrap().is_none());

        room.handle.add_producer(mentee, producer("p-mentee", false)).await.unwrap();
        assert!(room.handle.select_mentor_producer().await.unwrap().is_none());

        room.handle.add_producer(mentor, producer("p-first", true)).await.unwrap();
        room.handle
            .add_producer(second_mentor, producer("p-second", true))
            .await
            .unwrap();

        for _ in 0..5 {
            let selected = room.handle.select_mentor_producer().await.unwrap().unwrap();
            assert_eq!(selected.producer_id, "p-first");
            assert_eq!(selected.peer_id, mentor);
        }

        room.handle.remove_peer(mentor).await.unwrap();
        let selected = room.handle.select_mentor_producer().await.unwrap().unwrap();
        assert_eq!(selected.producer_id, "p-second");
    }

    #[tokio::test]
    async fn test_producer_queries() {
        let room = spawn_room(10);
        let a = PeerId::new();
        let b = PeerId::new();
        room.handle.add_peer(a).await.unwrap();
        room.handle.add_peer(b).await.unwrap();

        room.handle.add_producer(a, producer("p-a-audio", false)).await.unwrap();
        room.handle.add_producer(a, producer("p-a-video", true)).await.unwrap();
        room.handle.add_producer(b, producer("p-b", false)).await.unwrap();

        let all: Vec<String> = room
            .handle
            .all_producers()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.producer_id)
            .collect();
        assert_eq!(all, vec!["p-a-audio", "p-a-video", "p-b"]);

        let excluding_a = room.handle.producers_excluding(a).await.unwrap();
        assert_eq!(excluding_a.len(), 1);
        assert_eq!(excluding_a[0].peer_id, b);

        let of_a = room.handle.mentor_producer_of(a).await.unwrap().unwrap();
        assert_eq!(of_a.producer_id, "p-a-video");
        assert!(room.handle.mentor_producer_of(b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_peer_closes_handles_exactly_once() {
        let room = spawn_room(10);
        let a = PeerId::new();
        room.handle.add_peer(a).await.unwrap();
        room.handle.add_transport(a, transport("t-1")).await.unwrap();
        room.handle.add_producer(a, producer("p-1", true)).await.unwrap();
        room.handle.add_consumer(a, consumer("c-1", "p-x")).await.unwrap();

        let removal = room.handle.remove_peer(a).await.unwrap().unwrap();
        assert_eq!(removal.handles_closed, 3);
        assert_eq!(removal.remaining_peers, 0);
        for id in ["t-1", "p-1", "c-1"] {
            assert_eq!(room.engine.close_count(id), 1);
        }

        assert!(room.handle.remove_peer(a).await.unwrap().is_none());
        assert_eq!(room.engine.total_closes(), 3);
        assert_eq!(room.metrics.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_close_if_empty_stops_the_actor() {
        let room = spawn_room(10);
        let a = PeerId::new();
        room.handle.add_peer(a).await.unwrap();

        assert!(!room.handle.close_if_empty().await.unwrap());
        assert_eq!(room.engine.close_count("router-test"), 0);

        room.handle.remove_peer(a).await.unwrap();
        assert!(room.handle.close_if_empty().await.unwrap());
        room.task.await.unwrap();

        assert_eq!(room.engine.close_count("router-test"), 1);
        assert!(room.handle.is_closed());
        assert!(matches!(
            room.handle.add_peer(PeerId::new()).await,
            Err(SrError::RoomClosed)
        ));
        assert!(room.handle.close_if_empty().await.unwrap());
        assert_eq!(room.engine.close_count("router-test"), 1);
    }

    #[tokio::test]
    async fn test_requests_queued_behind_close_fail_with_room_closed() {
        let room = spawn_room(10);

        let close = room.handle.close_if_empty();
        let join = room.handle.add_peer(PeerId::new());
        let (closed, joined) = tokio::join!(close, join);

        assert!(closed.unwrap());
        assert!(matches!(joined, Err(SrError::RoomClosed)));
        room.task.await.unwrap();
        assert_eq!(room.engine.close_count("router-test"), 1);
        assert_eq!(room.metrics.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_closes_peers_and_router() {
        let room = spawn_room(10);
        let a = PeerId::new();
        room.handle.add_peer(a).await.unwrap();
        room.handle.add_transport(a, transport("t-1")).await.unwrap();

        room.handle.cancel();
        room.task.await.unwrap();

        assert_eq!(room.engine.close_count("t-1"), 1);
        assert_eq!(room.engine.close_count("router-test"), 1);
        assert_eq!(room.metrics.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_state_snapshot() {
        let room = spawn_room(10);
        let a = PeerId::new();
        room.handle.add_peer(a).await.unwrap();
        room.handle.add_producer(a, producer("p-1", true)).await.unwrap();

        let state = room.handle.get_state().await.unwrap();
        assert_eq!(state.room_id.as_str(), "R1");
        assert_eq!(state.router_id, "router-test");
        assert_eq!(state.peers.len(), 1);
        assert_eq!(state.producer_count, 1);
        assert_eq!(room.handle.router_id(), "router-test");
    }
}
