//! Per-connection signaling state machine.
//!
//! ```text
//! NotJoined --joinRoom--> Joined --leaveRoom--> Left
//!     |                     |                    |
//!     +------------- connection close -----------+--> Closed
//! ```
//!
//! A `SignalingSession` is driven by exactly one connection task, one frame
//! at a time, so a frame's engine calls finish before the next frame (or the
//! socket close) is looked at. Cleanup therefore never races an in-flight
//! `produce` or `consume` of the same peer.

use crate::actors::{ActorMetrics, RoomHandle, SessionRegistryHandle};
use crate::engine::{EngineError, MediaEngine, ProducerMetadata, TransportListenConfig};
use crate::errors::{ErrorClass, SrError};
use crate::observability::metrics as prom;

use common::{PeerId, PeerRole, RoomId};
use signaling_protocol::{
    ClientAction, ConnectTransport, Consume, ConsumedData, JoinRoom, JoinedRoomData, ProducedData,
    Produce, ProtocolError, ServerMessage, TransportCreatedData,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Attempts to resolve a room that closes under a concurrent join.
const MAX_JOIN_ATTEMPTS: usize = 3;

/// Metric label for frames that could not be decoded into an action.
const INVALID_ACTION_LABEL: &str = "invalid";

/// Shared dependencies of every signaling connection.
pub struct GatewayContext {
    pub registry: SessionRegistryHandle,
    pub engine: Arc<dyn MediaEngine>,
    pub listen: TransportListenConfig,
    pub metrics: Arc<ActorMetrics>,
}

/// The room membership of a joined connection.
#[derive(Debug, Clone)]
struct JoinedPeer {
    room: RoomHandle,
    peer_id: PeerId,
    role: PeerRole,
}

#[derive(Debug)]
enum SessionState {
    NotJoined,
    Joined(JoinedPeer),
    Left,
    Closed,
}

/// Protocol state of one signaling connection.
pub struct SignalingSession {
    ctx: Arc<GatewayContext>,
    state: SessionState,
}

impl SignalingSession {
    #[must_use]
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            state: SessionState::NotJoined,
        }
    }

    /// Peer id assigned at join, while joined.
    #[must_use]
    pub fn peer_id(&self) -> Option<PeerId> {
        match &self.state {
            SessionState::Joined(joined) => Some(joined.peer_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match &self.state {
            SessionState::Joined(joined) => Some(joined.room.room_id()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// Handle one text frame and produce the reply.
    ///
    /// Errors never escape: every failure becomes an `error` reply and the
    /// connection stays open.
    pub async fn handle_text(&mut self, text: &str) -> ServerMessage {
        let start = Instant::now();

        let (action, result) = match ClientAction::decode(text) {
            Ok(action) => {
                let name = action.name();
                (name, self.dispatch(action).await)
            }
            Err(e) => (INVALID_ACTION_LABEL, Err(SrError::from(e))),
        };

        prom::record_message_latency(action, start.elapsed());

        match result {
            Ok(reply) => reply,
            Err(err) => self.error_reply(action, &err),
        }
    }

    /// Binary frames are not part of the protocol.
    pub fn handle_binary(&self) -> ServerMessage {
        self.error_reply(
            INVALID_ACTION_LABEL,
            &SrError::Protocol(ProtocolError::BinaryFrame),
        )
    }

    fn error_reply(&self, action: &str, err: &SrError) -> ServerMessage {
        let class = err.class();
        let peer_id = self.peer_id().map(|id| id.to_string()).unwrap_or_default();
        match class {
            ErrorClass::Engine | ErrorClass::Internal => {
                warn!(target: "sr.gateway", action, peer_id = %peer_id, error = %err, "Action failed");
            }
            _ => {
                debug!(target: "sr.gateway", action, peer_id = %peer_id, error = %err, "Action rejected");
            }
        }
        prom::record_error(action, class.as_str());
        ServerMessage::error(err.client_message())
    }

    async fn dispatch(&mut self, action: ClientAction) -> Result<ServerMessage, SrError> {
        match action {
            ClientAction::JoinRoom(join) => self.join(join).await,
            ClientAction::GetRtpCapabilities => {
                let joined = self.joined()?;
                Ok(ServerMessage::RtpCapabilities(
                    joined.room.rtp_capabilities().clone(),
                ))
            }
            ClientAction::CreateWebRtcTransport => self.create_transport().await,
            ClientAction::ConnectTransport(request) => self.connect_transport(request).await,
            ClientAction::Produce(request) => self.produce(request).await,
            ClientAction::Consume(request) => self.consume(request).await,
            ClientAction::GetProducers => {
                let joined = self.joined()?;
                let producers = joined.room.producers_excluding(joined.peer_id).await?;
                Ok(ServerMessage::Producers(
                    producers.iter().map(|p| p.to_summary()).collect(),
                ))
            }
            ClientAction::LeaveRoom => self.leave().await,
        }
    }

    fn joined(&self) -> Result<JoinedPeer, SrError> {
        match &self.state {
            SessionState::Joined(joined) => Ok(joined.clone()),
            SessionState::NotJoined => Err(SrError::InvalidState("Not in a room".to_string())),
            SessionState::Left | SessionState::Closed => {
                Err(SrError::InvalidState("Already left the room".to_string()))
            }
        }
    }

    async fn join(&mut self, join: JoinRoom) -> Result<ServerMessage, SrError> {
        match self.state {
            SessionState::NotJoined => {}
            SessionState::Joined(_) => {
                return Err(SrError::InvalidState("Already in a room".to_string()));
            }
            SessionState::Left | SessionState::Closed => {
                return Err(SrError::InvalidState("Already left the room".to_string()));
            }
        }

        let role = join.role();
        let peer_id = PeerId::new();
        let room = self.enter_room(&join.room_id, peer_id).await?;

        info!(
            target: "sr.gateway",
            room_id = %join.room_id,
            peer_id = %peer_id,
            role = role.as_str(),
            "Peer joined"
        );

        self.state = SessionState::Joined(JoinedPeer {
            room,
            peer_id,
            role,
        });

        Ok(ServerMessage::JoinedRoom(JoinedRoomData {
            room_id: join.room_id.to_string(),
            peer_id: peer_id.to_string(),
        }))
    }

    async fn enter_room(&self, room_id: &RoomId, peer_id: PeerId) -> Result<RoomHandle, SrError> {
        let room = self.ctx.registry.get_or_create_room(room_id.clone()).await?;
        self.add_to_room(room, peer_id).await
    }

    /// Add the peer to `room`, resolving the room again if it closed between
    /// the lookup and the add.
    async fn add_to_room(
        &self,
        mut room: RoomHandle,
        peer_id: PeerId,
    ) -> Result<RoomHandle, SrError> {
        let room_id = room.room_id().clone();
        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            match room.add_peer(peer_id).await {
                Ok(_) => return Ok(room),
                Err(SrError::RoomClosed) => {
                    debug!(
                        target: "sr.gateway",
                        room_id = %room_id,
                        attempt,
                        "Room closed during join, resolving again"
                    );
                    if attempt < MAX_JOIN_ATTEMPTS {
                        room = self.ctx.registry.get_or_create_room(room_id.clone()).await?;
                    }
                }
                Err(e) => {
                    // The room may have been created for this join alone.
                    if let Err(release_err) =
                        self.ctx.registry.release_if_empty(room_id.clone()).await
                    {
                        debug!(target: "sr.gateway", room_id = %room_id, error = %release_err, "Release after failed join failed");
                    }
                    return Err(e);
                }
            }
        }
        Err(SrError::Internal(format!(
            "room closed {MAX_JOIN_ATTEMPTS} times during join"
        )))
    }

    async fn create_transport(&self) -> Result<ServerMessage, SrError> {
        let joined = self.joined()?;

        let transport = engine_result(
            "create_webrtc_transport",
            self.ctx
                .engine
                .create_webrtc_transport(joined.room.router_id(), &self.ctx.listen)
                .await,
        )?;

        let reply = TransportCreatedData {
            transport_id: transport.id.clone(),
            ice_parameters: transport.ice_parameters.clone(),
            ice_candidates: transport.ice_candidates.clone(),
            dtls_parameters: transport.dtls_parameters.clone(),
        };

        let transport_id = transport.id.clone();
        if let Err(e) = joined.room.add_transport(joined.peer_id, transport).await {
            if matches!(e, SrError::RoomClosed) {
                self.ctx.engine.close_transport(&transport_id).await;
            }
            return Err(e);
        }

        debug!(target: "sr.gateway", peer_id = %joined.peer_id, transport_id = %transport_id, "Transport created");
        Ok(ServerMessage::TransportCreated(reply))
    }

    async fn connect_transport(&self, request: ConnectTransport) -> Result<ServerMessage, SrError> {
        let joined = self.joined()?;
        joined
            .room
            .get_transport(joined.peer_id, &request.transport_id)
            .await?;

        engine_result(
            "connect_transport",
            self.ctx
                .engine
                .connect_transport(&request.transport_id, &request.dtls_parameters)
                .await,
        )?;

        Ok(ServerMessage::Connected)
    }

    async fn produce(&self, request: Produce) -> Result<ServerMessage, SrError> {
        let joined = self.joined()?;
        joined
            .room
            .get_transport(joined.peer_id, &request.transport_id)
            .await?;

        let metadata = ProducerMetadata {
            is_mentor: request.is_mentor.unwrap_or(joined.role.is_mentor()),
        };

        let producer = engine_result(
            "produce",
            self.ctx
                .engine
                .produce(
                    &request.transport_id,
                    request.kind,
                    &request.rtp_parameters,
                    metadata,
                )
                .await,
        )?;

        let producer_id = producer.id.clone();
        let info = match joined.room.add_producer(joined.peer_id, producer).await {
            Ok(info) => info,
            Err(e) => {
                if matches!(e, SrError::RoomClosed) {
                    self.ctx.engine.close_producer(&producer_id).await;
                }
                return Err(e);
            }
        };

        info!(
            target: "sr.gateway",
            peer_id = %joined.peer_id,
            producer_id = %info.producer_id,
            kind = info.kind.as_str(),
            is_mentor = info.is_mentor,
            "Producer created"
        );

        Ok(ServerMessage::Produced(ProducedData {
            producer_id: info.producer_id,
        }))
    }

    async fn consume(&self, request: Consume) -> Result<ServerMessage, SrError> {
        let joined = self.joined()?;

        let producer = joined
            .room
            .select_mentor_producer()
            .await?
            .ok_or(SrError::NoProducerAvailable)?;

        let compatible = engine_result(
            "can_consume",
            self.ctx
                .engine
                .can_consume(
                    joined.room.router_id(),
                    &producer.producer_id,
                    &request.rtp_capabilities,
                )
                .await,
        )?;
        if !compatible {
            return Err(SrError::IncompatibleCapabilities(producer.producer_id));
        }

        joined
            .room
            .get_transport(joined.peer_id, &request.transport_id)
            .await?;

        let consumer = engine_result(
            "consume",
            self.ctx
                .engine
                .consume(
                    &request.transport_id,
                    &producer.producer_id,
                    &request.rtp_capabilities,
                )
                .await,
        )?;

        let reply = ConsumedData {
            consumer_id: consumer.id.clone(),
            producer_id: consumer.producer_id.clone(),
            kind: consumer.kind,
            rtp_parameters: consumer.rtp_parameters.clone(),
            consumer_type: consumer.consumer_type.clone(),
        };

        let consumer_id = consumer.id.clone();
        if let Err(e) = joined.room.add_consumer(joined.peer_id, consumer).await {
            if matches!(e, SrError::RoomClosed) {
                self.ctx.engine.close_consumer(&consumer_id).await;
            }
            return Err(e);
        }

        info!(
            target: "sr.gateway",
            peer_id = %joined.peer_id,
            consumer_id = %consumer_id,
            producer_id = %producer.producer_id,
            "Consumer created"
        );

        Ok(ServerMessage::Consumed(reply))
    }

    async fn leave(&mut self) -> Result<ServerMessage, SrError> {
        let joined = self.joined()?;
        self.state = SessionState::Left;
        self.release(joined).await;
        Ok(ServerMessage::LeftRoom)
    }

    /// Connection closed: release the peer if it is still joined. Safe to
    /// call any number of times; cleanup runs at most once per session.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Joined(joined) = previous {
            self.release(joined).await;
        }
    }

    /// Remove the peer from its room, then let the registry drop the room if
    /// it is now empty.
    async fn release(&self, joined: JoinedPeer) {
        let room_id = joined.room.room_id().clone();

        match joined.room.remove_peer(joined.peer_id).await {
            Ok(Some(removal)) => {
                info!(
                    target: "sr.gateway",
                    room_id = %room_id,
                    peer_id = %joined.peer_id,
                    handles_closed = removal.handles_closed,
                    remaining_peers = removal.remaining_peers,
                    "Peer left"
                );
            }
            Ok(None) => {}
            // The room closed every peer when it stopped.
            Err(e) => {
                debug!(target: "sr.gateway", room_id = %room_id, peer_id = %joined.peer_id, error = %e, "Room already closed on leave");
            }
        }

        if let Err(e) = self.ctx.registry.release_if_empty(room_id.clone()).await {
            debug!(target: "sr.gateway", room_id = %room_id, error = %e, "Room release failed");
        }
    }
}

/// Record the engine call outcome and lift its error.
fn engine_result<T>(operation: &'static str, result: Result<T, EngineError>) -> Result<T, SrError> {
    prom::record_engine_operation(operation, result.is_ok());
    result.map_err(SrError::from)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::RegistrySettings;
    use crate::engine::mock::{MockMediaEngine, MockOperation};
    use crate::engine::WorkerHandle;
    use serde_json::json;
    use signaling_protocol::{MediaKind, ServerEnvelope};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    struct Fixture {
        engine: Arc<MockMediaEngine>,
        ctx: Arc<GatewayContext>,
    }

    fn fixture() -> Fixture {
        fixture_with(RegistrySettings::default())
    }

    fn fixture_with(settings: RegistrySettings) -> Fixture {
        let engine = Arc::new(MockMediaEngine::new());
        let metrics = ActorMetrics::new();
        let registry = SessionRegistryHandle::new(
            "sr-test".to_string(),
            engine.clone(),
            WorkerHandle {
                id: "worker-0".to_string(),
            },
            settings,
            Arc::clone(&metrics),
        );
        let ctx = Arc::new(GatewayContext {
            registry,
            engine: engine.clone(),
            listen: TransportListenConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), None),
            metrics,
        });
        Fixture { engine, ctx }
    }

    async fn send(session: &mut SignalingSession, action: ClientAction) -> ServerEnvelope {
        let reply = session.handle_text(&action.to_text()).await;
        serde_json::from_str(&reply.to_text()).unwrap()
    }

    /// Poll `check` until it holds; rooms release their router on their own
    /// task, shortly after the leave that emptied them.
    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached within 5s");
    }

    fn room_id(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn join(room: &str, role: PeerRole) -> ClientAction {
        ClientAction::JoinRoom(JoinRoom {
            room_id: RoomId::parse(room).unwrap(),
            role: Some(role),
            is_mentor: None,
        })
    }

    async fn create_transport(session: &mut SignalingSession) -> String {
        let reply = send(session, ClientAction::CreateWebRtcTransport).await;
        assert_eq!(reply.action, "transportCreated");
        reply.data_as::<TransportCreatedData>().unwrap().transport_id
    }

    fn produce(transport_id: &str) -> ClientAction {
        produce_as(transport_id, None)
    }

    fn produce_as(transport_id: &str, is_mentor: Option<bool>) -> ClientAction {
        ClientAction::Produce(Produce {
            transport_id: transport_id.to_string(),
            kind: MediaKind::Video,
            rtp_parameters: json!({ "codecs": [{ "mimeType": "video/VP8", "clockRate": 90000 }] }),
            is_mentor,
        })
    }

    fn consume(transport_id: &str) -> ClientAction {
        ClientAction::Consume(Consume {
            transport_id: transport_id.to_string(),
            rtp_capabilities: json!({ "codecs": [] }),
        })
    }

    #[tokio::test]
    async fn test_actions_before_join_are_state_errors() {
        let fx = fixture();
        let mut session = SignalingSession::new(Arc::clone(&fx.ctx));

        for action in [
            ClientAction::GetRtpCapabilities,
            ClientAction::CreateWebRtcTransport,
            ClientAction::GetProducers,
            ClientAction::LeaveRoom,
            produce("t-1"),
            consume("t-1"),
        ] {
            let reply = send(&mut session, action).await;
            assert!(reply.is_error());
            assert_eq!(reply.message.as_deref(), Some("Not in a room"));
        }
        assert_eq!(fx.engine.created_ids().len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_frames_keep_session_usable() {
        let fx = fixture();
        let mut session = SignalingSession::new(Arc::clone(&fx.ctx));

        assert!(session.handle_text("not json").await.is_error());
        assert!(session
            .handle_text(r#"{"action":"dance","data":{}}"#)
            .await
            .is_error());
        assert!(session.handle_binary().is_error());

        let reply = send(&mut session, join("R1", PeerRole::Mentor)).await;
        assert_eq!(reply.action, "joinedRoom");
    }

    #[tokio::test]
    async fn test_join_twice_is_state_error() {
        let fx = fixture();
        let mut session = SignalingSession::new(Arc::clone(&fx.ctx));

        let reply = send(&mut session, join("R1", PeerRole::Mentee)).await;
        let data = reply.data_as::<JoinedRoomData>().unwrap();
        assert_eq!(data.room_id, "R1");
        assert_eq!(data.peer_id, session.peer_id().unwrap().to_string());

        let reply = send(&mut session, join("R2", PeerRole::Mentee)).await;
        assert!(reply.is_error());
        assert_eq!(session.room_id().unwrap().as_str(), "R1");
    }

    #[tokio::test]
    async fn test_connect_unknown_transport_is_not_found() {
        let fx = fixture();
        let mut session = SignalingSession::new(Arc::clone(&fx.ctx));
        send(&mut session, join("R1", PeerRole::Mentor)).await;

        let reply = send(
            &mut session,
            ClientAction::ConnectTransport(ConnectTransport {
                transport_id: "missing".to_string(),
                dtls_parameters: json!({}),
            }),
        )
        .await;
        assert_eq!(reply.message.as_deref(), Some("Transport not found"));
        assert_eq!(fx.engine.call_count(MockOperation::ConnectTransport), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_records_nothing() {
        let fx = fixture();
        let mut session = SignalingSession::new(Arc::clone(&fx.ctx));
        send(&mut session, join("R1", PeerRole::Mentor)).await;
        let transport_id = create_transport(&mut session).await;

        fx.engine.fail(MockOperation::Produce);
        let reply = send(&mut session, produce(&transport_id)).await;
        assert_eq!(
            reply.message.as_deref(),
            Some("Media engine rejected the request")
        );

        let room = fx.ctx.registry.get_room(RoomId::parse("R1").unwrap()).await.unwrap();
        let info = room.get_peer(session.peer_id().unwrap()).await.unwrap();
        assert_eq!(info.producers, 0);
        assert_eq!(info.transports, 1);
    }

    #[tokio::test]
    async fn test_produce_uses_join_role_unless_overridden() {
        let fx = fixture();
        let mut mentor = SignalingSession::new(Arc::clone(&fx.ctx));
        send(&mut mentor, join("R1", PeerRole::Mentor)).await;
        let transport_id = create_transport(&mut mentor).await;

        send(&mut mentor, produce(&transport_id)).await;
        let reply = send(&mut mentor, produce_as(&transport_id, Some(false))).await;
        assert_eq!(reply.action, "produced");

        let room = fx.ctx.registry.get_room(RoomId::parse("R1").unwrap()).await.unwrap();
        let flags: Vec<bool> = room
            .all_producers()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.is_mentor)
            .collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[tokio::test]
    async fn test_consume_without_mentor_producer() {
        let fx = fixture();
        let mut mentee = SignalingSession::new(Arc::clone(&fx.ctx));
        send(&mut mentee, join("R2", PeerRole::Mentee)).await;
        let transport_id = create_transport(&mut mentee).await;

        let reply = send(&mut mentee, consume(&transport_id)).await;
        assert_eq!(reply.message.as_deref(), Some("No producer available"));
        assert_eq!(fx.engine.call_count(MockOperation::Consume), 0);
    }

    #[tokio::test]
    async fn test_consume_incompatible_creates_nothing() {
        let fx = fixture();
        let mut mentor = SignalingSession::new(Arc::clone(&fx.ctx));
        let mut mentee = SignalingSession::new(Arc::clone(&fx.ctx));
        send(&mut mentor, join("R1", PeerRole::Mentor)).await;
        let mentor_transport = create_transport(&mut mentor).await;
        send(&mut mentor, produce(&mentor_transport)).await;

        send(&mut mentee, join("R1", PeerRole::Mentee)).await;
        let mentee_transport = create_transport(&mut mentee).await;

        fx.engine.set_compatible(false);
        let reply = send(&mut mentee, consume(&mentee_transport)).await;
        assert!(reply.is_error());
        assert_eq!(fx.engine.call_count(MockOperation::Consume), 0);

        fx.engine.set_compatible(true);
        let reply = send(&mut mentee, consume(&mentee_transport)).await;
        let data = reply.data_as::<ConsumedData>().unwrap();
        assert_eq!(data.kind, MediaKind::Video);
        assert_eq!(data.consumer_type, "simple");
    }

    #[tokio::test]
    async fn test_get_producers_excludes_own() {
        let fx = fixture();
        let mut mentor = SignalingSession::new(Arc::clone(&fx.ctx));
        let mut mentee = SignalingSession::new(Arc::clone(&fx.ctx));
        send(&mut mentor, join("R1", PeerRole::Mentor)).await;
        send(&mut mentee, join("R1", PeerRole::Mentee)).await;
        let transport_id = create_transport(&mut mentor).await;
        send(&mut mentor, produce(&transport_id)).await;

        let own = send(&mut mentor, ClientAction::GetProducers).await;
        assert_eq!(own.data, json!([]));

        let others = send(&mut mentee, ClientAction::GetProducers).await;
        let list = others.data.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["isMentor"], json!(true));
        assert_eq!(list[0]["peerId"], json!(mentor.peer_id().unwrap().to_string()));
    }

    #[tokio::test]
    async fn test_leave_then_close_cleans_up_once() {
        let fx = fixture();
        let mut session = SignalingSession::new(Arc::clone(&fx.ctx));
        send(&mut session, join("R1", PeerRole::Mentor)).await;
        let transport_id = create_transport(&mut session).await;
        send(&mut session, produce(&transport_id)).await;

        let reply = send(&mut session, ClientAction::LeaveRoom).await;
        assert_eq!(reply.action, "leftRoom");
        // transport, producer and the room's router
        eventually(|| fx.engine.total_closes() == 3).await;

        session.close().await;
        session.close().await;
        assert_eq!(fx.engine.total_closes(), 3);
        assert!(session.is_closed());
        assert!(fx.engine.live_ids().iter().all(|id| id.starts_with("worker")));

        let status = fx.ctx.registry.get_status().await.unwrap();
        assert_eq!(status.room_count, 0);
        assert_eq!(status.peer_count, 0);
    }

    #[tokio::test]
    async fn test_actions_after_leave_are_state_errors() {
        let fx = fixture();
        let mut session = SignalingSession::new(Arc::clone(&fx.ctx));
        send(&mut session, join("R1", PeerRole::Mentor)).await;
        send(&mut session, ClientAction::LeaveRoom).await;

        let reply = send(&mut session, ClientAction::CreateWebRtcTransport).await;
        assert_eq!(reply.message.as_deref(), Some("Already left the room"));
        let reply = send(&mut session, join("R1", PeerRole::Mentor)).await;
        assert!(reply.is_error());
    }

    #[tokio::test]
    async fn test_room_limit_on_join_leaves_no_room() {
        let fx = fixture_with(RegistrySettings {
            max_peers_per_room: 1,
            ..RegistrySettings::default()
        });

        let mut a = SignalingSession::new(Arc::clone(&fx.ctx));
        let mut b = SignalingSession::new(Arc::clone(&fx.ctx));
        assert_eq!(send(&mut a, join("R9", PeerRole::Mentor)).await.action, "joinedRoom");

        let reply = send(&mut b, join("R9", PeerRole::Mentee)).await;
        assert_eq!(reply.message.as_deref(), Some("Room is at capacity"));
        assert!(b.peer_id().is_none());

        a.close().await;
        let status = fx.ctx.registry.get_status().await.unwrap();
        assert_eq!(status.room_count, 0);
        assert_eq!(fx.engine.call_count(MockOperation::CreateRouter), 1);
    }

    #[tokio::test]
    async fn test_join_resolves_again_when_room_closes_before_add() {
        let fx = fixture();
        let stale = fx.ctx.registry.get_or_create_room(room_id("R1")).await.unwrap();
        assert!(fx.ctx.registry.release_if_empty(room_id("R1")).await.unwrap());

        let session = SignalingSession::new(Arc::clone(&fx.ctx));
        let peer_id = PeerId::new();
        let room = session.add_to_room(stale.clone(), peer_id).await.unwrap();

        assert_ne!(room.router_id(), stale.router_id());
        assert_eq!(room.get_peer(peer_id).await.unwrap().peer_id, peer_id);
        assert_eq!(fx.engine.call_count(MockOperation::CreateRouter), 2);

        let live = fx.ctx.registry.get_room(room_id("R1")).await.unwrap();
        assert_eq!(live.router_id(), room.router_id());
    }

    #[tokio::test]
    async fn test_rejoin_after_room_close_respects_room_limit() {
        let fx = fixture_with(RegistrySettings {
            max_rooms: 1,
            ..RegistrySettings::default()
        });
        let stale = fx.ctx.registry.get_or_create_room(room_id("R1")).await.unwrap();
        assert!(fx.ctx.registry.release_if_empty(room_id("R1")).await.unwrap());
        fx.ctx.registry.get_or_create_room(room_id("R2")).await.unwrap();

        // The only slot is taken, so resolving R1 again is refused.
        let session = SignalingSession::new(Arc::clone(&fx.ctx));
        let result = session.add_to_room(stale, PeerId::new()).await;
        assert!(matches!(result, Err(SrError::RegistryCapacityExceeded)));
    }

    #[tokio::test]
    async fn test_producer_created_for_closed_room_is_closed() {
        let fx = fixture();
        let mut session = SignalingSession::new(Arc::clone(&fx.ctx));
        send(&mut session, join("R1", PeerRole::Mentor)).await;
        let transport_id = create_transport(&mut session).await;

        let gate = fx.engine.hold_produce();
        let in_flight = tokio::spawn(async move {
            let reply = send(&mut session, produce(&transport_id)).await;
            (session, reply)
        });
        fx.engine.produce_started().await;

        let room = fx.ctx.registry.get_room(room_id("R1")).await.unwrap();
        room.cancel();
        eventually(|| room.is_closed()).await;

        gate.notify_one();
        let (mut session, reply) = in_flight.await.unwrap();
        assert!(reply.is_error());

        let producer_id = fx
            .engine
            .created_ids()
            .into_iter()
            .find(|id| id.starts_with("producer"))
            .unwrap();
        assert_eq!(fx.engine.close_count(&producer_id), 1);

        session.close().await;
        assert_eq!(fx.engine.close_count(&producer_id), 1);
        assert!(matches!(
            fx.ctx.registry.get_room(room_id("R1")).await,
            Err(SrError::RoomNotFound(_))
        ));
        eventually(|| fx.engine.live_ids().iter().all(|id| id.starts_with("worker"))).await;

        // The registry drops the stopped room on its next health check.
        tokio::time::timeout(Duration::from_secs(5), async {
            while fx.ctx.registry.get_status().await.unwrap().room_count != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stopped room still registered");
    }

    #[tokio::test]
    async fn test_transport_created_for_closed_room_is_closed() {
        let fx = fixture();
        let mut session = SignalingSession::new(Arc::clone(&fx.ctx));
        send(&mut session, join("R1", PeerRole::Mentee)).await;

        let gate = fx.engine.hold(MockOperation::CreateTransport);
        let in_flight = tokio::spawn(async move {
            let reply = send(&mut session, ClientAction::CreateWebRtcTransport).await;
            (session, reply)
        });
        fx.engine.started(MockOperation::CreateTransport).await;

        let room = fx.ctx.registry.get_room(room_id("R1")).await.unwrap();
        room.cancel();
        eventually(|| room.is_closed()).await;
        gate.notify_one();

        let (mut session, reply) = in_flight.await.unwrap();
        assert!(reply.is_error());
        session.close().await;

        let transport_id = fx
            .engine
            .created_ids()
            .into_iter()
            .find(|id| id.starts_with("transport"))
            .unwrap();
        assert_eq!(fx.engine.close_count(&transport_id), 1);
        eventually(|| fx.engine.live_ids().iter().all(|id| id.starts_with("worker"))).await;
    }
}
