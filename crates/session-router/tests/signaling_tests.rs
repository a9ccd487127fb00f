//! End-to-end signaling tests.
//!
//! Drives the real WebSocket gateway through `TestRouterServer`, with the
//! mock media engine recording every resource created and closed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::{PeerRole, RoomId};
use session_router::actors::RegistrySettings;
use session_router::engine::mock::MockOperation;
use signaling_protocol::{ClientAction, ConsumedData, MediaKind};
use sr_test_utils::{
    h264_only_rtp_capabilities, random_room_id, TestRouterServer, WsTestClient,
};
use std::collections::HashSet;

/// Peer count of `room`, or 0 when the registry no longer holds it.
async fn room_peer_count(server: &TestRouterServer, room: &str) -> usize {
    match server
        .registry()
        .get_room(RoomId::parse(room).unwrap())
        .await
    {
        Ok(handle) => handle.get_state().await.unwrap().peers.len(),
        Err(_) => 0,
    }
}

async fn joined_mentor_with_video(
    server: &TestRouterServer,
    room: &str,
) -> Result<(WsTestClient, String, String), anyhow::Error> {
    let mut mentor = server.connect().await?;
    mentor.join(room, PeerRole::Mentor).await?;
    let transport = mentor.create_transport().await?;
    mentor.connect_transport(&transport.transport_id).await?;
    let producer_id = mentor
        .produce(&transport.transport_id, MediaKind::Video, None)
        .await?;
    Ok((mentor, transport.transport_id, producer_id))
}

// ============================================================================
// Scenarios
// ============================================================================

/// Mentor produces video; a mentee joining later consumes it.
#[tokio::test]
async fn test_mentee_consumes_mentor_video() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let (_mentor, _, producer_id) = joined_mentor_with_video(&server, "R1").await?;

    let mut mentee = server.connect().await?;
    mentee.join("R1", PeerRole::Mentee).await?;
    let transport = mentee.create_transport().await?;

    let reply = mentee.consume(&transport.transport_id).await?;
    assert_eq!(reply.action, "consumed", "unexpected reply: {reply:?}");

    let consumed: ConsumedData = reply.data_as()?;
    assert_eq!(consumed.producer_id, producer_id);
    assert_eq!(consumed.kind, MediaKind::Video);
    assert_eq!(consumed.consumer_type, "simple");
    assert_eq!(server.engine().call_count(MockOperation::Consume), 1);
    Ok(())
}

/// A lone mentee has nothing to consume.
#[tokio::test]
async fn test_consume_in_empty_room_fails() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let mut mentee = server.connect().await?;
    mentee.join("R2", PeerRole::Mentee).await?;
    let transport = mentee.create_transport().await?;

    let reply = mentee.consume(&transport.transport_id).await?;
    assert!(reply.is_error());
    assert_eq!(reply.message.as_deref(), Some("No producer available"));
    assert_eq!(server.engine().call_count(MockOperation::Consume), 0);
    Ok(())
}

/// Simultaneous first joins share one room and one router.
#[tokio::test]
async fn test_simultaneous_joins_share_one_room() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let mut a = server.connect().await?;
    let mut b = server.connect().await?;

    let (ja, jb) = tokio::join!(a.join("R3", PeerRole::Mentor), b.join("R3", PeerRole::Mentee));
    let (ja, jb) = (ja?, jb?);

    assert_ne!(ja.peer_id, jb.peer_id);
    assert_eq!(room_peer_count(&server, "R3").await, 2);
    assert_eq!(server.engine().call_count(MockOperation::CreateRouter), 1);
    assert_eq!(server.registry().get_status().await?.room_count, 1);
    Ok(())
}

/// Disconnecting while `produce` is in flight: the call finishes, then
/// cleanup closes every resource exactly once.
#[tokio::test]
async fn test_disconnect_during_pending_produce() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let mut client = server.connect().await?;
    client.join("R4", PeerRole::Mentor).await?;
    let transport = client.create_transport().await?;

    let gate = server.engine().hold_produce();
    client
        .send_action(&sr_test_utils::produce_action(
            &transport.transport_id,
            MediaKind::Video,
            None,
        ))
        .await?;
    server.engine().produce_started().await;

    drop(client);
    gate.notify_one();

    server.wait_for_connections(0).await?;
    server.wait_for_rooms(0).await?;
    server.wait_for_engine_idle().await?;

    let created = server.engine().created_ids();
    assert_eq!(server.engine().call_count(MockOperation::Produce), 1);
    assert!(created.iter().any(|id| id.starts_with("producer-")));
    for id in &created {
        assert_eq!(server.engine().close_count(id), 1, "{id} closed wrong number of times");
    }
    Ok(())
}

// ============================================================================
// Membership properties
// ============================================================================

#[tokio::test]
async fn test_peer_count_tracks_joins_minus_leaves() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let room = random_room_id();

    let mut clients = Vec::new();
    for expected in 1..=4 {
        let mut client = server.connect().await?;
        client.join(&room, PeerRole::Mentee).await?;
        clients.push(client);
        assert_eq!(room_peer_count(&server, &room).await, expected);
    }

    for expected in (0..4).rev() {
        let mut client = clients.pop().unwrap();
        client.leave().await?;
        assert_eq!(room_peer_count(&server, &room).await, expected);
        // Leaving twice never drives the count negative.
        let again = client.request(&ClientAction::LeaveRoom).await?;
        assert!(again.is_error());
        assert_eq!(room_peer_count(&server, &room).await, expected);
    }
    Ok(())
}

#[tokio::test]
async fn test_many_concurrent_first_joins_create_one_room() -> Result<(), anyhow::Error> {
    const CLIENTS: usize = 8;
    let server = TestRouterServer::spawn().await?;
    let room = random_room_id();

    let mut tasks = Vec::new();
    for _ in 0..CLIENTS {
        let mut client = server.connect().await?;
        let room = room.clone();
        tasks.push(tokio::spawn(async move {
            let joined = client.join(&room, PeerRole::Mentee).await?;
            Ok::<_, anyhow::Error>((client, joined.peer_id))
        }));
    }

    let mut clients = Vec::new();
    let mut peer_ids = HashSet::new();
    for task in tasks {
        let (client, peer_id) = task.await??;
        peer_ids.insert(peer_id);
        clients.push(client);
    }

    assert_eq!(peer_ids.len(), CLIENTS);
    assert_eq!(room_peer_count(&server, &room).await, CLIENTS);
    assert_eq!(server.engine().call_count(MockOperation::CreateRouter), 1);
    Ok(())
}

#[tokio::test]
async fn test_room_present_only_while_occupied() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let room_id = RoomId::parse("R5").unwrap();
    assert!(server.registry().get_room(room_id.clone()).await.is_err());

    let mut a = server.connect().await?;
    let mut b = server.connect().await?;
    a.join("R5", PeerRole::Mentor).await?;
    b.join("R5", PeerRole::Mentee).await?;

    a.leave().await?;
    assert!(server.registry().get_room(room_id.clone()).await.is_ok());

    b.close().await?;
    server.wait_for_rooms(0).await?;
    assert!(server.registry().get_room(room_id.clone()).await.is_err());

    // The next join gets a fresh router.
    let mut c = server.connect().await?;
    c.join("R5", PeerRole::Mentee).await?;
    assert_eq!(server.engine().call_count(MockOperation::CreateRouter), 2);
    Ok(())
}

#[tokio::test]
async fn test_leave_then_disconnect_closes_nothing_twice() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let (mut mentor, _, producer_id) = joined_mentor_with_video(&server, "R6").await?;

    mentor.leave().await?;
    server.wait_for_engine_idle().await?;
    let closes_after_leave = server.engine().total_closes();
    assert_eq!(server.engine().close_count(&producer_id), 1);

    mentor.close().await?;
    server.wait_for_connections(0).await?;
    assert_eq!(server.engine().total_closes(), closes_after_leave);
    assert!(server.engine().live_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_room_capacity_rejects_extra_peer() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn_with(RegistrySettings {
        max_peers_per_room: 1,
        ..RegistrySettings::default()
    })
    .await?;

    let mut first = server.connect().await?;
    first.join("R7", PeerRole::Mentor).await?;

    let mut second = server.connect().await?;
    let reply = second
        .request(&sr_test_utils::join_action("R7", PeerRole::Mentee))
        .await?;
    assert!(reply.is_error());
    assert_eq!(reply.message.as_deref(), Some("Room is at capacity"));
    assert_eq!(room_peer_count(&server, "R7").await, 1);

    // The rejected connection can still join elsewhere.
    second.join("R8", PeerRole::Mentee).await?;
    Ok(())
}

// ============================================================================
// Consume failure modes
// ============================================================================

#[tokio::test]
async fn test_consume_without_mentor_producer_fails() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let mut mentee_producer = server.connect().await?;
    mentee_producer.join("C1", PeerRole::Mentee).await?;
    let transport = mentee_producer.create_transport().await?;
    mentee_producer
        .produce(&transport.transport_id, MediaKind::Audio, None)
        .await?;

    let mut mentee = server.connect().await?;
    mentee.join("C1", PeerRole::Mentee).await?;
    let transport = mentee.create_transport().await?;

    let reply = mentee.consume(&transport.transport_id).await?;
    assert_eq!(reply.message.as_deref(), Some("No producer available"));
    assert_eq!(server.engine().call_count(MockOperation::Consume), 0);
    Ok(())
}

#[tokio::test]
async fn test_consume_with_incompatible_capabilities_fails() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let (_mentor, _, _) = joined_mentor_with_video(&server, "C2").await?;
    server.engine().set_compatible(false);

    let mut mentee = server.connect().await?;
    mentee.join("C2", PeerRole::Mentee).await?;
    let transport = mentee.create_transport().await?;

    let reply = mentee
        .request(&ClientAction::Consume(signaling_protocol::Consume {
            transport_id: transport.transport_id,
            rtp_capabilities: h264_only_rtp_capabilities(),
        }))
        .await?;
    assert!(reply.is_error());
    assert_eq!(
        reply.message.as_deref(),
        Some("Cannot consume producer with the given RTP capabilities")
    );
    assert_eq!(server.engine().call_count(MockOperation::CanConsume), 1);
    assert_eq!(server.engine().call_count(MockOperation::Consume), 0);
    Ok(())
}

#[tokio::test]
async fn test_consume_on_unknown_transport_fails() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let (_mentor, _, _) = joined_mentor_with_video(&server, "C3").await?;

    let mut mentee = server.connect().await?;
    mentee.join("C3", PeerRole::Mentee).await?;

    let reply = mentee.consume("transport-does-not-exist").await?;
    assert_eq!(reply.message.as_deref(), Some("Transport not found"));
    assert_eq!(server.engine().call_count(MockOperation::Consume), 0);
    Ok(())
}

#[tokio::test]
async fn test_engine_rejection_keeps_connection_usable() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let mut client = server.connect().await?;
    client.join("E1", PeerRole::Mentor).await?;

    server.engine().fail(MockOperation::CreateTransport);
    let reply = client.request(&ClientAction::CreateWebRtcTransport).await?;
    assert_eq!(
        reply.message.as_deref(),
        Some("Media engine rejected the request")
    );

    server.engine().succeed(MockOperation::CreateTransport);
    client.create_transport().await?;
    Ok(())
}

// ============================================================================
// Protocol errors
// ============================================================================

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let mut client = server.connect().await?;

    client.send_text("not json").await?;
    assert_eq!(client.recv().await?.message.as_deref(), Some("Malformed message"));

    client.send_text(r#"{"action":"dance","data":{}}"#).await?;
    assert_eq!(
        client.recv().await?.message.as_deref(),
        Some("Unknown action: dance")
    );

    client.send_binary(vec![0xde, 0xad]).await?;
    assert_eq!(
        client.recv().await?.message.as_deref(),
        Some("Binary frames are not supported")
    );

    client.join("P1", PeerRole::Mentee).await?;
    Ok(())
}

#[tokio::test]
async fn test_actions_before_join_are_rejected() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let mut client = server.connect().await?;

    for action in [
        ClientAction::GetRtpCapabilities,
        ClientAction::CreateWebRtcTransport,
        ClientAction::LeaveRoom,
    ] {
        let reply = client.request(&action).await?;
        assert_eq!(reply.message.as_deref(), Some("Not in a room"));
    }
    assert!(server.engine().created_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rtp_capabilities_come_from_room_router() -> Result<(), anyhow::Error> {
    let server = TestRouterServer::spawn().await?;
    let mut client = server.connect().await?;
    client.join("P2", PeerRole::Mentee).await?;

    let reply = client.request(&ClientAction::GetRtpCapabilities).await?;
    assert_eq!(reply.action, "rtpCapabilities");
    let codecs = reply.data["codecs"].as_array().unwrap();
    assert!(codecs.iter().any(|c| c["mimeType"] == "audio/opus"));
    assert!(codecs.iter().any(|c| c["mimeType"] == "video/VP8"));
    Ok(())
}
