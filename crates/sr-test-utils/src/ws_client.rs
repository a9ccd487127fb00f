//! WebSocket client speaking the signaling protocol.

use crate::fixtures::{connect_action, consume_action, join_action, produce_action};
use anyhow::{anyhow, bail, Context};
use common::PeerRole;
use futures_util::{SinkExt, StreamExt};
use signaling_protocol::{
    ClientAction, JoinedRoomData, MediaKind, ServerEnvelope, TransportCreatedData,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long `recv` waits for a reply before failing the test.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// One signaling connection.
pub struct WsTestClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTestClient {
    /// Connect to `url` (e.g. `ws://127.0.0.1:1234/ws`).
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (stream, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;
        Ok(Self { stream })
    }

    /// Send an action without waiting for the reply.
    pub async fn send_action(&mut self, action: &ClientAction) -> Result<(), anyhow::Error> {
        self.send_text(&action.to_text()).await
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .context("Failed to send text frame")
    }

    /// Send a raw binary frame.
    pub async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), anyhow::Error> {
        self.stream
            .send(Message::Binary(bytes))
            .await
            .context("Failed to send binary frame")
    }

    /// Wait for the next reply.
    pub async fn recv(&mut self) -> Result<ServerEnvelope, anyhow::Error> {
        loop {
            let frame = tokio::time::timeout(REPLY_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow!("Timed out waiting for a reply"))?
                .ok_or_else(|| anyhow!("Connection closed"))?
                .context("Failed to read frame")?;

            match frame {
                Message::Text(text) => {
                    return serde_json::from_str(&text)
                        .with_context(|| format!("Reply is not an envelope: {text}"));
                }
                Message::Close(_) => bail!("Connection closed by server"),
                _ => {}
            }
        }
    }

    /// Send an action and wait for its reply.
    pub async fn request(&mut self, action: &ClientAction) -> Result<ServerEnvelope, anyhow::Error> {
        self.send_action(action).await?;
        self.recv().await
    }

    /// `request`, failing if the reply is an error or has another action.
    pub async fn expect(
        &mut self,
        action: &ClientAction,
        reply_action: &str,
    ) -> Result<ServerEnvelope, anyhow::Error> {
        let reply = self.request(action).await?;
        if reply.is_error() {
            bail!(
                "{} failed: {}",
                action.name(),
                reply.message.unwrap_or_default()
            );
        }
        if reply.action != reply_action {
            bail!("expected {reply_action}, got {}", reply.action);
        }
        Ok(reply)
    }

    pub async fn join(
        &mut self,
        room_id: &str,
        role: PeerRole,
    ) -> Result<JoinedRoomData, anyhow::Error> {
        let reply = self
            .expect(&join_action(room_id, role), "joinedRoom")
            .await?;
        Ok(reply.data_as()?)
    }

    pub async fn create_transport(&mut self) -> Result<TransportCreatedData, anyhow::Error> {
        let reply = self
            .expect(&ClientAction::CreateWebRtcTransport, "transportCreated")
            .await?;
        Ok(reply.data_as()?)
    }

    pub async fn connect_transport(&mut self, transport_id: &str) -> Result<(), anyhow::Error> {
        self.expect(&connect_action(transport_id), "connected")
            .await
            .map(|_| ())
    }

    /// Produce `kind` and return the new producer id.
    pub async fn produce(
        &mut self,
        transport_id: &str,
        kind: MediaKind,
        is_mentor: Option<bool>,
    ) -> Result<String, anyhow::Error> {
        let reply = self
            .expect(&produce_action(transport_id, kind, is_mentor), "produced")
            .await?;
        reply.data["producerId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("produced reply without producerId"))
    }

    /// Send `consume` and return the raw reply (success or error).
    pub async fn consume(&mut self, transport_id: &str) -> Result<ServerEnvelope, anyhow::Error> {
        self.request(&consume_action(transport_id)).await
    }

    /// Send `leaveRoom` and wait for the acknowledgement.
    pub async fn leave(&mut self) -> Result<(), anyhow::Error> {
        self.expect(&ClientAction::LeaveRoom, "leftRoom")
            .await
            .map(|_| ())
    }

    /// Close the socket with a close frame.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.stream
            .close(None)
            .await
            .context("Failed to close connection")
    }
}
