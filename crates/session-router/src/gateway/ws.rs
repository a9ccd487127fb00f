//! WebSocket listener for the signaling protocol.
//!
//! Every upgraded socket gets its own task running [`run_connection`]. The
//! task reads one frame, awaits its reply, and only then reads the next, so
//! frames from one client are handled strictly in order.

use super::session::{GatewayContext, SignalingSession};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[derive(Clone)]
struct GatewayState {
    ctx: Arc<GatewayContext>,
    shutdown: CancellationToken,
}

/// Router serving the signaling WebSocket at `/` and `/ws`.
///
/// Cancelling `shutdown` refuses new upgrades and closes open sockets; each
/// closed socket still runs its session cleanup.
pub fn signaling_router(ctx: Arc<GatewayContext>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(GatewayState { ctx, shutdown })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    if state.shutdown.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| run_connection(socket, state.ctx, state.shutdown))
}

/// Drive one signaling connection until the client goes away or the server
/// shuts down, then release whatever the connection still holds.
#[instrument(skip_all, name = "sr.gateway.connection")]
pub async fn run_connection(
    mut socket: WebSocket,
    ctx: Arc<GatewayContext>,
    shutdown: CancellationToken,
) {
    ctx.metrics.connection_opened();
    debug!(target: "sr.gateway", "Connection opened");

    let mut session = SignalingSession::new(Arc::clone(&ctx));

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!(target: "sr.gateway", "Closing connection for shutdown");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }

            frame = socket.recv() => {
                let reply = match frame {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                    Some(Ok(Message::Binary(_))) => session.handle_binary(),
                    // Pings are answered by the WebSocket layer.
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(target: "sr.gateway", error = %e, "WebSocket receive failed");
                        break;
                    }
                };

                if let Err(e) = socket.send(Message::Text(reply.to_text())).await {
                    debug!(target: "sr.gateway", error = %e, "WebSocket send failed");
                    break;
                }
            }
        }
    }

    session.close().await;
    ctx.metrics.connection_closed();
    debug!(target: "sr.gateway", "Connection closed");
}
