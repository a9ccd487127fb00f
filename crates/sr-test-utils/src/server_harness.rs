//! Test server harness for E2E testing
//!
//! Provides `TestRouterServer` for spawning the real signaling gateway in
//! tests, backed by a `MockMediaEngine` so every engine call and close can be
//! asserted.

use crate::ws_client::WsTestClient;
use session_router::actors::{ActorMetrics, RegistrySettings, SessionRegistryHandle};
use session_router::engine::mock::MockMediaEngine;
use session_router::engine::{TransportListenConfig, WorkerHandle};
use session_router::gateway::{signaling_router, GatewayContext};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Poll interval used by the `wait_*` helpers.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound for the `wait_*` helpers.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test harness for spawning the Session Router gateway in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_join_e2e() -> Result<(), anyhow::Error> {
///     let server = TestRouterServer::spawn().await?;
///     let mut client = server.connect().await?;
///
///     client.join("R1", PeerRole::Mentor).await?;
///     assert_eq!(server.metrics().peer_count(), 1);
///     Ok(())
/// }
/// ```
pub struct TestRouterServer {
    addr: SocketAddr,
    engine: Arc<MockMediaEngine>,
    registry: SessionRegistryHandle,
    metrics: Arc<ActorMetrics>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestRouterServer {
    /// Spawn a server with default registry limits.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the WebSocket gateway in the background
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(RegistrySettings::default()).await
    }

    /// Spawn a server with custom registry limits.
    pub async fn spawn_with(settings: RegistrySettings) -> Result<Self, anyhow::Error> {
        let engine = Arc::new(MockMediaEngine::new());
        let metrics = ActorMetrics::new();

        let registry = SessionRegistryHandle::new(
            "sr-test".to_string(),
            engine.clone(),
            WorkerHandle {
                id: "worker-test".to_string(),
            },
            settings,
            Arc::clone(&metrics),
        );

        let ctx = Arc::new(GatewayContext {
            registry: registry.clone(),
            engine: engine.clone(),
            listen: TransportListenConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), None),
            metrics: Arc::clone(&metrics),
        });

        let shutdown = CancellationToken::new();
        let app = signaling_router(ctx, shutdown.child_token());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let serve_shutdown = shutdown.child_token();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { serve_shutdown.cancelled().await });
            if let Err(e) = server.await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            engine,
            registry,
            metrics,
            shutdown,
            handle,
        })
    }

    /// WebSocket URL of the gateway (e.g. "ws://127.0.0.1:12345/ws").
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The mock engine behind every room.
    pub fn engine(&self) -> &MockMediaEngine {
        &self.engine
    }

    pub fn registry(&self) -> &SessionRegistryHandle {
        &self.registry
    }

    pub fn metrics(&self) -> &ActorMetrics {
        &self.metrics
    }

    /// Open a new signaling connection.
    pub async fn connect(&self) -> Result<WsTestClient, anyhow::Error> {
        WsTestClient::connect(&self.url()).await
    }

    /// Run the service shutdown sequence: close sockets, then every room.
    pub async fn shutdown(&self) -> Result<(), anyhow::Error> {
        self.shutdown.cancel();
        self.wait_for_connections(0).await?;
        self.registry
            .shutdown()
            .await
            .map_err(|e| anyhow::anyhow!("Registry shutdown failed: {}", e))
    }

    /// Wait until the registry reports `rooms` rooms.
    pub async fn wait_for_rooms(&self, rooms: usize) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let status = self
                .registry
                .get_status()
                .await
                .map_err(|e| anyhow::anyhow!("Registry status failed: {}", e))?;
            if status.room_count == rooms {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("expected {rooms} rooms, still {}", status.room_count);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until `connections` sockets are open; a closed socket counts only
    /// after its cleanup finished.
    pub async fn wait_for_connections(&self, connections: usize) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        while self.metrics.connection_count() != connections {
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!(
                    "expected {connections} connections, still {}",
                    self.metrics.connection_count()
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Wait until every resource the engine created has been closed. Rooms
    /// release their router on their own task, after the release that
    /// emptied them returns.
    pub async fn wait_for_engine_idle(&self) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let live = self.engine.live_ids();
            if live.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("engine resources still open: {live:?}");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Drop for TestRouterServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.registry.cancel();
        self.handle.abort();
    }
}
