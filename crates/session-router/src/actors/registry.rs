//! `SessionRegistryActor` - singleton owner of the room map.
//!
//! The registry is the top-level actor of the session router:
//!
//! - Singleton per process
//! - Maps room ids to `RoomActor` instances, creating rooms (and their
//!   routers) on first join
//! - Removes rooms once their last peer has left
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors room actor health (panic detection via `JoinHandle`)
//!
//! The registry never awaits the media engine on its own loop. A new room
//! is first recorded as pending while its router is created on a spawned
//! task; joiners for the same id queue on that entry and all receive the one
//! room installed by `RoomCreated`. Releasing a room is asked of the room by
//! the releasing caller, and the registry only drops the map entry.
//!
//! # Graceful Shutdown
//!
//! On `Shutdown` (or cancellation) the registry:
//! 1. Sets `accepting_new = false`
//! 2. Cancels every room (each closes its peers and its router)
//! 3. Waits for the room tasks to finish

use super::messages::{RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomHandle};
use crate::config::Config;
use crate::engine::{
    default_media_codecs, EngineError, MediaEngine, RouterHandle, RtpCodecCapability,
    WorkerHandle,
};
use crate::errors::SrError;
use crate::observability::metrics as prom;

use common::RoomId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for each room task.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a background reaper waits for a released room task.
const ROOM_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// A joiner waiting for a room.
type RoomWaiter = oneshot::Sender<Result<RoomHandle, SrError>>;

/// Limits and codecs applied to every room the registry creates.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub max_rooms: usize,
    pub max_peers_per_room: usize,
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl RegistrySettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_rooms: config.max_rooms,
            max_peers_per_room: config.max_peers_per_room,
            media_codecs: default_media_codecs(),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            max_rooms: crate::config::DEFAULT_MAX_ROOMS,
            max_peers_per_room: crate::config::DEFAULT_MAX_PEERS_PER_ROOM,
            media_codecs: default_media_codecs(),
        }
    }
}

/// Handle to the `SessionRegistryActor`.
#[derive(Clone)]
pub struct SessionRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl SessionRegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    ///
    /// Every room router is created on `worker`.
    #[must_use]
    pub fn new(
        instance_id: String,
        engine: Arc<dyn MediaEngine>,
        worker: WorkerHandle,
        settings: RegistrySettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionRegistryActor::new(
            instance_id,
            receiver,
            sender.downgrade(),
            cancel_token.clone(),
            engine,
            worker,
            settings,
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, SrError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| self.unavailable(&format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| self.unavailable(&format!("response receive failed: {e}")))
    }

    fn unavailable(&self, detail: &str) -> SrError {
        if self.cancel_token.is_cancelled() {
            SrError::Draining
        } else {
            SrError::Internal(detail.to_string())
        }
    }

    /// Return the room for `room_id`, creating it on first use.
    pub async fn get_or_create_room(&self, room_id: RoomId) -> Result<RoomHandle, SrError> {
        self.request(|respond_to| RegistryMessage::GetOrCreateRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Return the room for `room_id` if it exists.
    pub async fn get_room(&self, room_id: RoomId) -> Result<RoomHandle, SrError> {
        self.request(|respond_to| RegistryMessage::GetRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Close and remove the room if it has no peers. Returns `true` if this
    /// call removed it.
    ///
    /// The room decides emptiness inside its own mailbox, so a join that
    /// reached the room first keeps it alive. The round-trip to the room runs
    /// on the caller's task.
    pub async fn release_if_empty(&self, room_id: RoomId) -> Result<bool, SrError> {
        let room = match self.get_room(room_id).await {
            Ok(room) => room,
            Err(SrError::RoomNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        if !room.close_if_empty().await? {
            return Ok(false);
        }

        self.request(|respond_to| RegistryMessage::RoomReleased {
            room_id: room.room_id().clone(),
            router_id: room.router_id().to_string(),
            respond_to,
        })
        .await
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, SrError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting rooms and close every room. Returns once all room
    /// tasks have finished (or timed out).
    pub async fn shutdown(&self) -> Result<(), SrError> {
        self.request(|respond_to| RegistryMessage::Shutdown { respond_to })
            .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomHandle,
    task_handle: JoinHandle<()>,
    created_at: i64,
}

/// The `SessionRegistryActor` implementation.
pub struct SessionRegistryActor {
    instance_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Used by router creation tasks to report back; weak so the mailbox
    /// still closes when every handle is gone.
    self_sender: mpsc::WeakSender<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    engine: Arc<dyn MediaEngine>,
    worker: WorkerHandle,
    settings: RegistrySettings,
    rooms: HashMap<RoomId, ManagedRoom>,
    /// Rooms whose router is being created, with the joiners waiting on them.
    pending: HashMap<RoomId, Vec<RoomWaiter>>,
    /// Whether new rooms may be created.
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionRegistryActor {
    fn new(
        instance_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        self_sender: mpsc::WeakSender<RegistryMessage>,
        cancel_token: CancellationToken,
        engine: Arc<dyn MediaEngine>,
        worker: WorkerHandle,
        settings: RegistrySettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Registry, &instance_id);

        Self {
            instance_id,
            receiver,
            self_sender,
            cancel_token,
            engine,
            worker,
            settings,
            rooms: HashMap::new(),
            pending: HashMap::new(),
            accepting_new: true,
            metrics,
            mailbox,
        }
    }

    #[instrument(skip_all, name = "sr.actor.registry", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "sr.actor.registry",
            instance_id = %self.instance_id,
            worker_id = %self.worker.id,
            "SessionRegistryActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sr.actor.registry",
                        instance_id = %self.instance_id,
                        "SessionRegistryActor received cancellation signal"
                    );
                    self.close_all_rooms().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_depth(self.receiver.len());
                            self.handle_message(message).await;
                            self.mailbox.record_processed();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "sr.actor.registry",
                                instance_id = %self.instance_id,
                                "SessionRegistryActor channel closed, exiting"
                            );
                            self.close_all_rooms().await;
                            break;
                        }
                    }
                }
            }
        }

        // Routers whose creation finished after the loop stopped are
        // released here; any other queued request fails with `Draining`.
        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            if let RegistryMessage::RoomCreated {
                result: Ok(router), ..
            } = message
            {
                self.engine.close_router(&router.id).await;
            }
        }

        info!(
            target: "sr.actor.registry",
            instance_id = %self.instance_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionRegistryActor stopped"
        );
    }

    /// Only `Shutdown` awaits; every other message is answered without
    /// touching the media engine.
    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::GetOrCreateRoom {
                room_id,
                respond_to,
            } => {
                self.get_or_create_room(room_id, respond_to);
            }

            RegistryMessage::RoomCreated { room_id, result } => {
                self.install_room(room_id, result);
            }

            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let result = self
                    .rooms
                    .get(&room_id)
                    .filter(|managed| !managed.handle.is_closed())
                    .map(|managed| managed.handle.clone())
                    .ok_or_else(|| SrError::RoomNotFound(room_id.to_string()));
                let _ = respond_to.send(result);
            }

            RegistryMessage::RoomReleased {
                room_id,
                router_id,
                respond_to,
            } => {
                let released = self
                    .rooms
                    .get(&room_id)
                    .is_some_and(|managed| managed.handle.router_id() == router_id);
                if released {
                    self.remove_room(&room_id, "empty");
                }
                let _ = respond_to.send(released);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown { respond_to } => {
                info!(
                    target: "sr.actor.registry",
                    instance_id = %self.instance_id,
                    room_count = self.rooms.len(),
                    "Initiating graceful shutdown"
                );
                self.close_all_rooms().await;
                let _ = respond_to.send(Ok(()));
                self.cancel_token.cancel();
            }
        }
    }

    /// Answer with the live room, or queue the joiner on the room's pending
    /// router creation (starting one if needed).
    fn get_or_create_room(&mut self, room_id: RoomId, respond_to: RoomWaiter) {
        if !self.accepting_new {
            let _ = respond_to.send(Err(SrError::Draining));
            return;
        }

        if let Some(managed) = self.rooms.get(&room_id) {
            if !managed.handle.is_closed() {
                let _ = respond_to.send(Ok(managed.handle.clone()));
                return;
            }
            // The room stopped without being released; replace it.
            self.remove_room(&room_id, "stale");
        }

        if let Some(waiters) = self.pending.get_mut(&room_id) {
            waiters.push(respond_to);
            return;
        }

        if self.rooms.len() + self.pending.len() >= self.settings.max_rooms {
            warn!(
                target: "sr.actor.registry",
                instance_id = %self.instance_id,
                max_rooms = self.settings.max_rooms,
                "Room limit reached, rejecting room creation"
            );
            let _ = respond_to.send(Err(SrError::RegistryCapacityExceeded));
            return;
        }

        debug!(
            target: "sr.actor.registry",
            room_id = %room_id,
            "Creating router for new room"
        );

        self.pending.insert(room_id.clone(), vec![respond_to]);
        self.spawn_router_creation(room_id);
    }

    /// Create the router off the registry loop and report back with
    /// `RoomCreated`. If the registry is gone by then the router is closed
    /// here.
    fn spawn_router_creation(&self, room_id: RoomId) {
        let engine = Arc::clone(&self.engine);
        let worker_id = self.worker.id.clone();
        let media_codecs = self.settings.media_codecs.clone();
        let registry = self.self_sender.clone();

        tokio::spawn(async move {
            let result = engine.create_router(&worker_id, &media_codecs).await;
            prom::record_engine_operation("create_router", result.is_ok());

            let message = RegistryMessage::RoomCreated { room_id, result };
            let undelivered = match registry.upgrade() {
                Some(sender) => sender.send(message).await.err().map(|e| e.0),
                None => Some(message),
            };

            if let Some(RegistryMessage::RoomCreated {
                room_id,
                result: Ok(router),
            }) = undelivered
            {
                warn!(
                    target: "sr.actor.registry",
                    room_id = %room_id,
                    router_id = %router.id,
                    "Registry stopped during router creation, closing router"
                );
                engine.close_router(&router.id).await;
            }
        });
    }

    /// Install the room for a finished router creation and answer its
    /// joiners.
    fn install_room(&mut self, room_id: RoomId, result: Result<RouterHandle, EngineError>) {
        let waiters = self.pending.remove(&room_id).unwrap_or_default();

        let router = match result {
            Ok(router) => router,
            Err(e) => {
                warn!(
                    target: "sr.actor.registry",
                    room_id = %room_id,
                    error = %e,
                    waiters = waiters.len(),
                    "Router creation failed"
                );
                for waiter in waiters {
                    let _ = waiter.send(Err(SrError::Engine(e.clone())));
                }
                return;
            }
        };

        // Draining, or every joiner gave up while the router was created.
        if !self.accepting_new || waiters.iter().all(oneshot::Sender::is_closed) {
            debug!(
                target: "sr.actor.registry",
                room_id = %room_id,
                router_id = %router.id,
                "Discarding router with no room to install"
            );
            self.close_router_detached(router);
            for waiter in waiters {
                let _ = waiter.send(Err(SrError::Draining));
            }
            return;
        }

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            router,
            Arc::clone(&self.engine),
            self.settings.max_peers_per_room,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        self.metrics.room_created();

        info!(
            target: "sr.actor.registry",
            instance_id = %self.instance_id,
            room_id = %room_id,
            router_id = %handle.router_id(),
            waiters = waiters.len(),
            total_rooms = self.rooms.len(),
            "Room created"
        );

        for waiter in waiters {
            let _ = waiter.send(Ok(handle.clone()));
        }
    }

    fn close_router_detached(&self, router: RouterHandle) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            engine.close_router(&router.id).await;
        });
    }

    /// Drop a room from the map and reap its task in the background.
    fn remove_room(&mut self, room_id: &RoomId, reason: &'static str) {
        let Some(managed) = self.rooms.remove(room_id) else {
            return;
        };

        let lifetime_secs = chrono::Utc::now().timestamp() - managed.created_at;
        let room_id_owned = room_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_RELEASE_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sr.actor.registry",
                        room_id = %room_id_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sr.actor.registry",
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sr.actor.registry",
                        room_id = %room_id_owned,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        self.metrics.room_removed();

        info!(
            target: "sr.actor.registry",
            instance_id = %self.instance_id,
            room_id = %room_id,
            reason,
            lifetime_secs,
            total_rooms = self.rooms.len(),
            "Room removed"
        );
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            peer_count: self.metrics.peer_count(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Cancel every room and wait for the room tasks. Joiners still waiting
    /// on a router creation are told the registry is draining.
    async fn close_all_rooms(&mut self) {
        self.accepting_new = false;

        for (_, waiters) in self.pending.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(SrError::Draining));
            }
        }

        if self.rooms.is_empty() {
            return;
        }

        info!(
            target: "sr.actor.registry",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            "Closing all rooms"
        );

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sr.actor.registry",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sr.actor.registry",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sr.actor.registry",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(
            target: "sr.actor.registry",
            instance_id = %self.instance_id,
            "All rooms closed"
        );
    }

    /// Drop rooms whose actor task ended without a release.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "sr.actor.registry",
                        room_id = %room_id,
                        "Room actor exited without release"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "sr.actor.registry",
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            self.metrics.room_removed();
        }
    }
}
