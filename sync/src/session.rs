use std::sync::Arc;

use lockstep_store::{
    MemberRecord, RoomEvent, RoomPlaybackState, RoomStateDelta, StateStore, StoreError,
    Subscription,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::adapter::{EmbeddedEvent, PlayerFactory};
use crate::config::SyncConfig;
use crate::controller::{LocalOrigin, SyncController};
use crate::error::{ErrorSlot, SyncError};

/// Stable member identity supplied by the external identity provider.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

enum SessionCommand {
    PlaybackChanged { is_playing: bool, position_ms: u64 },
    SelectMedia { url: String },
}

struct ActiveSession {
    room_id: String,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    stop_tx: watch::Sender<bool>,
    driver: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

/// Owns the sync controller's lifecycle for at most one joined room:
/// subscribe and spawn on join, stop everything deterministically on
/// leave. There is no process-wide instance; embedders construct one
/// per client and inject it where needed.
pub struct SessionManager {
    store: Arc<dyn StateStore>,
    factory: Arc<dyn PlayerFactory>,
    identity: Identity,
    config: SyncConfig,
    errors: ErrorSlot,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        factory: Arc<dyn PlayerFactory>,
        identity: Identity,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            factory,
            identity,
            config,
            errors: ErrorSlot::new(),
            active: Mutex::new(None),
        }
    }

    /// Create a new room with no media, owned by this identity. Does not
    /// join it.
    pub async fn create_room(&self) -> Result<String, SyncError> {
        loop {
            let code = generate_room_code();
            let creator = MemberRecord::new(
                self.identity.user_id.clone(),
                self.identity.display_name.clone(),
            );
            match self
                .store
                .insert(RoomPlaybackState::new(code.as_str(), creator))
                .await
            {
                Ok(()) => {
                    self.errors.clear();
                    return Ok(code);
                }
                Err(StoreError::RoomExists(_)) => continue,
                Err(err) => {
                    self.errors.set(err.to_string());
                    return Err(err.into());
                }
            }
        }
    }

    /// Join a room: subscribe, register membership, bring up the
    /// controller and the presence heartbeat.
    pub async fn join(&self, room_id: &str) -> Result<(), SyncError> {
        match self.join_inner(room_id).await {
            Ok(()) => {
                self.errors.clear();
                tracing::info!("joined room {room_id}");
                Ok(())
            }
            Err(err) => {
                self.errors.set(err.to_string());
                Err(err)
            }
        }
    }

    async fn join_inner(&self, room_id: &str) -> Result<(), SyncError> {
        {
            let active = self.active.lock();
            if let Some(session) = active.as_ref() {
                if !session.cmd_tx.is_closed() {
                    return Err(SyncError::AlreadyJoined(session.room_id.clone()));
                }
            }
        }

        // Subscribe before reading so a write committed in between is
        // delivered rather than lost.
        let subscription = match self.store.subscribe(room_id).await {
            Ok(sub) => sub,
            Err(StoreError::RoomNotFound(_)) => {
                return Err(SyncError::RoomNotFound(room_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let initial = self
            .store
            .get(room_id)
            .await?
            .ok_or_else(|| SyncError::RoomNotFound(room_id.to_string()))?;

        // Membership is not playback state; it never goes through the
        // publish guard.
        let member = MemberRecord::new(
            self.identity.user_id.clone(),
            self.identity.display_name.clone(),
        );
        self.store
            .apply(room_id, RoomStateDelta::presence(member))
            .await?;

        let controller = SyncController::new(
            room_id,
            &initial,
            Arc::clone(&self.store),
            Arc::clone(&self.factory),
            self.config.clone(),
            self.errors.clone(),
            Instant::now(),
        );

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let driver = tokio::spawn(run_driver(
            controller,
            subscription,
            cmd_rx,
            stop_rx.clone(),
            self.config.clone(),
        ));
        let heartbeat = tokio::spawn(run_heartbeat(
            Arc::clone(&self.store),
            room_id.to_string(),
            self.identity.clone(),
            self.config.clone(),
            stop_rx,
        ));

        *self.active.lock() = Some(ActiveSession {
            room_id: room_id.to_string(),
            cmd_tx,
            stop_tx,
            driver,
            heartbeat,
        });
        Ok(())
    }

    /// Leave the current room. Both background loops are stopped and
    /// awaited before this returns, so no callback can fire against the
    /// torn-down session afterwards.
    pub async fn leave(&self) -> Result<(), SyncError> {
        let session = self.active.lock().take().ok_or(SyncError::NotJoined)?;
        let _ = session.stop_tx.send(true);
        let _ = session.driver.await;
        let _ = session.heartbeat.await;

        // Best-effort roster cleanup; a stale record ages out through
        // the liveness window.
        if let Err(err) = self
            .store
            .apply(
                &session.room_id,
                RoomStateDelta::drop_member(self.identity.user_id.clone()),
            )
            .await
        {
            tracing::debug!("roster cleanup after leave failed: {err}");
        }
        tracing::info!("left room {}", session.room_id);
        Ok(())
    }

    /// The UI performed a play/pause/seek on the local player and is
    /// reporting the resulting state.
    pub fn report_playback_change(&self, is_playing: bool, position_ms: u64) {
        self.send(SessionCommand::PlaybackChanged {
            is_playing,
            position_ms,
        });
    }

    /// Select the room's media by URL. Resets the room to the start,
    /// paused, for every member.
    pub fn select_media(&self, url: impl Into<String>) {
        self.send(SessionCommand::SelectMedia { url: url.into() });
    }

    /// Delete a room. Only the creator may; every joined session
    /// observes the removal as an implicit leave.
    pub async fn delete_room(&self, room_id: &str) -> Result<(), SyncError> {
        match self.delete_room_inner(room_id).await {
            Ok(()) => {
                self.errors.clear();
                Ok(())
            }
            Err(err) => {
                self.errors.set(err.to_string());
                Err(err)
            }
        }
    }

    async fn delete_room_inner(&self, room_id: &str) -> Result<(), SyncError> {
        let state = self
            .store
            .get(room_id)
            .await?
            .ok_or_else(|| SyncError::RoomNotFound(room_id.to_string()))?;
        if state.creator_id != self.identity.user_id {
            return Err(SyncError::NotCreator);
        }
        self.store.remove(room_id).await?;
        Ok(())
    }

    /// Room currently joined, if the session is still alive.
    pub fn current_room(&self) -> Option<String> {
        let active = self.active.lock();
        active
            .as_ref()
            .filter(|session| !session.cmd_tx.is_closed())
            .map(|session| session.room_id.clone())
    }

    /// Latest failure message; cleared by the next successful operation.
    pub fn last_error(&self) -> Option<String> {
        self.errors.current()
    }

    fn send(&self, command: SessionCommand) {
        let active = self.active.lock();
        match active.as_ref() {
            Some(session) if !session.cmd_tx.is_closed() => {
                let _ = session.cmd_tx.send(command);
            }
            _ => self.errors.set("not joined to a room"),
        }
    }
}

/// Short human-readable room code.
fn generate_room_code() -> String {
    let raw = (Uuid::new_v4().as_u128() % 1_000_000) as u32;
    format!("{:03}-{:03}", raw / 1000, raw % 1000)
}

/// The session's single execution context. Subscription delivery, user
/// commands, embed telemetry and the direct poll timer are all
/// serialized here, so the controller needs no locking.
async fn run_driver(
    mut controller: SyncController,
    mut subscription: Subscription,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    mut stop: watch::Receiver<bool>,
    config: SyncConfig,
) {
    let mut embedded_rx = controller.take_embedded_events();
    let mut poll = tokio::time::interval(config.direct_poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            event = subscription.recv() => match event {
                Some(RoomEvent::Updated(state)) => {
                    controller.handle_remote(state, Instant::now());
                }
                Some(RoomEvent::Removed) | None => {
                    tracing::info!("room document gone; treating as leave");
                    break;
                }
            },
            Some(command) = commands.recv() => match command {
                SessionCommand::PlaybackChanged { is_playing, position_ms } => {
                    controller
                        .handle_local(LocalOrigin::UserAction, is_playing, position_ms, Instant::now())
                        .await;
                }
                SessionCommand::SelectMedia { url } => {
                    controller.publish_media_selection(&url).await;
                }
            },
            event = recv_embedded(&mut embedded_rx) => match event {
                Some(event) => {
                    controller.handle_embedded_event(event, Instant::now()).await;
                }
                // Embed player torn down externally; wait for a video change.
                None => embedded_rx = None,
            },
            _ = poll.tick(), if controller.wants_direct_poll() => {
                controller.poll_direct_telemetry(Instant::now()).await;
            }
        }

        // A video change may have rebuilt the player mid-iteration.
        if let Some(rx) = controller.take_embedded_events() {
            embedded_rx = Some(rx);
        } else if !controller.has_embedded_adapter() {
            embedded_rx = None;
        }
    }
    controller.detach();
}

async fn recv_embedded(
    rx: &mut Option<mpsc::UnboundedReceiver<EmbeddedEvent>>,
) -> Option<EmbeddedEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Periodic "last seen" presence write. Independent of playback sync;
/// failures are logged and retried on the next cycle, except a deleted
/// room, which ends the loop.
async fn run_heartbeat(
    store: Arc<dyn StateStore>,
    room_id: String,
    identity: Identity,
    config: SyncConfig,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // join already wrote the first presence record

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                let member = MemberRecord::new(identity.user_id.clone(), identity.display_name.clone());
                match store.apply(&room_id, RoomStateDelta::presence(member)).await {
                    Ok(()) => {}
                    Err(StoreError::RoomNotFound(_)) => {
                        tracing::info!("room {room_id} gone; stopping heartbeat");
                        break;
                    }
                    Err(err) => tracing::warn!("presence heartbeat failed: {err}"),
                }
            }
        }
    }
}
