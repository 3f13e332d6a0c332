use std::sync::Arc;

use lockstep_store::{RoomPlaybackState, RoomStateDelta, StateStore, VideoKind, VideoRef};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::adapter::{
    DirectStreamAdapter, EmbeddedEvent, EmbeddedStreamAdapter, PlayerAdapter, PlayerFactory,
};
use crate::config::SyncConfig;
use crate::error::ErrorSlot;
use crate::guard::PublishGuard;
use crate::media;

/// Where the controller stands relative to its room and player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No room joined.
    Detached,
    /// Room joined but the player cannot take commands yet (embed player
    /// loading, or no playable media). Remote state is remembered and
    /// applied once the player comes up.
    WaitingReady,
    /// Steady state: local events publish, remote diffs correct.
    Synced,
    /// A remote correction was just applied; local events are absorbed
    /// until the suppression window elapses.
    Correcting,
}

/// Whether a local event came from the user or from periodic telemetry.
/// Publish failures are surfaced for user actions and merely logged for
/// telemetry (the next cycle retries naturally).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOrigin {
    UserAction,
    Telemetry,
}

/// One client's view of a room's shared playback state.
///
/// Consumes remote change events and local player telemetry, applies
/// the correction policy, and is the only writer-gate to the publish
/// guard. Everything here runs on a single driver task; handlers take
/// an explicit `now` so ordering behavior is testable without timers.
pub struct SyncController {
    room_id: String,
    config: SyncConfig,
    store: Arc<dyn StateStore>,
    factory: Arc<dyn PlayerFactory>,
    errors: ErrorSlot,
    guard: PublishGuard,
    phase: Phase,
    suppress_until: Option<Instant>,
    adapter: Option<PlayerAdapter>,
    embedded_events: Option<mpsc::UnboundedReceiver<EmbeddedEvent>>,
    last_remote: Option<RoomPlaybackState>,
}

impl SyncController {
    pub fn new(
        room_id: impl Into<String>,
        initial: &RoomPlaybackState,
        store: Arc<dyn StateStore>,
        factory: Arc<dyn PlayerFactory>,
        config: SyncConfig,
        errors: ErrorSlot,
        now: Instant,
    ) -> Self {
        let guard = PublishGuard::new(config.min_publish_interval, config.min_position_delta_ms);
        let mut controller = Self {
            room_id: room_id.into(),
            config,
            store,
            factory,
            errors,
            guard,
            phase: Phase::WaitingReady,
            suppress_until: None,
            adapter: None,
            embedded_events: None,
            last_remote: None,
        };
        controller.handle_remote(initial.clone(), now);
        controller
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Telemetry stream of a freshly built embed player, handed to the
    /// driver loop. `None` when no rebuild happened since the last take.
    pub fn take_embedded_events(&mut self) -> Option<mpsc::UnboundedReceiver<EmbeddedEvent>> {
        self.embedded_events.take()
    }

    pub fn has_embedded_adapter(&self) -> bool {
        matches!(self.adapter, Some(PlayerAdapter::Embedded(_)))
    }

    pub fn wants_direct_poll(&self) -> bool {
        matches!(self.adapter, Some(PlayerAdapter::Direct(_)))
    }

    /// A committed write to the room document arrived, possibly our own
    /// echo (which the significance policy makes a no-op).
    pub fn handle_remote(&mut self, state: RoomPlaybackState, now: Instant) {
        if self.phase == Phase::Detached {
            return;
        }

        let video_changed = self
            .last_remote
            .as_ref()
            .map_or(true, |prev| prev.video != state.video);

        if video_changed {
            // A new video supersedes any in-flight correction.
            self.attach_media(&state.video, state.position_ms);
            self.try_become_synced(&state, now);
        } else {
            match self.phase {
                // Waiting on the player; the state is remembered below
                // and applied in full once it comes up.
                Phase::Detached | Phase::WaitingReady => {}
                Phase::Synced | Phase::Correcting => {
                    self.maybe_exit_correcting(now);
                    self.correct_if_significant(&state, now);
                }
            }
        }

        self.last_remote = Some(state);
    }

    /// A local player event: user action or periodic telemetry. Routes
    /// through the publish guard unless suppressed by a correction
    /// window.
    pub async fn handle_local(
        &mut self,
        origin: LocalOrigin,
        is_playing: bool,
        position_ms: u64,
        now: Instant,
    ) {
        self.maybe_exit_correcting(now);
        match self.phase {
            Phase::Detached | Phase::WaitingReady => return,
            Phase::Correcting => {
                tracing::trace!("local event suppressed during correction");
                return;
            }
            Phase::Synced => {}
        }
        if let Some(until) = self.suppress_until {
            if now < until {
                tracing::trace!("local event inside suppression window");
                return;
            }
        }
        if !self.guard.try_publish(is_playing, position_ms, now) {
            return;
        }
        let delta = RoomStateDelta::playback(is_playing, position_ms);
        match self.store.apply(&self.room_id, delta).await {
            Ok(()) => self.errors.clear(),
            Err(err) => match origin {
                LocalOrigin::UserAction => {
                    tracing::warn!("playback publish failed: {err}");
                    self.errors.set(err.to_string());
                }
                LocalOrigin::Telemetry => {
                    tracing::warn!("telemetry publish failed, retrying next cycle: {err}");
                }
            },
        }
    }

    /// Pushed telemetry from the embed player.
    pub async fn handle_embedded_event(&mut self, event: EmbeddedEvent, now: Instant) {
        let became_ready = match &mut self.adapter {
            Some(adapter) => adapter.note_embedded_event(event),
            None => {
                tracing::error!("embed telemetry with no player attached");
                return;
            }
        };

        if became_ready {
            self.errors.clear();
            if self.phase == Phase::WaitingReady {
                if let Some(remote) = self.last_remote.clone() {
                    self.apply_remote_state(&remote, now);
                    self.phase = Phase::Synced;
                }
            }
            return;
        }

        if matches!(
            event,
            EmbeddedEvent::SecondTick(_) | EmbeddedEvent::StateChange(_)
        ) {
            let (is_playing, position_ms) = match &self.adapter {
                Some(adapter) => (adapter.observed_playing(), adapter.approx_position_ms()),
                None => return,
            };
            self.handle_local(LocalOrigin::Telemetry, is_playing, position_ms, now)
                .await;
        }
    }

    /// Sample the frame-accurate player. Driven by the poll timer; embed
    /// players push instead.
    pub async fn poll_direct_telemetry(&mut self, now: Instant) {
        let (is_playing, position_ms) = match &self.adapter {
            Some(adapter @ PlayerAdapter::Direct(_)) => {
                (adapter.observed_playing(), adapter.approx_position_ms())
            }
            _ => return,
        };
        self.handle_local(LocalOrigin::Telemetry, is_playing, position_ms, now)
            .await;
    }

    /// User picked a new media URL for the room. The write resets the
    /// room to `{0, paused}`; our own adapter rebuild happens when the
    /// write echoes back through the subscription, the same path every
    /// other member takes.
    pub async fn publish_media_selection(&mut self, url: &str) {
        let video = media::classify(url);
        match self
            .store
            .apply(&self.room_id, RoomStateDelta::media(video))
            .await
        {
            Ok(()) => self.errors.clear(),
            Err(err) => {
                tracing::warn!("media selection failed: {err}");
                self.errors.set(err.to_string());
            }
        }
    }

    /// Release the player and forget all per-room state.
    pub fn detach(&mut self) {
        self.adapter = None;
        self.embedded_events = None;
        self.guard.reset();
        self.suppress_until = None;
        self.last_remote = None;
        self.phase = Phase::Detached;
    }

    /// Tear down the current player and build one for the new video.
    /// The old player (and its telemetry stream) is fully released
    /// before the successor exists.
    fn attach_media(&mut self, video: &VideoRef, start_ms: u64) {
        self.adapter = None;
        self.embedded_events = None;
        self.guard.reset();
        self.suppress_until = None;
        self.phase = Phase::WaitingReady;

        match video.kind {
            VideoKind::None => {}
            VideoKind::Direct => match self.factory.direct(&video.url) {
                Ok(backend) => {
                    self.adapter = Some(PlayerAdapter::Direct(DirectStreamAdapter::new(backend)));
                }
                Err(err) => self.report_unplayable(err.to_string()),
            },
            VideoKind::Embedded => match media::embedded_video_id(&video.url) {
                Some(video_id) => {
                    match self.factory.embedded(&video_id, start_ms as f64 / 1000.0) {
                        Ok(handle) => {
                            self.adapter = Some(PlayerAdapter::Embedded(
                                EmbeddedStreamAdapter::new(handle.backend, start_ms),
                            ));
                            self.embedded_events = Some(handle.events);
                        }
                        Err(err) => self.report_unplayable(err.to_string()),
                    }
                }
                None => self.report_unplayable(format!("unrecognized embed url: {}", video.url)),
            },
        }
    }

    /// Non-fatal: the session waits for the room's video to change.
    fn report_unplayable(&mut self, message: String) {
        tracing::warn!("no playable media: {message}");
        self.errors.set(message);
    }

    fn try_become_synced(&mut self, state: &RoomPlaybackState, now: Instant) {
        if self.adapter.as_ref().is_some_and(|a| a.ready()) {
            self.apply_remote_state(state, now);
            self.phase = Phase::Synced;
        }
    }

    /// Full re-application of remote state (adapter just became usable
    /// or was rebuilt). This is a correction, never published: the
    /// suppression window absorbs the player's echo of it.
    fn apply_remote_state(&mut self, state: &RoomPlaybackState, now: Instant) {
        let Some(adapter) = &self.adapter else {
            tracing::error!("correction attempted with no player attached");
            debug_assert!(false, "correction requires an attached player");
            return;
        };
        self.suppress_until = Some(now + self.config.correction_window);
        adapter.seek_to_ms(state.position_ms);
        if state.is_playing {
            adapter.play();
        } else {
            adapter.pause();
        }
    }

    /// The one significance policy, parameterized by adapter class:
    /// play/pause mismatch always corrects (without seeking); position
    /// corrects only past the adapter's drift band; both together seek
    /// and set play state.
    fn correct_if_significant(&mut self, state: &RoomPlaybackState, now: Instant) {
        let Some(adapter) = &self.adapter else {
            tracing::error!("correction attempted with no player attached");
            debug_assert!(false, "correction requires an attached player");
            return;
        };
        let play_mismatch = state.is_playing != adapter.observed_playing();
        let drift_ms = state.position_ms.abs_diff(adapter.approx_position_ms());
        let drift_significant = drift_ms > adapter.drift_threshold_ms(&self.config);
        if !play_mismatch && !drift_significant {
            return;
        }

        tracing::debug!(
            kind = ?adapter.kind(),
            play_mismatch,
            drift_ms,
            "applying remote correction to local player"
        );
        self.phase = Phase::Correcting;
        self.suppress_until = Some(now + self.config.correction_window);
        if drift_significant {
            adapter.seek_to_ms(state.position_ms);
        }
        if play_mismatch {
            if state.is_playing {
                adapter.play();
            } else {
                adapter.pause();
            }
        }
    }

    fn maybe_exit_correcting(&mut self, now: Instant) {
        if self.phase == Phase::Correcting
            && self.suppress_until.map_or(true, |until| now >= until)
        {
            self.phase = Phase::Synced;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCommand, SimPlayer, SimPlayerFactory};
    use lockstep_store::{MemberRecord, MemoryStore, Subscription};
    use std::time::Duration;

    const ROOM: &str = "100-200";

    fn room_state(kind: VideoKind, position_ms: u64, is_playing: bool) -> RoomPlaybackState {
        let mut state = RoomPlaybackState::new(ROOM, MemberRecord::new("u1", "Ada"));
        state.video = match kind {
            VideoKind::None => VideoRef::none(),
            VideoKind::Direct => VideoRef {
                url: "https://cdn.example/movie.mp4".into(),
                kind,
            },
            VideoKind::Embedded => VideoRef {
                url: "https://youtu.be/dQw4w9WgXcQ".into(),
                kind,
            },
        };
        state.position_ms = position_ms;
        state.is_playing = is_playing;
        state
    }

    struct Rig {
        store: Arc<MemoryStore>,
        factory: Arc<SimPlayerFactory>,
        controller: SyncController,
        watcher: Subscription,
        t0: Instant,
    }

    impl Rig {
        async fn new(initial: RoomPlaybackState) -> Self {
            Self::with_factory(initial, SimPlayerFactory::new()).await
        }

        async fn with_factory(initial: RoomPlaybackState, factory: SimPlayerFactory) -> Self {
            let store = Arc::new(MemoryStore::new());
            store.insert(initial.clone()).await.unwrap();
            let mut watcher = store.subscribe(ROOM).await.unwrap();
            watcher.try_recv(); // initial snapshot
            let factory = Arc::new(factory);
            let t0 = Instant::now();
            let controller = SyncController::new(
                ROOM,
                &initial,
                Arc::clone(&store) as Arc<dyn StateStore>,
                Arc::clone(&factory) as Arc<dyn PlayerFactory>,
                SyncConfig::default(),
                ErrorSlot::new(),
                t0,
            );
            Self {
                store,
                factory,
                controller,
                watcher,
                t0,
            }
        }

        fn player(&self) -> Arc<SimPlayer> {
            self.factory.last().expect("no player constructed")
        }

        fn store_writes(&mut self) -> usize {
            std::iter::from_fn(|| self.watcher.try_recv()).count()
        }
    }

    #[tokio::test]
    async fn direct_session_applies_initial_state_without_publishing() {
        let mut rig = Rig::new(room_state(VideoKind::Direct, 42_000, true)).await;
        assert_eq!(rig.controller.phase(), Phase::Synced);
        let player = rig.player();
        match player.as_ref() {
            SimPlayer::Direct { url, .. } => assert_eq!(url, "https://cdn.example/movie.mp4"),
            SimPlayer::Embedded { .. } => panic!("expected a direct player"),
        }
        assert_eq!(player.playhead().commands()[0], SimCommand::SeekMs(42_000));
        assert!(player.playhead().is_playing());
        assert_eq!(rig.store_writes(), 0, "initial application must not publish");
    }

    #[tokio::test]
    async fn embedded_session_waits_for_ready_then_applies() {
        let mut rig = Rig::with_factory(
            room_state(VideoKind::Embedded, 30_000, true),
            SimPlayerFactory::manual_ready(),
        )
        .await;
        assert_eq!(rig.controller.phase(), Phase::WaitingReady);
        let player = rig.player();
        assert!(player.playhead().commands().is_empty());

        let now = rig.t0 + Duration::from_secs(2);
        rig.controller
            .handle_embedded_event(EmbeddedEvent::Ready, now)
            .await;
        assert_eq!(rig.controller.phase(), Phase::Synced);
        assert_eq!(player.playhead().commands()[0], SimCommand::SeekMs(30_000));
        assert!(player.playhead().is_playing());
        assert_eq!(rig.store_writes(), 0, "readiness application must not publish");
    }

    #[tokio::test]
    async fn drift_threshold_is_wider_for_embedded_players() {
        // Identical 2.5 s drift: the frame-accurate player corrects, the
        // embed player stays put.
        let mut direct = Rig::new(room_state(VideoKind::Direct, 57_000, false)).await;
        direct.player().playhead().clear_commands();
        let now = direct.t0 + Duration::from_secs(2);
        direct
            .controller
            .handle_remote(room_state(VideoKind::Direct, 59_500, false), now);
        assert!(direct
            .player()
            .playhead()
            .commands()
            .contains(&SimCommand::SeekMs(59_500)));

        let mut embedded = Rig::new(room_state(VideoKind::Embedded, 57_000, false)).await;
        let ready_at = embedded.t0;
        embedded
            .controller
            .handle_embedded_event(EmbeddedEvent::Ready, ready_at)
            .await;
        embedded
            .controller
            .handle_embedded_event(EmbeddedEvent::SecondTick(57), ready_at)
            .await;
        embedded.player().playhead().clear_commands();
        let now = embedded.t0 + Duration::from_secs(2);
        embedded
            .controller
            .handle_remote(room_state(VideoKind::Embedded, 59_500, false), now);
        assert!(
            embedded.player().playhead().commands().is_empty(),
            "2.5 s is inside the embed guard band"
        );
    }

    #[tokio::test]
    async fn play_state_mismatch_is_always_significant() {
        let mut rig = Rig::new(room_state(VideoKind::Direct, 10_000, false)).await;
        rig.player().playhead().clear_commands();

        // Tiny drift, but remote is playing and we are paused.
        let now = rig.t0 + Duration::from_secs(2);
        rig.controller
            .handle_remote(room_state(VideoKind::Direct, 10_200, true), now);
        let commands = rig.player().playhead().commands();
        assert_eq!(commands, vec![SimCommand::Play], "play/pause only, no seek");
        assert_eq!(rig.controller.phase(), Phase::Correcting);
    }

    #[tokio::test]
    async fn corrections_suppress_the_player_echo() {
        let mut rig = Rig::new(room_state(VideoKind::Direct, 0, false)).await;
        rig.player().playhead().clear_commands();
        rig.store_writes();

        let now = rig.t0 + Duration::from_secs(2);
        rig.controller
            .handle_remote(room_state(VideoKind::Direct, 60_000, true), now);
        assert!(rig.player().playhead().is_playing());

        // The corrected player echoes matching telemetry inside the
        // window: nothing may reach the store.
        for offset_ms in [50, 300, 700] {
            rig.controller
                .handle_local(
                    LocalOrigin::Telemetry,
                    true,
                    60_000 + offset_ms,
                    now + Duration::from_millis(offset_ms),
                )
                .await;
        }
        assert_eq!(rig.store_writes(), 0, "echo leaked through the window");

        // Once the window elapses, telemetry publishes again.
        rig.controller
            .handle_local(
                LocalOrigin::Telemetry,
                true,
                61_000,
                now + Duration::from_millis(900),
            )
            .await;
        assert_eq!(rig.store_writes(), 1);
        assert_eq!(rig.controller.phase(), Phase::Synced);
    }

    #[tokio::test]
    async fn converges_to_remote_position_and_play_state() {
        let mut rig = Rig::new(room_state(VideoKind::Direct, 0, false)).await;
        let now = rig.t0 + Duration::from_secs(2);
        rig.controller
            .handle_remote(room_state(VideoKind::Direct, 60_000, true), now);

        let player = rig.player();
        let drift = player.playhead().position_ms().abs_diff(60_000);
        assert!(drift < SyncConfig::default().direct_drift_threshold_ms);
        assert!(player.playhead().is_playing());
    }

    #[tokio::test]
    async fn own_write_echo_is_harmless() {
        let mut rig = Rig::new(room_state(VideoKind::Direct, 5_000, false)).await;
        let player = rig.player();

        // The user pressed play in the UI; the local player is already
        // running when the engine hears about it.
        player.playhead().play();
        let now = rig.t0 + Duration::from_secs(2);
        rig.controller
            .handle_local(LocalOrigin::UserAction, true, 5_000, now)
            .await;
        assert_eq!(rig.store_writes(), 1);

        // Self-delivery of that write changes nothing at the player.
        player.playhead().clear_commands();
        let echo = rig.store.get(ROOM).await.unwrap().unwrap();
        rig.controller
            .handle_remote(echo, now + Duration::from_millis(50));
        assert!(player.playhead().commands().is_empty());
    }

    #[tokio::test]
    async fn video_change_rebuilds_player_and_resets_state() {
        let mut rig = Rig::new(room_state(VideoKind::Direct, 60_000, true)).await;
        assert_eq!(rig.factory.created().len(), 1);

        let now = rig.t0 + Duration::from_secs(2);
        rig.controller
            .handle_remote(room_state(VideoKind::Embedded, 0, false), now);
        assert_eq!(rig.factory.created().len(), 2, "new player for new video");
        match rig.factory.created()[1].as_ref() {
            SimPlayer::Embedded { video_id, .. } => assert_eq!(video_id, "dQw4w9WgXcQ"),
            SimPlayer::Direct { .. } => panic!("expected an embed player"),
        }
        assert!(rig.controller.has_embedded_adapter());
        assert_eq!(rig.controller.phase(), Phase::WaitingReady);

        // Local events are ignored until the new player is ready.
        rig.store_writes();
        rig.controller
            .handle_local(LocalOrigin::Telemetry, true, 60_000, now)
            .await;
        assert_eq!(rig.store_writes(), 0);
    }

    #[tokio::test]
    async fn unplayable_media_is_not_fatal() {
        let rig = Rig::with_factory(
            room_state(VideoKind::Direct, 0, false),
            SimPlayerFactory::failing(),
        )
        .await;
        assert_eq!(rig.controller.phase(), Phase::WaitingReady);
        assert!(rig.factory.created().is_empty());
    }

    #[tokio::test]
    async fn unrecognized_embed_url_reports_no_playable_media() {
        let mut state = room_state(VideoKind::Embedded, 0, false);
        state.video.url = "https://example.com/not-an-embed".into();
        let errors = ErrorSlot::new();
        let store = Arc::new(MemoryStore::new());
        store.insert(state.clone()).await.unwrap();
        let controller = SyncController::new(
            ROOM,
            &state,
            store as Arc<dyn StateStore>,
            Arc::new(SimPlayerFactory::new()),
            SyncConfig::default(),
            errors.clone(),
            Instant::now(),
        );
        assert_eq!(controller.phase(), Phase::WaitingReady);
        assert!(errors.current().unwrap().contains("unrecognized embed url"));
    }

    #[tokio::test]
    async fn publish_rate_is_limited_by_the_guard() {
        let mut rig = Rig::new(room_state(VideoKind::Direct, 0, true)).await;
        rig.store_writes();

        let base = rig.t0 + Duration::from_secs(2);
        rig.controller
            .handle_local(LocalOrigin::Telemetry, true, 10_000, base)
            .await;
        // Burst of telemetry 200 ms later with a large jump: meaningful,
        // but inside the minimum publish interval.
        rig.controller
            .handle_local(
                LocalOrigin::Telemetry,
                true,
                20_000,
                base + Duration::from_millis(200),
            )
            .await;
        assert_eq!(rig.store_writes(), 1);
    }
}
