use lockstep_store::VideoKind;
use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::error::SyncError;

/// Control surface of a frame-accurate player. Position and play state
/// are readable synchronously at any time; commands take effect
/// near-immediately and are fire-and-forget.
pub trait DirectBackend: Send {
    fn play(&self);
    fn pause(&self);
    fn seek_to_ms(&self, position_ms: u64);
    fn position_ms(&self) -> u64;
    fn is_playing(&self) -> bool;
}

/// Control surface of a third-party embed player. Commands are
/// fire-and-forget; all telemetry arrives as pushed [`EmbeddedEvent`]s
/// on the channel handed out at construction.
pub trait EmbeddedBackend: Send {
    fn play(&self);
    fn pause(&self);
    fn seek_to_seconds(&self, seconds: f64);
}

/// Coarse play-state values pushed by the embed player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedPlayState {
    Playing,
    Paused,
    /// Buffering, cued, ended; carries no play/pause information.
    Other,
}

/// Telemetry pushed by the embed player.
#[derive(Debug, Clone, Copy)]
pub enum EmbeddedEvent {
    /// The player finished loading; commands are usable from here on.
    Ready,
    /// Current playhead second, roughly once per second while visible.
    SecondTick(u32),
    StateChange(EmbeddedPlayState),
}

/// An embed player plus its telemetry stream.
pub struct EmbeddedHandle {
    pub backend: Box<dyn EmbeddedBackend>,
    pub events: mpsc::UnboundedReceiver<EmbeddedEvent>,
}

/// Seam the embedding application implements to construct real players.
/// Construction failure is the "no playable media" condition: the
/// session stays attached and waits for the room's video to change.
pub trait PlayerFactory: Send + Sync {
    fn direct(&self, url: &str) -> Result<Box<dyn DirectBackend>, SyncError>;
    fn embedded(&self, video_id: &str, start_seconds: f64) -> Result<EmbeddedHandle, SyncError>;
}

/// Uniform capability surface over the two player variants, hiding
/// their very different telemetry granularity.
pub enum PlayerAdapter {
    Direct(DirectStreamAdapter),
    Embedded(EmbeddedStreamAdapter),
}

impl PlayerAdapter {
    pub fn kind(&self) -> VideoKind {
        match self {
            PlayerAdapter::Direct(_) => VideoKind::Direct,
            PlayerAdapter::Embedded(_) => VideoKind::Embedded,
        }
    }

    /// Whether commands can take effect yet. Direct players are usable
    /// as soon as they are constructed; embed players only after their
    /// `Ready` event.
    pub fn ready(&self) -> bool {
        match self {
            PlayerAdapter::Direct(_) => true,
            PlayerAdapter::Embedded(a) => a.ready,
        }
    }

    /// Best known playhead position: a live read for direct players, the
    /// last pushed second (stale by up to ~1 s) for embed players.
    pub fn approx_position_ms(&self) -> u64 {
        match self {
            PlayerAdapter::Direct(a) => a.backend.position_ms(),
            PlayerAdapter::Embedded(a) => u64::from(a.last_tick_seconds) * 1000,
        }
    }

    pub fn observed_playing(&self) -> bool {
        match self {
            PlayerAdapter::Direct(a) => a.backend.is_playing(),
            PlayerAdapter::Embedded(a) => a.playing,
        }
    }

    /// Idempotent: a no-op when the observed state already matches, so a
    /// redundant correction never ripples into player churn.
    pub fn play(&self) {
        if self.observed_playing() {
            return;
        }
        match self {
            PlayerAdapter::Direct(a) => a.backend.play(),
            PlayerAdapter::Embedded(a) => a.backend.play(),
        }
    }

    pub fn pause(&self) {
        if !self.observed_playing() {
            return;
        }
        match self {
            PlayerAdapter::Direct(a) => a.backend.pause(),
            PlayerAdapter::Embedded(a) => a.backend.pause(),
        }
    }

    pub fn seek_to_ms(&self, position_ms: u64) {
        match self {
            PlayerAdapter::Direct(a) => a.backend.seek_to_ms(position_ms),
            PlayerAdapter::Embedded(a) => a.backend.seek_to_seconds(position_ms as f64 / 1000.0),
        }
    }

    /// Drift band for this adapter class. The embed band is wider: 1 Hz
    /// telemetry cannot tell natural drift from a small scrub.
    pub fn drift_threshold_ms(&self, config: &SyncConfig) -> u64 {
        match self {
            PlayerAdapter::Direct(_) => config.direct_drift_threshold_ms,
            PlayerAdapter::Embedded(_) => config.embedded_drift_threshold_ms,
        }
    }

    /// Fold a pushed embed event into the adapter's observed state.
    /// Returns true when the event marked the player ready.
    pub fn note_embedded_event(&mut self, event: EmbeddedEvent) -> bool {
        let PlayerAdapter::Embedded(a) = self else {
            tracing::error!("embedded telemetry with no embed player attached");
            debug_assert!(false, "embedded telemetry requires an embed adapter");
            return false;
        };
        match event {
            EmbeddedEvent::Ready => {
                let newly_ready = !a.ready;
                a.ready = true;
                newly_ready
            }
            EmbeddedEvent::SecondTick(second) => {
                a.last_tick_seconds = second;
                false
            }
            EmbeddedEvent::StateChange(state) => {
                match state {
                    EmbeddedPlayState::Playing => a.playing = true,
                    EmbeddedPlayState::Paused => a.playing = false,
                    EmbeddedPlayState::Other => {}
                }
                false
            }
        }
    }
}

pub struct DirectStreamAdapter {
    backend: Box<dyn DirectBackend>,
}

impl DirectStreamAdapter {
    pub fn new(backend: Box<dyn DirectBackend>) -> Self {
        Self { backend }
    }
}

pub struct EmbeddedStreamAdapter {
    backend: Box<dyn EmbeddedBackend>,
    ready: bool,
    last_tick_seconds: u32,
    playing: bool,
}

impl EmbeddedStreamAdapter {
    pub fn new(backend: Box<dyn EmbeddedBackend>, start_ms: u64) -> Self {
        Self {
            backend,
            ready: false,
            last_tick_seconds: (start_ms / 1000) as u32,
            playing: false,
        }
    }
}
