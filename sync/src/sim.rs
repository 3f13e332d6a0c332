//! Simulated player backends.
//!
//! Used by the engine's own tests and by the demo binary: a playhead
//! that advances with the wall clock while playing, plus a command log
//! so callers can assert exactly which corrections reached the player.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::adapter::{
    DirectBackend, EmbeddedBackend, EmbeddedEvent, EmbeddedHandle, PlayerFactory,
};
use crate::error::SyncError;

/// Command observed by a simulated player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCommand {
    Play,
    Pause,
    SeekMs(u64),
}

struct Playhead {
    anchor_ms: u64,
    anchored_at: Instant,
    playing: bool,
    commands: Vec<SimCommand>,
}

/// A playhead advancing in real time while playing.
pub struct SimPlayhead {
    inner: Mutex<Playhead>,
}

impl SimPlayhead {
    pub fn paused_at(position_ms: u64) -> Self {
        Self {
            inner: Mutex::new(Playhead {
                anchor_ms: position_ms,
                anchored_at: Instant::now(),
                playing: false,
                commands: Vec::new(),
            }),
        }
    }

    pub fn position_ms(&self) -> u64 {
        let inner = self.inner.lock();
        if inner.playing {
            inner.anchor_ms + inner.anchored_at.elapsed().as_millis() as u64
        } else {
            inner.anchor_ms
        }
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    pub fn play(&self) {
        let mut inner = self.inner.lock();
        inner.commands.push(SimCommand::Play);
        if !inner.playing {
            inner.anchored_at = Instant::now();
            inner.playing = true;
        }
    }

    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        inner.commands.push(SimCommand::Pause);
        if inner.playing {
            inner.anchor_ms += inner.anchored_at.elapsed().as_millis() as u64;
            inner.playing = false;
        }
    }

    pub fn seek_ms(&self, position_ms: u64) {
        let mut inner = self.inner.lock();
        inner.commands.push(SimCommand::SeekMs(position_ms));
        inner.anchor_ms = position_ms;
        inner.anchored_at = Instant::now();
    }

    pub fn commands(&self) -> Vec<SimCommand> {
        self.inner.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.inner.lock().commands.clear();
    }
}

pub struct SimDirectBackend {
    playhead: Arc<SimPlayhead>,
}

impl SimDirectBackend {
    pub fn new(playhead: Arc<SimPlayhead>) -> Self {
        Self { playhead }
    }
}

impl DirectBackend for SimDirectBackend {
    fn play(&self) {
        self.playhead.play();
    }

    fn pause(&self) {
        self.playhead.pause();
    }

    fn seek_to_ms(&self, position_ms: u64) {
        self.playhead.seek_ms(position_ms);
    }

    fn position_ms(&self) -> u64 {
        self.playhead.position_ms()
    }

    fn is_playing(&self) -> bool {
        self.playhead.is_playing()
    }
}

pub struct SimEmbeddedBackend {
    playhead: Arc<SimPlayhead>,
}

impl SimEmbeddedBackend {
    pub fn new(playhead: Arc<SimPlayhead>) -> Self {
        Self { playhead }
    }
}

impl EmbeddedBackend for SimEmbeddedBackend {
    fn play(&self) {
        self.playhead.play();
    }

    fn pause(&self) {
        self.playhead.pause();
    }

    fn seek_to_seconds(&self, seconds: f64) {
        self.playhead.seek_ms((seconds * 1000.0) as u64);
    }
}

/// One constructed simulated player, with the handles a test needs to
/// inspect or drive it.
pub enum SimPlayer {
    Direct {
        url: String,
        playhead: Arc<SimPlayhead>,
    },
    Embedded {
        video_id: String,
        playhead: Arc<SimPlayhead>,
        events: mpsc::UnboundedSender<EmbeddedEvent>,
    },
}

impl SimPlayer {
    pub fn playhead(&self) -> &Arc<SimPlayhead> {
        match self {
            SimPlayer::Direct { playhead, .. } => playhead,
            SimPlayer::Embedded { playhead, .. } => playhead,
        }
    }
}

/// Factory producing simulated players; keeps every construction so
/// tests can reach the playheads and embed event channels afterwards.
pub struct SimPlayerFactory {
    auto_ready: bool,
    refuse_media: bool,
    created: Mutex<Vec<Arc<SimPlayer>>>,
}

impl SimPlayerFactory {
    /// Embed players announce `Ready` immediately on construction.
    pub fn new() -> Self {
        Self {
            auto_ready: true,
            refuse_media: false,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Embed players stay unready until the test pushes `Ready` itself.
    pub fn manual_ready() -> Self {
        Self {
            auto_ready: false,
            ..Self::new()
        }
    }

    /// Every construction fails, simulating unplayable media.
    pub fn failing() -> Self {
        Self {
            refuse_media: true,
            ..Self::new()
        }
    }

    pub fn created(&self) -> Vec<Arc<SimPlayer>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<SimPlayer>> {
        self.created.lock().last().cloned()
    }
}

impl Default for SimPlayerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerFactory for SimPlayerFactory {
    fn direct(&self, url: &str) -> Result<Box<dyn DirectBackend>, SyncError> {
        if self.refuse_media {
            return Err(SyncError::NoPlayableMedia(url.to_string()));
        }
        let playhead = Arc::new(SimPlayhead::paused_at(0));
        self.created.lock().push(Arc::new(SimPlayer::Direct {
            url: url.to_string(),
            playhead: Arc::clone(&playhead),
        }));
        Ok(Box::new(SimDirectBackend::new(playhead)))
    }

    fn embedded(&self, video_id: &str, start_seconds: f64) -> Result<EmbeddedHandle, SyncError> {
        if self.refuse_media {
            return Err(SyncError::NoPlayableMedia(video_id.to_string()));
        }
        let playhead = Arc::new(SimPlayhead::paused_at((start_seconds * 1000.0) as u64));
        let (tx, rx) = mpsc::unbounded_channel();
        if self.auto_ready {
            let _ = tx.send(EmbeddedEvent::Ready);
        }
        self.created.lock().push(Arc::new(SimPlayer::Embedded {
            video_id: video_id.to_string(),
            playhead: Arc::clone(&playhead),
            events: tx,
        }));
        Ok(EmbeddedHandle {
            backend: Box::new(SimEmbeddedBackend::new(playhead)),
            events: rx,
        })
    }
}
