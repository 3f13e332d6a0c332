use lockstep_store::StoreError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Errors surfaced across the engine's public API.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Join target was deleted or never existed. Terminal for that
    /// attempt; the session returns to detached.
    #[error("room {0} not found")]
    RoomNotFound(String),

    /// The media reference cannot be turned into a playable backend
    /// (unloadable file, unrecognized embed id). Non-fatal: the session
    /// waits for the room's video to change.
    #[error("no playable media: {0}")]
    NoPlayableMedia(String),

    #[error("not joined to a room")]
    NotJoined,

    #[error("already joined to room {0}")]
    AlreadyJoined(String),

    #[error("only the room creator can delete it")]
    NotCreator,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Single observable error state for one client: the latest failure
/// message, implicitly cleared by the next successful operation.
/// Store/network failures never propagate across the embedding
/// application's boundary as panics or broken tasks; they land here.
#[derive(Clone, Default)]
pub struct ErrorSlot {
    inner: Arc<Mutex<Option<String>>>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, message: impl Into<String>) {
        *self.inner.lock() = Some(message.into());
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }

    pub fn current(&self) -> Option<String> {
        self.inner.lock().clone()
    }
}
