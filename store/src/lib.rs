//! Shared room-state document store.
//!
//! One document per room holds the canonical playback state (video
//! reference, play/pause flag, playhead checkpoint, member roster).
//! Consumers mutate it with merge-style partial updates and observe it
//! through per-room change subscriptions. Conflict policy is
//! last-write-wins per field; there is no transaction or CAS layer.

mod memory;
mod room;

pub use memory::MemoryStore;
pub use room::{
    now_unix_millis, MemberRecord, RoomPlaybackState, RoomStateDelta, VideoKind, VideoRef,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A change notification for one room.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// The document was created or mutated; carries the full post-write state.
    Updated(RoomPlaybackState),
    /// The document was deleted. No further events follow.
    Removed,
}

/// Errors surfaced by a [`StateStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("room {0} already exists")]
    RoomExists(String),

    /// Backend failure (network blip, closed connection). Callers treat
    /// these as transient: periodic writers retry on their next cycle.
    #[error("store backend: {0}")]
    Backend(String),
}

/// Owned handle to a room's change stream. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<RoomEvent>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<RoomEvent>) -> Self {
        Self { rx }
    }

    /// Next event, in commit order. `None` once the stream has ended
    /// (the room was removed and the `Removed` event already consumed,
    /// or the backend shut down).
    pub async fn recv(&mut self) -> Option<RoomEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<RoomEvent> {
        self.rx.try_recv().ok()
    }
}

/// Contract for the shared document store.
///
/// Delivery guarantees required of implementations: every committed
/// write reaches every live subscriber of that room at least once, in
/// commit order, *including the writer itself*; self-delivery is part
/// of the contract, since the engine's suppression logic depends on
/// seeing its own writes echo back. A fresh subscription delivers the
/// current document as its first `Updated` event.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Point read. `Ok(None)` when the room does not exist.
    async fn get(&self, room_id: &str) -> Result<Option<RoomPlaybackState>, StoreError>;

    /// Create a new room document.
    async fn insert(&self, state: RoomPlaybackState) -> Result<(), StoreError>;

    /// Merge a partial update into the document. Fields absent from the
    /// delta are left untouched.
    async fn apply(&self, room_id: &str, delta: RoomStateDelta) -> Result<(), StoreError>;

    /// Open a change stream for one room.
    async fn subscribe(&self, room_id: &str) -> Result<Subscription, StoreError>;

    /// Delete the room document. Subscribers receive [`RoomEvent::Removed`].
    async fn remove(&self, room_id: &str) -> Result<(), StoreError>;
}
