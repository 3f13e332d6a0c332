use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::{RoomEvent, RoomPlaybackState, RoomStateDelta, StateStore, StoreError, Subscription};

const LOG_TAG: &str = "[lockstep store]";

struct RoomSlot {
    state: RoomPlaybackState,
    watchers: Vec<mpsc::UnboundedSender<RoomEvent>>,
}

impl RoomSlot {
    /// Fan out while the slot is locked: every subscriber sees writes to
    /// this room in commit order, and the writer's own subscription is
    /// notified like any other.
    fn notify(&mut self, event: RoomEvent) {
        self.watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// In-process [`StateStore`] backed by a concurrent room map.
///
/// Serves as the test double for the engine and as the hub when all
/// sessions live in one process.
#[derive(Default)]
pub struct MemoryStore {
    rooms: DashMap<String, RoomSlot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, room_id: &str) -> Result<Option<RoomPlaybackState>, StoreError> {
        Ok(self.rooms.get(room_id).map(|slot| slot.state.clone()))
    }

    async fn insert(&self, state: RoomPlaybackState) -> Result<(), StoreError> {
        let room_id = state.room_id.clone();
        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::RoomExists(room_id)),
            Entry::Vacant(entry) => {
                entry.insert(RoomSlot {
                    state,
                    watchers: Vec::new(),
                });
                tracing::info!("{LOG_TAG} room {} created", room_id);
                Ok(())
            }
        }
    }

    async fn apply(&self, room_id: &str, delta: RoomStateDelta) -> Result<(), StoreError> {
        let mut slot = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::RoomNotFound(room_id.to_string()))?;
        delta.merge_into(&mut slot.state);
        let snapshot = slot.state.clone();
        slot.notify(RoomEvent::Updated(snapshot));
        Ok(())
    }

    async fn subscribe(&self, room_id: &str) -> Result<Subscription, StoreError> {
        let mut slot = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::RoomNotFound(room_id.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        // First event is the current document, so a fresh subscriber
        // never has to race a separate read against incoming writes.
        let _ = tx.send(RoomEvent::Updated(slot.state.clone()));
        slot.watchers.push(tx);
        Ok(Subscription::new(rx))
    }

    async fn remove(&self, room_id: &str) -> Result<(), StoreError> {
        let (_, mut slot) = self
            .rooms
            .remove(room_id)
            .ok_or_else(|| StoreError::RoomNotFound(room_id.to_string()))?;
        slot.notify(RoomEvent::Removed);
        tracing::info!("{LOG_TAG} room {} deleted", room_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemberRecord, VideoKind, VideoRef};

    async fn seed(store: &MemoryStore, room_id: &str) -> RoomPlaybackState {
        let state = RoomPlaybackState::new(room_id, MemberRecord::new("u1", "Ada"));
        store.insert(state.clone()).await.unwrap();
        state
    }

    #[tokio::test]
    async fn subscribe_delivers_snapshot_then_commit_order() {
        let store = MemoryStore::new();
        seed(&store, "r1").await;

        let mut sub = store.subscribe("r1").await.unwrap();
        match sub.try_recv() {
            Some(RoomEvent::Updated(state)) => assert_eq!(state.position_ms, 0),
            other => panic!("expected initial snapshot, got {other:?}"),
        }

        store
            .apply("r1", RoomStateDelta::playback(true, 1_000))
            .await
            .unwrap();
        store
            .apply("r1", RoomStateDelta::playback(true, 2_000))
            .await
            .unwrap();

        let positions: Vec<u64> = std::iter::from_fn(|| sub.try_recv())
            .map(|ev| match ev {
                RoomEvent::Updated(state) => state.position_ms,
                RoomEvent::Removed => panic!("unexpected removal"),
            })
            .collect();
        assert_eq!(positions, vec![1_000, 2_000]);
    }

    #[tokio::test]
    async fn writer_receives_its_own_write() {
        let store = MemoryStore::new();
        seed(&store, "r1").await;
        let mut sub = store.subscribe("r1").await.unwrap();
        sub.try_recv(); // snapshot

        store
            .apply("r1", RoomStateDelta::playback(false, 500))
            .await
            .unwrap();
        assert!(matches!(sub.try_recv(), Some(RoomEvent::Updated(_))));
    }

    #[tokio::test]
    async fn remove_notifies_and_forgets() {
        let store = MemoryStore::new();
        seed(&store, "r1").await;
        let mut sub = store.subscribe("r1").await.unwrap();
        sub.try_recv();

        store.remove("r1").await.unwrap();
        assert!(matches!(sub.try_recv(), Some(RoomEvent::Removed)));
        assert!(store.get("r1").await.unwrap().is_none());
        assert!(matches!(
            store.apply("r1", RoomStateDelta::playback(true, 0)).await,
            Err(StoreError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = MemoryStore::new();
        let state = seed(&store, "r1").await;
        assert!(matches!(
            store.insert(state).await,
            Err(StoreError::RoomExists(_))
        ));
    }

    #[tokio::test]
    async fn apply_merges_media_selection() {
        let store = MemoryStore::new();
        seed(&store, "r1").await;
        store
            .apply("r1", RoomStateDelta::playback(true, 30_000))
            .await
            .unwrap();

        let video = VideoRef {
            url: "https://cdn.example/movie.mp4".into(),
            kind: VideoKind::Direct,
        };
        store
            .apply("r1", RoomStateDelta::media(video.clone()))
            .await
            .unwrap();

        let state = store.get("r1").await.unwrap().unwrap();
        assert_eq!(state.video, video);
        assert!(!state.is_playing);
        assert_eq!(state.position_ms, 0);
        assert_eq!(state.members.len(), 1, "roster survives media change");
    }
}
