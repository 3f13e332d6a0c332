//! Two simulated clients watching one room in lock-step.
//!
//! Runs the whole flow against an in-process store: Alice creates a
//! room and picks a video, Bob joins, Alice presses play, and Bob's
//! player converges without ever echoing corrections back.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use lockstep_store::{MemoryStore, StateStore};
use lockstep_sync::sim::SimPlayerFactory;
use lockstep_sync::{Identity, SessionManager, SyncConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lockstep_sync=debug,info".into()),
        )
        .init();

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());

    let alice_factory = Arc::new(SimPlayerFactory::new());
    let alice = SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&alice_factory) as _,
        Identity {
            user_id: "u-alice".into(),
            display_name: "Alice".into(),
        },
        SyncConfig::default(),
    );

    let bob_factory = Arc::new(SimPlayerFactory::new());
    let bob = SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&bob_factory) as _,
        Identity {
            user_id: "u-bob".into(),
            display_name: "Bob".into(),
        },
        SyncConfig::default(),
    );

    let room = alice.create_room().await?;
    tracing::info!("Alice created room {room}");
    alice.join(&room).await?;
    bob.join(&room).await?;

    alice.select_media("https://cdn.example/movie.mp4");
    tokio::time::sleep(Duration::from_millis(1200)).await;

    // Alice presses play in her UI: her player starts, then the action
    // is reported to the engine, which publishes it for everyone else.
    if let Some(player) = alice_factory.last() {
        player.playhead().play();
    }
    alice.report_playback_change(true, 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    if let Some(player) = bob_factory.last() {
        tracing::info!(
            "Bob's player: playing={} position={}ms",
            player.playhead().is_playing(),
            player.playhead().position_ms()
        );
    }
    if let Some(state) = store.get(&room).await? {
        let now_ms = lockstep_store::now_unix_millis();
        let live = state
            .members
            .values()
            .filter(|member| member.is_live(now_ms, SyncConfig::default().liveness_window))
            .count();
        tracing::info!(
            "room document: playing={} position={}ms, {live}/{} member(s) live",
            state.is_playing,
            state.position_ms,
            state.members.len()
        );
    }

    bob.leave().await?;
    alice.leave().await?;
    alice.delete_room(&room).await?;
    tracing::info!("room {room} deleted");
    Ok(())
}
