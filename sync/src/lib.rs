//! Playback synchronization engine for shared watch-together rooms.
//!
//! One canonical room document (see `lockstep-store`) holds play state
//! and a playhead checkpoint; every participant's local player is kept
//! converged to it despite independent clocks, network delay, and two
//! very different player backends. The hard part is loop avoidance:
//! naively republishing local player events after a remote correction
//! oscillates, so all corrections open a suppression window and every
//! local-origin publish passes a debounce guard.
//!
//! The embedding application implements [`adapter::PlayerFactory`] for
//! its real players, constructs one [`SessionManager`] per client, and
//! drives it with `join` / `leave` / `select_media` /
//! `report_playback_change`.

pub mod adapter;
pub mod config;
pub mod controller;
pub mod error;
pub mod guard;
pub mod media;
pub mod session;
pub mod sim;

pub use config::SyncConfig;
pub use error::{ErrorSlot, SyncError};
pub use session::{Identity, SessionManager};
