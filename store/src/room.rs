use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Which player backend a media reference needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoKind {
    /// No media selected yet.
    None,
    /// Directly addressable media file; frame-accurate control.
    Direct,
    /// Third-party embed widget; coarse polling telemetry only.
    Embedded,
}

/// The media a room is watching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRef {
    pub url: String,
    pub kind: VideoKind,
}

impl VideoRef {
    pub fn none() -> Self {
        Self {
            url: String::new(),
            kind: VideoKind::None,
        }
    }
}

/// One member's presence entry in the room roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub user_id: String,
    pub display_name: String,
    /// Wall-clock millis of the last presence heartbeat.
    pub last_seen_ms: u64,
}

impl MemberRecord {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            last_seen_ms: now_unix_millis(),
        }
    }

    /// A member whose heartbeat is older than `window` should be shown
    /// as possibly offline; the record itself may be stale (leave is
    /// best-effort).
    pub fn is_live(&self, now_ms: u64, window: Duration) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) <= window.as_millis() as u64
    }
}

/// The canonical playback-state document, one per room.
///
/// `position_ms` is a checkpoint taken when play state or position was
/// last written, not a continuously advancing clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomPlaybackState {
    pub room_id: String,
    pub video: VideoRef,
    pub is_playing: bool,
    pub position_ms: u64,
    pub creator_id: String,
    pub members: BTreeMap<String, MemberRecord>,
    pub created_at_ms: u64,
}

impl RoomPlaybackState {
    /// Fresh room with no media and the creator as sole member.
    pub fn new(room_id: impl Into<String>, creator: MemberRecord) -> Self {
        let mut members = BTreeMap::new();
        let creator_id = creator.user_id.clone();
        members.insert(creator_id.clone(), creator);
        Self {
            room_id: room_id.into(),
            video: VideoRef::none(),
            is_playing: false,
            position_ms: 0,
            creator_id,
            members,
            created_at_ms: now_unix_millis(),
        }
    }
}

/// Merge-style partial update. Two clients writing different fields do
/// not clobber each other; the same field resolves last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct RoomStateDelta {
    pub video: Option<VideoRef>,
    pub is_playing: Option<bool>,
    pub position_ms: Option<u64>,
    pub member_upsert: Option<MemberRecord>,
    pub member_remove: Option<String>,
}

impl RoomStateDelta {
    /// Playback checkpoint written by the sync engine.
    pub fn playback(is_playing: bool, position_ms: u64) -> Self {
        Self {
            is_playing: Some(is_playing),
            position_ms: Some(position_ms),
            ..Self::default()
        }
    }

    /// Media selection. Always resets the room to `{0, paused}` so every
    /// session re-initializes from the start of the new video.
    pub fn media(video: VideoRef) -> Self {
        Self {
            video: Some(video),
            is_playing: Some(false),
            position_ms: Some(0),
            ..Self::default()
        }
    }

    /// Presence upsert (join and heartbeat).
    pub fn presence(member: MemberRecord) -> Self {
        Self {
            member_upsert: Some(member),
            ..Self::default()
        }
    }

    /// Best-effort roster removal on leave.
    pub fn drop_member(user_id: impl Into<String>) -> Self {
        Self {
            member_remove: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Merge into a document in place.
    pub fn merge_into(&self, state: &mut RoomPlaybackState) {
        if let Some(video) = &self.video {
            state.video = video.clone();
        }
        if let Some(is_playing) = self.is_playing {
            state.is_playing = is_playing;
        }
        if let Some(position_ms) = self.position_ms {
            state.position_ms = position_ms;
        }
        if let Some(member) = &self.member_upsert {
            state
                .members
                .insert(member.user_id.clone(), member.clone());
        }
        if let Some(user_id) = &self.member_remove {
            state.members.remove(user_id);
        }
    }
}

/// Current wall-clock time as unix millis.
pub fn now_unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}
