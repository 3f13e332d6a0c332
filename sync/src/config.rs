use std::time::Duration;

/// Tuning knobs for the sync engine.
///
/// The defaults are sensible for ~1 s network jitter; all of them are
/// product-tuning decisions rather than correctness requirements, which
/// is why none of them are hard constants.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Minimum gap between two accepted playback publishes. Rate limiter
    /// only: position telemetry fires often and must not flood the store.
    pub min_publish_interval: Duration,
    /// Position delta below which a candidate publish carries no
    /// meaningful change.
    pub min_position_delta_ms: u64,
    /// How long local events stay suppressed after applying a remote
    /// correction; must absorb the player's own echo of that correction.
    pub correction_window: Duration,
    /// Drift tolerated from a frame-accurate player before seeking.
    pub direct_drift_threshold_ms: u64,
    /// Drift tolerated from an embed player. Wider than the direct band:
    /// with ~1 Hz telemetry, a small threshold seek-thrashes on
    /// measurement noise.
    pub embedded_drift_threshold_ms: u64,
    /// Telemetry sampling period for frame-accurate players (embed
    /// players push their own ticks instead).
    pub direct_poll_interval: Duration,
    /// Presence heartbeat period.
    pub heartbeat_interval: Duration,
    /// Members with a heartbeat older than this read as possibly offline.
    pub liveness_window: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_publish_interval: Duration::from_millis(1000),
            min_position_delta_ms: 1000,
            correction_window: Duration::from_millis(800),
            direct_drift_threshold_ms: 2000,
            embedded_drift_threshold_ms: 4000,
            direct_poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(3),
            liveness_window: Duration::from_secs(5),
        }
    }
}
