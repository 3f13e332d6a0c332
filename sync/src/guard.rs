use std::time::Duration;
use tokio::time::Instant;

/// The state this client last wrote to the store, with the instant the
/// publish was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedState {
    pub is_playing: bool,
    pub position_ms: u64,
    pub at: Instant,
}

/// Gate for every intended publish of local playback state.
///
/// This is the single source of truth for "did I just cause this": the
/// controller routes all local-origin publishes through it and nothing
/// else writes playback state on this client's behalf.
#[derive(Debug)]
pub struct PublishGuard {
    min_interval: Duration,
    min_position_delta_ms: u64,
    last: Option<PublishedState>,
}

impl PublishGuard {
    pub fn new(min_interval: Duration, min_position_delta_ms: u64) -> Self {
        Self {
            min_interval,
            min_position_delta_ms,
            last: None,
        }
    }

    /// Accept or reject a candidate publish. Rejected when the candidate
    /// carries no meaningful change over the last accepted publish, or
    /// when the last accepted publish is too recent. Acceptance records
    /// the candidate as `last_published`.
    pub fn try_publish(&mut self, is_playing: bool, position_ms: u64, now: Instant) -> bool {
        if let Some(last) = self.last {
            let delta = last.position_ms.abs_diff(position_ms);
            if last.is_playing == is_playing && delta < self.min_position_delta_ms {
                tracing::trace!("publish skipped: no meaningful change");
                return false;
            }
            if now.duration_since(last.at) < self.min_interval {
                tracing::trace!("publish skipped: inside minimum interval");
                return false;
            }
        }
        self.last = Some(PublishedState {
            is_playing,
            position_ms,
            at: now,
        });
        true
    }

    pub fn last_published(&self) -> Option<PublishedState> {
        self.last
    }

    /// Forget publish history (join, leave, media change).
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> PublishGuard {
        PublishGuard::new(Duration::from_millis(1000), 1000)
    }

    #[test]
    fn first_publish_always_accepted() {
        let mut g = guard();
        assert!(g.try_publish(true, 0, Instant::now()));
    }

    #[test]
    fn duplicate_within_interval_accepted_once() {
        let mut g = guard();
        let t0 = Instant::now();
        assert!(g.try_publish(true, 5_000, t0));
        assert!(!g.try_publish(true, 5_000, t0 + Duration::from_millis(200)));
        assert!(!g.try_publish(true, 5_000, t0 + Duration::from_millis(900)));
    }

    #[test]
    fn small_position_drift_is_not_meaningful() {
        let mut g = guard();
        let t0 = Instant::now();
        assert!(g.try_publish(true, 5_000, t0));
        // Same play state, under 1 s of movement: rejected even long
        // after the rate-limit interval.
        assert!(!g.try_publish(true, 5_999, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn play_state_flip_is_meaningful_but_rate_limited() {
        let mut g = guard();
        let t0 = Instant::now();
        assert!(g.try_publish(true, 5_000, t0));
        assert!(!g.try_publish(false, 5_000, t0 + Duration::from_millis(300)));
        assert!(g.try_publish(false, 5_000, t0 + Duration::from_millis(1001)));
    }

    #[test]
    fn seek_past_delta_band_accepted_after_interval() {
        let mut g = guard();
        let t0 = Instant::now();
        assert!(g.try_publish(true, 5_000, t0));
        let t1 = t0 + Duration::from_millis(1500);
        assert!(g.try_publish(true, 65_000, t1));
        assert_eq!(g.last_published().unwrap().position_ms, 65_000);
    }

    #[test]
    fn reset_forgets_history() {
        let mut g = guard();
        let t0 = Instant::now();
        assert!(g.try_publish(true, 5_000, t0));
        g.reset();
        assert!(g.try_publish(true, 5_000, t0 + Duration::from_millis(1)));
    }
}
