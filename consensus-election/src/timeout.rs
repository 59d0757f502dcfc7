//! Round supervision.
//!
//! A round arms the timer when this node casts its vote and disarms it once
//! the ready quorum is reached. If neither happens within the configured
//! bound the engine abandons the round instead of waiting forever.

use std::time::{Duration, Instant};

/// Tracks the deadline of the round in flight, if any.
#[derive(Debug)]
pub struct RoundTimer {
    duration: Duration,
    /// When the current round started (if any).
    started_at: Option<Instant>,
    /// Sequence number of the armed round.
    active_round: Option<u64>,
}

impl RoundTimer {
    pub fn new(round_timeout_ms: u64) -> Self {
        Self {
            duration: Duration::from_millis(round_timeout_ms),
            started_at: None,
            active_round: None,
        }
    }

    /// Arm the timer for `round`, replacing any previous deadline.
    pub fn start(&mut self, round: u64) {
        self.started_at = Some(Instant::now());
        self.active_round = Some(round);
    }

    pub fn cancel(&mut self) {
        self.started_at = None;
        self.active_round = None;
    }

    /// Returns the armed round if its deadline has passed.
    pub fn check_expired(&self) -> Option<u64> {
        let started_at = self.started_at?;
        let round = self.active_round?;
        if started_at.elapsed() >= self.duration {
            Some(round)
        } else {
            None
        }
    }
}
