//! Remaining-call budget and pause decisions

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Rate information reported alongside one gateway response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    /// Calls left in the current window
    pub remaining: u32,

    /// When the window resets, if the gateway said so
    pub reset_at: Option<DateTime<Utc>>,
}

/// Tunables for pause decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    /// Pause once `remaining` drops to or below this value
    pub floor: u32,

    /// Added on top of the wait until reset
    pub safety_margin: Duration,

    /// Wait used when the budget is unknown
    pub fallback_delay: Duration,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            floor: 10,
            safety_margin: Duration::from_secs(10),
            fallback_delay: Duration::from_secs(1),
        }
    }
}

/// Tracks the gateway's call allowance between requests
///
/// Never persisted; the first live response after a restart refreshes it.
#[derive(Debug, Clone)]
pub struct RateBudget {
    policy: RatePolicy,
    remaining: Option<u32>,
    reset_at: Option<DateTime<Utc>>,
}

impl RateBudget {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            remaining: None,
            reset_at: None,
        }
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// Refreshes the budget from the latest response
    ///
    /// A response without rate data leaves the budget unknown, so the next
    /// call falls back to the fixed delay.
    pub fn update(&mut self, snapshot: Option<&RateSnapshot>) {
        match snapshot {
            Some(snapshot) => {
                self.remaining = Some(snapshot.remaining);
                if snapshot.reset_at.is_some() {
                    self.reset_at = snapshot.reset_at;
                }
            }
            None => {
                self.remaining = None;
            }
        }
    }

    /// Records that the gateway refused a call for lack of budget
    pub fn mark_exhausted(&mut self) {
        self.remaining = Some(0);
    }

    /// How long to wait before the next call
    pub fn should_pause(&self) -> Duration {
        self.should_pause_at(Utc::now())
    }

    /// How long to wait before a call issued at `now`
    pub fn should_pause_at(&self, now: DateTime<Utc>) -> Duration {
        match self.remaining {
            Some(remaining) if remaining > self.policy.floor => Duration::ZERO,
            Some(_) => match self.reset_at {
                Some(reset_at) => {
                    let until_reset = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
                    until_reset + self.policy.safety_margin
                }
                None => self.policy.fallback_delay,
            },
            None => self.policy.fallback_delay,
        }
    }
}
