//! Attempt policies.
//!
//! An [`AttemptPolicy`] decides three things for each attempt of a lane:
//! - how long the client waits before the attempt;
//! - how the simulated server load moves as a consequence;
//! - which adjustment is fed to [`failure_probability`](crate::model::failure_probability).
//!
//! The exponential wait for attempt `i` is `base × 2^i`. Jitter is drawn on
//! top of that base and never feeds back into later attempts.

use serde::Serialize;

use crate::model::RandomSource;

/// Nominal wait of a client that retries immediately.
pub const NO_BACKOFF_WAIT_SECS: f64 = 0.1;

/// Upper bound of the jitter draw as a fraction of the base wait.
pub const JITTER_RATIO: f64 = 0.5;

/// Floor the server load recovers to while clients back off.
pub const RECOVERED_LOAD_FLOOR: u8 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPolicy {
    /// Retry right away; every retry piles more load on the server.
    NoBackoff,
    /// Double the wait after every failure; the server sheds load meanwhile.
    Backoff,
    /// Exponential wait plus a random spread per client. Outcome not modeled.
    Jitter,
    /// Exponential wait only, plotted as a curve. Outcome not modeled.
    GraphOnly,
}

impl AttemptPolicy {
    /// Wait before attempt `index` (0-based), without jitter.
    pub fn wait_secs(&self, base_wait_secs: f64, index: u32) -> f64 {
        match self {
            AttemptPolicy::NoBackoff => NO_BACKOFF_WAIT_SECS,
            AttemptPolicy::Backoff | AttemptPolicy::Jitter | AttemptPolicy::GraphOnly => {
                exponential_wait(base_wait_secs, index)
            }
        }
    }

    /// Server load after one attempt under this policy.
    pub fn next_load(&self, load: u8) -> u8 {
        match self {
            AttemptPolicy::NoBackoff => load.saturating_add(10).min(100),
            AttemptPolicy::Backoff => load.saturating_sub(15).max(RECOVERED_LOAD_FLOOR),
            AttemptPolicy::Jitter | AttemptPolicy::GraphOnly => load,
        }
    }

    /// Adjustment to the base failure rate at the given load, or `None` when
    /// the policy does not model success and failure.
    pub fn failure_adjustment(&self, load: u8) -> Option<f64> {
        match self {
            AttemptPolicy::NoBackoff => Some((load as f64 - 50.0) * 0.01),
            AttemptPolicy::Backoff => Some((load as f64 - 80.0) * 0.01),
            AttemptPolicy::Jitter | AttemptPolicy::GraphOnly => None,
        }
    }

    pub fn models_outcome(&self) -> bool {
        matches!(self, AttemptPolicy::NoBackoff | AttemptPolicy::Backoff)
    }
}

/// `base × 2^index`.
pub fn exponential_wait(base_wait_secs: f64, index: u32) -> f64 {
    base_wait_secs * 2f64.powi(index.min(i32::MAX as u32) as i32)
}

/// One jittered wait: the exponential base plus a draw in `[0, base × 0.5)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct JitteredWait {
    pub base_secs: f64,
    pub jitter_secs: f64,
}

impl JitteredWait {
    pub fn draw(base_wait_secs: f64, round: u32, source: &mut dyn RandomSource) -> Self {
        let base_secs = exponential_wait(base_wait_secs, round);
        let jitter_secs = source.next_uniform() * base_secs * JITTER_RATIO;
        Self {
            base_secs,
            jitter_secs,
        }
    }

    pub fn total_secs(&self) -> f64 {
        self.base_secs + self.jitter_secs
    }
}
