//! Load and failure model for the simulated server.
//!
//! The model is a coarse five-bucket heuristic keyed on how many clients
//! contend for a server sized for [`SERVER_CAPACITY`] clients. All functions
//! are pure; the success draw takes its randomness from a [`RandomSource`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Number of clients the simulated server handles smoothly.
pub const SERVER_CAPACITY: u32 = 50;

pub const MIN_FAILURE_PROBABILITY: f64 = 0.05;
pub const MAX_FAILURE_PROBABILITY: f64 = 0.99;

/// Base failure rate for a `clients / capacity` ratio, before any adjustment.
pub fn base_failure_rate(load_ratio: f64) -> f64 {
    if load_ratio <= 0.5 {
        0.10
    } else if load_ratio <= 1.0 {
        0.30
    } else if load_ratio <= 2.0 {
        0.60
    } else if load_ratio <= 4.0 {
        0.80
    } else {
        0.95
    }
}

/// Failure probability for one attempt, clamped to `[0.05, 0.99]`.
///
/// `adjustment` is the recovery/overload modifier computed by the attempt
/// policy from the current server load.
pub fn failure_probability(clients: u32, capacity: u32, adjustment: f64) -> f64 {
    let ratio = clients as f64 / capacity.max(1) as f64;
    (base_failure_rate(ratio) + adjustment).clamp(MIN_FAILURE_PROBABILITY, MAX_FAILURE_PROBABILITY)
}

/// Load percentage produced by `clients` on a server of `capacity`.
/// A server at exactly its capacity reads 50%.
pub fn server_load_percent(clients: u32, capacity: u32) -> u8 {
    let load = (clients as f64 / capacity.max(1) as f64 * 50.0).floor();
    load.min(100.0) as u8
}

/// Load of the simulated server as seen by one lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerState {
    pub capacity: u32,
    pub load: u8,
}

impl ServerState {
    pub fn for_clients(clients: u32) -> Self {
        Self {
            capacity: SERVER_CAPACITY,
            load: server_load_percent(clients, SERVER_CAPACITY),
        }
    }
}

/// Draws once from `source`; the attempt succeeds iff the draw is at least
/// `failure_probability`.
pub fn attempt_succeeds(failure_probability: f64, source: &mut dyn RandomSource) -> bool {
    source.next_uniform() >= failure_probability
}

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send {
    fn next_uniform(&mut self) -> f64;
}

/// [`RandomSource`] backed by any `rand` generator.
#[derive(Debug, Clone)]
pub struct RngSource<R> {
    rng: R,
}

impl<R: Rng + Send> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngSource<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng + Send> RandomSource for RngSource<R> {
    fn next_uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Replays a fixed list of draws.
///
/// By default the list cycles; [`SequenceSource::holding`] repeats the last
/// value forever instead.
#[derive(Debug, Clone)]
pub struct SequenceSource {
    values: Vec<f64>,
    pos: usize,
    hold_last: bool,
}

impl SequenceSource {
    pub fn new(values: impl Into<Vec<f64>>) -> Self {
        let mut values = values.into();
        if values.is_empty() {
            values.push(0.0);
        }
        Self {
            values,
            pos: 0,
            hold_last: false,
        }
    }

    pub fn holding(values: impl Into<Vec<f64>>) -> Self {
        Self {
            hold_last: true,
            ..Self::new(values)
        }
    }

    /// Every draw loses against any failure probability.
    pub fn always_fail() -> Self {
        Self::new(vec![0.0])
    }

    /// Fails `failures` times, then succeeds on every later draw.
    pub fn succeed_after(failures: usize) -> Self {
        let mut values = vec![0.0; failures];
        values.push(0.999_999);
        Self::holding(values)
    }
}

impl RandomSource for SequenceSource {
    fn next_uniform(&mut self) -> f64 {
        let idx = if self.hold_last {
            self.pos.min(self.values.len() - 1)
        } else {
            self.pos % self.values.len()
        };
        self.pos += 1;
        self.values[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_rate_buckets() {
        // 25 clients → ratio 0.5, 50 → 1.0, 100 → 2.0, 200 → 4.0, 201 → >4
        assert_eq!(failure_probability(25, SERVER_CAPACITY, 0.0), 0.10);
        assert_eq!(failure_probability(26, SERVER_CAPACITY, 0.0), 0.30);
        assert_eq!(failure_probability(50, SERVER_CAPACITY, 0.0), 0.30);
        assert_eq!(failure_probability(100, SERVER_CAPACITY, 0.0), 0.60);
        assert_eq!(failure_probability(200, SERVER_CAPACITY, 0.0), 0.80);
        assert_eq!(failure_probability(201, SERVER_CAPACITY, 0.0), 0.95);
    }

    #[test]
    fn probability_clamped_for_wide_adjustments() {
        for clients in [0, 10, 40, 80, 150, 300, 10_000] {
            let mut adj = -1.0;
            while adj <= 1.0 {
                let p = failure_probability(clients, SERVER_CAPACITY, adj);
                assert!((MIN_FAILURE_PROBABILITY..=MAX_FAILURE_PROBABILITY).contains(&p));
                adj += 0.05;
            }
        }
        assert_eq!(failure_probability(10, SERVER_CAPACITY, -1.0), 0.05);
        assert_eq!(failure_probability(1000, SERVER_CAPACITY, 1.0), 0.99);
    }

    #[test]
    fn load_is_monotone_and_bounded() {
        let mut prev = 0;
        for clients in 0..=500 {
            let load = server_load_percent(clients, SERVER_CAPACITY);
            assert!(load <= 100);
            assert!(load >= prev, "load dropped at {clients} clients");
            prev = load;
        }
        assert_eq!(server_load_percent(50, SERVER_CAPACITY), 50);
        assert_eq!(server_load_percent(100, SERVER_CAPACITY), 100);
        assert_eq!(server_load_percent(u32::MAX, SERVER_CAPACITY), 100);
    }

    #[test]
    fn load_floors_fractions() {
        assert_eq!(server_load_percent(1, SERVER_CAPACITY), 1);
        assert_eq!(server_load_percent(51, SERVER_CAPACITY), 51);
        assert_eq!(server_load_percent(3, 4), 37);
    }

    #[test]
    fn success_iff_draw_at_least_probability() {
        let mut src = SequenceSource::new(vec![0.3, 0.29, 0.9]);
        assert!(attempt_succeeds(0.3, &mut src));
        assert!(!attempt_succeeds(0.3, &mut src));
        assert!(attempt_succeeds(0.3, &mut src));
    }

    #[test]
    fn succeed_after_holds_success() {
        let mut src = SequenceSource::succeed_after(2);
        assert!(!attempt_succeeds(0.5, &mut src));
        assert!(!attempt_succeeds(0.5, &mut src));
        for _ in 0..200 {
            assert!(attempt_succeeds(0.5, &mut src));
        }
    }

    #[test]
    fn seeded_source_is_reproducible_and_in_range() {
        let mut a = RngSource::seeded(7);
        let mut b = RngSource::seeded(7);
        for _ in 0..100 {
            let x = a.next_uniform();
            assert_eq!(x, b.next_uniform());
            assert!((0.0..1.0).contains(&x));
        }
    }
}
