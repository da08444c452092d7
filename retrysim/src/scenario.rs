use clap::ValueEnum;
use serde::Serialize;

use crate::config::SimulationConfig;
use crate::policy::AttemptPolicy;
use crate::stats::Lane;

/// Jitter runs plot at most this many sample clients per round.
pub const JITTER_SAMPLE_LABELS: [char; 4] = ['A', 'B', 'C', 'D'];

/// Jitter runs are capped at this many rounds.
pub const JITTER_MAX_ROUNDS: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// No back-off and back-off side by side
    Comparison,
    /// Immediate retries only
    #[value(alias = "no_backoff")]
    NoBackoff,
    /// Exponential back-off only
    #[value(alias = "with_backoff")]
    WithBackoff,
    /// Exponential back-off with per-client jitter
    #[value(alias = "with_jitter")]
    WithJitter,
    /// Plot of the exponential wait curve
    Graph,
}

/// How a lane animates its wait before the outcome is known.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WaitAnimation {
    /// No visible wait.
    None,
    /// `steps` progress ticks, each `min(wait / steps, cap)` seconds.
    Steps { steps: u32, cap_secs: f64 },
    /// One pause of `min(wait × factor, cap)` seconds.
    Scaled { factor: f64, cap_secs: f64 },
}

impl WaitAnimation {
    pub fn total_secs(&self, wait_secs: f64) -> f64 {
        match *self {
            WaitAnimation::None => 0.0,
            WaitAnimation::Steps { steps, cap_secs } => (wait_secs / steps as f64).min(cap_secs) * steps as f64,
            WaitAnimation::Scaled { factor, cap_secs } => (wait_secs * factor).min(cap_secs),
        }
    }
}

/// One row of a scenario.
#[derive(Clone, Debug, PartialEq)]
pub struct LanePlan {
    pub lane: Lane,
    pub policy: AttemptPolicy,
    pub animation: WaitAnimation,
    /// `false` for a client that retries without waiting at all; its attempts
    /// record zero wait.
    pub records_wait: bool,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Comparison,
        Scenario::NoBackoff,
        Scenario::WithBackoff,
        Scenario::WithJitter,
        Scenario::Graph,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Scenario::Comparison => "comparison",
            Scenario::NoBackoff => "no_backoff",
            Scenario::WithBackoff => "with_backoff",
            Scenario::WithJitter => "with_jitter",
            Scenario::Graph => "graph",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Scenario::Comparison => "Side-by-Side Comparison",
            Scenario::NoBackoff => "Without Backoff",
            Scenario::WithBackoff => "With Backoff",
            Scenario::WithJitter => "With Jitter",
            Scenario::Graph => "Exponential Graph",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::Comparison => "immediate retries overload the server while backed-off retries let it recover",
            Scenario::NoBackoff => "every failure is retried at once and the server load keeps climbing",
            Scenario::WithBackoff => "wait = base x 2^attempt; the server sheds load between attempts",
            Scenario::WithJitter => "random delay on top of the back-off spreads retries of many clients apart",
            Scenario::Graph => "wait time doubles with each attempt",
        }
    }

    /// Lanes driven every round, in drawing order.
    pub fn lanes(&self, config: &SimulationConfig) -> Vec<LanePlan> {
        let single_steps = WaitAnimation::Steps {
            steps: 20,
            cap_secs: 0.15,
        };
        match self {
            Scenario::Comparison => vec![
                LanePlan {
                    lane: Lane::NoBackoff,
                    policy: AttemptPolicy::NoBackoff,
                    animation: WaitAnimation::None,
                    records_wait: false,
                },
                LanePlan {
                    lane: Lane::Backoff,
                    policy: AttemptPolicy::Backoff,
                    animation: WaitAnimation::Scaled {
                        factor: 0.4,
                        cap_secs: 2.0,
                    },
                    records_wait: true,
                },
            ],
            Scenario::NoBackoff => vec![LanePlan {
                lane: Lane::Single,
                policy: AttemptPolicy::NoBackoff,
                animation: single_steps,
                records_wait: true,
            }],
            Scenario::WithBackoff => vec![LanePlan {
                lane: Lane::Single,
                policy: AttemptPolicy::Backoff,
                animation: single_steps,
                records_wait: true,
            }],
            Scenario::WithJitter => {
                let shown = config.clients.min(JITTER_SAMPLE_LABELS.len() as u32) as usize;
                JITTER_SAMPLE_LABELS[..shown]
                    .iter()
                    .map(|label| LanePlan {
                        lane: Lane::Sample(*label),
                        policy: AttemptPolicy::Jitter,
                        animation: WaitAnimation::None,
                        records_wait: true,
                    })
                    .collect()
            }
            Scenario::Graph => vec![LanePlan {
                lane: Lane::Single,
                policy: AttemptPolicy::GraphOnly,
                animation: WaitAnimation::None,
                records_wait: true,
            }],
        }
    }

    pub fn rounds(&self, config: &SimulationConfig) -> u32 {
        match self {
            Scenario::WithJitter => config.max_attempts.min(JITTER_MAX_ROUNDS),
            _ => config.max_attempts,
        }
    }

    /// Pause after each round, before the next one starts.
    pub fn between_rounds_secs(&self) -> f64 {
        match self {
            Scenario::Comparison => 0.5,
            Scenario::NoBackoff | Scenario::WithBackoff => 0.4,
            Scenario::WithJitter => 1.5,
            Scenario::Graph => 1.0,
        }
    }

    /// Lane whose first success ends the run, if the scenario models outcomes.
    pub fn deciding_lane(&self) -> Option<Lane> {
        match self {
            Scenario::Comparison => Some(Lane::Backoff),
            Scenario::NoBackoff | Scenario::WithBackoff => Some(Lane::Single),
            Scenario::WithJitter | Scenario::Graph => None,
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}
