use serde::Serialize;
use std::fmt;

/// Lifecycle of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Ready,
    Running,
    Stopped,
    Completed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Ready => "Ready",
            RunStatus::Running => "Running...",
            RunStatus::Stopped => "Stopped",
            RunStatus::Completed => "Completed",
        };
        f.write_str(s)
    }
}

/// Which row of the visualization an attempt belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Single,
    NoBackoff,
    Backoff,
    Sample(char),
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Single => f.write_str("single"),
            Lane::NoBackoff => f.write_str("no backoff"),
            Lane::Backoff => f.write_str("backoff"),
            Lane::Sample(label) => write!(f, "sample {label}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    /// Jitter and graph runs only plot waits.
    Unmodeled,
}

impl Outcome {
    pub fn from_success(succeeded: bool) -> Self {
        if succeeded {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "SUCCESS",
            Outcome::Failed => "FAILED",
            Outcome::Unmodeled => "-",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttemptResult {
    pub index: u32,
    pub lane: Lane,
    pub wait_secs: f64,
    pub outcome: Outcome,
    pub load_after: u8,
}

impl AttemptResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Default)]
pub struct RunStats {
    pub clients: u32,
    pub total_requests: u32,
    pub total_failures: u32,
    pub total_wait_secs: f64,
    pub final_load: u8,
    pub status: RunStatus,
}

impl RunStats {
    /// Recomputes the counters from the attempt history.
    ///
    /// `final_load` is the load after the last recorded attempt, or
    /// `initial_load` if nothing was attempted yet.
    pub fn from_history(
        history: &[AttemptResult],
        clients: u32,
        initial_load: u8,
        status: RunStatus,
    ) -> Self {
        Self {
            clients,
            total_requests: history.len() as u32,
            total_failures: history.iter().filter(|a| a.outcome == Outcome::Failed).count() as u32,
            total_wait_secs: history.iter().map(|a| a.wait_secs).sum(),
            final_load: history.last().map(|a| a.load_after).unwrap_or(initial_load),
            status,
        }
    }
}
