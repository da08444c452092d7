//! Progress events streamed from a running scenario to whatever surface
//! presents it.
//!
//! A run produces three kinds of [`RunEvent`]:
//! - [`LogEntry`]: a timestamped narration line with a [`Severity`];
//! - [`RunStats`]: a stat snapshot after every attempt and status change;
//! - [`DrawInstruction`]: a logical drawing step for the visualization.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::stats::{Lane, Outcome, RunStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            at: Local::now(),
            severity,
            message: message.into(),
        }
    }

    /// `[HH:MM:SS] message`
    pub fn line(&self) -> String {
        format!("[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Logical drawing steps; a renderer decides how they look.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "draw", rename_all = "snake_case")]
pub enum DrawInstruction {
    /// Title of the scenario, or of one side of the comparison.
    Header { lane: Lane, title: String },
    LoadBar { lane: Lane, load: u8 },
    /// Sub-step of a wait animation.
    Progress { lane: Lane, index: u32, elapsed_secs: f64, wait_secs: f64 },
    Attempt { lane: Lane, index: u32, outcome: Outcome, wait_secs: f64, load: u8 },
    JitterSample { round: u32, label: char, base_secs: f64, jitter_secs: f64 },
    GraphPoint { index: u32, wait_secs: f64, max_wait_secs: f64 },
    Summary { lane: Option<Lane>, text: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Log(LogEntry),
    Stats(RunStats),
    Draw(DrawInstruction),
}

impl RunEvent {
    pub fn log(severity: Severity, message: impl Into<String>) -> Self {
        RunEvent::Log(LogEntry::new(severity, message))
    }
}

/// Destination for run events.
pub trait EventSink: Send {
    fn emit(&mut self, event: RunEvent);
}

impl EventSink for Vec<RunEvent> {
    fn emit(&mut self, event: RunEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<RunEvent> {
    fn emit(&mut self, event: RunEvent) {
        // receiver gone means nobody is watching; the run still finishes
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_line_has_clock_prefix() {
        let entry = LogEntry::new(Severity::Info, "hello");
        let line = entry.line();
        assert!(line.starts_with('['));
        assert_eq!(&line[9..], "] hello");
    }

    #[test]
    fn events_serialize_with_tags() {
        let ev = RunEvent::Draw(DrawInstruction::LoadBar {
            lane: Lane::Backoff,
            load: 85,
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "draw");
        assert_eq!(v["draw"], "load_bar");
        assert_eq!(v["lane"], "backoff");
        assert_eq!(v["load"], 85);

        let ev = RunEvent::log(Severity::Warning, "careful");
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "log");
        assert_eq!(v["severity"], "warning");
        assert_eq!(v["message"], "careful");
    }
}
