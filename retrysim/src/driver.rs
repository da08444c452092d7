//! # Scenario driver
//!
//! Runs one [`Scenario`] to completion or cancellation, streaming
//! [`RunEvent`]s into an [`EventSink`].
//!
//! Every scenario goes through the same loop; the scenario only supplies its
//! lanes (one [`AttemptPolicy`] each), the number of rounds and the pacing:
//!
//! ```text
//! preamble
//! for round in 0..rounds {
//!   ├─► checkpoint (cancelled? → Stopped)
//!   ├─► for each lane still trying:
//!   │     ├─► wait  = policy wait (+ jitter)
//!   │     ├─► load  = policy.next_load(load)
//!   │     ├─► animate wait (sub-steps, each a checkpoint)
//!   │     ├─► outcome = draw vs failure_probability(clients, adjustment)
//!   │     └─► record AttemptResult, narrate, stats snapshot
//!   ├─► deciding lane succeeded? → break
//!   └─► pause between rounds (checkpoint)
//! }
//! summary → Completed
//! ```
//!
//! Cancellation is cooperative: the [`CancellationToken`] is polled at every
//! attempt boundary and raced against every pause.

use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{SimulationConfig, Speed};
use crate::error::InputError;
use crate::event::{DrawInstruction, EventSink, RunEvent, Severity};
use crate::model::{attempt_succeeds, failure_probability, RandomSource, ServerState, SERVER_CAPACITY};
use crate::policy::{exponential_wait, AttemptPolicy, JitteredWait};
use crate::scenario::{LanePlan, Scenario, WaitAnimation};
use crate::stats::{AttemptResult, Lane, Outcome, RunStats, RunStatus};

/// Marker returned when a run observes cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Turns the logical pauses of a run into real sleeps.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    multiplier: f64,
    instant: bool,
}

impl Pacer {
    pub fn new(speed: Speed) -> Self {
        Self {
            multiplier: speed.multiplier(),
            instant: false,
        }
    }

    /// Skips every sleep but still observes cancellation.
    pub fn instant() -> Self {
        Self {
            multiplier: 0.0,
            instant: true,
        }
    }

    pub async fn pause(&self, secs: f64, token: &CancellationToken) -> Result<(), Cancelled> {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        if self.instant || secs.is_nan() || secs <= 0.0 {
            return Ok(());
        }
        let delay = Duration::from_secs_f64(secs * self.multiplier);
        tokio::select! {
            _ = token.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Everything one run reads and accumulates.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub scenario: Scenario,
    pub config: SimulationConfig,
    pub input_error: Option<InputError>,
    pub initial: ServerState,
    pub history: Vec<AttemptResult>,
    pub status: RunStatus,
}

impl RunContext {
    pub fn new(scenario: Scenario, config: SimulationConfig) -> Self {
        Self {
            scenario,
            config,
            input_error: None,
            initial: ServerState::for_clients(config.clients),
            history: Vec::new(),
            status: RunStatus::Ready,
        }
    }

    /// Input problem found while building `config`; reported when the run starts.
    pub fn with_input_error(mut self, err: Option<InputError>) -> Self {
        self.input_error = err;
        self
    }

    pub fn stats(&self) -> RunStats {
        RunStats::from_history(&self.history, self.config.clients, self.initial.load, self.status)
    }
}

/// Final state of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario: Scenario,
    pub config: SimulationConfig,
    pub stats: RunStats,
    pub attempts: Vec<AttemptResult>,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        self.stats.status
    }

    pub fn waits(&self, lane: &Lane) -> Vec<f64> {
        self.attempts
            .iter()
            .filter(|a| &a.lane == lane)
            .map(|a| a.wait_secs)
            .collect()
    }
}

impl From<RunContext> for RunReport {
    fn from(ctx: RunContext) -> Self {
        Self {
            scenario: ctx.scenario,
            config: ctx.config,
            stats: ctx.stats(),
            attempts: ctx.history,
        }
    }
}

struct LaneRun {
    plan: LanePlan,
    server: ServerState,
    succeeded: bool,
}

pub struct Driver<'a> {
    ctx: RunContext,
    source: &'a mut dyn RandomSource,
    sink: &'a mut dyn EventSink,
    pacer: Pacer,
    token: CancellationToken,
}

impl<'a> Driver<'a> {
    pub fn new(
        ctx: RunContext,
        source: &'a mut dyn RandomSource,
        sink: &'a mut dyn EventSink,
        pacer: Pacer,
        token: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            source,
            sink,
            pacer,
            token,
        }
    }

    pub async fn run(mut self) -> RunReport {
        self.ctx.status = RunStatus::Running;
        self.log(Severity::Info, format!("Starting demo: {}", self.ctx.scenario.id()));
        if let Some(err) = self.ctx.input_error.clone() {
            warn!(field = err.field(), %err, "invalid parameters, using defaults");
            self.log(Severity::Error, "Invalid parameters! Using defaults.");
        }
        self.emit_stats();

        match self.drive().await {
            Ok(lanes) => {
                self.summarize(&lanes);
                self.ctx.status = RunStatus::Completed;
                self.log(Severity::Success, "Demo completed!");
            }
            Err(Cancelled) => {
                self.ctx.status = RunStatus::Stopped;
                self.log(Severity::Warning, "Demo stopped by user");
            }
        }
        self.emit_stats();

        info!(
            scenario = %self.ctx.scenario,
            status = ?self.ctx.status,
            attempts = self.ctx.history.len(),
            "run finished"
        );
        RunReport::from(self.ctx)
    }

    async fn drive(&mut self) -> Result<Vec<LaneRun>, Cancelled> {
        let scenario = self.ctx.scenario;
        let config = self.ctx.config;
        let mut lanes: Vec<LaneRun> = scenario
            .lanes(&config)
            .into_iter()
            .map(|plan| LaneRun {
                plan,
                server: self.ctx.initial,
                succeeded: false,
            })
            .collect();
        self.preamble();

        let rounds = scenario.rounds(&config);
        let deciding = scenario.deciding_lane();
        for index in 0..rounds {
            self.checkpoint()?;
            // every lane keeps trying until the deciding lane succeeds
            for lane in lanes.iter_mut() {
                self.step(lane, index).await?;
            }

            let decided = deciding
                .as_ref()
                .map_or(false, |d| lanes.iter().any(|l| &l.plan.lane == d && l.succeeded));
            if decided {
                debug!(index, "deciding lane succeeded");
                break;
            }
            if index + 1 < rounds {
                self.pacer.pause(scenario.between_rounds_secs(), &self.token).await?;
            }
        }
        Ok(lanes)
    }

    async fn step(&mut self, lane: &mut LaneRun, index: u32) -> Result<(), Cancelled> {
        self.checkpoint()?;
        let config = self.ctx.config;
        let policy = lane.plan.policy;

        let jitter = match policy {
            AttemptPolicy::Jitter => Some(JitteredWait::draw(config.base_wait_secs, index, &mut *self.source)),
            _ => None,
        };
        let wait_secs = match jitter {
            Some(w) => w.total_secs(),
            None if lane.plan.records_wait => policy.wait_secs(config.base_wait_secs, index),
            None => 0.0,
        };

        lane.server.load = policy.next_load(lane.server.load);
        if policy.models_outcome() {
            self.draw(DrawInstruction::LoadBar {
                lane: lane.plan.lane.clone(),
                load: lane.server.load,
            });
        }

        self.animate_wait(&lane.plan, index, wait_secs).await?;

        let outcome = match policy.failure_adjustment(lane.server.load) {
            Some(adjustment) => {
                let p = failure_probability(config.clients, lane.server.capacity, adjustment);
                let ok = attempt_succeeds(p, &mut *self.source);
                debug!(lane = %lane.plan.lane, index, load = lane.server.load, p, ok, "attempt drawn");
                Outcome::from_success(ok)
            }
            None => Outcome::Unmodeled,
        };
        lane.succeeded = outcome == Outcome::Succeeded;

        let result = AttemptResult {
            index,
            lane: lane.plan.lane.clone(),
            wait_secs,
            outcome,
            load_after: lane.server.load,
        };
        self.narrate(&result, policy, jitter);
        self.ctx.history.push(result);
        self.emit_stats();
        Ok(())
    }

    async fn animate_wait(&mut self, plan: &LanePlan, index: u32, wait_secs: f64) -> Result<(), Cancelled> {
        match plan.animation {
            WaitAnimation::None => self.checkpoint(),
            WaitAnimation::Steps { steps, cap_secs } => {
                let tick = (wait_secs / steps as f64).min(cap_secs);
                for i in 0..=steps {
                    self.checkpoint()?;
                    self.draw(DrawInstruction::Progress {
                        lane: plan.lane.clone(),
                        index,
                        elapsed_secs: wait_secs * i as f64 / steps as f64,
                        wait_secs,
                    });
                    if i < steps {
                        self.pacer.pause(tick, &self.token).await?;
                    }
                }
                Ok(())
            }
            WaitAnimation::Scaled { .. } => {
                self.draw(DrawInstruction::Progress {
                    lane: plan.lane.clone(),
                    index,
                    elapsed_secs: 0.0,
                    wait_secs,
                });
                self.pacer.pause(plan.animation.total_secs(wait_secs), &self.token).await
            }
        }
    }

    fn preamble(&mut self) {
        let config = self.ctx.config;
        let load = self.ctx.initial.load;
        match self.ctx.scenario {
            Scenario::Comparison => {
                self.header(Lane::NoBackoff, "BAD: No Backoff");
                self.header(Lane::Backoff, "GOOD: With Backoff");
                self.draw(DrawInstruction::LoadBar { lane: Lane::NoBackoff, load });
                self.draw(DrawInstruction::LoadBar { lane: Lane::Backoff, load });
                self.log(Severity::Info, format!("Server capacity: {SERVER_CAPACITY} clients"));
                self.log(
                    Severity::Info,
                    format!("Current clients: {} -> Initial load: {load}%", config.clients),
                );
            }
            Scenario::NoBackoff | Scenario::WithBackoff => {
                let title = if self.ctx.scenario == Scenario::WithBackoff {
                    "WITH EXPONENTIAL BACKOFF"
                } else {
                    "WITHOUT BACKOFF"
                };
                self.header(Lane::Single, title);
                self.draw(DrawInstruction::LoadBar { lane: Lane::Single, load });
            }
            Scenario::WithJitter => {
                self.header(Lane::Single, "EXPONENTIAL BACKOFF + JITTER");
                self.log(Severity::Info, "Solution: Add random delay to spread out the retries");
                let msg = if config.clients <= 4 {
                    format!("Simulating {} client(s)...", config.clients)
                } else {
                    format!("Simulating {} clients (showing 4 samples)...", config.clients)
                };
                self.log(Severity::Info, msg);
            }
            Scenario::Graph => {
                self.header(Lane::Single, "EXPONENTIAL GROWTH VISUALIZATION");
                self.log(Severity::Info, "Showing exponential growth...");
            }
        }
    }

    fn narrate(&mut self, r: &AttemptResult, policy: AttemptPolicy, jitter: Option<JitteredWait>) {
        let n = r.index + 1;
        let severity = if r.succeeded() { Severity::Success } else { Severity::Error };
        match (&r.lane, policy, jitter) {
            (Lane::Sample(label), _, Some(w)) => {
                self.draw(DrawInstruction::JitterSample {
                    round: r.index,
                    label: *label,
                    base_secs: w.base_secs,
                    jitter_secs: w.jitter_secs,
                });
                self.log(
                    Severity::Info,
                    format!(
                        "Sample {label}: {:.2}s (base {:?}s + jitter {:.2}s)",
                        w.total_secs(),
                        w.base_secs,
                        w.jitter_secs
                    ),
                );
            }
            (_, AttemptPolicy::GraphOnly, _) => {
                let config = self.ctx.config;
                self.draw(DrawInstruction::GraphPoint {
                    index: r.index,
                    wait_secs: r.wait_secs,
                    max_wait_secs: exponential_wait(config.base_wait_secs, config.max_attempts.saturating_sub(1)),
                });
                self.log(
                    Severity::Info,
                    format!(
                        "Attempt {n}: wait = {:?} x 2^{} = {:?}s",
                        config.base_wait_secs, r.index, r.wait_secs
                    ),
                );
            }
            (Lane::Single, _, _) => {
                self.draw_attempt(r);
                let text = if r.succeeded() { "SUCCESS!" } else { "FAILED" };
                self.log(
                    severity,
                    format!("Attempt {n}: {text} (waited {:?}s, load: {}%)", r.wait_secs, r.load_after),
                );
            }
            (lane, _, _) => {
                self.draw_attempt(r);
                let prefix = if *lane == Lane::NoBackoff { "NO BACKOFF" } else { "BACKOFF" };
                self.log(
                    severity,
                    format!("[{prefix}] Attempt {n}: {} (Load: {}%)", r.outcome.label(), r.load_after),
                );
            }
        }
    }

    fn summarize(&mut self, lanes: &[LaneRun]) {
        let stats = self.ctx.stats();
        match self.ctx.scenario {
            Scenario::Comparison => {
                for lane in lanes {
                    let verdict = match (&lane.plan.lane, lane.succeeded) {
                        (Lane::NoBackoff, _) => "Server Overwhelmed!",
                        (_, true) => "Server Recovered!",
                        (_, false) => "Still Failed",
                    };
                    self.summary(
                        Some(lane.plan.lane.clone()),
                        format!("{verdict} Final Load: {}%", lane.server.load),
                    );
                }
            }
            Scenario::NoBackoff | Scenario::WithBackoff => {
                if lanes.iter().any(|l| l.succeeded) {
                    self.summary(Some(Lane::Single), "Request completed successfully!".to_string());
                }
                self.summary(None, format!("Total wait: {:?}s", stats.total_wait_secs));
            }
            Scenario::WithJitter => {
                self.summary(None, "Result: Less server congestion, better performance".to_string());
            }
            Scenario::Graph => {
                self.summary(None, format!("Total wait: {:?}s", stats.total_wait_secs));
                self.summary(None, "Key insight: wait time doubles with each attempt".to_string());
            }
        }
    }

    fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    fn header(&mut self, lane: Lane, title: &str) {
        self.draw(DrawInstruction::Header {
            lane,
            title: title.to_string(),
        });
    }

    fn summary(&mut self, lane: Option<Lane>, text: String) {
        self.draw(DrawInstruction::Summary { lane, text });
    }

    fn draw_attempt(&mut self, r: &AttemptResult) {
        self.draw(DrawInstruction::Attempt {
            lane: r.lane.clone(),
            index: r.index,
            outcome: r.outcome,
            wait_secs: r.wait_secs,
            load: r.load_after,
        });
    }

    fn draw(&mut self, d: DrawInstruction) {
        self.sink.emit(RunEvent::Draw(d));
    }

    fn log(&mut self, severity: Severity, message: impl Into<String>) {
        self.sink.emit(RunEvent::log(severity, message));
    }

    fn emit_stats(&mut self) {
        let stats = self.ctx.stats();
        self.sink.emit(RunEvent::Stats(stats));
    }
}

/// Runs `ctx` to the end with the given collaborators.
pub async fn run_scenario(
    ctx: RunContext,
    source: &mut dyn RandomSource,
    sink: &mut dyn EventSink,
    pacer: Pacer,
    token: CancellationToken,
) -> RunReport {
    Driver::new(ctx, source, sink, pacer, token).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SequenceSource;

    fn config(base: f64, clients: u32, max_attempts: u32) -> SimulationConfig {
        SimulationConfig {
            base_wait_secs: base,
            clients,
            max_attempts,
            speed: Speed::Normal,
        }
    }

    async fn run(scenario: Scenario, cfg: SimulationConfig, mut src: SequenceSource) -> (RunReport, Vec<RunEvent>) {
        let mut events = Vec::new();
        let report = run_scenario(
            RunContext::new(scenario, cfg),
            &mut src,
            &mut events,
            Pacer::instant(),
            CancellationToken::new(),
        )
        .await;
        (report, events)
    }

    #[tokio::test]
    async fn pause_observes_cancellation() {
        let token = CancellationToken::new();
        let pacer = Pacer::new(Speed::Slow);
        token.cancel();
        assert_eq!(pacer.pause(60.0, &token).await, Err(Cancelled));
    }

    #[tokio::test]
    async fn pause_interrupted_mid_sleep() {
        let token = CancellationToken::new();
        let pacer = Pacer::new(Speed::Normal);
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            t.cancel();
        });
        let started = std::time::Instant::now();
        assert_eq!(pacer.pause(30.0, &token).await, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn single_lane_loads_follow_policy() {
        let (report, _) = run(Scenario::NoBackoff, config(1.0, 60, 4), SequenceSource::always_fail()).await;
        let loads: Vec<u8> = report.attempts.iter().map(|a| a.load_after).collect();
        assert_eq!(loads, vec![70, 80, 90, 100]);

        let (report, _) = run(Scenario::WithBackoff, config(1.0, 100, 5), SequenceSource::always_fail()).await;
        let loads: Vec<u8> = report.attempts.iter().map(|a| a.load_after).collect();
        assert_eq!(loads, vec![85, 70, 55, 40, 25]);
    }

    #[tokio::test]
    async fn comparison_stops_when_backoff_lane_succeeds() {
        // draws alternate no-backoff, backoff; backoff succeeds in round 2
        let src = SequenceSource::holding(vec![0.0, 0.0, 0.0, 0.999]);
        let (report, events) = run(Scenario::Comparison, config(1.0, 100, 5), src).await;
        assert_eq!(report.status(), RunStatus::Completed);
        assert_eq!(report.waits(&Lane::Backoff), vec![1.0, 2.0]);
        assert_eq!(report.waits(&Lane::NoBackoff).len(), 2);
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::Draw(DrawInstruction::Summary { text, .. }) if text.starts_with("Server Recovered!")
        )));
    }

    #[tokio::test]
    async fn comparison_no_backoff_lane_keeps_degrading_after_success() {
        // round 1: no-backoff succeeds, backoff fails; every later draw fails
        let src = SequenceSource::holding(vec![0.999, 0.0]);
        let (report, _) = run(Scenario::Comparison, config(1.0, 60, 5), src).await;
        let loads: Vec<u8> = report
            .attempts
            .iter()
            .filter(|a| a.lane == Lane::NoBackoff)
            .map(|a| a.load_after)
            .collect();
        assert_eq!(loads, vec![70, 80, 90, 100, 100]);
        assert_eq!(report.waits(&Lane::Backoff).len(), 5);
        assert_eq!(report.stats.total_failures, 9);
        assert_eq!(report.status(), RunStatus::Completed);
    }

    #[tokio::test]
    async fn comparison_total_wait_counts_backoff_lane_only() {
        let (report, _) = run(Scenario::Comparison, config(1.0, 100, 5), SequenceSource::always_fail()).await;
        assert_eq!(report.waits(&Lane::NoBackoff), vec![0.0; 5]);
        assert_eq!(report.waits(&Lane::Backoff), vec![1.0, 2.0, 4.0, 8.0, 16.0]);
        assert_eq!(report.stats.total_wait_secs, 31.0);
    }

    #[tokio::test]
    async fn narration_prints_waits_with_a_decimal() {
        let (_, events) = run(Scenario::WithBackoff, config(1.0, 100, 2), SequenceSource::always_fail()).await;
        let logs: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Log(l) => Some(l.message.as_str()),
                _ => None,
            })
            .collect();
        assert!(logs.contains(&"Attempt 1: FAILED (waited 1.0s, load: 85%)"));
        assert!(logs.contains(&"Attempt 2: FAILED (waited 2.0s, load: 70%)"));

        let (_, events) = run(Scenario::Graph, config(2.0, 100, 2), SequenceSource::always_fail()).await;
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::Log(l) if l.message == "Attempt 2: wait = 2.0 x 2^1 = 4.0s"
        )));
    }

    #[tokio::test]
    async fn input_error_is_logged_and_run_proceeds() {
        let (cfg, err) = SimulationConfig::from_input("x", "100", "5", Speed::Normal);
        let mut events = Vec::new();
        let mut src = SequenceSource::always_fail();
        let ctx = RunContext::new(Scenario::WithBackoff, cfg).with_input_error(err);
        let report = run_scenario(ctx, &mut src, &mut events, Pacer::instant(), CancellationToken::new()).await;
        assert_eq!(report.attempts.len(), 5);
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::Log(l) if l.severity == Severity::Error && l.message == "Invalid parameters! Using defaults."
        )));
    }

    #[tokio::test]
    async fn stats_snapshots_track_history() {
        let (report, events) = run(Scenario::WithBackoff, config(1.0, 100, 3), SequenceSource::always_fail()).await;
        let snapshots: Vec<&RunStats> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Stats(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(snapshots.first().map(|s| s.status), Some(RunStatus::Running));
        assert_eq!(snapshots.last().map(|s| s.status), Some(RunStatus::Completed));
        let requests: Vec<u32> = snapshots.iter().map(|s| s.total_requests).collect();
        assert_eq!(requests, vec![0, 1, 2, 3, 3]);
        assert_eq!(report.stats.total_wait_secs, 7.0);
        assert_eq!(report.stats.final_load, 55);
    }
}
