use retrysim::config::{SimulationConfig, Speed};
use retrysim::driver::{run_scenario, Pacer, RunContext, RunReport};
use retrysim::event::{DrawInstruction, EventSink, RunEvent};
use retrysim::model::{RngSource, SequenceSource};
use retrysim::scenario::Scenario;
use retrysim::stats::{Lane, Outcome, RunStatus};
use tokio_util::sync::CancellationToken;

fn config(base: f64, clients: u32, max_attempts: u32) -> SimulationConfig {
    SimulationConfig {
        base_wait_secs: base,
        clients,
        max_attempts,
        speed: Speed::Fast,
    }
}

async fn run_with(
    scenario: Scenario,
    cfg: SimulationConfig,
    source: &mut dyn retrysim::model::RandomSource,
) -> (RunReport, Vec<RunEvent>) {
    let mut events = Vec::new();
    let report = run_scenario(
        RunContext::new(scenario, cfg),
        source,
        &mut events,
        Pacer::instant(),
        CancellationToken::new(),
    )
    .await;
    (report, events)
}

#[tokio::test]
async fn always_failing_backoff_completes_after_max_attempts() {
    let mut src = SequenceSource::always_fail();
    let (report, _) = run_with(Scenario::WithBackoff, config(1.0, 100, 5), &mut src).await;
    assert_eq!(report.status(), RunStatus::Completed);
    assert_eq!(report.stats.total_requests, 5);
    assert_eq!(report.stats.total_failures, 5);
    assert_eq!(report.waits(&Lane::Single), vec![1.0, 2.0, 4.0, 8.0, 16.0]);
    assert_eq!(report.stats.total_wait_secs, 31.0);
}

#[tokio::test]
async fn success_on_third_attempt_ends_the_run() {
    let mut src = SequenceSource::succeed_after(2);
    let (report, _) = run_with(Scenario::WithBackoff, config(1.0, 100, 5), &mut src).await;
    assert_eq!(report.status(), RunStatus::Completed);
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.attempts[2].outcome, Outcome::Succeeded);
    assert_eq!(report.stats.total_failures, 2);
}

#[tokio::test]
async fn no_backoff_wait_is_constant() {
    let mut src = SequenceSource::always_fail();
    let (report, _) = run_with(Scenario::NoBackoff, config(3.0, 100, 4), &mut src).await;
    let waits = report.waits(&Lane::Single);
    assert_eq!(waits.len(), 4);
    assert!(waits.iter().all(|w| *w == waits[0]));
    assert_eq!(report.stats.final_load, 100);
}

#[tokio::test]
async fn graph_plots_doubling_waits() {
    let mut src = SequenceSource::always_fail();
    let (report, events) = run_with(Scenario::Graph, config(2.0, 100, 4), &mut src).await;
    assert_eq!(report.status(), RunStatus::Completed);
    assert_eq!(report.waits(&Lane::Single), vec![2.0, 4.0, 8.0, 16.0]);
    assert_eq!(report.stats.total_wait_secs, 30.0);
    assert_eq!(report.stats.total_failures, 0);
    let points = events
        .iter()
        .filter(|e| matches!(e, RunEvent::Draw(DrawInstruction::GraphPoint { max_wait_secs, .. }) if *max_wait_secs == 16.0))
        .count();
    assert_eq!(points, 4);
}

#[tokio::test]
async fn jitter_samples_stay_within_half_base() {
    let mut src = RngSource::seeded(7);
    let (report, events) = run_with(Scenario::WithJitter, config(1.0, 100, 10), &mut src).await;
    // rounds are capped at five, four samples each
    assert_eq!(report.attempts.len(), 20);
    for ev in &events {
        if let RunEvent::Draw(DrawInstruction::JitterSample {
            round,
            base_secs,
            jitter_secs,
            ..
        }) = ev
        {
            assert_eq!(*base_secs, 2f64.powi(*round as i32));
            assert!(*jitter_secs >= 0.0 && *jitter_secs < base_secs * 0.5);
        }
    }
}

#[tokio::test]
async fn jitter_shows_fewer_samples_for_few_clients() {
    let mut src = RngSource::seeded(1);
    let (report, _) = run_with(Scenario::WithJitter, config(1.0, 2, 3), &mut src).await;
    assert_eq!(report.attempts.len(), 6);
    assert!(report.attempts.iter().all(|a| matches!(a.lane, Lane::Sample('A') | Lane::Sample('B'))));
}

#[tokio::test]
async fn seeded_runs_are_reproducible() {
    let mut a = RngSource::seeded(42);
    let mut b = RngSource::seeded(42);
    let (first, _) = run_with(Scenario::Comparison, config(1.0, 100, 6), &mut a).await;
    let (second, _) = run_with(Scenario::Comparison, config(1.0, 100, 6), &mut b).await;
    let outcomes = |r: &RunReport| r.attempts.iter().map(|a| (a.lane.clone(), a.outcome)).collect::<Vec<_>>();
    assert_eq!(outcomes(&first), outcomes(&second));
}

/// Cancels the run once a given attempt has been reported.
struct CancelAfter {
    token: CancellationToken,
    attempts: usize,
    seen: usize,
}

impl EventSink for CancelAfter {
    fn emit(&mut self, event: RunEvent) {
        if let RunEvent::Draw(DrawInstruction::Attempt { .. }) = event {
            self.seen += 1;
            if self.seen == self.attempts {
                self.token.cancel();
            }
        }
    }
}

#[tokio::test]
async fn stop_mid_run_reports_stopped() {
    let token = CancellationToken::new();
    let mut sink = CancelAfter {
        token: token.clone(),
        attempts: 2,
        seen: 0,
    };
    let mut src = SequenceSource::always_fail();
    let report = run_scenario(
        RunContext::new(Scenario::WithBackoff, config(1.0, 100, 5)),
        &mut src,
        &mut sink,
        Pacer::instant(),
        token,
    )
    .await;
    assert_eq!(report.status(), RunStatus::Stopped);
    assert_eq!(report.attempts.len(), 2);
    assert!(report.attempts.len() < 5);
}
