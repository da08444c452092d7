//! # Run session
//!
//! Owns at most one scenario run at a time and exposes the three commands of
//! the control panel: start, stop and reset.
//!
//! ```text
//! Ready ──start──► Running ──(attempts exhausted | success)──► Completed
//!                     │
//!                     └──stop──► Stopped
//!
//! Completed | Stopped ──reset──► Ready
//! Completed | Stopped ──start──► Running
//! ```
//!
//! The run executes on a background tokio task and reports progress through
//! an unbounded channel handed back by [`Session::start`]; the caller's event
//! loop drains it. Stopping cancels the run's token; the worker unwinds at its
//! next checkpoint and publishes `Stopped`. The worker publishes its final
//! status before it drops the event sender, so once the receiver yields `None`
//! [`Session::status`] already reports the outcome.

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::driver::{run_scenario, Pacer, RunContext, RunReport};
use crate::error::SessionError;
use crate::event::RunEvent;
use crate::model::RandomSource;
use crate::stats::RunStatus;

pub struct Session {
    pacer: Pacer,
    status: RunStatus,
    token: Option<CancellationToken>,
    worker: Option<JoinHandle<RunReport>>,
    progress: Option<watch::Receiver<RunStatus>>,
    last: Option<RunReport>,
}

impl Session {
    pub fn new(pacer: Pacer) -> Self {
        Self {
            pacer,
            status: RunStatus::Ready,
            token: None,
            worker: None,
            progress: None,
            last: None,
        }
    }

    /// Status of the current run as published by its worker.
    pub fn status(&self) -> RunStatus {
        match &self.progress {
            Some(rx) => *rx.borrow(),
            None => self.status,
        }
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last.as_ref()
    }

    /// Spawns the run described by `ctx`.
    ///
    /// Rejected while another run is in progress.
    pub fn start(
        &mut self,
        ctx: RunContext,
        source: Box<dyn RandomSource>,
    ) -> Result<UnboundedReceiver<RunEvent>, SessionError> {
        if self.status() == RunStatus::Running {
            return Err(SessionError::AlreadyRunning);
        }
        if self.worker.take().is_some() {
            debug!(status = ?self.status(), "replacing finished run");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(RunStatus::Running);
        let token = CancellationToken::new();
        let pacer = self.pacer;
        let run_token = token.clone();
        info!(scenario = %ctx.scenario, "starting run");
        let worker = tokio::spawn(async move {
            let mut source = source;
            let mut sink = tx;
            let report = run_scenario(ctx, source.as_mut(), &mut sink, pacer, run_token).await;
            let _ = status_tx.send(report.status());
            report
        });

        self.token = Some(token);
        self.worker = Some(worker);
        self.progress = Some(status_rx);
        self.last = None;
        self.status = RunStatus::Running;
        Ok(rx)
    }

    /// Requests cancellation of the active run.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        match (&self.token, self.status()) {
            (Some(token), RunStatus::Running) => {
                debug!("cancelling run");
                token.cancel();
                Ok(())
            }
            _ => Err(SessionError::NotRunning),
        }
    }

    /// Waits for the active run to finish and records its outcome.
    pub async fn wait(&mut self) -> Result<RunReport, SessionError> {
        let worker = self.worker.take().ok_or(SessionError::NotRunning)?;
        let joined = worker.await;
        self.token = None;
        self.progress = None;
        match joined {
            Ok(report) => {
                self.status = report.status();
                self.last = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                self.status = RunStatus::Stopped;
                Err(SessionError::Worker(e.to_string()))
            }
        }
    }

    /// Drops any run, finished or not, and returns to `Ready`.
    pub fn reset(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.progress = None;
        self.last = None;
        self.status = RunStatus::Ready;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}
