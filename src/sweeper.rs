//! Periodic timeout sweep
//!
//! Each pass asks the store for schemes whose deadline has elapsed and applies
//! their step timeout one by one until the time budget is spent. Whatever is
//! left over stays due and is picked up by the next pass.
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::engine::ApprovalEngine;
use crate::error::{ApprovalError, Result};
use crate::types::SchemeId;

#[derive(Debug, Default)]
pub struct SweepReport {
    pub timed_out: Vec<SchemeId>,
    pub failed: Vec<(SchemeId, ApprovalError)>,
    /// Due schemes not visited because the budget ran out.
    pub deferred: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty() && self.failed.is_empty() && self.deferred == 0
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out.is_empty() {
            return write!(f, "No approval has timed out");
        }
        let lines: Vec<String> = self
            .timed_out
            .iter()
            .map(|id| format!("Timeout for approval #{id}"))
            .collect();
        write!(f, "{}", lines.join("; "))
    }
}

pub struct TimeoutSweeper {
    engine: Arc<ApprovalEngine>,
}

impl TimeoutSweeper {
    pub fn new(engine: Arc<ApprovalEngine>) -> Self {
        Self { engine }
    }

    /// One pass. Per-scheme failures are logged and reported, they do not stop
    /// the pass; only a failing due-query does. A budget too large to represent
    /// as an instant means no limit.
    pub fn sweep(&self, budget: Duration) -> Result<SweepReport> {
        let limit = Instant::now().checked_add(budget);
        let due = self.engine.due()?;
        let mut report = SweepReport::default();

        for (visited, id) in due.iter().enumerate() {
            if limit.is_some_and(|limit| Instant::now() >= limit) {
                report.deferred = due.len() - visited;
                warn!(deferred = report.deferred, "Sweep budget exhausted");
                break;
            }
            match self.engine.on_timeout(id) {
                Ok(true) => report.timed_out.push(id.clone()),
                Ok(false) => debug!(scheme_id = %id, "Scheme no longer due"),
                Err(err) => {
                    error!(scheme_id = %id, error = %err, "Timeout handling failed");
                    report.failed.push((id.clone(), err));
                }
            }
        }

        if !report.is_empty() {
            info!(
                timed_out = report.timed_out.len(),
                failed = report.failed.len(),
                deferred = report.deferred,
                "{report}"
            );
        }
        Ok(report)
    }

    /// [`spawn`](Self::spawn) with the configured interval and budget.
    pub fn spawn_with(self, config: &EngineConfig) -> SweeperHandle {
        self.spawn(config.sweep_interval(), config.sweep_budget())
    }

    /// Run a pass every `interval` on a background thread until the handle is
    /// shut down or dropped.
    pub fn spawn(self, interval: Duration, budget: Duration) -> SweeperHandle {
        let (stop, signal) = mpsc::channel::<()>();
        let join = thread::spawn(move || {
            info!(interval_secs = interval.as_secs(), "Timeout sweeper started");
            loop {
                if let Err(err) = self.sweep(budget) {
                    error!(error = %err, "Timeout sweep failed");
                }
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("Timeout sweeper stopped");
        });
        SweeperHandle {
            stop: Some(stop),
            join: Some(join),
        }
    }
}

pub struct SweeperHandle {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the loop and wait for the pass in progress to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Timeout sweeper thread panicked");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
