//! Rate-limited batch dispatcher.
//!
//! Each round launches `min(concurrency, target_rate)` units concurrently,
//! waits for the whole batch to drain, then sleeps off whatever is left of the
//! batch's pacing window (`batch / target_rate` seconds). The duration and stop
//! checks happen only at batch boundaries: a batch in flight always finishes,
//! so the configured duration is a lower bound on wall-clock time, overrun by
//! at most one batch's slowest unit.

use crate::engine::profile::IntensityProfile;
use crate::engine::simulator::Outcome;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub batches: u64,
    pub issued: u64,
    pub completed: u64,
    pub resets: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

impl DispatchReport {
    fn tally(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed { .. } => self.completed += 1,
            Outcome::Reset { .. } => self.resets += 1,
            Outcome::Errored(_) => self.errors += 1,
        }
    }

    /// Units issued per second of wall-clock time.
    pub fn achieved_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.issued as f64 / secs
        }
    }
}

/// Drives `work` at the profile's rate for the profile's duration.
///
/// `work` receives the unit's sequence number and returns the unit's future;
/// each future runs as its own task, so a failing or panicking unit never
/// disturbs its siblings or the loop. Total units never exceed
/// [`IntensityProfile::unit_budget`].
///
/// Stop checkpoint: `stop` is observed at every batch boundary and during the
/// pacing sleep, never mid-batch.
pub async fn run_rate_limited<F, Fut>(
    profile: &IntensityProfile,
    stop: &CancellationToken,
    mut work: F,
) -> DispatchReport
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let started = Instant::now();
    let budget = profile.unit_budget();
    let mut report = DispatchReport::default();

    while started.elapsed() < profile.duration() && report.issued < budget && !stop.is_cancelled() {
        let batch = (profile.batch_size() as u64).min(budget - report.issued) as usize;
        let batch_started = Instant::now();

        let mut units = JoinSet::new();
        for _ in 0..batch {
            units.spawn(work(report.issued));
            report.issued += 1;
        }
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(outcome) => report.tally(&outcome),
                Err(e) => {
                    warn!(profile = %profile.name(), error = %e, "Unit task failed");
                    report.errors += 1;
                }
            }
        }
        report.batches += 1;

        let window = profile.pacing_window(batch);
        let spent = batch_started.elapsed();
        debug!(
            profile = %profile.name(),
            batch,
            spent_ms = spent.as_millis() as u64,
            issued = report.issued,
            "Batch drained"
        );
        if spent < window {
            tokio::select! {
                _ = sleep(window - spent) => {}
                _ = stop.cancelled() => break,
            }
        }
    }

    report.elapsed = started.elapsed();
    report
}
