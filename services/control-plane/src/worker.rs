//! Periodic reconcile worker.
//!
//! Runs a reconcile pass on a fixed interval until shutdown is signaled.
//! Passes never overlap: the next tick waits for the current pass.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::reconciler::{Reconciler, WatchdogAction, WatchdogResult};

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub passes: u64,
    pub actions: u64,
    pub failures: u64,
}

impl WatchStats {
    fn record(&mut self, result: &WatchdogResult) {
        self.passes += 1;
        if result.action.took_action() {
            self.actions += 1;
        }
        if result.action == WatchdogAction::Failed {
            self.failures += 1;
        }
    }
}

pub struct ReconcileWorker {
    reconciler: Reconciler,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(reconciler: Reconciler, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Run until shutdown is signaled. The first pass runs immediately.
    ///
    /// `on_pass` sees every result, e.g. to persist the migration budget.
    #[instrument(skip(self, shutdown, on_pass))]
    pub async fn run<F>(&mut self, mut shutdown: watch::Receiver<bool>, mut on_pass: F) -> WatchStats
    where
        F: FnMut(&Reconciler, &WatchdogResult),
    {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconcile worker"
        );

        let mut stats = WatchStats::default();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let result = self.reconciler.reconcile().await;
                    stats.record(&result);
                    match result.action {
                        WatchdogAction::Failed => error!(
                            error = ?result.error,
                            "Reconcile pass failed"
                        ),
                        action if action.took_action() => warn!(
                            action = %action,
                            killed = result.killed.len(),
                            "Reconcile pass took corrective action"
                        ),
                        _ => {}
                    }
                    on_pass(&self.reconciler, &result);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(
                            passes = stats.passes,
                            actions = stats.actions,
                            failures = stats.failures,
                            "Reconcile worker shutting down"
                        );
                        break;
                    }
                }
            }
        }

        stats
    }
}
