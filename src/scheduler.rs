//! Periodic sync scheduling with a single-flight guard.

use crate::sync::{SyncPipeline, SyncSummary};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default period between scheduled runs.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Admits at most one holder at a time. Contenders are turned away, not queued.
#[derive(Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

/// Proof of holding a [`SingleFlight`]; releases it on drop.
pub struct FlightPermit {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn try_acquire(&self) -> Option<FlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| FlightPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Result of asking for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed(SyncSummary),
    /// Another run held the guard.
    Skipped,
}

/// Runs the pipeline on a fixed period, never overlapping runs.
pub struct Scheduler {
    pipeline: Arc<SyncPipeline>,
    interval: Duration,
    run_on_start: bool,
    flight: SingleFlight,
    skipped_runs: AtomicU64,
}

impl Scheduler {
    #[must_use]
    pub fn new(pipeline: Arc<SyncPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            run_on_start: false,
            flight: SingleFlight::new(),
            skipped_runs: AtomicU64::new(0),
        }
    }

    /// Also run once as soon as the scheduler starts.
    #[must_use]
    pub const fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    #[must_use]
    pub const fn pipeline(&self) -> &Arc<SyncPipeline> {
        &self.pipeline
    }

    /// Whether a run currently holds the guard.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.flight.is_busy()
    }

    /// Number of triggers turned away because a run was in flight.
    #[must_use]
    pub fn skipped_runs(&self) -> u64 {
        self.skipped_runs.load(Ordering::Relaxed)
    }

    fn note_skip(&self, trigger: &str) {
        let total = self.skipped_runs.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(trigger, skipped_total = total, "Sync already in progress, skipping run");
    }

    /// Run now and wait for the summary, unless a run is already in flight.
    pub async fn trigger(&self) -> TriggerOutcome {
        let Some(permit) = self.flight.try_acquire() else {
            self.note_skip("manual");
            return TriggerOutcome::Skipped;
        };
        TriggerOutcome::Completed(self.pipeline.run_holding(permit).await)
    }

    fn spawn_run(&self) -> Option<JoinHandle<SyncSummary>> {
        let Some(permit) = self.flight.try_acquire() else {
            self.note_skip("scheduled");
            return None;
        };
        let pipeline = Arc::clone(&self.pipeline);
        Some(tokio::spawn(async move { pipeline.run_holding(permit).await }))
    }

    /// Tick until shutdown. Runs are spawned so later ticks are still
    /// observed (and skipped) while a slow run is in progress.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Sync scheduler started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so the first
        // scheduled run happens one full interval after startup.
        interval.tick().await;

        let mut in_flight = if self.run_on_start {
            self.spawn_run()
        } else {
            None
        };

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Sync scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    debug!("Sync tick");
                    if let Some(handle) = self.spawn_run() {
                        in_flight = Some(handle);
                    }
                }
            }
        }

        // An unfinished run is cancelled; a commit already in progress runs
        // to completion on its blocking thread.
        if let Some(handle) = in_flight {
            if !handle.is_finished() {
                handle.abort();
            }
            let _ = handle.await;
        }
    }
}
