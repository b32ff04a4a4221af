//! Fixed-interval background job runner
//!
//! Firings run one at a time inside a single task. When a run outlives the
//! interval the ticks it overlapped are skipped, never queued or run
//! concurrently. A failing or panicking run is logged and the schedule goes on.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// Owns the timer task. Stopping (or dropping) the scheduler ends it.
pub struct Scheduler {
    period: Duration,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Start firing `job` every `period`, the first time one period from now
    pub fn start(job: Arc<dyn PeriodicJob>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(job = job.name(), period_secs = period.as_secs(), "Scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => fire(&job).await,
                }
            }

            info!(job = job.name(), "Scheduler stopped");
        });

        Self {
            period,
            shutdown,
            handle,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal shutdown and wait for an in-flight run to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!("Scheduler task ended abnormally: {e}");
        }
    }
}

async fn fire(job: &Arc<dyn PeriodicJob>) {
    let started = Instant::now();
    let task = {
        let job = job.clone();
        tokio::spawn(async move { job.run().await })
    };

    match task.await {
        Ok(Ok(())) => info!(
            job = job.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scheduled run complete"
        ),
        Ok(Err(e)) => error!(job = job.name(), "Scheduled run failed: {e:#}"),
        Err(e) => error!(job = job.name(), "Scheduled run panicked: {e}"),
    }
}
