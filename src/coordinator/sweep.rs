//! Periodic fleet-wide health and metrics sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::coordinator::ManagerCoordinator;
use crate::instance::InstanceStatus;
use crate::manager::ManagerError;
use crate::shutdown::ShutdownPhase;
use crate::store::Page;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interval: Duration,
    /// Upper bound on running instances visited per tick.
    pub page_size: usize,
    /// Per-instance deadline; defaults to the interval.
    pub task_deadline: Option<Duration>,
}

impl MonitorSettings {
    pub fn task_deadline(&self) -> Duration {
        self.task_deadline.unwrap_or(self.interval)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
            task_deadline: None,
        }
    }
}

/// Outcome tally of one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub visited: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

enum Outcome {
    Done,
    Failed,
    TimedOut,
}

pub(super) struct MonitorTask {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ManagerCoordinator {
    /// Start the background sweep. Returns false if it is already running
    /// or the coordinator is shutting down.
    ///
    /// The first tick runs immediately.
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let mut slot = self.monitor.lock();
        if slot.is_some() || self.lifecycle.phase() != ShutdownPhase::Running {
            return false;
        }

        let stop = CancellationToken::new();
        let stopped = stop.clone();
        let coordinator = Arc::clone(self);
        let interval = self.settings.interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // A started tick always runs to completion.
                coordinator.sweep_once().await;
            }
            tracing::info!("Monitoring loop stopped");
        });

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            page_size = self.settings.page_size,
            deadline_ms = self.settings.task_deadline().as_millis() as u64,
            "Monitoring started"
        );
        *slot = Some(MonitorTask { stop, handle: task });
        true
    }

    /// Signal the sweep to stop and wait for any in-flight tick.
    pub async fn stop_monitoring(&self) {
        let Some(task) = self.monitor.lock().take() else {
            return;
        };
        task.stop.cancel();
        if let Err(e) = task.handle.await {
            tracing::error!(error = %e, "Monitoring task terminated abnormally");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// Drain the sweep, then disconnect every cached manager. Monitoring
    /// cannot be restarted afterwards. Concurrent callers all return once
    /// the first one has finished.
    pub async fn shutdown(&self) {
        if !self.lifecycle.advance(ShutdownPhase::DrainingSweep) {
            self.lifecycle.completed().await;
            return;
        }
        self.stop_monitoring().await;
        self.lifecycle.advance(ShutdownPhase::DisconnectingManagers);
        self.disconnect_all().await;
        self.lifecycle.advance(ShutdownPhase::Complete);
    }

    /// Run one tick: health then metrics for every running instance in the
    /// first page, each under its own deadline.
    pub async fn sweep_once(self: &Arc<Self>) -> SweepReport {
        let started = Instant::now();
        let page = Page::first(self.settings.page_size.max(1));
        let instances = match self.instances.list_by_status(InstanceStatus::Running, page).await {
            Ok(instances) => instances,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list running instances");
                return SweepReport::default();
            }
        };

        let deadline = self.settings.task_deadline();
        let mut tasks = JoinSet::new();
        for instance in instances {
            let coordinator = Arc::clone(self);
            tasks.spawn(async move {
                let cancel = CancellationToken::new();
                let id = instance.id;
                match tokio::time::timeout(deadline, coordinator.check_instance(&id, &cancel)).await {
                    Ok(Ok(())) => Outcome::Done,
                    Ok(Err(e)) => {
                        tracing::warn!(instance_id = %id, error = %e, "Sweep check failed");
                        Outcome::Failed
                    }
                    Err(_) => {
                        cancel.cancel();
                        tracing::warn!(
                            instance_id = %id,
                            deadline_ms = deadline.as_millis() as u64,
                            "Sweep check abandoned after deadline"
                        );
                        Outcome::TimedOut
                    }
                }
            });
        }

        let mut report = SweepReport::default();
        while let Some(joined) = tasks.join_next().await {
            report.visited += 1;
            match joined {
                Ok(Outcome::Done) => report.succeeded += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Ok(Outcome::TimedOut) => report.timed_out += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Sweep task panicked");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            visited = report.visited,
            succeeded = report.succeeded,
            failed = report.failed,
            timed_out = report.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sweep complete"
        );
        report
    }

    async fn check_instance(&self, id: &str, cancel: &CancellationToken) -> Result<(), ManagerError> {
        self.health_check(id, cancel).await?;
        self.collect_metrics(id, cancel).await?;
        Ok(())
    }
}
