//! Job scheduling engine.
//!
//! A fixed-period tick finds due jobs and hands each one to the
//! [`JobRunner`] on its own tokio task. The tick never waits for a run to
//! finish; the runner's in-flight set keeps a slow job from being started
//! twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use lanwatch_core::{JobId, JobStatus};
use lanwatch_store::DeviceStore;

use crate::error::{MonitorError, Result};
use crate::runner::JobRunner;

/// Snapshot of scheduler state.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Jobs with a non-manual schedule.
    pub scheduled_jobs: usize,
    pub running_jobs: usize,
    pub running_job_ids: Vec<JobId>,
}

/// A run started by a tick.
pub struct Dispatch {
    pub job_id: JobId,
    pub handle: JoinHandle<()>,
}

pub struct Scheduler {
    store: Arc<dyn DeviceStore>,
    runner: Arc<JobRunner>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn DeviceStore>, runner: Arc<JobRunner>, tick: Duration) -> Self {
        Self {
            store,
            runner,
            tick,
        }
    }

    /// Give every scheduled job without a next-due time one interval from
    /// now. Returns how many jobs were scheduled.
    pub async fn initialize(&self) -> Result<usize> {
        let now = Utc::now();
        let mut scheduled = 0;

        for job in self.store.list_jobs().await? {
            let Some(interval) = job.schedule.interval() else {
                continue;
            };
            if job.status != JobStatus::Active || job.next_run.is_some() {
                continue;
            }
            let next = now + interval;
            self.store.set_next_run(job.id, Some(next)).await?;
            tracing::info!(job_id = %job.id, schedule = %job.schedule, next_run = %next, "Job scheduled");
            scheduled += 1;
        }

        Ok(scheduled)
    }

    /// Dispatch every due job that is not already running and move its
    /// next-due time one interval past now.
    ///
    /// A job that missed several windows while the process was down gets a
    /// single catch-up run.
    pub async fn tick(&self) -> Result<Vec<Dispatch>> {
        let now = Utc::now();
        let mut dispatched = Vec::new();

        for job in self.store.list_jobs().await? {
            if !job.is_due(now) {
                continue;
            }
            let Some(interval) = job.schedule.interval() else {
                continue;
            };
            if self.runner.is_running(job.id) {
                tracing::debug!(job_id = %job.id, "Due job still running, skipping");
                continue;
            }

            let runner = self.runner.clone();
            let job_id = job.id;
            let handle = tokio::spawn(async move {
                match runner.run(job_id).await {
                    Ok(_) => {}
                    Err(MonitorError::AlreadyRunning(_)) => {
                        tracing::debug!(job_id = %job_id, "Job picked up elsewhere");
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Scheduled run failed");
                    }
                }
            });
            dispatched.push(Dispatch { job_id, handle });

            let next = now + interval;
            if let Err(e) = self.store.set_next_run(job_id, Some(next)).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to persist next run");
            }
            tracing::info!(job_id = %job_id, job = %job.name, next_run = %next, "Scheduled run dispatched");
        }

        Ok(dispatched)
    }

    /// Tick until `shutdown` flips to true or its sender is dropped.
    /// Runs already dispatched are left to finish on their own tasks.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(tick_secs = self.tick.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(dispatched) if !dispatched.is_empty() => {
                            tracing::debug!(count = dispatched.len(), "Tick dispatched jobs");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Scheduler tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        let scheduled_jobs = self
            .store
            .list_jobs()
            .await?
            .iter()
            .filter(|job| !job.schedule.is_manual())
            .count();
        let running_job_ids = self.runner.list_running();

        Ok(SchedulerStatus {
            scheduled_jobs,
            running_jobs: running_job_ids.len(),
            running_job_ids,
        })
    }
}
