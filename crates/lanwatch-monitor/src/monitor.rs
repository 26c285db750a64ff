//! Entry points used by the CLI (or any other front end).

use std::sync::Arc;

use chrono::Utc;

use lanwatch_core::{Job, JobId, JobRun, MacAddr};
use lanwatch_store::DeviceStore;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::runner::JobRunner;
use crate::scanner::ScannerFactory;
use crate::scheduler::{Scheduler, SchedulerStatus};

/// Store, runner and scheduler wired together.
pub struct Monitor {
    store: Arc<dyn DeviceStore>,
    runner: Arc<JobRunner>,
    scheduler: Scheduler,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        scanners: Arc<dyn ScannerFactory>,
        config: &MonitorConfig,
    ) -> Self {
        let runner = Arc::new(JobRunner::new(store.clone(), scanners));
        let scheduler = Scheduler::new(store.clone(), runner.clone(), config.tick());
        Self {
            store,
            runner,
            scheduler,
        }
    }

    /// Recover runs interrupted by a previous process, then schedule jobs
    /// that have no next-due time yet.
    pub async fn start(&self) -> Result<()> {
        let recovered = self.runner.recover_interrupted().await?;
        let scheduled = self.scheduler.initialize().await?;
        tracing::info!(recovered, scheduled, "Monitor started");
        Ok(())
    }

    /// Validate and persist a new job together with its whitelist.
    pub async fn create_job(&self, mut job: Job, whitelist: &[MacAddr]) -> Result<Job> {
        job.validate()?;
        if let Some(interval) = job.schedule.interval() {
            job.next_run.get_or_insert(Utc::now() + interval);
        }
        self.store.insert_job(&job).await?;
        for mac in whitelist {
            self.store.add_whitelist(job.id, *mac).await?;
        }
        tracing::info!(job_id = %job.id, job = %job.name, schedule = %job.schedule, "Job created");
        Ok(job)
    }

    /// Delete a job and everything it owns. A running job cannot be deleted.
    pub async fn delete_job(&self, job_id: JobId) -> Result<bool> {
        if self.runner.is_running(job_id) {
            return Err(MonitorError::AlreadyRunning(job_id));
        }
        Ok(self.store.delete_job(job_id).await?)
    }

    /// Run a job now, regardless of its schedule.
    pub async fn run_job(&self, job_id: JobId) -> Result<JobRun> {
        self.runner.run(job_id).await
    }

    pub fn is_job_running(&self, job_id: JobId) -> bool {
        self.runner.is_running(job_id)
    }

    pub fn running_jobs(&self) -> Vec<JobId> {
        self.runner.list_running()
    }

    pub async fn scheduler_status(&self) -> Result<SchedulerStatus> {
        self.scheduler.status().await
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }
}
