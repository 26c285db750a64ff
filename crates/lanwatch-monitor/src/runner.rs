//! Execution of a single job: lock, scan, reconcile, commit, unlock.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;

use lanwatch_core::{Job, JobId, JobRun, JobStatus, MacAddr, RunStatus};
use lanwatch_store::{DeviceStore, RunCommit};

use crate::error::{MonitorError, Result};
use crate::reconcile;
use crate::retention;
use crate::scanner::ScannerFactory;

/// Runs jobs on demand, never more than once concurrently per job.
pub struct JobRunner {
    store: Arc<dyn DeviceStore>,
    scanners: Arc<dyn ScannerFactory>,
    in_flight: Mutex<HashSet<JobId>>,
}

/// Holds a job's slot in the in-flight set until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<JobId>>,
    job_id: JobId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

impl JobRunner {
    pub fn new(store: Arc<dyn DeviceStore>, scanners: Arc<dyn ScannerFactory>) -> Self {
        Self {
            store,
            scanners,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Whether `job_id` is currently being executed.
    pub fn is_running(&self, job_id: JobId) -> bool {
        self.lock_in_flight().contains(&job_id)
    }

    /// Ids of every job currently executing, in a stable order.
    pub fn list_running(&self) -> Vec<JobId> {
        let set = self.lock_in_flight();
        set.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Execute one run of `job_id` and return the closed run record.
    ///
    /// Fails with [`MonitorError::AlreadyRunning`] when the job is in flight.
    /// Any failure after the run record exists closes it as failed before
    /// the error is returned.
    pub async fn run(&self, job_id: JobId) -> Result<JobRun> {
        let _slot = self.claim(job_id)?;

        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(MonitorError::JobNotFound(job_id))?;

        let run = JobRun::start(job_id, Utc::now());
        self.store.begin_run(&run).await?;

        tracing::info!(
            job_id = %job_id,
            run_id = %run.id,
            job = %job.name,
            interface = %job.interface,
            subnet = %job.subnet,
            "Job run started"
        );

        match self.execute(&job, &run).await {
            Ok(closed) => {
                tracing::info!(
                    job_id = %job_id,
                    run_id = %closed.id,
                    devices_found = closed.counts.devices_found,
                    new_devices = closed.counts.new_devices,
                    warnings = closed.counts.warnings,
                    duration_ms = closed.duration_ms.unwrap_or_default(),
                    "Job run completed"
                );
                Ok(closed)
            }
            Err(e) => {
                self.record_failure(run, &e).await;
                Err(e)
            }
        }
    }

    /// Scan, reconcile and commit. `run` is the open record from `begin_run`.
    async fn execute(&self, job: &Job, run: &JobRun) -> Result<JobRun> {
        let scanner = self.scanners.create();
        let scan = scanner
            .scan(
                &job.interface,
                &job.subnet,
                Duration::from_secs(job.scan_budget_secs),
            )
            .await?;

        let whitelist: HashSet<MacAddr> = self
            .store
            .list_whitelist(job.id)
            .await?
            .into_iter()
            .map(|entry| entry.mac)
            .collect();
        let known = self.store.list_known_devices(job.id).await?;

        let now = Utc::now();
        let plan = reconcile::reconcile(job, &whitelist, &known, &scan.devices, now);

        let summary = format!(
            "{} devices found, {} new, {} warnings, {} inactive, {} lines rejected",
            plan.counts.devices_found,
            plan.counts.new_devices,
            plan.counts.warnings,
            plan.inactivated.len(),
            scan.rejected_lines
        );

        let mut closed = run.clone();
        closed.complete(plan.counts, summary, Utc::now())?;

        let commit = RunCommit {
            job_id: job.id,
            inserted: plan.inserted,
            updated: plan.updated,
            inactivated: plan.inactivated,
            history: plan.history,
            notifications: plan.notifications,
            prune: retention::prune_for(job.retention, run.started_at),
            run: closed.clone(),
        };
        self.store.commit_run(&commit).await?;

        Ok(closed)
    }

    /// Close `run` as failed. Store errors here are logged, not returned,
    /// so the caller still sees the original failure.
    async fn record_failure(&self, mut run: JobRun, error: &MonitorError) {
        tracing::warn!(job_id = %run.job_id, run_id = %run.id, error = %error, "Job run failed");

        if let Err(e) = run.fail(error.to_string(), Utc::now()) {
            tracing::error!(run_id = %run.id, error = %e, "Run was already closed");
            return;
        }
        if let Err(e) = self.store.fail_run(&run).await {
            tracing::error!(
                job_id = %run.job_id,
                run_id = %run.id,
                error = %e,
                "Failed to record failed run"
            );
            if let Err(e) = self.store.set_job_status(run.job_id, JobStatus::Active).await {
                tracing::error!(job_id = %run.job_id, error = %e, "Failed to reset job status");
            }
        }
    }

    /// Close runs and reset jobs left `running` by a previous process.
    ///
    /// Jobs in flight in this process are skipped. Returns the number of
    /// runs closed.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let now = Utc::now();
        let mut closed = 0;

        for mut run in self.store.runs_with_status(RunStatus::Running).await? {
            if self.is_running(run.job_id) {
                continue;
            }
            run.fail("interrupted before completion", now)?;
            self.store.fail_run(&run).await?;
            tracing::warn!(job_id = %run.job_id, run_id = %run.id, "Closed interrupted run");
            closed += 1;
        }

        for job in self.store.list_jobs().await? {
            if job.status == JobStatus::Running && !self.is_running(job.id) {
                self.store.set_job_status(job.id, JobStatus::Active).await?;
                tracing::warn!(job_id = %job.id, "Reset job left running");
            }
        }

        Ok(closed)
    }

    fn claim(&self, job_id: JobId) -> Result<InFlight<'_>> {
        if !self.lock_in_flight().insert(job_id) {
            return Err(MonitorError::AlreadyRunning(job_id));
        }
        Ok(InFlight {
            set: &self.in_flight,
            job_id,
        })
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<JobId>> {
        // The set stays consistent even if a holder panicked.
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use lanwatch_core::DiscoveredDevice;
    use lanwatch_store::MemoryStore;

    use super::*;
    use crate::scanner::{DeviceScanner, ScanResult};

    struct FixedScanner {
        devices: Vec<DiscoveredDevice>,
        fail: bool,
    }

    #[async_trait]
    impl DeviceScanner for FixedScanner {
        async fn scan(&self, _: &str, _: &str, _: Duration) -> Result<ScanResult> {
            if self.fail {
                return Err(MonitorError::ScanProcessFailed {
                    code: 1,
                    stderr: "no such interface".to_string(),
                });
            }
            Ok(ScanResult {
                scan_id: uuid::Uuid::new_v4(),
                devices: self.devices.clone(),
                rejected_lines: 0,
                duration: Duration::ZERO,
            })
        }
    }

    struct FixedFactory {
        devices: Vec<DiscoveredDevice>,
        fail: bool,
        created: AtomicUsize,
    }

    impl ScannerFactory for FixedFactory {
        fn create(&self) -> Box<dyn DeviceScanner> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(FixedScanner {
                devices: self.devices.clone(),
                fail: self.fail,
            })
        }
    }

    fn factory(devices: Vec<DiscoveredDevice>, fail: bool) -> Arc<FixedFactory> {
        Arc::new(FixedFactory {
            devices,
            fail,
            created: AtomicUsize::new(0),
        })
    }

    async fn store_with_job() -> (Arc<MemoryStore>, Job) {
        let store = Arc::new(MemoryStore::new());
        let job = Job::new("lab", "eth0", "10.0.0.0/24").unwrap();
        store.insert_job(&job).await.unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn test_successful_run_commits_and_frees_job() {
        let (store, job) = store_with_job().await;
        let devices = vec![DiscoveredDevice {
            ip: "10.0.0.7".parse().unwrap(),
            mac: "aa:bb:cc:00:00:07".parse().unwrap(),
            vendor: None,
        }];
        let runner = JobRunner::new(store.clone(), factory(devices, false));

        let run = runner.run(job.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.counts.devices_found, 1);
        assert_eq!(run.counts.warnings, 1);
        assert!(!runner.is_running(job.id));

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Active);
        assert_eq!(stored.last_run, Some(run.started_at));
        assert_eq!(store.list_known_devices(job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scan_failure_closes_run_as_failed() {
        let (store, job) = store_with_job().await;
        let runner = JobRunner::new(store.clone(), factory(vec![], true));

        let err = runner.run(job.id).await.unwrap_err();
        assert!(matches!(err, MonitorError::ScanProcessFailed { .. }));
        assert!(!runner.is_running(job.id));

        let runs = store.list_runs(job.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error.as_deref().unwrap().contains("no such interface"));
        assert_eq!(
            store.get_job(job.id).await.unwrap().unwrap().status,
            JobStatus::Active
        );
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = Arc::new(MemoryStore::new());
        let scanners = factory(vec![], false);
        let runner = JobRunner::new(store, scanners.clone());

        let missing = JobId::new();
        assert!(matches!(
            runner.run(missing).await,
            Err(MonitorError::JobNotFound(id)) if id == missing
        ));
        assert!(!runner.is_running(missing));
        assert_eq!(scanners.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let (store, job) = store_with_job().await;
        let orphan = JobRun::start(job.id, Utc::now());
        store.begin_run(&orphan).await.unwrap();

        let runner = JobRunner::new(store.clone(), factory(vec![], false));
        assert_eq!(runner.recover_interrupted().await.unwrap(), 1);

        let runs = store.list_runs(job.id, 10).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(
            store.get_job(job.id).await.unwrap().unwrap().status,
            JobStatus::Active
        );
        assert_eq!(runner.recover_interrupted().await.unwrap(), 0);
    }
}
