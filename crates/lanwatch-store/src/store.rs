//! The persistence contract consumed by the monitor.
//!
//! Everything a run writes is bundled into one [`RunCommit`] so a backend can
//! apply it as a single unit: a crash mid-run must never leave devices
//! updated without the matching run record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use lanwatch_core::{
    DeviceHistorySample, DeviceStatus, DeviceUpdate, Job, JobId, JobRun, JobStatus, KnownDevice,
    MacAddr, Notification, NotificationId, RunStatus, WhitelistEntry,
};

use crate::error::Result;

/// Which inactive devices of a job to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prune {
    Nothing,
    AllInactive,
    /// Inactive devices whose `last_seen` is strictly older than the cutoff.
    InactiveBefore(DateTime<Utc>),
}

impl Prune {
    /// Whether this prune deletes `device`. Active devices are never removed.
    pub fn removes(&self, device: &KnownDevice) -> bool {
        if device.status != DeviceStatus::Inactive {
            return false;
        }
        match self {
            Self::Nothing => false,
            Self::AllInactive => true,
            Self::InactiveBefore(cutoff) => device.last_seen < *cutoff,
        }
    }
}

/// All writes produced by one successful run.
#[derive(Debug, Clone)]
pub struct RunCommit {
    pub job_id: JobId,
    pub inserted: Vec<KnownDevice>,
    pub updated: Vec<DeviceUpdate>,
    pub inactivated: Vec<MacAddr>,
    pub history: Vec<DeviceHistorySample>,
    pub notifications: Vec<Notification>,
    /// Applied after the device writes.
    pub prune: Prune,
    /// The closed run record; the job is returned to `active` with
    /// `last_run` set to the run's start time.
    pub run: JobRun,
}

/// Filter for listing notifications.
#[derive(Debug, Clone, Default)]
pub struct NotificationQuery {
    pub job_id: Option<JobId>,
    pub unread_only: bool,
    pub limit: Option<u32>,
}

/// Persistence backend for jobs and everything they own.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    // ── Jobs ──────────────────────────────────────────────────────

    /// Fails with `StoreError::DuplicateJob` when the id is taken.
    async fn insert_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// All jobs, oldest first.
    async fn list_jobs(&self) -> Result<Vec<Job>>;

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()>;

    async fn set_next_run(&self, id: JobId, next_run: Option<DateTime<Utc>>) -> Result<()>;

    /// Delete a job together with its whitelist, runs, devices, history and
    /// notifications. Returns false when the job did not exist.
    async fn delete_job(&self, id: JobId) -> Result<bool>;

    // ── Whitelist ─────────────────────────────────────────────────

    /// Returns false when the MAC was already whitelisted.
    async fn add_whitelist(&self, job_id: JobId, mac: MacAddr) -> Result<bool>;

    async fn remove_whitelist(&self, job_id: JobId, mac: MacAddr) -> Result<bool>;

    async fn list_whitelist(&self, job_id: JobId) -> Result<Vec<WhitelistEntry>>;

    // ── Devices ───────────────────────────────────────────────────

    async fn list_known_devices(&self, job_id: JobId) -> Result<Vec<KnownDevice>>;

    /// Sightings for a job, newest first, optionally for a single MAC.
    async fn list_history(
        &self,
        job_id: JobId,
        mac: Option<MacAddr>,
    ) -> Result<Vec<DeviceHistorySample>>;

    /// Bulk delete of inactive devices. Returns the number removed.
    async fn prune_inactive(&self, job_id: JobId, prune: Prune) -> Result<u64>;

    // ── Runs ──────────────────────────────────────────────────────

    /// Insert an open run and flip its job to `running`.
    async fn begin_run(&self, run: &JobRun) -> Result<()>;

    /// Apply every write of a successful run atomically.
    async fn commit_run(&self, commit: &RunCommit) -> Result<()>;

    /// Store a run closed as failed and return its job to `active`.
    async fn fail_run(&self, run: &JobRun) -> Result<()>;

    /// Runs of a job, newest first.
    async fn list_runs(&self, job_id: JobId, limit: u32) -> Result<Vec<JobRun>>;

    /// Runs of any job with the given status.
    async fn runs_with_status(&self, status: RunStatus) -> Result<Vec<JobRun>>;

    // ── Notifications ─────────────────────────────────────────────

    /// Notifications matching the query, newest first.
    async fn list_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>>;

    async fn mark_notification_read(&self, id: NotificationId) -> Result<bool>;
}
