//! In-process store.
//!
//! All state sits behind one async mutex, so every trait call (including a
//! whole [`RunCommit`]) is applied atomically with respect to other callers.
//! A commit is validated before anything is written, so a rejected commit
//! leaves the state untouched.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use lanwatch_core::{
    DeviceHistorySample, DeviceStatus, Job, JobId, JobRun, JobStatus, KnownDevice, MacAddr,
    Notification, NotificationId, RunId, RunStatus, WhitelistEntry,
};

use crate::error::{Result, StoreError};
use crate::store::{DeviceStore, NotificationQuery, Prune, RunCommit};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    whitelist: HashMap<JobId, BTreeMap<MacAddr, WhitelistEntry>>,
    devices: HashMap<JobId, BTreeMap<MacAddr, KnownDevice>>,
    history: Vec<DeviceHistorySample>,
    runs: Vec<JobRun>,
    notifications: Vec<Notification>,
}

impl State {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))
    }

    fn run_index(&self, id: RunId) -> Result<usize> {
        self.runs
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::RunNotFound(id))
    }

    fn prune(&mut self, job_id: JobId, prune: Prune) -> u64 {
        let Some(devices) = self.devices.get_mut(&job_id) else {
            return 0;
        };
        let before = devices.len();
        devices.retain(|_, d| !prune.removes(d));
        (before - devices.len()) as u64
    }

    /// Reject a commit that would violate device keys before touching state.
    fn check_commit(&self, commit: &RunCommit) -> Result<()> {
        let job_id = commit.job_id;
        if !self.jobs.contains_key(&job_id) {
            return Err(StoreError::JobNotFound(job_id));
        }
        self.run_index(commit.run.id)?;

        let known = self.devices.get(&job_id);
        let is_known = |mac: &MacAddr| known.is_some_and(|d| d.contains_key(mac));

        let mut inserted = std::collections::HashSet::new();
        for device in &commit.inserted {
            if is_known(&device.mac) || !inserted.insert(device.mac) {
                return Err(StoreError::DuplicateDevice {
                    job_id,
                    mac: device.mac,
                });
            }
        }
        for update in &commit.updated {
            if !is_known(&update.mac) && !inserted.contains(&update.mac) {
                return Err(StoreError::UnknownDevice {
                    job_id,
                    mac: update.mac,
                });
            }
        }
        Ok(())
    }
}

/// [`DeviceStore`] kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateJob(job.id));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        self.state.lock().await.job_mut(id)?.status = status;
        Ok(())
    }

    async fn set_next_run(&self, id: JobId, next_run: Option<DateTime<Utc>>) -> Result<()> {
        self.state.lock().await.job_mut(id)?.next_run = next_run;
        Ok(())
    }

    async fn delete_job(&self, id: JobId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.jobs.remove(&id).is_none() {
            return Ok(false);
        }
        state.whitelist.remove(&id);
        state.devices.remove(&id);
        state.history.retain(|h| h.job_id != id);
        state.runs.retain(|r| r.job_id != id);
        state.notifications.retain(|n| n.job_id != id);
        Ok(true)
    }

    async fn add_whitelist(&self, job_id: JobId, mac: MacAddr) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.job_mut(job_id)?;
        let entries = state.whitelist.entry(job_id).or_default();
        if entries.contains_key(&mac) {
            return Ok(false);
        }
        entries.insert(
            mac,
            WhitelistEntry {
                job_id,
                mac,
                added_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn remove_whitelist(&self, job_id: JobId, mac: MacAddr) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .whitelist
            .get_mut(&job_id)
            .is_some_and(|entries| entries.remove(&mac).is_some()))
    }

    async fn list_whitelist(&self, job_id: JobId) -> Result<Vec<WhitelistEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<WhitelistEntry> = state
            .whitelist
            .get(&job_id)
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by_key(|e| e.added_at);
        Ok(entries)
    }

    async fn list_known_devices(&self, job_id: JobId) -> Result<Vec<KnownDevice>> {
        let state = self.state.lock().await;
        let mut devices: Vec<KnownDevice> = state
            .devices
            .get(&job_id)
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default();
        devices.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.mac.cmp(&b.mac)));
        Ok(devices)
    }

    async fn list_history(
        &self,
        job_id: JobId,
        mac: Option<MacAddr>,
    ) -> Result<Vec<DeviceHistorySample>> {
        let state = self.state.lock().await;
        let mut samples: Vec<DeviceHistorySample> = state
            .history
            .iter()
            .filter(|h| h.job_id == job_id && mac.map_or(true, |m| h.mac == m))
            .cloned()
            .collect();
        // Stable sort keeps insertion order reversed for equal timestamps.
        samples.reverse();
        samples.sort_by(|a, b| b.seen_at.cmp(&a.seen_at));
        Ok(samples)
    }

    async fn prune_inactive(&self, job_id: JobId, prune: Prune) -> Result<u64> {
        Ok(self.state.lock().await.prune(job_id, prune))
    }

    async fn begin_run(&self, run: &JobRun) -> Result<()> {
        let mut state = self.state.lock().await;
        state.job_mut(run.job_id)?.status = JobStatus::Running;
        state.runs.push(run.clone());
        Ok(())
    }

    async fn commit_run(&self, commit: &RunCommit) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_commit(commit)?;

        let job_id = commit.job_id;
        let devices = state.devices.entry(job_id).or_default();
        for device in &commit.inserted {
            devices.insert(device.mac, device.clone());
        }
        for update in &commit.updated {
            if let Some(device) = devices.get_mut(&update.mac) {
                device.ip = update.ip;
                device.vendor = update.vendor.clone();
                device.whitelisted = update.whitelisted;
                device.last_seen = update.last_seen;
                device.status = DeviceStatus::Active;
            }
        }
        for mac in &commit.inactivated {
            if let Some(device) = devices.get_mut(mac) {
                device.status = DeviceStatus::Inactive;
            }
        }

        state.history.extend(commit.history.iter().cloned());
        state
            .notifications
            .extend(commit.notifications.iter().cloned());
        state.prune(job_id, commit.prune);

        let idx = state.run_index(commit.run.id)?;
        state.runs[idx] = commit.run.clone();

        let job = state.job_mut(job_id)?;
        job.status = JobStatus::Active;
        job.last_run = Some(commit.run.started_at);
        Ok(())
    }

    async fn fail_run(&self, run: &JobRun) -> Result<()> {
        let mut state = self.state.lock().await;
        state.job_mut(run.job_id)?;
        let idx = state.run_index(run.id)?;
        state.runs[idx] = run.clone();

        let job = state.job_mut(run.job_id)?;
        job.status = JobStatus::Active;
        job.last_run = Some(run.started_at);
        Ok(())
    }

    async fn list_runs(&self, job_id: JobId, limit: u32) -> Result<Vec<JobRun>> {
        let state = self.state.lock().await;
        let mut runs: Vec<JobRun> = state
            .runs
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn runs_with_status(&self, status: RunStatus) -> Result<Vec<JobRun>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn list_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        let state = self.state.lock().await;
        let mut found: Vec<Notification> = state
            .notifications
            .iter()
            .rev()
            .filter(|n| query.job_id.map_or(true, |id| n.job_id == id))
            .filter(|n| !query.unread_only || !n.read)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
