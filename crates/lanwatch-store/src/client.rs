//! SQLite connection management and schema setup.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use lanwatch_core::{
    DeviceHistorySample, Job, JobId, JobRun, JobStatus, KnownDevice, MacAddr, Notification,
    NotificationId, RunStatus, WhitelistEntry,
};

use crate::error::{Result, StoreError};
use crate::store::{DeviceStore, NotificationQuery, Prune, RunCommit};

/// Configuration for opening the SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://lanwatch.db".to_string(),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        interface TEXT NOT NULL,
        subnet TEXT NOT NULL,
        scan_budget_secs INTEGER NOT NULL,
        schedule TEXT NOT NULL,
        notifications_enabled INTEGER NOT NULL,
        notify_new INTEGER NOT NULL,
        notify_unauthorized INTEGER NOT NULL,
        notify_ip_change INTEGER NOT NULL,
        retention TEXT NOT NULL,
        status TEXT NOT NULL,
        last_run TEXT,
        next_run TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS whitelist (
        job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        mac TEXT NOT NULL,
        added_at TEXT NOT NULL,
        PRIMARY KEY (job_id, mac)
    )",
    "CREATE TABLE IF NOT EXISTS known_devices (
        job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        mac TEXT NOT NULL,
        ip TEXT NOT NULL,
        vendor TEXT,
        whitelisted INTEGER NOT NULL,
        first_seen TEXT NOT NULL,
        last_seen TEXT NOT NULL,
        status TEXT NOT NULL,
        PRIMARY KEY (job_id, mac)
    )",
    "CREATE TABLE IF NOT EXISTS device_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        mac TEXT NOT NULL,
        ip TEXT NOT NULL,
        vendor TEXT,
        seen_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_device_history_job_mac
        ON device_history (job_id, mac)",
    "CREATE TABLE IF NOT EXISTS job_runs (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        status TEXT NOT NULL,
        devices_found INTEGER NOT NULL DEFAULT 0,
        new_devices INTEGER NOT NULL DEFAULT 0,
        warnings INTEGER NOT NULL DEFAULT 0,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        duration_ms INTEGER,
        output TEXT,
        error TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_job_runs_job_started
        ON job_runs (job_id, started_at)",
    "CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        job_name TEXT NOT NULL,
        kind TEXT NOT NULL,
        message TEXT NOT NULL,
        mac TEXT NOT NULL,
        ip TEXT NOT NULL,
        created_at TEXT NOT NULL,
        is_read INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_notifications_job_created
        ON notifications (job_id, created_at)",
];

/// SQLite-backed [`DeviceStore`](crate::DeviceStore).
///
/// Clone is cheap (the pool is reference counted).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and make sure the schema exists.
    pub async fn connect(config: &SqliteConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        // Every connection to `:memory:` gets its own database.
        let max_connections = if config.url.contains(":memory:") {
            1
        } else {
            config.max_connections.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(url = %config.url, "Opened SQLite store");
        Ok(store)
    }

    /// Create tables and indexes that do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DeviceStore for SqliteStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        SqliteStore::insert_job(self, job).await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        SqliteStore::get_job(self, id).await
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        SqliteStore::list_jobs(self).await
    }

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        SqliteStore::set_job_status(self, id, status).await
    }

    async fn set_next_run(&self, id: JobId, next_run: Option<DateTime<Utc>>) -> Result<()> {
        SqliteStore::set_next_run(self, id, next_run).await
    }

    async fn delete_job(&self, id: JobId) -> Result<bool> {
        SqliteStore::delete_job(self, id).await
    }

    async fn add_whitelist(&self, job_id: JobId, mac: MacAddr) -> Result<bool> {
        SqliteStore::add_whitelist(self, job_id, mac).await
    }

    async fn remove_whitelist(&self, job_id: JobId, mac: MacAddr) -> Result<bool> {
        SqliteStore::remove_whitelist(self, job_id, mac).await
    }

    async fn list_whitelist(&self, job_id: JobId) -> Result<Vec<WhitelistEntry>> {
        SqliteStore::list_whitelist(self, job_id).await
    }

    async fn list_known_devices(&self, job_id: JobId) -> Result<Vec<KnownDevice>> {
        SqliteStore::list_known_devices(self, job_id).await
    }

    async fn list_history(
        &self,
        job_id: JobId,
        mac: Option<MacAddr>,
    ) -> Result<Vec<DeviceHistorySample>> {
        SqliteStore::list_history(self, job_id, mac).await
    }

    async fn prune_inactive(&self, job_id: JobId, prune: Prune) -> Result<u64> {
        SqliteStore::prune_inactive(self, job_id, prune).await
    }

    async fn begin_run(&self, run: &JobRun) -> Result<()> {
        SqliteStore::begin_run(self, run).await
    }

    async fn commit_run(&self, commit: &RunCommit) -> Result<()> {
        SqliteStore::commit_run(self, commit).await
    }

    async fn fail_run(&self, run: &JobRun) -> Result<()> {
        SqliteStore::fail_run(self, run).await
    }

    async fn list_runs(&self, job_id: JobId, limit: u32) -> Result<Vec<JobRun>> {
        SqliteStore::list_runs(self, job_id, limit).await
    }

    async fn runs_with_status(&self, status: RunStatus) -> Result<Vec<JobRun>> {
        SqliteStore::runs_with_status(self, status).await
    }

    async fn list_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        SqliteStore::list_notifications(self, query).await
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<bool> {
        SqliteStore::mark_notification_read(self, id).await
    }
}

/// Fixed-width UTC timestamps so text comparison in SQL orders correctly.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode {
            table,
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

pub(crate) fn decode_opt_ts(table: &'static str, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| decode_ts(table, &s)).transpose()
}

/// Parse a text column through `FromStr`, reporting the table on failure.
pub(crate) fn decode_str<T>(table: &'static str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| StoreError::Decode {
        table,
        reason: format!("{raw:?}: {e}"),
    })
}
