//! Read operations against the SQLite store.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use lanwatch_core::{
    DeviceHistorySample, Job, JobId, JobRun, KnownDevice, MacAddr, Notification,
    NotificationSettings, RunCounts, RunStatus, Schedule, WhitelistEntry,
};

use crate::client::{decode_opt_ts, decode_str, decode_ts, SqliteStore};
use crate::error::Result;
use crate::store::NotificationQuery;

const JOB_COLUMNS: &str = "id, name, interface, subnet, scan_budget_secs, schedule,
    notifications_enabled, notify_new, notify_unauthorized, notify_ip_change,
    retention, status, last_run, next_run, created_at";

const RUN_COLUMNS: &str = "id, job_id, status, devices_found, new_devices, warnings,
    started_at, finished_at, duration_ms, output, error";

const NOTIFICATION_COLUMNS: &str =
    "id, job_id, job_name, kind, message, mac, ip, created_at, is_read";

impl SqliteStore {
    // ── Jobs ─────────────────────────────────────────────────────

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC");
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        rows.iter().map(job_from_row).collect()
    }

    // ── Whitelist ────────────────────────────────────────────────

    pub async fn list_whitelist(&self, job_id: JobId) -> Result<Vec<WhitelistEntry>> {
        let rows = sqlx::query(
            "SELECT job_id, mac, added_at FROM whitelist WHERE job_id = ? ORDER BY added_at ASC",
        )
        .bind(job_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(WhitelistEntry {
                    job_id: decode_str("whitelist", &row.try_get::<String, _>("job_id")?)?,
                    mac: decode_str("whitelist", &row.try_get::<String, _>("mac")?)?,
                    added_at: decode_ts("whitelist", &row.try_get::<String, _>("added_at")?)?,
                })
            })
            .collect()
    }

    // ── Devices ──────────────────────────────────────────────────

    pub async fn list_known_devices(&self, job_id: JobId) -> Result<Vec<KnownDevice>> {
        let rows = sqlx::query(
            "SELECT job_id, mac, ip, vendor, whitelisted, first_seen, last_seen, status
             FROM known_devices WHERE job_id = ? ORDER BY first_seen ASC, mac ASC",
        )
        .bind(job_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(device_from_row).collect()
    }

    pub async fn list_history(
        &self,
        job_id: JobId,
        mac: Option<MacAddr>,
    ) -> Result<Vec<DeviceHistorySample>> {
        let rows = match mac {
            Some(mac) => {
                sqlx::query(
                    "SELECT job_id, mac, ip, vendor, seen_at FROM device_history
                     WHERE job_id = ? AND mac = ? ORDER BY seen_at DESC, id DESC",
                )
                .bind(job_id.to_string())
                .bind(mac.to_string())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT job_id, mac, ip, vendor, seen_at FROM device_history
                     WHERE job_id = ? ORDER BY seen_at DESC, id DESC",
                )
                .bind(job_id.to_string())
                .fetch_all(self.pool())
                .await?
            }
        };

        rows.iter()
            .map(|row| {
                Ok(DeviceHistorySample {
                    job_id: decode_str("device_history", &row.try_get::<String, _>("job_id")?)?,
                    mac: decode_str("device_history", &row.try_get::<String, _>("mac")?)?,
                    ip: decode_str("device_history", &row.try_get::<String, _>("ip")?)?,
                    vendor: row.try_get("vendor")?,
                    seen_at: decode_ts("device_history", &row.try_get::<String, _>("seen_at")?)?,
                })
            })
            .collect()
    }

    // ── Runs ─────────────────────────────────────────────────────

    pub async fn list_runs(&self, job_id: JobId, limit: u32) -> Result<Vec<JobRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM job_runs WHERE job_id = ?
             ORDER BY started_at DESC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(job_id.to_string())
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    pub async fn runs_with_status(&self, status: RunStatus) -> Result<Vec<JobRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM job_runs WHERE status = ? ORDER BY started_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    // ── Notifications ────────────────────────────────────────────

    pub async fn list_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        let mut sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE 1 = 1");
        if query.job_id.is_some() {
            sql.push_str(" AND job_id = ?");
        }
        if query.unread_only {
            sql.push_str(" AND is_read = 0");
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query(&sql);
        if let Some(job_id) = query.job_id {
            q = q.bind(job_id.to_string());
        }
        let rows = q.fetch_all(self.pool()).await?;

        rows.iter().map(notification_from_row).collect()
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    const TABLE: &str = "jobs";

    let id: JobId = decode_str(TABLE, &row.try_get::<String, _>("id")?)?;
    let raw_schedule: String = row.try_get("schedule")?;
    let schedule = raw_schedule.parse::<Schedule>().unwrap_or_else(|e| {
        // Never auto-dispatched; an operator has to fix the row.
        tracing::warn!(job_id = %id, error = %e, "Unknown schedule, treating job as manual");
        Schedule::Manual
    });

    Ok(Job {
        id,
        name: row.try_get("name")?,
        interface: row.try_get("interface")?,
        subnet: row.try_get("subnet")?,
        scan_budget_secs: row.try_get::<i64, _>("scan_budget_secs")?.max(0) as u64,
        schedule,
        notifications: NotificationSettings {
            enabled: row.try_get("notifications_enabled")?,
            on_new: row.try_get("notify_new")?,
            on_unauthorized: row.try_get("notify_unauthorized")?,
            on_ip_change: row.try_get("notify_ip_change")?,
        },
        retention: decode_str(TABLE, &row.try_get::<String, _>("retention")?)?,
        status: decode_str(TABLE, &row.try_get::<String, _>("status")?)?,
        last_run: decode_opt_ts(TABLE, row.try_get("last_run")?)?,
        next_run: decode_opt_ts(TABLE, row.try_get("next_run")?)?,
        created_at: decode_ts(TABLE, &row.try_get::<String, _>("created_at")?)?,
    })
}

fn device_from_row(row: &SqliteRow) -> Result<KnownDevice> {
    const TABLE: &str = "known_devices";

    Ok(KnownDevice {
        job_id: decode_str(TABLE, &row.try_get::<String, _>("job_id")?)?,
        mac: decode_str(TABLE, &row.try_get::<String, _>("mac")?)?,
        ip: decode_str(TABLE, &row.try_get::<String, _>("ip")?)?,
        vendor: row.try_get("vendor")?,
        whitelisted: row.try_get("whitelisted")?,
        first_seen: decode_ts(TABLE, &row.try_get::<String, _>("first_seen")?)?,
        last_seen: decode_ts(TABLE, &row.try_get::<String, _>("last_seen")?)?,
        status: decode_str(TABLE, &row.try_get::<String, _>("status")?)?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<JobRun> {
    const TABLE: &str = "job_runs";

    let count = |column: &str| -> Result<u32> {
        Ok(row.try_get::<i64, _>(column)?.clamp(0, i64::from(u32::MAX)) as u32)
    };

    Ok(JobRun {
        id: decode_str(TABLE, &row.try_get::<String, _>("id")?)?,
        job_id: decode_str(TABLE, &row.try_get::<String, _>("job_id")?)?,
        status: decode_str(TABLE, &row.try_get::<String, _>("status")?)?,
        counts: RunCounts {
            devices_found: count("devices_found")?,
            new_devices: count("new_devices")?,
            warnings: count("warnings")?,
        },
        started_at: decode_ts(TABLE, &row.try_get::<String, _>("started_at")?)?,
        finished_at: decode_opt_ts(TABLE, row.try_get("finished_at")?)?,
        duration_ms: row
            .try_get::<Option<i64>, _>("duration_ms")?
            .map(|ms| ms.max(0) as u64),
        output: row.try_get("output")?,
        error: row.try_get("error")?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification> {
    const TABLE: &str = "notifications";

    Ok(Notification {
        id: decode_str(TABLE, &row.try_get::<String, _>("id")?)?,
        job_id: decode_str(TABLE, &row.try_get::<String, _>("job_id")?)?,
        job_name: row.try_get("job_name")?,
        kind: decode_str(TABLE, &row.try_get::<String, _>("kind")?)?,
        message: row.try_get("message")?,
        mac: decode_str(TABLE, &row.try_get::<String, _>("mac")?)?,
        ip: decode_str(TABLE, &row.try_get::<String, _>("ip")?)?,
        created_at: decode_ts(TABLE, &row.try_get::<String, _>("created_at")?)?,
        read: row.try_get("is_read")?,
    })
}
