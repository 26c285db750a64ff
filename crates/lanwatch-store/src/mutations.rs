//! Write operations against the SQLite store.
//!
//! Multi-row writes run inside a transaction; dropping the transaction on an
//! early `?` return rolls everything back.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use lanwatch_core::{
    DeviceHistorySample, DeviceStatus, DeviceUpdate, Job, JobId, JobRun, JobStatus, KnownDevice,
    MacAddr, Notification, NotificationId,
};

use crate::client::{encode_ts, SqliteStore};
use crate::error::{Result, StoreError};
use crate::store::{Prune, RunCommit};

impl SqliteStore {
    // ── Jobs ─────────────────────────────────────────────────────

    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (
               id, name, interface, subnet, scan_budget_secs, schedule,
               notifications_enabled, notify_new, notify_unauthorized, notify_ip_change,
               retention, status, last_run, next_run, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(&job.interface)
        .bind(&job.subnet)
        .bind(job.scan_budget_secs as i64)
        .bind(job.schedule.as_str())
        .bind(job.notifications.enabled)
        .bind(job.notifications.on_new)
        .bind(job.notifications.on_unauthorized)
        .bind(job.notifications.on_ip_change)
        .bind(job.retention.to_string())
        .bind(job.status.as_str())
        .bind(job.last_run.map(encode_ts))
        .bind(job.next_run.map(encode_ts))
        .bind(encode_ts(job.created_at))
        .execute(self.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::DuplicateJob(job.id)
            }
            other => StoreError::Query(other),
        })?;

        tracing::debug!(job_id = %job.id, name = %job.name, "Job inserted");
        Ok(())
    }

    pub async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        set_status(&mut conn, id, status, None).await
    }

    pub async fn set_next_run(&self, id: JobId, next_run: Option<DateTime<Utc>>) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET next_run = ? WHERE id = ?")
            .bind(next_run.map(encode_ts))
            .bind(id.to_string())
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    pub async fn delete_job(&self, id: JobId) -> Result<bool> {
        // Owned rows go through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Whitelist ────────────────────────────────────────────────

    pub async fn add_whitelist(&self, job_id: JobId, mac: MacAddr) -> Result<bool> {
        if self.get_job(job_id).await?.is_none() {
            return Err(StoreError::JobNotFound(job_id));
        }

        let result =
            sqlx::query("INSERT OR IGNORE INTO whitelist (job_id, mac, added_at) VALUES (?, ?, ?)")
                .bind(job_id.to_string())
                .bind(mac.to_string())
                .bind(encode_ts(Utc::now()))
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_whitelist(&self, job_id: JobId, mac: MacAddr) -> Result<bool> {
        let result = sqlx::query("DELETE FROM whitelist WHERE job_id = ? AND mac = ?")
            .bind(job_id.to_string())
            .bind(mac.to_string())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Devices ──────────────────────────────────────────────────

    pub async fn prune_inactive(&self, job_id: JobId, prune: Prune) -> Result<u64> {
        let mut conn = self.pool().acquire().await?;
        prune_devices(&mut conn, job_id, prune).await
    }

    // ── Runs ─────────────────────────────────────────────────────

    pub async fn begin_run(&self, run: &JobRun) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO job_runs (id, job_id, status, started_at) VALUES (?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(run.job_id.to_string())
        .bind(run.status.as_str())
        .bind(encode_ts(run.started_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| missing_job(e, run.job_id))?;

        set_status(&mut tx, run.job_id, JobStatus::Running, None).await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn commit_run(&self, commit: &RunCommit) -> Result<()> {
        let job_id = commit.job_id;
        let mut tx = self.pool().begin().await?;

        for device in &commit.inserted {
            insert_device(&mut tx, device).await?;
        }
        for update in &commit.updated {
            update_device(&mut tx, job_id, update).await?;
        }
        for mac in &commit.inactivated {
            sqlx::query("UPDATE known_devices SET status = ? WHERE job_id = ? AND mac = ?")
                .bind(DeviceStatus::Inactive.as_str())
                .bind(job_id.to_string())
                .bind(mac.to_string())
                .execute(&mut *tx)
                .await?;
        }
        for sample in &commit.history {
            insert_history(&mut tx, sample).await?;
        }
        for notification in &commit.notifications {
            insert_notification(&mut tx, notification).await?;
        }

        let pruned = prune_devices(&mut tx, job_id, commit.prune).await?;
        update_run(&mut tx, &commit.run).await?;
        set_status(&mut tx, job_id, JobStatus::Active, Some(commit.run.started_at)).await?;

        tx.commit().await?;

        tracing::debug!(
            job_id = %job_id,
            run_id = %commit.run.id,
            inserted = commit.inserted.len(),
            updated = commit.updated.len(),
            inactivated = commit.inactivated.len(),
            pruned,
            "Run committed"
        );
        Ok(())
    }

    pub async fn fail_run(&self, run: &JobRun) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        update_run(&mut tx, run).await?;
        set_status(&mut tx, run.job_id, JobStatus::Active, Some(run.started_at)).await?;
        tx.commit().await?;
        Ok(())
    }

    // ── Notifications ────────────────────────────────────────────

    pub async fn mark_notification_read(&self, id: NotificationId) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn set_status(
    conn: &mut SqliteConnection,
    id: JobId,
    status: JobStatus,
    last_run: Option<DateTime<Utc>>,
) -> Result<()> {
    let result = sqlx::query("UPDATE jobs SET status = ?, last_run = COALESCE(?, last_run) WHERE id = ?")
        .bind(status.as_str())
        .bind(last_run.map(encode_ts))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::JobNotFound(id));
    }
    Ok(())
}

async fn insert_device(conn: &mut SqliteConnection, device: &KnownDevice) -> Result<()> {
    sqlx::query(
        "INSERT INTO known_devices (
           job_id, mac, ip, vendor, whitelisted, first_seen, last_seen, status
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(device.job_id.to_string())
    .bind(device.mac.to_string())
    .bind(device.ip.to_string())
    .bind(device.vendor.as_deref())
    .bind(device.whitelisted)
    .bind(encode_ts(device.first_seen))
    .bind(encode_ts(device.last_seen))
    .bind(device.status.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::DuplicateDevice {
            job_id: device.job_id,
            mac: device.mac,
        },
        other => StoreError::Query(other),
    })?;
    Ok(())
}

async fn update_device(
    conn: &mut SqliteConnection,
    job_id: JobId,
    update: &DeviceUpdate,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE known_devices
         SET ip = ?, vendor = ?, whitelisted = ?, last_seen = ?, status = ?
         WHERE job_id = ? AND mac = ?",
    )
    .bind(update.ip.to_string())
    .bind(update.vendor.as_deref())
    .bind(update.whitelisted)
    .bind(encode_ts(update.last_seen))
    .bind(DeviceStatus::Active.as_str())
    .bind(job_id.to_string())
    .bind(update.mac.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::UnknownDevice {
            job_id,
            mac: update.mac,
        });
    }
    Ok(())
}

async fn insert_history(conn: &mut SqliteConnection, sample: &DeviceHistorySample) -> Result<()> {
    sqlx::query(
        "INSERT INTO device_history (job_id, mac, ip, vendor, seen_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(sample.job_id.to_string())
    .bind(sample.mac.to_string())
    .bind(sample.ip.to_string())
    .bind(sample.vendor.as_deref())
    .bind(encode_ts(sample.seen_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_notification(conn: &mut SqliteConnection, n: &Notification) -> Result<()> {
    sqlx::query(
        "INSERT INTO notifications (
           id, job_id, job_name, kind, message, mac, ip, created_at, is_read
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(n.id.to_string())
    .bind(n.job_id.to_string())
    .bind(&n.job_name)
    .bind(n.kind.as_str())
    .bind(&n.message)
    .bind(n.mac.to_string())
    .bind(n.ip.to_string())
    .bind(encode_ts(n.created_at))
    .bind(n.read)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn update_run(conn: &mut SqliteConnection, run: &JobRun) -> Result<()> {
    let result = sqlx::query(
        "UPDATE job_runs
         SET status = ?, devices_found = ?, new_devices = ?, warnings = ?,
             finished_at = ?, duration_ms = ?, output = ?, error = ?
         WHERE id = ?",
    )
    .bind(run.status.as_str())
    .bind(i64::from(run.counts.devices_found))
    .bind(i64::from(run.counts.new_devices))
    .bind(i64::from(run.counts.warnings))
    .bind(run.finished_at.map(encode_ts))
    .bind(run.duration_ms.map(|ms| ms as i64))
    .bind(run.output.as_deref())
    .bind(run.error.as_deref())
    .bind(run.id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::RunNotFound(run.id));
    }
    Ok(())
}

async fn prune_devices(conn: &mut SqliteConnection, job_id: JobId, prune: Prune) -> Result<u64> {
    let result = match prune {
        Prune::Nothing => return Ok(0),
        Prune::AllInactive => {
            sqlx::query("DELETE FROM known_devices WHERE job_id = ? AND status = ?")
                .bind(job_id.to_string())
                .bind(DeviceStatus::Inactive.as_str())
                .execute(&mut *conn)
                .await?
        }
        Prune::InactiveBefore(cutoff) => {
            sqlx::query(
                "DELETE FROM known_devices WHERE job_id = ? AND status = ? AND last_seen < ?",
            )
            .bind(job_id.to_string())
            .bind(DeviceStatus::Inactive.as_str())
            .bind(encode_ts(cutoff))
            .execute(&mut *conn)
            .await?
        }
    };
    Ok(result.rows_affected())
}

fn missing_job(err: sqlx::Error, job_id: JobId) -> StoreError {
    match err {
        sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
            StoreError::JobNotFound(job_id)
        }
        other => StoreError::Query(other),
    }
}
