//! Core domain types for lanwatch.
//!
//! A monitoring job owns everything observed under it: its whitelist, its
//! runs, the known devices reconciled from those runs, the append-only
//! sighting history and the notifications raised along the way.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::mac::MacAddr;

// ── Identifiers ───────────────────────────────────────────────────

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a monitoring job.
    JobId
);
uuid_id!(
    /// Identifier of a single job execution.
    RunId
);
uuid_id!(
    /// Identifier of a notification row.
    NotificationId
);

/// Implements `as_str`, `Display` and `FromStr` for a closed string enum.
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(CoreError::InvalidEnumValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ── Schedule ──────────────────────────────────────────────────────

/// How often a job is dispatched automatically.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Schedule {
    #[default]
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "hourly")]
    Hourly,
    #[serde(rename = "every_6h")]
    Every6h,
    #[serde(rename = "every_12h")]
    Every12h,
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
}

impl Schedule {
    /// Recurrence interval, or `None` for jobs that only run on demand.
    pub fn interval(&self) -> Option<TimeDelta> {
        match self {
            Self::Manual => None,
            Self::Hourly => Some(TimeDelta::hours(1)),
            Self::Every6h => Some(TimeDelta::hours(6)),
            Self::Every12h => Some(TimeDelta::hours(12)),
            Self::Daily => Some(TimeDelta::days(1)),
            Self::Weekly => Some(TimeDelta::weeks(1)),
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Hourly => "hourly",
            Self::Every6h => "every_6h",
            Self::Every12h => "every_12h",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schedule {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "manual" => Ok(Self::Manual),
            "hourly" => Ok(Self::Hourly),
            "every_6h" => Ok(Self::Every6h),
            "every_12h" => Ok(Self::Every12h),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            _ => Err(CoreError::InvalidScheduleDescriptor(s.to_string())),
        }
    }
}

// ── Retention ─────────────────────────────────────────────────────

/// How long inactive known devices are kept.
///
/// Serialized as `forever`, `immediate` or `days:N`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum RetentionPolicy {
    #[default]
    Forever,
    Days(u32),
    Immediate,
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forever => f.write_str("forever"),
            Self::Immediate => f.write_str("immediate"),
            Self::Days(n) => write!(f, "days:{n}"),
        }
    }
}

impl FromStr for RetentionPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidRetentionPolicy(s.to_string());
        match s.trim() {
            "forever" => Ok(Self::Forever),
            "immediate" => Ok(Self::Immediate),
            other => {
                let days = other.strip_prefix("days:").ok_or_else(invalid)?;
                match days.parse::<u32>() {
                    Ok(n) if n > 0 => Ok(Self::Days(n)),
                    _ => Err(invalid()),
                }
            }
        }
    }
}

impl TryFrom<String> for RetentionPolicy {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RetentionPolicy> for String {
    fn from(policy: RetentionPolicy) -> Self {
        policy.to_string()
    }
}

// ── Jobs ──────────────────────────────────────────────────────────

/// Lifecycle status persisted on a job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Active,
    Running,
}

string_enum!(JobStatus, "job status", {
    Active => "active",
    Running => "running",
});

/// Which device population changes raise notifications for a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationSettings {
    /// Master switch; when off no notifications are produced at all.
    pub enabled: bool,
    pub on_new: bool,
    pub on_unauthorized: bool,
    pub on_ip_change: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            on_new: true,
            on_unauthorized: true,
            on_ip_change: true,
        }
    }
}

/// Default time budget given to the scanner for one run.
pub const DEFAULT_SCAN_BUDGET_SECS: u64 = 30;

/// Largest scan budget a job may carry: one day.
pub const MAX_SCAN_BUDGET_SECS: u64 = 86_400;

/// A persistent monitoring configuration for one interface/subnet pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub interface: String,
    /// IPv4 CIDR target, e.g. `192.168.1.0/24`.
    pub subnet: String,
    pub scan_budget_secs: u64,
    pub schedule: Schedule,
    pub notifications: NotificationSettings,
    pub retention: RetentionPolicy,
    pub status: JobStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a validated manual job with default settings.
    pub fn new(name: &str, interface: &str, subnet: &str) -> Result<Self, CoreError> {
        let job = Self {
            id: JobId::new(),
            name: name.trim().to_string(),
            interface: interface.trim().to_string(),
            subnet: subnet.trim().to_string(),
            scan_budget_secs: DEFAULT_SCAN_BUDGET_SECS,
            schedule: Schedule::Manual,
            notifications: NotificationSettings::default(),
            retention: RetentionPolicy::Forever,
            status: JobStatus::Active,
            last_run: None,
            next_run: None,
            created_at: Utc::now(),
        };
        job.validate()?;
        Ok(job)
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_notifications(mut self, notifications: NotificationSettings) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_scan_budget(mut self, secs: u64) -> Self {
        self.scan_budget_secs = secs;
        self
    }

    /// Check the fields a job cannot be scheduled or scanned without.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidJob("name must not be empty".into()));
        }
        if self.interface.is_empty() || self.interface.contains(char::is_whitespace) {
            return Err(CoreError::InvalidJob(format!(
                "invalid interface name: {:?}",
                self.interface
            )));
        }
        if self.subnet.parse::<Ipv4Net>().is_err() {
            return Err(CoreError::InvalidJob(format!(
                "subnet is not an IPv4 CIDR: {}",
                self.subnet
            )));
        }
        if !(1..=MAX_SCAN_BUDGET_SECS).contains(&self.scan_budget_secs) {
            return Err(CoreError::InvalidJob(format!(
                "scan budget must be between 1 and {MAX_SCAN_BUDGET_SECS} seconds, got {}",
                self.scan_budget_secs
            )));
        }
        Ok(())
    }

    /// Whether the scheduler should dispatch this job at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Active
            && !self.schedule.is_manual()
            && self.next_run.map_or(true, |next| next <= now)
    }
}

/// A (job, MAC) pair marking the device as authorized for that job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhitelistEntry {
    pub job_id: JobId,
    pub mac: MacAddr,
    pub added_at: DateTime<Utc>,
}

// ── Runs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

string_enum!(RunStatus, "run status", {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

/// Counters recorded on a completed run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCounts {
    pub devices_found: u32,
    pub new_devices: u32,
    pub warnings: u32,
}

/// One execution attempt of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRun {
    pub id: RunId,
    pub job_id: JobId,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl JobRun {
    /// Open a new run record for `job_id`.
    pub fn start(job_id: JobId, now: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new(),
            job_id,
            status: RunStatus::Running,
            counts: RunCounts::default(),
            started_at: now,
            finished_at: None,
            duration_ms: None,
            output: None,
            error: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Close the run as completed.
    pub fn complete(
        &mut self,
        counts: RunCounts,
        output: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.close(RunStatus::Completed, now)?;
        self.counts = counts;
        self.output = Some(output.into());
        Ok(())
    }

    /// Close the run as failed, keeping the error text for the operator.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.close(RunStatus::Failed, now)?;
        self.error = Some(error.into());
        Ok(())
    }

    fn close(&mut self, status: RunStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.is_open() {
            return Err(CoreError::RunAlreadyClosed(self.id));
        }
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        Ok(())
    }
}

// ── Devices ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Active,
    Inactive,
}

string_enum!(DeviceStatus, "device status", {
    Active => "active",
    Inactive => "inactive",
});

/// A host reported by one scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub vendor: Option<String>,
}

/// Latest reconciled state of one device (by MAC) under a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnownDevice {
    pub job_id: JobId,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub vendor: Option<String>,
    pub whitelisted: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: DeviceStatus,
}

/// New observed state for a device that is already known to the job.
///
/// Applying an update always marks the device active again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceUpdate {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub vendor: Option<String>,
    pub whitelisted: bool,
    pub last_seen: DateTime<Utc>,
}

/// Write-once record of a single sighting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceHistorySample {
    pub job_id: JobId,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub vendor: Option<String>,
    pub seen_at: DateTime<Utc>,
}

// ── Notifications ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Information,
    Warning,
}

string_enum!(NotificationKind, "notification kind", {
    Information => "information",
    Warning => "warning",
});

/// An operator-facing message about a change in a job's device population.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub job_id: JobId,
    pub job_name: String,
    pub kind: NotificationKind,
    pub message: String,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_intervals() {
        assert_eq!(Schedule::Manual.interval(), None);
        assert_eq!(Schedule::Hourly.interval(), Some(TimeDelta::hours(1)));
        assert_eq!(Schedule::Every6h.interval(), Some(TimeDelta::hours(6)));
        assert_eq!(Schedule::Every12h.interval(), Some(TimeDelta::hours(12)));
        assert_eq!(Schedule::Daily.interval(), Some(TimeDelta::hours(24)));
        assert_eq!(Schedule::Weekly.interval(), Some(TimeDelta::days(7)));
    }

    #[test]
    fn schedule_parse_rejects_unknown() {
        assert_eq!("every_6h".parse::<Schedule>().unwrap(), Schedule::Every6h);
        for alias in ["1h", "6h", "6hours", "12h", "12hours", "24h", "Daily"] {
            assert!(alias.parse::<Schedule>().is_err(), "{alias}");
        }
        assert_eq!(
            "fortnightly".parse::<Schedule>(),
            Err(CoreError::InvalidScheduleDescriptor("fortnightly".into()))
        );
        for s in [
            Schedule::Manual,
            Schedule::Hourly,
            Schedule::Every6h,
            Schedule::Every12h,
            Schedule::Daily,
            Schedule::Weekly,
        ] {
            assert_eq!(s.as_str().parse::<Schedule>().unwrap(), s);
        }
    }

    #[test]
    fn schedule_serializes_as_descriptor() {
        let json = serde_json::to_string(&Schedule::Every12h).unwrap();
        assert_eq!(json, "\"every_12h\"");
    }

    #[test]
    fn retention_policy_parse() {
        assert_eq!("forever".parse(), Ok(RetentionPolicy::Forever));
        assert_eq!("immediate".parse(), Ok(RetentionPolicy::Immediate));
        assert_eq!("days:30".parse(), Ok(RetentionPolicy::Days(30)));
        assert!("days:0".parse::<RetentionPolicy>().is_err());
        assert!("days:-1".parse::<RetentionPolicy>().is_err());
        assert!("weeks:2".parse::<RetentionPolicy>().is_err());

        let json = serde_json::to_string(&RetentionPolicy::Days(7)).unwrap();
        assert_eq!(json, "\"days:7\"");
    }

    #[test]
    fn job_validation() {
        assert!(Job::new("office", "eth0", "192.168.1.0/24").is_ok());
        assert!(Job::new("", "eth0", "192.168.1.0/24").is_err());
        assert!(Job::new("office", "eth 0", "192.168.1.0/24").is_err());
        assert!(Job::new("office", "eth0", "192.168.1.0").is_err());
        assert!(Job::new("office", "eth0", "fe80::/64").is_err());

        let job = Job::new("office", "eth0", "10.0.0.0/24")
            .unwrap()
            .with_scan_budget(0);
        assert!(job.validate().is_err());
    }

    #[test]
    fn scan_budget_is_capped_at_one_day() {
        let job = Job::new("office", "eth0", "10.0.0.0/24").unwrap();
        assert!(job.clone().with_scan_budget(MAX_SCAN_BUDGET_SECS).validate().is_ok());
        assert!(job
            .clone()
            .with_scan_budget(MAX_SCAN_BUDGET_SECS + 1)
            .validate()
            .is_err());
        assert!(job.with_scan_budget(u64::MAX).validate().is_err());
    }

    #[test]
    fn job_due_rules() {
        let now = Utc::now();
        let mut job = Job::new("office", "eth0", "10.0.0.0/24").unwrap();
        assert!(!job.is_due(now), "manual jobs are never due");

        job.schedule = Schedule::Hourly;
        assert!(job.is_due(now), "missing next_run means due");

        job.next_run = Some(now + TimeDelta::minutes(5));
        assert!(!job.is_due(now));

        job.next_run = Some(now - TimeDelta::minutes(5));
        assert!(job.is_due(now));

        job.status = JobStatus::Running;
        assert!(!job.is_due(now));
    }

    #[test]
    fn run_closes_exactly_once() {
        let start = Utc::now();
        let mut run = JobRun::start(JobId::new(), start);
        assert!(run.is_open());

        let counts = RunCounts {
            devices_found: 2,
            new_devices: 1,
            warnings: 0,
        };
        run.complete(counts, "ok", start + TimeDelta::milliseconds(1500))
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.duration_ms, Some(1500));
        assert_eq!(run.counts, counts);

        assert_eq!(
            run.fail("late", start + TimeDelta::seconds(5)),
            Err(CoreError::RunAlreadyClosed(run.id))
        );
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.error.is_none());
    }

    #[test]
    fn status_strings_roundtrip() {
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert_eq!(DeviceStatus::Inactive.as_str(), "inactive");
        assert_eq!(
            "warning".parse::<NotificationKind>().unwrap(),
            NotificationKind::Warning
        );
        assert!("paused".parse::<JobStatus>().is_err());
    }
}
