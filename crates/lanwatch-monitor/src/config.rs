//! Configuration for the lanwatch monitor daemon.

use std::time::Duration;

use lanwatch_store::SqliteConfig;
use serde::Deserialize;

/// Top-level monitor configuration.
///
/// Loaded from the `[monitor]` section of `lanwatch.toml` or
/// `LANWATCH_MONITOR__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Path to the arp-scan binary (default: "arp-scan").
    #[serde(default = "default_scanner_path")]
    pub scanner_path: String,

    /// Seconds added to a job's scan budget before the process is killed.
    #[serde(default = "default_scan_grace")]
    pub scan_grace_secs: u64,

    /// Scheduler tick period in seconds.
    #[serde(default = "default_tick")]
    pub tick_secs: u64,

    /// SQLite database URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Upper bound on pooled database connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl MonitorConfig {
    pub fn scan_grace(&self) -> Duration {
        Duration::from_secs(self.scan_grace_secs)
    }

    /// Tick period, never shorter than one second.
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn sqlite(&self) -> SqliteConfig {
        SqliteConfig {
            url: self.database_url.clone(),
            max_connections: self.max_connections,
            ..Default::default()
        }
    }
}

fn default_scanner_path() -> String {
    "arp-scan".to_string()
}

fn default_scan_grace() -> u64 {
    30
}

fn default_tick() -> u64 {
    60
}

fn default_database_url() -> String {
    "sqlite://lanwatch.db".to_string()
}

fn default_max_connections() -> u32 {
    8
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scanner_path: default_scanner_path(),
            scan_grace_secs: default_scan_grace(),
            tick_secs: default_tick(),
            database_url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}
