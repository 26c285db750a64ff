//! lanwatch-monitor: scheduled LAN device monitoring.
//!
//! Drives arp-scan against each job's interface and subnet, reconciles the
//! devices it reports against the job's known devices, and records runs,
//! sightings and notifications through a `DeviceStore`.

pub mod config;
pub mod error;
pub mod monitor;
pub mod reconcile;
pub mod retention;
pub mod runner;
pub mod scan_output;
pub mod scanner;
pub mod scheduler;

pub use error::{MonitorError, Result};
pub use monitor::Monitor;
