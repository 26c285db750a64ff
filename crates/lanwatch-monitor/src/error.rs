//! Error types for the lanwatch-monitor crate.

use lanwatch_core::{CoreError, JobId};
use lanwatch_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Job {0} is already running")]
    AlreadyRunning(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("A scan is already in progress on this scanner")]
    ScanInProgress,

    #[error("Scan timed out after {secs}s")]
    ScanTimeout { secs: u64 },

    #[error("Scanner exited with code {code}: {stderr}")]
    ScanProcessFailed { code: i32, stderr: String },

    #[error("Scanner not found at path: {path}")]
    ScannerNotFound { path: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[source] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for MonitorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(id) => Self::JobNotFound(id),
            other => Self::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
