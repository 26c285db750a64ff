use lanwatch_core::{JobId, MacAddr, RunId};

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite connection error: {0}")]
    Connection(String),

    #[error("SQLite query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Device {mac} is already known to job {job_id}")]
    DuplicateDevice { job_id: JobId, mac: MacAddr },

    #[error("Device {mac} is not known to job {job_id}")]
    UnknownDevice { job_id: JobId, mac: MacAddr },

    #[error("Corrupt {table} row: {reason}")]
    Decode { table: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
