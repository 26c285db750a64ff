use thiserror::Error;

use crate::types::RunId;

/// Errors raised while building or validating lanwatch domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid MAC address: {0}")]
    InvalidMacAddress(String),

    #[error("Invalid schedule descriptor: {0}")]
    InvalidScheduleDescriptor(String),

    #[error("Invalid retention policy: {0}")]
    InvalidRetentionPolicy(String),

    #[error("Invalid {kind} value: {value}")]
    InvalidEnumValue { kind: &'static str, value: String },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job run {0} is already closed")]
    RunAlreadyClosed(RunId),
}
