//! lanwatch-core: Shared domain types and error handling for lanwatch.
//!
//! This crate provides the types every other lanwatch component agrees on:
//! - Monitoring jobs with their schedule, retention and notification settings
//! - Job runs, known devices, history samples and notifications
//! - The validated, normalised `MacAddr` used as the device key
//! - Common error types

pub mod error;
pub mod mac;
pub mod types;

pub use error::CoreError;
pub use mac::MacAddr;
pub use types::*;
