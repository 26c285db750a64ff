//! lanwatch-store: persistence for monitoring jobs and their device state.
//!
//! The monitor only talks to the [`DeviceStore`] trait. [`SqliteStore`] is
//! the durable backend; [`MemoryStore`] keeps everything in process and is
//! what the tests and throwaway daemons use.

pub mod client;
pub mod error;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod store;

pub use client::{SqliteConfig, SqliteStore};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use store::{DeviceStore, NotificationQuery, Prune, RunCommit};
