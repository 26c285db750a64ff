//! Retention policy enforcement.
//!
//! Pruning only ever touches inactive devices of the job being run; it is
//! applied by the store inside the run's commit, after the device writes.

use chrono::{DateTime, TimeDelta, Utc};

use lanwatch_core::RetentionPolicy;
use lanwatch_store::Prune;

/// Translate a job's retention policy into the prune applied by a run that
/// started at `run_time`.
pub fn prune_for(policy: RetentionPolicy, run_time: DateTime<Utc>) -> Prune {
    match policy {
        RetentionPolicy::Forever => Prune::Nothing,
        RetentionPolicy::Immediate => Prune::AllInactive,
        RetentionPolicy::Days(days) => {
            Prune::InactiveBefore(run_time - TimeDelta::days(i64::from(days)))
        }
    }
}
