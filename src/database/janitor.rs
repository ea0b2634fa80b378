//! Retention janitor
//!
//! Owned by the writer thread. Sweeps are rate-limited by `min_interval`; the
//! last-cleaning time starts at the epoch so the first request always runs.

use crate::storage::{ActivityStore, GcStats};
use crate::types::{DayBucket, Timestamp};
use crate::Result;
use std::time::Duration;
use tracing::info;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub cutoff: Option<DayBucket>,
    pub rows_expired: usize,
    pub gc: GcStats,
}

pub struct Janitor {
    retention: Duration,
    min_interval: Duration,
    last_cleaning_time: Timestamp,
}

impl Janitor {
    pub fn new(retention: Duration, min_interval: Duration) -> Self {
        Self {
            retention,
            min_interval,
            last_cleaning_time: Timestamp::EPOCH,
        }
    }

    pub fn set_retention(&mut self, retention: Duration) {
        self.retention = retention;
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Make the next `maybe_sweep` run regardless of the rate limit.
    pub fn force_cleaning_now(&mut self) {
        self.last_cleaning_time = Timestamp::EPOCH;
    }

    pub fn last_cleaning_time(&self) -> Timestamp {
        self.last_cleaning_time
    }

    /// Sweep if more than `min_interval` passed since the last one.
    pub fn maybe_sweep(&mut self, store: &mut ActivityStore, now: Timestamp) -> Result<Option<SweepStats>> {
        if now.duration_since(self.last_cleaning_time) <= self.min_interval {
            return Ok(None);
        }
        self.last_cleaning_time = now;
        self.sweep(store, now).map(Some)
    }

    /// Expire rows, collect the dictionaries, then checkpoint. Row deletion
    /// always precedes collection.
    pub fn sweep(&mut self, store: &mut ActivityStore, now: Timestamp) -> Result<SweepStats> {
        let cutoff = now.saturating_sub(self.retention).day_bucket();
        let rows_expired = store.expire_before(cutoff)?;
        let gc = store.collect_garbage();
        store.checkpoint()?;

        info!(
            cutoff = %cutoff,
            rows_expired,
            strings_removed = gc.strings_removed,
            urls_removed = gc.urls_removed,
            "retention sweep finished"
        );

        Ok(SweepStats {
            cutoff: Some(cutoff),
            rows_expired,
            gc,
        })
    }
}
