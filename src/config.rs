//! Activity log configuration and durability levels
//!
//! Provides the tunables for batching, retention and journal fsync policy.

use crate::types::{ActionType, ArgPolicy, StrippedApi};
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Durability level of the journal
///
/// Trades safety of the most recent flushes against write cost:
/// - Synchronous: every journal append is fsynced before the flush is applied
/// - NoSync: appends only reach the OS buffers (tests and benchmarks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurabilityLevel {
    /// fsync after every journal entry.
    ///
    /// A flush that returned is on disk. One fsync per batch, not per record,
    /// so the cost is amortized over up to `flush_threshold` entries.
    Synchronous,

    /// Never fsync the journal.
    ///
    /// A crash can lose flushes the OS had not written back yet. Snapshots are
    /// still fsynced before they replace the previous one.
    NoSync,
}

impl Default for DurabilityLevel {
    fn default() -> Self {
        DurabilityLevel::Synchronous
    }
}

impl DurabilityLevel {
    pub fn requires_immediate_sync(&self) -> bool {
        matches!(self, Self::Synchronous)
    }

    pub fn is_no_sync(&self) -> bool {
        matches!(self, Self::NoSync)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Synchronous => "synchronous (fsync per flush)",
            Self::NoSync => "no sync (testing only)",
        }
    }
}

/// Activity log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityLogConfig {
    /// Maximum number of distinct merge keys held in memory before a flush is handed off
    pub flush_threshold: usize,

    /// Buffered entries older than this are flushed by the writer's timer (milliseconds)
    pub flush_interval_ms: u64,

    /// Initial retention window in days
    pub retention_days: u64,

    /// Minimum spacing between two rate-limited sweeps (milliseconds)
    pub min_sweep_interval_ms: u64,

    /// Journal fsync policy
    pub durability: DurabilityLevel,

    /// APIs whose arguments are dropped before merging
    pub stripped_apis: Vec<StrippedApi>,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 200,
            flush_interval_ms: 2 * 60 * 1000,
            retention_days: 90,
            min_sweep_interval_ms: 12 * 60 * 60 * 1000,
            durability: DurabilityLevel::default(),
            stripped_apis: default_stripped_apis(),
        }
    }
}

/// Connection APIs whose arguments carry message payloads.
pub fn default_stripped_apis() -> Vec<StrippedApi> {
    vec![
        StrippedApi::api_call("extension.connect"),
        StrippedApi::api_call("runtime.connect"),
        StrippedApi::api_call("extension.sendRequest"),
    ]
}

impl ActivityLogConfig {
    /// Preset for tests: no fsync and a timer long enough that flushes only
    /// happen when the test asks for them.
    pub fn for_testing() -> Self {
        Self {
            flush_interval_ms: 60 * 60 * 1000,
            durability: DurabilityLevel::NoSync,
            ..Default::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: ActivityLogConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold == 0 {
            return Err(StorageError::InvalidArgument(
                "flush_threshold must be at least 1".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(StorageError::InvalidArgument(
                "flush_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_stripped_api(mut self, action_type: ActionType, api_name: &str) -> Self {
        self.stripped_apis.push(StrippedApi {
            action_type,
            api_name: api_name.to_string(),
        });
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }

    pub fn min_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.min_sweep_interval_ms)
    }

    pub fn arg_policy(&self) -> ArgPolicy {
        ArgPolicy::new(&self.stripped_apis)
    }
}
