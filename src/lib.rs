//! actlog - batched, merging, self-expiring activity log store
//!
//! Ingests timestamped extension action records, coalesces duplicates per
//! local day, persists them through a single writer thread, answers filtered
//! historical queries over durable and still-buffered data, enforces a
//! retention window and collects the interning dictionaries.
//!
//! ## Architecture
//! - Types: action records, merge keys, day buckets, injectable clock
//! - Catalog: string / URL interning dictionaries
//! - Storage: merged-row table + journal + snapshot
//! - Database: merge buffer, writer thread, janitor, query engine, `ActivityLog` facade
//!
//! ```ignore
//! let log = ActivityLog::open("/tmp/actlog", ActivityLogConfig::default())?;
//! log.submit(ActionRecord::new("ext", Timestamp::now(), ActionType::ApiCall, "tabs.create"));
//! let today = log.read_data("ext", 0).wait()?;
//! ```

pub mod catalog;
pub mod config;
pub mod database;
pub mod storage;
pub mod types;

mod error;

pub use config::{ActivityLogConfig, DurabilityLevel};
pub use database::{ActionFilter, ActivityLog, QueryHandle, StoreLocation, StoreStats};
pub use error::{Result, StorageError};
pub use types::{ActionRecord, ActionType, ArgValue, Clock, DayBucket, ManualClock, SystemClock, Timestamp};
