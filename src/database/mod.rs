//! Database module
//!
//! # Module Structure
//! - `core`: `ActivityLog` facade, open/close, caller-facing operations
//! - `mem_buffer`: merge buffer shared by callers and the writer
//! - `writer`: the single writer thread and its task queue
//! - `persistence`: flush, URL scrub, sweep and shutdown on the writer
//! - `janitor`: rate-limited retention sweep
//! - `query`: filters and the buffer + store read path

pub mod core;
pub mod janitor;
pub mod mem_buffer;
mod persistence;
pub mod query;
mod writer;

pub use self::core::{ActivityLog, QueryHandle, StoreLocation, StoreStats};
pub use janitor::{Janitor, SweepStats};
pub use mem_buffer::{Batch, MergeBuffer};
pub use query::ActionFilter;
