//! Storage layer implementation
//!
//! Merged rows and dictionaries live in memory; durability comes from an
//! append-only journal plus periodic snapshots.

pub mod checksum;
pub mod journal;
pub mod snapshot;
pub mod store;
pub mod table;

pub use checksum::{Checksum, ChecksumError};
pub use journal::{Journal, JournalRecord};
pub use store::{ActivityStore, GcStats};
pub use table::{ActivityTable, PersistedRow, StoredKey};
