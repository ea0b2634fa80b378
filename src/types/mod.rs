//! Record, key and time types

mod action;
mod clock;
mod key;
mod timestamp;

pub use action::{ActionRecord, ActionType, ArgValue};
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{canonical_args, normalize_url, normalize_url_str, ArgPolicy, MergeKey, MergeValue, StrippedApi};
pub use timestamp::{DayBucket, Timestamp};

/// Row identifier in the persistent table
pub type RowId = u64;
