//! Timestamp and day-bucket types

use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MICROS_PER_SEC: i64 = 1_000_000;

/// Microseconds since the Unix epoch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    /// The Unix epoch. Used as "never" for the janitor's last sweep time.
    pub const EPOCH: Timestamp = Timestamp { micros: 0 };

    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub fn from_millis(millis: i64) -> Self {
        Self {
            micros: millis * 1000,
        }
    }

    pub fn from_secs(secs: i64) -> Self {
        Self {
            micros: secs * MICROS_PER_SEC,
        }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let micros = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_micros() as i64,
            Err(e) => -(e.duration().as_micros() as i64),
        };
        Self { micros }
    }

    pub fn as_micros(&self) -> i64 {
        self.micros
    }

    pub fn as_millis(&self) -> i64 {
        self.micros / 1000
    }

    pub fn as_secs(&self) -> i64 {
        self.micros / MICROS_PER_SEC
    }

    /// This instant in the local time zone.
    pub fn to_local(&self) -> DateTime<Local> {
        let secs = self.micros.div_euclid(MICROS_PER_SEC);
        let nanos = (self.micros.rem_euclid(MICROS_PER_SEC) * 1000) as u32;
        match Local.timestamp_opt(secs, nanos) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => DateTime::<Local>::from(UNIX_EPOCH),
        }
    }

    pub fn from_local(dt: &DateTime<Local>) -> Self {
        Self {
            micros: dt.timestamp_micros(),
        }
    }

    /// Local calendar day containing this instant
    pub fn day_bucket(&self) -> DayBucket {
        DayBucket(self.to_local().date_naive().num_days_from_ce())
    }

    /// Start of the local day containing this instant
    pub fn local_midnight(&self) -> Timestamp {
        self.day_bucket().start()
    }

    pub fn saturating_sub(&self, d: Duration) -> Timestamp {
        Timestamp {
            micros: self.micros.saturating_sub(d.as_micros() as i64),
        }
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let delta = self.micros.saturating_sub(earlier.micros);
        if delta <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(delta as u64)
        }
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp {
            micros: self.micros.saturating_add(rhs.as_micros() as i64),
        }
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_local().format("%Y-%m-%d %H:%M:%S%.6f %:z"))
    }
}

/// A local calendar day, counted in days since the common era.
///
/// Buckets are plain integers so `today - n` is calendar arithmetic and never
/// drifts across DST transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayBucket(pub i32);

impl DayBucket {
    /// Bucket `days` earlier, clamped at the smallest representable day.
    pub fn days_before(&self, days: u32) -> DayBucket {
        let days = i32::try_from(days).unwrap_or(i32::MAX);
        DayBucket(self.0.saturating_sub(days))
    }

    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_num_days_from_ce_opt(self.0)
    }

    /// First instant of this day in local time.
    pub fn start(&self) -> Timestamp {
        let Some(date) = self.date() else {
            return Timestamp::EPOCH;
        };
        // Some zones skip local midnight on DST days; take the first hour that exists.
        for hour in 0..3 {
            let naive = date.and_time(NaiveTime::MIN) + chrono::Duration::hours(hour);
            if let Some(dt) = naive.and_local_timezone(Local).earliest() {
                return Timestamp::from_local(&dt);
            }
        }
        Timestamp::EPOCH
    }
}

impl fmt::Display for DayBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date() {
            Some(date) => write!(f, "{}", date),
            None => write!(f, "day#{}", self.0),
        }
    }
}
