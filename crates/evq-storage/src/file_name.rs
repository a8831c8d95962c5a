//! Batch file names.
//!
//! A batch file is named after its creation time as base-10 nanoseconds
//! since the Unix epoch, so lexical order within equal-length names and
//! numeric order both follow creation order.

use chrono::{DateTime, TimeZone, Utc};

/// File name for a batch created at `date`. Dates before the epoch map to `0`.
pub fn file_name_from(date: DateTime<Utc>) -> String {
    nanos_since_epoch(date).to_string()
}

/// Creation date encoded in `name`. Names that do not parse are treated as
/// created at the epoch, which makes them the oldest files in a directory.
pub fn creation_date_from(name: &str) -> DateTime<Utc> {
    let nanos = name.parse::<u64>().unwrap_or(0);
    date_from_nanos(nanos)
}

pub(crate) fn nanos_since_epoch(date: DateTime<Utc>) -> u64 {
    date.timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}

pub(crate) fn date_from_nanos(nanos: u64) -> DateTime<Utc> {
    let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
    Utc.timestamp_nanos(nanos)
}
