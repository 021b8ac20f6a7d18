use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("end time {end} must be strictly after start time {start}")]
pub struct EmptyWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A half-open `[start, end)` UTC interval with `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EmptyWindow> {
        if end <= start {
            return Err(EmptyWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.format("%Y-%m-%dT%H:%MZ"),
            self.end.format("%Y-%m-%dT%H:%MZ")
        )
    }
}

pub fn overlaps(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && start2 < end1
}

/// `[00:00, next 00:00)` of a UTC calendar date.
pub fn utc_day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}
