//! Core data types used throughout the tracker
//!
//! # Key Types
//!
//! - **`EntityId`**: the tracked entity, used directly as a bit offset
//! - **`Granularity`**: one of the four calendar bucket sizes
//! - **`CalendarCoordinates`**: the calendar fields of a UTC instant
//! - **`BitOperator`**: boolean operator for composite bitmaps
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use tracklist::types::CalendarCoordinates;
//!
//! // 2024-12-30 is a Monday that belongs to ISO week 1 of 2025
//! let at = Utc.with_ymd_and_hms(2024, 12, 30, 15, 0, 0).unwrap();
//! let coords = CalendarCoordinates::from(at);
//! assert_eq!((coords.year, coords.month, coords.day, coords.hour), (2024, 12, 30, 15));
//! assert_eq!((coords.iso_year, coords.iso_week), (2025, 1));
//! ```

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a tracked entity
///
/// Interpreted as a bit offset, so the same id lands on the same bit in every
/// bucket and boolean combinations line up. Redis bit offsets are limited to
/// 2^32 - 1, which is exactly the range of `u32`.
pub type EntityId = u32;

/// Calendar granularity of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Calendar month
    Month,
    /// ISO-8601 week
    Week,
    /// Calendar day
    Day,
    /// Hour of day
    Hour,
}

impl Granularity {
    /// All granularities, coarsest first
    pub const ALL: [Granularity; 4] = [
        Granularity::Month,
        Granularity::Week,
        Granularity::Day,
        Granularity::Hour,
    ];

    /// Lowercase name as used in query strings
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Month => "month",
            Granularity::Week => "week",
            Granularity::Day => "day",
            Granularity::Hour => "hour",
        }
    }

    /// Start of the bucket containing `at`
    ///
    /// Weeks start on Monday, as in the ISO calendar.
    pub fn truncate(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = at.date_naive();
        let start = match self {
            Granularity::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?
                .and_hms_opt(0, 0, 0)?,
            Granularity::Week => {
                let offset = date.weekday().num_days_from_monday() as i64;
                date.checked_sub_signed(Duration::days(offset))?
                    .and_hms_opt(0, 0, 0)?
            },
            Granularity::Day => date.and_hms_opt(0, 0, 0)?,
            Granularity::Hour => date.and_hms_opt(at.hour(), 0, 0)?,
        };
        Some(Utc.from_utc_datetime(&start))
    }

    /// Move `start` forward by `n` buckets
    ///
    /// `start` should already be truncated; month arithmetic clamps day-of-month
    /// otherwise.
    pub fn advance(&self, start: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
        match self {
            Granularity::Month => start.checked_add_months(Months::new(n)),
            Granularity::Week => start.checked_add_signed(Duration::weeks(n as i64)),
            Granularity::Day => start.checked_add_signed(Duration::days(n as i64)),
            Granularity::Hour => start.checked_add_signed(Duration::hours(n as i64)),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "month" => Ok(Granularity::Month),
            "week" => Ok(Granularity::Week),
            "day" => Ok(Granularity::Day),
            "hour" => Ok(Granularity::Hour),
            other => Err(Error::InvalidArgument(format!(
                "unknown unit '{}', expected one of month, week, day, hour",
                other
            ))),
        }
    }
}

/// Calendar fields of a UTC instant
///
/// The ISO week is paired with its own week-year, which differs from the
/// calendar year around new year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalendarCoordinates {
    /// Calendar year
    pub year: i32,
    /// Month, 1-12
    pub month: u32,
    /// Day of month, 1-31
    pub day: u32,
    /// Hour of day, 0-23
    pub hour: u32,
    /// ISO week number, 1-53
    pub iso_week: u32,
    /// ISO week-numbering year
    pub iso_year: i32,
}

impl From<DateTime<Utc>> for CalendarCoordinates {
    fn from(at: DateTime<Utc>) -> Self {
        let week = at.iso_week();
        Self {
            year: at.year(),
            month: at.month(),
            day: at.day(),
            hour: at.hour(),
            iso_week: week.week(),
            iso_year: week.year(),
        }
    }
}

/// Boolean operator of a composite bitmap
///
/// The string form is the BITOP operation name sent to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BitOperator {
    /// Intersection
    And,
    /// Union
    Or,
    /// Symmetric difference
    Xor,
    /// Complement of a single operand
    Not,
}

impl BitOperator {
    /// BITOP operation name
    pub fn as_str(&self) -> &'static str {
        match self {
            BitOperator::And => "AND",
            BitOperator::Or => "OR",
            BitOperator::Xor => "XOR",
            BitOperator::Not => "NOT",
        }
    }

    /// Whether operand order is irrelevant to the result
    pub fn is_commutative(&self) -> bool {
        !matches!(self, BitOperator::Not)
    }
}

impl fmt::Display for BitOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BitOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(BitOperator::And),
            "OR" => Ok(BitOperator::Or),
            "XOR" => Ok(BitOperator::Xor),
            "NOT" => Ok(BitOperator::Not),
            _ => Err(Error::InvalidArgument(format!("unknown bit operator '{}'", s))),
        }
    }
}
