//! Cohort retention built from bucket intersections
//!
//! A cohort is everyone present in one bucket. Its retention after `k` periods
//! is the size of the intersection of that bucket with the bucket `k` periods
//! later:
//!
//! ```text
//!             size   +1    +2    +3
//! 2024-1      1200   640   512   480     AND(2024-1, 2024-2).count() = 640
//! 2024-2       980   511   430     0
//! ```
//!
//! Intersections go through [`crate::bitop::and`], so they are stored as
//! composites and overwritten by the next report that needs the same cell.
//! Bulk deletion removes them together with the buckets.

use crate::bitop;
use crate::error::{Error, Result};
use crate::keys::validate_metric_name;
use crate::tracker::Tracker;
use crate::types::Granularity;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

/// Most cohort periods a single report may cover
pub const MAX_COHORTS: usize = 1000;

/// Most follow-up periods per cohort
pub const MAX_INTERVAL: u32 = 1000;

/// Most intersections a single report may compute
pub const MAX_CELLS: usize = 20_000;

/// Parameters of a retention report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionQuery {
    /// Metric to report on
    pub name: String,
    /// Bucket size of cohorts and follow-up periods
    pub unit: Granularity,
    /// Number of follow-up periods per cohort
    pub interval: u32,
    /// First day whose bucket starts a cohort
    pub from_date: NaiveDate,
    /// Last day whose bucket starts a cohort, inclusive
    pub to_date: NaiveDate,
}

impl RetentionQuery {
    /// Start instants of every cohort, after validating the query
    ///
    /// The first cohort is the bucket containing midnight of `from_date`; the
    /// last is the bucket containing the final hour of `to_date`.
    pub fn cohort_starts(&self) -> Result<Vec<DateTime<Utc>>> {
        validate_metric_name(&self.name)?;

        if self.to_date < self.from_date {
            return Err(Error::InvalidArgument(format!(
                "to_date {} is before from_date {}",
                self.to_date, self.from_date
            )));
        }
        if self.interval > MAX_INTERVAL {
            return Err(Error::InvalidArgument(format!(
                "interval {} exceeds {}",
                self.interval, MAX_INTERVAL
            )));
        }

        let first = self
            .from_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt))
            .and_then(|dt| self.unit.truncate(dt))
            .ok_or_else(|| out_of_range(self.from_date))?;
        let last = self
            .to_date
            .and_hms_opt(23, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt))
            .and_then(|dt| self.unit.truncate(dt))
            .ok_or_else(|| out_of_range(self.to_date))?;

        let mut starts = Vec::new();
        let mut step = 0u32;
        loop {
            let start = self
                .unit
                .advance(first, step)
                .ok_or_else(|| out_of_range(self.to_date))?;
            if start > last {
                break;
            }
            if starts.len() == MAX_COHORTS {
                return Err(Error::InvalidArgument(format!(
                    "date range spans more than {} {} periods",
                    MAX_COHORTS, self.unit
                )));
            }
            starts.push(start);
            step += 1;
        }

        let cells = starts.len() * self.interval as usize;
        if cells > MAX_CELLS {
            return Err(Error::InvalidArgument(format!(
                "{} cohorts x {} periods exceeds {} intersections",
                starts.len(),
                self.interval,
                MAX_CELLS
            )));
        }

        Ok(starts)
    }
}

fn out_of_range(date: NaiveDate) -> Error {
    Error::InvalidArgument(format!("date {} is out of range", date))
}

/// Retention of one cohort
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CohortRetention {
    /// Start of the cohort bucket
    pub start: DateTime<Utc>,
    /// Store key of the cohort bucket
    pub key: String,
    /// Entities present in the cohort bucket
    pub size: i64,
    /// Entities of the cohort still present 1, 2, ... `interval` periods later
    pub retained: Vec<i64>,
}

/// Result of a retention query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    /// Metric reported on
    pub name: String,
    /// Bucket size used
    pub unit: Granularity,
    /// Follow-up periods per cohort
    pub interval: u32,
    /// One row per cohort, oldest first
    pub cohorts: Vec<CohortRetention>,
}

impl Tracker {
    /// Compute a cohort retention report
    ///
    /// Empty cohorts are reported with zero retention without touching the
    /// store for their intersections.
    pub async fn retention(&self, query: &RetentionQuery) -> Result<RetentionReport> {
        let starts = query.cohort_starts()?;
        let mut cohorts = Vec::with_capacity(starts.len());

        for start in starts {
            let cohort = self.bucket(&query.name, query.unit, start)?;
            let size = cohort.count().await?;

            let mut retained = Vec::with_capacity(query.interval as usize);
            for k in 1..=query.interval {
                if size == 0 {
                    retained.push(0);
                    continue;
                }
                let later = query
                    .unit
                    .advance(start, k)
                    .ok_or_else(|| out_of_range(query.to_date))?;
                let follow_up = self.bucket(&query.name, query.unit, later)?;
                let both = bitop::and(&[cohort.clone(), follow_up]).await?;
                retained.push(both.count().await?);
            }

            cohorts.push(CohortRetention {
                start,
                key: cohort.key().to_string(),
                size,
                retained,
            });
        }

        debug!(
            metric = %query.name,
            unit = %query.unit,
            cohorts = cohorts.len(),
            "retention report computed"
        );

        Ok(RetentionReport {
            name: query.name.clone(),
            unit: query.unit,
            interval: query.interval,
            cohorts,
        })
    }
}
