//! Billing calendar types
//!
//! This module provides the half-open [`BillingPeriod`] used by every
//! aggregation and invoice, and [`BillingCycle`] which lays out a client's
//! period boundaries from an anchor date.
//!
//! Boundaries are always computed as `anchor + k * cycle_months` rather than by
//! repeatedly stepping from the previous boundary, so a 31st-of-month anchor
//! does not drift to the 28th after February.

use chrono::{DateTime, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SECONDS_PER_DAY: i64 = 86_400;

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid period: start {start} must be before end {end}")]
    InvalidPeriod { start: String, end: String },

    #[error("Unknown billing cycle: {0}")]
    UnknownCycle(String),

    #[error("Date out of supported range")]
    OutOfRange,
}

/// A half-open time interval `[start, end)`
///
/// An event at exactly `end` belongs to the next period, which is what
/// prevents boundary events from being counted twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingPeriod {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl BillingPeriod {
    /// Creates a new period, rejecting empty or inverted intervals
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TemporalError> {
        if start >= end {
            return Err(TemporalError::InvalidPeriod {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Creates a period from whole dates, both at midnight UTC
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Result<Self, TemporalError> {
        Self::new(midnight_utc(start), midnight_utc(end))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns true if the instant falls within `[start, end)`
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Returns the overlap with another interval, if any
    pub fn intersect(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<BillingPeriod> {
        let start = start.max(self.start);
        let end = end.min(self.end);
        BillingPeriod::new(start, end).ok()
    }

    /// Length of the period in days, counting any started day as a full day
    pub fn ceil_days(&self) -> i64 {
        let seconds = (self.end - self.start).num_seconds();
        (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// The recurring period on which a client is invoiced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Annual,
}

impl BillingCycle {
    /// Number of calendar months in one cycle
    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Quarterly => 3,
            BillingCycle::Annual => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Quarterly => "quarterly",
            BillingCycle::Annual => "annual",
        }
    }

    /// Returns the `index`-th period counted from the anchor date
    pub fn period_at(&self, anchor: NaiveDate, index: u32) -> Result<BillingPeriod, TemporalError> {
        let start_months = index
            .checked_mul(self.months())
            .ok_or(TemporalError::OutOfRange)?;
        let end_months = start_months
            .checked_add(self.months())
            .ok_or(TemporalError::OutOfRange)?;
        let start = anchor
            .checked_add_months(Months::new(start_months))
            .ok_or(TemporalError::OutOfRange)?;
        let end = anchor
            .checked_add_months(Months::new(end_months))
            .ok_or(TemporalError::OutOfRange)?;
        BillingPeriod::from_dates(start, end)
    }

    /// Returns the period containing `instant`, or the first period if the
    /// instant precedes the anchor
    pub fn period_containing(
        &self,
        anchor: NaiveDate,
        instant: DateTime<Utc>,
    ) -> Result<BillingPeriod, TemporalError> {
        let date = instant.date_naive();
        if date < anchor {
            return self.period_at(anchor, 0);
        }
        let elapsed_months = month_index(date) - month_index(anchor);
        let mut index = u32::try_from(elapsed_months / i64::from(self.months()))
            .map_err(|_| TemporalError::OutOfRange)?;

        // Month arithmetic can land one period early or late around short months
        loop {
            let period = self.period_at(anchor, index)?;
            if instant < period.start() && index > 0 {
                index -= 1;
            } else if instant >= period.end() {
                index += 1;
            } else {
                return Ok(period);
            }
        }
    }

    /// Returns every complete period that starts at or after `from` and ends
    /// at or before `now`, in chronological order
    pub fn closed_periods_between(
        &self,
        anchor: NaiveDate,
        from: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillingPeriod>, TemporalError> {
        let mut periods = Vec::new();
        let mut period = self.period_containing(anchor, from)?;
        if period.start() < from {
            period = self.next_after(anchor, period)?;
        }
        while period.end() <= now {
            periods.push(period);
            period = self.next_after(anchor, period)?;
        }
        Ok(periods)
    }

    fn next_after(&self, anchor: NaiveDate, period: BillingPeriod) -> Result<BillingPeriod, TemporalError> {
        self.period_containing(anchor, period.end())
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = TemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingCycle::Monthly),
            "quarterly" => Ok(BillingCycle::Quarterly),
            "annual" => Ok(BillingCycle::Annual),
            other => Err(TemporalError::UnknownCycle(other.to_string())),
        }
    }
}

/// Midnight UTC at the start of `date`
pub fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

fn month_index(date: NaiveDate) -> i64 {
    use chrono::Datelike;
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_period_is_half_open() {
        let period = BillingPeriod::from_dates(date(2024, 1, 1), date(2024, 2, 1)).unwrap();
        assert!(period.contains(midnight_utc(date(2024, 1, 1))));
        assert!(!period.contains(midnight_utc(date(2024, 2, 1))));
    }

    #[test]
    fn test_empty_period_rejected() {
        let result = BillingPeriod::from_dates(date(2024, 1, 1), date(2024, 1, 1));
        assert!(matches!(result, Err(TemporalError::InvalidPeriod { .. })));
    }

    #[test]
    fn test_ceil_days_counts_partial_days() {
        let start = midnight_utc(date(2024, 1, 10));
        let period = BillingPeriod::new(start, start + chrono::Duration::hours(25)).unwrap();
        assert_eq!(period.ceil_days(), 2);
    }

    #[test]
    fn test_monthly_periods_do_not_drift_from_month_end_anchor() {
        let anchor = date(2024, 1, 31);
        let feb = BillingCycle::Monthly.period_at(anchor, 1).unwrap();
        let mar = BillingCycle::Monthly.period_at(anchor, 2).unwrap();
        assert_eq!(feb.start(), midnight_utc(date(2024, 2, 29)));
        assert_eq!(mar.start(), midnight_utc(date(2024, 3, 31)));
    }

    #[test]
    fn test_period_containing() {
        let anchor = date(2024, 1, 15);
        let period = BillingCycle::Quarterly
            .period_containing(anchor, midnight_utc(date(2024, 5, 1)))
            .unwrap();
        assert_eq!(period.start(), midnight_utc(date(2024, 4, 15)));
        assert_eq!(period.end(), midnight_utc(date(2024, 7, 15)));
    }

    #[test]
    fn test_closed_periods_between() {
        let anchor = date(2024, 1, 1);
        let periods = BillingCycle::Monthly
            .closed_periods_between(
                anchor,
                midnight_utc(date(2024, 1, 1)),
                midnight_utc(date(2024, 3, 10)),
            )
            .unwrap();
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[1].end(), midnight_utc(date(2024, 3, 1)));
    }

    #[test]
    fn test_cycle_parsing() {
        assert_eq!("annual".parse::<BillingCycle>().unwrap(), BillingCycle::Annual);
        assert!("weekly".parse::<BillingCycle>().is_err());
    }
}
