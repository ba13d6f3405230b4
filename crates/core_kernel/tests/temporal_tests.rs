//! Unit tests for the billing calendar
//!
//! Tests cover half-open periods, cycle layout from an anchor date,
//! month-end anchors, and closed-period enumeration.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use core_kernel::{midnight_utc, BillingCycle, BillingPeriod, TemporalError};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32) -> chrono::DateTime<Utc> {
    midnight_utc(date(y, m, d))
}

mod billing_period {
    use super::*;

    #[test]
    fn test_boundary_instant_belongs_to_next_period() {
        let january = BillingPeriod::new(at(2024, 1, 1), at(2024, 2, 1)).unwrap();
        let february = BillingPeriod::new(at(2024, 2, 1), at(2024, 3, 1)).unwrap();
        let boundary = at(2024, 2, 1);

        assert!(!january.contains(boundary));
        assert!(february.contains(boundary));
    }

    #[test]
    fn test_inverted_period_rejected() {
        let result = BillingPeriod::new(at(2024, 2, 1), at(2024, 1, 1));
        assert!(matches!(result, Err(TemporalError::InvalidPeriod { .. })));
    }

    #[test]
    fn test_intersect_clips_to_period() {
        let january = BillingPeriod::new(at(2024, 1, 1), at(2024, 2, 1)).unwrap();
        let window = january.intersect(at(2024, 1, 10), at(2024, 3, 1)).unwrap();
        assert_eq!(window.start(), at(2024, 1, 10));
        assert_eq!(window.end(), at(2024, 2, 1));
        assert!(january.intersect(at(2024, 2, 1), at(2024, 3, 1)).is_none());
    }

    #[test]
    fn test_ceil_days() {
        let january = BillingPeriod::new(at(2024, 1, 1), at(2024, 2, 1)).unwrap();
        assert_eq!(january.ceil_days(), 31);

        let start = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let partial = BillingPeriod::new(start, at(2024, 2, 1)).unwrap();
        assert_eq!(partial.ceil_days(), 22);

        let one_second = BillingPeriod::new(start, start + Duration::seconds(1)).unwrap();
        assert_eq!(one_second.ceil_days(), 1);
    }
}

mod billing_cycle {
    use super::*;

    #[test]
    fn test_leap_february() {
        let february = BillingCycle::Monthly.period_at(date(2024, 1, 1), 1).unwrap();
        assert_eq!(february.ceil_days(), 29);
    }

    #[test]
    fn test_annual_cycle() {
        let period = BillingCycle::Annual
            .period_containing(date(2023, 7, 1), at(2024, 3, 15))
            .unwrap();
        assert_eq!(period.start(), at(2023, 7, 1));
        assert_eq!(period.end(), at(2024, 7, 1));
    }

    #[test]
    fn test_month_end_anchor_around_february() {
        let anchor = date(2024, 1, 31);
        let period = BillingCycle::Monthly
            .period_containing(anchor, at(2024, 3, 1))
            .unwrap();
        assert_eq!(period.start(), at(2024, 2, 29));
        assert_eq!(period.end(), at(2024, 3, 31));
    }

    #[test]
    fn test_instant_before_anchor_maps_to_first_period() {
        let period = BillingCycle::Monthly
            .period_containing(date(2024, 1, 15), at(2023, 12, 1))
            .unwrap();
        assert_eq!(period.start(), at(2024, 1, 15));
    }

    #[test]
    fn test_closed_periods_resume_after_watermark() {
        let periods = BillingCycle::Monthly
            .closed_periods_between(date(2024, 1, 1), at(2024, 2, 1), at(2024, 4, 1))
            .unwrap();
        let starts: Vec<_> = periods.iter().map(|p| p.start()).collect();
        assert_eq!(starts, vec![at(2024, 2, 1), at(2024, 3, 1)]);
    }

    #[test]
    fn test_no_closed_periods_before_first_end() {
        let periods = BillingCycle::Quarterly
            .closed_periods_between(date(2024, 1, 1), at(2024, 1, 1), at(2024, 3, 31))
            .unwrap();
        assert!(periods.is_empty());
    }

    #[test]
    fn test_consecutive_periods_tile_without_gaps() {
        let anchor = date(2024, 1, 31);
        for index in 0..24 {
            let current = BillingCycle::Monthly.period_at(anchor, index).unwrap();
            let next = BillingCycle::Monthly.period_at(anchor, index + 1).unwrap();
            assert_eq!(current.end(), next.start());
        }
    }
}
