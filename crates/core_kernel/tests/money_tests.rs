//! Unit tests for the Money module
//!
//! Tests cover scale normalisation, minor-unit conversion, half-up rounding,
//! currency safety, and tax rates.

use core_kernel::{Currency, Money, MoneyError, Rate, MONEY_SCALE};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn usd(amount: Decimal) -> Money {
    Money::new(amount, Currency::USD)
}

mod creation {
    use super::*;

    #[test]
    fn test_new_keeps_four_decimal_places() {
        let m = usd(dec!(0.0125));
        assert_eq!(m.amount(), dec!(0.0125));
        assert_eq!(m.amount().scale(), MONEY_SCALE);
    }

    #[test]
    fn test_new_rounds_beyond_internal_scale() {
        assert_eq!(usd(dec!(0.00125)).amount(), dec!(0.0012));
        assert_eq!(usd(dec!(0.00135)).amount(), dec!(0.0014));
    }

    #[test]
    fn test_zero_yen_has_no_minor_unit() {
        let yen = Money::from_minor(1500, Currency::JPY);
        assert_eq!(yen.amount(), dec!(1500));
        assert_eq!(yen.to_minor().unwrap(), 1500);
    }

    #[test]
    fn test_display_uses_minor_unit_precision() {
        assert_eq!(usd(dec!(7.56)).to_string(), "$ 7.56");
        assert_eq!(Money::new(dec!(12), Currency::EUR).to_string(), "€ 12.00");
    }
}

mod rounding {
    use super::*;

    #[test]
    fn test_sub_cent_costs_accumulate_before_rounding() {
        let per_event = usd(dec!(0.0075));
        let total = Money::sum(Currency::USD, &[per_event, per_event, per_event]).unwrap();
        assert_eq!(total.amount(), dec!(0.0225));
        assert_eq!(total.round_half_up(), usd(dec!(0.02)));
    }

    #[test]
    fn test_whole_minor_detection() {
        assert!(usd(dec!(1.20)).is_whole_minor());
        assert!(!usd(dec!(1.2001)).is_whole_minor());
    }

    #[test]
    fn test_to_minor_rounds_first() {
        assert_eq!(usd(dec!(0.015)).to_minor().unwrap(), 2);
        assert_eq!(usd(dec!(-0.015)).to_minor().unwrap(), -2);
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_add_and_subtract() {
        let a = usd(dec!(5.40));
        let b = usd(dec!(7.56));
        assert_eq!(a.checked_add(&b).unwrap(), usd(dec!(12.96)));
        assert_eq!(a.checked_sub(&b).unwrap(), usd(dec!(-2.16)));
    }

    #[test]
    fn test_proration_by_days() {
        let fee = usd(dec!(5.00));
        let prorated = fee.multiply(dec!(22)).unwrap().divide(dec!(31)).unwrap();
        assert_eq!(prorated.round_half_up(), usd(dec!(3.55)));
    }

    #[test]
    fn test_divide_by_zero() {
        assert_eq!(usd(dec!(1)).divide(Decimal::ZERO), Err(MoneyError::DivisionByZero));
    }

    #[test]
    fn test_min_picks_the_smaller_amount() {
        assert_eq!(usd(dec!(3)).min(usd(dec!(2))).unwrap(), usd(dec!(2)));
        assert!(usd(dec!(3)).min(Money::new(dec!(2), Currency::GBP)).is_err());
    }

    #[test]
    fn test_negation_and_sign() {
        let credit = -usd(dec!(15));
        assert!(credit.is_negative());
        assert_eq!(credit.abs(), usd(dec!(15)));
    }

    #[test]
    fn test_sum_rejects_mixed_currencies() {
        let mixed = [usd(dec!(1)), Money::new(dec!(1), Currency::CAD)];
        assert!(matches!(
            Money::sum(Currency::USD, &mixed),
            Err(MoneyError::CurrencyMismatch(_, _))
        ));
    }
}

mod rates {
    use super::*;

    #[test]
    fn test_percentage_conversion() {
        let rate = Rate::from_percentage(dec!(8.25)).unwrap();
        assert_eq!(rate.as_decimal(), dec!(0.0825));
        assert_eq!(rate.to_string(), "8.25%");
    }

    #[test]
    fn test_tax_rounds_half_up() {
        let rate = Rate::from_percentage(dec!(5)).unwrap();
        // 0.05 * 0.10 = 0.005
        assert_eq!(rate.apply_rounded(&usd(dec!(0.10))).unwrap(), usd(dec!(0.01)));
    }

    #[test]
    fn test_zero_rate_is_default() {
        assert_eq!(Rate::default(), Rate::zero());
        assert!(Rate::zero().apply_rounded(&usd(dec!(99.99))).unwrap().is_zero());
    }
}
