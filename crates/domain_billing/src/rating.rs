//! Rate cards and the rate engine
//!
//! Rating happens once, at ingestion. The cost stored on a usage record is
//! computed from the client's rate card as it was at that moment, so later
//! card changes never move historical costs.
//!
//! # Rounding
//!
//! Call durations are rounded up to the card's billing increment before the
//! per-minute rate is applied. Costs keep four decimal places; nothing is
//! rounded to cents until an invoice subtotal is formed.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use core_kernel::{BillingCycle, BillingPeriod, Currency, Money};

use crate::error::BillingError;
use crate::phone_number::NumberType;
use crate::usage::UsageType;

const SECONDS_PER_MINUTE: u32 = 60;

/// A client's effective pricing
///
/// Call rates are per minute; message rates are per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateCard {
    pub inbound_call_per_minute: Decimal,
    pub outbound_call_per_minute: Decimal,
    pub inbound_sms: Decimal,
    pub outbound_sms: Decimal,
    pub inbound_mms: Decimal,
    pub outbound_mms: Decimal,
    /// Calls are billed in blocks of this many seconds
    pub billing_increment_secs: u32,
    pub local_monthly_fee: Decimal,
    pub toll_free_monthly_fee: Decimal,
    pub mobile_monthly_fee: Decimal,
}

impl Default for RateCard {
    fn default() -> Self {
        Self {
            inbound_call_per_minute: dec!(0.0085),
            outbound_call_per_minute: dec!(0.0140),
            inbound_sms: dec!(0.0075),
            outbound_sms: dec!(0.0079),
            inbound_mms: dec!(0.0100),
            outbound_mms: dec!(0.0200),
            billing_increment_secs: 60,
            local_monthly_fee: dec!(1.15),
            toll_free_monthly_fee: dec!(2.15),
            mobile_monthly_fee: dec!(1.50),
        }
    }
}

impl RateCard {
    /// Per-unit rate for a usage type
    pub fn rate_for(&self, usage_type: UsageType) -> Decimal {
        match usage_type {
            UsageType::InboundCall => self.inbound_call_per_minute,
            UsageType::OutboundCall => self.outbound_call_per_minute,
            UsageType::InboundSms => self.inbound_sms,
            UsageType::OutboundSms => self.outbound_sms,
            UsageType::InboundMms => self.inbound_mms,
            UsageType::OutboundMms => self.outbound_mms,
        }
    }

    pub fn monthly_fee_for(&self, number_type: NumberType) -> Decimal {
        match number_type {
            NumberType::Local => self.local_monthly_fee,
            NumberType::TollFree => self.toll_free_monthly_fee,
            NumberType::Mobile => self.mobile_monthly_fee,
        }
    }

    pub fn with_rate(mut self, usage_type: UsageType, rate: Decimal) -> Self {
        let slot = match usage_type {
            UsageType::InboundCall => &mut self.inbound_call_per_minute,
            UsageType::OutboundCall => &mut self.outbound_call_per_minute,
            UsageType::InboundSms => &mut self.inbound_sms,
            UsageType::OutboundSms => &mut self.outbound_sms,
            UsageType::InboundMms => &mut self.inbound_mms,
            UsageType::OutboundMms => &mut self.outbound_mms,
        };
        *slot = rate;
        self
    }

    pub fn with_monthly_fee(mut self, number_type: NumberType, fee: Decimal) -> Self {
        match number_type {
            NumberType::Local => self.local_monthly_fee = fee,
            NumberType::TollFree => self.toll_free_monthly_fee = fee,
            NumberType::Mobile => self.mobile_monthly_fee = fee,
        }
        self
    }

    pub fn with_billing_increment(mut self, seconds: u32) -> Self {
        self.billing_increment_secs = seconds;
        self
    }

    /// Rejects negative prices and a zero increment
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.billing_increment_secs == 0 {
            return Err(BillingError::validation("billing increment must be positive"));
        }
        let negative_rate = UsageType::ALL
            .into_iter()
            .find(|t| self.rate_for(*t).is_sign_negative() && !self.rate_for(*t).is_zero());
        if let Some(usage_type) = negative_rate {
            return Err(BillingError::validation(format!("negative rate for {usage_type}")));
        }
        for number_type in [NumberType::Local, NumberType::TollFree, NumberType::Mobile] {
            if self.monthly_fee_for(number_type) < Decimal::ZERO {
                return Err(BillingError::validation(format!(
                    "negative monthly fee for {number_type}"
                )));
            }
        }
        Ok(())
    }
}

/// A rated event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub cost: Money,
    /// Rounded call duration; `None` for messages
    pub billable_secs: Option<u32>,
}

/// Maps usage and leased resources to money
#[derive(Debug, Default, Clone, Copy)]
pub struct RateEngine;

impl RateEngine {
    pub fn new() -> Self {
        Self
    }

    /// Prices one usage event
    ///
    /// # Arguments
    ///
    /// * `card` - The client's effective rate card
    /// * `currency` - The client's billing currency
    /// * `usage_type` - Traffic category
    /// * `quantity` - Message count; calls are one unit
    /// * `duration_secs` - Call duration, required for calls
    pub fn quote(
        &self,
        card: &RateCard,
        currency: Currency,
        usage_type: UsageType,
        quantity: u32,
        duration_secs: Option<u32>,
    ) -> Result<Quote, BillingError> {
        let rate = card.rate_for(usage_type);
        if usage_type.is_call() {
            let duration = duration_secs
                .ok_or_else(|| BillingError::validation("calls require a duration"))?;
            let billable = Self::billable_seconds(duration, card.billing_increment_secs)?;
            let minutes = Decimal::from(billable) / Decimal::from(SECONDS_PER_MINUTE);
            let cost = Money::new(rate, currency).multiply(minutes)?;
            Ok(Quote { cost, billable_secs: Some(billable) })
        } else {
            if quantity == 0 {
                return Err(BillingError::validation("quantity must be at least 1"));
            }
            let cost = Money::new(rate, currency).multiply(Decimal::from(quantity))?;
            Ok(Quote { cost, billable_secs: None })
        }
    }

    /// Rounds a duration up to the next whole increment
    pub fn billable_seconds(duration_secs: u32, increment_secs: u32) -> Result<u32, BillingError> {
        if increment_secs == 0 {
            return Err(BillingError::validation("billing increment must be positive"));
        }
        let blocks = duration_secs.div_ceil(increment_secs);
        blocks
            .checked_mul(increment_secs)
            .ok_or_else(|| BillingError::validation("call duration out of range"))
    }

    /// Recurring fee owed for `window` within `period`
    ///
    /// Any started day of the window counts as a whole day. A window covering
    /// the whole period is charged the full cycle fee without division.
    pub fn prorate(
        &self,
        monthly_fee: Money,
        cycle: BillingCycle,
        window: &BillingPeriod,
        period: &BillingPeriod,
    ) -> Result<Money, BillingError> {
        let cycle_fee = monthly_fee.multiply(Decimal::from(cycle.months()))?;
        if window.start() <= period.start() && window.end() >= period.end() {
            return Ok(cycle_fee);
        }
        let window_days = window.ceil_days().min(period.ceil_days());
        let prorated = cycle_fee
            .multiply(Decimal::from(window_days))?
            .divide(Decimal::from(period.ceil_days()))?;
        Ok(prorated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    #[test]
    fn test_call_duration_rounds_up_to_increment() {
        let card = RateCard::default().with_rate(UsageType::OutboundCall, dec!(0.02));
        let engine = RateEngine::new();

        let quote = engine
            .quote(&card, Currency::USD, UsageType::OutboundCall, 1, Some(61))
            .unwrap();
        assert_eq!(quote.billable_secs, Some(120));
        assert_eq!(quote.cost, usd(dec!(0.04)));

        let exact = engine
            .quote(&card, Currency::USD, UsageType::OutboundCall, 1, Some(60))
            .unwrap();
        assert_eq!(exact.cost, usd(dec!(0.02)));
    }

    #[test]
    fn test_six_second_increment() {
        let card = RateCard::default()
            .with_rate(UsageType::InboundCall, dec!(0.06))
            .with_billing_increment(6);
        let quote = RateEngine::new()
            .quote(&card, Currency::USD, UsageType::InboundCall, 1, Some(7))
            .unwrap();
        assert_eq!(quote.billable_secs, Some(12));
        assert_eq!(quote.cost, usd(dec!(0.012)));
    }

    #[test]
    fn test_messages_priced_per_unit() {
        let card = RateCard::default();
        let quote = RateEngine::new()
            .quote(&card, Currency::USD, UsageType::OutboundSms, 3, None)
            .unwrap();
        assert_eq!(quote.cost, usd(dec!(0.0237)));
        assert_eq!(quote.billable_secs, None);
    }

    #[test]
    fn test_zero_second_call_is_free() {
        let quote = RateEngine::new()
            .quote(&RateCard::default(), Currency::USD, UsageType::OutboundCall, 1, Some(0))
            .unwrap();
        assert!(quote.cost.is_zero());
    }

    #[test]
    fn test_full_window_charges_whole_cycle_fee() {
        let period = BillingPeriod::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let fee = RateEngine::new()
            .prorate(usd(dec!(5)), BillingCycle::Quarterly, &period, &period)
            .unwrap();
        assert_eq!(fee, usd(dec!(15)));
    }

    #[test]
    fn test_proration_uses_ceiling_days() {
        let period = BillingPeriod::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        // 10.5 days of lease is billed as 11 of 31
        let window = BillingPeriod::new(
            Utc.with_ymd_and_hms(2024, 1, 21, 12, 0, 0).unwrap(),
            period.end(),
        )
        .unwrap();
        let fee = RateEngine::new()
            .prorate(usd(dec!(31)), BillingCycle::Monthly, &window, &period)
            .unwrap();
        assert_eq!(fee, usd(dec!(11)));
    }

    #[test]
    fn test_card_validation() {
        assert!(RateCard::default().validate().is_ok());
        assert!(RateCard::default().with_billing_increment(0).validate().is_err());
        assert!(RateCard::default()
            .with_rate(UsageType::InboundSms, dec!(-0.01))
            .validate()
            .is_err());
    }

    mod properties {
        use super::*;
        use chrono::Duration;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn billable_seconds_is_the_next_whole_increment(duration in 0u32..100_000, increment in 1u32..=300) {
                let billable = RateEngine::billable_seconds(duration, increment).unwrap();
                prop_assert_eq!(billable % increment, 0);
                prop_assert!(billable >= duration);
                prop_assert!(billable < duration + increment);
            }

            #[test]
            fn prorated_fee_never_exceeds_the_cycle_fee(hours in 0i64..744) {
                let period = BillingPeriod::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                    Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
                )
                .unwrap();
                let window = BillingPeriod::new(period.start() + Duration::hours(hours), period.end()).unwrap();
                let engine = RateEngine::new();

                let fee = engine.prorate(usd(dec!(5)), BillingCycle::Monthly, &window, &period).unwrap();
                prop_assert!(fee <= usd(dec!(5)));
                prop_assert!(fee.is_positive());

                let later = BillingPeriod::new(period.start() + Duration::hours(hours + 24).min(Duration::hours(743)), period.end()).unwrap();
                let shorter = engine.prorate(usd(dec!(5)), BillingCycle::Monthly, &later, &period).unwrap();
                prop_assert!(shorter <= fee);
            }
        }
    }
}
