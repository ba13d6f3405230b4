//! Test Data Builders
//!
//! Builder patterns for constructing domain requests with sensible defaults.
//! Override only what a test cares about.

use chrono::{DateTime, NaiveDate, Utc};
use core_kernel::{BillingCycle, Currency, Money, Rate};
use domain_billing::{NewClient, RateCard, UsageEvent, UsageType};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::fixtures::NumberFixtures;

/// Builder for onboarding requests
#[derive(Debug, Clone)]
pub struct NewClientBuilder {
    code: String,
    name: String,
    currency: Currency,
    billing_cycle: BillingCycle,
    billing_anchor: NaiveDate,
    payment_terms_days: u32,
    tax_rate: Rate,
    credit_limit: Money,
    rate_card: RateCard,
}

impl Default for NewClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NewClientBuilder {
    /// Monthly USD client anchored on 2024-01-01, 14-day terms, no tax,
    /// $500 credit limit
    pub fn new() -> Self {
        Self {
            code: "ACME".to_string(),
            name: "Acme Telecom".to_string(),
            currency: Currency::USD,
            billing_cycle: BillingCycle::Monthly,
            billing_anchor: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            payment_terms_days: 14,
            tax_rate: Rate::zero(),
            credit_limit: Money::new(dec!(500), Currency::USD),
            rate_card: RateCard::default(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_cycle(mut self, cycle: BillingCycle) -> Self {
        self.billing_cycle = cycle;
        self
    }

    pub fn with_anchor(mut self, anchor: NaiveDate) -> Self {
        self.billing_anchor = anchor;
        self
    }

    pub fn with_payment_terms(mut self, days: u32) -> Self {
        self.payment_terms_days = days;
        self
    }

    /// Tax rate as a percentage, e.g. `dec!(8)` for 8%
    pub fn with_tax_percent(mut self, percent: Decimal) -> Self {
        self.tax_rate = Rate::from_percentage(percent).unwrap_or_else(|_| Rate::zero());
        self
    }

    pub fn with_credit_limit(mut self, limit: Decimal) -> Self {
        self.credit_limit = Money::new(limit, self.currency);
        self
    }

    pub fn with_rate_card(mut self, card: RateCard) -> Self {
        self.rate_card = card;
        self
    }

    pub fn build(self) -> NewClient {
        NewClient {
            code: self.code,
            name: self.name,
            currency: self.currency,
            billing_cycle: self.billing_cycle,
            billing_anchor: self.billing_anchor,
            payment_terms_days: self.payment_terms_days,
            tax_rate: self.tax_rate,
            credit_limit: self.credit_limit,
            rate_card: self.rate_card,
        }
    }
}

/// Builder for usage events
#[derive(Debug, Clone)]
pub struct UsageEventBuilder {
    event: UsageEvent,
}

impl UsageEventBuilder {
    /// A 60-second outbound call from `number`
    pub fn new(number: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let number = number.into();
        Self {
            event: UsageEvent {
                phone_number: number.clone(),
                usage_type: UsageType::OutboundCall,
                from_number: number,
                to_number: NumberFixtures::CALLEE.to_string(),
                duration_secs: Some(60),
                quantity: 1,
                timestamp,
                external_id: None,
            },
        }
    }

    pub fn outbound_call(mut self, duration_secs: u32) -> Self {
        self.event.usage_type = UsageType::OutboundCall;
        self.event.duration_secs = Some(duration_secs);
        self.event.quantity = 1;
        self
    }

    pub fn inbound_call(mut self, duration_secs: u32) -> Self {
        self.event.usage_type = UsageType::InboundCall;
        self.event.duration_secs = Some(duration_secs);
        self.event.from_number = NumberFixtures::CALLEE.to_string();
        self.event.to_number = self.event.phone_number.clone();
        self.event.quantity = 1;
        self
    }

    pub fn outbound_sms(mut self) -> Self {
        self.event.usage_type = UsageType::OutboundSms;
        self.event.duration_secs = None;
        self.event.quantity = 1;
        self
    }

    pub fn outbound_mms(mut self) -> Self {
        self.event.usage_type = UsageType::OutboundMms;
        self.event.duration_secs = None;
        self.event.quantity = 1;
        self
    }

    pub fn with_usage_type(mut self, usage_type: UsageType) -> Self {
        self.event.usage_type = usage_type;
        if !usage_type.is_call() {
            self.event.duration_secs = None;
        }
        self
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.event.quantity = quantity;
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.event.external_id = Some(external_id.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    pub fn build(self) -> UsageEvent {
        self.event
    }
}
