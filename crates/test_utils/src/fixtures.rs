//! Pre-built Test Fixtures
//!
//! Provides ready-to-use test data and a fully wired in-memory engine.
//! Fixtures are deterministic so scenario tests read like worked examples.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use core_kernel::{BillingPeriod, Currency, Money};
use domain_billing::{
    BillingConfig, BillingEngine, Client, InMemoryBillingStore, ManualClock, NumberType, RateCard,
    StaticNumberInventory, UsageType,
};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::builders::NewClientBuilder;

/// Midnight UTC on the given day
pub fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .expect("valid fixture date")
}

/// A given time of day, UTC
pub fn utc_at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid fixture timestamp")
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid fixture date")
}

pub fn usd(amount: Decimal) -> Money {
    Money::new(amount, Currency::USD)
}

/// Fixture for billing periods
pub struct PeriodFixtures;

impl PeriodFixtures {
    /// `[2024-01-01, 2024-02-01)`
    pub fn january_2024() -> BillingPeriod {
        BillingPeriod::new(utc(2024, 1, 1), utc(2024, 2, 1)).expect("valid period")
    }

    /// `[2024-02-01, 2024-03-01)`, a leap-year February
    pub fn february_2024() -> BillingPeriod {
        BillingPeriod::new(utc(2024, 2, 1), utc(2024, 3, 1)).expect("valid period")
    }

    /// `[2023-12-01, 2024-01-01)`
    pub fn december_2023() -> BillingPeriod {
        BillingPeriod::new(utc(2023, 12, 1), utc(2024, 1, 1)).expect("valid period")
    }
}

static FLAT_RATE_CARD: Lazy<RateCard> = Lazy::new(|| {
    RateCard::default()
        .with_rate(UsageType::OutboundCall, dec!(0.02))
        .with_rate(UsageType::InboundCall, dec!(0.01))
        .with_rate(UsageType::OutboundSms, dec!(0.01))
        .with_rate(UsageType::InboundSms, dec!(0.01))
        .with_rate(UsageType::OutboundMms, dec!(0.02))
        .with_rate(UsageType::InboundMms, dec!(0.02))
        .with_monthly_fee(NumberType::Local, dec!(5.00))
        .with_monthly_fee(NumberType::Mobile, dec!(8.00))
        .with_monthly_fee(NumberType::TollFree, dec!(30.00))
});

/// Fixture for rate cards
pub struct RateCardFixtures;

impl RateCardFixtures {
    /// Round numbers: $0.02/min outbound, $0.01/min inbound, $0.01 per
    /// message, $5/month local numbers, $30/month toll-free
    pub fn flat() -> RateCard {
        FLAT_RATE_CARD.clone()
    }
}

/// Well-known numbers from the seeded inventory
pub struct NumberFixtures;

impl NumberFixtures {
    pub const LOCAL_SF: &'static str = "+14155550100";
    pub const LOCAL_SF_2: &'static str = "+14155550101";
    pub const LOCAL_NY: &'static str = "+12125550100";
    pub const MOBILE_SF: &'static str = "+14157770200";
    pub const TOLL_FREE: &'static str = "+18005550300";
    pub const CALLEE: &'static str = "+15559870000";
}

/// An engine over in-memory storage with a controllable clock
pub struct TestEngine {
    pub engine: Arc<BillingEngine>,
    pub store: Arc<InMemoryBillingStore>,
    pub inventory: Arc<StaticNumberInventory>,
    pub clock: Arc<ManualClock>,
}

impl TestEngine {
    /// Starts an engine whose clock reads `now`
    pub fn start(now: DateTime<Utc>) -> Self {
        Self::with_config(now, BillingConfig::default())
    }

    pub fn with_config(now: DateTime<Utc>, config: BillingConfig) -> Self {
        let store = Arc::new(InMemoryBillingStore::new());
        let inventory = Arc::new(StaticNumberInventory::seeded(&RateCardFixtures::flat()));
        let clock = Arc::new(ManualClock::new(now));
        let engine = BillingEngine::new(store.clone(), inventory.clone(), config).with_clock(clock.clone());
        Self {
            engine: Arc::new(engine),
            store,
            inventory,
            clock,
        }
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.clock.set(now);
    }

    /// Onboards a monthly client anchored on `anchor` with the flat rate card
    pub async fn onboard(&self, code: &str, anchor: NaiveDate) -> Client {
        self.engine
            .onboard_client(
                NewClientBuilder::new()
                    .with_code(code)
                    .with_anchor(anchor)
                    .with_rate_card(RateCardFixtures::flat())
                    .build(),
            )
            .await
            .expect("onboard fixture client")
    }
}
