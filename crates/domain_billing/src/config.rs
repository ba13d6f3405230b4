//! Engine tunables
//!
//! Loaded by the API layer from the `billing` section of the configuration
//! sources; every field has a default so an empty section is valid.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::Currency;

/// Billing engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Currency for clients onboarded without one
    pub default_currency: Currency,
    /// Call rounding increment for new rate cards, in seconds
    pub billing_increment_secs: u32,
    /// How long a released number keeps accepting late usage, in seconds
    pub release_grace_secs: i64,
    /// How far in the future a usage timestamp may be
    pub max_clock_skew_secs: i64,
    /// Payment terms for clients onboarded without explicit terms
    pub default_payment_terms_days: u32,
    /// Tax rate as a fraction (0.08 for 8%)
    pub default_tax_rate: Decimal,
    /// Seconds between scheduler ticks
    pub scheduler_interval_secs: u64,
    /// Maximum number of clients closed concurrently per tick
    pub scheduler_concurrency: usize,
    /// How long a period-close claim is honoured before another worker may take it
    pub period_close_lease_secs: i64,
    /// Seconds between outbox relay passes
    pub outbox_interval_secs: u64,
    pub outbox_batch_size: usize,
    /// Page size used when aggregating usage
    pub aggregation_page_size: usize,
    /// Deadline for any single engine operation
    pub operation_timeout_secs: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_currency: Currency::USD,
            billing_increment_secs: 60,
            release_grace_secs: 0,
            max_clock_skew_secs: 300,
            default_payment_terms_days: 30,
            default_tax_rate: Decimal::ZERO,
            scheduler_interval_secs: 300,
            scheduler_concurrency: 8,
            period_close_lease_secs: 600,
            outbox_interval_secs: 5,
            outbox_batch_size: 100,
            aggregation_page_size: 1000,
            operation_timeout_secs: 10,
        }
    }
}

impl BillingConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn outbox_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_interval_secs)
    }

    pub fn release_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.release_grace_secs)
    }

    pub fn max_clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_clock_skew_secs)
    }

    pub fn period_close_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.period_close_lease_secs)
    }

    /// Sets the grace window for released numbers
    pub fn with_release_grace(mut self, seconds: i64) -> Self {
        self.release_grace_secs = seconds;
        self
    }

    pub fn with_default_tax_rate(mut self, rate: Decimal) -> Self {
        self.default_tax_rate = rate;
        self
    }

    pub fn with_operation_timeout(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }
}
