//! Core Kernel - Foundational types for the billing engine
//!
//! This crate provides the building blocks shared by every other crate:
//! - Money types with precise decimal arithmetic and half-up rounding
//! - Half-open billing periods and cycle calendar math
//! - Strongly-typed identifiers
//! - Port primitives for the hexagonal storage layout

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod ports;

pub use money::{Money, Currency, MoneyError, Rate, MONEY_SCALE};
pub use temporal::{BillingPeriod, BillingCycle, TemporalError, midnight_utc};
pub use identifiers::{
    ClientId, PhoneNumberId, UsageRecordId, InvoiceId, LineItemId, PaymentId, EventId,
};
pub use ports::{PortError, DomainPort, AdapterHealth, HealthCheckResult, HealthCheckable};
