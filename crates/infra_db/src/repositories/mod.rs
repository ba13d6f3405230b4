//! Repository implementations
//!
//! Repositories encapsulate SQL and work in terms of row types; adapters
//! map those rows to and from domain types.
//!
//! # Architecture
//!
//! - Runtime-checked queries through `sqlx::query*`
//! - One transaction per money-moving write
//! - Optimistic concurrency on the client row's `version`

pub mod billing;

pub use billing::BillingRepository;
