//! Infrastructure Database Layer
//!
//! PostgreSQL storage for the billing engine, built on SQLx.
//!
//! # Architecture
//!
//! The crate follows the repository pattern: [`repositories`] holds the SQL
//! and row types, and [`adapters`] implements the domain's `BillingStore`
//! port on top of them.
//!
//! # Storage Model
//!
//! - Usage records are append-only and indexed by `(client_id, occurred_at, id)`
//! - Invoice totals, payments and balances are integer minor units
//! - A partial unique index allows one live period invoice per client and period
//! - Money-moving writes lock the client row and check its version
//! - Outbox events are inserted in the same transaction as the write they describe
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/billing")).await?;
//! run_migrations(&pool).await?;
//! let store = PostgresBillingStore::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::PostgresBillingStore;
pub use error::DatabaseError;
pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool};
pub use repositories::BillingRepository;
