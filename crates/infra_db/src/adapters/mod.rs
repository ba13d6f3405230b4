//! Domain Adapters
//!
//! Adapter implementations for domain ports, connecting domain interfaces
//! to the PostgreSQL database layer.
//!
//! Each adapter:
//! - Implements the domain's port trait
//! - Translates between domain models and database row types
//! - Uses the repository layer for database operations
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresBillingStore;
//! use domain_billing::BillingStore;
//!
//! let store = PostgresBillingStore::new(pool);
//! let client = store.get_client(client_id).await?;
//! ```

pub mod billing;

pub use billing::PostgresBillingStore;
