//! Billing Domain - Usage Metering, Invoicing and Balances
//!
//! This crate turns per-event telephony usage and leased phone numbers into
//! periodic invoices, tracks each client's running balance against a credit
//! limit, and applies payments to outstanding invoices.
//!
//! # Components
//!
//! - **Usage Ledger**: append-only, rated usage records partitioned per client
//! - **Rate Engine**: prices events and prorates recurring number fees
//! - **Period Aggregator**: deterministic per-type and per-number rollups
//! - **Invoice Generator**: period and provisioning invoices with tax and due date
//! - **Account Balance Tracker**: balance identity, admission control, reconciliation
//! - **Payment Processor**: targeted or oldest-due-first allocation, refunds
//! - **Billing Scheduler**: closes ended periods on each client's cycle
//!
//! # Invoice Lifecycle
//!
//! ```text
//! Draft -> Pending -> Paid
//!                 \-> Overdue -> Paid
//!                 \-> Cancelled
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingEngine, InMemoryBillingStore, StaticNumberInventory};
//!
//! let engine = BillingEngine::new(store, inventory, BillingConfig::default());
//! let client = engine.onboard_client(new_client).await?;
//! engine.provision_number(client.id, "+14155550100", None).await?;
//! engine.record_usage(event).await?;
//!
//! let generated = engine.generate_invoice(client.id, period).await?;
//! println!("{} due {}", generated.invoice.total_amount, generated.invoice.due_date);
//! ```

pub mod aggregation;
pub mod balance;
pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod generator;
pub mod inventory;
pub mod invoice;
pub mod ledger;
pub mod memory;
pub mod outbox;
pub mod payment;
pub mod phone_number;
pub mod ports;
pub mod rating;
pub mod scheduler;
pub mod usage;

pub use aggregation::{AggregationResult, NumberUsage, PeriodAggregator, UsageTotals};
pub use balance::{AccountBalanceTracker, ReconciliationReport};
pub use client::{Client, ClientStatus, NewClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BillingConfig;
pub use engine::{BillingEngine, GeneratedInvoice, ProvisionedNumber};
pub use error::BillingError;
pub use gate::{ClientGate, ClientGates};
pub use generator::InvoiceGenerator;
pub use inventory::{AvailableNumber, NumberInventory, NumberSearch, StaticNumberInventory};
pub use invoice::{Invoice, InvoiceKind, InvoiceStatus, LineItem, LineItemCategory};
pub use ledger::{RecordedUsage, UsageLedger};
pub use memory::InMemoryBillingStore;
pub use outbox::{BillingEvent, EventSink, OutboxEvent, OutboxRelay, RelayReport, TracingEventSink};
pub use payment::{
    Payment, PaymentAllocation, PaymentMethod, PaymentProcessor, PaymentRequest, PaymentStatus, Settlement,
};
pub use phone_number::{Capabilities, NumberStatus, NumberType, PhoneNumber};
pub use ports::{BillingStore, InvoiceCommit, InvoicePage, InvoiceQuery, SettlementCommit};
pub use rating::{Quote, RateCard, RateEngine};
pub use scheduler::{BillingScheduler, SchedulerState, TickReport};
pub use usage::{AppendOutcome, UsageCursor, UsageEvent, UsagePage, UsageRecord, UsageType};
