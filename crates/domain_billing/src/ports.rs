//! Storage port for the billing engine
//!
//! The engine talks to storage only through [`BillingStore`]. Every write
//! that moves money is one call carrying everything that must change
//! together (invoice rows, client ledger state, outbox events), so an
//! adapter can make it all-or-nothing.
//!
//! Client ledger state is written with an optimistic check on
//! [`Client::version`]: a commit whose `expected_version` no longer matches
//! fails with `PortError::Conflict` and changes nothing.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{
    BillingPeriod, ClientId, DomainPort, EventId, HealthCheckable, InvoiceId, PaymentId,
    PhoneNumberId, PortError,
};

use crate::client::{Client, ClientStatus};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::outbox::OutboxEvent;
use crate::payment::Payment;
use crate::phone_number::PhoneNumber;
use crate::usage::{AppendOutcome, UsageCursor, UsagePage, UsageRecord};

/// Filters for listing invoices
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceQuery {
    pub client_id: Option<ClientId>,
    pub status: Option<InvoiceStatus>,
    pub limit: usize,
    pub offset: usize,
    /// Date the status filter is evaluated on
    ///
    /// When set, a pending invoice past its due date with money still owed
    /// matches `Overdue` and not `Pending`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<NaiveDate>,
}

impl InvoiceQuery {
    pub fn for_client(client_id: ClientId) -> Self {
        Self {
            client_id: Some(client_id),
            status: None,
            limit: 50,
            offset: 0,
            as_of: None,
        }
    }

    pub fn with_status(mut self, status: InvoiceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn as_of(mut self, today: NaiveDate) -> Self {
        self.as_of = Some(today);
        self
    }

    /// Whether `invoice` passes the status filter
    pub fn matches_status(&self, invoice: &Invoice) -> bool {
        let Some(wanted) = self.status else {
            return true;
        };
        let effective = match self.as_of {
            Some(today) => invoice.status_on(today),
            None => invoice.status,
        };
        effective == wanted
    }
}

/// One page of invoices, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePage {
    pub invoices: Vec<Invoice>,
    pub total: u64,
}

/// Writes that close a period or provision a number
#[derive(Debug, Clone)]
pub struct InvoiceCommit {
    pub invoice: Invoice,
    /// Client with its new balance, credit, sequence and watermark
    pub client: Client,
    pub expected_version: i64,
    /// Number inserted alongside a provisioning invoice
    pub provisioned_number: Option<PhoneNumber>,
    pub events: Vec<OutboxEvent>,
}

/// Writes that settle, refund or cancel
#[derive(Debug, Clone)]
pub struct SettlementCommit {
    /// New payment record, absent for a cancellation
    pub payment: Option<Payment>,
    /// Invoices whose payment state or status changed
    pub invoices: Vec<Invoice>,
    pub client: Client,
    pub expected_version: i64,
    pub events: Vec<OutboxEvent>,
}

/// Persistence for clients, numbers, usage, invoices, payments and the outbox
#[async_trait]
pub trait BillingStore: DomainPort + HealthCheckable {
    // Clients

    /// Inserts a new client; `Conflict` if the code is taken
    async fn insert_client(&self, client: &Client) -> Result<(), PortError>;

    async fn get_client(&self, id: ClientId) -> Result<Client, PortError>;

    async fn list_clients(&self, status: Option<ClientStatus>) -> Result<Vec<Client>, PortError>;

    /// Updates profile fields only (name, status, pricing, terms, limit)
    ///
    /// Ledger state (balance, credit, sequence, watermark, version) is left
    /// untouched.
    async fn update_client_profile(&self, client: &Client) -> Result<(), PortError>;

    /// Overwrites the cached balance after a reconciliation
    async fn repair_client_balance(&self, client: &Client, expected_version: i64) -> Result<(), PortError>;

    // Phone numbers

    async fn get_phone_number(&self, id: PhoneNumberId) -> Result<PhoneNumber, PortError>;

    /// Looks up the most recent assignment of an E.164 number
    async fn find_phone_number(&self, number: &str) -> Result<Option<PhoneNumber>, PortError>;

    async fn list_phone_numbers(&self, client_id: ClientId) -> Result<Vec<PhoneNumber>, PortError>;

    /// Persists a lifecycle change together with its events
    async fn update_phone_number(&self, number: &PhoneNumber, events: &[OutboxEvent]) -> Result<(), PortError>;

    // Usage

    /// Appends a usage record
    ///
    /// Must atomically check the client's `closed_through` watermark, any live
    /// period invoice covering the timestamp and the record's external id
    /// against concurrent writers.
    async fn append_usage(&self, record: &UsageRecord) -> Result<AppendOutcome, PortError>;

    /// Records in `period` after `after`, ordered by (timestamp, id)
    async fn usage_page(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
        after: Option<UsageCursor>,
        limit: usize,
    ) -> Result<UsagePage, PortError>;

    // Invoices

    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError>;

    /// The live (non-cancelled) period invoice for exactly this period
    async fn find_period_invoice(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
    ) -> Result<Option<Invoice>, PortError>;

    async fn list_invoices(&self, query: &InvoiceQuery) -> Result<InvoicePage, PortError>;

    /// Every invoice of a client, including cancelled ones
    async fn client_invoices(&self, client_id: ClientId) -> Result<Vec<Invoice>, PortError>;

    /// Pending and overdue invoices of a client
    async fn outstanding_invoices(&self, client_id: ClientId) -> Result<Vec<Invoice>, PortError>;

    /// Inserts a finalized invoice with the client ledger state
    ///
    /// `Conflict` if a live invoice already covers the period, the number is
    /// taken, or the client version moved.
    async fn commit_invoice(&self, commit: &InvoiceCommit) -> Result<(), PortError>;

    /// Persists overdue transitions and their events
    async fn update_invoice_statuses(&self, invoices: &[Invoice], events: &[OutboxEvent]) -> Result<(), PortError>;

    // Payments

    async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError>;

    async fn list_payments(&self, client_id: ClientId) -> Result<Vec<Payment>, PortError>;

    async fn refunds_of(&self, payment_id: PaymentId) -> Result<Vec<Payment>, PortError>;

    /// Records a payment attempt that has no ledger effect
    async fn insert_failed_payment(&self, payment: &Payment) -> Result<(), PortError>;

    async fn commit_settlement(&self, commit: &SettlementCommit) -> Result<(), PortError>;

    // Scheduler leases

    /// Claims the right to close one period
    ///
    /// Returns false while another holder's unexpired claim exists.
    async fn claim_period_close(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
        holder: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<bool, PortError>;

    async fn release_period_close(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
        holder: &str,
    ) -> Result<(), PortError>;

    // Outbox

    /// Undelivered events, oldest first
    async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>, PortError>;

    async fn mark_event_delivered(&self, id: EventId, at: DateTime<Utc>) -> Result<(), PortError>;

    async fn record_event_failure(&self, id: EventId, error: &str) -> Result<(), PortError>;
}
