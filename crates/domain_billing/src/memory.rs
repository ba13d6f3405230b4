//! In-memory billing store
//!
//! Backs tests and single-process deployments. State is partitioned per
//! client in `DashMap`s so ingestion for different clients never contends.
//!
//! Lock order is always the client entry first, then any other map. Every
//! ledger commit holds the client entry for its whole duration, which makes
//! the commit atomic with respect to other writers and to usage appends
//! (which hold the same entry shared while checking the watermark).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use core_kernel::{
    BillingPeriod, ClientId, DomainPort, EventId, HealthCheckResult, HealthCheckable, InvoiceId,
    PaymentId, PhoneNumberId, PortError,
};

use crate::client::{Client, ClientStatus};
use crate::invoice::{Invoice, InvoiceKind, InvoiceStatus};
use crate::outbox::OutboxEvent;
use crate::payment::Payment;
use crate::phone_number::{NumberStatus, PhoneNumber};
use crate::ports::{BillingStore, InvoiceCommit, InvoicePage, InvoiceQuery, SettlementCommit};
use crate::usage::{AppendOutcome, UsageCursor, UsagePage, UsageRecord};

const ADAPTER_ID: &str = "in-memory";

#[derive(Debug, Default)]
struct UsagePartition {
    /// Sorted by (timestamp, id)
    records: Vec<UsageRecord>,
    by_external_id: HashMap<String, UsageRecord>,
}

#[derive(Debug, Clone)]
struct CloseLease {
    holder: String,
    claimed_at: DateTime<Utc>,
}

/// A [`BillingStore`] held entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    clients: DashMap<ClientId, Client>,
    client_codes: DashMap<String, ClientId>,
    numbers: DashMap<PhoneNumberId, PhoneNumber>,
    numbers_by_e164: DashMap<String, PhoneNumberId>,
    usage: DashMap<ClientId, UsagePartition>,
    invoices: DashMap<InvoiceId, Invoice>,
    invoice_numbers: DashMap<String, InvoiceId>,
    client_invoices: DashMap<ClientId, Vec<InvoiceId>>,
    payments: DashMap<PaymentId, Payment>,
    client_payments: DashMap<ClientId, Vec<PaymentId>>,
    leases: DashMap<(ClientId, DateTime<Utc>), CloseLease>,
    outbox: Mutex<Vec<OutboxEvent>>,
    fail_writes: AtomicBool,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail with `ServiceUnavailable` until cleared
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of usage records held for a client
    pub fn usage_count(&self, client_id: ClientId) -> usize {
        self.usage.get(&client_id).map(|p| p.records.len()).unwrap_or(0)
    }

    /// Every outbox event, delivered or not
    pub fn outbox_snapshot(&self) -> Vec<OutboxEvent> {
        self.outbox
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn ensure_writable(&self, operation: &str) -> Result<(), PortError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PortError::ServiceUnavailable {
                service: format!("{ADAPTER_ID} store ({operation})"),
            });
        }
        Ok(())
    }

    fn push_events(&self, events: &[OutboxEvent]) -> Result<(), PortError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| PortError::internal("outbox lock poisoned"))?;
        outbox.extend(events.iter().cloned());
        Ok(())
    }

    fn invoices_of(&self, client_id: ClientId) -> Vec<Invoice> {
        let ids = self
            .client_invoices
            .get(&client_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.invoices.get(id).map(|i| i.clone()))
            .collect()
    }

    fn live_period_invoice(&self, client_id: ClientId, period: BillingPeriod) -> Option<Invoice> {
        self.invoices_of(client_id).into_iter().find(|i| {
            i.kind == InvoiceKind::Period && i.period == period && i.status != InvoiceStatus::Cancelled
        })
    }

    /// End of the live period invoice whose period holds `at`, if any
    fn invoiced_through(&self, client_id: ClientId, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.invoices_of(client_id)
            .into_iter()
            .find(|i| {
                i.kind == InvoiceKind::Period
                    && i.status != InvoiceStatus::Cancelled
                    && i.period.start() <= at
                    && at < i.period.end()
            })
            .map(|i| i.period.end())
    }

    fn check_version(client: &Client, expected: i64) -> Result<(), PortError> {
        if client.version != expected {
            return Err(PortError::conflict(format!(
                "client {} changed (version {} != expected {})",
                client.code, client.version, expected
            )));
        }
        Ok(())
    }

    fn apply_ledger_state(stored: &mut Client, next: &Client) {
        stored.current_balance = next.current_balance;
        stored.unapplied_credit = next.unapplied_credit;
        stored.invoice_sequence = next.invoice_sequence;
        stored.closed_through = next.closed_through;
        stored.updated_at = next.updated_at;
        stored.version += 1;
    }
}

impl DomainPort for InMemoryBillingStore {}

#[async_trait]
impl HealthCheckable for InMemoryBillingStore {
    async fn health_check(&self) -> HealthCheckResult {
        if self.fail_writes.load(Ordering::SeqCst) {
            return HealthCheckResult::unhealthy(ADAPTER_ID, 0, "writes disabled");
        }
        HealthCheckResult::healthy(ADAPTER_ID, 0)
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn insert_client(&self, client: &Client) -> Result<(), PortError> {
        self.ensure_writable("insert_client")?;
        match self.client_codes.entry(client.code.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(PortError::conflict(format!("client code {} already exists", client.code)));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(client.id);
            }
        }
        self.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn get_client(&self, id: ClientId) -> Result<Client, PortError> {
        self.clients
            .get(&id)
            .map(|c| c.clone())
            .ok_or_else(|| PortError::not_found("Client", id))
    }

    async fn list_clients(&self, status: Option<ClientStatus>) -> Result<Vec<Client>, PortError> {
        let mut clients: Vec<Client> = self
            .clients
            .iter()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .map(|c| c.clone())
            .collect();
        clients.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(clients)
    }

    async fn update_client_profile(&self, client: &Client) -> Result<(), PortError> {
        self.ensure_writable("update_client_profile")?;
        let mut stored = self
            .clients
            .get_mut(&client.id)
            .ok_or_else(|| PortError::not_found("Client", client.id))?;
        stored.name = client.name.clone();
        stored.status = client.status;
        stored.rate_card = client.rate_card.clone();
        stored.tax_rate = client.tax_rate;
        stored.payment_terms_days = client.payment_terms_days;
        stored.credit_limit = client.credit_limit;
        stored.updated_at = client.updated_at;
        Ok(())
    }

    async fn repair_client_balance(&self, client: &Client, expected_version: i64) -> Result<(), PortError> {
        self.ensure_writable("repair_client_balance")?;
        let mut stored = self
            .clients
            .get_mut(&client.id)
            .ok_or_else(|| PortError::not_found("Client", client.id))?;
        Self::check_version(&stored, expected_version)?;
        Self::apply_ledger_state(&mut stored, client);
        Ok(())
    }

    async fn get_phone_number(&self, id: PhoneNumberId) -> Result<PhoneNumber, PortError> {
        self.numbers
            .get(&id)
            .map(|n| n.clone())
            .ok_or_else(|| PortError::not_found("PhoneNumber", id))
    }

    async fn find_phone_number(&self, number: &str) -> Result<Option<PhoneNumber>, PortError> {
        let Some(id) = self.numbers_by_e164.get(number).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.numbers.get(&id).map(|n| n.clone()))
    }

    async fn list_phone_numbers(&self, client_id: ClientId) -> Result<Vec<PhoneNumber>, PortError> {
        let mut numbers: Vec<PhoneNumber> = self
            .numbers
            .iter()
            .filter(|n| n.client_id == client_id)
            .map(|n| n.clone())
            .collect();
        numbers.sort_by(|a, b| a.provisioned_at.cmp(&b.provisioned_at).then(a.id.cmp(&b.id)));
        Ok(numbers)
    }

    async fn update_phone_number(&self, number: &PhoneNumber, events: &[OutboxEvent]) -> Result<(), PortError> {
        self.ensure_writable("update_phone_number")?;
        let mut stored = self
            .numbers
            .get_mut(&number.id)
            .ok_or_else(|| PortError::not_found("PhoneNumber", number.id))?;
        *stored = number.clone();
        drop(stored);
        self.push_events(events)
    }

    async fn append_usage(&self, record: &UsageRecord) -> Result<AppendOutcome, PortError> {
        self.ensure_writable("append_usage")?;
        // Held shared until the record is in place so a concurrent close
        // cannot move the watermark past it
        let client = self
            .clients
            .get(&record.client_id)
            .ok_or_else(|| PortError::not_found("Client", record.client_id))?;

        let mut partition = self.usage.entry(record.client_id).or_default();
        if let Some(external_id) = &record.external_id {
            if let Some(existing) = partition.by_external_id.get(external_id) {
                return Ok(AppendOutcome::Duplicate(existing.clone()));
            }
        }
        if let Some(closed_through) = client.closed_through {
            if record.timestamp < closed_through {
                return Ok(AppendOutcome::PeriodClosed { closed_through });
            }
        }
        if let Some(closed_through) = self.invoiced_through(record.client_id, record.timestamp) {
            return Ok(AppendOutcome::PeriodClosed { closed_through });
        }

        let cursor = record.cursor();
        let position = partition.records.partition_point(|r| r.cursor() < cursor);
        partition.records.insert(position, record.clone());
        if let Some(external_id) = &record.external_id {
            partition
                .by_external_id
                .insert(external_id.clone(), record.clone());
        }
        drop(partition);
        drop(client);
        Ok(AppendOutcome::Appended(record.clone()))
    }

    async fn usage_page(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
        after: Option<UsageCursor>,
        limit: usize,
    ) -> Result<UsagePage, PortError> {
        let Some(partition) = self.usage.get(&client_id) else {
            return Ok(UsagePage { records: Vec::new(), next: None });
        };
        let start = match after {
            Some(cursor) => partition.records.partition_point(|r| r.cursor() <= cursor),
            None => partition.records.partition_point(|r| r.timestamp < period.start()),
        };
        let mut records: Vec<UsageRecord> = partition.records[start..]
            .iter()
            .skip_while(|r| r.timestamp < period.start())
            .take_while(|r| r.timestamp < period.end())
            .take(limit.saturating_add(1))
            .cloned()
            .collect();
        let next = if records.len() > limit {
            records.truncate(limit);
            records.last().map(UsageRecord::cursor)
        } else {
            None
        };
        Ok(UsagePage { records, next })
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError> {
        self.invoices
            .get(&id)
            .map(|i| i.clone())
            .ok_or_else(|| PortError::not_found("Invoice", id))
    }

    async fn find_period_invoice(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
    ) -> Result<Option<Invoice>, PortError> {
        Ok(self.live_period_invoice(client_id, period))
    }

    async fn list_invoices(&self, query: &InvoiceQuery) -> Result<InvoicePage, PortError> {
        let mut invoices: Vec<Invoice> = match query.client_id {
            Some(client_id) => self.invoices_of(client_id),
            None => self.invoices.iter().map(|i| i.clone()).collect(),
        };
        invoices.retain(|i| query.matches_status(i));
        invoices.sort_by(|a, b| {
            b.period
                .start()
                .cmp(&a.period.start())
                .then(b.sequence.cmp(&a.sequence))
        });
        let total = invoices.len() as u64;
        let invoices = invoices
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok(InvoicePage { invoices, total })
    }

    async fn client_invoices(&self, client_id: ClientId) -> Result<Vec<Invoice>, PortError> {
        let mut invoices = self.invoices_of(client_id);
        invoices.sort_by_key(|i| i.sequence);
        Ok(invoices)
    }

    async fn outstanding_invoices(&self, client_id: ClientId) -> Result<Vec<Invoice>, PortError> {
        let mut invoices: Vec<Invoice> = self
            .invoices_of(client_id)
            .into_iter()
            .filter(|i| i.status.is_outstanding())
            .collect();
        invoices.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.sequence.cmp(&b.sequence)));
        Ok(invoices)
    }

    async fn commit_invoice(&self, commit: &InvoiceCommit) -> Result<(), PortError> {
        self.ensure_writable("commit_invoice")?;
        let invoice = &commit.invoice;
        let mut client = self
            .clients
            .get_mut(&invoice.client_id)
            .ok_or_else(|| PortError::not_found("Client", invoice.client_id))?;
        Self::check_version(&client, commit.expected_version)?;

        if invoice.kind == InvoiceKind::Period {
            if let Some(existing) = self.live_period_invoice(invoice.client_id, invoice.period) {
                return Err(PortError::conflict(format!(
                    "invoice {} already covers {}",
                    existing.invoice_number, invoice.period
                )));
            }
        }
        if self.invoice_numbers.contains_key(&invoice.invoice_number) {
            return Err(PortError::conflict(format!(
                "invoice number {} already issued",
                invoice.invoice_number
            )));
        }
        if let Some(number) = &commit.provisioned_number {
            let taken = self
                .numbers_by_e164
                .get(&number.number)
                .and_then(|id| self.numbers.get(&*id).map(|n| n.status != NumberStatus::Released))
                .unwrap_or(false);
            if taken {
                return Err(PortError::conflict(format!("{} is already assigned", number.number)));
            }
        }

        self.invoices.insert(invoice.id, invoice.clone());
        self.invoice_numbers
            .insert(invoice.invoice_number.clone(), invoice.id);
        self.client_invoices
            .entry(invoice.client_id)
            .or_default()
            .push(invoice.id);
        if let Some(number) = &commit.provisioned_number {
            self.numbers.insert(number.id, number.clone());
            self.numbers_by_e164.insert(number.number.clone(), number.id);
        }
        self.push_events(&commit.events)?;
        Self::apply_ledger_state(&mut client, &commit.client);
        Ok(())
    }

    async fn update_invoice_statuses(&self, invoices: &[Invoice], events: &[OutboxEvent]) -> Result<(), PortError> {
        self.ensure_writable("update_invoice_statuses")?;
        for invoice in invoices {
            if let Some(mut stored) = self.invoices.get_mut(&invoice.id) {
                stored.status = invoice.status;
                stored.updated_at = invoice.updated_at;
            }
        }
        self.push_events(events)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError> {
        self.payments
            .get(&id)
            .map(|p| p.clone())
            .ok_or_else(|| PortError::not_found("Payment", id))
    }

    async fn list_payments(&self, client_id: ClientId) -> Result<Vec<Payment>, PortError> {
        let ids = self
            .client_payments
            .get(&client_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.payments.get(id).map(|p| p.clone()))
            .collect())
    }

    async fn refunds_of(&self, payment_id: PaymentId) -> Result<Vec<Payment>, PortError> {
        let mut refunds: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.refund_of == Some(payment_id))
            .map(|p| p.clone())
            .collect();
        refunds.sort_by_key(|p| p.id);
        Ok(refunds)
    }

    async fn insert_failed_payment(&self, payment: &Payment) -> Result<(), PortError> {
        self.ensure_writable("insert_failed_payment")?;
        self.payments.insert(payment.id, payment.clone());
        self.client_payments
            .entry(payment.client_id)
            .or_default()
            .push(payment.id);
        Ok(())
    }

    async fn commit_settlement(&self, commit: &SettlementCommit) -> Result<(), PortError> {
        self.ensure_writable("commit_settlement")?;
        let mut client = self
            .clients
            .get_mut(&commit.client.id)
            .ok_or_else(|| PortError::not_found("Client", commit.client.id))?;
        Self::check_version(&client, commit.expected_version)?;
        if let Some(missing) = commit
            .invoices
            .iter()
            .find(|i| !self.invoices.contains_key(&i.id))
        {
            return Err(PortError::not_found("Invoice", missing.id));
        }

        for invoice in &commit.invoices {
            self.invoices.insert(invoice.id, invoice.clone());
        }
        if let Some(payment) = &commit.payment {
            self.payments.insert(payment.id, payment.clone());
            self.client_payments
                .entry(payment.client_id)
                .or_default()
                .push(payment.id);
        }
        self.push_events(&commit.events)?;
        Self::apply_ledger_state(&mut client, &commit.client);
        Ok(())
    }

    async fn claim_period_close(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
        holder: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<bool, PortError> {
        self.ensure_writable("claim_period_close")?;
        let claim = CloseLease {
            holder: holder.to_string(),
            claimed_at: now,
        };
        match self.leases.entry((client_id, period.start())) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                let current = existing.get();
                if current.holder == holder || current.claimed_at + lease <= now {
                    existing.insert(claim);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(claim);
                Ok(true)
            }
        }
    }

    async fn release_period_close(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
        holder: &str,
    ) -> Result<(), PortError> {
        self.leases
            .remove_if(&(client_id, period.start()), |_, lease| lease.holder == holder);
        Ok(())
    }

    async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>, PortError> {
        let outbox = self
            .outbox
            .lock()
            .map_err(|_| PortError::internal("outbox lock poisoned"))?;
        Ok(outbox
            .iter()
            .filter(|e| e.delivered_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_event_delivered(&self, id: EventId, at: DateTime<Utc>) -> Result<(), PortError> {
        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| PortError::internal("outbox lock poisoned"))?;
        let event = outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| PortError::not_found("OutboxEvent", id))?;
        event.delivered_at = Some(at);
        event.attempts += 1;
        Ok(())
    }

    async fn record_event_failure(&self, id: EventId, error: &str) -> Result<(), PortError> {
        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| PortError::internal("outbox lock poisoned"))?;
        let event = outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| PortError::not_found("OutboxEvent", id))?;
        event.attempts += 1;
        event.last_error = Some(error.to_string());
        Ok(())
    }
}
