//! Billing engine facade
//!
//! [`BillingEngine`] wires the components together over a [`BillingStore`]
//! and is what the HTTP layer and the scheduler call. Each operation:
//!
//! 1. takes the client's gate (writer lock for financial writes, shared
//!    ingestion lock for usage, both for a period close),
//! 2. loads current state from the store,
//! 3. computes the change with the pure components,
//! 4. persists it in one atomic store call, events included.
//!
//! A failure at any step leaves storage untouched. Every operation runs
//! under the configured deadline; an expired deadline is reported as a
//! persistence failure.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use core_kernel::{
    BillingPeriod, ClientId, HealthCheckResult, InvoiceId, Money, PaymentId, PhoneNumberId, PortError,
};

use crate::aggregation::{AggregationResult, PeriodAggregator};
use crate::balance::{AccountBalanceTracker, ReconciliationReport};
use crate::client::{Client, ClientStatus, NewClient};
use crate::clock::{Clock, SystemClock};
use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::gate::ClientGates;
use crate::generator::InvoiceGenerator;
use crate::inventory::{AvailableNumber, NumberInventory, NumberSearch};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::ledger::{RecordedUsage, UsageLedger};
use crate::outbox::{BillingEvent, OutboxEvent};
use crate::payment::{Payment, PaymentProcessor, PaymentRequest, Settlement};
use crate::phone_number::{NumberStatus, PhoneNumber};
use crate::ports::{BillingStore, InvoiceCommit, InvoicePage, InvoiceQuery, SettlementCommit};
use crate::rating::{Quote, RateCard, RateEngine};
use crate::usage::{UsageCursor, UsageEvent, UsagePage, UsageType};

/// Outcome of closing a period
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedInvoice {
    pub invoice: Invoice,
    /// False when an invoice for the period already existed
    pub created: bool,
}

/// A newly provisioned number and the invoice that charged it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedNumber {
    pub phone_number: PhoneNumber,
    pub invoice: Invoice,
}

pub struct BillingEngine {
    store: Arc<dyn BillingStore>,
    inventory: Arc<dyn NumberInventory>,
    clock: Arc<dyn Clock>,
    config: BillingConfig,
    gates: Arc<ClientGates>,
    ledger: UsageLedger,
    aggregator: PeriodAggregator,
    generator: InvoiceGenerator,
    tracker: AccountBalanceTracker,
    processor: PaymentProcessor,
    rates: RateEngine,
}

impl BillingEngine {
    pub fn new(store: Arc<dyn BillingStore>, inventory: Arc<dyn NumberInventory>, config: BillingConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let gates = Arc::new(ClientGates::new());
        Self {
            ledger: UsageLedger::new(store.clone(), gates.clone(), clock.clone(), config.clone()),
            aggregator: PeriodAggregator::new(store.clone(), config.aggregation_page_size),
            store,
            inventory,
            clock,
            config,
            gates,
            generator: InvoiceGenerator::new(),
            tracker: AccountBalanceTracker::new(),
            processor: PaymentProcessor::new(),
            rates: RateEngine::new(),
        }
    }

    /// Replaces the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ledger = UsageLedger::new(
            self.store.clone(),
            self.gates.clone(),
            clock.clone(),
            self.config.clone(),
        );
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn BillingStore> {
        self.store.clone()
    }

    pub async fn health_check(&self) -> HealthCheckResult {
        self.store.health_check().await
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        work: impl Future<Output = Result<T, BillingError>>,
    ) -> Result<T, BillingError> {
        let deadline = self.config.operation_timeout();
        match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(operation, timeout_ms = deadline.as_millis() as u64, "Operation timed out");
                Err(BillingError::Persistence(PortError::Timeout {
                    operation: operation.to_string(),
                    duration_ms: deadline.as_millis() as u64,
                }))
            }
        }
    }

    // ========================================================================
    // Clients
    // ========================================================================

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn onboard_client(&self, request: NewClient) -> Result<Client, BillingError> {
        self.bounded("onboard_client", async {
            let client = Client::onboard(request, self.now())?;
            self.store.insert_client(&client).await?;
            tracing::info!(client_id = %client.id, code = %client.code, "Client onboarded");
            Ok(client)
        })
        .await
    }

    pub async fn get_client(&self, client_id: ClientId) -> Result<Client, BillingError> {
        self.bounded("get_client", async { Ok(self.store.get_client(client_id).await?) })
            .await
    }

    pub async fn list_clients(&self, status: Option<ClientStatus>) -> Result<Vec<Client>, BillingError> {
        self.bounded("list_clients", async { Ok(self.store.list_clients(status).await?) })
            .await
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn update_client_status(&self, client_id: ClientId, status: ClientStatus) -> Result<Client, BillingError> {
        self.bounded("update_client_status", async {
            let gate = self.gates.gate(client_id);
            let _writer = gate.write().await;
            let mut client = self.store.get_client(client_id).await?;
            client.transition_to(status, self.now())?;
            self.store.update_client_profile(&client).await?;
            tracing::info!(code = %client.code, status = %client.status, "Client status changed");
            Ok(client)
        })
        .await
    }

    /// Replaces the client's pricing; usage already recorded keeps its cost
    #[instrument(skip(self, rate_card), fields(client_id = %client_id))]
    pub async fn update_rate_card(&self, client_id: ClientId, rate_card: RateCard) -> Result<Client, BillingError> {
        self.bounded("update_rate_card", async {
            rate_card.validate()?;
            let gate = self.gates.gate(client_id);
            let _writer = gate.write().await;
            let mut client = self.store.get_client(client_id).await?;
            client.rate_card = rate_card;
            client.updated_at = self.now();
            self.store.update_client_profile(&client).await?;
            tracing::info!(code = %client.code, "Rate card updated");
            Ok(client)
        })
        .await
    }

    // ========================================================================
    // Rating and usage
    // ========================================================================

    pub async fn quote(
        &self,
        client_id: ClientId,
        usage_type: UsageType,
        quantity: u32,
        duration_secs: Option<u32>,
    ) -> Result<Quote, BillingError> {
        self.bounded("quote", async {
            let client = self.store.get_client(client_id).await?;
            self.rates
                .quote(&client.rate_card, client.currency, usage_type, quantity, duration_secs)
        })
        .await
    }

    pub async fn record_usage(&self, event: UsageEvent) -> Result<RecordedUsage, BillingError> {
        self.bounded("record_usage", self.ledger.record(event)).await
    }

    pub async fn usage_page(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
        after: Option<UsageCursor>,
        limit: usize,
    ) -> Result<UsagePage, BillingError> {
        self.bounded("usage_page", self.ledger.query(client_id, period, after, limit))
            .await
    }

    /// Per-type and per-number usage totals for any window
    pub async fn usage_stats(&self, client_id: ClientId, period: BillingPeriod) -> Result<AggregationResult, BillingError> {
        self.bounded("usage_stats", async {
            let client = self.store.get_client(client_id).await?;
            self.aggregator.aggregate(client.id, client.currency, period).await
        })
        .await
    }

    // ========================================================================
    // Phone numbers
    // ========================================================================

    pub async fn search_available_numbers(&self, search: &NumberSearch) -> Result<Vec<AvailableNumber>, BillingError> {
        self.bounded("search_available_numbers", async {
            Ok(self.inventory.search(search).await?)
        })
        .await
    }

    /// Assigns a number from the inventory and charges its first period
    ///
    /// # Errors
    ///
    /// - `CreditLimitExceeded` if the balance plus the number's monthly fee
    ///   is above the client's credit limit
    /// - `Validation` if the client is not active
    /// - `NotFound` if the inventory does not hold the number
    #[instrument(skip(self), fields(client_id = %client_id, number = %number))]
    pub async fn provision_number(
        &self,
        client_id: ClientId,
        number: &str,
        friendly_name: Option<String>,
    ) -> Result<ProvisionedNumber, BillingError> {
        self.bounded("provision_number", async {
            let gate = self.gates.gate(client_id);
            let _writer = gate.write().await;
            let now = self.now();

            let client = self.store.get_client(client_id).await?;
            if !client.is_active() {
                return Err(BillingError::validation(format!(
                    "client {} is {} and cannot provision numbers",
                    client.code, client.status
                )));
            }
            if let Some(existing) = self.store.find_phone_number(number).await? {
                if existing.status != NumberStatus::Released {
                    return Err(BillingError::Conflict(format!("{number} is already assigned")));
                }
            }

            let search = NumberSearch {
                contains: Some(number.to_string()),
                ..Default::default()
            };
            let listed = self
                .inventory
                .search(&search)
                .await?
                .into_iter()
                .find(|candidate| candidate.number == number)
                .ok_or_else(|| BillingError::not_found("AvailableNumber", number))?;
            let monthly_fee = Money::new(client.rate_card.monthly_fee_for(listed.number_type), client.currency);
            if let Err(refused) = self.tracker.admit(&client, monthly_fee) {
                tracing::warn!(code = %client.code, balance = %client.current_balance, fee = %monthly_fee, "Provisioning refused");
                return Err(refused);
            }

            let reserved = self.inventory.reserve(number).await?;
            match self.commit_provisioning(&client, &reserved, monthly_fee, friendly_name, now).await {
                Ok(provisioned) => Ok(provisioned),
                Err(e) => {
                    if let Err(pool_error) = self.inventory.release_to_pool(reserved).await {
                        tracing::error!(error = %pool_error, "Failed to return number to inventory");
                    }
                    Err(e)
                }
            }
        })
        .await
    }

    async fn commit_provisioning(
        &self,
        client: &Client,
        reserved: &AvailableNumber,
        monthly_fee: Money,
        friendly_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ProvisionedNumber, BillingError> {
        let current_period = client.period_containing(now)?;
        let phone_number = PhoneNumber::provision(
            client.id,
            reserved.number.clone(),
            reserved.number_type,
            reserved.capabilities,
            monthly_fee,
            now,
        )
        .with_friendly_name(friendly_name)
        .with_prepaid_through(current_period.end());

        let mut invoice = self
            .generator
            .build_provisioning_invoice(client, &phone_number, &current_period, now)?;
        let mut next = client.clone();
        self.tracker.charge(&mut next, invoice.total_amount, now)?;
        self.tracker.apply_credit(&mut next, &mut invoice, now)?;
        next.invoice_sequence = invoice.sequence;

        let mut events = vec![
            OutboxEvent::new(client.id, BillingEvent::number_provisioned(&phone_number), now),
            OutboxEvent::new(client.id, BillingEvent::invoice_generated(&invoice), now),
        ];
        if invoice.status == InvoiceStatus::Paid {
            events.push(OutboxEvent::new(client.id, BillingEvent::invoice_paid(&invoice), now));
        }

        self.store
            .commit_invoice(&InvoiceCommit {
                invoice: invoice.clone(),
                client: next.clone(),
                expected_version: client.version,
                provisioned_number: Some(phone_number.clone()),
                events,
            })
            .await?;

        tracing::info!(
            code = %client.code,
            number = %phone_number.number,
            invoice_number = %invoice.invoice_number,
            charged = %invoice.total_amount,
            balance = %next.current_balance,
            "Number provisioned"
        );
        Ok(ProvisionedNumber { phone_number, invoice })
    }

    /// Ends a lease; the recurring fee stops accruing from now
    #[instrument(skip(self), fields(phone_number_id = %phone_number_id))]
    pub async fn release_number(&self, phone_number_id: PhoneNumberId) -> Result<PhoneNumber, BillingError> {
        self.bounded("release_number", async {
            let number = self.store.get_phone_number(phone_number_id).await?;
            let gate = self.gates.gate(number.client_id);
            let _writer = gate.write().await;

            let mut number = self.store.get_phone_number(phone_number_id).await?;
            let now = self.now();
            number.release(now)?;
            let event = OutboxEvent::new(number.client_id, BillingEvent::number_released(&number), now);
            self.store.update_phone_number(&number, &[event]).await?;

            let returned = AvailableNumber {
                number: number.number.clone(),
                number_type: number.number_type,
                region: String::new(),
                capabilities: number.capabilities,
                monthly_fee: number.monthly_fee.amount(),
            };
            if let Err(e) = self.inventory.release_to_pool(returned).await {
                tracing::warn!(error = %e, number = %number.number, "Released number not returned to inventory");
            }
            tracing::info!(number = %number.number, "Number released");
            Ok(number)
        })
        .await
    }

    /// Blocks traffic on a number; its fee keeps accruing
    pub async fn suspend_number(&self, phone_number_id: PhoneNumberId) -> Result<PhoneNumber, BillingError> {
        self.bounded("suspend_number", self.change_number(phone_number_id, PhoneNumber::suspend))
            .await
    }

    pub async fn resume_number(&self, phone_number_id: PhoneNumberId) -> Result<PhoneNumber, BillingError> {
        self.bounded("resume_number", self.change_number(phone_number_id, PhoneNumber::resume))
            .await
    }

    async fn change_number(
        &self,
        phone_number_id: PhoneNumberId,
        change: fn(&mut PhoneNumber, DateTime<Utc>) -> Result<(), BillingError>,
    ) -> Result<PhoneNumber, BillingError> {
        let owner = self.store.get_phone_number(phone_number_id).await?.client_id;
        let gate = self.gates.gate(owner);
        let _writer = gate.write().await;
        let mut number = self.store.get_phone_number(phone_number_id).await?;
        change(&mut number, self.now())?;
        self.store.update_phone_number(&number, &[]).await?;
        tracing::info!(number = %number.number, status = number.status.as_str(), "Number status changed");
        Ok(number)
    }

    pub async fn get_phone_number(&self, phone_number_id: PhoneNumberId) -> Result<PhoneNumber, BillingError> {
        self.bounded("get_phone_number", async {
            Ok(self.store.get_phone_number(phone_number_id).await?)
        })
        .await
    }

    pub async fn list_phone_numbers(&self, client_id: ClientId) -> Result<Vec<PhoneNumber>, BillingError> {
        self.bounded("list_phone_numbers", async {
            Ok(self.store.list_phone_numbers(client_id).await?)
        })
        .await
    }

    // ========================================================================
    // Invoices
    // ========================================================================

    /// Closes one billing period
    ///
    /// Aggregates the period's usage with ingestion for the client held off,
    /// builds the invoice, charges the balance, consumes unapplied credit and
    /// advances the ingestion watermark, all in one commit. If a live invoice
    /// already covers the period it is returned unchanged.
    ///
    /// # Errors
    ///
    /// `Validation` if the period is not one of the client's cycle periods or
    /// has not ended yet.
    #[instrument(skip(self), fields(client_id = %client_id, period = %period))]
    pub async fn generate_invoice(&self, client_id: ClientId, period: BillingPeriod) -> Result<GeneratedInvoice, BillingError> {
        self.bounded("generate_invoice", async {
            let gate = self.gates.gate(client_id);
            let _writer = gate.write().await;
            let _closing = gate.close().await;
            let now = self.now();

            let client = self.store.get_client(client_id).await?;
            let cycle_period = client.period_containing(period.start())?;
            if cycle_period != period {
                return Err(BillingError::validation(format!(
                    "{period} is not a {} billing period of client {} (expected {cycle_period})",
                    client.billing_cycle.as_str(),
                    client.code
                )));
            }
            if period.end() > now {
                return Err(BillingError::validation(format!("{period} has not ended yet")));
            }

            if let Some(existing) = self.store.find_period_invoice(client_id, period).await? {
                tracing::debug!(invoice_number = %existing.invoice_number, "Period already invoiced");
                return Ok(GeneratedInvoice { invoice: existing, created: false });
            }

            let usage = self.aggregator.aggregate(client.id, client.currency, period).await?;
            let numbers = self.store.list_phone_numbers(client.id).await?;
            let mut invoice = self
                .generator
                .build_period_invoice(&client, period, usage, &numbers, now)?;

            let mut next = client.clone();
            self.tracker.charge(&mut next, invoice.total_amount, now)?;
            let credited = self.tracker.apply_credit(&mut next, &mut invoice, now)?;
            next.invoice_sequence = invoice.sequence;
            next.closed_through = self.watermark_after(&client, period).await?;

            let mut events = vec![OutboxEvent::new(client.id, BillingEvent::invoice_generated(&invoice), now)];
            if invoice.status == InvoiceStatus::Paid {
                events.push(OutboxEvent::new(client.id, BillingEvent::invoice_paid(&invoice), now));
            }

            let commit = InvoiceCommit {
                invoice: invoice.clone(),
                client: next.clone(),
                expected_version: client.version,
                provisioned_number: None,
                events,
            };
            match self.store.commit_invoice(&commit).await {
                Ok(()) => {}
                Err(PortError::Conflict { message }) => {
                    if let Some(existing) = self.store.find_period_invoice(client_id, period).await? {
                        return Ok(GeneratedInvoice { invoice: existing, created: false });
                    }
                    return Err(BillingError::Conflict(message));
                }
                Err(e) => return Err(e.into()),
            }

            tracing::info!(
                code = %client.code,
                invoice_number = %invoice.invoice_number,
                total = %invoice.total_amount,
                credit_applied = %credited,
                balance = %next.current_balance,
                "Invoice generated"
            );
            Ok(GeneratedInvoice { invoice, created: true })
        })
        .await
    }

    /// The closed watermark once `closing` is invoiced
    ///
    /// The watermark only moves when `closing` starts at or below it, and then
    /// runs on through any later periods that already have a live invoice. A
    /// period invoiced out of order leaves the gap before it open.
    async fn watermark_after(
        &self,
        client: &Client,
        closing: BillingPeriod,
    ) -> Result<Option<DateTime<Utc>>, BillingError> {
        let mut mark = client.open_from();
        if closing.start() > mark {
            return Ok(client.closed_through);
        }
        mark = mark.max(closing.end());
        loop {
            let next = client.period_containing(mark)?;
            if next.start() != mark || self.store.find_period_invoice(client.id, next).await?.is_none() {
                break;
            }
            mark = next.end();
        }
        Ok(Some(mark))
    }

    /// Fetches an invoice, reading a past-due pending invoice as overdue
    pub async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, BillingError> {
        self.bounded("get_invoice", async {
            let mut invoice = self.store.get_invoice(invoice_id).await?;
            invoice.status = invoice.status_on(self.now().date_naive());
            Ok(invoice)
        })
        .await
    }

    pub async fn list_invoices(&self, query: &InvoiceQuery) -> Result<InvoicePage, BillingError> {
        self.bounded("list_invoices", async {
            let today = self.now().date_naive();
            let mut page = self.store.list_invoices(&query.clone().as_of(today)).await?;
            for invoice in &mut page.invoices {
                invoice.status = invoice.status_on(today);
            }
            Ok(page)
        })
        .await
    }

    /// Cancels an outstanding invoice
    ///
    /// The invoice total leaves the balance and anything already paid on it
    /// becomes unapplied credit. A cancelled period invoice frees its period
    /// for regeneration.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn cancel_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, BillingError> {
        self.bounded("cancel_invoice", async {
            let owner = self.store.get_invoice(invoice_id).await?.client_id;
            let gate = self.gates.gate(owner);
            let _writer = gate.write().await;
            let now = self.now();

            let mut invoice = self.store.get_invoice(invoice_id).await?;
            let client = self.store.get_client(invoice.client_id).await?;
            let total = invoice.total_amount;
            let paid = invoice.cancel(now)?;

            let mut next = client.clone();
            self.tracker.credit(&mut next, total, now)?;
            if paid.is_positive() {
                self.tracker.hold_unapplied(&mut next, paid)?;
            }

            self.store
                .commit_settlement(&SettlementCommit {
                    payment: None,
                    invoices: vec![invoice.clone()],
                    client: next.clone(),
                    expected_version: client.version,
                    events: vec![OutboxEvent::new(client.id, BillingEvent::invoice_cancelled(&invoice), now)],
                })
                .await?;
            tracing::info!(
                invoice_number = %invoice.invoice_number,
                credited = %paid,
                balance = %next.current_balance,
                "Invoice cancelled"
            );
            Ok(invoice)
        })
        .await
    }

    /// Moves the client's past-due pending invoices to overdue
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn refresh_overdue(&self, client_id: ClientId) -> Result<Vec<Invoice>, BillingError> {
        self.bounded("refresh_overdue", async {
            let gate = self.gates.gate(client_id);
            let _writer = gate.write().await;
            let now = self.now();

            let mut changed = Vec::new();
            let mut events = Vec::new();
            for mut invoice in self.store.outstanding_invoices(client_id).await? {
                if invoice.refresh_overdue(now) {
                    events.push(OutboxEvent::new(client_id, BillingEvent::invoice_overdue(&invoice)?, now));
                    changed.push(invoice);
                }
            }
            if changed.is_empty() {
                return Ok(changed);
            }
            self.store.update_invoice_statuses(&changed, &events).await?;
            for invoice in &changed {
                tracing::info!(invoice_number = %invoice.invoice_number, due_date = %invoice.due_date, "Invoice overdue");
            }
            Ok(changed)
        })
        .await
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Applies money received
    ///
    /// Settles the named invoice, or the client's outstanding invoices oldest
    /// due first; whatever is left becomes unapplied credit.
    #[instrument(skip(self, request), fields(client_id = %request.client_id, amount = %request.amount))]
    pub async fn apply_payment(&self, request: PaymentRequest) -> Result<Settlement, BillingError> {
        self.bounded("apply_payment", async {
            let gate = self.gates.gate(request.client_id);
            let _writer = gate.write().await;
            let now = self.now();

            let client = self.store.get_client(request.client_id).await?;
            let target = match request.invoice_id {
                Some(invoice_id) => Some(self.store.get_invoice(invoice_id).await?),
                None => None,
            };
            let outstanding = if target.is_none() {
                self.store.outstanding_invoices(client.id).await?
            } else {
                Vec::new()
            };

            let mut next = client.clone();
            let settlement = self
                .processor
                .apply(&mut next, &request, target, outstanding, now)?;

            let mut events = vec![OutboxEvent::new(client.id, BillingEvent::payment_applied(&settlement.payment), now)];
            events.extend(
                settlement
                    .paid_invoices()
                    .map(|invoice| OutboxEvent::new(client.id, BillingEvent::invoice_paid(invoice), now)),
            );

            self.store
                .commit_settlement(&SettlementCommit {
                    payment: Some(settlement.payment.clone()),
                    invoices: settlement.invoices.clone(),
                    client: next.clone(),
                    expected_version: client.version,
                    events,
                })
                .await?;
            tracing::info!(
                payment_id = %settlement.payment.id,
                allocated = settlement.payment.allocations.len(),
                unapplied = %settlement.payment.unapplied_amount,
                balance = %next.current_balance,
                "Payment applied"
            );
            Ok(settlement)
        })
        .await
    }

    /// Records an attempt that did not settle; the balance is unchanged
    pub async fn record_failed_payment(
        &self,
        request: PaymentRequest,
        reason: impl Into<String>,
    ) -> Result<Payment, BillingError> {
        let reason = reason.into();
        self.bounded("record_failed_payment", async {
            let client = self.store.get_client(request.client_id).await?;
            let payment = self.processor.failed(&request, reason, self.now());
            self.store.insert_failed_payment(&payment).await?;
            tracing::warn!(code = %client.code, payment_id = %payment.id, "Failed payment recorded");
            Ok(payment)
        })
        .await
    }

    /// Refunds all or part of a completed payment
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn refund_payment(&self, payment_id: PaymentId, amount: Option<Money>) -> Result<Settlement, BillingError> {
        self.bounded("refund_payment", async {
            let owner = self.store.get_payment(payment_id).await?.client_id;
            let gate = self.gates.gate(owner);
            let _writer = gate.write().await;
            let now = self.now();

            let original = self.store.get_payment(payment_id).await?;
            let client = self.store.get_client(original.client_id).await?;
            let prior_refunds = self.store.refunds_of(payment_id).await?;
            let mut allocated = Vec::with_capacity(original.allocations.len());
            for allocation in &original.allocations {
                allocated.push(self.store.get_invoice(allocation.invoice_id).await?);
            }

            let mut next = client.clone();
            let settlement = self
                .processor
                .refund(&mut next, &original, &prior_refunds, allocated, amount, now)?;
            let event = BillingEvent::PaymentRefunded {
                payment_id: settlement.payment.id,
                refund_of: original.id,
                amount: settlement.payment.amount,
            };

            self.store
                .commit_settlement(&SettlementCommit {
                    payment: Some(settlement.payment.clone()),
                    invoices: settlement.invoices.clone(),
                    client: next.clone(),
                    expected_version: client.version,
                    events: vec![OutboxEvent::new(client.id, event, now)],
                })
                .await?;
            tracing::info!(
                refund_id = %settlement.payment.id,
                amount = %settlement.payment.amount,
                balance = %next.current_balance,
                "Payment refunded"
            );
            Ok(settlement)
        })
        .await
    }

    pub async fn get_payment(&self, payment_id: PaymentId) -> Result<Payment, BillingError> {
        self.bounded("get_payment", async { Ok(self.store.get_payment(payment_id).await?) })
            .await
    }

    pub async fn list_payments(&self, client_id: ClientId) -> Result<Vec<Payment>, BillingError> {
        self.bounded("list_payments", async { Ok(self.store.list_payments(client_id).await?) })
            .await
    }

    // ========================================================================
    // Balance
    // ========================================================================

    /// Compares the cached balance with the one derived from invoices
    ///
    /// With `repair`, a drifted cache is overwritten with the derived value.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn reconcile(&self, client_id: ClientId, repair: bool) -> Result<ReconciliationReport, BillingError> {
        self.bounded("reconcile", async {
            let gate = self.gates.gate(client_id);
            let _writer = gate.write().await;
            let client = self.store.get_client(client_id).await?;
            let invoices = self.store.client_invoices(client_id).await?;

            let mut next = client.clone();
            let report = self.tracker.reconcile(&mut next, &invoices, repair, self.now())?;
            if !report.is_consistent() {
                tracing::warn!(code = %client.code, drift = %report.drift, "Balance drift detected");
            }
            if report.repaired {
                self.store.repair_client_balance(&next, client.version).await?;
            }
            Ok(report)
        })
        .await
    }
}
