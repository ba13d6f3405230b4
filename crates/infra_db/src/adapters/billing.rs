//! PostgreSQL Billing Store
//!
//! Implements the domain's `BillingStore` port on PostgreSQL through the
//! [`BillingRepository`].
//!
//! # Overview
//!
//! The `PostgresBillingStore` serves as the bridge between the billing
//! engine and the database. It:
//!
//! - Converts domain models into row types and back
//! - Stores invoice totals, payments and balances in minor units
//! - Translates database errors into `PortError`
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{adapters::PostgresBillingStore, create_pool, run_migrations, DatabaseConfig};
//! use domain_billing::{BillingEngine, BillingStore};
//! use std::sync::Arc;
//!
//! let pool = create_pool(DatabaseConfig::new(url)).await?;
//! run_migrations(&pool).await?;
//!
//! let store: Arc<dyn BillingStore> = Arc::new(PostgresBillingStore::new(pool));
//! let engine = BillingEngine::new(store, inventory, config);
//! ```

use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, instrument};

use core_kernel::{
    BillingPeriod, ClientId, Currency, DomainPort, EventId, HealthCheckResult, HealthCheckable,
    InvoiceId, LineItemId, Money, PaymentId, PhoneNumberId, PortError, Rate, UsageRecordId,
};
use domain_billing::{
    AppendOutcome, BillingStore, Client, ClientStatus, Invoice, InvoiceCommit, InvoicePage,
    InvoiceQuery, LineItem, OutboxEvent, Payment, PhoneNumber, SettlementCommit, UsageCursor,
    UsagePage, UsageRecord,
};

use crate::error::DatabaseError;
use crate::repositories::billing::{
    AppendResult, BillingRepository, ClientRow, InvoiceRow, InvoiceWithLines, InvoiceWrite,
    LineItemRow, OutboxRow, PaymentRow, PhoneNumberRow, SettlementWrite, UsageRow,
};

const ADAPTER_ID: &str = "postgres-billing-store";

/// PostgreSQL-backed implementation of the `BillingStore` port
///
/// # Error Handling
///
/// Database errors are translated to `PortError` variants:
/// - unique violations and stale client versions -> `PortError::Conflict`
/// - missing rows -> `PortError::NotFound`
/// - connection and pool failures -> `PortError::Connection`
/// - rows that no longer map to domain types -> `PortError::Transformation`
#[derive(Debug, Clone)]
pub struct PostgresBillingStore {
    repository: BillingRepository,
    pool: PgPool,
}

impl PostgresBillingStore {
    /// Creates a new store over the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: BillingRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl DomainPort for PostgresBillingStore {}

#[async_trait]
impl HealthCheckable for PostgresBillingStore {
    /// Checks database connectivity with a `SELECT 1`
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await;

        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheckResult::healthy(ADAPTER_ID, latency_ms),
            Err(e) => HealthCheckResult::unhealthy(ADAPTER_ID, latency_ms, format!("Database error: {}", e)),
        }
    }
}

#[async_trait]
impl BillingStore for PostgresBillingStore {
    #[instrument(skip(self, client), fields(client_id = %client.id, code = %client.code))]
    async fn insert_client(&self, client: &Client) -> Result<(), PortError> {
        let row = client_to_row(client)?;
        self.repository
            .insert_client(&row)
            .await
            .map_err(|e| match e {
                DatabaseError::DuplicateEntry(_) => {
                    PortError::conflict(format!("client code {} is taken", client.code))
                }
                other => other.into(),
            })?;
        debug!("Inserted client");
        Ok(())
    }

    async fn get_client(&self, id: ClientId) -> Result<Client, PortError> {
        let row = self
            .repository
            .get_client(*id.as_uuid())
            .await?
            .ok_or_else(|| PortError::not_found("Client", id))?;
        row_to_client(row)
    }

    async fn list_clients(&self, status: Option<ClientStatus>) -> Result<Vec<Client>, PortError> {
        let rows = self
            .repository
            .list_clients(status.as_ref().map(ClientStatus::as_str))
            .await?;
        rows.into_iter().map(row_to_client).collect()
    }

    #[instrument(skip(self, client), fields(client_id = %client.id))]
    async fn update_client_profile(&self, client: &Client) -> Result<(), PortError> {
        let row = client_to_row(client)?;
        self.repository.update_client_profile(&row).await?;
        Ok(())
    }

    #[instrument(skip(self, client), fields(client_id = %client.id))]
    async fn repair_client_balance(&self, client: &Client, expected_version: i64) -> Result<(), PortError> {
        let row = client_to_row(client)?;
        self.repository.repair_client_balance(&row, expected_version).await?;
        Ok(())
    }

    async fn get_phone_number(&self, id: PhoneNumberId) -> Result<PhoneNumber, PortError> {
        let row = self
            .repository
            .get_phone_number(*id.as_uuid())
            .await?
            .ok_or_else(|| PortError::not_found("PhoneNumber", id))?;
        row_to_phone_number(row)
    }

    async fn find_phone_number(&self, number: &str) -> Result<Option<PhoneNumber>, PortError> {
        self.repository
            .find_phone_number(number)
            .await?
            .map(row_to_phone_number)
            .transpose()
    }

    async fn list_phone_numbers(&self, client_id: ClientId) -> Result<Vec<PhoneNumber>, PortError> {
        let rows = self.repository.list_phone_numbers(*client_id.as_uuid()).await?;
        rows.into_iter().map(row_to_phone_number).collect()
    }

    #[instrument(skip(self, number, events), fields(phone_number_id = %number.id, status = %number.status.as_str()))]
    async fn update_phone_number(&self, number: &PhoneNumber, events: &[OutboxEvent]) -> Result<(), PortError> {
        let row = phone_number_to_row(number)?;
        let events = events_to_rows(events)?;
        self.repository.update_phone_number(&row, &events).await?;
        Ok(())
    }

    async fn append_usage(&self, record: &UsageRecord) -> Result<AppendOutcome, PortError> {
        let row = usage_to_row(record)?;
        match self.repository.append_usage(&row).await? {
            AppendResult::Inserted => Ok(AppendOutcome::Appended(record.clone())),
            AppendResult::Duplicate(existing) => Ok(AppendOutcome::Duplicate(row_to_usage(existing)?)),
            AppendResult::Closed(closed_through) => Ok(AppendOutcome::PeriodClosed { closed_through }),
        }
    }

    async fn usage_page(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
        after: Option<UsageCursor>,
        limit: usize,
    ) -> Result<UsagePage, PortError> {
        let rows = self
            .repository
            .usage_page(
                *client_id.as_uuid(),
                period.start(),
                period.end(),
                after.map(|c| (c.timestamp, *c.id.as_uuid())),
                to_sql_limit(limit.saturating_add(1)),
            )
            .await?;

        let mut records = rows
            .into_iter()
            .map(row_to_usage)
            .collect::<Result<Vec<_>, _>>()?;
        let next = if records.len() > limit {
            records.truncate(limit);
            records.last().map(UsageRecord::cursor)
        } else {
            None
        };
        Ok(UsagePage { records, next })
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError> {
        let row = self
            .repository
            .get_invoice(*id.as_uuid())
            .await?
            .ok_or_else(|| PortError::not_found("Invoice", id))?;
        row_to_invoice(row)
    }

    async fn find_period_invoice(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
    ) -> Result<Option<Invoice>, PortError> {
        self.repository
            .find_period_invoice(*client_id.as_uuid(), period.start(), period.end())
            .await?
            .map(row_to_invoice)
            .transpose()
    }

    async fn list_invoices(&self, query: &InvoiceQuery) -> Result<InvoicePage, PortError> {
        let (rows, total) = self
            .repository
            .list_invoices(
                query.client_id.map(|id| *id.as_uuid()),
                query.status.as_ref().map(|s| s.as_str()),
                query.as_of,
                to_sql_limit(query.limit),
                to_sql_limit(query.offset),
            )
            .await?;
        let invoices = rows
            .into_iter()
            .map(row_to_invoice)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(InvoicePage {
            invoices,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn client_invoices(&self, client_id: ClientId) -> Result<Vec<Invoice>, PortError> {
        let rows = self.repository.client_invoices(*client_id.as_uuid()).await?;
        rows.into_iter().map(row_to_invoice).collect()
    }

    async fn outstanding_invoices(&self, client_id: ClientId) -> Result<Vec<Invoice>, PortError> {
        let rows = self.repository.outstanding_invoices(*client_id.as_uuid()).await?;
        rows.into_iter().map(row_to_invoice).collect()
    }

    #[instrument(
        skip(self, commit),
        fields(
            client_id = %commit.invoice.client_id,
            invoice_number = %commit.invoice.invoice_number,
            expected_version = commit.expected_version
        )
    )]
    async fn commit_invoice(&self, commit: &InvoiceCommit) -> Result<(), PortError> {
        let write = InvoiceWrite {
            invoice: invoice_to_rows(&commit.invoice)?,
            client: client_to_row(&commit.client)?,
            expected_version: commit.expected_version,
            provisioned_number: commit
                .provisioned_number
                .as_ref()
                .map(phone_number_to_row)
                .transpose()?,
            events: events_to_rows(&commit.events)?,
        };
        self.repository.commit_invoice(&write).await?;
        debug!("Committed invoice");
        Ok(())
    }

    async fn update_invoice_statuses(&self, invoices: &[Invoice], events: &[OutboxEvent]) -> Result<(), PortError> {
        let rows = invoices
            .iter()
            .map(|i| invoice_to_rows(i).map(|w| w.invoice))
            .collect::<Result<Vec<_>, _>>()?;
        let events = events_to_rows(events)?;
        self.repository.update_invoice_statuses(&rows, &events).await?;
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError> {
        let row = self
            .repository
            .get_payment(*id.as_uuid())
            .await?
            .ok_or_else(|| PortError::not_found("Payment", id))?;
        row_to_payment(row)
    }

    async fn list_payments(&self, client_id: ClientId) -> Result<Vec<Payment>, PortError> {
        let rows = self.repository.list_payments(*client_id.as_uuid()).await?;
        rows.into_iter().map(row_to_payment).collect()
    }

    async fn refunds_of(&self, payment_id: PaymentId) -> Result<Vec<Payment>, PortError> {
        let rows = self.repository.refunds_of(*payment_id.as_uuid()).await?;
        rows.into_iter().map(row_to_payment).collect()
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.id, client_id = %payment.client_id))]
    async fn insert_failed_payment(&self, payment: &Payment) -> Result<(), PortError> {
        let row = payment_to_row(payment)?;
        self.repository.insert_payment(&row).await?;
        Ok(())
    }

    #[instrument(skip(self, commit), fields(client_id = %commit.client.id, expected_version = commit.expected_version))]
    async fn commit_settlement(&self, commit: &SettlementCommit) -> Result<(), PortError> {
        let write = SettlementWrite {
            payment: commit.payment.as_ref().map(payment_to_row).transpose()?,
            invoices: commit
                .invoices
                .iter()
                .map(|i| invoice_to_rows(i).map(|w| w.invoice))
                .collect::<Result<Vec<_>, _>>()?,
            client: client_to_row(&commit.client)?,
            expected_version: commit.expected_version,
            events: events_to_rows(&commit.events)?,
        };
        self.repository.commit_settlement(&write).await?;
        debug!("Committed settlement");
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
        let claimed = self
            .repository
            .claim_period_close(*client_id.as_uuid(), period.start(), holder, now, now - lease)
            .await?;
        Ok(claimed)
    }

    async fn release_period_close(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
        holder: &str,
    ) -> Result<(), PortError> {
        self.repository
            .release_period_close(*client_id.as_uuid(), period.start(), holder)
            .await?;
        Ok(())
    }

    async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>, PortError> {
        let rows = self.repository.pending_events(to_sql_limit(limit)).await?;
        rows.into_iter().map(row_to_event).collect()
    }

    async fn mark_event_delivered(&self, id: EventId, at: DateTime<Utc>) -> Result<(), PortError> {
        self.repository.mark_event_delivered(*id.as_uuid(), at).await?;
        Ok(())
    }

    async fn record_event_failure(&self, id: EventId, error: &str) -> Result<(), PortError> {
        self.repository.record_event_failure(*id.as_uuid(), error).await?;
        Ok(())
    }
}

// ============================================================================
// Conversions
// ============================================================================

fn to_sql_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_column<T>(value: &str, column: &str) -> Result<T, PortError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| PortError::transformation(format!("invalid {} '{}': {}", column, value, e)))
}

fn to_json<T: Serialize>(value: &T, column: &str) -> Result<Json<serde_json::Value>, PortError> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| PortError::transformation(format!("cannot encode {}: {}", column, e)))
}

fn from_json<T: DeserializeOwned>(value: Json<serde_json::Value>, column: &str) -> Result<T, PortError> {
    serde_json::from_value(value.0)
        .map_err(|e| PortError::transformation(format!("cannot decode {}: {}", column, e)))
}

fn minor(money: &Money, column: &str) -> Result<i64, PortError> {
    money
        .to_minor()
        .map_err(|e| PortError::transformation(format!("{} is not storable in minor units: {}", column, e)))
}

fn to_i64(value: u64, column: &str) -> Result<i64, PortError> {
    i64::try_from(value).map_err(|_| PortError::transformation(format!("{} out of range", column)))
}

fn to_i32(value: u32, column: &str) -> Result<i32, PortError> {
    i32::try_from(value).map_err(|_| PortError::transformation(format!("{} out of range", column)))
}

fn from_i64(value: i64, column: &str) -> Result<u64, PortError> {
    u64::try_from(value).map_err(|_| PortError::transformation(format!("negative {}", column)))
}

fn from_i32(value: i32, column: &str) -> Result<u32, PortError> {
    u32::try_from(value).map_err(|_| PortError::transformation(format!("negative {}", column)))
}

fn period(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<BillingPeriod, PortError> {
    BillingPeriod::new(start, end).map_err(|e| PortError::transformation(e.to_string()))
}

fn client_to_row(client: &Client) -> Result<ClientRow, PortError> {
    Ok(ClientRow {
        client_id: *client.id.as_uuid(),
        code: client.code.clone(),
        name: client.name.clone(),
        currency: client.currency.code().to_string(),
        billing_cycle: client.billing_cycle.as_str().to_string(),
        billing_anchor: client.billing_anchor,
        payment_terms_days: to_i32(client.payment_terms_days, "payment_terms_days")?,
        tax_rate: client.tax_rate.as_decimal(),
        rate_card: to_json(&client.rate_card, "rate_card")?,
        credit_limit: client.credit_limit.amount(),
        current_balance_minor: minor(&client.current_balance, "current_balance")?,
        unapplied_credit_minor: minor(&client.unapplied_credit, "unapplied_credit")?,
        invoice_sequence: to_i64(client.invoice_sequence, "invoice_sequence")?,
        closed_through: client.closed_through,
        status: client.status.as_str().to_string(),
        version: client.version,
        created_at: client.created_at,
        updated_at: client.updated_at,
    })
}

fn row_to_client(row: ClientRow) -> Result<Client, PortError> {
    let currency: Currency = parse_column(&row.currency, "currency")?;
    Ok(Client {
        id: ClientId::from_uuid(row.client_id),
        code: row.code,
        name: row.name,
        currency,
        billing_cycle: parse_column(&row.billing_cycle, "billing_cycle")?,
        billing_anchor: row.billing_anchor,
        payment_terms_days: from_i32(row.payment_terms_days, "payment_terms_days")?,
        tax_rate: Rate::new(row.tax_rate).map_err(|e| PortError::transformation(e.to_string()))?,
        rate_card: from_json(row.rate_card, "rate_card")?,
        credit_limit: Money::new(row.credit_limit, currency),
        current_balance: Money::from_minor(row.current_balance_minor, currency),
        unapplied_credit: Money::from_minor(row.unapplied_credit_minor, currency),
        invoice_sequence: from_i64(row.invoice_sequence, "invoice_sequence")?,
        closed_through: row.closed_through,
        status: parse_column(&row.status, "status")?,
        version: row.version,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn phone_number_to_row(number: &PhoneNumber) -> Result<PhoneNumberRow, PortError> {
    Ok(PhoneNumberRow {
        phone_number_id: *number.id.as_uuid(),
        client_id: *number.client_id.as_uuid(),
        number: number.number.clone(),
        number_type: number.number_type.as_str().to_string(),
        friendly_name: number.friendly_name.clone(),
        monthly_fee: number.monthly_fee.amount(),
        currency: number.monthly_fee.currency().code().to_string(),
        capabilities: to_json(&number.capabilities, "capabilities")?,
        status: number.status.as_str().to_string(),
        provisioned_at: number.provisioned_at,
        prepaid_through: number.prepaid_through,
        released_at: number.released_at,
        created_at: number.created_at,
        updated_at: number.updated_at,
    })
}

fn row_to_phone_number(row: PhoneNumberRow) -> Result<PhoneNumber, PortError> {
    let currency: Currency = parse_column(&row.currency, "currency")?;
    Ok(PhoneNumber {
        id: PhoneNumberId::from_uuid(row.phone_number_id),
        client_id: ClientId::from_uuid(row.client_id),
        number: row.number,
        number_type: parse_column(&row.number_type, "number_type")?,
        friendly_name: row.friendly_name,
        monthly_fee: Money::new(row.monthly_fee, currency),
        capabilities: from_json(row.capabilities, "capabilities")?,
        status: parse_column(&row.status, "status")?,
        provisioned_at: row.provisioned_at,
        prepaid_through: row.prepaid_through,
        released_at: row.released_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn usage_to_row(record: &UsageRecord) -> Result<UsageRow, PortError> {
    Ok(UsageRow {
        usage_record_id: *record.id.as_uuid(),
        client_id: *record.client_id.as_uuid(),
        phone_number_id: *record.phone_number_id.as_uuid(),
        phone_number: record.phone_number.clone(),
        usage_type: record.usage_type.as_str().to_string(),
        from_number: record.from_number.clone(),
        to_number: record.to_number.clone(),
        duration_secs: record.duration_secs.map(|d| to_i32(d, "duration_secs")).transpose()?,
        billable_secs: record.billable_secs.map(|d| to_i32(d, "billable_secs")).transpose()?,
        quantity: to_i32(record.quantity, "quantity")?,
        cost: record.cost.amount(),
        currency: record.cost.currency().code().to_string(),
        occurred_at: record.timestamp,
        external_id: record.external_id.clone(),
        recorded_at: record.recorded_at,
    })
}

fn row_to_usage(row: UsageRow) -> Result<UsageRecord, PortError> {
    let currency: Currency = parse_column(&row.currency, "currency")?;
    Ok(UsageRecord {
        id: UsageRecordId::from_uuid(row.usage_record_id),
        client_id: ClientId::from_uuid(row.client_id),
        phone_number_id: PhoneNumberId::from_uuid(row.phone_number_id),
        phone_number: row.phone_number,
        usage_type: parse_column(&row.usage_type, "usage_type")?,
        from_number: row.from_number,
        to_number: row.to_number,
        duration_secs: row.duration_secs.map(|d| from_i32(d, "duration_secs")).transpose()?,
        billable_secs: row.billable_secs.map(|d| from_i32(d, "billable_secs")).transpose()?,
        quantity: from_i32(row.quantity, "quantity")?,
        cost: Money::new(row.cost, currency),
        timestamp: row.occurred_at,
        external_id: row.external_id,
        recorded_at: row.recorded_at,
    })
}

fn invoice_to_rows(invoice: &Invoice) -> Result<InvoiceWithLines, PortError> {
    let invoice_id = *invoice.id.as_uuid();
    let lines = invoice
        .line_items
        .iter()
        .enumerate()
        .map(|(position, line)| {
            Ok(LineItemRow {
                line_item_id: *line.id.as_uuid(),
                invoice_id,
                position: i32::try_from(position)
                    .map_err(|_| PortError::transformation("too many line items"))?,
                description: line.description.clone(),
                category: line.category.as_str().to_string(),
                phone_number_id: line.phone_number_id.map(|id| *id.as_uuid()),
                quantity: line.quantity,
                unit_price: line.unit_price.amount(),
                amount: line.amount.amount(),
            })
        })
        .collect::<Result<Vec<_>, PortError>>()?;

    Ok(InvoiceWithLines {
        invoice: InvoiceRow {
            invoice_id,
            client_id: *invoice.client_id.as_uuid(),
            invoice_number: invoice.invoice_number.clone(),
            sequence: to_i64(invoice.sequence, "sequence")?,
            kind: invoice.kind.as_str().to_string(),
            status: invoice.status.as_str().to_string(),
            period_start: invoice.period.start(),
            period_end: invoice.period.end(),
            due_date: invoice.due_date,
            currency: invoice.currency.code().to_string(),
            subtotal_minor: minor(&invoice.subtotal, "subtotal")?,
            tax_rate: invoice.tax_rate.as_decimal(),
            tax_minor: minor(&invoice.tax_amount, "tax_amount")?,
            total_minor: minor(&invoice.total_amount, "total_amount")?,
            paid_minor: minor(&invoice.paid_amount, "paid_amount")?,
            usage_summary: invoice
                .usage_summary
                .as_ref()
                .map(|s| to_json(s, "usage_summary"))
                .transpose()?,
            issued_at: invoice.issued_at,
            paid_at: invoice.paid_at,
            cancelled_at: invoice.cancelled_at,
            created_at: invoice.created_at,
            updated_at: invoice.updated_at,
        },
        lines,
    })
}

fn row_to_invoice(data: InvoiceWithLines) -> Result<Invoice, PortError> {
    let row = data.invoice;
    let currency: Currency = parse_column(&row.currency, "currency")?;
    let line_items = data
        .lines
        .into_iter()
        .map(|line| {
            Ok(LineItem {
                id: LineItemId::from_uuid(line.line_item_id),
                description: line.description,
                category: parse_column(&line.category, "category")?,
                phone_number_id: line.phone_number_id.map(PhoneNumberId::from_uuid),
                quantity: line.quantity,
                unit_price: Money::new(line.unit_price, currency),
                amount: Money::new(line.amount, currency),
            })
        })
        .collect::<Result<Vec<_>, PortError>>()?;

    Ok(Invoice {
        id: InvoiceId::from_uuid(row.invoice_id),
        client_id: ClientId::from_uuid(row.client_id),
        invoice_number: row.invoice_number,
        sequence: from_i64(row.sequence, "sequence")?,
        kind: parse_column(&row.kind, "kind")?,
        status: parse_column(&row.status, "status")?,
        period: period(row.period_start, row.period_end)?,
        due_date: row.due_date,
        currency,
        line_items,
        subtotal: Money::from_minor(row.subtotal_minor, currency),
        tax_rate: Rate::new(row.tax_rate).map_err(|e| PortError::transformation(e.to_string()))?,
        tax_amount: Money::from_minor(row.tax_minor, currency),
        total_amount: Money::from_minor(row.total_minor, currency),
        paid_amount: Money::from_minor(row.paid_minor, currency),
        usage_summary: row
            .usage_summary
            .map(|s| from_json(s, "usage_summary"))
            .transpose()?,
        issued_at: row.issued_at,
        paid_at: row.paid_at,
        cancelled_at: row.cancelled_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn payment_to_row(payment: &Payment) -> Result<PaymentRow, PortError> {
    Ok(PaymentRow {
        payment_id: *payment.id.as_uuid(),
        client_id: *payment.client_id.as_uuid(),
        invoice_id: payment.invoice_id.map(|id| *id.as_uuid()),
        amount_minor: minor(&payment.amount, "amount")?,
        currency: payment.amount.currency().code().to_string(),
        method: payment.method.as_str().to_string(),
        reference_number: payment.reference_number.clone(),
        status: payment.status.as_str().to_string(),
        allocations: to_json(&payment.allocations, "allocations")?,
        unapplied_minor: minor(&payment.unapplied_amount, "unapplied_amount")?,
        refund_of: payment.refund_of.map(|id| *id.as_uuid()),
        notes: payment.notes.clone(),
        received_at: payment.received_at,
        created_at: payment.created_at,
        updated_at: payment.updated_at,
    })
}

fn row_to_payment(row: PaymentRow) -> Result<Payment, PortError> {
    let currency: Currency = parse_column(&row.currency, "currency")?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.payment_id),
        client_id: ClientId::from_uuid(row.client_id),
        invoice_id: row.invoice_id.map(InvoiceId::from_uuid),
        amount: Money::from_minor(row.amount_minor, currency),
        method: parse_column(&row.method, "method")?,
        reference_number: row.reference_number,
        status: parse_column(&row.status, "status")?,
        allocations: from_json(row.allocations, "allocations")?,
        unapplied_amount: Money::from_minor(row.unapplied_minor, currency),
        refund_of: row.refund_of.map(PaymentId::from_uuid),
        notes: row.notes,
        received_at: row.received_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn events_to_rows(events: &[OutboxEvent]) -> Result<Vec<OutboxRow>, PortError> {
    events
        .iter()
        .map(|event| {
            Ok(OutboxRow {
                event_id: *event.id.as_uuid(),
                client_id: *event.client_id.as_uuid(),
                event_type: event.event.name().to_string(),
                payload: to_json(&event.event, "payload")?,
                occurred_at: event.occurred_at,
                attempts: to_i32(event.attempts, "attempts")?,
                last_error: event.last_error.clone(),
                delivered_at: event.delivered_at,
            })
        })
        .collect()
}

fn row_to_event(row: OutboxRow) -> Result<OutboxEvent, PortError> {
    Ok(OutboxEvent {
        id: EventId::from_uuid(row.event_id),
        client_id: ClientId::from_uuid(row.client_id),
        event: from_json(row.payload, "payload")?,
        occurred_at: row.occurred_at,
        attempts: from_i32(row.attempts, "attempts")?,
        last_error: row.last_error,
        delivered_at: row.delivered_at,
    })
}
