//! Billing repository implementation
//!
//! Row types and SQL for clients, phone numbers, usage, invoices, payments,
//! period-close leases and the outbox. Every money-moving write runs in one
//! transaction that locks the client row, checks its version, and bumps it.
//!
//! Queries use the runtime `sqlx::query*` API so the crate builds without a
//! live database.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::DatabaseError;

/// `$1` client, `$2` status, `$3` the date a status filter is evaluated on
const INVOICE_LIST_FILTER: &str = r#"
    ($1::uuid IS NULL OR client_id = $1)
    AND ($2::text IS NULL OR
        (CASE
            WHEN $3::date IS NOT NULL AND status = 'pending'
                 AND due_date < $3 AND paid_minor < total_minor THEN 'overdue'
            ELSE status
         END) = $2)
"#;

// ============================================================================
// Row types
// ============================================================================

/// Row of the `clients` table
#[derive(Debug, Clone, FromRow)]
pub struct ClientRow {
    pub client_id: Uuid,
    pub code: String,
    pub name: String,
    pub currency: String,
    pub billing_cycle: String,
    pub billing_anchor: NaiveDate,
    pub payment_terms_days: i32,
    pub tax_rate: Decimal,
    pub rate_card: Json<Value>,
    pub credit_limit: Decimal,
    pub current_balance_minor: i64,
    pub unapplied_credit_minor: i64,
    pub invoice_sequence: i64,
    pub closed_through: Option<DateTime<Utc>>,
    pub status: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the `phone_numbers` table
#[derive(Debug, Clone, FromRow)]
pub struct PhoneNumberRow {
    pub phone_number_id: Uuid,
    pub client_id: Uuid,
    pub number: String,
    pub number_type: String,
    pub friendly_name: Option<String>,
    pub monthly_fee: Decimal,
    pub currency: String,
    pub capabilities: Json<Value>,
    pub status: String,
    pub provisioned_at: DateTime<Utc>,
    pub prepaid_through: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the `usage_records` table
#[derive(Debug, Clone, FromRow)]
pub struct UsageRow {
    pub usage_record_id: Uuid,
    pub client_id: Uuid,
    pub phone_number_id: Uuid,
    pub phone_number: String,
    pub usage_type: String,
    pub from_number: String,
    pub to_number: String,
    pub duration_secs: Option<i32>,
    pub billable_secs: Option<i32>,
    pub quantity: i32,
    pub cost: Decimal,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
    pub external_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Row of the `invoices` table
#[derive(Debug, Clone, FromRow)]
pub struct InvoiceRow {
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    pub sequence: i64,
    pub kind: String,
    pub status: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub due_date: NaiveDate,
    pub currency: String,
    pub subtotal_minor: i64,
    pub tax_rate: Decimal,
    pub tax_minor: i64,
    pub total_minor: i64,
    pub paid_minor: i64,
    pub usage_summary: Option<Json<Value>>,
    pub issued_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the `invoice_line_items` table
#[derive(Debug, Clone, FromRow)]
pub struct LineItemRow {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub position: i32,
    pub description: String,
    pub category: String,
    pub phone_number_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

/// An invoice row with its lines in position order
#[derive(Debug, Clone)]
pub struct InvoiceWithLines {
    pub invoice: InvoiceRow,
    pub lines: Vec<LineItemRow>,
}

/// Row of the `payments` table
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub payment_id: Uuid,
    pub client_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub amount_minor: i64,
    pub currency: String,
    pub method: String,
    pub reference_number: Option<String>,
    pub status: String,
    pub allocations: Json<Value>,
    pub unapplied_minor: i64,
    pub refund_of: Option<Uuid>,
    pub notes: Option<String>,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the `outbox_events` table
#[derive(Debug, Clone, FromRow)]
pub struct OutboxRow {
    pub event_id: Uuid,
    pub client_id: Uuid,
    pub event_type: String,
    pub payload: Json<Value>,
    pub occurred_at: DateTime<Utc>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Result of a usage append
#[derive(Debug, Clone)]
pub enum AppendResult {
    Inserted,
    /// The external id is already recorded for this client
    Duplicate(UsageRow),
    /// The client's watermark is past the record's timestamp
    Closed(DateTime<Utc>),
}

/// A new invoice with everything committed alongside it
#[derive(Debug, Clone)]
pub struct InvoiceWrite {
    pub invoice: InvoiceWithLines,
    pub client: ClientRow,
    pub expected_version: i64,
    pub provisioned_number: Option<PhoneNumberRow>,
    pub events: Vec<OutboxRow>,
}

/// A settlement, refund or cancellation
#[derive(Debug, Clone)]
pub struct SettlementWrite {
    pub payment: Option<PaymentRow>,
    pub invoices: Vec<InvoiceRow>,
    pub client: ClientRow,
    pub expected_version: i64,
    pub events: Vec<OutboxRow>,
}

// ============================================================================
// Repository
// ============================================================================

/// Repository for the billing tables
#[derive(Debug, Clone)]
pub struct BillingRepository {
    pool: PgPool,
}

impl BillingRepository {
    /// Creates a new BillingRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ------------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------------

    pub async fn insert_client(&self, row: &ClientRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO clients (
                client_id, code, name, currency, billing_cycle, billing_anchor,
                payment_terms_days, tax_rate, rate_card, credit_limit,
                current_balance_minor, unapplied_credit_minor, invoice_sequence,
                closed_through, status, version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(row.client_id)
        .bind(&row.code)
        .bind(&row.name)
        .bind(&row.currency)
        .bind(&row.billing_cycle)
        .bind(row.billing_anchor)
        .bind(row.payment_terms_days)
        .bind(row.tax_rate)
        .bind(&row.rate_card)
        .bind(row.credit_limit)
        .bind(row.current_balance_minor)
        .bind(row.unapplied_credit_minor)
        .bind(row.invoice_sequence)
        .bind(row.closed_through)
        .bind(&row.status)
        .bind(row.version)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_client(&self, client_id: Uuid) -> Result<Option<ClientRow>, DatabaseError> {
        let row = sqlx::query_as::<_, ClientRow>("SELECT * FROM clients WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_clients(&self, status: Option<&str>) -> Result<Vec<ClientRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, ClientRow>(
            "SELECT * FROM clients WHERE ($1::text IS NULL OR status = $1) ORDER BY code",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Updates profile columns; ledger columns and the version are untouched
    pub async fn update_client_profile(&self, row: &ClientRow) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE clients
            SET name = $2, status = $3, rate_card = $4, tax_rate = $5,
                payment_terms_days = $6, credit_limit = $7, updated_at = $8
            WHERE client_id = $1
            "#,
        )
        .bind(row.client_id)
        .bind(&row.name)
        .bind(&row.status)
        .bind(&row.rate_card)
        .bind(row.tax_rate)
        .bind(row.payment_terms_days)
        .bind(row.credit_limit)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Client", row.client_id));
        }
        Ok(())
    }

    pub async fn repair_client_balance(&self, row: &ClientRow, expected_version: i64) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_client(&mut tx, row.client_id, expected_version).await?;
        Self::write_ledger_state(&mut tx, row).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Locks the client row and checks its version
    async fn lock_client(
        conn: &mut PgConnection,
        client_id: Uuid,
        expected_version: i64,
    ) -> Result<(), DatabaseError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM clients WHERE client_id = $1 FOR UPDATE")
                .bind(client_id)
                .fetch_optional(&mut *conn)
                .await?;

        match version {
            None => Err(DatabaseError::not_found("Client", client_id)),
            Some(current) if current != expected_version => Err(DatabaseError::VersionConflict(format!(
                "client {} is at version {}, expected {}",
                client_id, current, expected_version
            ))),
            Some(_) => Ok(()),
        }
    }

    async fn write_ledger_state(conn: &mut PgConnection, row: &ClientRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE clients
            SET current_balance_minor = $2, unapplied_credit_minor = $3,
                invoice_sequence = $4, closed_through = $5, updated_at = $6,
                version = version + 1
            WHERE client_id = $1
            "#,
        )
        .bind(row.client_id)
        .bind(row.current_balance_minor)
        .bind(row.unapplied_credit_minor)
        .bind(row.invoice_sequence)
        .bind(row.closed_through)
        .bind(row.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Phone numbers
    // ------------------------------------------------------------------------

    pub async fn get_phone_number(&self, id: Uuid) -> Result<Option<PhoneNumberRow>, DatabaseError> {
        let row = sqlx::query_as::<_, PhoneNumberRow>("SELECT * FROM phone_numbers WHERE phone_number_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Most recent assignment of an E.164 number
    pub async fn find_phone_number(&self, number: &str) -> Result<Option<PhoneNumberRow>, DatabaseError> {
        let row = sqlx::query_as::<_, PhoneNumberRow>(
            r#"
            SELECT * FROM phone_numbers
            WHERE number = $1
            ORDER BY provisioned_at DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_phone_numbers(&self, client_id: Uuid) -> Result<Vec<PhoneNumberRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, PhoneNumberRow>(
            "SELECT * FROM phone_numbers WHERE client_id = $1 ORDER BY provisioned_at, phone_number_id",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_phone_number(&self, row: &PhoneNumberRow, events: &[OutboxRow]) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE phone_numbers
            SET friendly_name = $2, status = $3, prepaid_through = $4,
                released_at = $5, updated_at = $6
            WHERE phone_number_id = $1
            "#,
        )
        .bind(row.phone_number_id)
        .bind(&row.friendly_name)
        .bind(&row.status)
        .bind(row.prepaid_through)
        .bind(row.released_at)
        .bind(row.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("PhoneNumber", row.phone_number_id));
        }
        Self::insert_events(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_phone_number(conn: &mut PgConnection, row: &PhoneNumberRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO phone_numbers (
                phone_number_id, client_id, number, number_type, friendly_name,
                monthly_fee, currency, capabilities, status, provisioned_at,
                prepaid_through, released_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(row.phone_number_id)
        .bind(row.client_id)
        .bind(&row.number)
        .bind(&row.number_type)
        .bind(&row.friendly_name)
        .bind(row.monthly_fee)
        .bind(&row.currency)
        .bind(&row.capabilities)
        .bind(&row.status)
        .bind(row.provisioned_at)
        .bind(row.prepaid_through)
        .bind(row.released_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Usage
    // ------------------------------------------------------------------------

    /// Appends a usage row under a shared lock on its client
    ///
    /// The shared lock conflicts with the exclusive lock a period close
    /// takes, so the watermark cannot move while the row is being written.
    pub async fn append_usage(&self, row: &UsageRow) -> Result<AppendResult, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let closed_through: Option<Option<DateTime<Utc>>> =
            sqlx::query_scalar("SELECT closed_through FROM clients WHERE client_id = $1 FOR SHARE")
                .bind(row.client_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(closed_through) = closed_through else {
            return Err(DatabaseError::not_found("Client", row.client_id));
        };

        if let Some(external_id) = &row.external_id {
            if let Some(existing) = Self::usage_by_external_id(&mut tx, row.client_id, external_id).await? {
                return Ok(AppendResult::Duplicate(existing));
            }
        }
        if let Some(closed_through) = closed_through {
            if row.occurred_at < closed_through {
                return Ok(AppendResult::Closed(closed_through));
            }
        }
        let invoiced_through: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT period_end FROM invoices
            WHERE client_id = $1 AND kind = 'period' AND status <> 'cancelled'
              AND period_start <= $2 AND period_end > $2
            LIMIT 1
            "#,
        )
        .bind(row.client_id)
        .bind(row.occurred_at)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(closed_through) = invoiced_through {
            return Ok(AppendResult::Closed(closed_through));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO usage_records (
                usage_record_id, client_id, phone_number_id, phone_number, usage_type,
                from_number, to_number, duration_secs, billable_secs, quantity,
                cost, currency, occurred_at, external_id, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (client_id, external_id) WHERE external_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(row.usage_record_id)
        .bind(row.client_id)
        .bind(row.phone_number_id)
        .bind(&row.phone_number)
        .bind(&row.usage_type)
        .bind(&row.from_number)
        .bind(&row.to_number)
        .bind(row.duration_secs)
        .bind(row.billable_secs)
        .bind(row.quantity)
        .bind(row.cost)
        .bind(&row.currency)
        .bind(row.occurred_at)
        .bind(&row.external_id)
        .bind(row.recorded_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Lost a race with a concurrent append of the same external id
            if let Some(external_id) = &row.external_id {
                if let Some(existing) = Self::usage_by_external_id(&mut tx, row.client_id, external_id).await? {
                    return Ok(AppendResult::Duplicate(existing));
                }
            }
            return Err(DatabaseError::duplicate("UsageRecord", "id", row.usage_record_id));
        }

        tx.commit().await?;
        Ok(AppendResult::Inserted)
    }

    async fn usage_by_external_id(
        conn: &mut PgConnection,
        client_id: Uuid,
        external_id: &str,
    ) -> Result<Option<UsageRow>, DatabaseError> {
        let row = sqlx::query_as::<_, UsageRow>(
            "SELECT * FROM usage_records WHERE client_id = $1 AND external_id = $2",
        )
        .bind(client_id)
        .bind(external_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Rows in `[start, end)` strictly after the `(occurred_at, id)` cursor
    pub async fn usage_page(
        &self,
        client_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<UsageRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT * FROM usage_records
            WHERE client_id = $1
              AND occurred_at >= $2 AND occurred_at < $3
              AND ($4::timestamptz IS NULL OR (occurred_at, usage_record_id) > ($4, $5::uuid))
            ORDER BY occurred_at, usage_record_id
            LIMIT $6
            "#,
        )
        .bind(client_id)
        .bind(start)
        .bind(end)
        .bind(after.map(|(at, _)| at))
        .bind(after.map(|(_, id)| id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ------------------------------------------------------------------------
    // Invoices
    // ------------------------------------------------------------------------

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<InvoiceWithLines>, DatabaseError> {
        let row = sqlx::query_as::<_, InvoiceRow>("SELECT * FROM invoices WHERE invoice_id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.attach_lines(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    pub async fn find_period_invoice(
        &self,
        client_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<InvoiceWithLines>, DatabaseError> {
        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT * FROM invoices
            WHERE client_id = $1 AND period_start = $2 AND period_end = $3
              AND kind = 'period' AND status <> 'cancelled'
            "#,
        )
        .bind(client_id)
        .bind(start)
        .bind(end)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(self.attach_lines(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// A page of invoices, newest period first, with the unpaged total
    ///
    /// With `as_of` set, the status filter sees a past-due pending invoice
    /// that still has money owed as `overdue`.
    pub async fn list_invoices(
        &self,
        client_id: Option<Uuid>,
        status: Option<&str>,
        as_of: Option<NaiveDate>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<InvoiceWithLines>, i64), DatabaseError> {
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM invoices WHERE {INVOICE_LIST_FILTER}"
        ))
        .bind(client_id)
        .bind(status)
        .bind(as_of)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT * FROM invoices WHERE {INVOICE_LIST_FILTER} \
             ORDER BY period_start DESC, sequence DESC LIMIT $4 OFFSET $5"
        ))
        .bind(client_id)
        .bind(status)
        .bind(as_of)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((self.attach_lines(rows).await?, total))
    }

    pub async fn client_invoices(&self, client_id: Uuid) -> Result<Vec<InvoiceWithLines>, DatabaseError> {
        let rows = sqlx::query_as::<_, InvoiceRow>(
            "SELECT * FROM invoices WHERE client_id = $1 ORDER BY sequence",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;
        self.attach_lines(rows).await
    }

    pub async fn outstanding_invoices(&self, client_id: Uuid) -> Result<Vec<InvoiceWithLines>, DatabaseError> {
        let rows = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT * FROM invoices
            WHERE client_id = $1 AND status IN ('pending', 'overdue')
            ORDER BY due_date, sequence
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;
        self.attach_lines(rows).await
    }

    async fn attach_lines(&self, rows: Vec<InvoiceRow>) -> Result<Vec<InvoiceWithLines>, DatabaseError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.invoice_id).collect();
        let lines = sqlx::query_as::<_, LineItemRow>(
            "SELECT * FROM invoice_line_items WHERE invoice_id = ANY($1) ORDER BY invoice_id, position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|invoice| {
                let lines = lines
                    .iter()
                    .filter(|l| l.invoice_id == invoice.invoice_id)
                    .cloned()
                    .collect();
                InvoiceWithLines { invoice, lines }
            })
            .collect())
    }

    /// Inserts an invoice, its lines, an optional new number and events, and
    /// advances the client ledger, all in one transaction
    pub async fn commit_invoice(&self, write: &InvoiceWrite) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_client(&mut tx, write.client.client_id, write.expected_version).await?;

        let invoice = &write.invoice.invoice;
        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_id, client_id, invoice_number, sequence, kind, status,
                period_start, period_end, due_date, currency, subtotal_minor,
                tax_rate, tax_minor, total_minor, paid_minor, usage_summary,
                issued_at, paid_at, cancelled_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(invoice.client_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.sequence)
        .bind(&invoice.kind)
        .bind(&invoice.status)
        .bind(invoice.period_start)
        .bind(invoice.period_end)
        .bind(invoice.due_date)
        .bind(&invoice.currency)
        .bind(invoice.subtotal_minor)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_minor)
        .bind(invoice.total_minor)
        .bind(invoice.paid_minor)
        .bind(&invoice.usage_summary)
        .bind(invoice.issued_at)
        .bind(invoice.paid_at)
        .bind(invoice.cancelled_at)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *tx)
        .await?;

        for line in &write.invoice.lines {
            sqlx::query(
                r#"
                INSERT INTO invoice_line_items (
                    line_item_id, invoice_id, position, description, category,
                    phone_number_id, quantity, unit_price, amount
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(line.line_item_id)
            .bind(line.invoice_id)
            .bind(line.position)
            .bind(&line.description)
            .bind(&line.category)
            .bind(line.phone_number_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.amount)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(number) = &write.provisioned_number {
            Self::insert_phone_number(&mut tx, number).await?;
        }
        Self::insert_events(&mut tx, &write.events).await?;
        Self::write_ledger_state(&mut tx, &write.client).await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn update_invoice_statuses(
        &self,
        invoices: &[InvoiceRow],
        events: &[OutboxRow],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        for invoice in invoices {
            sqlx::query("UPDATE invoices SET status = $2, updated_at = $3 WHERE invoice_id = $1")
                .bind(invoice.invoice_id)
                .bind(&invoice.status)
                .bind(invoice.updated_at)
                .execute(&mut *tx)
                .await?;
        }
        Self::insert_events(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------------

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<PaymentRow>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE payment_id = $1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_payments(&self, client_id: Uuid) -> Result<Vec<PaymentRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE client_id = $1 ORDER BY received_at, payment_id",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn refunds_of(&self, payment_id: Uuid) -> Result<Vec<PaymentRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE refund_of = $1 ORDER BY payment_id",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert_payment(&self, row: &PaymentRow) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_payment_row(&mut conn, row).await
    }

    async fn insert_payment_row(conn: &mut PgConnection, row: &PaymentRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, client_id, invoice_id, amount_minor, currency, method,
                reference_number, status, allocations, unapplied_minor, refund_of,
                notes, received_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(row.payment_id)
        .bind(row.client_id)
        .bind(row.invoice_id)
        .bind(row.amount_minor)
        .bind(&row.currency)
        .bind(&row.method)
        .bind(&row.reference_number)
        .bind(&row.status)
        .bind(&row.allocations)
        .bind(row.unapplied_minor)
        .bind(row.refund_of)
        .bind(&row.notes)
        .bind(row.received_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Writes invoice payment state, the payment, events and the client
    /// ledger in one transaction
    pub async fn commit_settlement(&self, write: &SettlementWrite) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_client(&mut tx, write.client.client_id, write.expected_version).await?;

        for invoice in &write.invoices {
            let result = sqlx::query(
                r#"
                UPDATE invoices
                SET status = $2, paid_minor = $3, paid_at = $4, cancelled_at = $5, updated_at = $6
                WHERE invoice_id = $1
                "#,
            )
            .bind(invoice.invoice_id)
            .bind(&invoice.status)
            .bind(invoice.paid_minor)
            .bind(invoice.paid_at)
            .bind(invoice.cancelled_at)
            .bind(invoice.updated_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DatabaseError::not_found("Invoice", invoice.invoice_id));
            }
        }

        if let Some(payment) = &write.payment {
            Self::insert_payment_row(&mut tx, payment).await?;
        }
        Self::insert_events(&mut tx, &write.events).await?;
        Self::write_ledger_state(&mut tx, &write.client).await?;

        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Period close leases
    // ------------------------------------------------------------------------

    /// Claims a lease unless another holder's claim is newer than `expires_before`
    pub async fn claim_period_close(
        &self,
        client_id: Uuid,
        period_start: DateTime<Utc>,
        holder: &str,
        now: DateTime<Utc>,
        expires_before: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO period_close_leases (client_id, period_start, holder, claimed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (client_id, period_start) DO UPDATE
            SET holder = EXCLUDED.holder, claimed_at = EXCLUDED.claimed_at
            WHERE period_close_leases.holder = EXCLUDED.holder
               OR period_close_leases.claimed_at <= $5
            RETURNING holder
            "#,
        )
        .bind(client_id)
        .bind(period_start)
        .bind(holder)
        .bind(now)
        .bind(expires_before)
        .fetch_optional(&self.pool)
        .await?;
        Ok(claimed.is_some())
    }

    pub async fn release_period_close(
        &self,
        client_id: Uuid,
        period_start: DateTime<Utc>,
        holder: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "DELETE FROM period_close_leases WHERE client_id = $1 AND period_start = $2 AND holder = $3",
        )
        .bind(client_id)
        .bind(period_start)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Outbox
    // ------------------------------------------------------------------------

    async fn insert_events(conn: &mut PgConnection, events: &[OutboxRow]) -> Result<(), DatabaseError> {
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO outbox_events (
                    event_id, client_id, event_type, payload, occurred_at,
                    attempts, last_error, delivered_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id)
            .bind(event.client_id)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(event.occurred_at)
            .bind(event.attempts)
            .bind(&event.last_error)
            .bind(event.delivered_at)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Undelivered events in insertion order
    pub async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT * FROM outbox_events WHERE delivered_at IS NULL ORDER BY sequence LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn mark_event_delivered(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE outbox_events SET delivered_at = $2, attempts = attempts + 1 WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("OutboxEvent", event_id));
        }
        Ok(())
    }

    pub async fn record_event_failure(&self, event_id: Uuid, error: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE outbox_events SET attempts = attempts + 1, last_error = $2 WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("OutboxEvent", event_id));
        }
        Ok(())
    }
}
