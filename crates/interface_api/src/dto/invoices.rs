//! Invoice DTOs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use core_kernel::{ClientId, Currency, InvoiceId, LineItemId, PhoneNumberId};
use domain_billing::{
    AggregationResult, Invoice, InvoiceKind, InvoicePage, InvoiceQuery, InvoiceStatus, LineItem,
    LineItemCategory,
};

use super::{money, precise};

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceListQuery {
    pub client_id: Option<ClientId>,
    pub status: Option<InvoiceStatus>,
    #[validate(range(min = 1, max = 200, message = "limit must be between 1 and 200"))]
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl InvoiceListQuery {
    pub fn into_query(self) -> InvoiceQuery {
        InvoiceQuery {
            client_id: self.client_id,
            status: self.status,
            limit: self.limit.unwrap_or(50),
            offset: self.offset.unwrap_or(0),
            as_of: None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateInvoiceRequest {
    pub client_id: ClientId,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemResponse {
    pub id: LineItemId,
    pub description: String,
    pub category: LineItemCategory,
    pub phone_number_id: Option<PhoneNumberId>,
    pub quantity: Decimal,
    pub unit_price: String,
    pub amount: String,
}

impl From<LineItem> for LineItemResponse {
    fn from(line: LineItem) -> Self {
        Self {
            id: line.id,
            unit_price: precise(&line.unit_price),
            amount: precise(&line.amount),
            description: line.description,
            category: line.category,
            phone_number_id: line.phone_number_id,
            quantity: line.quantity,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResponse {
    pub id: InvoiceId,
    pub client_id: ClientId,
    pub invoice_number: String,
    pub kind: InvoiceKind,
    pub status: InvoiceStatus,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
    pub due_date: NaiveDate,
    pub currency: Currency,
    pub line_items: Vec<LineItemResponse>,
    pub subtotal: String,
    pub tax_rate_percent: Decimal,
    pub tax_amount: String,
    pub total_amount: String,
    pub paid_amount: String,
    pub amount_due: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_summary: Option<AggregationResult>,
    pub issued_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        let amount_due = invoice
            .outstanding()
            .map(|due| money(&due))
            .unwrap_or_else(|_| money(&invoice.total_amount));
        Self {
            id: invoice.id,
            client_id: invoice.client_id,
            kind: invoice.kind,
            status: invoice.status,
            billing_period_start: invoice.period.start(),
            billing_period_end: invoice.period.end(),
            due_date: invoice.due_date,
            currency: invoice.currency,
            subtotal: money(&invoice.subtotal),
            tax_rate_percent: invoice.tax_rate.as_percentage().normalize(),
            tax_amount: money(&invoice.tax_amount),
            total_amount: money(&invoice.total_amount),
            paid_amount: money(&invoice.paid_amount),
            amount_due,
            issued_at: invoice.issued_at,
            paid_at: invoice.paid_at,
            cancelled_at: invoice.cancelled_at,
            created_at: invoice.created_at,
            invoice_number: invoice.invoice_number,
            line_items: invoice.line_items.into_iter().map(LineItemResponse::from).collect(),
            usage_summary: invoice.usage_summary,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePageResponse {
    pub invoices: Vec<InvoiceResponse>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

impl InvoicePageResponse {
    pub fn new(page: InvoicePage, query: &InvoiceQuery) -> Self {
        Self {
            invoices: page.invoices.into_iter().map(InvoiceResponse::from).collect(),
            total: page.total,
            limit: query.limit,
            offset: query.offset,
        }
    }
}
