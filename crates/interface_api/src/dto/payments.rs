//! Payment DTOs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use core_kernel::{ClientId, Currency, InvoiceId, Money, PaymentId};
use domain_billing::{Payment, PaymentAllocation, PaymentMethod, PaymentRequest, PaymentStatus, Settlement};

use super::invoices::InvoiceResponse;
use super::money;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub client_id: ClientId,
    pub invoice_id: Option<InvoiceId>,
    pub amount: Decimal,
    /// Defaults to the client's currency
    pub currency: Option<Currency>,
    pub method: PaymentMethod,
    #[validate(length(min = 1, max = 64, message = "reference number must be 1 to 64 characters"))]
    pub reference_number: Option<String>,
}

impl CreatePaymentRequest {
    pub fn into_request(self, client_currency: Currency) -> PaymentRequest {
        let amount = Money::new(self.amount, self.currency.unwrap_or(client_currency));
        let mut request = PaymentRequest::new(self.client_id, amount, self.method);
        if let Some(invoice_id) = self.invoice_id {
            request = request.for_invoice(invoice_id);
        }
        if let Some(reference) = self.reference_number {
            request = request.with_reference(reference);
        }
        request
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RefundRequest {
    /// Omit to refund whatever has not been refunded yet
    pub amount: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentListQuery {
    pub client_id: ClientId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResponse {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub amount: String,
}

impl From<PaymentAllocation> for AllocationResponse {
    fn from(allocation: PaymentAllocation) -> Self {
        Self {
            invoice_id: allocation.invoice_id,
            amount: money(&allocation.amount),
            invoice_number: allocation.invoice_number,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: PaymentId,
    pub client_id: ClientId,
    pub invoice_id: Option<InvoiceId>,
    pub amount: String,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub reference_number: Option<String>,
    pub status: PaymentStatus,
    pub allocations: Vec<AllocationResponse>,
    pub unapplied_amount: String,
    pub refund_of: Option<PaymentId>,
    pub notes: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            client_id: payment.client_id,
            invoice_id: payment.invoice_id,
            amount: money(&payment.amount),
            currency: payment.amount.currency(),
            method: payment.method,
            reference_number: payment.reference_number,
            status: payment.status,
            allocations: payment.allocations.into_iter().map(AllocationResponse::from).collect(),
            unapplied_amount: money(&payment.unapplied_amount),
            refund_of: payment.refund_of,
            notes: payment.notes,
            received_at: payment.received_at,
        }
    }
}

/// A payment or refund with every invoice it changed
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    pub payment: PaymentResponse,
    pub invoices: Vec<InvoiceResponse>,
}

impl From<Settlement> for SettlementResponse {
    fn from(settlement: Settlement) -> Self {
        Self {
            payment: settlement.payment.into(),
            invoices: settlement.invoices.into_iter().map(InvoiceResponse::from).collect(),
        }
    }
}
