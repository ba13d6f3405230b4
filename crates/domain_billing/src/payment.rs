//! Payment processing
//!
//! Payments are immutable records. Applying one allocates it across the
//! client's outstanding invoices (a named invoice, or oldest-due first) and
//! parks any remainder as unapplied credit. A refund is a new record that
//! references the original and reverses what it did.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{ClientId, InvoiceId, Money, PaymentId};

use crate::balance::AccountBalanceTracker;
use crate::client::Client;
use crate::error::BillingError;
use crate::invoice::{Invoice, InvoiceStatus};

/// Payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Ach,
    Wire,
    Check,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Ach => "ach",
            PaymentMethod::Wire => "wire",
            PaymentMethod::Check => "check",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "ach" => Ok(PaymentMethod::Ach),
            "wire" => Ok(PaymentMethod::Wire),
            "check" => Ok(PaymentMethod::Check),
            other => Err(BillingError::validation(format!("unknown payment method: {other}"))),
        }
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    /// Attempt that never settled; no balance effect
    Failed,
    /// A refund record
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(BillingError::validation(format!("unknown payment status: {other}"))),
        }
    }
}

/// Part of a payment settled against one invoice
///
/// On refund records the allocation is the amount taken back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAllocation {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub amount: Money,
}

/// A payment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub client_id: ClientId,
    /// Invoice named by the payer, if any
    pub invoice_id: Option<InvoiceId>,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference_number: Option<String>,
    pub status: PaymentStatus,
    pub allocations: Vec<PaymentAllocation>,
    /// Remainder parked as credit; on refunds, the credit drawn back
    pub unapplied_amount: Money,
    pub refund_of: Option<PaymentId>,
    pub notes: Option<String>,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to record money received
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub client_id: ClientId,
    pub invoice_id: Option<InvoiceId>,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference_number: Option<String>,
}

impl PaymentRequest {
    pub fn new(client_id: ClientId, amount: Money, method: PaymentMethod) -> Self {
        Self {
            client_id,
            invoice_id: None,
            amount,
            method,
            reference_number: None,
        }
    }

    pub fn for_invoice(mut self, invoice_id: InvoiceId) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_number = Some(reference.into());
        self
    }
}

/// A payment plus the invoices it changed
#[derive(Debug, Clone)]
pub struct Settlement {
    pub payment: Payment,
    pub invoices: Vec<Invoice>,
}

impl Settlement {
    /// Invoices this settlement moved to paid
    pub fn paid_invoices(&self) -> impl Iterator<Item = &Invoice> {
        self.invoices.iter().filter(|i| i.status == InvoiceStatus::Paid)
    }
}

/// Orders invoices for settlement: earliest due date, then lowest sequence
pub fn settlement_order(invoices: &mut [Invoice]) {
    invoices.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.sequence.cmp(&b.sequence)));
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PaymentProcessor {
    tracker: AccountBalanceTracker,
}

impl PaymentProcessor {
    pub fn new() -> Self {
        Self { tracker: AccountBalanceTracker::new() }
    }

    /// Applies a payment to a client
    ///
    /// # Arguments
    ///
    /// * `client` - The client, updated in place with the new balance and credit
    /// * `request` - What was received
    /// * `target` - The invoice named in the request, already loaded
    /// * `outstanding` - The client's pending and overdue invoices, used when no
    ///   invoice is named
    ///
    /// # Errors
    ///
    /// `Validation` for a non-positive amount, a currency mismatch, or a target
    /// that belongs to another client or is cancelled.
    pub fn apply(
        &self,
        client: &mut Client,
        request: &PaymentRequest,
        target: Option<Invoice>,
        outstanding: Vec<Invoice>,
        now: DateTime<Utc>,
    ) -> Result<Settlement, BillingError> {
        self.validate_amount(client, request.amount)?;

        let mut invoices = match target {
            Some(invoice) => {
                if invoice.client_id != client.id {
                    return Err(BillingError::validation(format!(
                        "invoice {} does not belong to client {}",
                        invoice.invoice_number, client.code
                    )));
                }
                if invoice.status == InvoiceStatus::Cancelled {
                    return Err(BillingError::validation(format!(
                        "invoice {} is cancelled",
                        invoice.invoice_number
                    )));
                }
                vec![invoice]
            }
            None => {
                let mut open: Vec<Invoice> = outstanding
                    .into_iter()
                    .filter(|i| i.client_id == client.id && i.status.is_outstanding())
                    .collect();
                settlement_order(&mut open);
                open
            }
        };

        let mut remaining = request.amount;
        let mut allocations = Vec::new();
        let mut touched = Vec::new();
        for invoice in invoices.iter_mut() {
            if remaining.is_zero() {
                break;
            }
            if !invoice.status.is_outstanding() {
                continue;
            }
            let applied = invoice.apply_payment(remaining, now)?;
            if applied.is_zero() {
                continue;
            }
            remaining = remaining.checked_sub(&applied)?;
            allocations.push(PaymentAllocation {
                invoice_id: invoice.id,
                invoice_number: invoice.invoice_number.clone(),
                amount: applied,
            });
            touched.push(invoice.clone());
        }

        self.tracker.credit(client, request.amount, now)?;
        if remaining.is_positive() {
            self.tracker.hold_unapplied(client, remaining)?;
        }

        let payment = Payment {
            id: PaymentId::new_v7(),
            client_id: client.id,
            invoice_id: request.invoice_id,
            amount: request.amount,
            method: request.method,
            reference_number: request.reference_number.clone(),
            status: PaymentStatus::Completed,
            allocations,
            unapplied_amount: remaining,
            refund_of: None,
            notes: None,
            received_at: now,
            created_at: now,
            updated_at: now,
        };
        Ok(Settlement { payment, invoices: touched })
    }

    /// Builds the record of an attempt that did not settle
    pub fn failed(&self, request: &PaymentRequest, reason: impl Into<String>, now: DateTime<Utc>) -> Payment {
        Payment {
            id: PaymentId::new_v7(),
            client_id: request.client_id,
            invoice_id: request.invoice_id,
            amount: request.amount,
            method: request.method,
            reference_number: request.reference_number.clone(),
            status: PaymentStatus::Failed,
            allocations: Vec::new(),
            unapplied_amount: Money::zero(request.amount.currency()),
            refund_of: None,
            notes: Some(reason.into()),
            received_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refunds all or part of a completed payment
    ///
    /// Draws first on whatever of the payment is still parked as credit, then
    /// takes back invoice allocations newest first, reopening those invoices.
    /// An allocation whose invoice was cancelled since sits in the client's
    /// unapplied credit, so it is taken back from there.
    ///
    /// # Arguments
    ///
    /// * `original` - The payment being refunded
    /// * `prior_refunds` - Earlier refund records of the same payment
    /// * `allocated` - The invoices named in the original allocations, cancelled ones included
    /// * `amount` - Amount to refund; the whole refundable remainder if `None`
    pub fn refund(
        &self,
        client: &mut Client,
        original: &Payment,
        prior_refunds: &[Payment],
        mut allocated: Vec<Invoice>,
        amount: Option<Money>,
        now: DateTime<Utc>,
    ) -> Result<Settlement, BillingError> {
        if original.status != PaymentStatus::Completed || original.refund_of.is_some() {
            return Err(BillingError::InvalidStateTransition(format!(
                "payment {} is not a completed payment",
                original.id
            )));
        }
        let currency = original.amount.currency();
        let already_refunded = Money::sum(currency, prior_refunds.iter().map(|r| &r.amount))?;
        let refundable = original.amount.checked_sub(&already_refunded)?;
        let amount = amount.unwrap_or(refundable);
        self.validate_amount(client, amount)?;
        if amount > refundable {
            return Err(BillingError::validation(format!(
                "refund {} exceeds refundable {}",
                amount, refundable
            )));
        }

        let mut remaining = amount;

        let credit_drawn_before = Money::sum(currency, prior_refunds.iter().map(|r| &r.unapplied_amount))?;
        let credit_left = original
            .unapplied_amount
            .checked_sub(&credit_drawn_before)?;
        let mut from_credit = Money::zero(currency);
        if credit_left.is_positive() {
            from_credit = self
                .tracker
                .release_unapplied(client, remaining.min(credit_left)?)?;
            remaining = remaining.checked_sub(&from_credit)?;
        }

        let mut reversals = Vec::new();
        let mut touched = Vec::new();
        for allocation in original.allocations.iter().rev() {
            if remaining.is_zero() {
                break;
            }
            let taken_before = Money::sum(
                currency,
                prior_refunds
                    .iter()
                    .flat_map(|r| r.allocations.iter())
                    .filter(|a| a.invoice_id == allocation.invoice_id)
                    .map(|a| &a.amount),
            )?;
            let left = allocation.amount.checked_sub(&taken_before)?;
            if !left.is_positive() {
                continue;
            }
            let Some(invoice) = allocated.iter_mut().find(|i| i.id == allocation.invoice_id) else {
                continue;
            };
            let wanted = remaining.min(left)?;
            let reversed = if invoice.status == InvoiceStatus::Cancelled {
                self.tracker.release_unapplied(client, wanted)?
            } else {
                invoice.reverse_payment(wanted, now)?
            };
            if reversed.is_zero() {
                continue;
            }
            remaining = remaining.checked_sub(&reversed)?;
            reversals.push(PaymentAllocation {
                invoice_id: invoice.id,
                invoice_number: invoice.invoice_number.clone(),
                amount: reversed,
            });
            if invoice.status != InvoiceStatus::Cancelled {
                touched.push(invoice.clone());
            }
        }

        if remaining.is_positive() {
            return Err(BillingError::validation(format!(
                "only {} of the requested {} can be recovered from payment {}",
                amount.checked_sub(&remaining)?,
                amount,
                original.id
            )));
        }

        self.tracker.charge(client, amount, now)?;

        let refund = Payment {
            id: PaymentId::new_v7(),
            client_id: client.id,
            invoice_id: original.invoice_id,
            amount,
            method: original.method,
            reference_number: original.reference_number.clone(),
            status: PaymentStatus::Refunded,
            allocations: reversals,
            unapplied_amount: from_credit,
            refund_of: Some(original.id),
            notes: None,
            received_at: now,
            created_at: now,
            updated_at: now,
        };
        Ok(Settlement { payment: refund, invoices: touched })
    }

    fn validate_amount(&self, client: &Client, amount: Money) -> Result<(), BillingError> {
        if amount.currency() != client.currency {
            return Err(BillingError::validation(format!(
                "payment currency {} differs from client currency {}",
                amount.currency(),
                client.currency
            )));
        }
        if !amount.is_positive() {
            return Err(BillingError::validation("payment amount must be positive"));
        }
        if !amount.is_whole_minor() {
            return Err(BillingError::validation("payment amount must be in whole minor units"));
        }
        Ok(())
    }
}
