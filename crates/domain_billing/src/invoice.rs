//! Invoices
//!
//! An invoice is built as a draft, finalized exactly once (which fixes its
//! number, totals and due date) and afterwards only its payment state moves.
//!
//! Totals follow one rule: line amounts keep sub-cent precision, the
//! subtotal is rounded half-up to the currency minor unit once, tax is
//! `round_half_up(subtotal * rate)`, and `total = subtotal + tax`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{BillingPeriod, ClientId, Currency, InvoiceId, LineItemId, Money, PhoneNumberId, Rate};

use crate::aggregation::AggregationResult;
use crate::error::BillingError;
use crate::usage::UsageType;

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Being assembled; never persisted
    Draft,
    /// Issued and awaiting payment
    Pending,
    Paid,
    /// Past due date with an outstanding amount
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Pending or overdue
    pub fn is_outstanding(&self) -> bool {
        matches!(self, InvoiceStatus::Pending | InvoiceStatus::Overdue)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "pending" => Ok(InvoiceStatus::Pending),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(BillingError::validation(format!("unknown invoice status: {other}"))),
        }
    }
}

/// What an invoice bills for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    /// Usage and recurring fees for one billing period
    Period,
    /// First-period fee charged when a number is provisioned
    Provisioning,
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceKind::Period => "period",
            InvoiceKind::Provisioning => "provisioning",
        }
    }
}

impl FromStr for InvoiceKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "period" => Ok(InvoiceKind::Period),
            "provisioning" => Ok(InvoiceKind::Provisioning),
            other => Err(BillingError::validation(format!("unknown invoice kind: {other}"))),
        }
    }
}

/// Line item category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "usageType", rename_all = "snake_case")]
pub enum LineItemCategory {
    Usage(UsageType),
    RecurringFee,
    ProvisioningFee,
}

impl LineItemCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineItemCategory::Usage(usage_type) => usage_type.as_str(),
            LineItemCategory::RecurringFee => "recurring_fee",
            LineItemCategory::ProvisioningFee => "provisioning_fee",
        }
    }
}

impl FromStr for LineItemCategory {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recurring_fee" => Ok(LineItemCategory::RecurringFee),
            "provisioning_fee" => Ok(LineItemCategory::ProvisioningFee),
            other => Ok(LineItemCategory::Usage(other.parse()?)),
        }
    }
}

/// A single invoice line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: LineItemId,
    pub description: String,
    pub category: LineItemCategory,
    pub phone_number_id: Option<PhoneNumberId>,
    /// Minutes for calls, messages for SMS/MMS, days for fees
    pub quantity: Decimal,
    pub unit_price: Money,
    /// Authoritative amount; may carry sub-cent precision
    pub amount: Money,
}

impl LineItem {
    pub fn new(
        description: impl Into<String>,
        category: LineItemCategory,
        quantity: Decimal,
        unit_price: Money,
        amount: Money,
    ) -> Self {
        Self {
            id: LineItemId::new_v7(),
            description: description.into(),
            category,
            phone_number_id: None,
            quantity,
            unit_price,
            amount,
        }
    }

    pub fn for_number(mut self, phone_number_id: PhoneNumberId) -> Self {
        self.phone_number_id = Some(phone_number_id);
        self
    }
}

/// A client invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: InvoiceId,
    pub client_id: ClientId,
    /// `{clientCode}-{sequence:06}`; empty while draft
    pub invoice_number: String,
    pub sequence: u64,
    pub kind: InvoiceKind,
    pub status: InvoiceStatus,
    pub period: BillingPeriod,
    pub due_date: NaiveDate,
    pub currency: Currency,
    pub line_items: Vec<LineItem>,
    pub subtotal: Money,
    pub tax_rate: Rate,
    pub tax_amount: Money,
    pub total_amount: Money,
    pub paid_amount: Money,
    pub usage_summary: Option<AggregationResult>,
    pub issued_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Starts a draft for a client and period
    ///
    /// # Arguments
    ///
    /// * `client_id` - Client being billed
    /// * `kind` - Period or provisioning invoice
    /// * `period` - Window the invoice covers
    /// * `currency` - Client currency
    /// * `tax_rate` - Client tax rate at generation time
    pub fn draft(
        client_id: ClientId,
        kind: InvoiceKind,
        period: BillingPeriod,
        currency: Currency,
        tax_rate: Rate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: InvoiceId::new_v7(),
            client_id,
            invoice_number: String::new(),
            sequence: 0,
            kind,
            status: InvoiceStatus::Draft,
            period,
            due_date: period.end().date_naive(),
            currency,
            line_items: Vec::new(),
            subtotal: Money::zero(currency),
            tax_rate,
            tax_amount: Money::zero(currency),
            total_amount: Money::zero(currency),
            paid_amount: Money::zero(currency),
            usage_summary: None,
            issued_at: None,
            paid_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds a line to a draft
    pub fn add_line(&mut self, line: LineItem) -> Result<(), BillingError> {
        self.ensure_draft()?;
        if line.amount.currency() != self.currency {
            return Err(BillingError::validation("line item currency differs from invoice"));
        }
        self.line_items.push(line);
        Ok(())
    }

    pub fn with_usage_summary(mut self, summary: AggregationResult) -> Self {
        self.usage_summary = Some(summary);
        self
    }

    /// Fixes number, totals and due date and moves the draft to pending
    ///
    /// A zero-total invoice is settled immediately.
    pub fn finalize(
        &mut self,
        sequence: u64,
        invoice_number: String,
        payment_terms_days: u32,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.ensure_draft()?;
        let lines: Vec<Money> = self.line_items.iter().map(|l| l.amount).collect();
        self.subtotal = Money::sum(self.currency, &lines)?.round_half_up();
        self.tax_amount = self.tax_rate.apply_rounded(&self.subtotal)?;
        self.total_amount = self.subtotal.checked_add(&self.tax_amount)?;
        self.due_date = self
            .period
            .end()
            .date_naive()
            .checked_add_days(Days::new(u64::from(payment_terms_days)))
            .ok_or_else(|| BillingError::validation("due date out of range"))?;
        self.sequence = sequence;
        self.invoice_number = invoice_number;
        self.issued_at = Some(now);
        self.updated_at = now;
        if self.total_amount.is_zero() {
            self.status = InvoiceStatus::Paid;
            self.paid_at = Some(now);
        } else {
            self.status = InvoiceStatus::Pending;
        }
        Ok(())
    }

    /// Amount still owed
    pub fn outstanding(&self) -> Result<Money, BillingError> {
        if self.status == InvoiceStatus::Cancelled {
            return Ok(Money::zero(self.currency));
        }
        Ok(self.total_amount.checked_sub(&self.paid_amount)?)
    }

    /// Status as it should read on `today`
    ///
    /// A pending invoice whose due date has passed reads as overdue even if
    /// the stored status has not been refreshed yet.
    pub fn status_on(&self, today: NaiveDate) -> InvoiceStatus {
        match self.status {
            InvoiceStatus::Pending if self.is_past_due(today) => InvoiceStatus::Overdue,
            status => status,
        }
    }

    fn is_past_due(&self, today: NaiveDate) -> bool {
        today > self.due_date && self.paid_amount < self.total_amount
    }

    /// Moves a past-due pending invoice to overdue; returns true if it changed
    pub fn refresh_overdue(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == InvoiceStatus::Pending && self.is_past_due(now.date_naive()) {
            self.status = InvoiceStatus::Overdue;
            self.updated_at = now;
            return true;
        }
        false
    }

    /// Applies up to `amount` and returns what was actually applied
    pub fn apply_payment(&mut self, amount: Money, now: DateTime<Utc>) -> Result<Money, BillingError> {
        if !self.status.is_outstanding() {
            return Err(BillingError::InvalidStateTransition(format!(
                "cannot pay a {} invoice",
                self.status
            )));
        }
        let applied = amount.min(self.outstanding()?)?;
        self.paid_amount = self.paid_amount.checked_add(&applied)?;
        if self.paid_amount == self.total_amount {
            self.status = InvoiceStatus::Paid;
            self.paid_at = Some(now);
        }
        self.updated_at = now;
        Ok(applied)
    }

    /// Takes back a previously applied amount, reopening the invoice
    pub fn reverse_payment(&mut self, amount: Money, now: DateTime<Utc>) -> Result<Money, BillingError> {
        if self.status == InvoiceStatus::Cancelled {
            return Ok(Money::zero(self.currency));
        }
        let reversed = amount.min(self.paid_amount)?;
        self.paid_amount = self.paid_amount.checked_sub(&reversed)?;
        if reversed.is_positive() {
            self.paid_at = None;
            self.status = if self.is_past_due(now.date_naive()) {
                InvoiceStatus::Overdue
            } else {
                InvoiceStatus::Pending
            };
            self.updated_at = now;
        }
        Ok(reversed)
    }

    /// Cancels the invoice and returns the amount already paid on it
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<Money, BillingError> {
        if !self.status.is_outstanding() {
            return Err(BillingError::InvalidStateTransition(format!(
                "cannot cancel a {} invoice",
                self.status
            )));
        }
        self.status = InvoiceStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(self.paid_amount)
    }

    /// Checks the arithmetic invariants
    pub fn verify_totals(&self) -> Result<(), BillingError> {
        if self.subtotal.checked_add(&self.tax_amount)? != self.total_amount {
            return Err(BillingError::validation(format!(
                "{}: total {} != subtotal {} + tax {}",
                self.invoice_number, self.total_amount, self.subtotal, self.tax_amount
            )));
        }
        if self.paid_amount > self.total_amount {
            return Err(BillingError::validation(format!(
                "{}: paid {} exceeds total {}",
                self.invoice_number, self.paid_amount, self.total_amount
            )));
        }
        Ok(())
    }

    fn ensure_draft(&self) -> Result<(), BillingError> {
        if self.status != InvoiceStatus::Draft {
            return Err(BillingError::InvalidStateTransition(format!(
                "invoice {} is already finalized",
                self.invoice_number
            )));
        }
        Ok(())
    }
}
