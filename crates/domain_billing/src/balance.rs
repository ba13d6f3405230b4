//! Account balance tracking
//!
//! The cached `current_balance` on a client is always
//! `Σ(total - paid)` over its non-cancelled invoices minus its unapplied
//! credit. Every mutation here keeps that identity; [`AccountBalanceTracker::reconcile`]
//! recomputes it from the invoices to detect drift.
//!
//! Charging never fails on the credit limit. The limit only gates new
//! discretionary spend through [`AccountBalanceTracker::admit`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{ClientId, Currency, Money};

use crate::client::Client;
use crate::error::BillingError;
use crate::invoice::{Invoice, InvoiceStatus};

/// Outcome of comparing the cached balance with the derived one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub client_id: ClientId,
    pub cached_balance: Money,
    pub derived_balance: Money,
    /// `cached - derived`
    pub drift: Money,
    pub repaired: bool,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.drift.is_zero()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AccountBalanceTracker;

impl AccountBalanceTracker {
    pub fn new() -> Self {
        Self
    }

    /// Adds a charge and returns the new balance
    pub fn charge(&self, client: &mut Client, amount: Money, now: DateTime<Utc>) -> Result<Money, BillingError> {
        if amount.is_negative() {
            return Err(BillingError::validation("charge amount must not be negative"));
        }
        client.current_balance = client.current_balance.checked_add(&amount)?;
        client.updated_at = now;
        Ok(client.current_balance)
    }

    /// Records money received and returns the new balance
    pub fn credit(&self, client: &mut Client, amount: Money, now: DateTime<Utc>) -> Result<Money, BillingError> {
        if amount.is_negative() {
            return Err(BillingError::validation("credit amount must not be negative"));
        }
        client.current_balance = client.current_balance.checked_sub(&amount)?;
        client.updated_at = now;
        Ok(client.current_balance)
    }

    /// Admission control for new spend
    ///
    /// # Errors
    ///
    /// `CreditLimitExceeded` when `current_balance + pending_monthly_fees`
    /// is above the credit limit.
    pub fn admit(&self, client: &Client, pending_monthly_fees: Money) -> Result<(), BillingError> {
        let projected = client.current_balance.checked_add(&pending_monthly_fees)?;
        if projected > client.credit_limit {
            return Err(BillingError::CreditLimitExceeded {
                current_balance: client.current_balance,
                requested: pending_monthly_fees,
                credit_limit: client.credit_limit,
            });
        }
        Ok(())
    }

    /// Parks an unallocated remainder as client credit
    ///
    /// Balance is untouched; the caller has already credited the full amount.
    pub fn hold_unapplied(&self, client: &mut Client, amount: Money) -> Result<(), BillingError> {
        client.unapplied_credit = client.unapplied_credit.checked_add(&amount)?;
        Ok(())
    }

    /// Takes back unapplied credit, up to what is available
    pub fn release_unapplied(&self, client: &mut Client, amount: Money) -> Result<Money, BillingError> {
        let taken = amount.min(client.unapplied_credit)?;
        client.unapplied_credit = client.unapplied_credit.checked_sub(&taken)?;
        Ok(taken)
    }

    /// Settles as much of a fresh invoice as the client's unapplied credit covers
    ///
    /// Moves money from credit into the invoice's paid amount, so the balance
    /// does not change. Returns the amount applied.
    pub fn apply_credit(
        &self,
        client: &mut Client,
        invoice: &mut Invoice,
        now: DateTime<Utc>,
    ) -> Result<Money, BillingError> {
        if client.unapplied_credit.is_zero() || !invoice.status.is_outstanding() {
            return Ok(Money::zero(client.currency));
        }
        let applied = invoice.apply_payment(client.unapplied_credit, now)?;
        client.unapplied_credit = client.unapplied_credit.checked_sub(&applied)?;
        Ok(applied)
    }

    /// Balance derived from authoritative records
    pub fn derive_balance(
        &self,
        currency: Currency,
        invoices: &[Invoice],
        unapplied_credit: Money,
    ) -> Result<Money, BillingError> {
        let mut owed = Money::zero(currency);
        for invoice in invoices.iter().filter(|i| i.status != InvoiceStatus::Cancelled) {
            owed = owed.checked_add(&invoice.outstanding()?)?;
        }
        Ok(owed.checked_sub(&unapplied_credit)?)
    }

    /// Compares the cached balance with the derived one, optionally
    /// overwriting the cache
    pub fn reconcile(
        &self,
        client: &mut Client,
        invoices: &[Invoice],
        repair: bool,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationReport, BillingError> {
        let derived = self.derive_balance(client.currency, invoices, client.unapplied_credit)?;
        let cached = client.current_balance;
        let drift = cached.checked_sub(&derived)?;
        let repaired = repair && !drift.is_zero();
        if repaired {
            tracing::warn!(client_id = %client.id, %cached, %derived, "Repairing balance drift");
            client.current_balance = derived;
            client.updated_at = now;
        }
        Ok(ReconciliationReport {
            client_id: client.id,
            cached_balance: cached,
            derived_balance: derived,
            drift,
            repaired,
        })
    }
}
