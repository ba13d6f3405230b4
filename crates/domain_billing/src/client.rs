//! Billable clients
//!
//! A client carries its cycle calendar, pricing and the cached ledger state
//! (balance, unapplied credit, invoice sequence, closed-through watermark).
//! The ledger state is only changed inside an atomic store commit.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{BillingCycle, BillingPeriod, ClientId, Currency, Money, Rate};

use crate::error::BillingError;
use crate::rating::RateCard;

/// Client account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    /// Billing continues; no new numbers
    Suspended,
    /// Soft-deleted; billing of existing charges continues
    Inactive,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Suspended => "suspended",
            ClientStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ClientStatus::Active),
            "suspended" => Ok(ClientStatus::Suspended),
            "inactive" => Ok(ClientStatus::Inactive),
            other => Err(BillingError::validation(format!("unknown client status: {other}"))),
        }
    }
}

/// A billable tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: ClientId,
    /// Short uppercase code used as the invoice number prefix
    pub code: String,
    pub name: String,
    pub currency: Currency,
    pub billing_cycle: BillingCycle,
    pub billing_anchor: NaiveDate,
    pub payment_terms_days: u32,
    pub tax_rate: Rate,
    pub rate_card: RateCard,
    pub credit_limit: Money,
    /// Positive means the client owes money
    pub current_balance: Money,
    pub unapplied_credit: Money,
    /// Last sequence number issued
    pub invoice_sequence: u64,
    /// End of the latest invoiced period; usage before this is rejected
    pub closed_through: Option<DateTime<Utc>>,
    pub status: ClientStatus,
    /// Optimistic concurrency token for ledger-state writes
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Onboarding request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    pub code: String,
    pub name: String,
    pub currency: Currency,
    pub billing_cycle: BillingCycle,
    pub billing_anchor: NaiveDate,
    pub payment_terms_days: u32,
    pub tax_rate: Rate,
    pub credit_limit: Money,
    pub rate_card: RateCard,
}

impl Client {
    /// Creates a client with a zero balance
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the code is not a short uppercase token, the
    /// credit limit is negative or in another currency, or the rate card is
    /// invalid.
    pub fn onboard(request: NewClient, now: DateTime<Utc>) -> Result<Self, BillingError> {
        validate_code(&request.code)?;
        if request.name.trim().is_empty() {
            return Err(BillingError::validation("client name is required"));
        }
        if request.credit_limit.currency() != request.currency {
            return Err(BillingError::validation("credit limit must be in the client currency"));
        }
        if request.credit_limit.is_negative() {
            return Err(BillingError::validation("credit limit must not be negative"));
        }
        request.rate_card.validate()?;

        Ok(Self {
            id: ClientId::new_v7(),
            code: request.code,
            name: request.name,
            currency: request.currency,
            billing_cycle: request.billing_cycle,
            billing_anchor: request.billing_anchor,
            payment_terms_days: request.payment_terms_days,
            tax_rate: request.tax_rate,
            rate_card: request.rate_card,
            credit_limit: request.credit_limit,
            current_balance: Money::zero(request.currency),
            unapplied_credit: Money::zero(request.currency),
            invoice_sequence: 0,
            closed_through: None,
            status: ClientStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == ClientStatus::Active
    }

    /// Invoice number for a sequence, e.g. `ACME-000042`
    pub fn invoice_number(&self, sequence: u64) -> String {
        format!("{}-{:06}", self.code, sequence)
    }

    /// The billing period containing `instant`
    pub fn period_containing(&self, instant: DateTime<Utc>) -> Result<BillingPeriod, BillingError> {
        Ok(self
            .billing_cycle
            .period_containing(self.billing_anchor, instant)?)
    }

    /// Start of the first period not covered by the closed watermark
    pub fn open_from(&self) -> DateTime<Utc> {
        self.closed_through
            .unwrap_or_else(|| core_kernel::midnight_utc(self.billing_anchor))
    }

    /// Every complete period at or after the watermark as of `now`
    ///
    /// A period above the watermark may already be invoiced; generating it
    /// again returns the existing invoice.
    pub fn periods_due(&self, now: DateTime<Utc>) -> Result<Vec<BillingPeriod>, BillingError> {
        Ok(self
            .billing_cycle
            .closed_periods_between(self.billing_anchor, self.open_from(), now)?)
    }

    /// Sets a new status
    ///
    /// Inactive is terminal; a suspended client may be reactivated.
    pub fn transition_to(&mut self, status: ClientStatus, now: DateTime<Utc>) -> Result<(), BillingError> {
        let allowed = matches!(
            (self.status, status),
            (ClientStatus::Active, ClientStatus::Suspended)
                | (ClientStatus::Suspended, ClientStatus::Active)
                | (ClientStatus::Active, ClientStatus::Inactive)
                | (ClientStatus::Suspended, ClientStatus::Inactive)
        );
        if !allowed {
            return Err(BillingError::InvalidStateTransition(format!(
                "client {} cannot move from {} to {}",
                self.code, self.status, status
            )));
        }
        self.status = status;
        self.updated_at = now;
        Ok(())
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.transition_to(ClientStatus::Suspended, now)
    }

    pub fn reactivate(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.transition_to(ClientStatus::Active, now)
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.transition_to(ClientStatus::Inactive, now)
    }
}

fn validate_code(code: &str) -> Result<(), BillingError> {
    let valid = !code.is_empty()
        && code.len() <= 16
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(BillingError::validation(format!(
            "client code {code:?} must be 1-16 uppercase letters, digits or underscores"
        )));
    }
    Ok(())
}
