//! Invoice assembly
//!
//! Turns an aggregation and a client's numbers into a finalized invoice.
//! Everything here is pure; the engine supplies inputs under the client's
//! writer lock and commits the result atomically.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use core_kernel::{BillingPeriod, Money};

use crate::aggregation::AggregationResult;
use crate::client::Client;
use crate::error::BillingError;
use crate::invoice::{Invoice, InvoiceKind, LineItem, LineItemCategory};
use crate::phone_number::PhoneNumber;
use crate::rating::RateEngine;
use crate::usage::UsageType;

const SECONDS_PER_MINUTE: u32 = 60;

/// Builds period and provisioning invoices
#[derive(Debug, Default, Clone, Copy)]
pub struct InvoiceGenerator {
    rates: RateEngine,
}

impl InvoiceGenerator {
    pub fn new() -> Self {
        Self { rates: RateEngine::new() }
    }

    /// Builds the finalized invoice for one billing period
    ///
    /// One line per usage type with traffic, then one recurring line per
    /// number leased during the period. The invoice takes the client's next
    /// sequence number; the caller commits it together with the client.
    pub fn build_period_invoice(
        &self,
        client: &Client,
        period: BillingPeriod,
        usage: AggregationResult,
        numbers: &[PhoneNumber],
        now: DateTime<Utc>,
    ) -> Result<Invoice, BillingError> {
        let mut invoice = Invoice::draft(
            client.id,
            InvoiceKind::Period,
            period,
            client.currency,
            client.tax_rate,
            now,
        );

        for usage_type in UsageType::ALL {
            if let Some(totals) = usage.totals_for(usage_type) {
                if totals.count == 0 {
                    continue;
                }
                let quantity = if usage_type.is_call() {
                    Decimal::from(totals.billable_secs) / Decimal::from(SECONDS_PER_MINUTE)
                } else {
                    Decimal::from(totals.quantity)
                };
                let unit = if usage_type.is_call() { "min" } else { "messages" };
                invoice.add_line(LineItem::new(
                    format!("{} ({} {})", usage_type.label(), quantity.normalize(), unit),
                    LineItemCategory::Usage(usage_type),
                    quantity,
                    unit_price(totals.cost, quantity)?,
                    totals.cost,
                ))?;
            }
        }

        for number in numbers {
            if let Some(line) = self.recurring_line(client, number, &period)? {
                invoice.add_line(line)?;
            }
        }

        let sequence = next_sequence(client)?;
        let mut invoice = invoice.with_usage_summary(usage);
        invoice.finalize(
            sequence,
            client.invoice_number(sequence),
            client.payment_terms_days,
            now,
        )?;
        Ok(invoice)
    }

    /// Builds the invoice charged when a number is provisioned
    ///
    /// Covers the rest of the client's current period, starting at the
    /// provisioning instant, prorated by ceiling days.
    pub fn build_provisioning_invoice(
        &self,
        client: &Client,
        number: &PhoneNumber,
        current_period: &BillingPeriod,
        now: DateTime<Utc>,
    ) -> Result<Invoice, BillingError> {
        let window = current_period
            .intersect(number.provisioned_at, current_period.end())
            .ok_or_else(|| BillingError::validation("provisioning instant is outside the current period"))?;
        let amount = self
            .rates
            .prorate(number.monthly_fee, client.billing_cycle, &window, current_period)?;
        let days = Decimal::from(window.ceil_days());

        let mut invoice = Invoice::draft(
            client.id,
            InvoiceKind::Provisioning,
            window,
            client.currency,
            client.tax_rate,
            now,
        );
        invoice.add_line(
            LineItem::new(
                format!(
                    "{} {} setup ({} to {})",
                    number.number_type.label(),
                    number.number,
                    window.start().date_naive(),
                    window.end().date_naive()
                ),
                LineItemCategory::ProvisioningFee,
                days,
                unit_price(amount, days)?,
                amount,
            )
            .for_number(number.id),
        )?;

        let sequence = next_sequence(client)?;
        invoice.finalize(
            sequence,
            client.invoice_number(sequence),
            client.payment_terms_days,
            now,
        )?;
        Ok(invoice)
    }

    fn recurring_line(
        &self,
        client: &Client,
        number: &PhoneNumber,
        period: &BillingPeriod,
    ) -> Result<Option<LineItem>, BillingError> {
        let Some(window) = number.billable_window(period) else {
            return Ok(None);
        };
        let amount = self
            .rates
            .prorate(number.monthly_fee, client.billing_cycle, &window, period)?;
        let full = window == *period;
        let (quantity, description) = if full {
            (
                Decimal::ONE,
                format!("{} {}", number.number_type.label(), number.number),
            )
        } else {
            (
                Decimal::from(window.ceil_days()),
                format!(
                    "{} {} ({} to {}, prorated)",
                    number.number_type.label(),
                    number.number,
                    window.start().date_naive(),
                    window.end().date_naive()
                ),
            )
        };
        Ok(Some(
            LineItem::new(
                description,
                LineItemCategory::RecurringFee,
                quantity,
                unit_price(amount, quantity)?,
                amount,
            )
            .for_number(number.id),
        ))
    }
}

fn next_sequence(client: &Client) -> Result<u64, BillingError> {
    client
        .invoice_sequence
        .checked_add(1)
        .ok_or_else(|| BillingError::validation("invoice sequence exhausted"))
}

fn unit_price(amount: Money, quantity: Decimal) -> Result<Money, BillingError> {
    if quantity.is_zero() {
        return Ok(Money::zero(amount.currency()));
    }
    Ok(amount.divide(quantity)?)
}
