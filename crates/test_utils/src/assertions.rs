//! Custom Test Assertions
//!
//! Provides specialized assertion helpers for billing types that give
//! more meaningful error messages than standard assertions.

use core_kernel::Money;
use domain_billing::{AccountBalanceTracker, Client, Invoice, InvoiceStatus};
use rust_decimal::Decimal;

/// Asserts that two Money values are approximately equal within a tolerance
///
/// # Panics
///
/// Panics if the currencies don't match or the amounts differ by more than tolerance
pub fn assert_money_approx_eq(actual: &Money, expected: &Money, tolerance: Decimal) {
    assert_eq!(
        actual.currency(),
        expected.currency(),
        "Currency mismatch: actual={}, expected={}",
        actual.currency(),
        expected.currency()
    );

    let diff = (actual.amount() - expected.amount()).abs();
    assert!(
        diff <= tolerance,
        "Money amounts differ by more than tolerance: actual={}, expected={}, diff={}, tolerance={}",
        actual.amount(),
        expected.amount(),
        diff,
        tolerance
    );
}

/// Asserts that a Money value is zero
pub fn assert_money_zero(money: &Money) {
    assert!(money.is_zero(), "Expected zero, got {}", money);
}

/// Asserts that an amount is expressible in whole minor units (cents)
pub fn assert_whole_cents(money: &Money) {
    assert!(
        money.is_whole_minor(),
        "Expected an amount in whole minor units, got {}",
        money.amount()
    );
}

/// Asserts the arithmetic invariants of a finalized invoice
///
/// `total == subtotal + tax`, `paid <= total`, and the totals are rounded
/// to the currency minor unit.
pub fn assert_invoice_totals(invoice: &Invoice) {
    if let Err(e) = invoice.verify_totals() {
        panic!("Invoice {} failed its totals check: {}", invoice.invoice_number, e);
    }
    assert_whole_cents(&invoice.subtotal);
    assert_whole_cents(&invoice.tax_amount);
    assert_whole_cents(&invoice.total_amount);
}

/// Asserts that the cached balance matches the one derived from invoices
pub fn assert_balance_consistent(client: &Client, invoices: &[Invoice]) {
    let derived = AccountBalanceTracker::new()
        .derive_balance(client.currency, invoices, client.unapplied_credit)
        .unwrap_or_else(|e| panic!("Cannot derive balance for {}: {}", client.code, e));
    assert_eq!(
        client.current_balance, derived,
        "Balance drift for {}: cached={}, derived={}, unapplied={}",
        client.code, client.current_balance, derived, client.unapplied_credit
    );
}

/// Asserts that invoice sequences run 1..=n without gaps or repeats
pub fn assert_gapless_numbering(invoices: &[Invoice]) {
    let mut sequences: Vec<u64> = invoices.iter().map(|i| i.sequence).collect();
    sequences.sort_unstable();
    let expected: Vec<u64> = (1..=invoices.len() as u64).collect();
    assert_eq!(sequences, expected, "Invoice sequences have gaps or duplicates");

    let mut numbers: Vec<&str> = invoices.iter().map(|i| i.invoice_number.as_str()).collect();
    numbers.sort_unstable();
    numbers.dedup();
    assert_eq!(numbers.len(), invoices.len(), "Duplicate invoice numbers");
}

/// Asserts an invoice's status
pub fn assert_invoice_status(invoice: &Invoice, expected: InvoiceStatus) {
    assert_eq!(
        invoice.status, expected,
        "Invoice {} is {}, expected {}",
        invoice.invoice_number, invoice.status, expected
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_approx_eq_passes() {
        let a = Money::new(dec!(100.00), Currency::USD);
        let b = Money::new(dec!(100.0001), Currency::USD);
        assert_money_approx_eq(&a, &b, dec!(0.001));
    }

    #[test]
    #[should_panic(expected = "differ by more than tolerance")]
    fn test_money_approx_eq_fails() {
        let a = Money::new(dec!(100.00), Currency::USD);
        let b = Money::new(dec!(101.00), Currency::USD);
        assert_money_approx_eq(&a, &b, dec!(0.01));
    }

    #[test]
    #[should_panic(expected = "whole minor units")]
    fn test_whole_cents_rejects_sub_cent() {
        assert_whole_cents(&Money::new(dec!(1.2345), Currency::USD));
    }
}
