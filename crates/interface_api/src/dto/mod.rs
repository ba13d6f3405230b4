//! Request and response bodies
//!
//! Fields are camelCase. Invoice totals and balances render at the currency's
//! minor unit ("7.56"); line amounts and per-event costs keep their sub-cent
//! precision.

pub mod clients;
pub mod invoices;
pub mod payments;
pub mod phone_numbers;
pub mod usage;

use rust_decimal::RoundingStrategy;

use core_kernel::Money;

/// Renders an amount at the currency's minor unit
pub fn money(value: &Money) -> String {
    let places = value.currency().decimal_places();
    let mut amount = value
        .amount()
        .round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero);
    amount.rescale(places);
    amount.to_string()
}

/// Renders an amount at full internal precision
pub fn precise(value: &Money) -> String {
    value.amount().to_string()
}
