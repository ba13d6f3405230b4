//! Money types with precise decimal arithmetic
//!
//! Monetary values use rust_decimal so that per-event telephony costs, which are
//! routinely sub-cent, accumulate without floating-point drift. Amounts keep four
//! decimal places internally; invoice totals and balances are rounded to the
//! currency's minor unit with [`Money::round_half_up`] exactly once.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Internal precision for money amounts
pub const MONEY_SCALE: u32 = 4;

/// Currency codes following ISO 4217
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
    JPY,
}

impl Currency {
    /// Returns the number of decimal places of the minor unit
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Returns the currency symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::CAD => "C$",
            Currency::AUD => "A$",
            Currency::JPY => "¥",
        }
    }

    /// Returns the ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::CAD => "CAD",
            Currency::AUD => "AUD",
            Currency::JPY => "JPY",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "CAD" => Ok(Currency::CAD),
            "AUD" => Ok(Currency::AUD),
            "JPY" => Ok(Currency::JPY),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Currency mismatch: cannot operate on {0} and {1}")]
    CurrencyMismatch(String, String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Overflow during calculation")]
    Overflow,
}

/// A monetary amount with associated currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "MoneyRepr")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

/// Wire shape of [`Money`]; decoding goes through [`Money::new`]
#[derive(Deserialize)]
struct MoneyRepr {
    amount: Decimal,
    currency: Currency,
}

impl From<MoneyRepr> for Money {
    fn from(repr: MoneyRepr) -> Self {
        Money::new(repr.amount, repr.currency)
    }
}

impl Money {
    /// Creates a new Money value, normalised to the internal scale
    ///
    /// Digits beyond [`MONEY_SCALE`] are rounded half to even.
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        let mut amount = amount.round_dp(MONEY_SCALE);
        amount.rescale(MONEY_SCALE);
        Self { amount, currency }
    }

    /// Creates Money from an integer amount in minor units (e.g., cents)
    pub fn from_minor(minor_units: i64, currency: Currency) -> Self {
        Self::new(Decimal::new(minor_units, currency.decimal_places()), currency)
    }

    /// Creates a zero amount in the specified currency
    pub fn zero(currency: Currency) -> Self {
        Self::new(dec!(0), currency)
    }

    /// Returns the amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Returns the currency
    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Returns true if the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Returns true if the amount is strictly negative
    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self::new(self.amount.abs(), self.currency)
    }

    /// Rounds to the currency minor unit, half away from zero
    ///
    /// This is the "standard half-up" rounding used for invoice subtotals,
    /// tax amounts and balances.
    pub fn round_half_up(&self) -> Self {
        Self::new(
            self.amount.round_dp_with_strategy(
                self.currency.decimal_places(),
                RoundingStrategy::MidpointAwayFromZero,
            ),
            self.currency,
        )
    }

    /// Returns true if the amount has no digits below the minor unit
    pub fn is_whole_minor(&self) -> bool {
        self.round_half_up().amount == self.amount
    }

    /// Converts to integer minor units, rounding half-up first
    pub fn to_minor(&self) -> Result<i64, MoneyError> {
        let scaled = self.round_half_up().amount
            * Decimal::from(10_i64.pow(self.currency.decimal_places()));
        i64::try_from(scaled.trunc()).map_err(|_| MoneyError::Overflow)
    }

    /// Checked addition that returns an error on currency mismatch
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let sum = self.amount.checked_add(other.amount).ok_or(MoneyError::Overflow)?;
        Ok(Self::new(sum, self.currency))
    }

    /// Checked subtraction that returns an error on currency mismatch
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let diff = self.amount.checked_sub(other.amount).ok_or(MoneyError::Overflow)?;
        Ok(Self::new(diff, self.currency))
    }

    /// Multiplies by a scalar (quantity, rate, proration factor)
    pub fn multiply(&self, factor: Decimal) -> Result<Money, MoneyError> {
        let product = self.amount.checked_mul(factor).ok_or(MoneyError::Overflow)?;
        Ok(Self::new(product, self.currency))
    }

    /// Divides by a scalar
    pub fn divide(&self, divisor: Decimal) -> Result<Money, MoneyError> {
        if divisor.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        let quotient = self.amount.checked_div(divisor).ok_or(MoneyError::Overflow)?;
        Ok(Self::new(quotient, self.currency))
    }

    /// Returns the smaller of two amounts in the same currency
    pub fn min(self, other: Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(&other)?;
        Ok(if other.amount < self.amount { other } else { self })
    }

    /// Sums an iterator of money values, starting from zero in `currency`
    pub fn sum<'a, I>(currency: Currency, values: I) -> Result<Money, MoneyError>
    where
        I: IntoIterator<Item = &'a Money>,
    {
        values
            .into_iter()
            .try_fold(Money::zero(currency), |acc, m| acc.checked_add(m))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency.to_string(),
                other.currency.to_string(),
            ));
        }
        Ok(())
    }
}

impl PartialOrd for Money {
    /// Amounts in different currencies are not comparable
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.currency != other.currency {
            return None;
        }
        self.amount.partial_cmp(&other.amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dp = self.currency.decimal_places() as usize;
        write!(f, "{} {:.dp$}", self.currency.symbol(), self.amount, dp = dp)
    }
}

impl std::ops::Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.amount, self.currency)
    }
}

/// A percentage rate such as a tax rate (0.08 for 8%)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate {
    value: Decimal,
}

impl Rate {
    /// Creates a rate from a decimal fraction, rejecting negative values
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::InvalidAmount(format!("negative rate {}", value)));
        }
        Ok(Self { value })
    }

    /// Creates a rate from a percentage (8 for 8%)
    pub fn from_percentage(percentage: Decimal) -> Result<Self, MoneyError> {
        Self::new(percentage / dec!(100))
    }

    pub fn zero() -> Self {
        Self { value: Decimal::ZERO }
    }

    pub fn as_decimal(&self) -> Decimal {
        self.value
    }

    pub fn as_percentage(&self) -> Decimal {
        self.value * dec!(100)
    }

    /// Applies this rate to an amount and rounds the exact product half-up
    /// to the currency minor unit
    pub fn apply_rounded(&self, money: &Money) -> Result<Money, MoneyError> {
        let exact = money
            .amount()
            .checked_mul(self.value)
            .ok_or(MoneyError::Overflow)?;
        let rounded = exact.round_dp_with_strategy(
            money.currency().decimal_places(),
            RoundingStrategy::MidpointAwayFromZero,
        );
        Ok(Money::new(rounded, money.currency()))
    }
}

impl Default for Rate {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage().normalize())
    }
}
