//! Property-Based Test Generators
//!
//! Provides proptest strategies for generating random billing data that
//! respects domain invariants, plus a few `fake` helpers for readable names.

use chrono::{DateTime, Duration, TimeZone, Utc};
use core_kernel::{BillingCycle, ClientId, Currency, Money, PhoneNumberId};
use domain_billing::{PaymentMethod, UsageType};
use fake::faker::company::en::CompanyName;
use fake::Fake;
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Strategy for generating currencies with a two-decimal minor unit
pub fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![
        Just(Currency::USD),
        Just(Currency::EUR),
        Just(Currency::GBP),
        Just(Currency::CAD),
        Just(Currency::AUD),
    ]
}

/// Strategy for generating valid positive amounts in minor units
pub fn positive_amount_minor_strategy() -> impl Strategy<Value = i64> {
    1i64..100_000_000i64
}

/// Strategy for generating valid USD Money values in whole cents
pub fn usd_money_strategy() -> impl Strategy<Value = Money> {
    positive_amount_minor_strategy().prop_map(|amount| Money::from_minor(amount, Currency::USD))
}

/// Strategy for sub-cent per-unit telephony rates ($0.0001 to $0.9999)
pub fn unit_rate_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000i64).prop_map(|n| Decimal::new(n, 4))
}

/// Strategy for tax percentages with two decimals (0% to 30%)
pub fn tax_percent_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..3_000i64).prop_map(|n| Decimal::new(n, 2))
}

/// Strategy for monthly number fees ($0.50 to $99.99)
pub fn monthly_fee_strategy() -> impl Strategy<Value = Decimal> {
    (50i64..10_000i64).prop_map(|n| Decimal::new(n, 2))
}

/// Strategy for call durations up to two hours
pub fn call_duration_strategy() -> impl Strategy<Value = u32> {
    0u32..7_200u32
}

/// Strategy for billing increments in common use
pub fn billing_increment_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![Just(1u32), Just(6u32), Just(30u32), Just(60u32)]
}

pub fn usage_type_strategy() -> impl Strategy<Value = UsageType> {
    proptest::sample::select(UsageType::ALL.to_vec())
}

pub fn billing_cycle_strategy() -> impl Strategy<Value = BillingCycle> {
    prop_oneof![
        Just(BillingCycle::Monthly),
        Just(BillingCycle::Quarterly),
        Just(BillingCycle::Annual),
    ]
}

pub fn payment_method_strategy() -> impl Strategy<Value = PaymentMethod> {
    prop_oneof![
        Just(PaymentMethod::Card),
        Just(PaymentMethod::BankTransfer),
        Just(PaymentMethod::Ach),
        Just(PaymentMethod::Wire),
        Just(PaymentMethod::Check),
    ]
}

/// Strategy for instants within January 2024, to the second
pub fn january_2024_instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..31 * 86_400).prop_map(|secs| {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
            + Duration::seconds(secs)
    })
}

/// Strategy for a lease window within January 2024 as (start, end)
pub fn january_window_strategy() -> impl Strategy<Value = (DateTime<Utc>, DateTime<Utc>)> {
    (0i64..31 * 86_400, 1i64..31 * 86_400).prop_map(|(offset, length)| {
        let month_start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();
        let start = month_start + Duration::seconds(offset);
        (start, start + Duration::seconds(length))
    })
}

pub fn client_id_strategy() -> impl Strategy<Value = ClientId> {
    any::<[u8; 16]>().prop_map(|bytes| ClientId::from_uuid(uuid::Uuid::from_bytes(bytes)))
}

pub fn phone_number_id_strategy() -> impl Strategy<Value = PhoneNumberId> {
    any::<[u8; 16]>().prop_map(|bytes| PhoneNumberId::from_uuid(uuid::Uuid::from_bytes(bytes)))
}

/// Strategy for client codes accepted at onboarding
pub fn client_code_strategy() -> impl Strategy<Value = String> {
    "[A-Z][A-Z0-9_]{1,15}"
}

/// Strategy for E.164 North American numbers
pub fn e164_strategy() -> impl Strategy<Value = String> {
    (200u32..999u32, 200u32..999u32, 0u32..9999u32)
        .prop_map(|(area, exchange, line)| format!("+1{area}{exchange}{line:04}"))
}

/// A random company name for client fixtures
pub fn company_name() -> String {
    CompanyName().fake()
}

/// A random upper-case client code derived from a company name
pub fn company_code() -> String {
    let code: String = company_name()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(10)
        .collect::<String>()
        .to_ascii_uppercase();
    if code.is_empty() {
        "CLIENT".to_string()
    } else {
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn usd_money_is_whole_cents(money in usd_money_strategy()) {
            prop_assert!(money.is_positive());
            prop_assert!(money.is_whole_minor());
        }

        #[test]
        fn unit_rates_are_sub_dollar(rate in unit_rate_strategy()) {
            prop_assert!(rate > Decimal::ZERO);
            prop_assert!(rate < Decimal::ONE);
        }

        #[test]
        fn e164_numbers_have_twelve_chars(number in e164_strategy()) {
            prop_assert_eq!(number.len(), 12);
            prop_assert!(number.starts_with("+1"));
        }

        #[test]
        fn january_instants_stay_in_january(instant in january_2024_instant_strategy()) {
            prop_assert_eq!(instant.format("%Y-%m").to_string(), "2024-01");
        }
    }

    #[test]
    fn test_company_code_is_valid_client_code() {
        let code = company_code();
        assert!(!code.is_empty() && code.len() <= 16);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
