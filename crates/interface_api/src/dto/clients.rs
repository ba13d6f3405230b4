//! Client DTOs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use core_kernel::{BillingCycle, ClientId, Currency, Money, Rate};
use domain_billing::{BillingConfig, Client, ClientStatus, NewClient, RateCard, ReconciliationReport};

use super::money;
use crate::error::ApiError;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    #[validate(length(min = 2, max = 12, message = "code must be 2 to 12 characters"))]
    pub code: String,
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    pub name: String,
    pub currency: Option<Currency>,
    pub billing_cycle: Option<BillingCycle>,
    pub billing_anchor: NaiveDate,
    #[validate(range(max = 365, message = "payment terms cannot exceed a year"))]
    pub payment_terms_days: Option<u32>,
    /// Percentage, 8 for 8%
    pub tax_rate_percent: Option<Decimal>,
    pub credit_limit: Decimal,
    pub rate_card: Option<RateCard>,
}

impl CreateClientRequest {
    /// Fills unset fields from the engine defaults
    pub fn into_new_client(self, defaults: &BillingConfig) -> Result<NewClient, ApiError> {
        let currency = self.currency.unwrap_or(defaults.default_currency);
        let tax_rate = match self.tax_rate_percent {
            Some(percent) => Rate::from_percentage(percent),
            None => Rate::new(defaults.default_tax_rate),
        }
        .map_err(|e| ApiError::Validation(e.to_string()))?;

        Ok(NewClient {
            code: self.code,
            name: self.name,
            currency,
            billing_cycle: self.billing_cycle.unwrap_or(BillingCycle::Monthly),
            billing_anchor: self.billing_anchor,
            payment_terms_days: self.payment_terms_days.unwrap_or(defaults.default_payment_terms_days),
            tax_rate,
            credit_limit: Money::new(self.credit_limit, currency),
            rate_card: self
                .rate_card
                .unwrap_or_else(|| RateCard::default().with_billing_increment(defaults.billing_increment_secs)),
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateClientStatusRequest {
    pub status: ClientStatus,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReconcileQuery {
    pub repair: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientResponse {
    pub id: ClientId,
    pub code: String,
    pub name: String,
    pub currency: Currency,
    pub billing_cycle: BillingCycle,
    pub billing_anchor: NaiveDate,
    pub payment_terms_days: u32,
    pub tax_rate_percent: Decimal,
    pub rate_card: RateCard,
    pub credit_limit: String,
    pub current_balance: String,
    pub unapplied_credit: String,
    pub invoice_sequence: u64,
    pub closed_through: Option<DateTime<Utc>>,
    pub status: ClientStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Client> for ClientResponse {
    fn from(client: Client) -> Self {
        Self {
            id: client.id,
            credit_limit: money(&client.credit_limit),
            current_balance: money(&client.current_balance),
            unapplied_credit: money(&client.unapplied_credit),
            tax_rate_percent: client.tax_rate.as_percentage().normalize(),
            code: client.code,
            name: client.name,
            currency: client.currency,
            billing_cycle: client.billing_cycle,
            billing_anchor: client.billing_anchor,
            payment_terms_days: client.payment_terms_days,
            rate_card: client.rate_card,
            invoice_sequence: client.invoice_sequence,
            closed_through: client.closed_through,
            status: client.status,
            created_at: client.created_at,
            updated_at: client.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResponse {
    pub client_id: ClientId,
    pub cached_balance: String,
    pub derived_balance: String,
    pub drift: String,
    pub consistent: bool,
    pub repaired: bool,
}

impl From<ReconciliationReport> for ReconciliationResponse {
    fn from(report: ReconciliationReport) -> Self {
        Self {
            client_id: report.client_id,
            cached_balance: money(&report.cached_balance),
            derived_balance: money(&report.derived_balance),
            drift: money(&report.drift),
            consistent: report.is_consistent(),
            repaired: report.repaired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CreateClientRequest {
        CreateClientRequest {
            code: "ACME".to_string(),
            name: "Acme Telecom".to_string(),
            currency: None,
            billing_cycle: None,
            billing_anchor: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            payment_terms_days: None,
            tax_rate_percent: Some(dec!(8)),
            credit_limit: dec!(500),
            rate_card: None,
        }
    }

    #[test]
    fn test_unset_fields_take_engine_defaults() {
        let defaults = BillingConfig::default();
        let client = request().into_new_client(&defaults).unwrap();
        assert_eq!(client.currency, defaults.default_currency);
        assert_eq!(client.billing_cycle, BillingCycle::Monthly);
        assert_eq!(client.payment_terms_days, defaults.default_payment_terms_days);
        assert_eq!(client.tax_rate.as_decimal(), dec!(0.08));
        assert_eq!(client.rate_card.billing_increment_secs, defaults.billing_increment_secs);
    }

    #[test]
    fn test_validation_rejects_empty_name_and_long_terms() {
        let mut bad = request();
        bad.name = String::new();
        bad.payment_terms_days = Some(400);
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("payment_terms_days"));
    }

    #[test]
    fn test_negative_tax_rate_is_a_validation_error() {
        let mut bad = request();
        bad.tax_rate_percent = Some(dec!(-1));
        let result = bad.into_new_client(&BillingConfig::default());
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }
}
