//! Phone number DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use core_kernel::{ClientId, PhoneNumberId};
use domain_billing::{Capabilities, NumberSearch, NumberStatus, NumberType, PhoneNumber, ProvisionedNumber};

use super::invoices::InvoiceResponse;
use super::money;

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AvailableNumbersQuery {
    #[validate(length(equal = 3, message = "area code must be three digits"))]
    pub area_code: Option<String>,
    #[validate(length(min = 1, max = 15))]
    pub contains: Option<String>,
    #[serde(rename = "type")]
    pub number_type: Option<NumberType>,
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<usize>,
}

impl From<AvailableNumbersQuery> for NumberSearch {
    fn from(query: AvailableNumbersQuery) -> Self {
        NumberSearch {
            area_code: query.area_code,
            contains: query.contains,
            number_type: query.number_type,
            limit: query.limit,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub client_id: ClientId,
    #[validate(length(min = 8, max = 16, message = "phone number must be E.164"))]
    pub phone_number: String,
    #[validate(length(max = 64))]
    pub friendly_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumberListQuery {
    pub client_id: ClientId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumberResponse {
    pub id: PhoneNumberId,
    pub client_id: ClientId,
    pub number: String,
    pub number_type: NumberType,
    pub friendly_name: Option<String>,
    pub monthly_fee: String,
    pub capabilities: Capabilities,
    pub status: NumberStatus,
    pub provisioned_at: DateTime<Utc>,
    pub prepaid_through: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl From<PhoneNumber> for PhoneNumberResponse {
    fn from(number: PhoneNumber) -> Self {
        Self {
            id: number.id,
            client_id: number.client_id,
            monthly_fee: money(&number.monthly_fee),
            number: number.number,
            number_type: number.number_type,
            friendly_name: number.friendly_name,
            capabilities: number.capabilities,
            status: number.status,
            provisioned_at: number.provisioned_at,
            prepaid_through: number.prepaid_through,
            released_at: number.released_at,
        }
    }
}

/// The assigned number and the invoice charging its first period
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResponse {
    pub phone_number: PhoneNumberResponse,
    pub invoice: InvoiceResponse,
}

impl From<ProvisionedNumber> for ProvisionResponse {
    fn from(provisioned: ProvisionedNumber) -> Self {
        Self {
            phone_number: provisioned.phone_number.into(),
            invoice: provisioned.invoice.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_filter_uses_the_short_name() {
        let query: AvailableNumbersQuery =
            serde_json::from_value(serde_json::json!({"areaCode": "415", "type": "toll_free"})).unwrap();
        assert!(query.validate().is_ok());
        let search = NumberSearch::from(query);
        assert_eq!(search.number_type, Some(NumberType::TollFree));
        assert_eq!(search.area_code.as_deref(), Some("415"));
    }

    #[test]
    fn test_area_code_must_be_three_digits() {
        let query = AvailableNumbersQuery {
            area_code: Some("41".to_string()),
            ..Default::default()
        };
        assert!(query.validate().is_err());
    }
}
