//! Usage DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use core_kernel::{BillingPeriod, ClientId, PhoneNumberId, UsageRecordId};
use domain_billing::{BillingError, RecordedUsage, UsageCursor, UsageEvent, UsagePage, UsageRecord, UsageType};

use super::precise;
use crate::error::ApiError;

/// A usage event pushed by the carrier
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordUsageRequest {
    #[validate(length(min = 8, max = 16, message = "phone number must be E.164"))]
    pub phone_number: String,
    pub usage_type: UsageType,
    #[validate(length(min = 3, max = 32))]
    pub from_number: String,
    #[validate(length(min = 3, max = 32))]
    pub to_number: String,
    pub duration_secs: Option<u32>,
    #[validate(range(min = 1, message = "quantity must be positive"))]
    pub quantity: Option<u32>,
    pub timestamp: DateTime<Utc>,
    #[validate(length(min = 1, max = 128))]
    pub external_id: Option<String>,
}

impl From<RecordUsageRequest> for UsageEvent {
    fn from(request: RecordUsageRequest) -> Self {
        UsageEvent {
            phone_number: request.phone_number,
            usage_type: request.usage_type,
            from_number: request.from_number,
            to_number: request.to_number,
            duration_secs: request.duration_secs,
            quantity: request.quantity.unwrap_or(1),
            timestamp: request.timestamp,
            external_id: request.external_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecordResponse {
    pub id: UsageRecordId,
    pub client_id: ClientId,
    pub phone_number_id: PhoneNumberId,
    pub phone_number: String,
    pub usage_type: UsageType,
    pub from_number: String,
    pub to_number: String,
    pub duration_secs: Option<u32>,
    pub billable_secs: Option<u32>,
    pub quantity: u32,
    pub cost: String,
    pub timestamp: DateTime<Utc>,
    pub external_id: Option<String>,
}

impl From<UsageRecord> for UsageRecordResponse {
    fn from(record: UsageRecord) -> Self {
        Self {
            id: record.id,
            client_id: record.client_id,
            phone_number_id: record.phone_number_id,
            phone_number: record.phone_number,
            usage_type: record.usage_type,
            from_number: record.from_number,
            to_number: record.to_number,
            duration_secs: record.duration_secs,
            billable_secs: record.billable_secs,
            quantity: record.quantity,
            cost: precise(&record.cost),
            timestamp: record.timestamp,
            external_id: record.external_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUsageResponse {
    pub record: UsageRecordResponse,
    /// True when the external id had been seen before
    pub duplicate: bool,
}

impl From<RecordedUsage> for RecordUsageResponse {
    fn from(recorded: RecordedUsage) -> Self {
        Self {
            record: recorded.record.into(),
            duplicate: recorded.duplicate,
        }
    }
}

/// Half-open `[startDate, endDate)` window
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl DateRangeQuery {
    pub fn period(&self) -> Result<BillingPeriod, ApiError> {
        Ok(BillingPeriod::new(self.start_date, self.end_date).map_err(BillingError::from)?)
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UsagePageQuery {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Opaque cursor from a previous page
    pub after: Option<String>,
    #[validate(range(min = 1, max = 1000, message = "limit must be between 1 and 1000"))]
    pub limit: Option<usize>,
}

impl UsagePageQuery {
    pub fn period(&self) -> Result<BillingPeriod, ApiError> {
        Ok(BillingPeriod::new(self.start_date, self.end_date).map_err(BillingError::from)?)
    }

    pub fn cursor(&self) -> Result<Option<UsageCursor>, ApiError> {
        self.after.as_deref().map(decode_cursor).transpose()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsagePageResponse {
    pub records: Vec<UsageRecordResponse>,
    /// Pass as `after` to fetch the next page; absent on the last page
    pub next: Option<String>,
}

impl From<UsagePage> for UsagePageResponse {
    fn from(page: UsagePage) -> Self {
        Self {
            records: page.records.into_iter().map(UsageRecordResponse::from).collect(),
            next: page.next.map(|cursor| encode_cursor(&cursor)),
        }
    }
}

/// `<timestamp micros>_<record uuid>`
pub fn encode_cursor(cursor: &UsageCursor) -> String {
    format!("{}_{}", cursor.timestamp.timestamp_micros(), cursor.id.as_uuid())
}

pub fn decode_cursor(raw: &str) -> Result<UsageCursor, ApiError> {
    let invalid = || ApiError::Validation(format!("invalid cursor '{}'", raw));
    let (micros, id) = raw.split_once('_').ok_or_else(invalid)?;
    let micros: i64 = micros.parse().map_err(|_| invalid())?;
    Ok(UsageCursor {
        timestamp: DateTime::from_timestamp_micros(micros).ok_or_else(invalid)?,
        id: id.parse().map_err(|_| invalid())?,
    })
}
