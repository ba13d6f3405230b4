//! Usage events and ledger records
//!
//! A [`UsageEvent`] is what the carrier network reports. Once rated and
//! accepted it becomes an immutable [`UsageRecord`] owned by a phone number
//! and its client.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{ClientId, Money, PhoneNumberId, UsageRecordId};

use crate::error::BillingError;

/// Billable traffic categories
///
/// The ordering is the order categories appear in on invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageType {
    InboundCall,
    OutboundCall,
    InboundSms,
    OutboundSms,
    InboundMms,
    OutboundMms,
}

impl UsageType {
    pub const ALL: [UsageType; 6] = [
        UsageType::InboundCall,
        UsageType::OutboundCall,
        UsageType::InboundSms,
        UsageType::OutboundSms,
        UsageType::InboundMms,
        UsageType::OutboundMms,
    ];

    /// Returns true for voice traffic, which is rated by duration
    pub fn is_call(&self) -> bool {
        matches!(self, UsageType::InboundCall | UsageType::OutboundCall)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageType::InboundCall => "inbound_call",
            UsageType::OutboundCall => "outbound_call",
            UsageType::InboundSms => "inbound_sms",
            UsageType::OutboundSms => "outbound_sms",
            UsageType::InboundMms => "inbound_mms",
            UsageType::OutboundMms => "outbound_mms",
        }
    }

    /// Human readable label used on invoice lines
    pub fn label(&self) -> &'static str {
        match self {
            UsageType::InboundCall => "Inbound calls",
            UsageType::OutboundCall => "Outbound calls",
            UsageType::InboundSms => "Inbound SMS",
            UsageType::OutboundSms => "Outbound SMS",
            UsageType::InboundMms => "Inbound MMS",
            UsageType::OutboundMms => "Outbound MMS",
        }
    }
}

impl fmt::Display for UsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UsageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| BillingError::validation(format!("unknown usage type: {s}")))
    }
}

/// A usage event as reported by the network, before rating
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    /// The provisioned number that carried the traffic (E.164)
    pub phone_number: String,
    pub usage_type: UsageType,
    pub from_number: String,
    pub to_number: String,
    /// Call duration in seconds; required for calls, absent for messages
    pub duration_secs: Option<u32>,
    /// Units carried by the event; always 1, a multi-part message arrives as
    /// one event per part
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    pub timestamp: DateTime<Utc>,
    /// Carrier-assigned identifier used to drop redelivered events
    pub external_id: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

impl UsageEvent {
    /// Checks the event shape; does not look at the number or client
    pub fn validate(&self, now: DateTime<Utc>, max_skew: chrono::Duration) -> Result<(), BillingError> {
        if self.phone_number.trim().is_empty() {
            return Err(BillingError::validation("phone number is required"));
        }
        if self.quantity != 1 {
            return Err(BillingError::validation(format!(
                "quantity must be 1, got {}; report one event per call or message",
                self.quantity
            )));
        }
        match (self.usage_type.is_call(), self.duration_secs) {
            (true, None) => return Err(BillingError::validation("calls require a duration")),
            (false, Some(_)) => {
                return Err(BillingError::validation(format!(
                    "{} events carry no duration",
                    self.usage_type
                )))
            }
            _ => {}
        }
        if self.timestamp > now + max_skew {
            return Err(BillingError::validation(format!(
                "timestamp {} is in the future",
                self.timestamp.to_rfc3339()
            )));
        }
        if let Some(external_id) = &self.external_id {
            if external_id.trim().is_empty() {
                return Err(BillingError::validation("external id must not be blank"));
            }
        }
        Ok(())
    }
}

/// An accepted, rated usage record; never mutated after insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: UsageRecordId,
    pub client_id: ClientId,
    pub phone_number_id: PhoneNumberId,
    pub phone_number: String,
    pub usage_type: UsageType,
    pub from_number: String,
    pub to_number: String,
    pub duration_secs: Option<u32>,
    /// Duration after rounding up to the billing increment
    pub billable_secs: Option<u32>,
    pub quantity: u32,
    pub cost: Money,
    pub timestamp: DateTime<Utc>,
    pub external_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Position of this record in a client's ledger order
    pub fn cursor(&self) -> UsageCursor {
        UsageCursor {
            timestamp: self.timestamp,
            id: self.id,
        }
    }
}

/// Keyset position within a client's usage, ordered by timestamp then id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCursor {
    pub timestamp: DateTime<Utc>,
    pub id: UsageRecordId,
}

/// One page of usage records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsagePage {
    pub records: Vec<UsageRecord>,
    /// Cursor to pass for the next page; `None` when exhausted
    pub next: Option<UsageCursor>,
}

/// Outcome of appending a record to storage
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Appended(UsageRecord),
    /// The external id was already recorded; the stored record is returned
    Duplicate(UsageRecord),
    /// The client's periods are closed through this instant
    PeriodClosed { closed_through: DateTime<Utc> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(usage_type: UsageType) -> UsageEvent {
        UsageEvent {
            phone_number: "+15551230001".to_string(),
            usage_type,
            from_number: "+15551230001".to_string(),
            to_number: "+15559870000".to_string(),
            duration_secs: usage_type.is_call().then_some(90),
            quantity: 1,
            timestamp: Utc::now(),
            external_id: None,
        }
    }

    #[test]
    fn test_usage_type_round_trips_through_str() {
        for usage_type in UsageType::ALL {
            assert_eq!(usage_type.as_str().parse::<UsageType>().unwrap(), usage_type);
        }
        assert!("fax".parse::<UsageType>().is_err());
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut e = event(UsageType::OutboundSms);
        e.quantity = 0;
        assert!(matches!(
            e.validate(Utc::now(), Duration::minutes(5)),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_every_event_is_a_single_unit() {
        for usage_type in UsageType::ALL {
            let mut e = event(usage_type);
            e.quantity = 7;
            assert!(matches!(
                e.validate(Utc::now(), Duration::minutes(5)),
                Err(BillingError::Validation(_))
            ));
            e.quantity = 1;
            assert!(e.validate(Utc::now(), Duration::minutes(5)).is_ok());
        }
    }

    #[test]
    fn test_call_requires_duration() {
        let mut e = event(UsageType::InboundCall);
        e.duration_secs = None;
        assert!(e.validate(Utc::now(), Duration::minutes(5)).is_err());
    }

    #[test]
    fn test_message_with_duration_rejected() {
        let mut e = event(UsageType::InboundSms);
        e.duration_secs = Some(30);
        assert!(e.validate(Utc::now(), Duration::minutes(5)).is_err());
    }

    #[test]
    fn test_future_timestamp_beyond_skew_rejected() {
        let now = Utc::now();
        let mut e = event(UsageType::OutboundCall);
        e.timestamp = now + Duration::hours(1);
        assert!(e.validate(now, Duration::minutes(5)).is_err());
        e.timestamp = now + Duration::minutes(1);
        assert!(e.validate(now, Duration::minutes(5)).is_ok());
    }

    #[test]
    fn test_cursor_orders_by_timestamp_then_id() {
        let t = Utc::now();
        let a = UsageCursor { timestamp: t, id: UsageRecordId::new_v7() };
        let b = UsageCursor { timestamp: t, id: UsageRecordId::new_v7() };
        let c = UsageCursor { timestamp: t - Duration::seconds(1), id: UsageRecordId::new_v7() };
        assert!(a < b);
        assert!(c < a);
    }
}
