//! Provisioned phone numbers
//!
//! A number belongs to exactly one client from provisioning until release.
//! Its lifecycle decides whether usage is accepted and which part of a
//! billing period its monthly fee covers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{BillingPeriod, ClientId, Money, PhoneNumberId};

use crate::error::BillingError;
use crate::usage::UsageType;

/// Number classes, each with its own monthly fee on the rate card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberType {
    Local,
    TollFree,
    Mobile,
}

impl NumberType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NumberType::Local => "local",
            NumberType::TollFree => "toll_free",
            NumberType::Mobile => "mobile",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NumberType::Local => "Local number",
            NumberType::TollFree => "Toll-free number",
            NumberType::Mobile => "Mobile number",
        }
    }
}

impl fmt::Display for NumberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NumberType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(NumberType::Local),
            "toll_free" => Ok(NumberType::TollFree),
            "mobile" => Ok(NumberType::Mobile),
            other => Err(BillingError::validation(format!("unknown number type: {other}"))),
        }
    }
}

/// Traffic a number can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub voice: bool,
    pub sms: bool,
    pub mms: bool,
    pub fax: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self { voice: true, sms: true, mms: true, fax: true }
    }

    pub fn voice_only() -> Self {
        Self { voice: true, sms: false, mms: false, fax: false }
    }

    pub fn supports(&self, usage_type: UsageType) -> bool {
        match usage_type {
            UsageType::InboundCall | UsageType::OutboundCall => self.voice,
            UsageType::InboundSms | UsageType::OutboundSms => self.sms,
            UsageType::InboundMms | UsageType::OutboundMms => self.mms,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { voice: true, sms: true, mms: false, fax: false }
    }
}

/// Lifecycle status of a provisioned number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberStatus {
    Active,
    /// Still owned and billed, but carries no traffic
    Suspended,
    Released,
}

impl NumberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NumberStatus::Active => "active",
            NumberStatus::Suspended => "suspended",
            NumberStatus::Released => "released",
        }
    }
}

impl FromStr for NumberStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(NumberStatus::Active),
            "suspended" => Ok(NumberStatus::Suspended),
            "released" => Ok(NumberStatus::Released),
            other => Err(BillingError::validation(format!("unknown number status: {other}"))),
        }
    }
}

/// A phone number owned by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumber {
    pub id: PhoneNumberId,
    pub client_id: ClientId,
    /// E.164 formatted number
    pub number: String,
    pub number_type: NumberType,
    pub friendly_name: Option<String>,
    pub monthly_fee: Money,
    pub capabilities: Capabilities,
    pub status: NumberStatus,
    pub provisioned_at: DateTime<Utc>,
    /// End of the window already charged at provisioning time
    pub prepaid_through: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PhoneNumber {
    /// Creates a newly provisioned, active number
    pub fn provision(
        client_id: ClientId,
        number: impl Into<String>,
        number_type: NumberType,
        capabilities: Capabilities,
        monthly_fee: Money,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PhoneNumberId::new_v7(),
            client_id,
            number: number.into(),
            number_type,
            friendly_name: None,
            monthly_fee,
            capabilities,
            status: NumberStatus::Active,
            provisioned_at: at,
            prepaid_through: None,
            released_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn with_friendly_name(mut self, name: Option<String>) -> Self {
        self.friendly_name = name;
        self
    }

    pub fn with_prepaid_through(mut self, through: DateTime<Utc>) -> Self {
        self.prepaid_through = Some(through);
        self
    }

    /// Decides whether an event at `timestamp` may be recorded against this number
    ///
    /// # Errors
    ///
    /// `ResourceInactive` if the number was not provisioned yet, is
    /// suspended, or was released more than `grace` before the event.
    /// `Validation` if the number cannot carry this kind of traffic.
    pub fn check_traffic(
        &self,
        usage_type: UsageType,
        timestamp: DateTime<Utc>,
        grace: Duration,
    ) -> Result<(), BillingError> {
        if timestamp < self.provisioned_at {
            return Err(BillingError::resource_inactive(
                &self.number,
                "event precedes provisioning",
            ));
        }
        match self.status {
            NumberStatus::Active => {}
            NumberStatus::Suspended => {
                return Err(BillingError::resource_inactive(&self.number, "number is suspended"));
            }
            NumberStatus::Released => {
                let released_at = self.released_at.unwrap_or(self.updated_at);
                if timestamp >= released_at + grace {
                    return Err(BillingError::resource_inactive(&self.number, "number was released"));
                }
            }
        }
        if !self.capabilities.supports(usage_type) {
            return Err(BillingError::validation(format!(
                "{} cannot carry {}",
                self.number, usage_type
            )));
        }
        Ok(())
    }

    /// The part of `period` this number's recurring fee is owed for
    ///
    /// Starts at the later of the period start, provisioning and any prepaid
    /// window; ends at the earlier of the period end and release.
    pub fn billable_window(&self, period: &BillingPeriod) -> Option<BillingPeriod> {
        let mut start = self.provisioned_at;
        if let Some(prepaid) = self.prepaid_through {
            start = start.max(prepaid);
        }
        let end = self.released_at.unwrap_or(period.end());
        period.intersect(start, end)
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        if self.status != NumberStatus::Active {
            return Err(BillingError::InvalidStateTransition(format!(
                "cannot suspend a {} number",
                self.status.as_str()
            )));
        }
        self.status = NumberStatus::Suspended;
        self.updated_at = now;
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        if self.status != NumberStatus::Suspended {
            return Err(BillingError::InvalidStateTransition(format!(
                "cannot resume a {} number",
                self.status.as_str()
            )));
        }
        self.status = NumberStatus::Active;
        self.updated_at = now;
        Ok(())
    }

    pub fn release(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        if self.status == NumberStatus::Released {
            return Err(BillingError::InvalidStateTransition(format!(
                "{} is already released",
                self.number
            )));
        }
        self.status = NumberStatus::Released;
        self.released_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn number() -> PhoneNumber {
        PhoneNumber::provision(
            ClientId::new(),
            "+15551230001",
            NumberType::Local,
            Capabilities::default(),
            Money::new(dec!(1.15), Currency::USD),
            at(5, 0),
        )
    }

    #[test]
    fn test_active_number_accepts_traffic() {
        let n = number();
        assert!(n.check_traffic(UsageType::OutboundCall, at(6, 0), Duration::zero()).is_ok());
    }

    #[test]
    fn test_traffic_before_provisioning_rejected() {
        let n = number();
        let result = n.check_traffic(UsageType::OutboundCall, at(4, 0), Duration::zero());
        assert!(matches!(result, Err(BillingError::ResourceInactive { .. })));
    }

    #[test]
    fn test_released_number_respects_grace() {
        let mut n = number();
        n.release(at(10, 0)).unwrap();

        let late = at(10, 1);
        assert!(n.check_traffic(UsageType::InboundSms, late, Duration::zero()).is_err());
        assert!(n.check_traffic(UsageType::InboundSms, late, Duration::hours(2)).is_ok());
        // Events from before the release are still accepted
        assert!(n.check_traffic(UsageType::InboundSms, at(9, 0), Duration::zero()).is_ok());
    }

    #[test]
    fn test_suspended_number_rejects_traffic() {
        let mut n = number();
        n.suspend(at(6, 0)).unwrap();
        assert!(n.check_traffic(UsageType::InboundCall, at(7, 0), Duration::zero()).is_err());
        n.resume(at(8, 0)).unwrap();
        assert!(n.check_traffic(UsageType::InboundCall, at(9, 0), Duration::zero()).is_ok());
    }

    #[test]
    fn test_unsupported_capability_rejected() {
        let n = number();
        let result = n.check_traffic(UsageType::OutboundMms, at(6, 0), Duration::zero());
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_billable_window_clipped_by_provisioning_and_release() {
        let period = BillingPeriod::new(at(1, 0), at(31, 0)).unwrap();
        let mut n = number();
        n.release(at(20, 0)).unwrap();
        let window = n.billable_window(&period).unwrap();
        assert_eq!(window.start(), at(5, 0));
        assert_eq!(window.end(), at(20, 0));
    }

    #[test]
    fn test_prepaid_window_excluded() {
        let period = BillingPeriod::new(at(1, 0), at(31, 0)).unwrap();
        let n = number().with_prepaid_through(at(31, 0));
        assert!(n.billable_window(&period).is_none());
    }

    #[test]
    fn test_double_release_rejected() {
        let mut n = number();
        n.release(at(10, 0)).unwrap();
        assert!(matches!(
            n.release(at(11, 0)),
            Err(BillingError::InvalidStateTransition(_))
        ));
    }
}
