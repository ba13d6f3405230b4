//! Period aggregation
//!
//! Sums stored usage costs for a client over a half-open period, grouped by
//! usage type and by phone number. Costs are taken from the records as
//! stored; nothing is re-rated here.
//!
//! Results use ordered maps so two aggregations over an unchanged ledger
//! serialize to identical bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use core_kernel::{BillingPeriod, ClientId, Currency, Money, PhoneNumberId};

use crate::error::BillingError;
use crate::ports::BillingStore;
use crate::usage::{UsageRecord, UsageType};

/// Totals for one usage type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    /// Number of records
    pub count: u64,
    /// Sum of record quantities
    pub quantity: u64,
    pub duration_secs: u64,
    pub billable_secs: u64,
    pub cost: Money,
}

impl UsageTotals {
    fn zero(currency: Currency) -> Self {
        Self {
            count: 0,
            quantity: 0,
            duration_secs: 0,
            billable_secs: 0,
            cost: Money::zero(currency),
        }
    }

    fn add(&mut self, record: &UsageRecord) -> Result<(), BillingError> {
        self.count += 1;
        self.quantity += u64::from(record.quantity);
        self.duration_secs += u64::from(record.duration_secs.unwrap_or(0));
        self.billable_secs += u64::from(record.billable_secs.unwrap_or(0));
        self.cost = self.cost.checked_add(&record.cost)?;
        Ok(())
    }
}

/// Per-number breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberUsage {
    pub phone_number: String,
    pub by_type: BTreeMap<UsageType, UsageTotals>,
    pub total_cost: Money,
}

/// Usage summary for one client and period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub client_id: ClientId,
    pub period: BillingPeriod,
    pub currency: Currency,
    pub record_count: u64,
    pub by_type: BTreeMap<UsageType, UsageTotals>,
    pub by_number: BTreeMap<PhoneNumberId, NumberUsage>,
    pub total_cost: Money,
}

impl AggregationResult {
    pub fn empty(client_id: ClientId, period: BillingPeriod, currency: Currency) -> Self {
        Self {
            client_id,
            period,
            currency,
            record_count: 0,
            by_type: BTreeMap::new(),
            by_number: BTreeMap::new(),
            total_cost: Money::zero(currency),
        }
    }

    /// Folds one record into the totals
    ///
    /// Records outside the period are ignored so a caller can feed a
    /// superset safely.
    pub fn add(&mut self, record: &UsageRecord) -> Result<(), BillingError> {
        if record.client_id != self.client_id || !self.period.contains(record.timestamp) {
            return Ok(());
        }
        let currency = self.currency;
        self.by_type
            .entry(record.usage_type)
            .or_insert_with(|| UsageTotals::zero(currency))
            .add(record)?;

        let number = self
            .by_number
            .entry(record.phone_number_id)
            .or_insert_with(|| NumberUsage {
                phone_number: record.phone_number.clone(),
                by_type: BTreeMap::new(),
                total_cost: Money::zero(currency),
            });
        number
            .by_type
            .entry(record.usage_type)
            .or_insert_with(|| UsageTotals::zero(currency))
            .add(record)?;
        number.total_cost = number.total_cost.checked_add(&record.cost)?;

        self.record_count += 1;
        self.total_cost = self.total_cost.checked_add(&record.cost)?;
        Ok(())
    }

    /// Totals for one usage type, if any traffic occurred
    pub fn totals_for(&self, usage_type: UsageType) -> Option<&UsageTotals> {
        self.by_type.get(&usage_type)
    }
}

/// Reads a client's ledger page by page and folds it into an [`AggregationResult`]
pub struct PeriodAggregator {
    store: Arc<dyn BillingStore>,
    page_size: usize,
}

impl PeriodAggregator {
    pub fn new(store: Arc<dyn BillingStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    #[instrument(skip(self), fields(client_id = %client_id, period = %period))]
    pub async fn aggregate(
        &self,
        client_id: ClientId,
        currency: Currency,
        period: BillingPeriod,
    ) -> Result<AggregationResult, BillingError> {
        let mut result = AggregationResult::empty(client_id, period, currency);
        let mut cursor = None;
        loop {
            let page = self
                .store
                .usage_page(client_id, period, cursor, self.page_size)
                .await?;
            for record in &page.records {
                result.add(record)?;
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        tracing::debug!(records = result.record_count, total = %result.total_cost, "Aggregated usage");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use core_kernel::UsageRecordId;
    use rust_decimal_macros::dec;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn period() -> BillingPeriod {
        BillingPeriod::new(ts(1), Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()).unwrap()
    }

    fn record(client_id: ClientId, number: PhoneNumberId, usage_type: UsageType, at: DateTime<Utc>) -> UsageRecord {
        UsageRecord {
            id: UsageRecordId::new_v7(),
            client_id,
            phone_number_id: number,
            phone_number: "+15551230001".to_string(),
            usage_type,
            from_number: "+15551230001".to_string(),
            to_number: "+15559870000".to_string(),
            duration_secs: usage_type.is_call().then_some(45),
            billable_secs: usage_type.is_call().then_some(60),
            quantity: 1,
            cost: Money::new(dec!(0.0125), Currency::USD),
            timestamp: at,
            external_id: None,
            recorded_at: at,
        }
    }

    #[test]
    fn test_groups_by_type_and_number() {
        let client_id = ClientId::new();
        let a = PhoneNumberId::new();
        let b = PhoneNumberId::new();
        let mut result = AggregationResult::empty(client_id, period(), Currency::USD);
        result.add(&record(client_id, a, UsageType::OutboundCall, ts(2))).unwrap();
        result.add(&record(client_id, a, UsageType::OutboundCall, ts(3))).unwrap();
        result.add(&record(client_id, b, UsageType::InboundSms, ts(4))).unwrap();

        assert_eq!(result.record_count, 3);
        let calls = result.totals_for(UsageType::OutboundCall).unwrap();
        assert_eq!(calls.count, 2);
        assert_eq!(calls.duration_secs, 90);
        assert_eq!(calls.billable_secs, 120);
        assert_eq!(result.by_number.len(), 2);
        assert_eq!(result.total_cost, Money::new(dec!(0.0375), Currency::USD));
    }

    #[test]
    fn test_boundary_event_belongs_to_next_period() {
        let client_id = ClientId::new();
        let mut result = AggregationResult::empty(client_id, period(), Currency::USD);
        let boundary = period().end();
        result
            .add(&record(client_id, PhoneNumberId::new(), UsageType::OutboundSms, boundary))
            .unwrap();
        assert_eq!(result.record_count, 0);
    }

    #[test]
    fn test_serialization_is_order_independent() {
        let client_id = ClientId::new();
        let number = PhoneNumberId::new();
        let records = vec![
            record(client_id, number, UsageType::OutboundMms, ts(2)),
            record(client_id, number, UsageType::InboundCall, ts(3)),
        ];

        let mut forward = AggregationResult::empty(client_id, period(), Currency::USD);
        for r in &records {
            forward.add(r).unwrap();
        }
        let mut backward = AggregationResult::empty(client_id, period(), Currency::USD);
        for r in records.iter().rev() {
            backward.add(r).unwrap();
        }
        assert_eq!(
            serde_json::to_string(&forward).unwrap(),
            serde_json::to_string(&backward).unwrap()
        );
    }
}
