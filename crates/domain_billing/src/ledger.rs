//! Usage ledger
//!
//! Append-only record of rated usage. Events are validated, matched to the
//! provisioned number that carried them, priced with the owning client's
//! rate card at that instant, and appended under the client's shared
//! ingestion gate. Cost is fixed here and never recomputed.

use std::sync::Arc;

use tracing::instrument;

use core_kernel::{BillingPeriod, ClientId, UsageRecordId};

use crate::clock::Clock;
use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::gate::ClientGates;
use crate::ports::BillingStore;
use crate::rating::RateEngine;
use crate::usage::{AppendOutcome, UsageCursor, UsageEvent, UsagePage, UsageRecord};

/// Result of recording one event
#[derive(Debug, Clone)]
pub struct RecordedUsage {
    pub record: UsageRecord,
    /// True when the external id had already been recorded
    pub duplicate: bool,
}

impl RecordedUsage {
    pub fn id(&self) -> UsageRecordId {
        self.record.id
    }
}

pub struct UsageLedger {
    store: Arc<dyn BillingStore>,
    gates: Arc<ClientGates>,
    clock: Arc<dyn Clock>,
    rates: RateEngine,
    config: BillingConfig,
}

impl UsageLedger {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gates: Arc<ClientGates>,
        clock: Arc<dyn Clock>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            gates,
            clock,
            rates: RateEngine::new(),
            config,
        }
    }

    /// Appends one usage event
    ///
    /// # Errors
    ///
    /// - `Validation` for a malformed event or unsupported traffic type
    /// - `ResourceInactive` for an unknown, suspended or released number
    /// - `PeriodClosed` if the event falls in an already invoiced period
    #[instrument(skip(self, event), fields(number = %event.phone_number, usage_type = %event.usage_type))]
    pub async fn record(&self, event: UsageEvent) -> Result<RecordedUsage, BillingError> {
        let now = self.clock.now();
        event.validate(now, self.config.max_clock_skew())?;

        let number = self
            .store
            .find_phone_number(&event.phone_number)
            .await?
            .ok_or_else(|| BillingError::resource_inactive(&event.phone_number, "number is not provisioned"))?;
        number.check_traffic(event.usage_type, event.timestamp, self.config.release_grace())?;

        let gate = self.gates.gate(number.client_id);
        let _ingest = gate.ingest().await;

        let client = self.store.get_client(number.client_id).await?;
        if let Some(closed_through) = client.closed_through {
            if event.timestamp < closed_through {
                return Err(BillingError::PeriodClosed {
                    client_id: client.id,
                    timestamp: event.timestamp,
                    closed_through,
                });
            }
        }

        let quote = self.rates.quote(
            &client.rate_card,
            client.currency,
            event.usage_type,
            event.quantity,
            event.duration_secs,
        )?;
        let record = UsageRecord {
            id: UsageRecordId::new_v7(),
            client_id: client.id,
            phone_number_id: number.id,
            phone_number: number.number.clone(),
            usage_type: event.usage_type,
            from_number: event.from_number,
            to_number: event.to_number,
            duration_secs: if event.usage_type.is_call() { event.duration_secs } else { None },
            billable_secs: quote.billable_secs,
            quantity: event.quantity,
            cost: quote.cost,
            timestamp: event.timestamp,
            external_id: event.external_id,
            recorded_at: now,
        };

        match self.store.append_usage(&record).await? {
            AppendOutcome::Appended(record) => {
                tracing::debug!(record_id = %record.id, cost = %record.cost, "Usage recorded");
                Ok(RecordedUsage { record, duplicate: false })
            }
            AppendOutcome::Duplicate(existing) => {
                tracing::debug!(record_id = %existing.id, "Duplicate usage event ignored");
                Ok(RecordedUsage { record: existing, duplicate: true })
            }
            AppendOutcome::PeriodClosed { closed_through } => Err(BillingError::PeriodClosed {
                client_id: client.id,
                timestamp: record.timestamp,
                closed_through,
            }),
        }
    }

    /// One page of a client's usage in `period`, resuming after `after`
    pub async fn query(
        &self,
        client_id: ClientId,
        period: BillingPeriod,
        after: Option<UsageCursor>,
        limit: usize,
    ) -> Result<UsagePage, BillingError> {
        let limit = limit.clamp(1, self.config.aggregation_page_size.max(1));
        Ok(self.store.usage_page(client_id, period, after, limit).await?)
    }
}
