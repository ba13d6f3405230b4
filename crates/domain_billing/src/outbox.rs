//! Transactional outbox
//!
//! Financial writes persist their notifications in the same atomic commit.
//! The [`OutboxRelay`] delivers them afterwards; a sink that is down only
//! delays delivery and never touches billing state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use core_kernel::{ClientId, EventId, InvoiceId, Money, PaymentId, PhoneNumberId, PortError};

use crate::error::BillingError;
use crate::invoice::Invoice;
use crate::payment::Payment;
use crate::phone_number::PhoneNumber;
use crate::ports::BillingStore;

/// Something downstream systems want to hear about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEvent {
    InvoiceGenerated {
        invoice_id: InvoiceId,
        invoice_number: String,
        total_amount: Money,
    },
    InvoicePaid {
        invoice_id: InvoiceId,
        invoice_number: String,
    },
    InvoiceOverdue {
        invoice_id: InvoiceId,
        invoice_number: String,
        outstanding: Money,
    },
    InvoiceCancelled {
        invoice_id: InvoiceId,
        invoice_number: String,
    },
    PaymentApplied {
        payment_id: PaymentId,
        amount: Money,
        unapplied_amount: Money,
    },
    PaymentRefunded {
        payment_id: PaymentId,
        refund_of: PaymentId,
        amount: Money,
    },
    NumberProvisioned {
        phone_number_id: PhoneNumberId,
        number: String,
    },
    NumberReleased {
        phone_number_id: PhoneNumberId,
        number: String,
    },
}

impl BillingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BillingEvent::InvoiceGenerated { .. } => "invoice_generated",
            BillingEvent::InvoicePaid { .. } => "invoice_paid",
            BillingEvent::InvoiceOverdue { .. } => "invoice_overdue",
            BillingEvent::InvoiceCancelled { .. } => "invoice_cancelled",
            BillingEvent::PaymentApplied { .. } => "payment_applied",
            BillingEvent::PaymentRefunded { .. } => "payment_refunded",
            BillingEvent::NumberProvisioned { .. } => "number_provisioned",
            BillingEvent::NumberReleased { .. } => "number_released",
        }
    }

    pub fn invoice_generated(invoice: &Invoice) -> Self {
        BillingEvent::InvoiceGenerated {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
            total_amount: invoice.total_amount,
        }
    }

    pub fn invoice_paid(invoice: &Invoice) -> Self {
        BillingEvent::InvoicePaid {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
        }
    }

    pub fn invoice_overdue(invoice: &Invoice) -> Result<Self, BillingError> {
        Ok(BillingEvent::InvoiceOverdue {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
            outstanding: invoice.outstanding()?,
        })
    }

    pub fn invoice_cancelled(invoice: &Invoice) -> Self {
        BillingEvent::InvoiceCancelled {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
        }
    }

    pub fn payment_applied(payment: &Payment) -> Self {
        BillingEvent::PaymentApplied {
            payment_id: payment.id,
            amount: payment.amount,
            unapplied_amount: payment.unapplied_amount,
        }
    }

    pub fn number_provisioned(number: &PhoneNumber) -> Self {
        BillingEvent::NumberProvisioned {
            phone_number_id: number.id,
            number: number.number.clone(),
        }
    }

    pub fn number_released(number: &PhoneNumber) -> Self {
        BillingEvent::NumberReleased {
            phone_number_id: number.id,
            number: number.number.clone(),
        }
    }
}

/// A persisted event awaiting delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: EventId,
    pub client_id: ClientId,
    pub event: BillingEvent,
    pub occurred_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn new(client_id: ClientId, event: BillingEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new_v7(),
            client_id,
            event,
            occurred_at,
            attempts: 0,
            last_error: None,
            delivered_at: None,
        }
    }
}

/// Destination for outbox events
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PortError>;
}

/// Sink that writes each event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PortError> {
        let payload = serde_json::to_string(&event.event)
            .map_err(|e| PortError::transformation(e.to_string()))?;
        tracing::info!(
            event_id = %event.id,
            client_id = %event.client_id,
            event_type = event.event.name(),
            payload = %payload,
            "Billing event"
        );
        Ok(())
    }
}

/// Counts from one relay pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Moves pending outbox events to a sink
pub struct OutboxRelay {
    store: Arc<dyn BillingStore>,
    sink: Arc<dyn EventSink>,
    batch_size: usize,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn BillingStore>, sink: Arc<dyn EventSink>, batch_size: usize) -> Self {
        Self {
            store,
            sink,
            batch_size: batch_size.max(1),
        }
    }

    /// Delivers one batch
    ///
    /// A failed publish is recorded on the event and retried on a later pass.
    pub async fn relay_once(&self) -> Result<RelayReport, BillingError> {
        let events = self.store.pending_events(self.batch_size).await?;
        let mut report = RelayReport::default();
        for event in events {
            match self.sink.publish(&event).await {
                Ok(()) => {
                    self.store.mark_event_delivered(event.id, Utc::now()).await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(event_id = %event.id, error = %e, "Outbox delivery failed");
                    self.store.record_event_failure(event.id, &e.to_string()).await?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Runs until `shutdown` flips to true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.relay_once().await {
                        Ok(report) if report.delivered + report.failed > 0 => {
                            tracing::debug!(delivered = report.delivered, failed = report.failed, "Outbox pass");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Outbox relay pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Outbox relay stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_serialized_tag_matches_event_name() {
        let events = [
            BillingEvent::PaymentApplied {
                payment_id: PaymentId::new_v7(),
                amount: Money::new(dec!(20), Currency::USD),
                unapplied_amount: Money::zero(Currency::USD),
            },
            BillingEvent::NumberReleased {
                phone_number_id: PhoneNumberId::new_v7(),
                number: "+14155550100".to_string(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.name());
        }
    }

    #[test]
    fn test_relay_batch_is_at_least_one() {
        let store: Arc<dyn BillingStore> = Arc::new(crate::memory::InMemoryBillingStore::new());
        let relay = OutboxRelay::new(store, Arc::new(TracingEventSink), 0);
        assert_eq!(relay.batch_size, 1);
    }
}
