//! Scheduler and outbox relay tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use core_kernel::PortError;

use domain_billing::{
    BillingScheduler, BillingStore, ClientStatus, EventSink, InvoiceKind, OutboxEvent, OutboxRelay,
    SchedulerState,
};
use test_utils::{date, utc, NumberFixtures, PeriodFixtures, TestEngine};

/// Remembers every event it is handed
#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn names(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PortError> {
        self.seen.lock().unwrap().push(event.event.name().to_string());
        Ok(())
    }
}

/// Refuses every event
struct DownSink;

#[async_trait]
impl EventSink for DownSink {
    async fn publish(&self, _event: &OutboxEvent) -> Result<(), PortError> {
        Err(PortError::ServiceUnavailable {
            service: "event bus".to_string(),
        })
    }
}

async fn period_invoices(t: &TestEngine, client_id: core_kernel::ClientId) -> Vec<domain_billing::Invoice> {
    t.store
        .client_invoices(client_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|i| i.kind == InvoiceKind::Period)
        .collect()
}

// ============================================================================
// Billing Scheduler
// ============================================================================

mod scheduler_tests {
    use super::*;

    #[tokio::test]
    async fn test_tick_closes_every_ended_period_in_order() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let acme = t.onboard("ACME", date(2024, 1, 1)).await;
        t.engine
            .provision_number(acme.id, NumberFixtures::LOCAL_SF, None)
            .await
            .unwrap();

        t.set_now(utc(2024, 4, 1));
        let scheduler = BillingScheduler::new(t.engine.clone());
        let report = scheduler.tick().await.unwrap();

        assert_eq!(report.clients, 1);
        assert_eq!(report.invoices_generated, 3);
        assert_eq!(report.failures, 0);
        // The setup invoice and February's are past due; January's is zero
        assert_eq!(report.overdue_marked, 2);

        let mut closed = period_invoices(&t, acme.id).await;
        closed.sort_by_key(|i| i.sequence);
        let starts: Vec<_> = closed.iter().map(|i| i.period.start()).collect();
        assert_eq!(starts, vec![utc(2024, 1, 1), utc(2024, 2, 1), utc(2024, 3, 1)]);
        assert_eq!(
            t.engine.get_client(acme.id).await.unwrap().closed_through,
            Some(utc(2024, 4, 1))
        );
        assert_eq!(scheduler.state(acme.id), SchedulerState::Idle);

        let again = scheduler.tick().await.unwrap();
        assert_eq!(again.invoices_generated, 0);
        assert_eq!(period_invoices(&t, acme.id).await.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_competing_schedulers_close_each_period_once() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let acme = t.onboard("ACME", date(2024, 1, 1)).await;
        let globex = t.onboard("GLOBEX", date(2024, 1, 15)).await;
        t.set_now(utc(2024, 4, 20));

        let first = BillingScheduler::new(t.engine.clone()).with_holder("worker-a");
        let second = BillingScheduler::new(t.engine.clone()).with_holder("worker-b");
        let (a, b) = tokio::join!(first.tick(), second.tick());
        let (a, b) = (a.unwrap(), b.unwrap());

        // Whatever one worker skipped, a follow-up pass picks up
        first.tick().await.unwrap();

        for client in [acme.id, globex.id] {
            let closed = period_invoices(&t, client).await;
            let mut starts: Vec<_> = closed.iter().map(|i| i.period.start()).collect();
            starts.sort();
            starts.dedup();
            assert_eq!(starts.len(), closed.len(), "a period was invoiced twice");
            assert_eq!(closed.len(), 3);
        }
        assert!(a.invoices_generated + b.invoices_generated <= 6);
        assert_eq!(a.failures + b.failures, 0);
    }

    #[tokio::test]
    async fn test_tick_fills_a_period_skipped_by_manual_generation() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let acme = t.onboard("ACME", date(2024, 1, 1)).await;
        t.engine
            .provision_number(acme.id, NumberFixtures::LOCAL_SF, None)
            .await
            .unwrap();

        t.set_now(utc(2024, 3, 1));
        t.engine
            .generate_invoice(acme.id, PeriodFixtures::february_2024())
            .await
            .unwrap();

        let report = BillingScheduler::new(t.engine.clone()).tick().await.unwrap();
        assert_eq!(report.invoices_generated, 1);
        assert_eq!(report.failures, 0);

        let mut closed = period_invoices(&t, acme.id).await;
        closed.sort_by_key(|i| i.period.start());
        let starts: Vec<_> = closed.iter().map(|i| i.period.start()).collect();
        assert_eq!(starts, vec![utc(2024, 1, 1), utc(2024, 2, 1)]);
        assert_eq!(
            t.engine.get_client(acme.id).await.unwrap().closed_through,
            Some(utc(2024, 3, 1))
        );
    }

    #[tokio::test]
    async fn test_inactive_clients_are_skipped_and_suspended_billed() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let suspended = t.onboard("SUSP", date(2024, 1, 1)).await;
        let inactive = t.onboard("GONE", date(2024, 1, 1)).await;
        t.engine
            .update_client_status(suspended.id, ClientStatus::Suspended)
            .await
            .unwrap();
        t.engine
            .update_client_status(inactive.id, ClientStatus::Inactive)
            .await
            .unwrap();

        t.set_now(utc(2024, 2, 1));
        let report = BillingScheduler::new(t.engine.clone()).tick().await.unwrap();

        assert_eq!(report.clients, 1);
        assert_eq!(period_invoices(&t, suspended.id).await.len(), 1);
        assert!(period_invoices(&t, inactive.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_storage_outage_is_counted_and_recovered_from() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let acme = t.onboard("ACME", date(2024, 1, 1)).await;
        t.set_now(utc(2024, 3, 1));
        let scheduler = BillingScheduler::new(t.engine.clone());

        t.store.set_fail_writes(true);
        let report = scheduler.tick().await.unwrap();
        t.store.set_fail_writes(false);

        assert!(report.failures > 0);
        assert_eq!(report.invoices_generated, 0);
        assert!(period_invoices(&t, acme.id).await.is_empty());

        let recovered = scheduler.tick().await.unwrap();
        assert_eq!(recovered.invoices_generated, 2);
        assert_eq!(recovered.failures, 0);
    }

    #[tokio::test]
    async fn test_lease_held_by_another_worker_is_respected() {
        let t = TestEngine::start(utc(2024, 2, 1));
        let acme = t.onboard("ACME", date(2024, 1, 1)).await;
        let january = acme.period_containing(utc(2024, 1, 1)).unwrap();

        let lease = t.engine.config().period_close_lease();
        assert!(t
            .store
            .claim_period_close(acme.id, january, "elsewhere", utc(2024, 2, 1), lease)
            .await
            .unwrap());

        let report = BillingScheduler::new(t.engine.clone()).tick().await.unwrap();
        assert_eq!(report.periods_skipped, 1);
        assert!(period_invoices(&t, acme.id).await.is_empty());

        // Once the lease lapses the period is claimable again
        t.set_now(utc(2024, 2, 1) + lease);
        let report = BillingScheduler::new(t.engine.clone()).tick().await.unwrap();
        assert_eq!(report.invoices_generated, 1);
    }
}

// ============================================================================
// Outbox Relay
// ============================================================================

mod outbox_tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_written_with_the_change_and_delivered_once() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let acme = t.onboard("ACME", date(2024, 1, 1)).await;
        t.engine
            .provision_number(acme.id, NumberFixtures::LOCAL_SF, None)
            .await
            .unwrap();

        let sink = Arc::new(RecordingSink::default());
        let relay = OutboxRelay::new(t.store.clone(), sink.clone(), 10);

        let report = relay.relay_once().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(sink.names(), vec!["number_provisioned", "invoice_generated"]);

        let idle = relay.relay_once().await.unwrap();
        assert_eq!(idle.delivered, 0);
        assert!(t.store.outbox_snapshot().iter().all(|e| e.delivered_at.is_some()));
    }

    #[tokio::test]
    async fn test_failed_deliveries_are_retried_on_the_next_pass() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let acme = t.onboard("ACME", date(2024, 1, 1)).await;
        t.engine
            .provision_number(acme.id, NumberFixtures::LOCAL_SF, None)
            .await
            .unwrap();

        let down = OutboxRelay::new(t.store.clone(), Arc::new(DownSink), 10);
        let report = down.relay_once().await.unwrap();
        assert_eq!(report.failed, 2);
        for event in t.store.outbox_snapshot() {
            assert_eq!(event.attempts, 1);
            assert!(event.last_error.is_some());
            assert!(event.delivered_at.is_none());
        }

        let sink = Arc::new(RecordingSink::default());
        let up = OutboxRelay::new(t.store.clone(), sink.clone(), 10);
        assert_eq!(up.relay_once().await.unwrap().delivered, 2);
    }

    #[tokio::test]
    async fn test_failed_writes_emit_nothing() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let acme = t.onboard("ACME", date(2024, 1, 1)).await;

        t.store.set_fail_writes(true);
        let result = t
            .engine
            .provision_number(acme.id, NumberFixtures::LOCAL_SF, None)
            .await;
        t.store.set_fail_writes(false);

        assert!(result.is_err());
        assert!(t.store.outbox_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_batch_size_bounds_a_pass() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let acme = t.onboard("ACME", date(2024, 1, 1)).await;
        for number in [NumberFixtures::LOCAL_SF, NumberFixtures::LOCAL_NY] {
            t.engine.provision_number(acme.id, number, None).await.unwrap();
        }

        let relay = OutboxRelay::new(t.store.clone(), Arc::new(RecordingSink::default()), 3);
        assert_eq!(relay.relay_once().await.unwrap().delivered, 3);
        assert_eq!(relay.relay_once().await.unwrap().delivered, 1);
    }
}
