//! Billing scheduler
//!
//! Closes every billing period that has ended, per client, then refreshes
//! overdue statuses. Clients are processed concurrently up to a bound.
//! A close lease in the store keeps two workers (in this process or
//! another) from closing the same period at once; the engine's
//! duplicate-period guard makes a repeated close return the existing
//! invoice.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::instrument;
use uuid::Uuid;

use core_kernel::ClientId;

use crate::client::{Client, ClientStatus};
use crate::engine::BillingEngine;
use crate::error::BillingError;

/// Where a client is in the close cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    PeriodClosing,
}

/// Counts from one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub clients: usize,
    pub invoices_generated: usize,
    /// Periods skipped because another worker holds the lease
    pub periods_skipped: usize,
    pub overdue_marked: usize,
    pub failures: usize,
}

impl TickReport {
    fn merge(&mut self, other: TickReport) {
        self.clients += other.clients;
        self.invoices_generated += other.invoices_generated;
        self.periods_skipped += other.periods_skipped;
        self.overdue_marked += other.overdue_marked;
        self.failures += other.failures;
    }
}

#[derive(Clone)]
pub struct BillingScheduler {
    engine: Arc<BillingEngine>,
    holder: String,
    states: Arc<DashMap<ClientId, SchedulerState>>,
    concurrency: usize,
}

impl BillingScheduler {
    pub fn new(engine: Arc<BillingEngine>) -> Self {
        let concurrency = engine.config().scheduler_concurrency.max(1);
        Self {
            engine,
            holder: format!("scheduler-{}", Uuid::new_v4()),
            states: Arc::new(DashMap::new()),
            concurrency,
        }
    }

    /// Name this worker claims leases under
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn state(&self, client_id: ClientId) -> SchedulerState {
        self.states
            .get(&client_id)
            .map(|s| *s)
            .unwrap_or(SchedulerState::Idle)
    }

    /// One pass over every billable client
    ///
    /// Inactive clients are skipped; suspended clients keep being billed.
    #[instrument(skip(self), fields(holder = %self.holder))]
    pub async fn tick(&self) -> Result<TickReport, BillingError> {
        let clients = self.engine.list_clients(None).await?;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for client in clients.into_iter().filter(|c| c.status != ClientStatus::Inactive) {
            let scheduler = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                scheduler.process_client(client).await
            });
        }

        let mut report = TickReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(client_report) => report.merge(client_report),
                Err(e) => {
                    tracing::error!(error = %e, "Scheduler task panicked");
                    report.failures += 1;
                }
            }
        }
        if report.invoices_generated + report.overdue_marked + report.failures > 0 {
            tracing::info!(
                clients = report.clients,
                generated = report.invoices_generated,
                skipped = report.periods_skipped,
                overdue = report.overdue_marked,
                failures = report.failures,
                "Scheduler tick finished"
            );
        }
        Ok(report)
    }

    async fn process_client(&self, client: Client) -> TickReport {
        let mut report = TickReport {
            clients: 1,
            ..Default::default()
        };
        let closed = self.close_due_periods(&client).await;
        report.merge(closed);

        match self.engine.refresh_overdue(client.id).await {
            Ok(changed) => report.overdue_marked += changed.len(),
            Err(e) => {
                tracing::error!(client_id = %client.id, error = %e, "Overdue refresh failed");
                report.failures += 1;
            }
        }
        report
    }

    /// Closes every period of `client` that ended since its last close
    ///
    /// Stops at the first failure so periods are closed in order.
    pub async fn close_due_periods(&self, client: &Client) -> TickReport {
        let mut report = TickReport::default();
        let now = self.engine.now();
        let periods = match client.periods_due(now) {
            Ok(periods) => periods,
            Err(e) => {
                tracing::error!(client_id = %client.id, error = %e, "Cannot compute due periods");
                report.failures += 1;
                return report;
            }
        };

        let store = self.engine.store();
        let lease = self.engine.config().period_close_lease();
        for period in periods {
            let claimed = match store
                .claim_period_close(client.id, period, &self.holder, now, lease)
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(client_id = %client.id, %period, error = %e, "Lease claim failed");
                    report.failures += 1;
                    break;
                }
            };
            if !claimed {
                tracing::debug!(client_id = %client.id, %period, "Period close held by another worker");
                report.periods_skipped += 1;
                break;
            }

            self.states.insert(client.id, SchedulerState::PeriodClosing);
            let outcome = self.engine.generate_invoice(client.id, period).await;
            self.states.insert(client.id, SchedulerState::Idle);

            match outcome {
                Ok(generated) => {
                    if generated.created {
                        report.invoices_generated += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(client_id = %client.id, %period, error = %e, "Period close failed");
                    if let Err(release_error) = store.release_period_close(client.id, period, &self.holder).await {
                        tracing::warn!(error = %release_error, "Lease release failed");
                    }
                    report.failures += 1;
                    break;
                }
            }
        }
        report
    }

    /// Ticks every `interval` until `shutdown` flips to true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(holder = %self.holder, interval_secs = interval.as_secs(), "Billing scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "Scheduler tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Billing scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}
