//! Billing API Server Binary
//!
//! Starts the HTTP API together with the billing scheduler, which closes
//! ended periods, and the outbox relay, which publishes billing events.
//!
//! # Usage
//!
//! ```bash
//! # Run against PostgreSQL
//! API_DATABASE_URL=postgres://... cargo run --bin billing-api
//!
//! # Run with in-process storage
//! API_STORAGE=memory API_LOG_FORMAT=json cargo run --bin billing-api
//! ```
//!
//! # Environment Variables
//!
//! * `API_HOST` - Server host (default: 0.0.0.0)
//! * `API_PORT` - Server port (default: 8080)
//! * `API_DATABASE_URL` - PostgreSQL connection string
//! * `API_STORAGE` - `postgres` or `memory` (default: postgres)
//! * `API_MAX_CONNECTIONS` - Pool size (default: 10)
//! * `API_LOG_LEVEL` - Log level: trace, debug, info, warn, error (default: info)
//! * `API_LOG_FORMAT` - `plain` or `json` (default: plain)
//! * `BILLING_*` - Engine tunables such as `BILLING_RELEASE_GRACE_SECS`

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use domain_billing::{
    BillingEngine, BillingScheduler, BillingStore, InMemoryBillingStore, OutboxRelay, RateCard,
    StaticNumberInventory, TracingEventSink,
};
use infra_db::{create_pool, run_migrations, PostgresBillingStore};
use interface_api::config::{ApiConfig, LogFormat, StorageBackend};
use interface_api::create_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let config = ApiConfig::from_env().context("invalid configuration")?;
    init_tracing(&config)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = ?config.storage,
        "Starting billing API server"
    );

    let store = open_store(&config).await?;
    let inventory = Arc::new(StaticNumberInventory::seeded(&RateCard::default()));
    let engine = Arc::new(BillingEngine::new(store.clone(), inventory, config.billing.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = BillingScheduler::new(engine.clone());
    let scheduler_interval = config.billing.scheduler_interval();
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_interval, scheduler_shutdown).await;
    });

    let relay = OutboxRelay::new(store, Arc::new(TracingEventSink), config.billing.outbox_batch_size);
    let relay_interval = config.billing.outbox_interval();
    let relay_task = tokio::spawn(async move {
        relay.run(relay_interval, shutdown_rx).await;
    });

    let app = create_router(engine, config.clone());
    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server_addr()))?;

    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background workers after in-flight requests have drained
    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler_task.await {
        tracing::error!(error = %e, "Scheduler task ended abnormally");
    }
    if let Err(e) = relay_task.await {
        tracing::error!(error = %e, "Outbox relay task ended abnormally");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(config: &ApiConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    }
    .context("failed to install tracing subscriber")
}

/// Opens the configured storage backend, migrating PostgreSQL first
async fn open_store(config: &ApiConfig) -> anyhow::Result<Arc<dyn BillingStore>> {
    match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; billing state is lost on restart");
            Ok(Arc::new(InMemoryBillingStore::new()))
        }
        StorageBackend::Postgres => {
            let pool = create_pool(config.database())
                .await
                .context("failed to connect to database")?;
            run_migrations(&pool).await.context("failed to run migrations")?;
            Ok(Arc::new(PostgresBillingStore::new(pool)))
        }
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
