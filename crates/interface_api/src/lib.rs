//! HTTP API Layer
//!
//! This crate provides the REST API for the billing engine using Axum.
//!
//! # Architecture
//!
//! - **Handlers**: Request handlers for clients, invoices, payments, usage and numbers
//! - **Middleware**: Request ids, tracing and request logging
//! - **DTOs**: Request/Response data transfer objects
//! - **Error Handling**: Consistent `{error, message}` responses
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::create_router;
//!
//! let app = create_router(engine, config);
//! axum::serve(listener, app).await?;
//! ```

pub mod config;
pub mod dto;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{
    http::HeaderName,
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use domain_billing::BillingEngine;

use crate::config::ApiConfig;
use crate::handlers::{clients, health, invoices, payments, phone_numbers, usage};
use crate::middleware::{request_logging, REQUEST_ID_HEADER};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BillingEngine>,
    pub config: ApiConfig,
}

/// Creates the main API router
///
/// # Arguments
///
/// * `engine` - Billing engine over the configured store
/// * `config` - API configuration
pub fn create_router(engine: Arc<BillingEngine>, config: ApiConfig) -> Router {
    let state = AppState { engine, config };
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check));

    let client_routes = Router::new()
        .route("/", post(clients::create_client))
        .route("/:id", get(clients::get_client))
        .route("/:id/status", post(clients::update_status))
        .route("/:id/rate-card", put(clients::update_rate_card))
        .route("/:id/reconcile", get(clients::reconcile));

    let billing_routes = Router::new()
        .route("/invoices", get(invoices::list_invoices))
        .route("/invoices/generate", post(invoices::generate_invoice))
        .route("/invoices/:id", get(invoices::get_invoice))
        .route("/invoices/:id/cancel", post(invoices::cancel_invoice))
        .route("/payments", post(payments::create_payment).get(payments::list_payments))
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/:id/refund", post(payments::refund_payment));

    let usage_routes = Router::new()
        .route("/records", post(usage::record_usage))
        .route("/records/:client_id", get(usage::list_usage))
        .route("/stats/:client_id", get(usage::usage_stats));

    let number_routes = Router::new()
        .route("/", get(phone_numbers::list_numbers))
        .route("/available", get(phone_numbers::search_available))
        .route("/provision", post(phone_numbers::provision))
        .route("/:id", get(phone_numbers::get_number))
        .route("/:id/release", post(phone_numbers::release))
        .route("/:id/suspend", post(phone_numbers::suspend))
        .route("/:id/resume", post(phone_numbers::resume));

    Router::new()
        .merge(health_routes)
        .nest("/clients", client_routes)
        .nest("/billing", billing_routes)
        .nest("/usage", usage_routes)
        .nest("/phone-numbers", number_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(request_logging)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
