//! Invoice handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use core_kernel::{BillingPeriod, InvoiceId};
use domain_billing::BillingError;

use crate::dto::invoices::*;
use crate::extract::{ValidatedJson, ValidatedQuery};
use crate::{error::ApiError, AppState};

pub async fn list_invoices(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<InvoiceListQuery>,
) -> Result<Json<InvoicePageResponse>, ApiError> {
    let query = query.into_query();
    let page = state.engine.list_invoices(&query).await?;
    Ok(Json(InvoicePageResponse::new(page, &query)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<InvoiceId>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let invoice = state.engine.get_invoice(id).await?;
    Ok(Json(invoice.into()))
}

/// Closes one period; 201 when the invoice is new, 200 when it already existed
pub async fn generate_invoice(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<GenerateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), ApiError> {
    let period = BillingPeriod::new(request.billing_period_start, request.billing_period_end)
        .map_err(BillingError::from)?;
    let generated = state.engine.generate_invoice(request.client_id, period).await?;
    let status = if generated.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(generated.invoice.into())))
}

pub async fn cancel_invoice(
    State(state): State<AppState>,
    Path(id): Path<InvoiceId>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let invoice = state.engine.cancel_invoice(id).await?;
    Ok(Json(invoice.into()))
}
