//! Client handlers

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};

use core_kernel::ClientId;

use crate::dto::clients::*;
use crate::extract::{ValidatedJson, ValidatedQuery};
use crate::{error::ApiError, AppState};

/// Onboards a client with a zero balance
pub async fn create_client(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CreateClientRequest>,
) -> Result<(StatusCode, Json<ClientResponse>), ApiError> {
    let new_client = request.into_new_client(state.engine.config())?;
    let client = state.engine.onboard_client(new_client).await?;
    Ok((StatusCode::CREATED, Json(client.into())))
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<ClientId>,
) -> Result<Json<ClientResponse>, ApiError> {
    let client = state.engine.get_client(id).await?;
    Ok(Json(client.into()))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<ClientId>,
    ValidatedJson(request): ValidatedJson<UpdateClientStatusRequest>,
) -> Result<Json<ClientResponse>, ApiError> {
    let client = state.engine.update_client_status(id, request.status).await?;
    Ok(Json(client.into()))
}

/// Replaces the rate card; usage already recorded keeps its price
pub async fn update_rate_card(
    State(state): State<AppState>,
    Path(id): Path<ClientId>,
    payload: Result<Json<domain_billing::RateCard>, JsonRejection>,
) -> Result<Json<ClientResponse>, ApiError> {
    let Json(rate_card) = payload?;
    let client = state.engine.update_rate_card(id, rate_card).await?;
    Ok(Json(client.into()))
}

/// Compares the cached balance with the invoices, repairing on request
pub async fn reconcile(
    State(state): State<AppState>,
    Path(id): Path<ClientId>,
    ValidatedQuery(query): ValidatedQuery<ReconcileQuery>,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    let report = state
        .engine
        .reconcile(id, query.repair.unwrap_or(false))
        .await?;
    Ok(Json(report.into()))
}
