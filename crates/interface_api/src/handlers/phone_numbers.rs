//! Phone number handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use core_kernel::PhoneNumberId;
use domain_billing::AvailableNumber;

use crate::dto::phone_numbers::*;
use crate::extract::{ValidatedJson, ValidatedQuery};
use crate::{error::ApiError, AppState};

pub async fn search_available(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<AvailableNumbersQuery>,
) -> Result<Json<Vec<AvailableNumber>>, ApiError> {
    let numbers = state.engine.search_available_numbers(&query.into()).await?;
    Ok(Json(numbers))
}

/// Assigns a number after the credit check and charges its first period
pub async fn provision(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ProvisionRequest>,
) -> Result<(StatusCode, Json<ProvisionResponse>), ApiError> {
    let provisioned = state
        .engine
        .provision_number(request.client_id, &request.phone_number, request.friendly_name)
        .await?;
    Ok((StatusCode::CREATED, Json(provisioned.into())))
}

pub async fn list_numbers(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<PhoneNumberListQuery>,
) -> Result<Json<Vec<PhoneNumberResponse>>, ApiError> {
    let numbers = state.engine.list_phone_numbers(query.client_id).await?;
    Ok(Json(numbers.into_iter().map(PhoneNumberResponse::from).collect()))
}

pub async fn get_number(
    State(state): State<AppState>,
    Path(id): Path<PhoneNumberId>,
) -> Result<Json<PhoneNumberResponse>, ApiError> {
    Ok(Json(state.engine.get_phone_number(id).await?.into()))
}

pub async fn release(
    State(state): State<AppState>,
    Path(id): Path<PhoneNumberId>,
) -> Result<Json<PhoneNumberResponse>, ApiError> {
    Ok(Json(state.engine.release_number(id).await?.into()))
}

pub async fn suspend(
    State(state): State<AppState>,
    Path(id): Path<PhoneNumberId>,
) -> Result<Json<PhoneNumberResponse>, ApiError> {
    Ok(Json(state.engine.suspend_number(id).await?.into()))
}

pub async fn resume(
    State(state): State<AppState>,
    Path(id): Path<PhoneNumberId>,
) -> Result<Json<PhoneNumberResponse>, ApiError> {
    Ok(Json(state.engine.resume_number(id).await?.into()))
}
