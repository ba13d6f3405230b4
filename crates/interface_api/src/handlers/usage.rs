//! Usage handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use core_kernel::ClientId;
use domain_billing::AggregationResult;

use crate::dto::usage::*;
use crate::extract::{ValidatedJson, ValidatedQuery};
use crate::{error::ApiError, AppState};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Ingests one usage event
///
/// A redelivered event answers 200 with the stored record instead of 201.
pub async fn record_usage(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RecordUsageRequest>,
) -> Result<(StatusCode, Json<RecordUsageResponse>), ApiError> {
    let recorded = state.engine.record_usage(request.into()).await?;
    let status = if recorded.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(recorded.into())))
}

pub async fn list_usage(
    State(state): State<AppState>,
    Path(client_id): Path<ClientId>,
    ValidatedQuery(query): ValidatedQuery<UsagePageQuery>,
) -> Result<Json<UsagePageResponse>, ApiError> {
    let page = state
        .engine
        .usage_page(
            client_id,
            query.period()?,
            query.cursor()?,
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(page.into()))
}

pub async fn usage_stats(
    State(state): State<AppState>,
    Path(client_id): Path<ClientId>,
    ValidatedQuery(query): ValidatedQuery<DateRangeQuery>,
) -> Result<Json<AggregationResult>, ApiError> {
    let stats = state.engine.usage_stats(client_id, query.period()?).await?;
    Ok(Json(stats))
}
