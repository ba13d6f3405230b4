//! Payment handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use core_kernel::{Money, PaymentId};

use crate::dto::payments::*;
use crate::extract::{ValidatedJson, ValidatedQuery};
use crate::{error::ApiError, AppState};

/// Records a payment and settles it against the client's invoices
pub async fn create_payment(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<SettlementResponse>), ApiError> {
    let client = state.engine.get_client(request.client_id).await?;
    let settlement = state
        .engine
        .apply_payment(request.into_request(client.currency))
        .await?;
    Ok((StatusCode::CREATED, Json(settlement.into())))
}

pub async fn list_payments(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<PaymentListQuery>,
) -> Result<Json<Vec<PaymentResponse>>, ApiError> {
    let payments = state.engine.list_payments(query.client_id).await?;
    Ok(Json(payments.into_iter().map(PaymentResponse::from).collect()))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment = state.engine.get_payment(id).await?;
    Ok(Json(payment.into()))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
    ValidatedJson(request): ValidatedJson<RefundRequest>,
) -> Result<(StatusCode, Json<SettlementResponse>), ApiError> {
    let amount = match request.amount {
        Some(amount) => {
            let original = state.engine.get_payment(id).await?;
            Some(Money::new(amount, original.amount.currency()))
        }
        None => None,
    };
    let settlement = state.engine.refund_payment(id, amount).await?;
    Ok((StatusCode::CREATED, Json(settlement.into())))
}
