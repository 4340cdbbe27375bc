use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{Network, Transaction};
use crate::error::AppError;
use crate::middleware::CallerId;
use crate::validation::StrictPayload;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    pub amount: BigDecimal,
    pub network: Network,
}

pub async fn create_charge(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(payload): Json<StrictPayload<ChargeRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = payload.data;
    let quote = state
        .engine
        .initiate_charge(user_id, request.amount, request.network)
        .await?;
    Ok((StatusCode::CREATED, Json(quote)))
}

/// Owner-only view of a charge.
pub(crate) fn ensure_party(tx: &Transaction, user_id: Uuid) -> Result<(), AppError> {
    if tx.involves(user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "transaction {} does not belong to this user",
            tx.id
        )))
    }
}

pub async fn get_charge(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.engine.get_charge_status(id).await?;
    ensure_party(&tx, user_id)?;
    Ok(Json(tx))
}

pub async fn cancel_charge(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.engine.cancel_charge(id, user_id).await?;
    Ok(Json(tx))
}
