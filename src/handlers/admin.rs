use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::validation::StrictPayload;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct OverrideAmountRequest {
    pub amount: BigDecimal,
}

pub async fn process_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(transaction_id = %id, "Admin triggered withdrawal processing");
    let tx = state.engine.process_withdraw(id).await?;
    Ok(Json(tx))
}

pub async fn override_amount(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StrictPayload<OverrideAmountRequest>>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(
        transaction_id = %id,
        amount = %payload.data.amount,
        "Admin override of disputed amount"
    );
    let tx = state
        .engine
        .override_disputed_amount(id, payload.data.amount)
        .await?;
    Ok(Json(tx))
}
