use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::Network;
use crate::error::AppError;
use crate::handlers::charges::ensure_party;
use crate::middleware::CallerId;
use crate::validation::StrictPayload;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub amount: BigDecimal,
    pub destination_address: String,
    pub network: Network,
}

pub async fn create_withdrawal(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(payload): Json<StrictPayload<WithdrawRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = payload.data;
    let tx = state
        .engine
        .withdraw(
            user_id,
            request.amount,
            &request.destination_address,
            request.network,
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(tx)))
}

pub async fn get_withdrawal(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.engine.get_withdraw_status(id).await?;
    ensure_party(&tx, user_id)?;
    Ok(Json(tx))
}
