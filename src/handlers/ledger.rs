use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CallerId;
use crate::services::ledger::DEFAULT_PAGE_SIZE;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: BigDecimal,
}

pub async fn get_balance(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<impl IntoResponse, AppError> {
    let balance = state.engine.get_balance(user_id).await?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let page = pagination.page.unwrap_or(1);
    let limit = pagination.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    let transactions = state
        .engine
        .list_transactions(user_id, page, limit)
        .await?;
    Ok(Json(transactions))
}
