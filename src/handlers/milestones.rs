use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::MilestoneStatus;
use crate::error::AppError;
use crate::middleware::CallerId;
use crate::services::CreateMilestone;
use crate::validation::StrictPayload;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: MilestoneStatus,
}

pub async fn create_milestone(
    State(state): State<AppState>,
    CallerId(client_id): CallerId,
    Json(payload): Json<StrictPayload<CreateMilestone>>,
) -> Result<impl IntoResponse, AppError> {
    let milestone = state
        .engine
        .create_milestone(client_id, payload.data)
        .await?;
    Ok((StatusCode::CREATED, Json(milestone)))
}

pub async fn list_milestones(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.engine.list_milestones(user_id).await?))
}

pub async fn get_milestone(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.engine.get_milestone(id, user_id).await?))
}

pub async fn transition_milestone(
    State(state): State<AppState>,
    CallerId(actor_id): CallerId,
    Path(id): Path<Uuid>,
    Json(payload): Json<StrictPayload<TransitionRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let milestone = state
        .engine
        .transition_milestone(id, actor_id, payload.data.status)
        .await?;
    Ok(Json(milestone))
}

pub async fn accept_payment(
    State(state): State<AppState>,
    CallerId(provider_id): CallerId,
    Path(transaction_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state
        .engine
        .accept_pending_payment(transaction_id, provider_id)
        .await?;
    Ok(Json(tx))
}
