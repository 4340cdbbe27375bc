pub mod admin;
pub mod charges;
pub mod ledger;
pub mod milestones;
pub mod withdrawals;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::domain::Network;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub ledger: String,
    pub networks: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let ledger_status = match state.engine.store().health_check().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::error!(error = %e, "Ledger store health check failed");
            "disconnected"
        }
    };

    let health_response = HealthStatus {
        status: if ledger_status == "connected" {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        ledger: ledger_status.to_string(),
        networks: Network::ALL
            .iter()
            .map(|n| n.as_str().to_string())
            .collect(),
    };

    let status_code = if ledger_status == "connected" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_response))
}
