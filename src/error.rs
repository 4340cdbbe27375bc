use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::chain::ChainError;
use crate::domain::Network;
use crate::ports::LedgerError;

/// Failures surfaced by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient balance: {available} available, {requested} requested")]
    InsufficientFunds {
        available: BigDecimal,
        requested: BigDecimal,
    },

    #[error("Invalid {network} address: {address}")]
    InvalidAddress { network: Network, address: String },

    #[error("Charge {0} has expired")]
    ExpiredCharge(Uuid),

    #[error("Insufficient amount received: {received} {token} received, {expected} {token} expected")]
    UnderpaidCharge {
        received: String,
        expected: String,
        token: &'static str,
    },

    #[error("Chain call failed: {0}")]
    ChainCallFailure(#[from] ChainError),

    #[error("{entity} {id} was changed concurrently")]
    SettlementConflict { entity: &'static str, id: Uuid },

    #[error(
        "Failed to decrypt private key for wallet {wallet_id} ({address}): no configured key matches \
         key hash {key_hash}. Add the original key to WALLET_ENCRYPTION_KEY_FALLBACKS"
    )]
    KeyDecryptionFailure {
        wallet_id: Uuid,
        address: String,
        key_hash: String,
    },

    #[error("Withdrawal amount {requested} must be greater than {minimum}")]
    BelowMinimumWithdrawal {
        minimum: BigDecimal,
        requested: BigDecimal,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cannot move milestone from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger store error: {0}")]
    Store(LedgerError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                available,
                requested,
                ..
            } => EngineError::InsufficientFunds {
                available,
                requested,
            },
            LedgerError::VersionConflict { entity, id }
            | LedgerError::Terminal { entity, id, .. } => {
                EngineError::SettlementConflict { entity, id }
            }
            LedgerError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Store(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payment required: {0}")]
    PaymentRequired(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::InsufficientFunds { .. } => AppError::PaymentRequired(message),
            EngineError::InvalidAddress { .. }
            | EngineError::InvalidAmount(_)
            | EngineError::InvalidInput(_)
            | EngineError::BelowMinimumWithdrawal { .. } => AppError::Validation(message),
            EngineError::ExpiredCharge(_)
            | EngineError::UnderpaidCharge { .. }
            | EngineError::InvalidTransition { .. } => AppError::Unprocessable(message),
            EngineError::SettlementConflict { .. } => AppError::Conflict(message),
            EngineError::Forbidden(_) => AppError::Forbidden(message),
            EngineError::NotFound { .. } => AppError::NotFound(message),
            EngineError::ChainCallFailure(_)
            | EngineError::KeyDecryptionFailure { .. }
            | EngineError::Config(_)
            | EngineError::Store(_) => {
                tracing::error!(error = %message, "Engine operation failed");
                AppError::Internal(message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
