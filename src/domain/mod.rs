//! Domain entities for the escrow engine.
//! Framework-agnostic: no sqlx, no axum, no chain clients in here.

pub mod milestone;
pub mod money;
pub mod network;
pub mod transaction;
pub mod wallet;

pub use milestone::{Milestone, MilestoneStatus, Role};
pub use network::Network;
pub use transaction::{Transaction, TransactionKind, TransactionStatus, TransactionType};
pub use wallet::{TempWallet, WalletStatus};

use thiserror::Error;

/// Returned when a persisted enum column holds a value this build does not know.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
