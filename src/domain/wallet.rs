use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::{money, Network, ParseEnumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Completed,
    Inactive,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Completed => "completed",
            WalletStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for WalletStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(WalletStatus::Active),
            "completed" => Ok(WalletStatus::Completed),
            "inactive" => Ok(WalletStatus::Inactive),
            _ => Err(ParseEnumError::new("wallet status", s)),
        }
    }
}

/// Ephemeral deposit wallet, one per charge request.
#[derive(Clone, Serialize, Deserialize)]
pub struct TempWallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address: String,
    #[serde(skip_serializing)]
    pub encrypted_private_key: String,
    /// Short hash of the key that encrypted `encrypted_private_key`.
    pub encryption_key_hash: Option<String>,
    pub network: Network,
    pub status: WalletStatus,
    pub total_received: BigDecimal,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TempWallet {
    pub fn new(
        user_id: Uuid,
        network: Network,
        address: String,
        encrypted_private_key: String,
        encryption_key_hash: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            address,
            encrypted_private_key,
            encryption_key_hash: Some(encryption_key_hash),
            network,
            status: WalletStatus::Active,
            total_received: money::zero(),
            last_checked_at: None,
            created_at: Utc::now(),
        }
    }
}

// Keep the ciphertext out of logs.
impl std::fmt::Debug for TempWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempWallet")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("address", &self.address)
            .field("encryption_key_hash", &self.encryption_key_hash)
            .field("network", &self.network)
            .field("status", &self.status)
            .field("total_received", &self.total_received)
            .field("last_checked_at", &self.last_checked_at)
            .finish()
    }
}
